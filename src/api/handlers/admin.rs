use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    entity::{order, subscription},
    jobs::SyncReport,
    middleware::AuthUser,
    orders as order_service,
    AppState,
};

use super::payment::{fulfill_and_render, FulfillmentView};
use super::{order_error, require_admin, ApiResponse, PageData, PageQuery};

#[derive(Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct SweepReport {
    pub deactivated: u64,
}

/// GET /api/admin/orders/pending - 待处理订单（待支付与待审核）
pub async fn list_pending_orders(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
    Query(query): Query<PageQuery>,
) -> impl IntoResponse {
    if let Err(resp) = require_admin::<PageData<order::Model>>(auth_user_opt) {
        return resp;
    }

    match order_service::list_reviewable_orders(&app_state.db, query.page, query.page_size).await {
        Ok((items, total)) => (
            StatusCode::OK,
            ApiResponse::success(PageData {
                items,
                total,
                page: query.page,
                page_size: query.page_size,
            }),
        ),
        Err(e) => order_error(e),
    }
}

/// POST /api/admin/orders/{id}/approve - 审核通过并开通
pub async fn approve_order(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let admin = match require_admin::<FulfillmentView>(auth_user_opt) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    info!("管理员 {} 审核通过订单 {}", admin.email, id);
    fulfill_and_render(&app_state, id, "审核通过，订阅已开通").await
}

/// POST /api/admin/orders/{id}/reject - 拒绝支付申请
pub async fn reject_order(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
    Path(id): Path<i64>,
    Json(req): Json<RejectRequest>,
) -> impl IntoResponse {
    if let Err(resp) = require_admin::<order::Model>(auth_user_opt) {
        return resp;
    }

    match order_service::reject_payment(&app_state.db, id, req.reason).await {
        Ok(order) => (
            StatusCode::OK,
            ApiResponse::success_with_message(order, "已拒绝支付申请"),
        ),
        Err(e) => order_error(e),
    }
}

/// POST /api/admin/subscriptions/{id}/revoke - 吊销订阅
///
/// 先删除面板上的身份，删除失败时返回 502 且不修改本地记录。
pub async fn revoke_subscription(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    if let Err(resp) = require_admin::<subscription::Model>(auth_user_opt) {
        return resp;
    }

    match app_state.fulfillment.revoke(id).await {
        Ok(sub) => (
            StatusCode::OK,
            ApiResponse::success_with_message(sub, "订阅已吊销"),
        ),
        Err(e) => order_error(e),
    }
}

/// POST /api/admin/jobs/traffic-sync - 立即同步流量
pub async fn run_traffic_sync(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
) -> impl IntoResponse {
    if let Err(resp) = require_admin::<SyncReport>(auth_user_opt) {
        return resp;
    }

    match app_state.traffic_sync.run_once().await {
        Ok(report) => (StatusCode::OK, ApiResponse::success(report)),
        Err(e) => {
            error!("手动流量同步失败: {:#}", e);
            (
                StatusCode::BAD_GATEWAY,
                ApiResponse::error(format!("流量同步失败: {:#}", e)),
            )
        }
    }
}

/// POST /api/admin/jobs/expiry-sweep - 立即清理过期订阅
pub async fn run_expiry_sweep(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
) -> impl IntoResponse {
    if let Err(resp) = require_admin::<SweepReport>(auth_user_opt) {
        return resp;
    }

    match app_state.expiry_sweep.run_once().await {
        Ok(deactivated) => (StatusCode::OK, ApiResponse::success(SweepReport { deactivated })),
        Err(e) => {
            error!("手动过期清理失败: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::error(format!("过期清理失败: {:#}", e)),
            )
        }
    }
}
