use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};

use crate::{
    entity::{order, plan, OrderStatus},
    error::OrderError,
    middleware::AuthUser,
    orders as order_service,
    AppState,
};

use super::payment::{fulfill_and_render, FulfillmentView};
use super::{order_error, require_user, ApiResponse, PageData, PageQuery};

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub plan_id: i64,
}

#[derive(Serialize)]
pub struct OrderWithPlan {
    pub order: order::Model,
    pub plan: plan::Model,
}

/// POST /api/orders - 创建订单
pub async fn create_order(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
    Json(req): Json<CreateOrderRequest>,
) -> impl IntoResponse {
    let auth_user = match require_user::<OrderWithPlan>(auth_user_opt) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    match order_service::create_order(&app_state.db, auth_user.id, req.plan_id).await {
        Ok((order, plan)) => (
            StatusCode::OK,
            ApiResponse::success_with_message(OrderWithPlan { order, plan }, "订单创建成功"),
        ),
        Err(e) => order_error(e),
    }
}

/// GET /api/orders - 我的订单列表，可按状态过滤
pub async fn list_orders(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
    Query(query): Query<PageQuery>,
) -> impl IntoResponse {
    let auth_user = match require_user::<PageData<order::Model>>(auth_user_opt) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => match OrderStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    ApiResponse::error(format!("无效的订单状态: {}", raw)),
                )
            }
        },
        None => None,
    };

    match order_service::list_user_orders(
        &app_state.db,
        auth_user.id,
        status,
        query.page,
        query.page_size,
    )
    .await
    {
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

/// GET /api/orders/{id}
pub async fn get_order(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let auth_user = match require_user::<order::Model>(auth_user_opt) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    match order_service::find_user_order(&app_state.db, auth_user.id, id).await {
        Ok(order) => (StatusCode::OK, ApiResponse::success(order)),
        Err(e) => order_error(e),
    }
}

/// POST /api/orders/{id}/cancel
pub async fn cancel_order(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let auth_user = match require_user::<order::Model>(auth_user_opt) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    match order_service::cancel_order(&app_state.db, auth_user.id, id).await {
        Ok(order) => (
            StatusCode::OK,
            ApiResponse::success_with_message(order, "订单已取消"),
        ),
        Err(e) => order_error(e),
    }
}

/// POST /api/orders/{id}/pay - 模拟支付，直接履约
///
/// 只有配置 `payment.allow_simulated = true` 时开放。
pub async fn pay_order(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let auth_user = match require_user::<FulfillmentView>(auth_user_opt) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    if !app_state.config.payment.allow_simulated {
        tracing::warn!("模拟支付未开启，拒绝用户 {} 的订单 {}", auth_user.id, id);
        return (
            StatusCode::FORBIDDEN,
            ApiResponse::error("模拟支付未开启".to_string()),
        );
    }

    let order = match order_service::find_user_order(&app_state.db, auth_user.id, id).await {
        Ok(order) => order,
        Err(e) => return order_error(e),
    };
    match order.status {
        OrderStatus::Completed | OrderStatus::Paid => {
            return order_error(OrderError::AlreadyCompleted)
        }
        OrderStatus::Pending => {}
        status => return order_error(OrderError::InvalidTransition { from: status }),
    }

    fulfill_and_render(&app_state, order.id, "支付成功，订阅已开通").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::entity::Order;
    use crate::testing::{fixed_now, memory_db, seed_plan, seed_user, FakePanel};
    use sea_orm::EntityTrait;
    use std::sync::Arc;

    async fn pay_as_owner(allow_simulated: bool) -> (StatusCode, OrderStatus, usize) {
        let db = memory_db().await;
        let panel = Arc::new(FakePanel::new());
        let mut config = Config::default();
        config.payment.allow_simulated = allow_simulated;
        let app_state = AppState::new(
            db.clone(),
            config,
            "secret".to_string(),
            panel.clone(),
            Arc::new(ManualClock::new(fixed_now())),
        );

        let user = seed_user(&db, "a@example.com").await;
        let plan = seed_plan(&db, 130, "1month", true).await;
        let (order, _) = order_service::create_order(&db, user.id, plan.id).await.unwrap();
        let auth_user = AuthUser {
            id: user.id,
            email: user.email.clone(),
            is_admin: false,
        };

        let resp = pay_order(Extension(app_state), Extension(Some(auth_user)), Path(order.id))
            .await
            .into_response();
        let reloaded = Order::find_by_id(order.id).one(&db).await.unwrap().unwrap();
        (resp.status(), reloaded.status, panel.provision_calls().len())
    }

    #[tokio::test]
    async fn test_simulated_pay_disabled_by_default() {
        let (status, order_status, provisioned) = pay_as_owner(false).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(order_status, OrderStatus::Pending);
        assert_eq!(provisioned, 0);
    }

    #[tokio::test]
    async fn test_simulated_pay_when_enabled() {
        let (status, order_status, provisioned) = pay_as_owner(true).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(order_status, OrderStatus::Completed);
        assert_eq!(provisioned, 1);
    }
}
