use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::{
    entity::{order, subscription, Order, Plan},
    error::OrderError,
    middleware::AuthUser,
    orders,
    panel::links::{direct_connection_url, subscription_url},
    AppState,
};

use super::{order_error, require_user, ApiReply, ApiResponse};

/// 履约后返回给前端的订阅信息
#[derive(Serialize)]
pub struct FulfillmentView {
    pub order: order::Model,
    pub subscription: Option<subscription::Model>,
    pub subscription_url: Option<String>,
    pub direct_url: Option<String>,
}

/// 订阅链接与直连链接，直连链接需要身份已在面板开通
pub(crate) async fn render_links(
    app_state: &AppState,
    sub: &subscription::Model,
) -> (String, Option<String>) {
    let config = &app_state.config;
    let sub_url = subscription_url(
        &config.subscription.base_url,
        &config.subscription.path,
        &sub.token,
    );

    let Some(uuid) = sub.identity_uuid.as_deref() else {
        return (sub_url, None);
    };
    let settings = app_state.settings_cache.get(config.panel.inbound_id).await;
    let direct = direct_connection_url(
        uuid,
        &config.panel.connect_host(),
        config.panel.public_port,
        sub.identity_email.as_deref().unwrap_or_default(),
        Some(settings.security.as_str()),
    );
    (sub_url, Some(direct))
}

/// 履约订单并组装响应，已完成的订单原样返回
pub(crate) async fn fulfill_and_render(
    app_state: &AppState,
    order_id: i64,
    message: &str,
) -> ApiReply<FulfillmentView> {
    match app_state.fulfillment.fulfill(order_id).await {
        Ok(Some(done)) => {
            let (sub_url, direct) = render_links(app_state, &done.subscription).await;
            let message = if done.identity.is_none() {
                format!("{}，面板开通失败，请联系管理员", message)
            } else {
                message.to_string()
            };
            (
                StatusCode::OK,
                ApiResponse::success_with_message(
                    FulfillmentView {
                        order: done.order,
                        subscription: Some(done.subscription),
                        subscription_url: Some(sub_url),
                        direct_url: direct,
                    },
                    message,
                ),
            )
        }
        Ok(None) => match Order::find_by_id(order_id).one(&app_state.db).await {
            Ok(Some(order)) => (
                StatusCode::OK,
                ApiResponse::success_with_message(
                    FulfillmentView {
                        order,
                        subscription: None,
                        subscription_url: None,
                        direct_url: None,
                    },
                    "订单已处理",
                ),
            ),
            Ok(None) => order_error(OrderError::OrderNotFound),
            Err(e) => order_error(e.into()),
        },
        Err(e) => order_error(e),
    }
}

#[derive(Deserialize)]
pub struct PaymentProofRequest {
    pub order_id: i64,
    pub payment_method: String,
    pub transaction_id: Option<String>,
    pub remark: Option<String>,
}

#[derive(Serialize)]
pub struct PaymentStatus {
    pub order_id: i64,
    pub order_number: String,
    pub status: crate::entity::OrderStatus,
    pub status_text: String,
    pub amount: f64,
    pub paid_at: Option<chrono::NaiveDateTime>,
}

/// POST /api/payment/submit-proof - 提交支付凭证
pub async fn submit_payment_proof(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
    Json(req): Json<PaymentProofRequest>,
) -> impl IntoResponse {
    let auth_user = match require_user::<order::Model>(auth_user_opt) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    match orders::submit_payment_proof(
        &app_state.db,
        auth_user.id,
        req.order_id,
        &req.payment_method,
        req.transaction_id,
        req.remark,
    )
    .await
    {
        Ok(order) => (
            StatusCode::OK,
            ApiResponse::success_with_message(order, "支付凭证已提交，等待管理员审核"),
        ),
        Err(e) => order_error(e),
    }
}

/// GET /api/payment/status/{order_id} - 查询支付状态
pub async fn get_payment_status(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
    Path(order_id): Path<i64>,
) -> impl IntoResponse {
    let auth_user = match require_user::<PaymentStatus>(auth_user_opt) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    match orders::find_user_order(&app_state.db, auth_user.id, order_id).await {
        Ok(order) => (
            StatusCode::OK,
            ApiResponse::success(PaymentStatus {
                order_id: order.id,
                order_number: order.order_number,
                status: order.status,
                status_text: order.status.label().to_string(),
                amount: order.amount,
                paid_at: order.paid_at,
            }),
        ),
        Err(e) => order_error(e),
    }
}

/// POST /api/payment/gateway-pay/{order_id} - 通过支付网关下单
///
/// 请求原样转发到配置的网关地址，返回网关的响应。
pub async fn gateway_pay(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
    Path(order_id): Path<i64>,
) -> impl IntoResponse {
    let auth_user = match require_user::<Value>(auth_user_opt) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    let Some(gateway_url) = app_state.config.payment.gateway_url.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            ApiResponse::error("未配置支付网关".to_string()),
        );
    };

    let order = match orders::find_user_order(&app_state.db, auth_user.id, order_id).await {
        Ok(order) => order,
        Err(e) => return order_error(e),
    };
    if order.status.is_terminal() {
        return order_error(OrderError::InvalidTransition { from: order.status });
    }

    let plan_name = match Plan::find_by_id(order.plan_id).one(&app_state.db).await {
        Ok(plan) => plan.map(|p| p.name).unwrap_or_else(|| "VPN订阅".to_string()),
        Err(e) => return order_error(e.into()),
    };

    let resp = app_state
        .http
        .post(&gateway_url)
        .json(&serde_json::json!({
            "orderId": order.order_number,
            "amount": order.amount,
            "planId": plan_name,
        }))
        .send()
        .await;

    let body = match resp {
        Ok(resp) => resp.json::<Value>().await,
        Err(e) => Err(e),
    };

    match body {
        Ok(body) => (StatusCode::OK, ApiResponse::success(body)),
        Err(e) => {
            error!("支付网关请求失败: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                ApiResponse::error(format!("支付网关连接失败: {}", e)),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GatewayCallback {
    pub trade_order_id: Option<String>,
    pub status: Option<String>,
}

/// POST /api/payment/gateway-callback - 支付网关回调
///
/// 网关要求回复纯文本 `success` 或 `error`。
pub async fn gateway_callback(
    Extension(app_state): Extension<AppState>,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let Ok(callback) = serde_json::from_slice::<GatewayCallback>(&body) else {
        warn!("支付回调格式无效");
        return "error";
    };

    let (Some(order_number), Some(status)) = (callback.trade_order_id, callback.status) else {
        return "error";
    };

    if !app_state.config.payment.success_statuses.contains(&status) {
        info!("支付回调状态未成功: {} -> {}", order_number, status);
        return "error";
    }

    let order = match orders::find_by_order_number(&app_state.db, &order_number).await {
        Ok(order) => order,
        Err(e) => {
            warn!("支付回调订单无效: {}, {}", order_number, e);
            return "error";
        }
    };

    match app_state.fulfillment.fulfill(order.id).await {
        Ok(Some(_)) => {
            info!("支付回调完成订单: {}", order_number);
            "success"
        }
        Ok(None) => "success",
        Err(e) => {
            error!("支付回调履约失败: {}, {}", order_number, e);
            "error"
        }
    }
}
