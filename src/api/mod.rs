use axum::middleware::from_fn;
use axum::routing::{get, post, put};
use axum::{Extension, Router};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::middleware::auth_middleware;
use crate::AppState;

pub mod handlers;

/// 构建路由
pub fn router(app_state: AppState) -> Router {
    let api_routes = Router::new()
        // 公开路由（无需认证）
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/plans", get(handlers::list_plans))
        .route("/payment/gateway-callback", post(handlers::gateway_callback))
        // 认证路由（需要登录）
        .route("/auth/me", get(handlers::me))
        .route("/orders", get(handlers::list_orders).post(handlers::create_order))
        .route("/orders/{id}", get(handlers::get_order))
        .route("/orders/{id}/cancel", post(handlers::cancel_order))
        .route("/orders/{id}/pay", post(handlers::pay_order))
        .route("/payment/submit-proof", post(handlers::submit_payment_proof))
        .route("/payment/status/{order_id}", get(handlers::get_payment_status))
        .route("/payment/gateway-pay/{order_id}", post(handlers::gateway_pay))
        .route("/subscriptions", get(handlers::list_subscriptions))
        .route("/subscriptions/active", get(handlers::get_active_subscription))
        .route("/subscriptions/{id}/traffic", get(handlers::get_subscription_traffic))
        // 管理员路由
        .route("/admin/plans", post(handlers::create_plan))
        .route("/admin/plans/{id}", put(handlers::update_plan))
        .route("/admin/orders/pending", get(handlers::list_pending_orders))
        .route("/admin/orders/{id}/approve", post(handlers::approve_order))
        .route("/admin/orders/{id}/reject", post(handlers::reject_order))
        .route("/admin/subscriptions/{id}/revoke", post(handlers::revoke_subscription))
        .route("/admin/jobs/traffic-sync", post(handlers::run_traffic_sync))
        .route("/admin/jobs/expiry-sweep", post(handlers::run_expiry_sweep))
        .layer(from_fn(auth_middleware))
        .layer(Extension(app_state.clone()));

    let sub_route = format!(
        "{}/{{token}}",
        app_state.config.subscription.path.trim_end_matches('/')
    );
    let download_routes = Router::new()
        .route(&sub_route, get(handlers::download_subscription))
        .layer(Extension(app_state));

    Router::new()
        .nest("/api", api_routes)
        .merge(download_routes)
        .layer(CorsLayer::permissive())
}

/// 启动 Web API 服务
pub fn start_web_server(app_state: AppState) -> tokio::task::JoinHandle<()> {
    let web_port = app_state.config.web_port;

    tokio::spawn(async move {
        let app = router(app_state);

        let web_addr = format!("0.0.0.0:{}", web_port);
        match tokio::net::TcpListener::bind(web_addr.clone()).await {
            Ok(listener) => {
                info!("🌐 Web API: http://{}", web_addr);
                if let Err(err) = axum::serve(listener, app).await {
                    tracing::error!("Web服务错误：{}", err);
                }
            }
            Err(err) => {
                tracing::error!("Web服务启动失败：{}", err);
            }
        }
    })
}
