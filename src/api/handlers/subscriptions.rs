use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Duration;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};

use crate::{
    entity::{plan, subscription, traffic_log, Plan, Subscription, TrafficLog},
    middleware::AuthUser,
    traffic::bytes_to_gb,
    AppState,
};

use super::payment::render_links;
use super::{db_error, require_user, ApiResponse};

const DEFAULT_TRAFFIC_DAYS: i64 = 30;

#[derive(Serialize)]
pub struct ConnectionInfo {
    pub server: String,
    pub port: u16,
    pub protocol: &'static str,
    pub uuid: Option<String>,
    pub email: Option<String>,
}

#[derive(Serialize)]
pub struct ActiveSubscription {
    pub subscription: subscription::Model,
    pub plan: Option<plan::Model>,
    pub subscription_url: String,
    pub direct_url: Option<String>,
    pub connection_info: ConnectionInfo,
}

#[derive(Deserialize)]
pub struct TrafficQuery {
    pub days: Option<i64>,
}

#[derive(Serialize)]
pub struct TrafficRecord {
    pub id: i64,
    pub upload_gb: f64,
    pub download_gb: f64,
    pub total_gb: f64,
    pub rate_multiplier: f64,
    pub recorded_at: chrono::NaiveDate,
}

impl From<traffic_log::Model> for TrafficRecord {
    fn from(log: traffic_log::Model) -> Self {
        Self {
            id: log.id,
            upload_gb: bytes_to_gb(log.upload_bytes),
            download_gb: bytes_to_gb(log.download_bytes),
            total_gb: bytes_to_gb(log.total_bytes),
            rate_multiplier: log.rate_multiplier,
            recorded_at: log.recorded_at,
        }
    }
}

/// GET /api/subscriptions - 我的订阅
pub async fn list_subscriptions(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
) -> impl IntoResponse {
    let auth_user = match require_user::<Vec<subscription::Model>>(auth_user_opt) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    match Subscription::find()
        .filter(subscription::Column::UserId.eq(auth_user.id))
        .order_by_desc(subscription::Column::CreatedAt)
        .order_by_desc(subscription::Column::Id)
        .all(&app_state.db)
        .await
    {
        Ok(subs) => (StatusCode::OK, ApiResponse::success(subs)),
        Err(e) => db_error("获取订阅列表失败", e),
    }
}

/// GET /api/subscriptions/active - 当前有效订阅与连接信息
pub async fn get_active_subscription(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
) -> impl IntoResponse {
    let auth_user = match require_user::<ActiveSubscription>(auth_user_opt) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    let sub = match Subscription::find()
        .filter(subscription::Column::UserId.eq(auth_user.id))
        .filter(subscription::Column::IsActive.eq(true))
        .order_by_desc(subscription::Column::CreatedAt)
        .one(&app_state.db)
        .await
    {
        Ok(Some(sub)) => sub,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                ApiResponse::error("订阅不存在".to_string()),
            )
        }
        Err(e) => return db_error("获取订阅失败", e),
    };

    if sub.is_expired(app_state.clock.now().naive_utc()) {
        return (
            StatusCode::BAD_REQUEST,
            ApiResponse::error("订阅已过期".to_string()),
        );
    }

    let plan = match Plan::find_by_id(sub.plan_id).one(&app_state.db).await {
        Ok(plan) => plan,
        Err(e) => return db_error("获取套餐失败", e),
    };

    let (subscription_url, direct_url) = render_links(&app_state, &sub).await;
    let panel = &app_state.config.panel;
    let connection_info = ConnectionInfo {
        server: panel.connect_host(),
        port: panel.public_port,
        protocol: "vless",
        uuid: sub.identity_uuid.clone(),
        email: sub.identity_email.clone(),
    };

    (
        StatusCode::OK,
        ApiResponse::success(ActiveSubscription {
            subscription: sub,
            plan,
            subscription_url,
            direct_url,
            connection_info,
        }),
    )
}

/// GET /api/subscriptions/{id}/traffic?days=30 - 每日流量记录
pub async fn get_subscription_traffic(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
    Path(id): Path<i64>,
    Query(query): Query<TrafficQuery>,
) -> impl IntoResponse {
    let auth_user = match require_user::<Vec<TrafficRecord>>(auth_user_opt) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    match Subscription::find_by_id(id)
        .filter(subscription::Column::UserId.eq(auth_user.id))
        .one(&app_state.db)
        .await
    {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                ApiResponse::error("订阅不存在".to_string()),
            )
        }
        Err(e) => return db_error("获取订阅失败", e),
    }

    let days = query.days.unwrap_or(DEFAULT_TRAFFIC_DAYS).clamp(1, 366);
    let since = (app_state.clock.now() - Duration::days(days)).date_naive();

    match TrafficLog::find()
        .filter(traffic_log::Column::SubscriptionId.eq(id))
        .filter(traffic_log::Column::RecordedAt.gte(since))
        .order_by_desc(traffic_log::Column::RecordedAt)
        .all(&app_state.db)
        .await
    {
        Ok(logs) => (
            StatusCode::OK,
            ApiResponse::success(logs.into_iter().map(TrafficRecord::from).collect::<Vec<_>>()),
        ),
        Err(e) => db_error("获取流量记录失败", e),
    }
}
