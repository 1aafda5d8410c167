use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::Deserialize;

use crate::{
    entity::{plan, Plan},
    middleware::AuthUser,
    AppState,
};

use super::{db_error, require_admin, ApiResponse};

/// 支持的套餐周期
pub const PLAN_PERIODS: [&str; 5] = ["onetime", "1month", "3month", "6month", "1year"];

#[derive(Deserialize)]
pub struct CreatePlanRequest {
    pub name: String,
    pub traffic_gb: i32,
    pub price: f64,
    pub period: String,
    pub is_active: Option<bool>,
    pub sort_order: Option<i32>,
}

#[derive(Deserialize)]
pub struct UpdatePlanRequest {
    pub name: Option<String>,
    pub traffic_gb: Option<i32>,
    pub price: Option<f64>,
    pub period: Option<String>,
    pub is_active: Option<bool>,
    pub sort_order: Option<i32>,
}

fn validate_plan(traffic_gb: i32, price: f64, period: &str) -> Result<(), String> {
    if traffic_gb <= 0 {
        return Err("流量必须大于 0".to_string());
    }
    if price < 0.0 || !price.is_finite() {
        return Err("价格无效".to_string());
    }
    if !PLAN_PERIODS.contains(&period) {
        return Err(format!("无效的套餐周期: {}", period));
    }
    Ok(())
}

/// GET /api/plans - 上架中的套餐
pub async fn list_plans(Extension(app_state): Extension<AppState>) -> impl IntoResponse {
    match Plan::find()
        .filter(plan::Column::IsActive.eq(true))
        .order_by_asc(plan::Column::SortOrder)
        .order_by_asc(plan::Column::Id)
        .all(&app_state.db)
        .await
    {
        Ok(plans) => (StatusCode::OK, ApiResponse::success(plans)),
        Err(e) => db_error("获取套餐列表失败", e),
    }
}

/// POST /api/admin/plans - 创建套餐（管理员）
pub async fn create_plan(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
    Json(req): Json<CreatePlanRequest>,
) -> impl IntoResponse {
    if let Err(resp) = require_admin::<plan::Model>(auth_user_opt) {
        return resp;
    }

    if let Err(msg) = validate_plan(req.traffic_gb, req.price, &req.period) {
        return (StatusCode::BAD_REQUEST, ApiResponse::error(msg));
    }

    let now = Utc::now().naive_utc();
    let created = plan::ActiveModel {
        name: Set(req.name),
        traffic_gb: Set(req.traffic_gb),
        price: Set(req.price),
        period: Set(req.period),
        is_active: Set(req.is_active.unwrap_or(true)),
        sort_order: Set(req.sort_order.unwrap_or(0)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&app_state.db)
    .await;

    match created {
        Ok(plan) => {
            tracing::info!("创建套餐: {} ({}GB / {})", plan.name, plan.traffic_gb, plan.period);
            (StatusCode::CREATED, ApiResponse::success(plan))
        }
        Err(e) => db_error("创建套餐失败", e),
    }
}

/// PUT /api/admin/plans/{id} - 更新套餐（管理员）
///
/// 修改不会影响已有订单，订单在创建时已快照金额与周期。
pub async fn update_plan(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdatePlanRequest>,
) -> impl IntoResponse {
    if let Err(resp) = require_admin::<plan::Model>(auth_user_opt) {
        return resp;
    }

    let existing = match Plan::find_by_id(id).one(&app_state.db).await {
        Ok(Some(plan)) => plan,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                ApiResponse::error("套餐不存在".to_string()),
            )
        }
        Err(e) => return db_error("获取套餐失败", e),
    };

    let traffic_gb = req.traffic_gb.unwrap_or(existing.traffic_gb);
    let price = req.price.unwrap_or(existing.price);
    let period = req.period.clone().unwrap_or_else(|| existing.period.clone());
    if let Err(msg) = validate_plan(traffic_gb, price, &period) {
        return (StatusCode::BAD_REQUEST, ApiResponse::error(msg));
    }

    let mut active: plan::ActiveModel = existing.into();
    if let Some(name) = req.name {
        active.name = Set(name);
    }
    active.traffic_gb = Set(traffic_gb);
    active.price = Set(price);
    active.period = Set(period);
    if let Some(is_active) = req.is_active {
        active.is_active = Set(is_active);
    }
    if let Some(sort_order) = req.sort_order {
        active.sort_order = Set(sort_order);
    }
    active.updated_at = Set(Utc::now().naive_utc());

    match active.update(&app_state.db).await {
        Ok(plan) => (StatusCode::OK, ApiResponse::success(plan)),
        Err(e) => db_error("更新套餐失败", e),
    }
}
