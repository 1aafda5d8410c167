//! 订单状态机
//!
//! `pending → verifying → paid → completed`，`pending → cancelled`，
//! 审核拒绝时 `verifying → pending`。`paid → completed` 只由履约引擎推进，
//! 见 [`crate::fulfillment`]。

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tracing::info;

use crate::entity::{order, plan, Order, OrderStatus, Plan};
use crate::error::OrderError;

/// 支持人工审核的支付方式
pub const PAYMENT_METHODS: [&str; 2] = ["alipay", "wechat"];

/// 订单号：时间戳 + 8 位大写十六进制
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: [u8; 4] = rand::random();
    let hex: String = suffix.iter().map(|b| format!("{:02X}", b)).collect();
    format!("{}{}", now.format("%Y%m%d%H%M%S"), hex)
}

/// 创建订单
///
/// 同一用户对同一套餐已有待支付订单时直接返回该订单。
/// 金额与周期在此刻从套餐快照，之后不再重算。
pub async fn create_order(
    db: &DatabaseConnection,
    user_id: i64,
    plan_id: i64,
) -> Result<(order::Model, plan::Model), OrderError> {
    let plan = Plan::find_by_id(plan_id)
        .one(db)
        .await?
        .ok_or(OrderError::PlanNotFound)?;
    if !plan.is_active {
        return Err(OrderError::PlanInactive);
    }

    let existing = Order::find()
        .filter(order::Column::UserId.eq(user_id))
        .filter(order::Column::PlanId.eq(plan.id))
        .filter(order::Column::Status.eq(OrderStatus::Pending))
        .one(db)
        .await?;
    if let Some(existing) = existing {
        return Ok((existing, plan));
    }

    let now = Utc::now();
    let created = order::ActiveModel {
        order_number: Set(generate_order_number(now)),
        user_id: Set(user_id),
        plan_id: Set(plan.id),
        amount: Set(plan.price),
        status: Set(OrderStatus::Pending),
        period: Set(plan.period.clone()),
        paid_at: Set(None),
        transaction_id: Set(None),
        payment_method: Set(None),
        remark: Set(None),
        created_at: Set(now.naive_utc()),
        updated_at: Set(now.naive_utc()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!("创建订单: {} (user_id={}, plan_id={})", created.order_number, user_id, plan.id);
    Ok((created, plan))
}

/// 提交支付凭证，订单进入待审核
pub async fn submit_payment_proof(
    db: &DatabaseConnection,
    user_id: i64,
    order_id: i64,
    payment_method: &str,
    transaction_id: Option<String>,
    remark: Option<String>,
) -> Result<order::Model, OrderError> {
    if !PAYMENT_METHODS.contains(&payment_method) {
        return Err(OrderError::InvalidPaymentMethod(payment_method.to_string()));
    }

    let txn = db.begin().await?;
    let current = find_user_order(&txn, user_id, order_id).await?;

    match current.status {
        OrderStatus::Completed => return Err(OrderError::AlreadyCompleted),
        status if !status.can_transition_to(OrderStatus::Verifying) => {
            return Err(OrderError::InvalidTransition { from: status });
        }
        _ => {}
    }

    let mut active: order::ActiveModel = current.into();
    active.status = Set(OrderStatus::Verifying);
    active.payment_method = Set(Some(payment_method.to_string()));
    active.transaction_id = Set(transaction_id);
    active.remark = Set(remark);
    active.updated_at = Set(Utc::now().naive_utc());
    let updated = active.update(&txn).await?;
    txn.commit().await?;

    info!("订单 {} 已提交支付凭证，等待审核", updated.order_number);
    Ok(updated)
}

/// 审核拒绝，订单回到待支付
pub async fn reject_payment(
    db: &DatabaseConnection,
    order_id: i64,
    reason: Option<String>,
) -> Result<order::Model, OrderError> {
    let result = Order::update_many()
        .col_expr(order::Column::Status, Expr::value(OrderStatus::Pending))
        .col_expr(order::Column::Remark, Expr::value(reason))
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now().naive_utc()))
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Status.eq(OrderStatus::Verifying))
        .exec(db)
        .await?;

    let current = Order::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or(OrderError::OrderNotFound)?;

    if result.rows_affected == 0 {
        return Err(OrderError::InvalidTransition {
            from: current.status,
        });
    }

    info!("订单 {} 审核未通过", current.order_number);
    Ok(current)
}

/// 取消待支付订单
pub async fn cancel_order(
    db: &DatabaseConnection,
    user_id: i64,
    order_id: i64,
) -> Result<order::Model, OrderError> {
    let result = Order::update_many()
        .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now().naive_utc()))
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::UserId.eq(user_id))
        .filter(order::Column::Status.eq(OrderStatus::Pending))
        .exec(db)
        .await?;

    let current = find_user_order(db, user_id, order_id).await?;
    if result.rows_affected == 0 {
        return Err(OrderError::InvalidTransition {
            from: current.status,
        });
    }

    info!("订单 {} 已取消", current.order_number);
    Ok(current)
}

/// 查询用户自己的订单
pub async fn find_user_order<C>(db: &C, user_id: i64, order_id: i64) -> Result<order::Model, OrderError>
where
    C: sea_orm::ConnectionTrait,
{
    Order::find_by_id(order_id)
        .filter(order::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or(OrderError::OrderNotFound)
}

pub async fn find_by_order_number(
    db: &DatabaseConnection,
    order_number: &str,
) -> Result<order::Model, OrderError> {
    Order::find()
        .filter(order::Column::OrderNumber.eq(order_number))
        .one(db)
        .await?
        .ok_or(OrderError::OrderNotFound)
}

/// 分页查询用户订单，返回 (订单, 总数)
pub async fn list_user_orders(
    db: &DatabaseConnection,
    user_id: i64,
    status: Option<OrderStatus>,
    page: u64,
    page_size: u64,
) -> Result<(Vec<order::Model>, u64), OrderError> {
    let mut query = Order::find().filter(order::Column::UserId.eq(user_id));
    if let Some(status) = status {
        query = query.filter(order::Column::Status.eq(status));
    }

    let paginator = query
        .order_by_desc(order::Column::CreatedAt)
        .order_by_desc(order::Column::Id)
        .paginate(db, page_size.max(1));
    let total = paginator.num_items().await?;
    let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
    Ok((orders, total))
}

/// 待审核列表（待支付与待审核）
pub async fn list_reviewable_orders(
    db: &DatabaseConnection,
    page: u64,
    page_size: u64,
) -> Result<(Vec<order::Model>, u64), OrderError> {
    let paginator = Order::find()
        .filter(order::Column::Status.is_in([OrderStatus::Pending, OrderStatus::Verifying]))
        .order_by_desc(order::Column::CreatedAt)
        .order_by_desc(order::Column::Id)
        .paginate(db, page_size.max(1));
    let total = paginator.num_items().await?;
    let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
    Ok((orders, total))
}
