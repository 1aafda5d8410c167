//! 订单履约
//!
//! 把已付款的订单转换为一个有效订阅，并在面板上开通对应身份。
//! 面板开通先于本地事务；认领订单、写入订阅、停用旧订阅、完成订单
//! 在同一个短事务中提交，事务期间不会等待面板。

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::entity::{order, plan, subscription, user, Order, OrderStatus, Plan, Subscription, User};
use crate::error::OrderError;
use crate::panel::{PanelApi, ProvisionedIdentity};

/// 履约结果
#[derive(Debug, Clone)]
pub struct FulfilledOrder {
    pub order: order::Model,
    pub subscription: subscription::Model,
    /// 面板开通失败时为 None
    pub identity: Option<ProvisionedIdentity>,
}

/// 套餐周期对应的有效天数，`onetime` 不限时，未知周期按 30 天
pub fn expiry_days(period: &str) -> Option<i64> {
    match period {
        "onetime" => None,
        "1month" => Some(30),
        "3month" => Some(90),
        "6month" => Some(180),
        "1year" => Some(365),
        _ => Some(30),
    }
}

/// 面板上的身份标识 `user_{user_id}_{毫秒时间戳}`
pub fn identity_key(user_id: i64, now: DateTime<Utc>) -> String {
    format!("user_{}_{}", user_id, now.timestamp_millis())
}

/// 订阅令牌：32 字节随机数的十六进制
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct FulfillmentEngine {
    db: DatabaseConnection,
    panel: Arc<dyn PanelApi>,
    clock: Arc<dyn Clock>,
    inbound_id: i64,
}

impl FulfillmentEngine {
    pub fn new(
        db: DatabaseConnection,
        panel: Arc<dyn PanelApi>,
        clock: Arc<dyn Clock>,
        inbound_id: i64,
    ) -> Self {
        Self {
            db,
            panel,
            clock,
            inbound_id,
        }
    }

    /// 履约订单
    ///
    /// 订单已完成时返回 `Ok(None)`，重复调用不会产生第二个订阅。
    /// 面板开通在事务之外进行，事务只包含认领与落库；
    /// 认领失败的一方会回收自己开通的身份。
    pub async fn fulfill(&self, order_id: i64) -> Result<Option<FulfilledOrder>, OrderError> {
        let current = Order::find_by_id(order_id)
            .one(&self.db)
            .await?
            .ok_or(OrderError::OrderNotFound)?;
        match current.status {
            OrderStatus::Completed => return Ok(None),
            OrderStatus::Pending | OrderStatus::Verifying => {}
            from => return Err(OrderError::InvalidTransition { from }),
        }

        let plan = Plan::find_by_id(current.plan_id)
            .one(&self.db)
            .await?
            .ok_or(OrderError::PlanNotFound)?;
        if !plan.is_active {
            return Err(OrderError::PlanInactive);
        }

        let user = User::find_by_id(current.user_id)
            .one(&self.db)
            .await?
            .ok_or(OrderError::UserNotFound)?;

        let now = self.clock.now();
        let now_naive = now.naive_utc();
        let expires_at = expiry_days(&plan.period).map(|d| now + Duration::days(d));
        let email_key = identity_key(user.id, now);

        let identity = match self
            .panel
            .provision_identity(self.inbound_id, &email_key, plan.traffic_gb as i64, expires_at)
            .await
        {
            Ok(identity) => Some(identity),
            Err(e) => {
                error!("面板开通失败，订单 {} 继续完成: {}", current.order_number, e);
                None
            }
        };

        let outcome = self
            .commit_fulfillment(&current, &plan, &user, identity.as_ref(), expires_at, now_naive)
            .await;

        match outcome {
            Ok(Some((order, subscription))) => {
                info!(
                    "订单 {} 履约完成: subscription_id={}, user_id={}",
                    order.order_number, subscription.id, user.id
                );
                Ok(Some(FulfilledOrder {
                    order,
                    subscription,
                    identity,
                }))
            }
            Ok(None) => {
                info!("订单 {} 已由其他请求履约", current.order_number);
                if let Some(identity) = identity.as_ref() {
                    self.compensate(identity).await;
                }
                Ok(None)
            }
            Err(e) => {
                error!("订单 {} 履约失败: {}", current.order_number, e);
                if let Some(identity) = identity.as_ref() {
                    self.compensate(identity).await;
                }
                Err(e)
            }
        }
    }

    /// 认领订单并落库
    ///
    /// 认领是事务中的第一条语句，并发履约时只有一方能成功；
    /// 订单已被他人完成时返回 `Ok(None)`。
    async fn commit_fulfillment(
        &self,
        current: &order::Model,
        plan: &plan::Model,
        user: &user::Model,
        identity: Option<&ProvisionedIdentity>,
        expires_at: Option<DateTime<Utc>>,
        now: NaiveDateTime,
    ) -> Result<Option<(order::Model, subscription::Model)>, OrderError> {
        let txn = self.db.begin().await?;

        let claimed = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Paid))
            .col_expr(order::Column::PaidAt, Expr::value(Some(now)))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(current.id))
            .filter(order::Column::Status.is_in([OrderStatus::Pending, OrderStatus::Verifying]))
            .exec(&txn)
            .await;

        let claimed = match claimed {
            Ok(claimed) => claimed,
            Err(e) => {
                rollback(txn).await;
                return Err(e.into());
            }
        };

        if claimed.rows_affected == 0 {
            rollback(txn).await;
            let latest = Order::find_by_id(current.id)
                .one(&self.db)
                .await?
                .ok_or(OrderError::OrderNotFound)?;
            return match latest.status {
                OrderStatus::Completed => Ok(None),
                from => Err(OrderError::InvalidTransition { from }),
            };
        }

        let expires_at = expires_at.map(|t| t.naive_utc());
        match self
            .persist(&txn, current, plan, user, identity, expires_at, now)
            .await
        {
            Ok(done) => {
                txn.commit().await?;
                Ok(Some(done))
            }
            Err(e) => {
                rollback(txn).await;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist(
        &self,
        txn: &DatabaseTransaction,
        current: &order::Model,
        plan: &plan::Model,
        user: &user::Model,
        identity: Option<&ProvisionedIdentity>,
        expires_at: Option<NaiveDateTime>,
        now: NaiveDateTime,
    ) -> Result<(order::Model, subscription::Model), OrderError> {
        let created = subscription::ActiveModel {
            user_id: Set(user.id),
            plan_id: Set(plan.id),
            order_id: Set(current.id),
            token: Set(generate_token()),
            identity_email: Set(identity.map(|i| i.email.clone())),
            identity_uuid: Set(identity.map(|i| i.identity_id.clone())),
            traffic_total_gb: Set(plan.traffic_gb),
            traffic_used_gb: Set(0.0),
            traffic_remaining_gb: Set(plan.traffic_gb as f64),
            expires_at: Set(expires_at),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(txn)
        .await?;

        // 每个用户最多一个有效订阅
        Subscription::update_many()
            .col_expr(subscription::Column::IsActive, Expr::value(false))
            .col_expr(subscription::Column::UpdatedAt, Expr::value(now))
            .filter(subscription::Column::UserId.eq(user.id))
            .filter(subscription::Column::Id.ne(created.id))
            .filter(subscription::Column::IsActive.eq(true))
            .exec(txn)
            .await?;

        let mut completed: order::ActiveModel = current.clone().into();
        completed.status = Set(OrderStatus::Completed);
        completed.paid_at = Set(Some(now));
        completed.updated_at = Set(now);
        let completed = completed.update(txn).await?;

        Ok((completed, created))
    }

    /// 吊销订阅
    ///
    /// 先删除面板上的身份，删除失败时本地记录保持不变。
    /// 没有面板身份的订阅只停用本地记录。
    pub async fn revoke(&self, subscription_id: i64) -> Result<subscription::Model, OrderError> {
        let sub = Subscription::find_by_id(subscription_id)
            .one(&self.db)
            .await?
            .ok_or(OrderError::SubscriptionNotFound)?;

        match sub.identity_email.as_deref() {
            Some(email) => {
                self.panel.deprovision_identity(self.inbound_id, email).await?;
            }
            None => warn!("订阅 {} 没有面板身份，仅停用本地记录", sub.id),
        }

        let mut active: subscription::ActiveModel = sub.into();
        active.is_active = Set(false);
        active.updated_at = Set(self.clock.now().naive_utc());
        let revoked = active.update(&self.db).await?;

        info!("订阅 {} 已吊销", revoked.id);
        Ok(revoked)
    }

    /// 本地提交失败后尽力删除已开通的面板身份
    async fn compensate(&self, identity: &ProvisionedIdentity) {
        match self
            .panel
            .deprovision_identity(self.inbound_id, &identity.email)
            .await
        {
            Ok(()) => info!("已回收面板身份: {}", identity.email),
            Err(e) => warn!("回收面板身份失败，需要人工清理: {}, 错误: {}", identity.email, e),
        }
    }
}

async fn rollback(txn: DatabaseTransaction) {
    if let Err(e) = txn.rollback().await {
        warn!("回滚履约事务失败: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::orders::create_order;
    use crate::testing::{file_db, fixed_now, memory_db, seed_plan, seed_user, FakePanel};
    use sea_orm::PaginatorTrait;
    use std::time::{Duration as StdDuration, Instant};

    struct Fixture {
        db: DatabaseConnection,
        panel: Arc<FakePanel>,
        clock: Arc<ManualClock>,
        engine: FulfillmentEngine,
    }

    async fn fixture() -> Fixture {
        let db = memory_db().await;
        let panel = Arc::new(FakePanel::new());
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let engine = FulfillmentEngine::new(db.clone(), panel.clone(), clock.clone(), 1);
        Fixture {
            db,
            panel,
            clock,
            engine,
        }
    }

    async fn active_count(db: &DatabaseConnection, user_id: i64) -> u64 {
        Subscription::find()
            .filter(subscription::Column::UserId.eq(user_id))
            .filter(subscription::Column::IsActive.eq(true))
            .count(db)
            .await
            .unwrap()
    }

    #[test]
    fn test_expiry_days() {
        assert_eq!(expiry_days("onetime"), None);
        assert_eq!(expiry_days("1month"), Some(30));
        assert_eq!(expiry_days("3month"), Some(90));
        assert_eq!(expiry_days("6month"), Some(180));
        assert_eq!(expiry_days("1year"), Some(365));
        assert_eq!(expiry_days("weekly"), Some(30));
    }

    #[test]
    fn test_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[tokio::test]
    async fn test_fulfill_monthly_plan() {
        let f = fixture().await;
        let user = seed_user(&f.db, "a@example.com").await;
        let plan = seed_plan(&f.db, 130, "1month", true).await;
        let (order, _) = create_order(&f.db, user.id, plan.id).await.unwrap();

        let done = f.engine.fulfill(order.id).await.unwrap().unwrap();
        let now = f.clock.now().naive_utc();

        assert_eq!(done.order.status, OrderStatus::Completed);
        assert_eq!(done.order.paid_at, Some(now));
        assert_eq!(done.subscription.traffic_total_gb, 130);
        assert_eq!(done.subscription.traffic_used_gb, 0.0);
        assert_eq!(done.subscription.traffic_remaining_gb, 130.0);
        assert_eq!(done.subscription.expires_at, Some(now + Duration::days(30)));
        assert!(done.subscription.is_active);

        let expected_key = identity_key(user.id, f.clock.now());
        assert_eq!(done.subscription.identity_email.as_deref(), Some(expected_key.as_str()));
        assert!(done.subscription.identity_uuid.is_some());

        let calls = f.panel.provision_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].traffic_gb, 130);
        assert_eq!(calls[0].expires_at, Some(f.clock.now() + Duration::days(30)));
        assert_eq!(
            calls[0].expires_at.map(|t| t.naive_utc()),
            done.subscription.expires_at
        );
    }

    #[tokio::test]
    async fn test_fulfill_is_idempotent() {
        let f = fixture().await;
        let user = seed_user(&f.db, "a@example.com").await;
        let plan = seed_plan(&f.db, 130, "1month", true).await;
        let (order, _) = create_order(&f.db, user.id, plan.id).await.unwrap();

        assert!(f.engine.fulfill(order.id).await.unwrap().is_some());
        assert!(f.engine.fulfill(order.id).await.unwrap().is_none());

        let subs = Subscription::find()
            .filter(subscription::Column::OrderId.eq(order.id))
            .count(&f.db)
            .await
            .unwrap();
        assert_eq!(subs, 1);
        assert_eq!(f.panel.provision_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_second_fulfillment_deactivates_previous() {
        let f = fixture().await;
        let user = seed_user(&f.db, "a@example.com").await;
        let monthly = seed_plan(&f.db, 130, "1month", true).await;
        let yearly = seed_plan(&f.db, 1000, "1year", true).await;

        let (first_order, _) = create_order(&f.db, user.id, monthly.id).await.unwrap();
        let first = f.engine.fulfill(first_order.id).await.unwrap().unwrap();

        f.clock.advance(Duration::days(3));
        let (second_order, _) = create_order(&f.db, user.id, yearly.id).await.unwrap();
        let second = f.engine.fulfill(second_order.id).await.unwrap().unwrap();

        let previous = Subscription::find_by_id(first.subscription.id)
            .one(&f.db)
            .await
            .unwrap()
            .unwrap();
        assert!(!previous.is_active);
        assert!(second.subscription.is_active);
        assert_eq!(active_count(&f.db, user.id).await, 1);
    }

    #[tokio::test]
    async fn test_provision_failure_still_completes() {
        let f = fixture().await;
        f.panel.fail_provision(true);
        let user = seed_user(&f.db, "a@example.com").await;
        let plan = seed_plan(&f.db, 130, "1month", true).await;
        let (order, _) = create_order(&f.db, user.id, plan.id).await.unwrap();

        let done = f.engine.fulfill(order.id).await.unwrap().unwrap();
        assert!(done.identity.is_none());
        assert!(done.subscription.identity_email.is_none());
        assert!(done.subscription.identity_uuid.is_none());
        assert!(done.subscription.is_active);
        assert_eq!(done.order.status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn test_onetime_plan_has_no_expiry() {
        let f = fixture().await;
        let user = seed_user(&f.db, "a@example.com").await;
        let plan = seed_plan(&f.db, 50, "onetime", true).await;
        let (order, _) = create_order(&f.db, user.id, plan.id).await.unwrap();

        let done = f.engine.fulfill(order.id).await.unwrap().unwrap();
        assert!(done.subscription.expires_at.is_none());
        assert_eq!(f.panel.provision_calls()[0].expires_at, None);
    }

    #[tokio::test]
    async fn test_inactive_plan_leaves_order_untouched() {
        let f = fixture().await;
        let user = seed_user(&f.db, "a@example.com").await;
        let plan = seed_plan(&f.db, 130, "1month", true).await;
        let (order, _) = create_order(&f.db, user.id, plan.id).await.unwrap();

        let mut deactivated: plan::ActiveModel = plan.into();
        deactivated.is_active = Set(false);
        deactivated.update(&f.db).await.unwrap();

        assert!(matches!(
            f.engine.fulfill(order.id).await,
            Err(OrderError::PlanInactive)
        ));

        let reloaded = Order::find_by_id(order.id).one(&f.db).await.unwrap().unwrap();
        assert_eq!(reloaded.status, OrderStatus::Pending);
        assert!(reloaded.paid_at.is_none());
        assert!(f.panel.provision_calls().is_empty());
        assert_eq!(active_count(&f.db, user.id).await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_order_rejected() {
        let f = fixture().await;
        let user = seed_user(&f.db, "a@example.com").await;
        let plan = seed_plan(&f.db, 130, "1month", true).await;
        let (order, _) = create_order(&f.db, user.id, plan.id).await.unwrap();
        crate::orders::cancel_order(&f.db, user.id, order.id).await.unwrap();

        assert!(matches!(
            f.engine.fulfill(order.id).await,
            Err(OrderError::InvalidTransition { from: OrderStatus::Cancelled })
        ));
        assert!(f.panel.provision_calls().is_empty());
        assert!(matches!(
            f.engine.fulfill(424242).await,
            Err(OrderError::OrderNotFound)
        ));
    }

    #[tokio::test]
    async fn test_verifying_order_can_be_fulfilled() {
        let f = fixture().await;
        let user = seed_user(&f.db, "a@example.com").await;
        let plan = seed_plan(&f.db, 130, "3month", true).await;
        let (order, _) = create_order(&f.db, user.id, plan.id).await.unwrap();
        crate::orders::submit_payment_proof(&f.db, user.id, order.id, "alipay", None, None)
            .await
            .unwrap();

        let done = f.engine.fulfill(order.id).await.unwrap().unwrap();
        let now = f.clock.now().naive_utc();
        assert_eq!(done.subscription.expires_at, Some(now + Duration::days(90)));
    }

    #[tokio::test]
    async fn test_revoke_deletes_remote_identity_first() {
        let f = fixture().await;
        let user = seed_user(&f.db, "a@example.com").await;
        let plan = seed_plan(&f.db, 130, "1month", true).await;
        let (order, _) = create_order(&f.db, user.id, plan.id).await.unwrap();
        let done = f.engine.fulfill(order.id).await.unwrap().unwrap();
        let email = done.subscription.identity_email.clone().unwrap();

        f.panel.fail_deprovision(true);
        assert!(matches!(
            f.engine.revoke(done.subscription.id).await,
            Err(OrderError::Panel(_))
        ));
        assert_eq!(active_count(&f.db, user.id).await, 1);

        f.panel.fail_deprovision(false);
        let revoked = f.engine.revoke(done.subscription.id).await.unwrap();
        assert!(!revoked.is_active);
        assert_eq!(f.panel.deprovisioned(), vec![email]);
        assert_eq!(active_count(&f.db, user.id).await, 0);

        assert!(matches!(
            f.engine.revoke(424242).await,
            Err(OrderError::SubscriptionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_revoke_without_identity_is_local_only() {
        let f = fixture().await;
        f.panel.fail_provision(true);
        let user = seed_user(&f.db, "a@example.com").await;
        let plan = seed_plan(&f.db, 130, "1month", true).await;
        let (order, _) = create_order(&f.db, user.id, plan.id).await.unwrap();
        let done = f.engine.fulfill(order.id).await.unwrap().unwrap();

        f.panel.fail_deprovision(true);
        let revoked = f.engine.revoke(done.subscription.id).await.unwrap();
        assert!(!revoked.is_active);
        assert!(f.panel.deprovisioned().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_panel_does_not_block_other_writers() {
        let (db, path) = file_db().await;
        let panel = Arc::new(FakePanel::new());
        panel.set_provision_delay(StdDuration::from_secs(2));
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let engine = Arc::new(FulfillmentEngine::new(db.clone(), panel.clone(), clock, 1));

        let buyer = seed_user(&db, "a@example.com").await;
        let other = seed_user(&db, "b@example.com").await;
        let plan = seed_plan(&db, 130, "1month", true).await;
        let (order, _) = create_order(&db, buyer.id, plan.id).await.unwrap();

        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.fulfill(order.id).await })
        };
        tokio::time::sleep(StdDuration::from_millis(200)).await;

        let started = Instant::now();
        create_order(&db, other.id, plan.id).await.unwrap();
        assert!(started.elapsed() < StdDuration::from_secs(1));

        assert!(running.await.unwrap().unwrap().is_some());
        db.close().await.unwrap();
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fulfillment_creates_one_subscription() {
        let (db, path) = file_db().await;
        let panel = Arc::new(FakePanel::new());
        panel.set_provision_delay(StdDuration::from_millis(300));
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let engine = FulfillmentEngine::new(db.clone(), panel.clone(), clock, 1);

        let user = seed_user(&db, "a@example.com").await;
        let plan = seed_plan(&db, 130, "1month", true).await;
        let (order, _) = create_order(&db, user.id, plan.id).await.unwrap();

        let (first, second) = tokio::join!(engine.fulfill(order.id), engine.fulfill(order.id));
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(
            [first.is_some(), second.is_some()].iter().filter(|done| **done).count(),
            1
        );

        let subs = Subscription::find()
            .filter(subscription::Column::OrderId.eq(order.id))
            .count(&db)
            .await
            .unwrap();
        assert_eq!(subs, 1);

        let reloaded = Order::find_by_id(order.id).one(&db).await.unwrap().unwrap();
        assert_eq!(reloaded.status, OrderStatus::Completed);

        // 落败一方开通的身份已被回收
        let provisioned = panel.provision_calls().len();
        assert_eq!(provisioned - panel.deprovisioned().len(), 1);

        db.close().await.unwrap();
        let _ = std::fs::remove_file(path);
    }
}
