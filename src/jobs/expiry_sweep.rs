//! 过期订阅清理

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::info;

use super::PeriodicJob;
use crate::clock::Clock;
use crate::entity::{subscription, Subscription};

/// 停用已过期、流量耗尽的订阅，不调用面板
pub struct ExpirySweepJob {
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
}

impl ExpirySweepJob {
    pub fn new(db: DatabaseConnection, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// 返回本次停用的订阅数
    pub async fn run_once(&self) -> anyhow::Result<u64> {
        let now = self.clock.now().naive_utc();
        let txn = self.db.begin().await?;

        let active = Subscription::find()
            .filter(subscription::Column::IsActive.eq(true))
            .all(&txn)
            .await?;

        let mut expired = 0;
        for sub in active {
            if !sub.is_expired(now) {
                continue;
            }
            info!(
                "订阅已过期: ID={}, Token={}...",
                sub.id,
                &sub.token[..sub.token.len().min(20)]
            );
            let mut active: subscription::ActiveModel = sub.into();
            active.is_active = Set(false);
            active.updated_at = Set(now);
            active.update(&txn).await?;
            expired += 1;
        }

        txn.commit().await?;
        info!("过期订阅检查完成，停用 {} 个订阅", expired);
        Ok(expired)
    }
}

#[async_trait]
impl PeriodicJob for ExpirySweepJob {
    fn name(&self) -> &'static str {
        "expiry-sweep"
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.run_once().await.map(|_| ())
    }
}
