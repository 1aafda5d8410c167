//! 流量同步
//!
//! 从面板拉取累计用量，回写到对应的有效订阅，并记录当日快照。

use anyhow::Context;
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::PeriodicJob;
use crate::clock::Clock;
use crate::entity::subscription::remaining_gb;
use crate::entity::{subscription, traffic_log, Subscription, TrafficLog};
use crate::panel::PanelApi;
use crate::traffic::bytes_to_gb;

/// 一次同步的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// 面板返回的条目数
    pub reported: usize,
    /// 成功匹配并更新的订阅数
    pub updated: usize,
}

pub struct TrafficSyncJob {
    db: DatabaseConnection,
    panel: Arc<dyn PanelApi>,
    clock: Arc<dyn Clock>,
    inbound_id: i64,
}

impl TrafficSyncJob {
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

    /// 执行一次同步，整次运行在一个事务中提交
    pub async fn run_once(&self) -> anyhow::Result<SyncReport> {
        let usage = self
            .panel
            .fetch_aggregate_usage(self.inbound_id)
            .await
            .context("获取面板流量失败")?;

        if usage.is_empty() {
            warn!("未获取到任何流量数据");
            return Ok(SyncReport::default());
        }

        let now = self.clock.now();
        let today = now.date_naive();
        let now = now.naive_utc();

        let txn = self.db.begin().await?;
        let mut updated = 0;

        for entry in &usage {
            let found = Subscription::find()
                .filter(subscription::Column::IdentityEmail.eq(entry.email.as_str()))
                .filter(subscription::Column::IsActive.eq(true))
                .one(&txn)
                .await?;

            let Some(sub) = found else {
                debug!("面板身份没有对应的有效订阅，跳过: {}", entry.email);
                continue;
            };

            let used_gb = bytes_to_gb(entry.total_bytes);
            let remaining = remaining_gb(sub.traffic_total_gb, used_gb);
            let old_used = sub.traffic_used_gb;
            let subscription_id = sub.id;

            let mut active: subscription::ActiveModel = sub.into();
            active.traffic_used_gb = Set(used_gb);
            active.traffic_remaining_gb = Set(remaining);
            active.updated_at = Set(now);
            active.update(&txn).await?;

            // 每个订阅每天一条快照
            let existing = TrafficLog::find()
                .filter(traffic_log::Column::SubscriptionId.eq(subscription_id))
                .filter(traffic_log::Column::RecordedAt.eq(today))
                .one(&txn)
                .await?;

            match existing {
                Some(log) => {
                    let mut log: traffic_log::ActiveModel = log.into();
                    log.upload_bytes = Set(entry.upload_bytes);
                    log.download_bytes = Set(entry.download_bytes);
                    log.total_bytes = Set(entry.total_bytes);
                    log.updated_at = Set(now);
                    log.update(&txn).await?;
                }
                None => {
                    traffic_log::ActiveModel {
                        subscription_id: Set(subscription_id),
                        upload_bytes: Set(entry.upload_bytes),
                        download_bytes: Set(entry.download_bytes),
                        total_bytes: Set(entry.total_bytes),
                        rate_multiplier: Set(1.0),
                        recorded_at: Set(today),
                        created_at: Set(now),
                        updated_at: Set(now),
                        ..Default::default()
                    }
                    .insert(&txn)
                    .await?;
                }
            }

            updated += 1;
            debug!(
                "更新订阅流量: {}, 使用: {:.2}GB -> {:.2}GB, 剩余: {:.2}GB",
                entry.email, old_used, used_gb, remaining
            );
        }

        txn.commit().await?;

        let report = SyncReport {
            reported: usage.len(),
            updated,
        };
        info!("📊 流量同步完成: 面板条目 {}，更新订阅 {}", report.reported, report.updated);
        Ok(report)
    }
}

#[async_trait]
impl PeriodicJob for TrafficSyncJob {
    fn name(&self) -> &'static str {
        "traffic-sync"
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.run_once().await.map(|_| ())
    }
}
