//! 流量套餐分销后端
//!
//! 订单履约、3X-UI 面板对接、流量同步与过期清理。

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod entity;
pub mod error;
pub mod fulfillment;
pub mod jobs;
pub mod jwt;
pub mod middleware;
pub mod migration;
pub mod orders;
pub mod panel;
pub mod settings_cache;
pub mod traffic;

#[cfg(test)]
pub(crate) mod testing;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::fulfillment::FulfillmentEngine;
use crate::jobs::{ExpirySweepJob, TrafficSyncJob};
use crate::panel::PanelApi;
use crate::settings_cache::InboundSettingsCache;

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<Config>,
    pub jwt_secret: Arc<String>,
    pub panel: Arc<dyn PanelApi>,
    pub clock: Arc<dyn Clock>,
    pub fulfillment: Arc<FulfillmentEngine>,
    pub settings_cache: Arc<InboundSettingsCache>,
    pub traffic_sync: Arc<TrafficSyncJob>,
    pub expiry_sweep: Arc<ExpirySweepJob>,
    /// 转发支付网关请求
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        db: DatabaseConnection,
        config: Config,
        jwt_secret: String,
        panel: Arc<dyn PanelApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let inbound_id = config.panel.inbound_id;
        let fulfillment = Arc::new(FulfillmentEngine::new(
            db.clone(),
            panel.clone(),
            clock.clone(),
            inbound_id,
        ));
        let settings_cache = Arc::new(InboundSettingsCache::new(
            panel.clone(),
            clock.clone(),
            chrono::Duration::seconds(config.jobs.settings_cache_ttl_secs),
        ));
        let traffic_sync = Arc::new(TrafficSyncJob::new(
            db.clone(),
            panel.clone(),
            clock.clone(),
            inbound_id,
        ));
        let expiry_sweep = Arc::new(ExpirySweepJob::new(db.clone(), clock.clone()));

        Self {
            db,
            config: Arc::new(config),
            jwt_secret: Arc::new(jwt_secret),
            panel,
            clock,
            fulfillment,
            settings_cache,
            traffic_sync,
            expiry_sweep,
            http: reqwest::Client::new(),
        }
    }
}
