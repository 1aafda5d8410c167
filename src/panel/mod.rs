//! 3X-UI 面板对接
//!
//! `PanelApi` 是履约引擎、流量同步与入站参数缓存唯一依赖的远程接口，
//! 生产环境由 [`XuiPanelClient`] 实现，测试中可替换为内存实现。

pub mod client;
pub mod error;
pub mod links;
pub mod models;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use client::XuiPanelClient;
pub use error::PanelError;
pub use models::{ClientUsage, Inbound, ProvisionedIdentity};

#[async_trait]
pub trait PanelApi: Send + Sync {
    /// 在入站下开通一个新身份
    ///
    /// `expires_at` 由调用方算好，与本地订阅的到期时间一致，None 表示永不过期。
    async fn provision_identity(
        &self,
        inbound_id: i64,
        email_key: &str,
        traffic_gb: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ProvisionedIdentity, PanelError>;

    /// 按 email 删除身份
    async fn deprovision_identity(&self, inbound_id: i64, email_key: &str)
        -> Result<(), PanelError>;

    /// 入站下所有身份的累计用量
    async fn fetch_aggregate_usage(&self, inbound_id: i64) -> Result<Vec<ClientUsage>, PanelError>;

    /// 读取入站完整配置
    async fn fetch_inbound_config(&self, inbound_id: i64) -> Result<Inbound, PanelError>;
}
