//! 入站参数缓存
//!
//! 生成客户端订阅配置时需要入站的传输与 Reality 参数。这些参数很少变化，
//! 这里按入站缓存一份，过期时间由注入的时钟计算。只有一个槽位，
//! 请求另一个入站时视为未命中并替换槽位。

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::clock::Clock;
use crate::panel::PanelApi;

const DEFAULT_SERVER_NAME: &str = "google.com";
const DEFAULT_FINGERPRINT: &str = "chrome";

/// 生成订阅所需的入站参数，空值表示获取失败
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InboundSettings {
    pub network: String,
    pub security: String,
    pub reality: Option<RealityParams>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RealityParams {
    pub public_key: String,
    pub short_id: String,
    pub server_name: String,
    pub fingerprint: String,
}

impl InboundSettings {
    pub fn is_empty(&self) -> bool {
        self == &InboundSettings::default()
    }

    /// 从 streamSettings 中提取
    pub fn from_stream_settings(stream: &Value) -> Option<Self> {
        let stream = stream.as_object()?;

        let network = str_field(stream.get("network")).unwrap_or("tcp").to_string();
        let security = str_field(stream.get("security")).unwrap_or("none").to_string();

        let reality = if security == "reality" || stream.contains_key("realitySettings") {
            let block = stream.get("realitySettings").cloned().unwrap_or(Value::Null);
            Some(RealityParams::extract(&block))
        } else {
            None
        };

        Some(Self {
            network,
            security,
            reality,
        })
    }
}

impl RealityParams {
    fn extract(block: &Value) -> Self {
        let public_key = str_field(block.pointer("/settings/publicKey"))
            .or_else(|| str_field(block.get("publicKey")))
            .unwrap_or_default()
            .to_string();

        let short_id = first_str(block.get("shortIds")).unwrap_or_default().to_string();

        let server_name = match first_str(block.get("serverNames")) {
            Some(name) => name.to_string(),
            None => {
                let dest = str_field(block.get("dest")).unwrap_or_default();
                match dest.split_once(':') {
                    Some((host, _)) => host.to_string(),
                    None if !dest.is_empty() => dest.to_string(),
                    None => DEFAULT_SERVER_NAME.to_string(),
                }
            }
        };

        let fingerprint = str_field(block.get("fingerprint"))
            .or_else(|| str_field(block.pointer("/settings/fingerprint")))
            .unwrap_or(DEFAULT_FINGERPRINT)
            .to_string();

        Self {
            public_key,
            short_id,
            server_name,
            fingerprint,
        }
    }
}

fn str_field(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn first_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

struct Slot {
    inbound_id: i64,
    settings: InboundSettings,
    fetched_at: DateTime<Utc>,
}

/// 单槽位的入站参数缓存
pub struct InboundSettingsCache {
    panel: Arc<dyn PanelApi>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    slot: Mutex<Option<Slot>>,
}

impl InboundSettingsCache {
    pub fn new(panel: Arc<dyn PanelApi>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            panel,
            clock,
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// 获取入站参数，失败时返回空参数且不写入缓存
    pub async fn get(&self, inbound_id: i64) -> InboundSettings {
        let mut slot = self.slot.lock().await;
        let now = self.clock.now();

        if let Some(cached) = slot.as_ref() {
            if cached.inbound_id == inbound_id && now - cached.fetched_at < self.ttl {
                return cached.settings.clone();
            }
        }

        let inbound = match self.panel.fetch_inbound_config(inbound_id).await {
            Ok(inbound) => inbound,
            Err(e) => {
                error!("获取入站参数失败: inbound_id={}, 错误: {}", inbound_id, e);
                return InboundSettings::default();
            }
        };

        let Some(settings) = InboundSettings::from_stream_settings(&inbound.stream_settings) else {
            error!("入站 streamSettings 格式无效: inbound_id={}", inbound_id);
            return InboundSettings::default();
        };

        debug!("缓存入站参数: inbound_id={}", inbound_id);
        *slot = Some(Slot {
            inbound_id,
            settings: settings.clone(),
            fetched_at: now,
        });
        settings
    }
}
