// 3X-UI 面板数据结构
//
// 入站记录只解析需要的字段，其余字段原样保存在 `extra` 中，
// 回写时整条记录不丢字段。`settings` / `streamSettings` 在面板里是
// JSON 字符串，这里解码成 `Value`，序列化时再编码回字符串。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::error::PanelError;

/// 面板 API 响应信封 `{success, msg, obj}`
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default = "none")]
    pub obj: Option<T>,
}

fn none<T>() -> Option<T> {
    None
}

/// 入站配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbound {
    pub id: i64,

    #[serde(default)]
    pub port: i64,

    #[serde(default)]
    pub protocol: String,

    #[serde(default, deserialize_with = "json_text", serialize_with = "to_json_text")]
    pub settings: Value,

    #[serde(default, deserialize_with = "json_text", serialize_with = "to_json_text")]
    pub stream_settings: Value,

    /// 仅用于读取，回写时不提交
    #[serde(
        default,
        alias = "client_stats",
        deserialize_with = "null_as_empty",
        skip_serializing
    )]
    pub client_stats: Vec<ClientStat>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 入站下的客户端（身份）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundClient {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub flow: String,
    #[serde(default)]
    pub limit_ip: i64,
    #[serde(rename = "totalGB", default)]
    pub total_gb: i64,
    /// 毫秒时间戳，0 表示永不过期
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub tg_id: Value,
    #[serde(default)]
    pub sub_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

/// 每个客户端的流量统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientStat {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub up: i64,
    #[serde(default)]
    pub down: i64,
}

/// 客户端累计用量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientUsage {
    pub email: String,
    pub identity_id: String,
    pub upload_bytes: i64,
    pub download_bytes: i64,
    pub total_bytes: i64,
}

/// 开通成功后返回的身份信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedIdentity {
    pub email: String,
    pub identity_id: String,
    pub total_bytes: i64,
    /// 过期时间（秒级时间戳），None 表示不限时
    pub expiry_epoch: Option<i64>,
}

impl InboundClient {
    /// 新开通的客户端：限 3 个 IP，默认启用
    pub fn new(identity_id: String, email: String, total_bytes: i64, expiry_millis: i64) -> Self {
        Self {
            id: identity_id,
            email,
            flow: String::new(),
            limit_ip: 3,
            total_gb: total_bytes,
            expiry_time: expiry_millis,
            enable: true,
            tg_id: Value::String(String::new()),
            sub_id: String::new(),
            extra: Map::new(),
        }
    }
}

impl Inbound {
    /// 解析 settings.clients
    pub fn clients(&self) -> Result<Vec<InboundClient>, PanelError> {
        match self.settings.get("clients") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(clients) => decode_value(clients.clone()),
        }
    }

    /// 追加一个客户端到 settings.clients
    pub fn push_client(&mut self, client: InboundClient) -> Result<(), PanelError> {
        let entry = serde_json::to_value(client).map_err(|e| PanelError::Decode {
            message: e.to_string(),
        })?;

        if !self.settings.is_object() {
            self.settings = Value::Object(Map::new());
        }
        let Value::Object(settings) = &mut self.settings else {
            return Err(PanelError::Decode {
                message: "settings 不是对象".to_string(),
            });
        };

        match settings.get_mut("clients") {
            Some(Value::Array(clients)) => {
                let email = entry.get("email").and_then(Value::as_str);
                if clients.iter().any(|c| c.get("email").and_then(Value::as_str) == email) {
                    return Err(PanelError::Rejected {
                        message: format!("客户端已存在: {}", email.unwrap_or_default()),
                    });
                }
                clients.push(entry)
            }
            _ => {
                settings.insert("clients".to_string(), Value::Array(vec![entry]));
            }
        }
        Ok(())
    }

    /// 按 email 关联客户端与流量统计，统计缺失的客户端记 0
    pub fn usage(&self) -> Result<Vec<ClientUsage>, PanelError> {
        let clients = self.clients()?;
        let usage = clients
            .into_iter()
            .filter(|c| !c.email.is_empty())
            .map(|c| {
                let stat = self.client_stats.iter().find(|s| s.email == c.email);
                let (up, down) = stat.map(|s| (s.up, s.down)).unwrap_or((0, 0));
                ClientUsage {
                    email: c.email,
                    identity_id: c.id,
                    upload_bytes: up,
                    download_bytes: down,
                    total_bytes: up + down,
                }
            })
            .collect();
        Ok(usage)
    }
}

pub(crate) fn decode_value<T: DeserializeOwned>(value: Value) -> Result<T, PanelError> {
    serde_json::from_value(value).map_err(|e| PanelError::Decode {
        message: e.to_string(),
    })
}

/// 接受 JSON 字符串或对象
fn json_text<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    match raw {
        Value::String(text) if text.trim().is_empty() => Ok(Value::Object(Map::new())),
        Value::String(text) => serde_json::from_str(&text).map_err(serde::de::Error::custom),
        Value::Null => Ok(Value::Object(Map::new())),
        other => Ok(other),
    }
}

fn to_json_text<S>(value: &Value, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let text = serde_json::to_string(value).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&text)
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
