//! 测试辅助：内存数据库、面板替身与数据种子

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use sea_orm_migration::MigratorTrait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crate::entity::{plan, subscription, user};
use crate::migration::Migrator;
use crate::panel::{ClientUsage, Inbound, PanelApi, PanelError, ProvisionedIdentity};

/// 整秒时间，避免存储往返丢精度
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap()
}

/// 迁移好的内存数据库
pub async fn memory_db() -> DatabaseConnection {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opts).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

/// 迁移好的临时文件数据库，多个连接可并发访问
pub async fn file_db() -> (DatabaseConnection, PathBuf) {
    let path = std::env::temp_dir().join(format!("vpn-dist-test-{}.db", uuid::Uuid::new_v4()));
    let db = crate::migration::connect(&path.to_string_lossy()).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    (db, path)
}

pub async fn seed_user(db: &DatabaseConnection, email: &str) -> user::Model {
    let now = Utc::now().naive_utc();
    user::ActiveModel {
        email: Set(email.to_string()),
        password_hash: Set("x".to_string()),
        is_admin: Set(false),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn seed_plan(db: &DatabaseConnection, traffic_gb: i32, period: &str, active: bool) -> plan::Model {
    let now = Utc::now().naive_utc();
    plan::ActiveModel {
        name: Set(format!("{}GB {}", traffic_gb, period)),
        traffic_gb: Set(traffic_gb),
        price: Set(traffic_gb as f64 / 10.0),
        period: Set(period.to_string()),
        is_active: Set(active),
        sort_order: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

/// 直接写入一条订阅，跳过履约流程
#[allow(clippy::too_many_arguments)]
pub async fn seed_subscription(
    db: &DatabaseConnection,
    user_id: i64,
    plan_id: i64,
    identity_email: Option<&str>,
    total_gb: i32,
    expires_at: Option<DateTime<Utc>>,
    active: bool,
) -> subscription::Model {
    let now = Utc::now().naive_utc();
    let order = crate::orders::create_order(db, user_id, plan_id).await.unwrap().0;
    subscription::ActiveModel {
        user_id: Set(user_id),
        plan_id: Set(plan_id),
        order_id: Set(order.id),
        token: Set(crate::fulfillment::generate_token()),
        identity_email: Set(identity_email.map(str::to_string)),
        identity_uuid: Set(identity_email.map(|_| uuid::Uuid::new_v4().to_string())),
        traffic_total_gb: Set(total_gb),
        traffic_used_gb: Set(0.0),
        traffic_remaining_gb: Set(total_gb as f64),
        expires_at: Set(expires_at.map(|t| t.naive_utc())),
        is_active: Set(active),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionCall {
    pub inbound_id: i64,
    pub email: String,
    pub traffic_gb: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct FakeState {
    provisioned: Vec<ProvisionCall>,
    deprovisioned: Vec<String>,
    usage: Vec<ClientUsage>,
    stream_settings: Value,
    fail_provision: bool,
    fail_deprovision: bool,
    fail_usage: bool,
    fail_inbound: bool,
    provision_delay: Option<Duration>,
}

/// 内存中的面板替身
#[derive(Default)]
pub struct FakePanel {
    state: Mutex<FakeState>,
    inbound_fetches: AtomicUsize,
}

impl FakePanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_provision(&self, fail: bool) {
        self.state.lock().unwrap().fail_provision = fail;
    }

    pub fn fail_deprovision(&self, fail: bool) {
        self.state.lock().unwrap().fail_deprovision = fail;
    }

    /// 开通身份前先等待，模拟慢面板
    pub fn set_provision_delay(&self, delay: Duration) {
        self.state.lock().unwrap().provision_delay = Some(delay);
    }

    pub fn fail_usage(&self, fail: bool) {
        self.state.lock().unwrap().fail_usage = fail;
    }

    pub fn fail_inbound_fetch(&self, fail: bool) {
        self.state.lock().unwrap().fail_inbound = fail;
    }

    pub fn set_usage(&self, usage: Vec<ClientUsage>) {
        self.state.lock().unwrap().usage = usage;
    }

    pub fn set_stream_settings(&self, stream: Value) {
        self.state.lock().unwrap().stream_settings = stream;
    }

    pub fn provision_calls(&self) -> Vec<ProvisionCall> {
        self.state.lock().unwrap().provisioned.clone()
    }

    pub fn deprovisioned(&self) -> Vec<String> {
        self.state.lock().unwrap().deprovisioned.clone()
    }

    pub fn inbound_fetches(&self) -> usize {
        self.inbound_fetches.load(Ordering::SeqCst)
    }
}

pub fn usage(email: &str, up: i64, down: i64) -> ClientUsage {
    ClientUsage {
        email: email.to_string(),
        identity_id: uuid::Uuid::new_v4().to_string(),
        upload_bytes: up,
        download_bytes: down,
        total_bytes: up + down,
    }
}

#[async_trait]
impl PanelApi for FakePanel {
    async fn provision_identity(
        &self,
        inbound_id: i64,
        email_key: &str,
        traffic_gb: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ProvisionedIdentity, PanelError> {
        let delay = self.state.lock().unwrap().provision_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_provision {
            return Err(PanelError::Rejected {
                message: "scripted failure".to_string(),
            });
        }
        state.provisioned.push(ProvisionCall {
            inbound_id,
            email: email_key.to_string(),
            traffic_gb,
            expires_at,
        });
        Ok(ProvisionedIdentity {
            email: email_key.to_string(),
            identity_id: uuid::Uuid::new_v4().to_string(),
            total_bytes: crate::traffic::gb_to_bytes(traffic_gb),
            expiry_epoch: expires_at.map(|t| t.timestamp()),
        })
    }

    async fn deprovision_identity(&self, _inbound_id: i64, email_key: &str) -> Result<(), PanelError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deprovision {
            return Err(PanelError::Timeout { timeout_secs: 10 });
        }
        state.deprovisioned.push(email_key.to_string());
        Ok(())
    }

    async fn fetch_aggregate_usage(&self, _inbound_id: i64) -> Result<Vec<ClientUsage>, PanelError> {
        let state = self.state.lock().unwrap();
        if state.fail_usage {
            return Err(PanelError::Timeout { timeout_secs: 10 });
        }
        Ok(state.usage.clone())
    }

    async fn fetch_inbound_config(&self, inbound_id: i64) -> Result<Inbound, PanelError> {
        self.inbound_fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.fail_inbound {
            return Err(PanelError::InboundNotFound { inbound_id });
        }
        let raw = json!({
            "id": inbound_id,
            "port": 443,
            "protocol": "vless",
            "settings": "{\"clients\":[]}",
            "streamSettings": state.stream_settings.to_string(),
        });
        serde_json::from_value(raw).map_err(|e| PanelError::Decode {
            message: e.to_string(),
        })
    }
}
