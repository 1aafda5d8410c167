//! 3X-UI 面板 HTTP 客户端
//!
//! 通过面板的 REST 接口管理入站下的客户端，实现 PanelApi trait。
//! 会话由 reqwest 的 Cookie 存储维护，首次调用时惰性登录。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::PanelError;
use super::models::{ClientUsage, Envelope, Inbound, InboundClient, ProvisionedIdentity};
use super::PanelApi;
use crate::config::PanelConfig;
use crate::traffic::gb_to_bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Unauthenticated,
    Authenticated,
}

/// 3X-UI 面板客户端
pub struct XuiPanelClient {
    base_url: String,
    panel_path: String,
    username: String,
    password: String,
    session_cookie: String,
    timeout_secs: u64,
    http: reqwest::Client,
    session: Mutex<SessionState>,
    /// 入站级别的读改写锁
    inbound_locks: std::sync::Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl XuiPanelClient {
    pub fn new(config: &PanelConfig) -> Result<Self, PanelError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(PanelError::Transport)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            panel_path: config.panel_path.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            session_cookie: config.session_cookie.clone(),
            timeout_secs: config.timeout_secs,
            http,
            session: Mutex::new(SessionState::Unauthenticated),
            inbound_locks: std::sync::Mutex::new(HashMap::new()),
        })
    }

    fn login_url(&self) -> String {
        format!("{}/login", self.base_url)
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}{}/api{}", self.base_url, self.panel_path, endpoint)
    }

    fn inbound_lock(&self, inbound_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.inbound_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(inbound_id).or_default().clone()
    }

    /// 登录面板，成功的标志是响应下发了会话 Cookie
    pub async fn login(&self) -> Result<(), PanelError> {
        let mut session = self.session.lock().await;
        self.login_locked(&mut session).await
    }

    async fn login_locked(&self, session: &mut SessionState) -> Result<(), PanelError> {
        let resp = self
            .http
            .post(self.login_url())
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PanelError::from_reqwest(e, self.timeout_secs))?;

        let status = resp.status();
        let has_cookie = resp.cookies().any(|c| c.name() == self.session_cookie);

        if has_cookie {
            *session = SessionState::Authenticated;
            info!("3X-UI 登录成功 (status: {})", status);
            Ok(())
        } else {
            *session = SessionState::Unauthenticated;
            error!("3X-UI 登录失败: 未获取到会话 Cookie, status: {}", status);
            Err(PanelError::LoginRejected {
                message: format!("HTTP {}，未获取到会话 Cookie {}", status.as_u16(), self.session_cookie),
            })
        }
    }

    async fn ensure_session(&self) -> Result<(), PanelError> {
        let mut session = self.session.lock().await;
        if *session == SessionState::Authenticated {
            return Ok(());
        }
        self.login_locked(&mut session).await
    }

    /// 会话失效后强制重新登录
    async fn relogin(&self) -> Result<(), PanelError> {
        let mut session = self.session.lock().await;
        *session = SessionState::Unauthenticated;
        self.login_locked(&mut session).await
    }

    /// 调用面板 API 并剥离响应信封
    ///
    /// 401/403 时重新登录并在本次调用内重试一次。
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Option<T>, PanelError> {
        self.ensure_session().await?;

        match self.send(method.clone(), endpoint, body).await {
            Err(e) if e.is_auth_expired() => {
                warn!("面板会话失效，重新登录: {}", endpoint);
                self.relogin().await?;
                match self.send(method, endpoint, body).await {
                    Err(e) if e.is_auth_expired() => Err(PanelError::Unauthorized),
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Option<T>, PanelError> {
        let url = self.api_url(endpoint);
        debug!("{} {}", method, url);

        let mut req = self
            .http
            .request(method, &url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| PanelError::from_reqwest(e, self.timeout_secs))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| PanelError::from_reqwest(e, self.timeout_secs))?;

        if !status.is_success() {
            let body: String = text.chars().take(200).collect();
            error!("面板 API 调用失败: {}, 状态码: {}, 响应: {}", endpoint, status, body);
            return Err(PanelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope<T> = serde_json::from_str(&text).map_err(|e| {
            error!("面板响应解析失败: {}, 错误: {}", endpoint, e);
            PanelError::Decode {
                message: e.to_string(),
            }
        })?;

        if !envelope.success {
            let message = envelope.msg.unwrap_or_else(|| "未知错误".to_string());
            error!("面板拒绝请求: {}, msg: {}", endpoint, message);
            return Err(PanelError::Rejected { message });
        }

        Ok(envelope.obj)
    }

    async fn get_inbound(&self, inbound_id: i64) -> Result<Inbound, PanelError> {
        let endpoint = format!("/inbounds/get/{}", inbound_id);
        self.call::<Inbound>(Method::GET, &endpoint, None)
            .await?
            .ok_or(PanelError::InboundNotFound { inbound_id })
    }
}

#[async_trait]
impl PanelApi for XuiPanelClient {
    async fn provision_identity(
        &self,
        inbound_id: i64,
        email_key: &str,
        traffic_gb: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ProvisionedIdentity, PanelError> {
        let lock = self.inbound_lock(inbound_id);
        let _guard = lock.lock().await;

        let mut inbound = self.get_inbound(inbound_id).await?;

        let identity_id = Uuid::new_v4().to_string();
        let total_bytes = gb_to_bytes(traffic_gb);
        let expiry_epoch = expires_at.map(|t| t.timestamp());
        let expiry_millis = expires_at.map(|t| t.timestamp_millis()).unwrap_or(0);

        inbound.push_client(InboundClient::new(
            identity_id.clone(),
            email_key.to_string(),
            total_bytes,
            expiry_millis,
        ))?;

        let body = serde_json::to_value(&inbound).map_err(|e| PanelError::Decode {
            message: e.to_string(),
        })?;
        let endpoint = format!("/inbounds/update/{}", inbound_id);
        self.call::<Value>(Method::POST, &endpoint, Some(&body)).await?;

        info!("3X-UI 添加客户端成功: {}, UUID: {}", email_key, identity_id);
        Ok(ProvisionedIdentity {
            email: email_key.to_string(),
            identity_id,
            total_bytes,
            expiry_epoch,
        })
    }

    async fn deprovision_identity(&self, inbound_id: i64, email_key: &str) -> Result<(), PanelError> {
        let lock = self.inbound_lock(inbound_id);
        let _guard = lock.lock().await;

        let endpoint = format!(
            "/inbounds/{}/delClientByEmail/{}",
            inbound_id,
            urlencoding::encode(email_key)
        );
        self.call::<Value>(Method::POST, &endpoint, None).await?;

        info!("3X-UI 删除客户端成功: {}", email_key);
        Ok(())
    }

    async fn fetch_aggregate_usage(&self, inbound_id: i64) -> Result<Vec<ClientUsage>, PanelError> {
        let inbound = self.get_inbound(inbound_id).await?;
        let usage = inbound.usage()?;
        debug!("获取到 {} 个客户端的流量信息", usage.len());
        Ok(usage)
    }

    async fn fetch_inbound_config(&self, inbound_id: i64) -> Result<Inbound, PanelError> {
        self.get_inbound(inbound_id).await
    }
}
