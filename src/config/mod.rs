//! 服务配置模块

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 服务配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Web API 端口
    #[serde(default = "default_web_port")]
    pub web_port: u16,

    /// 数据库路径
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// JWT 密钥 (可选，默认从环境变量 JWT_SECRET 读取)
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// JWT 过期时间（小时）
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration_hours: i64,

    #[serde(default)]
    pub panel: PanelConfig,

    #[serde(default)]
    pub subscription: SubscriptionConfig,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub payment: PaymentConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// 3X-UI 面板配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PanelConfig {
    /// 面板根地址（不包含 panel_path）
    #[serde(default = "default_panel_base_url")]
    pub base_url: String,

    /// API 前缀路径
    #[serde(default = "default_panel_path")]
    pub panel_path: String,

    #[serde(default = "default_panel_username")]
    pub username: String,

    /// 面板密码 (可被环境变量 PANEL_PASSWORD 覆盖)
    #[serde(default)]
    pub password: String,

    /// 默认入站 ID
    #[serde(default = "default_inbound_id")]
    pub inbound_id: i64,

    /// 登录成功后面板下发的会话 Cookie 名称
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,

    /// 每次远程调用的超时时间（秒）
    #[serde(default = "default_panel_timeout")]
    pub timeout_secs: u64,

    /// 客户端直连使用的地址，缺省时取 base_url 的主机部分
    #[serde(default)]
    pub public_host: Option<String>,

    /// 客户端直连使用的端口
    #[serde(default = "default_public_port")]
    pub public_port: u16,
}

/// 订阅链接配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SubscriptionConfig {
    #[serde(default = "default_subscription_base_url")]
    pub base_url: String,

    #[serde(default = "default_subscription_path")]
    pub path: String,
}

/// 定时任务配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct JobsConfig {
    /// 流量同步间隔（分钟）
    #[serde(default = "default_traffic_sync_interval")]
    pub traffic_sync_interval_minutes: u64,

    /// 入站参数缓存有效期（秒）
    #[serde(default = "default_settings_cache_ttl")]
    pub settings_cache_ttl_secs: i64,
}

/// 支付配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PaymentConfig {
    /// 支付网关下单地址，未配置时不开放网关支付
    #[serde(default)]
    pub gateway_url: Option<String>,

    /// 回调中视为支付成功的状态值
    #[serde(default = "default_success_statuses")]
    pub success_statuses: Vec<String>,

    /// 手动支付后联系管理员的方式
    #[serde(default)]
    pub admin_contact: String,

    /// 开放 `/orders/{id}/pay` 模拟支付，仅用于开发与演示环境
    #[serde(default)]
    pub allow_simulated: bool,
}

/// 管理员初始化配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AdminConfig {
    #[serde(default = "default_admin_email")]
    pub email: String,
}

fn default_web_port() -> u16 {
    8000
}

fn default_db_path() -> String {
    "./data/vpn_dist.db".to_string()
}

fn default_jwt_expiration() -> i64 {
    24 * 7
}

fn default_panel_base_url() -> String {
    "http://127.0.0.1:2053".to_string()
}

fn default_panel_path() -> String {
    "/panel".to_string()
}

fn default_panel_username() -> String {
    "admin".to_string()
}

fn default_inbound_id() -> i64 {
    1
}

fn default_session_cookie() -> String {
    "3x-ui".to_string()
}

fn default_panel_timeout() -> u64 {
    10
}

fn default_public_port() -> u16 {
    443
}

fn default_subscription_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_subscription_path() -> String {
    "/sub".to_string()
}

fn default_traffic_sync_interval() -> u64 {
    60
}

fn default_settings_cache_ttl() -> i64 {
    3600
}

fn default_success_statuses() -> Vec<String> {
    vec!["OD".to_string(), "success".to_string()]
}

fn default_admin_email() -> String {
    "admin@localhost".to_string()
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            base_url: default_panel_base_url(),
            panel_path: default_panel_path(),
            username: default_panel_username(),
            password: String::new(),
            inbound_id: default_inbound_id(),
            session_cookie: default_session_cookie(),
            timeout_secs: default_panel_timeout(),
            public_host: None,
            public_port: default_public_port(),
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            base_url: default_subscription_base_url(),
            path: default_subscription_path(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            traffic_sync_interval_minutes: default_traffic_sync_interval(),
            settings_cache_ttl_secs: default_settings_cache_ttl(),
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            success_statuses: default_success_statuses(),
            admin_contact: String::new(),
            allow_simulated: false,
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            email: default_admin_email(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            web_port: default_web_port(),
            db_path: default_db_path(),
            jwt_secret: None,
            jwt_expiration_hours: default_jwt_expiration(),
            panel: PanelConfig::default(),
            subscription: SubscriptionConfig::default(),
            jobs: JobsConfig::default(),
            payment: PaymentConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

impl PanelConfig {
    /// 客户端直连地址：优先 public_host，否则取 base_url 的主机部分
    pub fn connect_host(&self) -> String {
        if let Some(ref host) = self.public_host {
            if !host.is_empty() {
                return host.clone();
            }
        }
        let without_scheme = self
            .base_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.base_url);
        let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
        authority.split(':').next().unwrap_or(authority).to_string()
    }
}

impl Config {
    /// 获取 JWT 密钥（优先从环境变量读取，其次从配置文件，最后自动生成）
    pub fn get_jwt_secret(&self) -> anyhow::Result<String> {
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            if !secret.is_empty() {
                return Ok(secret);
            }
        }

        if let Some(ref secret) = self.jwt_secret {
            if !secret.is_empty() {
                return Ok(secret.clone());
            }
        }

        Self::get_or_generate_jwt_secret()
    }

    /// 从文件获取或生成新的 JWT 密钥
    fn get_or_generate_jwt_secret() -> anyhow::Result<String> {
        let data_dir = PathBuf::from("./data");
        let secret_file = data_dir.join("jwt_secret.key");

        if secret_file.exists() {
            if let Ok(secret) = fs::read_to_string(&secret_file) {
                let secret = secret.trim();
                if !secret.is_empty() {
                    return Ok(secret.to_string());
                }
            }
        }

        let secret = Self::generate_random_secret(64);

        if let Err(e) = fs::create_dir_all(&data_dir) {
            tracing::warn!("无法创建 data 目录: {}", e);
        } else if let Err(e) = fs::write(&secret_file, &secret) {
            tracing::warn!("无法保存 JWT 密钥到文件: {}", e);
        } else {
            tracing::info!("🔑 已生成并保存新的 JWT 密钥到: {}", secret_file.display());
        }

        Ok(secret)
    }

    /// 生成随机密钥
    fn generate_random_secret(length: usize) -> String {
        use rand::Rng;
        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/=";
        let mut rng = rand::rng();
        (0..length)
            .map(|_| {
                let idx = rng.random_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect()
    }

    /// 应用环境变量覆盖
    fn apply_env_overrides(&mut self) {
        if let Ok(password) = std::env::var("PANEL_PASSWORD") {
            if !password.is_empty() {
                self.panel.password = password;
            }
        }
    }
}

/// 加载配置：显式路径 → 默认路径 → 默认值
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = match explicit {
        Some(path) => {
            let config = read_config_file(path)?;
            tracing::info!("📋 加载配置文件: {}", path.display());
            config
        }
        None => {
            let mut found = None;
            for path_str in ["config.toml", "../config.toml"] {
                let path = Path::new(path_str);
                if path.exists() {
                    found = Some(read_config_file(path)?);
                    tracing::info!("📋 加载配置文件: {}", path.display());
                    break;
                }
            }
            found.unwrap_or_else(|| {
                tracing::warn!("未找到配置文件，使用默认配置");
                Config::default()
            })
        }
    };

    config.apply_env_overrides();
    Ok(config)
}

fn read_config_file(path: &Path) -> anyhow::Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("无法读取配置文件: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("解析配置文件失败: {}", path.display()))
}

/// 解析 TOML 配置内容
pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    let config: Config = toml::from_str(content)?;
    Ok(config)
}
