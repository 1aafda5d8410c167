//! 客户端订阅下载
//!
//! 按订阅令牌生成 Clash 配置，节点参数来自入站参数缓存。

use axum::{
    extract::{Extension, Path},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::Serialize;
use tracing::error;

use crate::{
    entity::{subscription, Subscription},
    settings_cache::InboundSettings,
    AppState,
};

const PROXY_NAME: &str = "VPN";
const GROUP_NAME: &str = "🚀 Select";

#[derive(Debug, Serialize)]
struct ClashConfig {
    port: u16,
    #[serde(rename = "socks-port")]
    socks_port: u16,
    #[serde(rename = "allow-lan")]
    allow_lan: bool,
    mode: &'static str,
    #[serde(rename = "log-level")]
    log_level: &'static str,
    proxies: Vec<ClashProxy>,
    #[serde(rename = "proxy-groups")]
    proxy_groups: Vec<ProxyGroup>,
    rules: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ClashProxy {
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    server: String,
    port: u16,
    uuid: String,
    network: String,
    tls: bool,
    udp: bool,
    servername: String,
    #[serde(rename = "client-fingerprint")]
    client_fingerprint: String,
    #[serde(rename = "reality-opts", skip_serializing_if = "Option::is_none")]
    reality_opts: Option<RealityOpts>,
}

#[derive(Debug, Serialize)]
struct RealityOpts {
    #[serde(rename = "public-key")]
    public_key: String,
    #[serde(rename = "short-id")]
    short_id: String,
}

#[derive(Debug, Serialize)]
struct ProxyGroup {
    name: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    proxies: Vec<String>,
}

/// 渲染单节点 Clash 配置，开头附带订阅用量注释
pub fn render_clash_config(
    sub: &subscription::Model,
    uuid: &str,
    settings: &InboundSettings,
    host: &str,
    port: u16,
) -> Result<String, serde_yaml::Error> {
    let (servername, fingerprint, reality_opts) = match &settings.reality {
        Some(reality) => (
            reality.server_name.clone(),
            reality.fingerprint.clone(),
            (!reality.public_key.is_empty()).then(|| RealityOpts {
                public_key: reality.public_key.clone(),
                short_id: reality.short_id.clone(),
            }),
        ),
        None => ("google.com".to_string(), "chrome".to_string(), None),
    };
    let network = if settings.network.is_empty() {
        "tcp".to_string()
    } else {
        settings.network.clone()
    };

    let config = ClashConfig {
        port: 7890,
        socks_port: 7891,
        allow_lan: true,
        mode: "rule",
        log_level: "info",
        proxies: vec![ClashProxy {
            name: PROXY_NAME.to_string(),
            kind: "vless",
            server: host.to_string(),
            port,
            uuid: uuid.to_string(),
            network,
            tls: true,
            udp: true,
            servername,
            client_fingerprint: fingerprint,
            reality_opts,
        }],
        proxy_groups: vec![ProxyGroup {
            name: GROUP_NAME,
            kind: "select",
            proxies: vec![PROXY_NAME.to_string()],
        }],
        rules: vec![format!("MATCH,{}", GROUP_NAME)],
    };

    let expire = sub
        .expires_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    let header = format!(
        "# User: {}\n# Used: {:.2} GB\n# Total: {} GB\n# Expire: {}\n\n",
        sub.identity_email.as_deref().unwrap_or_default(),
        sub.traffic_used_gb,
        sub.traffic_total_gb,
        expire
    );

    Ok(header + &serde_yaml::to_string(&config)?)
}

fn plain(status: StatusCode, message: &'static str) -> Response {
    (status, message).into_response()
}

/// GET /sub/{token} - 下载 Clash 订阅配置
pub async fn download_subscription(
    Extension(app_state): Extension<AppState>,
    Path(token): Path<String>,
) -> Response {
    let sub = match Subscription::find()
        .filter(subscription::Column::Token.eq(token))
        .one(&app_state.db)
        .await
    {
        Ok(Some(sub)) => sub,
        Ok(None) => return plain(StatusCode::NOT_FOUND, "Subscription not found"),
        Err(e) => {
            error!("查询订阅失败: {}", e);
            return plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
        }
    };

    if sub.is_expired(app_state.clock.now().naive_utc()) {
        return plain(StatusCode::FORBIDDEN, "Subscription expired");
    }
    if !sub.is_active {
        return plain(StatusCode::FORBIDDEN, "Subscription disabled");
    }
    let Some(uuid) = sub.identity_uuid.clone() else {
        return plain(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Subscription valid but not initialized",
        );
    };

    let panel = &app_state.config.panel;
    let settings = app_state.settings_cache.get(panel.inbound_id).await;

    match render_clash_config(&sub, &uuid, &settings, &panel.connect_host(), panel.public_port) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/yaml; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("生成订阅配置失败: {}", e);
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}
