// Integration tests for `XuiPanelClient` using wiremock.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vpn_dist::config::PanelConfig;
use vpn_dist::panel::{PanelApi, PanelError, XuiPanelClient};

const INBOUND_ID: i64 = 1;

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, XuiPanelClient) {
    let server = MockServer::start().await;
    let config = PanelConfig {
        base_url: server.uri(),
        panel_path: "/panel".to_string(),
        username: "admin".to_string(),
        password: "secret".to_string(),
        inbound_id: INBOUND_ID,
        timeout_secs: 5,
        ..PanelConfig::default()
    };
    let client = XuiPanelClient::new(&config).unwrap();
    (server, client)
}

fn login_ok() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("set-cookie", "3x-ui=session-token; Path=/; HttpOnly")
        .set_body_json(json!({ "success": true, "msg": "Login Successfully", "obj": null }))
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(login_ok())
        .mount(server)
        .await;
}

fn inbound_json() -> Value {
    let settings = json!({
        "clients": [{
            "id": "11111111-1111-1111-1111-111111111111",
            "email": "user_1_1700000000000",
            "limitIp": 3,
            "totalGB": 139586437120i64,
            "expiryTime": 0,
            "enable": true,
            "tgId": "",
            "subId": ""
        }, {
            "id": "22222222-2222-2222-2222-222222222222",
            "email": "user_2_1700000000000",
            "limitIp": 3,
            "totalGB": 0,
            "expiryTime": 0,
            "enable": true,
            "tgId": "",
            "subId": ""
        }],
        "decryption": "none"
    });
    let stream = json!({
        "network": "tcp",
        "security": "reality",
        "realitySettings": {
            "serverNames": ["www.apple.com"],
            "shortIds": ["ab12"],
            "settings": { "publicKey": "PUBKEY", "fingerprint": "chrome" }
        }
    });

    json!({
        "id": INBOUND_ID,
        "port": 443,
        "protocol": "vless",
        "remark": "main",
        "settings": settings.to_string(),
        "streamSettings": stream.to_string(),
        "sniffing": "{}",
        "clientStats": [
            { "email": "user_1_1700000000000", "up": 100, "down": 900 }
        ]
    })
}

fn envelope(obj: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "success": true, "msg": "", "obj": obj }))
}

// ── Authentication tests ────────────────────────────────────────────

#[tokio::test]
async fn test_login_success_requires_session_cookie() {
    let (server, client) = setup().await;
    mount_login(&server).await;

    client.login().await.unwrap();
}

#[tokio::test]
async fn test_login_without_cookie_is_rejected() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": false, "msg": "wrong password" })),
        )
        .mount(&server)
        .await;

    let result = client.login().await;
    assert!(
        matches!(result, Err(PanelError::LoginRejected { .. })),
        "expected LoginRejected, got: {result:?}"
    );
}

#[tokio::test]
async fn test_expired_session_relogins_once() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(login_ok())
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/panel/api/inbounds/get/1"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/panel/api/inbounds/get/1"))
        .respond_with(envelope(inbound_json()))
        .mount(&server)
        .await;

    let inbound = client.fetch_inbound_config(INBOUND_ID).await.unwrap();
    assert_eq!(inbound.port, 443);
    assert_eq!(inbound.stream_settings["security"], "reality");
}

#[tokio::test]
async fn test_repeated_auth_failure_is_unauthorized() {
    let (server, client) = setup().await;
    mount_login(&server).await;

    Mock::given(method("GET"))
        .and(path("/panel/api/inbounds/get/1"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let result = client.fetch_inbound_config(INBOUND_ID).await;
    assert!(
        matches!(result, Err(PanelError::Unauthorized)),
        "expected Unauthorized, got: {result:?}"
    );
}

// ── Inbound tests ───────────────────────────────────────────────────

#[tokio::test]
async fn test_usage_joins_stats_and_defaults_to_zero() {
    let (server, client) = setup().await;
    mount_login(&server).await;

    Mock::given(method("GET"))
        .and(path("/panel/api/inbounds/get/1"))
        .respond_with(envelope(inbound_json()))
        .mount(&server)
        .await;

    let usage = client.fetch_aggregate_usage(INBOUND_ID).await.unwrap();
    assert_eq!(usage.len(), 2);

    let first = usage.iter().find(|u| u.email == "user_1_1700000000000").unwrap();
    assert_eq!(first.identity_id, "11111111-1111-1111-1111-111111111111");
    assert_eq!(first.upload_bytes, 100);
    assert_eq!(first.download_bytes, 900);
    assert_eq!(first.total_bytes, 1000);

    let second = usage.iter().find(|u| u.email == "user_2_1700000000000").unwrap();
    assert_eq!(second.total_bytes, 0);
}

#[tokio::test]
async fn test_missing_inbound() {
    let (server, client) = setup().await;
    mount_login(&server).await;

    Mock::given(method("GET"))
        .and(path("/panel/api/inbounds/get/1"))
        .respond_with(envelope(Value::Null))
        .mount(&server)
        .await;

    let result = client.fetch_inbound_config(INBOUND_ID).await;
    assert!(
        matches!(result, Err(PanelError::InboundNotFound { inbound_id: 1 })),
        "expected InboundNotFound, got: {result:?}"
    );
}

#[tokio::test]
async fn test_server_error_status() {
    let (server, client) = setup().await;
    mount_login(&server).await;

    Mock::given(method("GET"))
        .and(path("/panel/api/inbounds/get/1"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let result = client.fetch_inbound_config(INBOUND_ID).await;
    match result {
        Err(PanelError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected Status error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_envelope_failure_is_rejected() {
    let (server, client) = setup().await;
    mount_login(&server).await;

    Mock::given(method("GET"))
        .and(path("/panel/api/inbounds/get/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": false, "msg": "inbound locked", "obj": null })),
        )
        .mount(&server)
        .await;

    let result = client.fetch_inbound_config(INBOUND_ID).await;
    match result {
        Err(PanelError::Rejected { message }) => assert_eq!(message, "inbound locked"),
        other => panic!("expected Rejected, got: {other:?}"),
    }
}

// ── Provisioning tests ──────────────────────────────────────────────

#[tokio::test]
async fn test_provision_appends_client_and_keeps_fields() {
    let (server, client) = setup().await;
    mount_login(&server).await;

    Mock::given(method("GET"))
        .and(path("/panel/api/inbounds/get/1"))
        .respond_with(envelope(inbound_json()))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/panel/api/inbounds/update/1"))
        .respond_with(envelope(Value::Null))
        .expect(1)
        .mount(&server)
        .await;

    // 到期时间由调用方给定，客户端原样写入
    let expires_at: DateTime<Utc> = DateTime::from_timestamp(1_702_592_000, 0).unwrap();
    let identity = client
        .provision_identity(INBOUND_ID, "user_3_1700000000000", 130, Some(expires_at))
        .await
        .unwrap();
    assert_eq!(identity.email, "user_3_1700000000000");
    assert_eq!(identity.total_bytes, 130 * (1i64 << 30));
    assert_eq!(identity.expiry_epoch, Some(1_702_592_000));
    assert_eq!(identity.identity_id.len(), 36);

    let requests = server.received_requests().await.unwrap();
    let update = requests
        .iter()
        .find(|r| r.url.path() == "/panel/api/inbounds/update/1")
        .unwrap();
    let body: Value = serde_json::from_slice(&update.body).unwrap();

    assert_eq!(body["remark"], "main");
    assert_eq!(body["sniffing"], "{}");
    assert!(body.get("clientStats").is_none());

    let settings: Value = serde_json::from_str(body["settings"].as_str().unwrap()).unwrap();
    let clients = settings["clients"].as_array().unwrap();
    assert_eq!(clients.len(), 3);
    assert_eq!(settings["decryption"], "none");

    let added = &clients[2];
    assert_eq!(added["email"], "user_3_1700000000000");
    assert_eq!(added["id"], identity.identity_id.as_str());
    assert_eq!(added["limitIp"], 3);
    assert_eq!(added["totalGB"], 130 * (1i64 << 30));
    assert_eq!(added["expiryTime"], 1_702_592_000_000i64);
}

#[tokio::test]
async fn test_provision_one_time_plan_never_expires() {
    let (server, client) = setup().await;
    mount_login(&server).await;

    Mock::given(method("GET"))
        .and(path("/panel/api/inbounds/get/1"))
        .respond_with(envelope(inbound_json()))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/panel/api/inbounds/update/1"))
        .respond_with(envelope(Value::Null))
        .mount(&server)
        .await;

    let identity = client
        .provision_identity(INBOUND_ID, "user_4_1700000000000", 50, None)
        .await
        .unwrap();
    assert_eq!(identity.expiry_epoch, None);

    let requests = server.received_requests().await.unwrap();
    let update = requests
        .iter()
        .find(|r| r.url.path() == "/panel/api/inbounds/update/1")
        .unwrap();
    let body: Value = serde_json::from_slice(&update.body).unwrap();
    let settings: Value = serde_json::from_str(body["settings"].as_str().unwrap()).unwrap();
    assert_eq!(settings["clients"][2]["expiryTime"], 0);
}

#[tokio::test]
async fn test_deprovision_by_email() {
    let (server, client) = setup().await;
    mount_login(&server).await;

    Mock::given(method("POST"))
        .and(path("/panel/api/inbounds/1/delClientByEmail/user_1_1700000000000"))
        .respond_with(envelope(Value::Null))
        .expect(1)
        .mount(&server)
        .await;

    client
        .deprovision_identity(INBOUND_ID, "user_1_1700000000000")
        .await
        .unwrap();
}
