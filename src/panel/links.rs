//! 订阅链接与直连链接

/// `{base}{path}/{token}`
pub fn subscription_url(base_url: &str, path: &str, token: &str) -> String {
    format!(
        "{}{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_end_matches('/'),
        token
    )
}

/// VLESS 直连链接，`#` 后的备注做百分号编码
pub fn direct_connection_url(
    identity_id: &str,
    host: &str,
    port: u16,
    email_key: &str,
    security: Option<&str>,
) -> String {
    let security = security.filter(|s| !s.is_empty()).unwrap_or("none");
    format!(
        "vless://{}@{}:{}?type=tcp&encryption=none&security={}#{}",
        identity_id,
        host,
        port,
        security,
        urlencoding::encode(email_key)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_url() {
        assert_eq!(
            subscription_url("https://vpn.example.com", "/sub", "abc"),
            "https://vpn.example.com/sub/abc"
        );
        assert_eq!(
            subscription_url("https://vpn.example.com/", "/sub/", "abc"),
            "https://vpn.example.com/sub/abc"
        );
    }

    #[test]
    fn test_direct_connection_url() {
        let url = direct_connection_url("uuid-1", "1.2.3.4", 443, "user_1_1700000000000", None);
        assert_eq!(
            url,
            "vless://uuid-1@1.2.3.4:443?type=tcp&encryption=none&security=none#user_1_1700000000000"
        );

        let url = direct_connection_url("uuid-1", "1.2.3.4", 443, "a b#c", Some("reality"));
        assert!(url.contains("security=reality"));
        assert!(url.ends_with("#a%20b%23c"));
    }
}
