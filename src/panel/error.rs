use thiserror::Error;

/// 面板调用的统一错误类型
///
/// 所有传输层、协议层与解码失败都会归一到这里，调用方不会拿到半成品结构。
#[derive(Debug, Error)]
pub enum PanelError {
    /// 连接失败、DNS 失败等传输层错误
    #[error("面板传输错误: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("面板请求超时 ({timeout_secs}s)")]
    Timeout { timeout_secs: u64 },

    /// 非 2xx 响应
    #[error("面板返回 HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// 响应信封中 success=false
    #[error("面板拒绝请求: {message}")]
    Rejected { message: String },

    /// 登录未下发会话 Cookie
    #[error("面板登录失败: {message}")]
    LoginRejected { message: String },

    /// 重新登录后仍然 401/403
    #[error("面板会话无效，重新登录后仍被拒绝")]
    Unauthorized,

    #[error("面板响应缺少数据: {endpoint}")]
    MissingPayload { endpoint: String },

    #[error("面板响应解析失败: {message}")]
    Decode { message: String },

    #[error("入站不存在: {inbound_id}")]
    InboundNotFound { inbound_id: i64 },
}

impl PanelError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            PanelError::Timeout { timeout_secs }
        } else if err.is_decode() {
            PanelError::Decode {
                message: err.to_string(),
            }
        } else {
            PanelError::Transport(err)
        }
    }

    /// 会话失效，重新登录可能恢复
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, PanelError::Status { status: 401 | 403, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_expired_only_for_401_403() {
        let unauthorized = PanelError::Status { status: 401, body: String::new() };
        let forbidden = PanelError::Status { status: 403, body: String::new() };
        let server = PanelError::Status { status: 500, body: String::new() };
        assert!(unauthorized.is_auth_expired());
        assert!(forbidden.is_auth_expired());
        assert!(!server.is_auth_expired());
        assert!(!PanelError::Unauthorized.is_auth_expired());
        assert!(!PanelError::Timeout { timeout_secs: 10 }.is_auth_expired());
    }
}
