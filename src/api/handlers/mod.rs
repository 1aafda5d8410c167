pub mod admin;
pub mod auth;
pub mod client_sub;
pub mod orders;
pub mod payment;
pub mod plans;
pub mod subscriptions;

pub use admin::*;
pub use auth::*;
pub use client_sub::*;
pub use orders::*;
pub use payment::*;
pub use plans::*;
pub use subscriptions::*;

use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use crate::error::OrderError;
use crate::middleware::AuthUser;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
        })
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            message: message.into(),
        })
    }

    pub fn error(message: String) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            message,
        })
    }
}

pub type ApiReply<T> = (StatusCode, Json<ApiResponse<T>>);

/// 分页查询参数
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    pub status: Option<String>,
}

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    20
}

#[derive(Serialize)]
pub struct PageData<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

pub(crate) fn require_user<T>(auth_user: Option<AuthUser>) -> Result<AuthUser, ApiReply<T>> {
    auth_user.ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            ApiResponse::error("未认证".to_string()),
        )
    })
}

pub(crate) fn require_admin<T>(auth_user: Option<AuthUser>) -> Result<AuthUser, ApiReply<T>> {
    let user = require_user(auth_user)?;
    if !user.is_admin {
        return Err((
            StatusCode::FORBIDDEN,
            ApiResponse::error("需要管理员权限".to_string()),
        ));
    }
    Ok(user)
}

pub(crate) fn order_error<T>(err: OrderError) -> ApiReply<T> {
    if matches!(err, OrderError::Database(_) | OrderError::Panel(_)) {
        tracing::error!("订单操作失败: {}", err);
    }
    (err.status_code(), ApiResponse::error(err.to_string()))
}

pub(crate) fn db_error<T>(context: &str, err: sea_orm::DbErr) -> ApiReply<T> {
    tracing::error!("{}: {}", context, err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        ApiResponse::error(format!("{}: {}", context, err)),
    )
}
