use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{hash_password, is_valid_email, verify_password},
    entity::{user, User},
    jwt::generate_token,
    middleware::AuthUser,
    AppState,
};

use super::{require_user, ApiResponse};

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserInfo,
}

#[derive(Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub email: String,
    pub is_admin: bool,
}

impl From<&user::Model> for UserInfo {
    fn from(user: &user::Model) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            is_admin: user.is_admin,
        }
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

fn issue_token(app_state: &AppState, user: &user::Model) -> Result<LoginResponse, String> {
    let token = generate_token(
        user.id,
        &user.email,
        user.is_admin,
        &app_state.jwt_secret,
        app_state.config.jwt_expiration_hours,
    )
    .map_err(|e| format!("Failed to generate token: {}", e))?;

    Ok(LoginResponse {
        token,
        user: UserInfo::from(user),
    })
}

/// POST /api/auth/register - User registration
pub async fn register(
    Extension(app_state): Extension<AppState>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    let email = req.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return (
            StatusCode::BAD_REQUEST,
            ApiResponse::<LoginResponse>::error("邮箱格式不正确".to_string()),
        );
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return (
            StatusCode::BAD_REQUEST,
            ApiResponse::error(format!("密码长度至少 {} 位", MIN_PASSWORD_LEN)),
        );
    }

    match User::find()
        .filter(user::Column::Email.eq(email.as_str()))
        .one(&app_state.db)
        .await
    {
        Ok(Some(_)) => {
            return (
                StatusCode::CONFLICT,
                ApiResponse::error("该邮箱已注册".to_string()),
            )
        }
        Ok(None) => {}
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::error(format!("Registration failed: {}", e)),
            )
        }
    }

    let password_hash = match hash_password(&req.password) {
        Ok(hash) => hash,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::error(format!("Registration failed: {}", e)),
            )
        }
    };

    let now = Utc::now().naive_utc();
    let created = user::ActiveModel {
        email: Set(email),
        password_hash: Set(password_hash),
        is_admin: Set(false),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&app_state.db)
    .await;

    let created = match created {
        Ok(user) => user,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::error(format!("Registration failed: {}", e)),
            )
        }
    };

    tracing::info!("新用户注册: {}", created.email);
    match issue_token(&app_state, &created) {
        Ok(resp) => (StatusCode::CREATED, ApiResponse::success(resp)),
        Err(msg) => (StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::error(msg)),
    }
}

/// POST /api/auth/login - User login
pub async fn login(
    Extension(app_state): Extension<AppState>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let email = req.email.trim().to_lowercase();

    let user = match User::find()
        .filter(user::Column::Email.eq(email.as_str()))
        .one(&app_state.db)
        .await
    {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                ApiResponse::<LoginResponse>::error("Invalid email or password".to_string()),
            )
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::error(format!("Login failed: {}", e)),
            )
        }
    };

    match verify_password(&req.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => {
            return (
                StatusCode::UNAUTHORIZED,
                ApiResponse::error("Invalid email or password".to_string()),
            )
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::error(format!("Login failed: {}", e)),
            )
        }
    }

    if !user.is_active {
        return (
            StatusCode::FORBIDDEN,
            ApiResponse::error("账号已被禁用".to_string()),
        );
    }

    match issue_token(&app_state, &user) {
        Ok(resp) => (StatusCode::OK, ApiResponse::success(resp)),
        Err(msg) => (StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::error(msg)),
    }
}

/// GET /api/auth/me - Current user
pub async fn me(
    Extension(app_state): Extension<AppState>,
    Extension(auth_user_opt): Extension<Option<AuthUser>>,
) -> impl IntoResponse {
    let auth_user = match require_user::<UserInfo>(auth_user_opt) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    match User::find_by_id(auth_user.id).one(&app_state.db).await {
        Ok(Some(user)) => (StatusCode::OK, ApiResponse::success(UserInfo::from(&user))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            ApiResponse::error("用户不存在".to_string()),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiResponse::error(format!("Failed to get user: {}", e)),
        ),
    }
}
