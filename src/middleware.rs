use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};

use crate::{jwt, AppState};

/// Current authenticated user information extracted from JWT
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: i64,
    pub email: String,
    pub is_admin: bool,
}

/// Extract bearer token from Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let auth_header = headers
        .get("authorization")
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_str()
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)
}

impl AuthUser {
    /// Create AuthUser from headers
    pub fn from_headers(headers: &HeaderMap, jwt_secret: &str) -> Result<Self, StatusCode> {
        let token = extract_bearer_token(headers)?;
        let claims = jwt::verify_token(token, jwt_secret).map_err(|_| StatusCode::UNAUTHORIZED)?;

        Ok(AuthUser {
            id: claims.sub,
            email: claims.email,
            is_admin: claims.is_admin,
        })
    }
}

/// Middleware to extract and store AuthUser in request extensions
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let auth_user = request
        .extensions()
        .get::<AppState>()
        .and_then(|state| AuthUser::from_headers(request.headers(), &state.jwt_secret).ok());
    request.extensions_mut().insert(auth_user);
    next.run(request).await
}
