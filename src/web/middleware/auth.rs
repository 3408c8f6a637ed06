use axum::{
    body::Body as AxumBody,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

use crate::services::auth_service;
use crate::web::models::{AuthenticatedUser, TokenKind};
use crate::web::{AppState, error::AppError};

pub const ACCESS_COOKIE: &str = "token";
pub const REFRESH_COOKIE: &str = "refresh_token";

pub async fn auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut req: Request<AxumBody>,
    next: Next,
) -> Result<Response, AppError> {
    // Try to get token from Authorization header first, then fall back to cookie
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(|s| s.to_string())
        .or_else(|| jar.get(ACCESS_COOKIE).map(|c| c.value().to_string()))
        .ok_or(AppError::InvalidCredentials)?;

    // Refresh tokens are only good for /auth/refresh.
    let claims = auth_service::decode_token(&token, TokenKind::Access, &state.config.jwt_secret)?;

    req.extensions_mut().insert(AuthenticatedUser { id: claims.user_id });
    Ok(next.run(req).await)
}
