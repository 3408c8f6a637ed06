use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::sync::Arc;

use crate::db::services::user_service;
use crate::services::auth_service;
use crate::services::oauth_service::OAuthProvider;
use crate::web::middleware::auth::{ACCESS_COOKIE, REFRESH_COOKIE};
use crate::web::models::{
    AuthenticatedUser, ChangeEmailRequest, ForgotPasswordRequest, LoginRequest, LoginResponse,
    MessageResponse, OAuthLoginRequest, RefreshRequest, RegisterRequest,
    ResendVerificationRequest, ResetPasswordRequest, UserResponse, VerifyEmailRequest,
};
use crate::web::{AppError, AppState};

fn session_cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(true)
        .build()
}

fn with_session_cookies(jar: CookieJar, login: LoginResponse) -> impl IntoResponse {
    let jar = jar
        .add(session_cookie(ACCESS_COOKIE, login.token.clone()))
        .add(session_cookie(REFRESH_COOKIE, login.refresh_token.clone()));
    (jar, Json(login))
}

async fn register_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = auth_service::register_user(
        &app_state.db_pool,
        app_state.mailer.as_ref(),
        payload,
        &app_state.config,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn verify_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<VerifyEmailRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = auth_service::verify_email(&app_state.db_pool, &payload.email, &payload.code).await?;
    Ok(Json(user))
}

async fn resend_verification_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<ResendVerificationRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    auth_service::resend_verification(&app_state.db_pool, app_state.mailer.as_ref(), &payload.email)
        .await?;
    Ok(Json(MessageResponse::new("Verification code sent")))
}

async fn forgot_password_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    auth_service::forgot_password(&app_state.db_pool, app_state.mailer.as_ref(), &payload.email)
        .await?;
    Ok(Json(MessageResponse::new("Password reset code sent")))
}

async fn reset_password_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    auth_service::reset_password(&app_state.db_pool, payload, &app_state.config).await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}

async fn login_handler(
    State(app_state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let login_response =
        auth_service::login_user(&app_state.db_pool, payload, &app_state.config).await?;
    Ok(with_session_cookies(jar, login_response))
}

async fn refresh_handler(
    State(app_state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let refresh_token = payload
        .and_then(|Json(body)| body.refresh_token)
        .or_else(|| jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()))
        .ok_or_else(|| AppError::Unauthorized("Refresh token is required".to_string()))?;

    let login_response =
        auth_service::refresh_session(&app_state.db_pool, &refresh_token, &app_state.config)
            .await?;
    Ok(with_session_cookies(jar, login_response))
}

async fn oauth_login_handler(
    State(app_state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    jar: CookieJar,
    Json(payload): Json<OAuthLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let provider: OAuthProvider = provider.parse()?;
    let login_response = auth_service::oauth_login(
        &app_state.db_pool,
        app_state.identity_verifier.as_ref(),
        provider,
        &payload.id_token,
        &app_state.config,
    )
    .await?;
    Ok(with_session_cookies(jar, login_response))
}

async fn logout_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    auth_service::logout_user(&app_state.db_pool, authenticated_user.id).await?;
    let jar = jar
        .remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path("/"));
    Ok((jar, Json(MessageResponse::new("Logged out"))))
}

async fn change_email_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<ChangeEmailRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = auth_service::change_email(
        &app_state.db_pool,
        app_state.mailer.as_ref(),
        authenticated_user.id,
        payload,
    )
    .await?;
    Ok(Json(user))
}

async fn me_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<UserResponse>, AppError> {
    let user = user_service::get_by_id(&app_state.db_pool, authenticated_user.id).await?;
    Ok(Json(user.into()))
}

/// Routes reachable without a session, nested under `/auth`.
pub fn create_auth_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register_handler))
        .route("/verify", post(verify_handler))
        .route("/resend-verification", post(resend_verification_handler))
        .route("/forgot-password", post(forgot_password_handler))
        .route("/reset-password", post(reset_password_handler))
        .route("/login", post(login_handler))
        .route("/refresh", post(refresh_handler))
        .route("/oauth/{provider}", post(oauth_login_handler))
}

/// Session routes that need an access token.
pub fn create_session_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/logout", post(logout_handler))
        .route("/auth/me", get(me_handler))
        .route("/auth/change-email", post(change_email_handler))
}
