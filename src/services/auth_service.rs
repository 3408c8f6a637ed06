use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::{distr::Alphanumeric, Rng};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tracing::{info, warn};

use crate::db::entities::user;
use crate::db::services::user_service;
use crate::server::config::ServerConfig;
use crate::services::mail_service::{self, Mailer};
use crate::services::oauth_service::{IdentityVerifier, OAuthProvider};
use crate::web::error::AppError;
use crate::web::models::{
    ChangeEmailRequest, Claims, LoginRequest, LoginResponse, RegisterRequest,
    ResetPasswordRequest, TokenKind, UserResponse,
};

pub const ACCESS_TOKEN_TTL_MINUTES: i64 = 15;
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 30;
const OTP_LENGTH: usize = 6;
const MIN_PASSWORD_LENGTH: usize = 8;

/// Six random alphanumeric characters.
pub fn generate_otp() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(OTP_LENGTH)
        .map(char::from)
        .collect()
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

pub async fn register_user(
    db: &DatabaseConnection,
    mailer: &dyn Mailer,
    req: RegisterRequest,
    config: &ServerConfig,
) -> Result<UserResponse, AppError> {
    let email = user_service::normalize_email(&req.email);
    if !looks_like_email(&email) {
        return Err(AppError::InvalidInput("A valid email address is required".to_string()));
    }
    check_password_length(&req.password)?;

    let password_hash = hash(&req.password, config.bcrypt_cost)
        .map_err(|e| AppError::InternalServerError(format!("Password hashing failed: {e}")))?;
    let display_name = req
        .display_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
    let code = generate_otp();

    // The account only exists once the verification mail went out.
    let txn = db.begin().await?;
    let created =
        user_service::create_local_user(&txn, &email, &display_name, password_hash, code.clone())
            .await?;
    let message = mail_service::verification_message(&created.email, &created.display_name, &code)?;
    mailer.send(&message).await?;
    txn.commit().await?;

    info!(user_id = created.id, "Registered user.");
    Ok(created.into())
}

pub async fn verify_email(
    db: &DatabaseConnection,
    email: &str,
    code: &str,
) -> Result<UserResponse, AppError> {
    let user = user_service::find_by_email(db, email)
        .await?
        .ok_or_else(|| AppError::NotFound("No account with this email".to_string()))?;
    if user.verified {
        return Ok(user.into());
    }
    if user.verify_token.as_deref() != Some(code.trim()) {
        return Err(AppError::InvalidInput("Verification code is incorrect".to_string()));
    }
    let verified = user_service::mark_verified(db, user).await?;
    info!(user_id = verified.id, "Verified email address.");
    Ok(verified.into())
}

pub async fn resend_verification(
    db: &DatabaseConnection,
    mailer: &dyn Mailer,
    email: &str,
) -> Result<(), AppError> {
    let user = user_service::find_by_email(db, email)
        .await?
        .ok_or_else(|| AppError::NotFound("No account with this email".to_string()))?;
    if user.verified {
        return Err(AppError::InvalidInput("Email address is already verified".to_string()));
    }
    let code = generate_otp();
    let user = user_service::set_verify_token(db, user, Some(code.clone())).await?;
    let message = mail_service::verification_message(&user.email, &user.display_name, &code)?;
    mailer.send(&message).await?;
    Ok(())
}

fn check_password(user: &user::Model, password: &str) -> Result<(), AppError> {
    // OAuth-only accounts have no password.
    let password_hash = user
        .password_hash
        .as_ref()
        .ok_or(AppError::InvalidCredentials)?;
    let valid_password = verify(password, password_hash)
        .map_err(|e| AppError::InternalServerError(format!("Password verification failed: {e}")))?;
    if !valid_password {
        return Err(AppError::InvalidCredentials);
    }
    Ok(())
}

fn check_password_length(password: &str) -> Result<(), AppError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::InvalidInput(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

pub async fn login_user(
    db: &DatabaseConnection,
    req: LoginRequest,
    config: &ServerConfig,
) -> Result<LoginResponse, AppError> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::InvalidInput("Email and password are required".to_string()));
    }

    let user = user_service::find_by_email(db, &req.email)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    check_password(&user, &req.password)?;
    if !user.verified {
        return Err(AppError::Forbidden("Email address has not been verified".to_string()));
    }

    issue_session(db, user, config).await
}

/// Trades a valid, still-stored refresh token for a new token pair. The old
/// refresh token stops working.
pub async fn refresh_session(
    db: &DatabaseConnection,
    refresh_token: &str,
    config: &ServerConfig,
) -> Result<LoginResponse, AppError> {
    let claims = decode_token(refresh_token, TokenKind::Refresh, &config.jwt_secret)?;
    let user = user_service::find_by_id(db, claims.user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Unknown user".to_string()))?;
    if user.refresh_token.as_deref() != Some(refresh_token) {
        warn!(user_id = user.id, "Rejected revoked refresh token.");
        return Err(AppError::Unauthorized("Refresh token has been revoked".to_string()));
    }
    issue_session(db, user, config).await
}

/// Moves a password account to a new email address after re-checking the
/// password. The account is unverified until the code sent to the new
/// address is confirmed.
pub async fn change_email(
    db: &DatabaseConnection,
    mailer: &dyn Mailer,
    user_id: i32,
    req: ChangeEmailRequest,
) -> Result<UserResponse, AppError> {
    let new_email = user_service::normalize_email(&req.new_email);
    if !looks_like_email(&new_email) {
        return Err(AppError::InvalidInput("A valid email address is required".to_string()));
    }

    let txn = db.begin().await?;
    let user = user_service::get_by_id(&txn, user_id).await?;
    check_password(&user, &req.password)?;
    if user.email == new_email {
        return Err(AppError::InvalidInput(
            "New email is the same as the current one".to_string(),
        ));
    }
    if user_service::find_by_email(&txn, &new_email).await?.is_some() {
        return Err(AppError::EmailConflict(format!("Email {new_email} is already registered")));
    }

    let code = generate_otp();
    let updated = user_service::update_email(&txn, user, &new_email, code.clone()).await?;
    let message = mail_service::verification_message(&updated.email, &updated.display_name, &code)?;
    mailer.send(&message).await?;
    txn.commit().await?;

    info!(user_id, "Changed account email.");
    Ok(updated.into())
}

/// Mails a one-time reset code to a verified account.
pub async fn forgot_password(
    db: &DatabaseConnection,
    mailer: &dyn Mailer,
    email: &str,
) -> Result<(), AppError> {
    let txn = db.begin().await?;
    let user = user_service::find_by_email(&txn, email)
        .await?
        .ok_or_else(|| AppError::NotFound("No account with this email".to_string()))?;
    if !user.verified {
        return Err(AppError::Forbidden("Email address has not been verified".to_string()));
    }

    let code = generate_otp();
    let user = user_service::set_reset_token(&txn, user, Some(code.clone())).await?;
    let message = mail_service::password_reset_message(&user.email, &user.display_name, &code)?;
    mailer.send(&message).await?;
    txn.commit().await?;
    Ok(())
}

/// Sets a new password when the reset code matches. Every session of the
/// account is revoked.
pub async fn reset_password(
    db: &DatabaseConnection,
    req: ResetPasswordRequest,
    config: &ServerConfig,
) -> Result<(), AppError> {
    check_password_length(&req.new_password)?;
    let user = user_service::find_by_email(db, &req.email)
        .await?
        .ok_or_else(|| AppError::NotFound("No account with this email".to_string()))?;
    if user.reset_token.as_deref() != Some(req.code.trim()) {
        warn!(user_id = user.id, "Rejected password reset code.");
        return Err(AppError::InvalidInput("Reset code is incorrect".to_string()));
    }

    let password_hash = hash(&req.new_password, config.bcrypt_cost)
        .map_err(|e| AppError::InternalServerError(format!("Password hashing failed: {e}")))?;
    let user = user_service::set_password(db, user, password_hash).await?;
    info!(user_id = user.id, "Reset password.");
    Ok(())
}

pub async fn logout_user(db: &DatabaseConnection, user_id: i32) -> Result<(), AppError> {
    user_service::store_refresh_token(db, user_id, None).await
}

pub async fn oauth_login(
    db: &DatabaseConnection,
    verifier: &dyn IdentityVerifier,
    provider: OAuthProvider,
    id_token: &str,
    config: &ServerConfig,
) -> Result<LoginResponse, AppError> {
    let identity = verifier.verify(provider, id_token).await?;
    let user = user_service::link_oauth_identity(db, identity).await?;
    issue_session(db, user, config).await
}

async fn issue_session(
    db: &DatabaseConnection,
    user: user::Model,
    config: &ServerConfig,
) -> Result<LoginResponse, AppError> {
    let token = create_token(&user, TokenKind::Access, &config.jwt_secret)?;
    let refresh_token = create_token(&user, TokenKind::Refresh, &config.jwt_secret)?;
    user_service::store_refresh_token(db, user.id, Some(refresh_token.clone())).await?;

    Ok(LoginResponse {
        token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: ACCESS_TOKEN_TTL_MINUTES * 60,
        user: user.into(),
    })
}

pub fn create_token(user: &user::Model, kind: TokenKind, jwt_secret: &str) -> Result<String, AppError> {
    let now = Utc::now();
    let ttl = match kind {
        TokenKind::Access => Duration::minutes(ACCESS_TOKEN_TTL_MINUTES),
        TokenKind::Refresh => Duration::days(REFRESH_TOKEN_TTL_DAYS),
    };

    let claims = Claims {
        sub: user.email.clone(),
        user_id: user.id,
        kind,
        iat: now.timestamp() as usize,
        exp: (now + ttl).timestamp() as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(jwt_secret.as_ref()))
        .map_err(|e| AppError::InternalServerError(format!("Token creation failed: {e}")))
}

/// Decodes and validates a token, insisting on the expected kind.
pub fn decode_token(token: &str, expected: TokenKind, jwt_secret: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_ref()),
        &Validation::default(),
    )
    .map_err(|e| {
        warn!(error = ?e, "JWT decoding failed.");
        AppError::Unauthorized("Invalid or expired token".to_string())
    })?;

    if token_data.claims.kind != expected {
        return Err(AppError::Unauthorized("Wrong token type".to_string()));
    }
    Ok(token_data.claims)
}
