use serde::{Deserialize, Serialize};

use crate::db::entities::user;

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResendVerificationRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChangeEmailRequest {
    pub new_email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RefreshRequest {
    /// Falls back to the `refresh_token` cookie when absent.
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthLoginRequest {
    pub id_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i32,
    pub email: String,
    pub display_name: String,
    pub verified: bool,
    pub provider: Option<String>,
}

impl From<user::Model> for UserResponse {
    fn from(user: user::Model) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            verified: user.verified,
            provider: user.provider,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub user: UserResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

// JWT Claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // email
    pub user_id: i32,
    pub kind: TokenKind,
    pub iat: usize,
    pub exp: usize,
}

/// Struct to hold authenticated user details, to be passed as a request extension.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddMemberRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EditMemberRequest {
    /// `REMOVE`, `ADMIN_PERMS` or `MEMBER_PERMS`.
    pub action: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddLocationRequest {
    pub location: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddDeviceRequest {
    pub id: String,
    pub name: String,
    pub location: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UsageRangeQuery {
    pub range: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationListQuery {
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub analysis: String,
    pub readings_analyzed: usize,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
