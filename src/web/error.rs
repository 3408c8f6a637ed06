use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::usage::UsageError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Group is full: {0}")]
    GroupFull(String),
    #[error("Unsupported range filter: {0}")]
    UnsupportedRange(String),
    #[error("Empty dataset: {0}")]
    EmptyDataset(String),
    #[error("Email conflict: {0}")]
    EmailConflict(String),
    #[error("Invalid action: {0}")]
    InvalidAction(String),
    #[error("Upstream service unavailable: {0}")]
    TransientExternal(String),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_)
            | AppError::UnsupportedRange(_)
            | AppError::InvalidAction(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) | AppError::EmptyDataset(_) => StatusCode::NOT_FOUND,
            AppError::GroupFull(_) | AppError::EmailConflict(_) | AppError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            AppError::TransientExternal(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InvalidCredentials | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::DatabaseError(_) | AppError::InternalServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether a client may retry the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientExternal(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = match self {
            AppError::InvalidInput(msg)
            | AppError::NotFound(msg)
            | AppError::GroupFull(msg)
            | AppError::EmptyDataset(msg)
            | AppError::EmailConflict(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::Conflict(msg)
            | AppError::InternalServerError(msg) => msg,
            AppError::UnsupportedRange(filter) => format!("Unsupported range filter: {filter}"),
            AppError::InvalidAction(action) => format!("Invalid action: {action}"),
            AppError::TransientExternal(msg) => format!("Upstream service unavailable: {msg}"),
            AppError::InvalidCredentials => "Invalid credentials".to_string(),
            AppError::DatabaseError(msg) => format!("Database error: {msg}"),
        };
        (status, Json(serde_json::json!({ "error": error_message }))).into_response()
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalServerError(format!("JSON serialization/deserialization error: {err}"))
    }
}

impl From<UsageError> for AppError {
    fn from(err: UsageError) -> Self {
        match err {
            UsageError::UnsupportedRange(filter) => AppError::UnsupportedRange(filter),
            UsageError::EmptyDataset(_) => AppError::EmptyDataset(err.to_string()),
        }
    }
}

impl From<tera::Error> for AppError {
    fn from(err: tera::Error) -> Self {
        AppError::InternalServerError(format!("Template rendering failed: {err}"))
    }
}
