use axum::{
    extract::{Extension, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::db::entities::notification;
use crate::db::services::notification_service;
use crate::notifications::DigestEntry;
use crate::web::models::{AuthenticatedUser, NotificationListQuery};
use crate::web::{AppError, AppState};

const DEFAULT_LIST_LIMIT: u64 = 50;
const MAX_LIST_LIMIT: u64 = 200;

async fn list_notifications_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<NotificationListQuery>,
) -> Result<Json<Vec<notification::Model>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let notifications =
        notification_service::notifications_for_user(&app_state.db_pool, authenticated_user.id, limit)
            .await?;
    Ok(Json(notifications))
}

async fn digest_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<DigestEntry>>, AppError> {
    let digest = app_state
        .notification_engine
        .digest_for_user(authenticated_user.id, Utc::now())
        .await?;
    Ok(Json(digest))
}

/// On-demand trigger for the same sweep the scheduler runs.
async fn sweep_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<notification::Model>>, AppError> {
    info!(user_id = authenticated_user.id, "Notification sweep requested.");
    let emitted = app_state.notification_engine.run_sweep(Utc::now()).await?;
    Ok(Json(emitted))
}

pub fn create_notifications_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_notifications_handler))
        .route("/digest", get(digest_handler))
        .route("/sweep", post(sweep_handler))
}
