use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use std::sync::Arc;

use crate::db::services::usage_service::{self, NewUsageReading};
use crate::usage::UsageReading;
use crate::web::{AppError, AppState};

/// Telemetry ingestion. Sensors push without a user session.
async fn record_usage_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<NewUsageReading>,
) -> Result<(StatusCode, Json<UsageReading>), AppError> {
    let reading = usage_service::record_usage_reading(&app_state.db_pool, payload).await?;
    Ok((StatusCode::CREATED, Json(reading)))
}

pub fn create_ingest_router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(record_usage_handler))
}
