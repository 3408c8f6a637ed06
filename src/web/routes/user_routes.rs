use axum::{
    extract::{Extension, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;

use crate::db::services::usage_service;
use crate::usage::UsageComparison;
use crate::web::models::{AnalysisResponse, AuthenticatedUser};
use crate::web::{AppError, AppState};

/// Month-over-month comparison across all of the caller's groups.
async fn my_comparison_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<UsageComparison>, AppError> {
    let comparison =
        usage_service::compare_user_usage(&app_state.db_pool, authenticated_user.id, Utc::now())
            .await?;
    Ok(Json(comparison))
}

async fn my_analysis_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<AnalysisResponse>, AppError> {
    let readings = usage_service::recent_readings_for_user(
        &app_state.db_pool,
        authenticated_user.id,
        Utc::now(),
    )
    .await?;
    if readings.is_empty() {
        return Err(AppError::EmptyDataset(
            "No usage readings in the last three months".to_string(),
        ));
    }
    let analysis = app_state.analyzer.analyze(&readings).await?;
    Ok(Json(AnalysisResponse {
        analysis,
        readings_analyzed: readings.len(),
    }))
}

pub fn create_users_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/me/comparison", get(my_comparison_handler))
        .route("/me/analysis", get(my_analysis_handler))
}
