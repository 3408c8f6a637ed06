use axum::{
    extract::{Extension, Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;

use crate::db::services::{device_service, group_service, usage_service};
use crate::usage::{BucketResult, Granularity};
use crate::web::models::{AuthenticatedUser, UsageRangeQuery};
use crate::web::{AppError, AppState};

const DEFAULT_RANGE: &str = "1d";

async fn device_usage_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Query(query): Query<UsageRangeQuery>,
) -> Result<Json<BucketResult>, AppError> {
    let granularity: Granularity = query.range.as_deref().unwrap_or(DEFAULT_RANGE).parse()?;

    let device = device_service::get_device(&app_state.db_pool, &device_id).await?;
    group_service::ensure_member(&app_state.db_pool, device.user_group_id, authenticated_user.id)
        .await?;

    let buckets =
        usage_service::get_usage_buckets(&app_state.db_pool, &device.id, granularity, Utc::now())
            .await?;
    Ok(Json(buckets))
}

pub fn create_devices_router() -> Router<Arc<AppState>> {
    Router::new().route("/{device_id}/usage", get(device_usage_handler))
}
