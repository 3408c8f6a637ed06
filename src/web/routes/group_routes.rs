use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::db::entities::{device, group_member};
use crate::db::services::device_service::{self, DeviceUsageShare};
use crate::db::services::group_service::{self, GroupWithRole, MemberView, MembershipAction};
use crate::db::services::{usage_service, user_service};
use crate::services::mail_service;
use crate::usage::UsageComparison;
use crate::web::models::{
    AddDeviceRequest, AddLocationRequest, AddMemberRequest, AnalysisResponse, AuthenticatedUser,
    CreateGroupRequest, EditMemberRequest,
};
use crate::web::{AppError, AppState};

#[derive(Serialize)]
struct AddMemberResponse {
    membership: group_member::Model,
    invitation_sent: bool,
}

#[derive(Serialize)]
struct EditMemberResponse {
    membership: Option<group_member::Model>,
}

#[derive(Serialize)]
struct LocationsResponse {
    locations: Vec<String>,
}

async fn list_groups_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<GroupWithRole>>, AppError> {
    let groups = group_service::groups_for_user(&app_state.db_pool, authenticated_user.id).await?;
    Ok(Json(groups))
}

async fn create_group_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupWithRole>), AppError> {
    let (group, membership) =
        group_service::create_group(&app_state.db_pool, authenticated_user.id, &payload.name)
            .await?;
    Ok((
        StatusCode::CREATED,
        Json(GroupWithRole {
            id: group.id,
            locations: group_service::location_names(&group),
            name: group.name,
            is_admin: membership.is_admin,
            created_at: group.created_at,
        }),
    ))
}

async fn list_members_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
    Path(group_id): Path<i32>,
) -> Result<Json<Vec<MemberView>>, AppError> {
    group_service::ensure_member(&app_state.db_pool, group_id, authenticated_user.id).await?;
    let members = group_service::members_of(&app_state.db_pool, group_id).await?;
    Ok(Json(members))
}

async fn add_member_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
    Path(group_id): Path<i32>,
    Json(payload): Json<AddMemberRequest>,
) -> Result<(StatusCode, Json<AddMemberResponse>), AppError> {
    let db = &app_state.db_pool;
    group_service::ensure_admin(db, group_id, authenticated_user.id).await?;

    let invitee = user_service::find_by_email(db, &payload.email)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No account with email {}", payload.email)))?;
    let membership = group_service::add_membership(db, invitee.id, group_id).await?;

    // The membership stands even if the invitation cannot be delivered.
    let group = group_service::get_group(db, group_id).await?;
    let inviter = user_service::get_by_id(db, authenticated_user.id).await?;
    let invitation_sent = match mail_service::invitation_message(
        &invitee.email,
        &invitee.display_name,
        &group.name,
        &inviter.display_name,
    ) {
        Ok(message) => match app_state.mailer.send(&message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(group_id, user_id = invitee.id, error = %e, "Failed to send group invitation.");
                false
            }
        },
        Err(e) => {
            warn!(group_id, error = %e, "Failed to render group invitation.");
            false
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(AddMemberResponse {
            membership,
            invitation_sent,
        }),
    ))
}

async fn edit_member_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
    Path((group_id, user_id)): Path<(i32, i32)>,
    Json(payload): Json<EditMemberRequest>,
) -> Result<Json<EditMemberResponse>, AppError> {
    group_service::ensure_admin(&app_state.db_pool, group_id, authenticated_user.id).await?;
    let action: MembershipAction = payload.action.parse()?;
    let membership =
        group_service::edit_membership(&app_state.db_pool, group_id, user_id, action).await?;
    Ok(Json(EditMemberResponse { membership }))
}

async fn add_location_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
    Path(group_id): Path<i32>,
    Json(payload): Json<AddLocationRequest>,
) -> Result<Json<LocationsResponse>, AppError> {
    group_service::ensure_admin(&app_state.db_pool, group_id, authenticated_user.id).await?;
    let locations =
        group_service::add_location(&app_state.db_pool, group_id, &payload.location).await?;
    Ok(Json(LocationsResponse { locations }))
}

async fn list_devices_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
    Path(group_id): Path<i32>,
) -> Result<Json<Vec<device::Model>>, AppError> {
    group_service::ensure_member(&app_state.db_pool, group_id, authenticated_user.id).await?;
    let devices = device_service::devices_in_group(&app_state.db_pool, group_id).await?;
    Ok(Json(devices))
}

async fn add_device_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
    Path(group_id): Path<i32>,
    Json(payload): Json<AddDeviceRequest>,
) -> Result<(StatusCode, Json<device::Model>), AppError> {
    group_service::ensure_admin(&app_state.db_pool, group_id, authenticated_user.id).await?;
    let created = device_service::add_device(
        &app_state.db_pool,
        group_id,
        &payload.id,
        &payload.name,
        &payload.location,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn remove_device_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
    Path((group_id, device_id)): Path<(i32, String)>,
) -> Result<StatusCode, AppError> {
    group_service::ensure_admin(&app_state.db_pool, group_id, authenticated_user.id).await?;
    device_service::remove_device(&app_state.db_pool, group_id, &device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn usage_share_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
    Path(group_id): Path<i32>,
) -> Result<Json<Vec<DeviceUsageShare>>, AppError> {
    group_service::ensure_member(&app_state.db_pool, group_id, authenticated_user.id).await?;
    let shares = device_service::usage_share(&app_state.db_pool, group_id).await?;
    Ok(Json(shares))
}

async fn comparison_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
    Path(group_id): Path<i32>,
) -> Result<Json<UsageComparison>, AppError> {
    group_service::ensure_member(&app_state.db_pool, group_id, authenticated_user.id).await?;
    let comparison =
        usage_service::compare_group_usage(&app_state.db_pool, group_id, Utc::now()).await?;
    Ok(Json(comparison))
}

async fn analysis_handler(
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
    Path(group_id): Path<i32>,
) -> Result<Json<AnalysisResponse>, AppError> {
    group_service::ensure_member(&app_state.db_pool, group_id, authenticated_user.id).await?;
    let readings =
        usage_service::recent_readings_for_group(&app_state.db_pool, group_id, Utc::now()).await?;
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

pub fn create_groups_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_groups_handler).post(create_group_handler))
        .route("/{group_id}/members", get(list_members_handler).post(add_member_handler))
        .route("/{group_id}/members/{user_id}", put(edit_member_handler))
        .route("/{group_id}/locations", post(add_location_handler))
        .route("/{group_id}/devices", get(list_devices_handler).post(add_device_handler))
        .route("/{group_id}/devices/{device_id}", delete(remove_device_handler))
        .route("/{group_id}/usage-share", get(usage_share_handler))
        .route("/{group_id}/comparison", get(comparison_handler))
        .route("/{group_id}/analysis", get(analysis_handler))
}
