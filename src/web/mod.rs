use axum::{
    http::Method,
    middleware as axum_middleware,
    routing::get,
    Router,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::notifications::NotificationEngine;
use crate::server::config::ServerConfig;
use crate::services::analysis_service::UsageAnalyzer;
use crate::services::mail_service::Mailer;
use crate::services::oauth_service::IdentityVerifier;
use crate::web::middleware::auth;

pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;

pub use error::AppError;

/// Everything a handler needs. External collaborators sit behind traits so
/// tests can swap them.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: DatabaseConnection,
    pub mailer: Arc<dyn Mailer>,
    pub identity_verifier: Arc<dyn IdentityVerifier>,
    pub analyzer: Arc<dyn UsageAnalyzer>,
    pub notification_engine: Arc<NotificationEngine>,
    pub config: Arc<ServerConfig>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_axum_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let public_api = Router::new()
        .route("/health", get(health_check_handler))
        .nest("/auth", routes::auth_routes::create_auth_router())
        .nest("/usage", routes::usage_routes::create_ingest_router());

    let protected_api = Router::new()
        .merge(routes::auth_routes::create_session_router())
        .nest("/devices", routes::device_routes::create_devices_router())
        .nest("/groups", routes::group_routes::create_groups_router())
        .nest("/users", routes::user_routes::create_users_router())
        .nest("/notifications", routes::notification_routes::create_notifications_router())
        .route_layer(axum_middleware::from_fn_with_state(app_state.clone(), auth::auth));

    Router::new()
        .nest("/api", public_api.merge(protected_api))
        .with_state(app_state)
        .layer(cors)
}
