#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};

use ecotrack::db::entities::{device, user, user_group, water_usage};
use ecotrack::db::schema;
use ecotrack::db::services::{device_service, group_service, user_service::OAuthIdentity};
use ecotrack::notifications::{MessageTemplates, NotificationEngine};
use ecotrack::server::config::ServerConfig;
use ecotrack::services::analysis_service::UsageAnalyzer;
use ecotrack::services::auth_service;
use ecotrack::services::mail_service::{MailError, MailMessage, Mailer};
use ecotrack::services::oauth_service::{IdentityVerifier, OAuthProvider};
use ecotrack::usage::UsageReading;
use ecotrack::web::models::TokenKind;
use ecotrack::web::{AppError, AppState};

pub const JWT_SECRET: &str = "test-secret";
pub const PASSWORD: &str = "correct-horse";

pub async fn setup_db() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    // A single connection keeps every query on the same in-memory database.
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.expect("connect to sqlite");
    schema::sync_schema(&db).await.expect("create schema");
    db
}

pub fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

pub async fn create_user(db: &DatabaseConnection, email: &str, verified: bool) -> user::Model {
    user::ActiveModel {
        email: Set(email.to_string()),
        password_hash: Set(Some(bcrypt::hash(PASSWORD, 4).unwrap())),
        display_name: Set(email.split('@').next().unwrap().to_string()),
        verified: Set(verified),
        verify_token: Set(None),
        refresh_token: Set(None),
        reset_token: Set(None),
        provider: Set(None),
        provider_id: Set(None),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn create_group(
    db: &DatabaseConnection,
    admin: &user::Model,
    name: &str,
) -> user_group::Model {
    group_service::create_group(db, admin.id, name).await.unwrap().0
}

pub async fn create_device(
    db: &DatabaseConnection,
    group: &user_group::Model,
    id: &str,
    name: &str,
) -> device::Model {
    device_service::add_device(db, group.id, id, name, "Kitchen")
        .await
        .unwrap()
}

pub async fn insert_reading(
    db: &DatabaseConnection,
    device_id: &str,
    total_usage: f64,
    flow_rate: f64,
    recorded_at: DateTime<Utc>,
) -> water_usage::Model {
    water_usage::ActiveModel {
        device_id: Set(device_id.to_string()),
        flow_rate: Set(flow_rate),
        total_usage: Set(total_usage),
        recorded_at: Set(recorded_at),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub fn access_token(user: &user::Model) -> String {
    auth_service::create_token(user, TokenKind::Access, JWT_SECRET).unwrap()
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<MailMessage>>,
}

impl RecordingMailer {
    pub fn messages(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// A mail relay that is down.
pub struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _message: &MailMessage) -> Result<(), MailError> {
        Err(MailError::SendFailed("relay unavailable".to_string()))
    }
}

/// Returns the code that follows `marker` in a mail body.
pub fn code_after(body: &str, marker: &str) -> String {
    let start = body.find(marker).unwrap() + marker.len();
    body[start..start + 6].to_string()
}

/// Accepts a fixed set of tokens, each mapped to an identity.
#[derive(Default)]
pub struct StaticVerifier {
    pub identities: HashMap<String, OAuthIdentity>,
}

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(
        &self,
        provider: OAuthProvider,
        id_token: &str,
    ) -> Result<OAuthIdentity, AppError> {
        self.identities
            .get(id_token)
            .filter(|identity| identity.provider == provider.as_str())
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Invalid token".to_string()))
    }
}

pub struct CannedAnalyzer(pub String);

#[async_trait]
impl UsageAnalyzer for CannedAnalyzer {
    async fn analyze(&self, readings: &[UsageReading]) -> Result<String, AppError> {
        Ok(format!("{} ({} readings)", self.0, readings.len()))
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub mailer: Arc<RecordingMailer>,
}

pub fn test_app(db: DatabaseConnection, verifier: StaticVerifier) -> TestApp {
    let mailer = Arc::new(RecordingMailer::default());
    let engine = Arc::new(NotificationEngine::new(db.clone(), MessageTemplates::default()));
    let state = Arc::new(AppState {
        db_pool: db,
        mailer: mailer.clone(),
        identity_verifier: Arc::new(verifier),
        analyzer: Arc::new(CannedAnalyzer("Usage looks steady".to_string())),
        notification_engine: engine,
        config: Arc::new(ServerConfig::for_testing("sqlite::memory:", JWT_SECRET)),
    });
    TestApp { state, mailer }
}
