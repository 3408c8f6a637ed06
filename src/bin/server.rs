use clap::Parser;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use ecotrack::db::schema;
use ecotrack::notifications::{MessageTemplates, NotificationEngine};
use ecotrack::server::config::ServerConfig;
use ecotrack::services::analysis_service::OllamaAnalyzer;
use ecotrack::services::mail_service::{LogMailer, Mailer, WebhookMailer};
use ecotrack::services::oauth_service::ProviderVerifier;
use ecotrack::web::{self, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "ecotrack.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal.");
    }
    info!("Shutdown signal received.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Logging needs the log directory, so configuration errors go to stderr.
    let server_config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load server configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&server_config.log_dir);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting EcoTrack server.");

    // --- Database Setup ---
    let mut opt = ConnectOptions::new(server_config.database_url.clone());
    opt.max_connections(10).sqlx_logging(false);
    let db_pool: DatabaseConnection = Database::connect(opt).await?;
    schema::sync_schema(&db_pool).await?;

    // --- External Collaborators ---
    let mailer: Arc<dyn Mailer> = match &server_config.mail_webhook_url {
        Some(url) => Arc::new(WebhookMailer::new(url.clone())),
        None => {
            info!("No mail relay configured; outgoing mail will only be logged.");
            Arc::new(LogMailer)
        }
    };
    let identity_verifier = Arc::new(ProviderVerifier::new(
        server_config.google_client_id.clone(),
        server_config.apple_client_id.clone(),
    ));
    let analyzer = Arc::new(OllamaAnalyzer::new(
        server_config.ollama_url.clone(),
        server_config.ollama_model.clone(),
        Duration::from_secs(server_config.analysis_timeout_secs),
    ));

    // --- Notification Sweep ---
    let notification_engine = Arc::new(NotificationEngine::new(
        db_pool.clone(),
        MessageTemplates::with_overrides(&server_config.notification_templates),
    ));
    let sweep_handle = tokio::spawn({
        let engine = notification_engine.clone();
        let period = server_config.notification_interval_secs;
        async move {
            engine.start_periodic_sweep(period).await;
        }
    });

    // --- HTTP Server ---
    let app_state = Arc::new(AppState {
        db_pool,
        mailer,
        identity_verifier,
        analyzer,
        notification_engine,
        config: server_config.clone(),
    });
    let app = web::create_axum_router(app_state);

    let addr: SocketAddr = server_config.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening.");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweep_handle.abort();
    info!("Server stopped.");
    Ok(())
}
