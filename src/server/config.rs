use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::notifications::templates::TemplateOverrides;

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub jwt_secret: String,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_notification_interval_secs")]
    pub notification_interval_secs: u64,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,

    #[serde(default = "default_analysis_timeout_secs")]
    pub analysis_timeout_secs: u64,

    #[serde(default)]
    pub google_client_id: Option<String>,

    #[serde(default)]
    pub apple_client_id: Option<String>,

    /// HTTP relay for outgoing mail. Mail is only logged when unset.
    #[serde(default)]
    pub mail_webhook_url: Option<String>,

    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,

    #[serde(default)]
    pub notification_templates: TemplateOverrides,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    database_url: Option<String>,
    jwt_secret: Option<String>,
    listen_addr: Option<String>,
    log_dir: Option<String>,
    notification_interval_secs: Option<u64>,
    ollama_url: Option<String>,
    ollama_model: Option<String>,
    analysis_timeout_secs: Option<u64>,
    google_client_id: Option<String>,
    apple_client_id: Option<String>,
    mail_webhook_url: Option<String>,
    bcrypt_cost: Option<u32>,
    notification_template_increase: Option<String>,
    notification_template_decrease: Option<String>,
    notification_template_unchanged: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_notification_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "deepseek-r1:8b".to_string()
}

fn default_analysis_timeout_secs() -> u64 {
    120
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config: PartialServerConfig = if let Some(path_str) = config_path {
            let path = Path::new(path_str);
            if path.exists() {
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            } else {
                PartialServerConfig::default()
            }
        } else {
            PartialServerConfig::default()
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        // 3. Merge: environment overrides file
        Self::merge(env_config, file_config)
    }

    fn merge(env: PartialServerConfig, file: PartialServerConfig) -> Result<Self, String> {
        Ok(ServerConfig {
            database_url: env.database_url.or(file.database_url)
                .ok_or("DATABASE_URL is required")?,
            jwt_secret: env.jwt_secret.or(file.jwt_secret)
                .ok_or("JWT_SECRET is required")?,
            listen_addr: env.listen_addr.or(file.listen_addr)
                .unwrap_or_else(default_listen_addr),
            log_dir: env.log_dir.or(file.log_dir)
                .unwrap_or_else(default_log_dir),
            notification_interval_secs: env.notification_interval_secs.or(file.notification_interval_secs)
                .unwrap_or_else(default_notification_interval_secs),
            ollama_url: env.ollama_url.or(file.ollama_url)
                .unwrap_or_else(default_ollama_url),
            ollama_model: env.ollama_model.or(file.ollama_model)
                .unwrap_or_else(default_ollama_model),
            analysis_timeout_secs: env.analysis_timeout_secs.or(file.analysis_timeout_secs)
                .unwrap_or_else(default_analysis_timeout_secs),
            google_client_id: env.google_client_id.or(file.google_client_id),
            apple_client_id: env.apple_client_id.or(file.apple_client_id),
            mail_webhook_url: env.mail_webhook_url.or(file.mail_webhook_url),
            bcrypt_cost: env.bcrypt_cost.or(file.bcrypt_cost)
                .unwrap_or_else(default_bcrypt_cost),
            notification_templates: TemplateOverrides {
                increase: env.notification_template_increase.or(file.notification_template_increase),
                decrease: env.notification_template_decrease.or(file.notification_template_decrease),
                unchanged: env.notification_template_unchanged.or(file.notification_template_unchanged),
            },
        })
    }

    /// Configuration for tests and local tooling: no external providers,
    /// cheap password hashing.
    pub fn for_testing(database_url: &str, jwt_secret: &str) -> Self {
        ServerConfig {
            database_url: database_url.to_string(),
            jwt_secret: jwt_secret.to_string(),
            listen_addr: default_listen_addr(),
            log_dir: default_log_dir(),
            notification_interval_secs: default_notification_interval_secs(),
            ollama_url: default_ollama_url(),
            ollama_model: default_ollama_model(),
            analysis_timeout_secs: 5,
            google_client_id: None,
            apple_client_id: None,
            mail_webhook_url: None,
            bcrypt_cost: 4,
            notification_templates: TemplateOverrides::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_overrides_file() {
        let file: PartialServerConfig = toml::from_str(
            r#"
            database_url = "postgres://file/db"
            jwt_secret = "file-secret"
            listen_addr = "127.0.0.1:9000"
            notification_template_increase = "up {{ percent }}"
            "#,
        )
        .unwrap();
        let env = PartialServerConfig {
            jwt_secret: Some("env-secret".to_string()),
            ..Default::default()
        };

        let config = ServerConfig::merge(env, file).unwrap();
        assert_eq!(config.database_url, "postgres://file/db");
        assert_eq!(config.jwt_secret, "env-secret");
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.notification_interval_secs, 86_400);
        assert_eq!(config.ollama_model, "deepseek-r1:8b");
        assert_eq!(
            config.notification_templates.increase.as_deref(),
            Some("up {{ percent }}")
        );
    }

    #[test]
    fn secrets_are_required() {
        let err = ServerConfig::merge(PartialServerConfig::default(), PartialServerConfig::default())
            .unwrap_err();
        assert_eq!(err, "DATABASE_URL is required");
    }
}
