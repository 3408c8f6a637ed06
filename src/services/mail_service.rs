use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;
use tracing::info;

use crate::web::error::AppError;

const VERIFICATION_SUBJECT: &str = "Verify your EcoTrack account";
const VERIFICATION_BODY: &str = "Hi {{ name }},\n\nYour EcoTrack verification code is {{ code }}.\nEnter it in the app to activate your account.\n";
const RESET_SUBJECT: &str = "Reset your EcoTrack password";
const RESET_BODY: &str = "Hi {{ name }},\n\nYour EcoTrack password reset code is {{ code }}.\nIgnore this message if you did not ask to reset your password.\n";
const INVITATION_SUBJECT: &str = "You have been added to {{ group }} on EcoTrack";
const INVITATION_BODY: &str = "Hi {{ name }},\n\n{{ inviter }} added you to the household group \"{{ group }}\". Open the app to see its devices and water usage.\n";

#[derive(Error, Debug)]
pub enum MailError {
    #[error("Failed to send mail: {0}")]
    SendFailed(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Templating error: {0}")]
    TemplatingError(#[from] tera::Error),
}

impl From<MailError> for AppError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::TemplatingError(e) => AppError::InternalServerError(e.to_string()),
            other => AppError::TransientExternal(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

/// Hands messages to an HTTP mail relay as JSON (`to`, `subject`, `body`).
pub struct WebhookMailer {
    client: Client,
    url: String,
}

impl WebhookMailer {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        let response = self.client.post(&self.url).json(message).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(MailError::SendFailed(format!(
                "Mail relay returned non-success status: {status}. Body: {error_body}"
            )));
        }
        Ok(())
    }
}

/// Writes messages to the log instead of delivering them. Used when no relay
/// is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        info!(to = %message.to, subject = %message.subject, body = %message.body, "Mail not delivered (no relay configured).");
        Ok(())
    }
}

pub fn verification_message(to: &str, name: &str, code: &str) -> Result<MailMessage, MailError> {
    let mut context = Context::new();
    context.insert("name", name);
    context.insert("code", code);
    Ok(MailMessage {
        to: to.to_string(),
        subject: VERIFICATION_SUBJECT.to_string(),
        body: Tera::one_off(VERIFICATION_BODY, &context, false)?,
    })
}

pub fn password_reset_message(to: &str, name: &str, code: &str) -> Result<MailMessage, MailError> {
    let mut context = Context::new();
    context.insert("name", name);
    context.insert("code", code);
    Ok(MailMessage {
        to: to.to_string(),
        subject: RESET_SUBJECT.to_string(),
        body: Tera::one_off(RESET_BODY, &context, false)?,
    })
}

pub fn invitation_message(
    to: &str,
    name: &str,
    group: &str,
    inviter: &str,
) -> Result<MailMessage, MailError> {
    let mut context = Context::new();
    context.insert("name", name);
    context.insert("group", group);
    context.insert("inviter", inviter);
    Ok(MailMessage {
        to: to.to_string(),
        subject: Tera::one_off(INVITATION_SUBJECT, &context, false)?,
        body: Tera::one_off(INVITATION_BODY, &context, false)?,
    })
}
