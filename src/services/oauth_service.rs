use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::db::services::user_service::OAuthIdentity;
use crate::web::error::AppError;

const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const APPLE_KEYS_URL: &str = "https://appleid.apple.com/auth/keys";
const APPLE_ISSUER: &str = "https://appleid.apple.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
    Apple,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Apple => "apple",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuthProvider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            "apple" => Ok(OAuthProvider::Apple),
            _ => Err(AppError::InvalidInput(format!("Unsupported OAuth provider: {s}"))),
        }
    }
}

/// Checks a provider-issued ID token and returns the identity it asserts.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, provider: OAuthProvider, id_token: &str) -> Result<OAuthIdentity, AppError>;
}

#[derive(Debug, Deserialize)]
struct GoogleTokenInfo {
    aud: String,
    sub: String,
    email: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AppleClaims {
    sub: String,
    email: Option<String>,
}

/// Verifies Google tokens through the tokeninfo endpoint and Apple tokens
/// against Apple's published signing keys.
pub struct ProviderVerifier {
    client: Client,
    google_client_id: Option<String>,
    apple_client_id: Option<String>,
}

impl ProviderVerifier {
    pub fn new(google_client_id: Option<String>, apple_client_id: Option<String>) -> Self {
        Self {
            client: Client::new(),
            google_client_id,
            apple_client_id,
        }
    }

    async fn verify_google(&self, id_token: &str) -> Result<OAuthIdentity, AppError> {
        let client_id = self.google_client_id.as_deref().ok_or_else(|| {
            AppError::InternalServerError("Google sign-in is not configured".to_string())
        })?;

        let response = self
            .client
            .get(GOOGLE_TOKENINFO_URL)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| AppError::TransientExternal(format!("Google token check failed: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(AppError::Unauthorized("Invalid Google ID token".to_string()));
        }
        if !status.is_success() {
            return Err(AppError::TransientExternal(format!(
                "Google token check returned {status}"
            )));
        }

        let info: GoogleTokenInfo = response.json().await.map_err(|e| {
            AppError::TransientExternal(format!("Failed to parse Google token info: {e}"))
        })?;
        if info.aud != client_id {
            warn!(aud = %info.aud, "Google ID token issued for another client.");
            return Err(AppError::Unauthorized("Google ID token audience mismatch".to_string()));
        }
        let email = info
            .email
            .ok_or_else(|| AppError::Unauthorized("Google ID token has no email".to_string()))?;

        Ok(OAuthIdentity {
            provider: OAuthProvider::Google.to_string(),
            provider_id: info.sub,
            email,
            display_name: info.name,
        })
    }

    async fn verify_apple(&self, id_token: &str) -> Result<OAuthIdentity, AppError> {
        let client_id = self.apple_client_id.as_deref().ok_or_else(|| {
            AppError::InternalServerError("Apple sign-in is not configured".to_string())
        })?;

        let header = decode_header(id_token)
            .map_err(|_| AppError::Unauthorized("Malformed Apple ID token".to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| AppError::Unauthorized("Apple ID token has no key id".to_string()))?;

        let keys: JwkSet = self
            .client
            .get(APPLE_KEYS_URL)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::TransientExternal(format!("Failed to fetch Apple keys: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::TransientExternal(format!("Failed to parse Apple keys: {e}")))?;

        let jwk = keys
            .find(&kid)
            .ok_or_else(|| AppError::Unauthorized("Unknown Apple signing key".to_string()))?;
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| AppError::TransientExternal(format!("Unusable Apple signing key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[client_id]);
        validation.set_issuer(&[APPLE_ISSUER]);

        let claims = decode::<AppleClaims>(id_token, &key, &validation)
            .map_err(|e| {
                warn!(error = ?e, "Apple ID token rejected.");
                AppError::Unauthorized("Invalid Apple ID token".to_string())
            })?
            .claims;
        let email = claims
            .email
            .ok_or_else(|| AppError::Unauthorized("Apple ID token has no email".to_string()))?;

        Ok(OAuthIdentity {
            provider: OAuthProvider::Apple.to_string(),
            provider_id: claims.sub,
            email,
            display_name: None,
        })
    }
}

#[async_trait]
impl IdentityVerifier for ProviderVerifier {
    async fn verify(&self, provider: OAuthProvider, id_token: &str) -> Result<OAuthIdentity, AppError> {
        match provider {
            OAuthProvider::Google => self.verify_google(id_token).await,
            OAuthProvider::Apple => self.verify_apple(id_token).await,
        }
    }
}
