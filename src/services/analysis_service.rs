use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::usage::UsageReading;
use crate::web::error::AppError;

const ANALYSIS_PROMPT: &str = "Analyze the following water usage data and provide insights: ";
const THINK_END: &str = "</think>";

/// Produces a natural-language summary of a set of readings.
#[async_trait]
pub trait UsageAnalyzer: Send + Sync {
    async fn analyze(&self, readings: &[UsageReading]) -> Result<String, AppError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Talks to an Ollama server's `/api/generate` endpoint.
pub struct OllamaAnalyzer {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaAnalyzer {
    pub fn new(base_url: String, model: String, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            timeout,
        }
    }

    async fn generate(&self, prompt: String) -> Result<String, AppError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
        };

        let mut response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::TransientExternal(format!("Analysis request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(AppError::TransientExternal(format!(
                "Analysis service returned {}",
                response.status()
            )));
        }

        let mut pending = Vec::new();
        let mut text = String::new();
        while let Some(bytes) = response
            .chunk()
            .await
            .map_err(|e| AppError::TransientExternal(format!("Analysis stream broke: {e}")))?
        {
            pending.extend_from_slice(&bytes);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                if append_chunk(&line, &mut text)? {
                    return Ok(strip_reasoning(&text));
                }
            }
        }
        append_chunk(&pending, &mut text)?;
        Ok(strip_reasoning(&text))
    }
}

/// Appends one NDJSON line's `response` to `text`. Returns whether the
/// stream reported it is done.
fn append_chunk(line: &[u8], text: &mut String) -> Result<bool, AppError> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(false);
    }
    let chunk: GenerateChunk = serde_json::from_str(line).map_err(|e| {
        warn!(error = %e, "Unparseable analysis stream line.");
        AppError::TransientExternal(format!("Malformed analysis response: {e}"))
    })?;
    text.push_str(&chunk.response);
    Ok(chunk.done)
}

/// Drops a reasoning preamble that ends with `</think>`, if present.
pub fn strip_reasoning(text: &str) -> String {
    match text.find(THINK_END) {
        Some(idx) => text[idx + THINK_END.len()..].trim().to_string(),
        None => text.trim().to_string(),
    }
}

pub fn build_prompt(readings: &[UsageReading]) -> Result<String, AppError> {
    let payload = serde_json::json!({ "waterUsage": readings });
    Ok(format!("{ANALYSIS_PROMPT}{}", serde_json::to_string(&payload)?))
}

#[async_trait]
impl UsageAnalyzer for OllamaAnalyzer {
    async fn analyze(&self, readings: &[UsageReading]) -> Result<String, AppError> {
        let prompt = build_prompt(readings)?;
        debug!(readings = readings.len(), model = %self.model, "Requesting usage analysis.");
        timeout(self.timeout, self.generate(prompt))
            .await
            .map_err(|_| {
                AppError::TransientExternal(format!(
                    "Usage analysis timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
    }
}
