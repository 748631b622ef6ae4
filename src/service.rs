//! Hosted model service abstraction and the Gemini implementation.
//!
//! Defines the [`AiService`] trait used by the upload and completion stages,
//! and [`GeminiClient`], which talks to the Google Generative Language API:
//!
//! - **Uploads** use the Files API resumable protocol: a `start` request
//!   returns an upload URL, the bytes are sent with `upload, finalize`, and
//!   the file is polled until its `state` is `ACTIVE`.
//! - **Completions** call `models/{model}:generateContent` with a single
//!   user turn built from a [`PromptDocument`].
//!
//! The client is constructed once per run and passed by reference to every
//! stage. It never retries on its own; callers wrap calls in [`with_retry`].
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: `base_delay * 2^(attempt-1)`, capped at `max_delay`

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};

use crate::config::{RetryConfig, ServiceConfig};
use crate::error::{PipelineError, ServiceError};
use crate::models::{PromptDocument, PromptSegment, RemoteHandle};

/// Polls of an uploaded file before giving up on it becoming `ACTIVE`.
const MAX_STATE_POLLS: usize = 30;
const STATE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Operations the pipeline needs from a hosted multimodal model.
#[async_trait]
pub trait AiService: Send + Sync {
    /// Model identifier (e.g. `"gemini-2.5-flash"`).
    fn model(&self) -> &str;

    /// Upload a local file and return a handle usable in a prompt.
    async fn upload(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteHandle, ServiceError>;

    /// Run one completion over the prompt and return the response text.
    async fn complete(&self, prompt: &PromptDocument) -> Result<String, ServiceError>;
}

// ============ Retry ============

/// Explicit retry policy applied around service calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` means a single attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are used up. The last error is returned.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    what,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// ============ Gemini ============

/// Client for the Gemini API (Files + generateContent).
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    /// Create a client, reading the API key from the environment variable
    /// named by `config.api_key_env`. A `.env` file in the working directory
    /// is loaded first.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidInput`] when the credential is missing or the
    /// HTTP client cannot be built.
    pub fn new(config: &ServiceConfig) -> Result<Self, PipelineError> {
        let _ = dotenvy::dotenv();
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::InvalidInput(format!(
                    "{} environment variable not set",
                    config.api_key_env
                ))
            })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &ServiceConfig, api_key: String) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::InvalidInput(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    async fn fetch_file(&self, name: String) -> Result<FileResource, ServiceError> {
        let resp = self
            .http
            .get(format!("{}/v1beta/{}", self.base_url, name))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;
        let json: Value = check_status(resp).await?.json().await?;
        parse_file_resource(&json)
    }
}

/// Re-fetch `file` until it leaves processing, at most `max_polls` times.
///
/// The state of every fetch is checked, including the last one.
async fn poll_until_active<F, Fut>(
    mut file: FileResource,
    interval: Duration,
    max_polls: usize,
    mut fetch: F,
) -> Result<RemoteHandle, ServiceError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<FileResource, ServiceError>>,
{
    let mut polls = 0;
    loop {
        match file.state.as_deref() {
            None | Some("ACTIVE") => return Ok(file.handle),
            Some("FAILED") => {
                return Err(ServiceError::Protocol(format!(
                    "{} failed server-side processing",
                    file.handle.name
                )))
            }
            Some(state) if polls >= max_polls => {
                return Err(ServiceError::Protocol(format!(
                    "{} did not become active (still {} after {} polls)",
                    file.handle.name, state, polls
                )))
            }
            Some(state) => {
                tracing::debug!(
                    file = %file.handle.name,
                    state,
                    "waiting for file to become active"
                );
            }
        }
        tokio::time::sleep(interval).await;
        polls += 1;
        file = fetch(file.handle.name.clone()).await?;
    }
}

#[async_trait]
impl AiService for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn upload(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteHandle, ServiceError> {
        let bytes = tokio::fs::read(path).await?;

        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;
        let start = check_status(start).await?;
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Protocol("missing x-goog-upload-url header".into()))?
            .to_string();

        let resp = self
            .http
            .post(upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await?;
        let json: Value = check_status(resp).await?.json().await?;
        let file = parse_file_resource(&json)?;
        tracing::debug!(display_name, name = %file.handle.name, "uploaded");

        poll_until_active(file, STATE_POLL_INTERVAL, MAX_STATE_POLLS, |name| {
            self.fetch_file(name)
        })
        .await
    }

    async fn complete(&self, prompt: &PromptDocument) -> Result<String, ServiceError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let resp = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(prompt))
            .send()
            .await?;
        let json: Value = check_status(resp).await?.json().await?;
        response_text(&json)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ServiceError::Status {
        status: status.as_u16(),
        body,
    })
}

struct FileResource {
    handle: RemoteHandle,
    state: Option<String>,
}

/// Parse a file resource. Upload responses wrap it in `{"file": ...}`; the
/// `files.get` response is the bare resource.
fn parse_file_resource(json: &Value) -> Result<FileResource, ServiceError> {
    let file = json.get("file").unwrap_or(json);
    let field = |key: &str| {
        file.get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ServiceError::Protocol(format!("file resource missing '{}'", key)))
    };
    Ok(FileResource {
        handle: RemoteHandle {
            name: field("name")?,
            uri: field("uri")?,
            mime_type: field("mimeType")?,
        },
        state: file.get("state").and_then(|v| v.as_str()).map(str::to_string),
    })
}

/// generateContent request: one user turn, one part per segment.
fn request_body(prompt: &PromptDocument) -> Value {
    let parts: Vec<Value> = prompt
        .segments
        .iter()
        .map(|segment| match segment {
            PromptSegment::Text(text) => json!({ "text": text }),
            PromptSegment::File(handle) => json!({
                "file_data": { "mime_type": handle.mime_type, "file_uri": handle.uri }
            }),
            PromptSegment::Inline { mime_type, data } => json!({
                "inline_data": {
                    "mime_type": mime_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(data)
                }
            }),
        })
        .collect();
    json!({ "contents": [{ "role": "user", "parts": parts }] })
}

/// Concatenate the text parts of the first candidate.
fn response_text(json: &Value) -> Result<String, ServiceError> {
    if let Some(reason) = json
        .pointer("/promptFeedback/blockReason")
        .and_then(|v| v.as_str())
    {
        return Err(ServiceError::Protocol(format!("prompt blocked: {}", reason)));
    }

    let candidate = json
        .pointer("/candidates/0")
        .ok_or_else(|| ServiceError::Protocol("response has no candidates".into()))?;
    let text: String = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate
            .get("finishReason")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        return Err(ServiceError::Protocol(format!(
            "empty response (finish reason: {})",
            reason
        )));
    }
    Ok(text)
}
