//! Gemini HTTP backend.
//!
//! Talks to the `generateContent` endpoint of the Gemini API. The API key is
//! resolved from explicit config, then an environment variable, then a key
//! file under the user config directory. Streaming is emulated by chunking a
//! complete response on whitespace.

use crate::types::{BackendConfig, BackendError, TextBackend};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_TOKENS: u32 = 8192;
const DEFAULT_KEY_ENV: &str = "GEMINI_API_KEY";
const KEY_FILE_NAME: &str = "gemini_api_key.txt";
const ERROR_BODY_LIMIT: usize = 300;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Backend that calls the Gemini API over HTTPS.
pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout_secs: u64,
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiBackend {
    /// Build a backend from config plus an already resolved API key.
    pub fn new_from_config(config: &BackendConfig, api_key: String) -> Result<Self, BackendError> {
        let timeout_secs = config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|err| {
                BackendError::Misconfiguration(format!("failed to build HTTP client: {err}"))
            })?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_secs,
        })
    }

    fn classify_transport(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout {
                seconds: self.timeout_secs,
            }
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

/// Locate a usable API key, or `None` if every source comes up empty.
///
/// Order: explicit config value, environment variable, key file. Placeholder
/// values such as `mock` or `YOUR_KEY_HERE` count as absent so a checked-in
/// template config cannot reach the network.
pub fn resolve_api_key(config: &BackendConfig) -> Option<String> {
    if let Some(raw) = config.api_key.as_deref() {
        if let Some(key) = accept_key(raw) {
            return Some(key);
        }
    }

    let env_name = config.api_key_env.as_deref().unwrap_or(DEFAULT_KEY_ENV);
    if let Ok(raw) = std::env::var(env_name) {
        if let Some(key) = accept_key(&raw) {
            return Some(key);
        }
    }

    let path = config.api_key_file.clone().or_else(default_key_file)?;
    let raw = std::fs::read_to_string(path).ok()?;
    accept_key(&raw)
}

fn default_key_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bookforge").join(KEY_FILE_NAME))
}

fn accept_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let placeholder = trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("mock")
        || trimmed.eq_ignore_ascii_case("mock_api_key")
        || trimmed.eq_ignore_ascii_case("your_key_here");
    if placeholder { None } else { Some(trimmed.to_string()) }
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> BackendError {
    let detail: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    match status.as_u16() {
        401 | 403 => BackendError::Auth(format!("HTTP {status}: {detail}")),
        429 => BackendError::Quota(format!("HTTP {status}: {detail}")),
        code if code >= 500 => BackendError::Outage(format!("HTTP {status}: {detail}")),
        _ => BackendError::Transport(format!("HTTP {status}: {detail}")),
    }
}

fn extract_text(response: &GenerateResponse) -> String {
    response
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .map(|part| part.text.as_str())
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl TextBackend for GeminiBackend {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: Option<u32>,
    ) -> Result<String, BackendError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: max_tokens.or(self.max_tokens).unwrap_or(DEFAULT_MAX_TOKENS),
                temperature: self.temperature,
            },
        };

        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        debug!(model = %self.model, prompt_bytes = prompt.len(), "sending generate request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| self.classify_transport(err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|err| BackendError::Transport(format!("invalid response body: {err}")))?;

        let text = extract_text(&parsed);
        if text.is_empty() {
            return Err(BackendError::Transport(
                "provider returned no text candidates".to_string(),
            ));
        }
        Ok(text)
    }

    async fn stream(
        &self,
        prompt: &str,
        on_token: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, BackendError> {
        let text = self.generate(prompt, None).await?;
        for token in text.split_inclusive(char::is_whitespace) {
            on_token(token);
        }
        Ok(text)
    }

    fn supports_rewrite(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
