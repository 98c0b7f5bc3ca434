//! Core types for the text generation abstraction

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by text generation backends
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport-level failure (HTTP connectivity, malformed response)
    #[error("transport error: {0}")]
    Transport(String),

    /// Provider authentication failure (401, 403, missing API key)
    #[error("provider authentication error: {0}")]
    Auth(String),

    /// Provider quota/rate limit exceeded (429)
    #[error("provider quota exceeded: {0}")]
    Quota(String),

    /// Provider service outage (5xx errors)
    #[error("provider outage: {0}")]
    Outage(String),

    /// Invocation did not complete in time
    #[error("timeout after {seconds}s")]
    Timeout { seconds: u64 },

    /// Configuration error
    #[error("misconfiguration: {0}")]
    Misconfiguration(String),

    /// Unsupported provider or feature
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Backend selection and provider settings.
///
/// All fields are optional so a partial config file or a bare environment
/// still resolves to something usable; unset fields fall back to provider
/// defaults at construction time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Provider name ("mock" or "gemini"); defaults to "mock"
    pub provider: Option<String>,
    /// Model identifier for HTTP providers
    pub model: Option<String>,
    /// API key supplied directly in configuration
    pub api_key: Option<String>,
    /// Environment variable to read the API key from
    pub api_key_env: Option<String>,
    /// File to read the API key from
    pub api_key_file: Option<PathBuf>,
    /// Custom API base URL
    pub base_url: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: Option<u64>,
    /// Maximum tokens to request per generation
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

/// Trait implemented by every text generation backend.
///
/// The caller treats a backend as an interchangeable, possibly-unreliable
/// oracle: it can draft text for a prompt, stream a draft token by token,
/// and declare whether it follows instructions well enough to rewrite prose
/// against a list of reported problems.
#[async_trait]
pub trait TextBackend: Send + Sync + std::fmt::Debug {
    /// Generate text for a prompt.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` for any failure during generation, including
    /// transport faults, provider errors, and timeouts.
    async fn generate(&self, prompt: &str, max_tokens: Option<u32>)
    -> Result<String, BackendError>;

    /// Generate text, invoking `on_token` once per produced token in order.
    ///
    /// Returns the fully assembled text; concatenating the callback tokens
    /// yields the same string.
    ///
    /// # Errors
    ///
    /// Same failure surface as [`TextBackend::generate`].
    async fn stream(
        &self,
        prompt: &str,
        on_token: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, BackendError>;

    /// Whether this backend can be trusted with instruction-following
    /// rewrites. Offline stand-ins return false, which routes revision to a
    /// deterministic rule-based fixer instead.
    fn supports_rewrite(&self) -> bool;

    /// Short provider name for logs and reports.
    fn name(&self) -> &'static str;
}
