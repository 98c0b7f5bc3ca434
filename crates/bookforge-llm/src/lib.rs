//! Text generation backends for bookforge.
//!
//! The [`TextBackend`] trait abstracts over providers. Two implementations
//! ship here: [`MockBackend`] for deterministic offline runs and
//! [`GeminiBackend`] for real generation over HTTPS. [`from_config`] picks
//! one based on config.

pub mod gemini;
pub mod mock;
pub mod types;

pub use gemini::GeminiBackend;
pub use mock::MockBackend;
pub use types::{BackendConfig, BackendError, TextBackend};

use std::sync::Arc;
use tracing::warn;

/// Instantiate the backend selected by `config.provider`.
///
/// The provider defaults to `mock`. Selecting `gemini` without a resolvable
/// API key falls back to the mock backend with a warning rather than failing,
/// so a fresh checkout can run end to end.
pub fn from_config(config: &BackendConfig) -> Result<Arc<dyn TextBackend>, BackendError> {
    let provider = config.provider.as_deref().unwrap_or("mock");
    match provider {
        "mock" => Ok(Arc::new(MockBackend::new())),
        "gemini" => match gemini::resolve_api_key(config) {
            Some(key) => Ok(Arc::new(GeminiBackend::new_from_config(config, key)?)),
            None => {
                warn!("no Gemini API key found, falling back to the mock backend");
                Ok(Arc::new(MockBackend::new()))
            }
        },
        other => Err(BackendError::Unsupported(format!(
            "unknown provider '{other}'. Supported providers: mock, gemini."
        ))),
    }
}
