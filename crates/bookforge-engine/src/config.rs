//! Engine configuration.
//!
//! Layered lowest to highest: built-in defaults, an optional TOML file
//! (explicit path or `<config_dir>/bookforge/config.toml`), then environment
//! variables. CLI flags sit above all of this and are applied by the caller.

use bookforge_llm::BackendConfig;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 600;

const DATA_DIR_ENV: &str = "BOOKFORGE_DATA_DIR";
const BACKEND_ENV: &str = "BOOKFORGE_BACKEND";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory holding `runs/`.
    pub data_dir: Utf8PathBuf,
    /// Upper bound on any single generation or revision call.
    pub stage_timeout_secs: u64,
    pub backend: BackendConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: Utf8PathBuf::from(DEFAULT_DATA_DIR),
            stage_timeout_secs: DEFAULT_STAGE_TIMEOUT_SECS,
            backend: BackendConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration. An explicit path must exist; the discovered
    /// default path may be absent, in which case defaults apply.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.data_dir = Utf8PathBuf::from(dir);
            }
        }
        if let Ok(provider) = std::env::var(BACKEND_ENV) {
            if !provider.trim().is_empty() {
                self.backend.provider = Some(provider);
            }
        }
    }

    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bookforge").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Mutex, OnceLock};
    use tempfile::TempDir;

    // Serializes tests that read or mutate process environment variables.
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_guard() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap()
    }

    #[test]
    fn defaults_are_usable() {
        let config = EngineConfig::default();
        assert_eq!(config.data_dir, Utf8PathBuf::from("data"));
        assert_eq!(config.stage_timeout(), Duration::from_secs(600));
        assert!(config.backend.provider.is_none());
    }

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let _guard = env_guard();
        unsafe {
            std::env::remove_var(DATA_DIR_ENV);
            std::env::remove_var(BACKEND_ENV);
        }
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "data_dir = \"/tmp/books\"").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "[backend]").unwrap();
        writeln!(file, "provider = \"gemini\"").unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.data_dir, Utf8PathBuf::from("/tmp/books"));
        assert_eq!(config.stage_timeout_secs, DEFAULT_STAGE_TIMEOUT_SECS);
        assert_eq!(config.backend.provider.as_deref(), Some("gemini"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            EngineConfig::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "data_dir = [not toml").unwrap();
        assert!(matches!(
            EngineConfig::load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn environment_overrides_file_values() {
        let _guard = env_guard();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "data_dir = \"/from/file\"\n").unwrap();

        unsafe {
            std::env::set_var(DATA_DIR_ENV, "/from/env");
            std::env::set_var(BACKEND_ENV, "gemini");
        }
        let config = EngineConfig::load(Some(&path)).unwrap();
        unsafe {
            std::env::remove_var(DATA_DIR_ENV);
            std::env::remove_var(BACKEND_ENV);
        }

        assert_eq!(config.data_dir, Utf8PathBuf::from("/from/env"));
        assert_eq!(config.backend.provider.as_deref(), Some("gemini"));
    }
}
