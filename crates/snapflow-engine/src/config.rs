//! Engine configuration.
//!
//! Loaded from TOML the same way every other contract file in the
//! workspace is: missing keys fall back to [`EngineConfig::default`].

use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_NOTIFIER_THREAD_NAME: &str = "snapflow-notifier";

/// Errors raised while loading engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid toml: {source}")]
    ParseToml {
        #[source]
        source: toml::de::Error,
    },
}

/// Settings applied when a database file is first opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on distinct versions pinned by frozen references.
    /// `None` means unbounded.
    pub max_active_versions: Option<usize>,

    /// Name prefix of the notifier thread spawned per open database.
    pub notifier_thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_active_versions: None,
            notifier_thread_name: DEFAULT_NOTIFIER_THREAD_NAME.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::ParseToml { source })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
