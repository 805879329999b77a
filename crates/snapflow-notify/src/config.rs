//! Notification and session configuration.

use serde::{Deserialize, Serialize};
use snapflow_engine::EngineConfig;
use std::path::Path;

/// Errors raised while loading session configuration.
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

    #[error("{0}")]
    Invalid(String),
}

/// How change deliveries travel from the notifier thread to a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Capacity of each stream's delivery channel. `None` is unbounded.
    ///
    /// When a bounded channel is full the stream ends with
    /// `EngineError::DeliveryOverflow` instead of blocking the notifier.
    pub channel_capacity: Option<usize>,

    /// Deliver `Updated` events whose change-set is empty.
    pub emit_empty_updates: bool,
}

impl NotifierConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|source| ConfigError::ParseToml { source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Engine and notifier settings for one session, as one TOML document:
///
/// ```toml
/// [engine]
/// max_active_versions = 16
///
/// [notifier]
/// channel_capacity = 64
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub engine: EngineConfig,
    pub notifier: NotifierConfig,
}

impl SessionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|source| ConfigError::ParseToml { source })?;
        config.notifier.validate()?;
        Ok(config)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unbounded_and_skip_empty_updates() {
        let config = NotifierConfig::from_toml_str("").expect("empty config should parse");
        assert_eq!(config, NotifierConfig::default());
        assert_eq!(config.channel_capacity, None);
        assert!(!config.emit_empty_updates);
    }

    #[test]
    fn session_config_reads_both_tables() {
        let config = SessionConfig::from_toml_str(
            r#"
            [engine]
            max_active_versions = 8
            notifier_thread_name = "notify"

            [notifier]
            channel_capacity = 2
            emit_empty_updates = true
            "#,
        )
        .expect("session config should parse");
        assert_eq!(config.engine.max_active_versions, Some(8));
        assert_eq!(config.engine.notifier_thread_name, "notify");
        assert_eq!(config.notifier.channel_capacity, Some(2));
        assert!(config.notifier.emit_empty_updates);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = SessionConfig::from_toml_str("[notifier]\nchannel_capacity = 0\n")
            .expect_err("zero capacity must be rejected");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
