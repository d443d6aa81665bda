//! Controller configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file (or
//! no file at all) yields a working configuration.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use labeler_shared_types::{LabelerError, DEFAULT_FINALIZER, DEFAULT_MARKER_KEY};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

use crate::reconciliation::RetryPolicy;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading the configuration file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing TOML configuration.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Configuration validation failed.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<ConfigError> for LabelerError {
    fn from(err: ConfigError) -> Self {
        LabelerError::ConfigError(err.to_string())
    }
}

/// Logging section of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Log span open and close, which times each reconcile cycle.
    pub span_events: bool,
    /// Include source file and line.
    pub location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            span_events: false,
            location: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Node label key holding logical cluster membership.
    pub marker_key: String,
    /// Finalizer guarding declaration deletion.
    pub finalizer: String,
    /// Field manager recorded on every patch.
    pub field_manager: String,
    /// Backoff applied to failing declarations.
    pub requeue: RetryPolicy,
    /// Re-run converged declarations this often. Nodes are only watched while
    /// they carry a marker, so an externally removed marker or a desired node
    /// that joins late is repaired by this resync. Must be positive.
    pub resync_interval_secs: u64,
    pub logging: LoggingConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            marker_key: DEFAULT_MARKER_KEY.to_string(),
            finalizer: DEFAULT_FINALIZER.to_string(),
            field_manager: "logical-cluster-controller".to_string(),
            requeue: RetryPolicy::default(),
            resync_interval_secs: 300,
            logging: LoggingConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Read and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_label_key(&self.marker_key)?;
        if self.finalizer.trim().is_empty() {
            return Err(ConfigError::validation("finalizer must not be empty"));
        }
        if self.field_manager.trim().is_empty() {
            return Err(ConfigError::validation("field_manager must not be empty"));
        }
        if self.requeue.initial_delay_ms == 0 {
            return Err(ConfigError::validation(
                "requeue.initial_delay_ms must be positive",
            ));
        }
        if self.resync_interval_secs == 0 {
            return Err(ConfigError::validation(
                "resync_interval_secs must be positive",
            ));
        }
        self.tracing_level()?;
        Ok(())
    }

    pub fn tracing_level(&self) -> Result<Level, ConfigError> {
        Level::from_str(&self.logging.level).map_err(|_| {
            ConfigError::validation(format!("unknown log level '{}'", self.logging.level))
        })
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}

/// Kubernetes label keys: optional DNS prefix, then a name of at most 63
/// alphanumerics, `-`, `_` or `.`, starting and ending alphanumeric.
fn validate_label_key(key: &str) -> Result<(), ConfigError> {
    let name = match key.rsplit_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() || prefix.len() > 253 {
                return Err(ConfigError::validation(format!(
                    "invalid marker_key prefix in '{}'",
                    key
                )));
            }
            name
        }
        None => key,
    };

    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    let valid_ends = name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric());

    if name.is_empty() || name.len() > 63 || !valid_chars || !valid_ends {
        return Err(ConfigError::validation(format!(
            "invalid marker_key '{}'",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::BackoffStrategy;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = ControllerConfig::from_toml("").unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.marker_key, "logical-cluster");
        assert_eq!(config.finalizer, "clusterDelete");
        assert_eq!(config.resync_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_override() {
        let config = ControllerConfig::from_toml(
            r#"
            marker_key = "example.com/logical-cluster"
            resync_interval_secs = 60

            [requeue]
            backoff_strategy = "fixed"
            initial_delay_ms = 2000

            [logging]
            level = "debug"
            json = true
            span_events = true
            "#,
        )
        .unwrap();

        assert_eq!(config.marker_key, "example.com/logical-cluster");
        assert_eq!(config.finalizer, DEFAULT_FINALIZER);
        assert_eq!(config.resync_interval(), Duration::from_secs(60));
        assert_eq!(config.requeue.backoff_strategy, BackoffStrategy::Fixed);
        assert_eq!(config.tracing_level().unwrap(), Level::DEBUG);
        assert!(config.logging.json);
        assert!(config.logging.span_events);
        assert!(!config.logging.location);
    }

    #[test]
    fn test_rejects_invalid_marker_key() {
        for key in ["", "has space", "-leading", "trailing-", "/name", "a=b"] {
            let config = ControllerConfig {
                marker_key: key.to_string(),
                ..Default::default()
            };
            assert!(config.validate().is_err(), "accepted '{}'", key);
        }
    }

    #[test]
    fn test_rejects_disabled_resync() {
        let err = ControllerConfig::from_toml("resync_interval_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref msg) if msg.contains("resync")));
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let err = ControllerConfig::from_toml("[logging]\nlevel = \"loud\"").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = ControllerConfig::from_toml("marker_key = ").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("lc-config-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "finalizer = \"example.com/cleanup\"\n").unwrap();

        let config = ControllerConfig::load(&path).unwrap();
        assert_eq!(config.finalizer, "example.com/cleanup");

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            ControllerConfig::load(&path).unwrap_err(),
            ConfigError::Io(_)
        ));
    }
}
