//! Configuration management for the coordinator
//!
//! Settings come from a TOML file, environment variables (`MARU_*`), or the
//! command line; the binary merges them in that order. The transport context
//! itself is injected at construction and not part of the configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::COORDINATOR_NAME;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator configuration
    pub coordinator: CoordinatorConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Coordinator-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Namespace this coordinator serves; prefixes all names reachable here
    pub namespace: String,

    /// Host name advertised to peers
    pub host: String,

    /// Port the router socket binds to
    pub port: u16,

    /// Interval of the liveness sweep in seconds
    pub cleaning_interval_secs: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            namespace: "local".to_string(),
            host: "localhost".to_string(),
            port: 12300,
            cleaning_interval_secs: 5.0,
        }
    }
}

impl CoordinatorConfig {
    /// The `host:port` address advertised in directory broadcasts.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cleaning_interval(&self) -> Duration {
        Duration::from_secs_f64(self.cleaning_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "namespace".to_string(),
                reason: "Namespace must not be empty".to_string(),
            });
        }
        if self.namespace.contains('.') {
            return Err(ConfigError::InvalidValue {
                field: "namespace".to_string(),
                reason: "Namespace must not contain '.'".to_string(),
            });
        }
        if self.namespace == COORDINATOR_NAME {
            return Err(ConfigError::InvalidValue {
                field: "namespace".to_string(),
                reason: format!("'{COORDINATOR_NAME}' is a reserved name"),
            });
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "port".to_string(),
                reason: "Port must not be 0".to_string(),
            });
        }
        if !(self.cleaning_interval_secs > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "cleaning_interval_secs".to_string(),
                reason: "Interval must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(namespace) = std::env::var("MARU_NAMESPACE") {
            config.coordinator.namespace = namespace;
        }
        if let Ok(host) = std::env::var("MARU_HOST") {
            config.coordinator.host = host;
        }
        if let Some(port) = std::env::var("MARU_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
        {
            config.coordinator.port = port;
        }
        if let Some(interval) = std::env::var("MARU_CLEANING_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
        {
            config.coordinator.cleaning_interval_secs = interval;
        }
        if let Ok(level) = std::env::var("MARU_LOG_LEVEL") {
            config.logging.level = level;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.coordinator.validate()
    }
}
