mod conversation;
mod polling;
mod transport;

pub use conversation::*;
pub use polling::*;
pub use transport::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
}

impl Config {
    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("invalid config: {e}")))
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.transport.base_url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "transport.base_url".into(),
                message: "base_url must not be empty".into(),
            });
        }

        if !self.transport.endpoint_path.starts_with('/') {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "transport.endpoint_path".into(),
                message: "endpoint_path must start with '/'".into(),
            });
        }

        if self.transport.timeout_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "transport.timeout_ms".into(),
                message: "timeout must be greater than 0".into(),
            });
        }

        for (name, poll) in [
            ("polling.sources", &self.polling.sources),
            ("polling.artifacts", &self.polling.artifacts),
        ] {
            if poll.initial_interval_ms == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("{name}.initial_interval_ms"),
                    message: "initial interval must be greater than 0".into(),
                });
            }
            if poll.max_interval_ms < poll.initial_interval_ms {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("{name}.max_interval_ms"),
                    message: "max interval is below the initial interval; back-off is disabled"
                        .into(),
                });
            }
        }

        if self.conversation.capacity == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "conversation.capacity".into(),
                message: "capacity must be greater than 0".into(),
            });
        }

        errors
    }
}
