//! Top-level process configuration: which role this binary invocation plays
//! (§2) plus the knobs §6.5 exposes via environment variables.
//!
//! Follows the same dev/production/testing-preset-plus-builder shape as
//! [`crate::relay::config::RelayConfig`], one level up: this wraps a
//! `RelayConfig` alongside the settings that are process-role-specific
//! rather than relay-specific.

use crate::coordination::tab_lock::TabLockConfig;
use crate::relay::config::RelayConfig;
use crate::tool_server::operation_manager::OperationManagerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors at the process level.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field's value fails a cross-field consistency check.
    #[error("invalid configuration: {field} - {reason}")]
    ValidationError {
        /// Name of the field that failed validation.
        field: String,
        /// Human-readable explanation of why it failed.
        reason: String,
    },

    /// An environment variable held a value of the wrong shape.
    #[error("invalid value for {var}: {value}")]
    InvalidEnvValue {
        /// Name of the environment variable.
        var: String,
        /// The value that failed to parse.
        value: String,
    },

    /// The wrapped relay configuration failed to validate.
    #[error("relay configuration error: {0}")]
    Relay(#[from] crate::relay::config::ConfigError),
}

/// Which of the three roles (§2) this process invocation plays. A single
/// process plays exactly one role; the relay fabric itself is implicit in
/// whichever role wins the bind race (§4.1), so `Relay` here means "attempt
/// to become the relay, falling back to relay-client otherwise" rather than
/// a guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Endpoint Gateway: the single privileged browser-automation client.
    Endpoint,
    /// Tool-Server Client: issues commands and tracks operations.
    ToolServer,
}

impl std::str::FromStr for Role {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "endpoint" => Ok(Self::Endpoint),
            "tool-server" => Ok(Self::ToolServer),
            other => Err(ConfigError::InvalidEnvValue {
                var: "TABRELAY_ROLE".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Full process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Which role this process plays.
    pub role: Role,
    /// Relay fabric settings, shared by every role that dials or hosts it.
    pub relay: RelayConfig,
    /// Per-tab lock tuning, used by the Endpoint Gateway only.
    pub tab_lock: TabLockConfig,
    /// Operation sweep windows, used by the Tool-Server Client only.
    pub operation_manager: OperationManagerConfig,
    /// Directory operation snapshots and other durable state live under.
    pub data_dir: PathBuf,
    /// `tracing` filter directive, e.g. `"tabrelay=info"`.
    pub log_level: String,
    /// Whether logs are newline-delimited JSON rather than human-readable.
    pub log_json: bool,
    /// Per-operation deadline override (§5 default: 180s).
    pub operation_timeout: Duration,
}

impl AppConfig {
    /// Development preset for the given role: verbose logs, the relay's
    /// development timings, state under `./data`.
    #[must_use]
    pub fn development(role: Role) -> Self {
        Self {
            role,
            relay: RelayConfig::development(),
            tab_lock: TabLockConfig::development(),
            operation_manager: OperationManagerConfig::development(),
            data_dir: PathBuf::from("./data"),
            log_level: "tabrelay=debug".to_string(),
            log_json: false,
            operation_timeout: Duration::from_secs(180),
        }
    }

    /// Production preset: quieter logs, state under the OS data directory.
    #[must_use]
    pub fn production(role: Role) -> Self {
        Self {
            role,
            relay: RelayConfig::production(),
            tab_lock: TabLockConfig::production(),
            operation_manager: OperationManagerConfig::production(),
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tabrelay"),
            log_level: "tabrelay=info".to_string(),
            log_json: true,
            operation_timeout: Duration::from_secs(180),
        }
    }

    /// Testing preset: ephemeral relay port, short deadlines, caller-supplied
    /// scratch directory.
    #[must_use]
    pub fn testing(role: Role, data_dir: PathBuf) -> Self {
        Self {
            role,
            relay: RelayConfig::testing(),
            tab_lock: TabLockConfig::testing(),
            operation_manager: OperationManagerConfig::testing(),
            data_dir,
            log_level: "tabrelay=trace".to_string(),
            log_json: false,
            operation_timeout: Duration::from_secs(5),
        }
    }

    /// Builds configuration from environment variables (§6.5), starting
    /// from the production preset for the role named in `TABRELAY_ROLE`.
    ///
    /// | Variable | Overrides |
    /// |---|---|
    /// | `TABRELAY_ROLE` | role (required: `endpoint` or `tool-server`) |
    /// | `TABRELAY_PORT` | `relay.port` |
    /// | `TABRELAY_DATA_DIR` | `data_dir` |
    /// | `TABRELAY_LOG_LEVEL` | `log_level` |
    /// | `TABRELAY_LOG_JSON` | `log_json` (`"true"`/`"false"`) |
    /// | `TABRELAY_OPERATION_TIMEOUT_MS` | `operation_timeout` |
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnvValue`] if `TABRELAY_ROLE` is missing
    /// or unrecognized, or if a numeric override fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let role: Role = std::env::var("TABRELAY_ROLE")
            .map_err(|_| ConfigError::InvalidEnvValue {
                var: "TABRELAY_ROLE".to_string(),
                value: String::new(),
            })?
            .parse()?;

        let mut config = Self::production(role);
        crate::relay::config::port_from_env(&mut config.relay);

        if let Ok(dir) = std::env::var("TABRELAY_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("TABRELAY_LOG_LEVEL") {
            config.log_level = level;
        }
        if let Ok(json) = std::env::var("TABRELAY_LOG_JSON") {
            config.log_json = json == "true";
        }
        if let Ok(ms) = std::env::var("TABRELAY_OPERATION_TIMEOUT_MS") {
            let parsed: u64 = ms.parse().map_err(|_| ConfigError::InvalidEnvValue {
                var: "TABRELAY_OPERATION_TIMEOUT_MS".to_string(),
                value: ms.clone(),
            })?;
            config.operation_timeout = Duration::from_millis(parsed);
        }
        config.operation_manager.operation_deadline = config.operation_timeout;

        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field consistency, including the wrapped relay
    /// config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if `operation_timeout` is
    /// implausibly short, or propagates [`ConfigError::Relay`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.relay.validate()?;
        if self.operation_timeout < Duration::from_millis(100) {
            return Err(ConfigError::ValidationError {
                field: "operation_timeout".to_string(),
                reason: "must be at least 100ms".to_string(),
            });
        }
        Ok(())
    }
}
