//! Relay fabric configuration.
//!
//! Follows the teacher's `RouterConfig` shape: environment presets, a builder,
//! `validate()`, and JSON load/save.

use crate::domain_types::{MaxFrameBytes, OutboundQueueCapacity};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field's value fails a cross-field consistency check.
    #[error("Invalid configuration: {field} - {reason}")]
    ValidationError {
        /// Name of the field that failed validation.
        field: String,
        /// Human-readable explanation of why it failed.
        reason: String,
    },

    /// Reading or writing the config file failed.
    #[error("I/O error: {source}")]
    IoError {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The config file was not valid JSON.
    #[error("Serialization error: {source}")]
    SerializationError {
        /// The underlying (de)serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Complete relay fabric configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Loopback TCP port the relay server binds (default 54321 per §6.1).
    pub port: u16,
    /// Maximum time a new connection has to send its `identify` frame.
    pub identify_timeout_ms: u64,
    /// Window from which the post-server-death rebind delay is sampled.
    pub rebind_jitter_min_ms: u64,
    /// Upper bound of the rebind jitter window.
    pub rebind_jitter_max_ms: u64,
    /// Grace period before a rejected second endpoint's socket is closed.
    pub endpoint_reject_close_delay_ms: u64,
    /// Maximum frame size accepted on the wire.
    pub max_frame_bytes: MaxFrameBytes,
    /// Per-receiver outbound queue depth before oldest-frame eviction.
    pub outbound_queue_capacity: OutboundQueueCapacity,
    /// Whether the relay log messages are rich enough for local debugging.
    pub enable_detailed_logs: bool,
}

impl RelayConfig {
    /// Development preset: short timeouts, verbose logs.
    #[must_use]
    pub fn development() -> Self {
        Self {
            port: 54321,
            identify_timeout_ms: 5_000,
            rebind_jitter_min_ms: 100,
            rebind_jitter_max_ms: 500,
            endpoint_reject_close_delay_ms: 1_000,
            max_frame_bytes: MaxFrameBytes::default(),
            outbound_queue_capacity: OutboundQueueCapacity::default(),
            enable_detailed_logs: true,
        }
    }

    /// Production preset: identical timing (the spec pins these values), logs
    /// turned down.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enable_detailed_logs: false,
            ..Self::development()
        }
    }

    /// Testing preset: tight timeouts so integration tests run fast.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            port: 0, // bind an ephemeral port
            identify_timeout_ms: 500,
            rebind_jitter_min_ms: 5,
            rebind_jitter_max_ms: 20,
            endpoint_reject_close_delay_ms: 50,
            max_frame_bytes: MaxFrameBytes::try_new(65_536).unwrap_or_default(),
            outbound_queue_capacity: OutboundQueueCapacity::try_new(32).unwrap_or_default(),
            enable_detailed_logs: false,
        }
    }

    /// Starts a builder seeded with development defaults.
    #[must_use]
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::new()
    }

    /// Validates cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the jitter window is
    /// inverted or the identify timeout is unreasonably short.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rebind_jitter_min_ms >= self.rebind_jitter_max_ms {
            return Err(ConfigError::ValidationError {
                field: "rebind_jitter_min_ms".to_string(),
                reason: "must be less than rebind_jitter_max_ms".to_string(),
            });
        }
        if self.identify_timeout_ms < 100 {
            return Err(ConfigError::ValidationError {
                field: "identify_timeout_ms".to_string(),
                reason: "must be at least 100ms".to_string(),
            });
        }
        Ok(())
    }

    /// Saves configuration to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if serialization or the write fails.
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Loads and validates configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is missing, malformed, or invalid.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// Builder for custom relay configurations.
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    /// Creates a builder seeded with development defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RelayConfig::development(),
        }
    }

    /// Overrides the bind port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Overrides the identify handshake timeout.
    #[must_use]
    pub fn identify_timeout_ms(mut self, ms: u64) -> Self {
        self.config.identify_timeout_ms = ms;
        self
    }

    /// Overrides the outbound backpressure queue depth.
    #[must_use]
    pub fn outbound_queue_capacity(mut self, capacity: OutboundQueueCapacity) -> Self {
        self.config.outbound_queue_capacity = capacity;
        self
    }

    /// Validates and produces the final configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the built configuration is inconsistent.
    pub fn build(self) -> Result<RelayConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for RelayConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `TABRELAY_PORT` overrides [`RelayConfig::port`] at startup (§6.5). No hot
/// reload: read once and baked into the config that is passed down.
pub fn port_from_env(default_config: &mut RelayConfig) {
    if let Ok(value) = std::env::var("TABRELAY_PORT") {
        if let Ok(port) = value.parse() {
            default_config.port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn development_config_is_valid() {
        assert!(RelayConfig::development().validate().is_ok());
    }

    #[test]
    fn production_config_is_valid() {
        assert!(RelayConfig::production().validate().is_ok());
    }

    #[test]
    fn testing_config_is_valid() {
        assert!(RelayConfig::testing().validate().is_ok());
    }

    #[test]
    fn builder_rejects_inverted_jitter_window() {
        let config = RelayConfig {
            rebind_jitter_min_ms: 500,
            rebind_jitter_max_ms: 100,
            ..RelayConfig::development()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_file() {
        let config = RelayConfig::development();
        let file = NamedTempFile::new().unwrap();
        config.save_to_file(file.path()).unwrap();
        let loaded = RelayConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.port, loaded.port);
        assert_eq!(
            config.identify_timeout_ms,
            loaded.identify_timeout_ms
        );
    }

    #[test]
    fn env_override_applies_port() {
        // SAFETY: test-local env var, not read concurrently elsewhere in this process.
        unsafe {
            std::env::set_var("TABRELAY_PORT", "9999");
        }
        let mut config = RelayConfig::development();
        port_from_env(&mut config);
        assert_eq!(config.port, 9999);
        unsafe {
            std::env::remove_var("TABRELAY_PORT");
        }
    }
}
