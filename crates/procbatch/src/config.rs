//! Batch execution configuration

use std::path::Path;
use std::time::Duration;

use procbatch_core::Result;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_GATE_ACQUIRE_TIMEOUT_MS, DEFAULT_MAX_CONCURRENT_TARGETS, DEFAULT_SERVER_VERSION,
    MAX_PARAMETERS,
};
use crate::version::ServerVersion;

/// Configuration for executing a batch
///
/// Controls gate timeouts, fan-out across targets and SQL logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Timeout in milliseconds for acquiring all gates of one target
    gate_acquire_timeout_ms: u64,
    /// Number of targets executed at the same time
    max_concurrent_targets: usize,
    /// Log the generated SQL at debug level
    log_sql: bool,
    /// Upper bound of bound parameters per target
    max_parameters: usize,
    /// Version assumed when the executor cannot report one
    default_server_version: String,
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gate acquire timeout in milliseconds
    pub fn with_gate_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.gate_acquire_timeout_ms = timeout_ms;
        self
    }

    /// Set how many targets run at once (at least one)
    pub fn with_max_concurrent_targets(mut self, max: usize) -> Self {
        self.max_concurrent_targets = max.max(1);
        self
    }

    pub fn with_log_sql(mut self, log_sql: bool) -> Self {
        self.log_sql = log_sql;
        self
    }

    /// Set the parameter limit; it never exceeds what the server accepts
    pub fn with_max_parameters(mut self, max: usize) -> Self {
        self.max_parameters = max.min(MAX_PARAMETERS);
        self
    }

    pub fn with_default_server_version(mut self, version: impl Into<String>) -> Self {
        self.default_server_version = version.into();
        self
    }

    /// Get the gate acquire timeout as a Duration
    pub fn gate_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.gate_acquire_timeout_ms)
    }

    pub fn max_concurrent_targets(&self) -> usize {
        self.max_concurrent_targets.max(1)
    }

    pub fn log_sql(&self) -> bool {
        self.log_sql
    }

    pub fn max_parameters(&self) -> usize {
        self.max_parameters.min(MAX_PARAMETERS)
    }

    /// Parsed default server version
    pub fn default_server_version(&self) -> Result<ServerVersion> {
        self.default_server_version.parse()
    }

    /// Parse a configuration from TOML text; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.default_server_version()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

impl Default for BatchConfig {
    /// Defaults:
    /// - gate_acquire_timeout: 30 seconds
    /// - max_concurrent_targets: 8
    /// - log_sql: false
    /// - max_parameters: 2100
    /// - default_server_version: 15.0
    fn default() -> Self {
        Self {
            gate_acquire_timeout_ms: DEFAULT_GATE_ACQUIRE_TIMEOUT_MS,
            max_concurrent_targets: DEFAULT_MAX_CONCURRENT_TARGETS,
            log_sql: false,
            max_parameters: MAX_PARAMETERS,
            default_server_version: DEFAULT_SERVER_VERSION.to_string(),
        }
    }
}
