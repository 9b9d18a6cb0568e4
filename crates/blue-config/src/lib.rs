//! Shared configuration types for the blue protocol engine.
//!
//! The crate describes policy only: where a listener binds, how connections
//! execute handlers, the rate-limit and timeout shields applied to them, and
//! how telemetry is rendered. Loading these values from files or the
//! environment is left to the embedding application; every type derives
//! `serde` traits with defaults so partial documents deserialise cleanly.

mod defaults;
mod endpoint;
mod logging;
mod mode;
mod shield;

use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LIFE_TIME_MS, DEFAULT_LOG_FILTER, DEFAULT_MAX_CONNECTIONS_PER_MINUTE,
    DEFAULT_MAX_CONNECTIONS_PER_SECOND, DEFAULT_MAX_REQUESTS_PER_MINUTE,
    DEFAULT_MAX_REQUESTS_PER_SECOND, DEFAULT_RESPONSE_TIMEOUT_MS, DEFAULT_TCP_PORT,
    UNLIMITED_LIFE_TIME, default_endpoint, default_log_filter, default_log_filter_string,
    default_log_format,
};
pub use endpoint::{Endpoint, EndpointParseError, EndpointResolveError};
pub use logging::{LogFormat, LogFormatParseError};
pub use mode::{ProcessingMode, ProcessingModeParseError};
pub use shield::{ServerShieldConfig, ShieldConfig, ShieldConfigError};

/// Aggregate configuration for a process hosting listeners and connections.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Endpoint the listener binds to.
    pub listen: Endpoint,
    /// `tracing` filter expression.
    pub log_filter: String,
    /// Rendering of log events.
    pub log_format: LogFormat,
    /// Handler execution model for new connections.
    pub processing_mode: ProcessingMode,
    /// Listener policy, including the per-connection template.
    pub server_shield: ServerShieldConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_endpoint(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            processing_mode: ProcessingMode::default(),
            server_shield: ServerShieldConfig::default(),
        }
    }
}

impl Config {
    /// Returns the configured log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Returns the configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Validates every shield policy in the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ShieldConfigError`] found.
    pub fn validate(&self) -> Result<(), ShieldConfigError> {
        self.server_shield.validate()
    }
}
