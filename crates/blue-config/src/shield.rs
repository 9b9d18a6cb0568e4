//! Rate-limit, timeout and lifetime policies for connections and listeners.
//!
//! These types only describe policy. The runtime sliding windows that enforce
//! them live in the protocol crate and are cloned from these templates for
//! every connection.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::defaults::{
    DEFAULT_LIFE_TIME_MS, DEFAULT_MAX_CONNECTIONS_PER_MINUTE, DEFAULT_MAX_CONNECTIONS_PER_SECOND,
    DEFAULT_MAX_REQUESTS_PER_MINUTE, DEFAULT_MAX_REQUESTS_PER_SECOND,
    DEFAULT_RESPONSE_TIMEOUT_MS, UNLIMITED_LIFE_TIME,
};

/// Per-connection policy.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShieldConfig {
    /// Maximum connection lifetime in milliseconds; `-1` disables the limit.
    pub life_time_ms: i64,
    /// Maximum age of an unanswered request before the connection is closed;
    /// `0` disables the check.
    pub response_timeout_ms: u64,
    /// Inbound messages admitted per one-second window.
    pub max_requests_per_second: u32,
    /// Inbound messages admitted per one-minute window.
    pub max_requests_per_minute: u32,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            life_time_ms: DEFAULT_LIFE_TIME_MS,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            max_requests_per_second: DEFAULT_MAX_REQUESTS_PER_SECOND,
            max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
        }
    }
}

impl ShieldConfig {
    /// Returns the lifetime limit, or `None` when unlimited.
    #[must_use]
    pub fn life_time(&self) -> Option<Duration> {
        u64::try_from(self.life_time_ms)
            .ok()
            .map(Duration::from_millis)
    }

    /// Returns the response timeout, or `None` when disabled.
    #[must_use]
    pub const fn response_timeout(&self) -> Option<Duration> {
        if self.response_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.response_timeout_ms))
        }
    }

    /// Checks that the policy can ever admit a message.
    ///
    /// # Errors
    ///
    /// Returns [`ShieldConfigError`] when a rate limit is zero or the
    /// lifetime is below the unlimited sentinel.
    pub fn validate(&self) -> Result<(), ShieldConfigError> {
        if self.life_time_ms < UNLIMITED_LIFE_TIME {
            return Err(ShieldConfigError::InvalidLifeTime {
                value: self.life_time_ms,
            });
        }
        ensure_positive("max_requests_per_second", self.max_requests_per_second)?;
        ensure_positive("max_requests_per_minute", self.max_requests_per_minute)
    }
}

/// Listener-level policy.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerShieldConfig {
    /// Whether accepted sockets are exposed or immediately refused.
    pub accept_new_connections: bool,
    /// Connections accepted per one-second window.
    pub max_connections_per_second: u32,
    /// Connections accepted per one-minute window.
    pub max_connections_per_minute: u32,
    /// Template cloned into every accepted connection.
    pub default_client_shield: ShieldConfig,
}

impl Default for ServerShieldConfig {
    fn default() -> Self {
        Self {
            accept_new_connections: true,
            max_connections_per_second: DEFAULT_MAX_CONNECTIONS_PER_SECOND,
            max_connections_per_minute: DEFAULT_MAX_CONNECTIONS_PER_MINUTE,
            default_client_shield: ShieldConfig::default(),
        }
    }
}

impl ServerShieldConfig {
    /// Checks the listener limits and the client template.
    ///
    /// # Errors
    ///
    /// Returns [`ShieldConfigError`] for zero connection limits or an invalid
    /// client template.
    pub fn validate(&self) -> Result<(), ShieldConfigError> {
        ensure_positive("max_connections_per_second", self.max_connections_per_second)?;
        ensure_positive("max_connections_per_minute", self.max_connections_per_minute)?;
        self.default_client_shield.validate()
    }
}

fn ensure_positive(field: &'static str, value: u32) -> Result<(), ShieldConfigError> {
    if value == 0 {
        return Err(ShieldConfigError::ZeroLimit { field });
    }
    Ok(())
}

/// Errors raised when a shield policy can never be satisfied.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShieldConfigError {
    /// A rate limit of zero would block admission forever.
    #[error("{field} must be greater than zero")]
    ZeroLimit {
        /// Offending field.
        field: &'static str,
    },
    /// Lifetime below `-1`.
    #[error("life_time_ms must be -1 (unlimited) or non-negative, got {value}")]
    InvalidLifeTime {
        /// Offending value.
        value: i64,
    },
}
