use crate::endpoint::Endpoint;

/// Default TCP port for listeners.
pub const DEFAULT_TCP_PORT: u16 = 5055;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Sentinel for an unlimited connection lifetime.
pub const UNLIMITED_LIFE_TIME: i64 = -1;

/// Default connection lifetime (unlimited).
pub const DEFAULT_LIFE_TIME_MS: i64 = UNLIMITED_LIFE_TIME;

/// Default maximum age of an unanswered request.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5_000;

/// Default inbound messages per second on one connection.
pub const DEFAULT_MAX_REQUESTS_PER_SECOND: u32 = 10;

/// Default inbound messages per minute on one connection.
pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: u32 = 600;

/// Default accepted connections per second on one listener.
pub const DEFAULT_MAX_CONNECTIONS_PER_SECOND: u32 = 1;

/// Default accepted connections per minute on one listener.
pub const DEFAULT_MAX_CONNECTIONS_PER_MINUTE: u32 = 10;

/// Default log filter expression.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Default listening endpoint.
#[must_use]
pub fn default_endpoint() -> Endpoint {
    Endpoint::tcp("0.0.0.0", DEFAULT_TCP_PORT)
}
