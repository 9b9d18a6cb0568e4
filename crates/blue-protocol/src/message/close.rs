//! Close reasons exchanged during connection teardown.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Message used by [`CloseReason::no_reason`].
pub const NO_REASON_MESSAGE: &str = "No reason";

/// Custom code carried by reasons raised by the protocol itself.
const SYSTEM_CUSTOM_CODE: i32 = -1;

/// Default custom code for application reasons.
const DEFAULT_CUSTOM_CODE: i32 = 0;

/// Category of a close reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseCode {
    /// The listener refused the connection.
    ConnectionRefused,
    /// The connection failed internally, including a vanished peer.
    InternalError,
    /// The peer exceeded a rate limit.
    RateLimited,
    /// The connection outlived its configured lifetime.
    LifetimeExceeded,
    /// A request went unanswered for longer than the response timeout.
    Timeout,
    /// Application-defined reason.
    Custom,
}

impl fmt::Display for CloseCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ConnectionRefused => "ConnectionRefused",
            Self::InternalError => "InternalError",
            Self::RateLimited => "RateLimited",
            Self::LifetimeExceeded => "LifetimeExceeded",
            Self::Timeout => "Timeout",
            Self::Custom => "Custom",
        };
        formatter.write_str(label)
    }
}

/// Why a connection closed.
///
/// Protocol-raised reasons carry a custom code of `-1`; application reasons
/// default to `0`. The reason is serialised as the payload of a close request
/// so the peer observes the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReason {
    code: CloseCode,
    custom_code: i32,
    message: String,
}

impl CloseReason {
    fn system(code: CloseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            custom_code: SYSTEM_CUSTOM_CODE,
            message: message.into(),
        }
    }

    /// The listener refused the connection.
    #[must_use]
    pub fn connection_refused(message: impl Into<String>) -> Self {
        Self::system(CloseCode::ConnectionRefused, message)
    }

    /// The connection failed internally.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::system(CloseCode::InternalError, message)
    }

    /// The peer exceeded a rate limit.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::system(CloseCode::RateLimited, message)
    }

    /// The connection outlived its lifetime.
    #[must_use]
    pub fn lifetime_exceeded(message: impl Into<String>) -> Self {
        Self::system(CloseCode::LifetimeExceeded, message)
    }

    /// A response timed out.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::system(CloseCode::Timeout, message)
    }

    /// Application reason with the default custom code.
    #[must_use]
    pub fn custom(message: impl Into<String>) -> Self {
        Self::custom_with_code(message, DEFAULT_CUSTOM_CODE)
    }

    /// Application reason with an explicit custom code.
    #[must_use]
    pub fn custom_with_code(message: impl Into<String>, custom_code: i32) -> Self {
        Self {
            code: CloseCode::Custom,
            custom_code,
            message: message.into(),
        }
    }

    /// Application reason used when the caller gives none.
    #[must_use]
    pub fn no_reason() -> Self {
        Self::custom(NO_REASON_MESSAGE)
    }

    /// Reason category.
    #[must_use]
    pub const fn code(&self) -> CloseCode {
        self.code
    }

    /// Custom code; `-1` for protocol-raised reasons.
    #[must_use]
    pub const fn custom_code(&self) -> i32 {
        self.custom_code
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "[{}] {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CloseReason::connection_refused("full"), CloseCode::ConnectionRefused)]
    #[case(CloseReason::internal_error("boom"), CloseCode::InternalError)]
    #[case(CloseReason::rate_limited("slow down"), CloseCode::RateLimited)]
    #[case(CloseReason::lifetime_exceeded("old"), CloseCode::LifetimeExceeded)]
    #[case(CloseReason::timeout("late"), CloseCode::Timeout)]
    fn system_reasons_use_negative_custom_code(
        #[case] reason: CloseReason,
        #[case] code: CloseCode,
    ) {
        assert_eq!(reason.code(), code);
        assert_eq!(reason.custom_code(), -1);
    }

    #[test]
    fn custom_reason_defaults_to_zero() {
        let reason = CloseReason::custom("bye");
        assert_eq!(reason.code(), CloseCode::Custom);
        assert_eq!(reason.custom_code(), 0);
        assert_eq!(CloseReason::custom_with_code("bye", 42).custom_code(), 42);
    }

    #[test]
    fn display_shows_code_and_message() {
        assert_eq!(CloseReason::custom("bye").to_string(), "[Custom] bye");
        assert_eq!(CloseReason::no_reason().to_string(), "[Custom] No reason");
        assert_eq!(
            CloseReason::timeout("response timed out").to_string(),
            "[Timeout] response timed out"
        );
    }
}
