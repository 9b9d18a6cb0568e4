//! Reply carried back to the sender of a request.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::CorrelationId;

/// Code of a successful response.
pub const SUCCESS_CODE: i32 = 0;

/// Code used by [`Response::failure`].
pub const FAILURE_CODE: i32 = -1;

/// Reply to a request.
///
/// Handlers build responses without knowing the request identifier; the
/// connection stamps the identifier of the request being answered before the
/// response is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<CorrelationId>,
    code: i32,
    #[serde(default)]
    message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    payload: Value,
}

impl Response {
    /// Successful response without a message.
    #[must_use]
    pub fn ok() -> Self {
        Self::error(SUCCESS_CODE, String::new())
    }

    /// Response with an explicit code and message.
    #[must_use]
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            correlation_id: None,
            code,
            message: message.into(),
            payload: Value::Null,
        }
    }

    /// Generic failure with code `-1`.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::error(FAILURE_CODE, message)
    }

    /// Attaches a typed payload.
    ///
    /// A payload that cannot be serialised turns the response into a
    /// [`Response::failure`] describing the problem.
    #[must_use]
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => {
                self.payload = value;
                self
            }
            Err(error) => Self {
                correlation_id: self.correlation_id,
                ..Self::failure(format!("failed to serialise response payload: {error}"))
            },
        }
    }

    /// Decodes the payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Raw payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Response code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        self.code
    }

    /// Response message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` for code `0`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// Identifier of the answered request, once stamped.
    #[must_use]
    pub const fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    pub(crate) fn stamped(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}
