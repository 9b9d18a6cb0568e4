//! Message model shared by both peers.
//!
//! Application messages are plain `serde` types that name themselves with a
//! stable [`Message::TYPE_TAG`]. The tag travels in the first frame field and
//! selects the handler on the receiving side, so both peers must agree on it.
//! Tags starting with [`SYSTEM_TAG_PREFIX`] are reserved for the protocol's own
//! ping, close and response messages.

mod close;
mod inbound;
mod response;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use self::close::{CloseCode, CloseReason, NO_REASON_MESSAGE};
pub(crate) use self::inbound::{Dispatchable, Inbound};
pub use self::response::{FAILURE_CODE, Response, SUCCESS_CODE};

/// Prefix reserved for protocol-level messages.
pub const SYSTEM_TAG_PREFIX: &str = "blue.";

/// Tag of the liveness probe.
pub const PING_TAG: &str = "blue.ping";

/// Tag of the graceful close request.
pub const CLOSE_TAG: &str = "blue.close";

/// Tag shared by every response.
pub const RESPONSE_TAG: &str = "blue.response";

/// A serialisable application message with a stable wire tag.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    /// Type tag written to the first frame field.
    const TYPE_TAG: &'static str;
}

/// A message that expects exactly one [`Response`].
pub trait Request: Message {}

/// A fire-and-forget message.
pub trait Event: Message {}

/// Returns `true` when the tag belongs to the protocol itself.
#[must_use]
pub fn is_system_tag(type_tag: &str) -> bool {
    type_tag.starts_with(SYSTEM_TAG_PREFIX)
}

/// Identifier pairing a request with its response.
///
/// Identifiers are random version 4 UUIDs, unique per sent request for the
/// lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for CorrelationId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

/// Body of a request frame.
#[derive(Debug, Serialize)]
pub(crate) struct RequestBody<'a, T> {
    pub(crate) correlation_id: CorrelationId,
    pub(crate) payload: &'a T,
}

/// Body of an event frame.
#[derive(Debug, Serialize)]
pub(crate) struct EventBody<'a, T> {
    pub(crate) payload: &'a T,
}
