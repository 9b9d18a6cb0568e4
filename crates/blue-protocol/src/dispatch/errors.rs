//! Error types for handler registration and dispatch.

use thiserror::Error;

use super::MessageKind;
use crate::message::CorrelationId;
use crate::severity::Severity;

/// Errors raised while building a dispatch registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// A handler for the tag already exists.
    #[error("a handler for '{type_tag}' is already registered (rejected {message_type})")]
    Duplicate {
        /// Conflicting tag.
        type_tag: &'static str,
        /// Rust type of the rejected registration.
        message_type: &'static str,
    },
    /// The tag uses the protocol's reserved prefix.
    #[error("type tag '{type_tag}' of {message_type} uses the reserved 'blue.' prefix")]
    ReservedTag {
        /// Offending tag.
        type_tag: &'static str,
        /// Rust type declaring the tag.
        message_type: &'static str,
    },
    /// The tag is empty.
    #[error("{message_type} declares an empty type tag")]
    EmptyTag {
        /// Rust type declaring the tag.
        message_type: &'static str,
    },
}

/// Errors raised while routing one inbound message.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler is registered for the tag.
    #[error("no handler registered for '{type_tag}'")]
    NoHandler {
        /// Tag of the unhandled message.
        type_tag: String,
    },
    /// The registered handler expects the other message kind.
    #[error("'{type_tag}' is registered as {registered} but arrived as {received}")]
    KindMismatch {
        /// Tag of the message.
        type_tag: String,
        /// Kind the handler was registered for.
        registered: MessageKind,
        /// Kind implied by the frame.
        received: MessageKind,
    },
    /// A response arrived without a correlation identifier.
    #[error("response carries no correlation identifier")]
    MissingCorrelation,
    /// A response matched no pending request.
    #[error("no pending request for correlation {correlation_id}")]
    UnknownCorrelation {
        /// Identifier carried by the response.
        correlation_id: CorrelationId,
    },
    /// The payload did not decode into the handler's message type.
    #[error("payload of '{type_tag}' does not match {message_type}: {source}")]
    Payload {
        /// Tag of the message.
        type_tag: String,
        /// Rust type the handler expects.
        message_type: &'static str,
        /// Decoding failure.
        #[source]
        source: serde_json::Error,
    },
    /// The handler's response could not be written back.
    #[error("failed to send response to '{type_tag}': {message}")]
    ReplyFailed {
        /// Tag of the answered request.
        type_tag: String,
        /// Description of the write failure.
        message: String,
    },
}

impl DispatchError {
    pub(crate) fn no_handler(type_tag: impl Into<String>) -> Self {
        Self::NoHandler {
            type_tag: type_tag.into(),
        }
    }

    /// Returns the severity of the failure.
    ///
    /// Dispatch failures lose only the affected message.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        Severity::DispatchFatal
    }
}
