//! Routing of inbound application messages to handlers.
//!
//! A [`DispatchRegistry`] maps each message type tag to one handler. Request
//! handlers return the [`Response`](crate::Response) sent back to the peer;
//! event handlers return nothing. Handlers may take the receiving
//! [`Connection`](crate::Connection) as an extra argument, which lets them
//! reply with further requests or close the connection.

mod errors;
mod registry;

use std::fmt;

pub use self::errors::{DispatchError, RegistrationError};
pub use self::registry::{Controller, DispatchRegistry, HandlerEntry, RegistryBuilder};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Whether a handler answers requests or consumes events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Expects a response.
    Request,
    /// Fire-and-forget.
    Event,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => formatter.write_str("request"),
            Self::Event => formatter.write_str("event"),
        }
    }
}
