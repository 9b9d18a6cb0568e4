//! Bidirectional request/response and event messaging over TCP.
//!
//! Peers exchange length-prefixed frames carrying a type tag and a JSON body.
//! Three kinds of traffic share one stream: requests, which expect exactly one
//! correlated [`Response`]; events, which expect nothing; and protocol frames
//! for liveness pings and the graceful close handshake.
//!
//! A [`Connection`] supervises one stream. It rate-limits inbound traffic with
//! a [`Shield`], correlates outbound requests with their responses, closes
//! itself when a response times out or its lifetime ends, and routes inbound
//! messages to handlers held in a [`DispatchRegistry`]. A [`SocketListener`]
//! accepts sockets and turns them into connections that share its handlers and
//! policy.
//!
//! ```no_run
//! use blue_config::Endpoint;
//! use blue_protocol::{
//!     DispatchRegistry, ListenerOptions, Message, Request, Response, SocketListener,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Add {
//!     left: i64,
//!     right: i64,
//! }
//!
//! impl Message for Add {
//!     const TYPE_TAG: &'static str = "calc.add";
//! }
//!
//! impl Request for Add {}
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = DispatchRegistry::builder()
//!     .request_fn(|add: Add| Response::ok().with_payload(&(add.left + add.right)))
//!     .build()?;
//! let listener = SocketListener::bind(
//!     &Endpoint::tcp("127.0.0.1", 0),
//!     ListenerOptions::default().with_registry(registry),
//! )?;
//! let handle = listener.start()?;
//! # handle.shutdown();
//! # Ok(())
//! # }
//! ```

mod codec;
mod connection;
mod dispatch;
mod message;
mod pending;
mod severity;
mod shield;
mod sync;
pub mod telemetry;
mod transport;

#[cfg(test)]
mod tests;

pub use codec::{CodecError, Envelope, MAX_FIELD_BYTES};
pub use connection::{
    CLOSE_ACK_TIMEOUT, CONNECT_TIMEOUT, Connection, ConnectionError, ConnectionOptions,
    ConnectionState, HEARTBEAT_INTERVAL, PING_INTERVAL, REMOTE_CLOSE_GRACE,
};
pub use dispatch::{
    Controller, DispatchError, DispatchRegistry, HandlerEntry, MessageKind, RegistrationError,
    RegistryBuilder,
};
pub use message::{
    CLOSE_TAG, CloseCode, CloseReason, CorrelationId, Event, FAILURE_CODE, Message,
    NO_REASON_MESSAGE, PING_TAG, RESPONSE_TAG, Request, Response, SUCCESS_CODE,
    SYSTEM_TAG_PREFIX, is_system_tag,
};
pub use pending::{ReplyHandle, RequestError};
pub use severity::Severity;
pub use shield::{
    ADMISSION_POLL_INTERVAL, Admission, Admit, RateLimiter, ServerShield, Shield, SlidingWindow,
    admit_blocking,
};
pub use transport::{ListenerError, ListenerHandle, ListenerOptions, SocketListener};
