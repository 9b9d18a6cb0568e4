//! TCP listener that turns accepted sockets into connections.
//!
//! The listener binds to an [`Endpoint`](blue_config::Endpoint) and accepts
//! sockets on a background thread. Each accepted socket becomes a
//! [`Connection`](crate::Connection) with its own copy of the listener's
//! client shield and dispatch registry.

mod errors;
mod listener;

pub use self::errors::ListenerError;
pub use self::listener::{ListenerHandle, ListenerOptions, SocketListener};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
