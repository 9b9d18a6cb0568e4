//! Error types for socket listener operations.

use std::io;
use std::net::SocketAddr;

use blue_config::{EndpointResolveError, ShieldConfigError};
use thiserror::Error;

/// Errors surfaced while binding or running the socket listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The server shield can never admit a connection.
    #[error("invalid server shield: {0}")]
    Shield(#[from] ShieldConfigError),
    /// The listening endpoint did not resolve.
    #[error(transparent)]
    Resolve(#[from] EndpointResolveError),
    /// Binding failed.
    #[error("failed to bind TCP listener at {addr}: {source}")]
    BindTcp {
        /// Resolved address.
        addr: SocketAddr,
        /// Bind failure.
        #[source]
        source: io::Error,
    },
    /// The listener could not be switched to non-blocking accepts.
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// The accept thread could not be started.
    #[error("failed to spawn listener thread: {source}")]
    ThreadSpawn {
        /// Spawn failure.
        #[source]
        source: io::Error,
    },
    /// The accept thread panicked.
    #[error("listener thread panicked")]
    ThreadPanic,
}
