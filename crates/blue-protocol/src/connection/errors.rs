//! Error types for connection operations.

use std::io;

use blue_config::{EndpointResolveError, ShieldConfigError};
use thiserror::Error;

use super::ConnectionState;
use crate::codec::CodecError;
use crate::severity::Severity;

/// Errors surfaced while establishing or using a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The shield policy can never admit a message.
    #[error("invalid connection shield: {0}")]
    Shield(#[from] ShieldConfigError),
    /// The remote endpoint did not resolve.
    #[error(transparent)]
    Resolve(#[from] EndpointResolveError),
    /// No resolved address accepted the connection.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address as given.
        addr: String,
        /// Last connection failure.
        #[source]
        source: io::Error,
    },
    /// The socket could not be configured or cloned.
    #[error("failed to prepare socket: {source}")]
    Socket {
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// The operation requires an open connection.
    #[error("connection is {state}")]
    NotOpen {
        /// State at the time of the call.
        state: ConnectionState,
    },
    /// Encoding or writing a frame failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A background loop could not be started.
    #[error("failed to spawn {role} thread: {source}")]
    ThreadSpawn {
        /// Loop being started.
        role: &'static str,
        /// Spawn failure.
        #[source]
        source: io::Error,
    },
}

impl ConnectionError {
    /// Returns the severity of the failure.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::Codec(error) => error.severity(),
            Self::Shield(_)
            | Self::Resolve(_)
            | Self::Connect { .. }
            | Self::Socket { .. }
            | Self::NotOpen { .. }
            | Self::ThreadSpawn { .. } => Severity::ConnectionFatal,
        }
    }
}
