//! Error types for frame encoding and decoding.

use std::io;
use std::string::FromUtf8Error;

use thiserror::Error;

use crate::severity::Severity;

/// Errors surfaced while encoding, reading or classifying frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The stream ended, either cleanly between frames or part-way through one.
    #[error("stream ended after {received} of {expected} bytes")]
    EndOfStream {
        /// Bytes of the current field already received.
        received: usize,
        /// Bytes the current field needed.
        expected: usize,
    },
    /// A length prefix was negative.
    #[error("negative length {length} in {field} prefix")]
    NegativeLength {
        /// Frame field being read.
        field: &'static str,
        /// Declared length.
        length: i32,
    },
    /// A field exceeds the accepted maximum.
    #[error("{field} of {length} bytes exceeds the {max} byte limit")]
    FieldTooLarge {
        /// Frame field being read or written.
        field: &'static str,
        /// Field length in bytes.
        length: usize,
        /// Accepted maximum.
        max: usize,
    },
    /// A field was not valid UTF-8.
    #[error("{field} is not valid UTF-8: {source}")]
    InvalidUtf8 {
        /// Frame field being read.
        field: &'static str,
        /// Decoding failure.
        #[source]
        source: FromUtf8Error,
    },
    /// The frame decoded but its tag or body could not be resolved.
    #[error("cannot resolve message '{type_tag}': {message}")]
    TypeResolution {
        /// Tag read from the frame.
        type_tag: String,
        /// Description of the mismatch.
        message: String,
    },
    /// A message could not be serialised.
    #[error("failed to serialise '{type_tag}': {source}")]
    Serialise {
        /// Tag of the message being encoded.
        type_tag: &'static str,
        /// Serialisation failure.
        #[source]
        source: serde_json::Error,
    },
    /// Reading from or writing to the stream failed.
    #[error("stream I/O failed: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    pub(crate) fn type_resolution(type_tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TypeResolution {
            type_tag: type_tag.into(),
            message: message.into(),
        }
    }

    /// Returns the severity of the failure.
    ///
    /// Framing violations desynchronise the stream and are fatal to the
    /// connection. Undecodable or unresolvable frames were read in full and
    /// only lose the current frame.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::EndOfStream { .. } | Self::NegativeLength { .. } | Self::FieldTooLarge { .. } => {
                Severity::ConnectionFatal
            }
            Self::InvalidUtf8 { .. } | Self::TypeResolution { .. } | Self::Serialise { .. } => {
                Severity::Transient
            }
            Self::Io(error) => io_severity(error),
        }
    }
}

fn io_severity(error: &io::Error) -> Severity {
    match error.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof => Severity::ConnectionFatal,
        _ => Severity::Transient,
    }
}
