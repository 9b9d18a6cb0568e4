//! Length-prefixed frame codec.
//!
//! A frame is two fields written back to back: the type tag, then the JSON
//! body. Each field is a 32-bit signed little-endian byte count followed by
//! that many UTF-8 bytes. Frames have no further header, so a reader that
//! loses its place cannot recover and the connection must be dropped.

mod errors;

use std::io::{self, Read, Write};

use serde::Serialize;
use tracing::trace;

pub use self::errors::CodecError;
use crate::message::{
    CLOSE_TAG, CloseReason, CorrelationId, Event, EventBody, PING_TAG, RESPONSE_TAG, Request,
    RequestBody, Response,
};

pub(crate) const CODEC_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::codec");

/// Largest field accepted when reading or writing.
pub const MAX_FIELD_BYTES: usize = 16 * 1024 * 1024;

const LENGTH_PREFIX_BYTES: usize = 4;
const TYPE_TAG_FIELD: &str = "type tag";
const BODY_FIELD: &str = "body";
const EMPTY_BODY: &str = "{}";

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    type_tag: String,
    body: String,
}

impl Envelope {
    /// Wraps an already serialised body.
    #[must_use]
    pub fn new(type_tag: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            body: body.into(),
        }
    }

    /// Frame for an outbound request.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serialise`] when the request cannot be encoded.
    pub fn request<R: Request>(correlation_id: CorrelationId, request: &R) -> Result<Self, CodecError> {
        let body = RequestBody {
            correlation_id,
            payload: request,
        };
        Self::serialised(R::TYPE_TAG, &body)
    }

    /// Frame for an outbound event.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serialise`] when the event cannot be encoded.
    pub fn event<E: Event>(event: &E) -> Result<Self, CodecError> {
        Self::serialised(E::TYPE_TAG, &EventBody { payload: event })
    }

    /// Frame for a response.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serialise`] when the payload cannot be encoded.
    pub fn response(response: &Response) -> Result<Self, CodecError> {
        Self::serialised(RESPONSE_TAG, response)
    }

    /// Liveness probe frame.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(PING_TAG, EMPTY_BODY)
    }

    /// Graceful close request frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serialise`] when the reason cannot be encoded.
    pub fn close(correlation_id: CorrelationId, reason: &CloseReason) -> Result<Self, CodecError> {
        let body = RequestBody {
            correlation_id,
            payload: reason,
        };
        Self::serialised(CLOSE_TAG, &body)
    }

    fn serialised<T: Serialize + ?Sized>(
        type_tag: &'static str,
        body: &T,
    ) -> Result<Self, CodecError> {
        let body = serde_json::to_string(body)
            .map_err(|source| CodecError::Serialise { type_tag, source })?;
        Ok(Self::new(type_tag, body))
    }

    /// Type tag field.
    #[must_use]
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Body field.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    pub(crate) fn into_parts(self) -> (String, String) {
        (self.type_tag, self.body)
    }

    /// Encodes the frame into a single buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::FieldTooLarge`] when a field exceeds
    /// [`MAX_FIELD_BYTES`].
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let tag = self.type_tag.as_bytes();
        let body = self.body.as_bytes();
        let mut frame = Vec::with_capacity(2 * LENGTH_PREFIX_BYTES + tag.len() + body.len());
        push_field(&mut frame, TYPE_TAG_FIELD, tag)?;
        push_field(&mut frame, BODY_FIELD, body)?;
        Ok(frame)
    }

    /// Writes the frame and flushes the writer.
    ///
    /// The frame is encoded up front and written with a single call so
    /// concurrent writers sharing a lock never interleave partial frames.
    ///
    /// # Errors
    ///
    /// Returns encoding failures or the underlying I/O error.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), CodecError> {
        let frame = self.encode()?;
        writer.write_all(&frame)?;
        writer.flush()?;
        trace!(
            target: CODEC_TARGET,
            type_tag = %self.type_tag,
            bytes = frame.len(),
            "frame written"
        );
        Ok(())
    }

    /// Reads exactly one frame, blocking until it is complete.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::EndOfStream`] when the stream closes, a framing
    /// error for malformed prefixes, or the underlying I/O error. Both fields
    /// are consumed before either is decoded, so [`CodecError::InvalidUtf8`]
    /// leaves the stream at the next frame.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        let type_tag = read_field(reader, TYPE_TAG_FIELD)?;
        let body = read_field(reader, BODY_FIELD)?;
        Ok(Self {
            type_tag: decode_field(type_tag, TYPE_TAG_FIELD)?,
            body: decode_field(body, BODY_FIELD)?,
        })
    }
}

fn push_field(frame: &mut Vec<u8>, field: &'static str, bytes: &[u8]) -> Result<(), CodecError> {
    let too_large = || CodecError::FieldTooLarge {
        field,
        length: bytes.len(),
        max: MAX_FIELD_BYTES,
    };
    if bytes.len() > MAX_FIELD_BYTES {
        return Err(too_large());
    }
    let length = i32::try_from(bytes.len()).map_err(|_| too_large())?;
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(bytes);
    Ok(())
}

fn read_field<R: Read + ?Sized>(reader: &mut R, field: &'static str) -> Result<Vec<u8>, CodecError> {
    let mut prefix = [0_u8; LENGTH_PREFIX_BYTES];
    read_exact(reader, &mut prefix)?;
    let declared = i32::from_le_bytes(prefix);
    let length = usize::try_from(declared).map_err(|_| CodecError::NegativeLength {
        field,
        length: declared,
    })?;
    if length > MAX_FIELD_BYTES {
        return Err(CodecError::FieldTooLarge {
            field,
            length,
            max: MAX_FIELD_BYTES,
        });
    }
    let mut bytes = vec![0_u8; length];
    read_exact(reader, &mut bytes)?;
    Ok(bytes)
}

fn decode_field(bytes: Vec<u8>, field: &'static str) -> Result<String, CodecError> {
    String::from_utf8(bytes).map_err(|source| CodecError::InvalidUtf8 { field, source })
}

/// Fills `buffer`, accumulating partial reads until every byte has arrived.
fn read_exact<R: Read + ?Sized>(reader: &mut R, buffer: &mut [u8]) -> Result<(), CodecError> {
    let expected = buffer.len();
    let mut received = 0;
    while let Some(remaining) = buffer.get_mut(received..)
        && !remaining.is_empty()
    {
        match reader.read(remaining) {
            Ok(0) => return Err(CodecError::EndOfStream { received, expected }),
            Ok(count) => received += count,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(CodecError::Io(error)),
        }
    }
    Ok(())
}
