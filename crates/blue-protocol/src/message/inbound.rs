//! Classification of decoded frames.

use serde::Deserialize;
use serde_json::Value;

use super::{CLOSE_TAG, CloseReason, CorrelationId, PING_TAG, RESPONSE_TAG, Response};
use crate::codec::{CodecError, Envelope};

/// A frame routed by the receive loop.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// Liveness probe; ignored.
    Ping,
    /// Peer-initiated close.
    Close {
        correlation_id: CorrelationId,
        reason: CloseReason,
    },
    /// Application traffic for the dispatch registry.
    Dispatch(Dispatchable),
}

/// Application traffic awaiting a handler.
#[derive(Debug)]
pub(crate) enum Dispatchable {
    Request {
        type_tag: String,
        correlation_id: CorrelationId,
        payload: Value,
    },
    Response(Response),
    Event {
        type_tag: String,
        payload: Value,
    },
}

impl Dispatchable {
    pub(crate) fn type_tag(&self) -> &str {
        match self {
            Self::Request { type_tag, .. } | Self::Event { type_tag, .. } => type_tag,
            Self::Response(_) => RESPONSE_TAG,
        }
    }
}

#[derive(Deserialize)]
struct ApplicationBody {
    #[serde(default)]
    correlation_id: Option<CorrelationId>,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct CloseBody {
    correlation_id: CorrelationId,
    payload: CloseReason,
}

impl Inbound {
    /// Resolves the frame's type tag and body shape.
    ///
    /// A body carrying a correlation identifier is a request; one without is
    /// an event. Frames whose body does not fit the shape implied by their tag
    /// fail with [`CodecError::TypeResolution`].
    pub(crate) fn classify(envelope: Envelope) -> Result<Self, CodecError> {
        let (type_tag, body) = envelope.into_parts();
        match type_tag.as_str() {
            PING_TAG => Ok(Self::Ping),
            CLOSE_TAG => {
                let close: CloseBody = parse(&type_tag, &body)?;
                Ok(Self::Close {
                    correlation_id: close.correlation_id,
                    reason: close.payload,
                })
            }
            RESPONSE_TAG => {
                let response: Response = parse(&type_tag, &body)?;
                Ok(Self::Dispatch(Dispatchable::Response(response)))
            }
            _ if type_tag.is_empty() => Err(CodecError::type_resolution(
                type_tag.as_str(),
                "empty type tag",
            )),
            _ => {
                let application: ApplicationBody = parse(&type_tag, &body)?;
                let message = match application.correlation_id {
                    Some(correlation_id) => Dispatchable::Request {
                        type_tag,
                        correlation_id,
                        payload: application.payload,
                    },
                    None => Dispatchable::Event {
                        type_tag,
                        payload: application.payload,
                    },
                };
                Ok(Self::Dispatch(message))
            }
        }
    }
}

fn parse<'de, T: Deserialize<'de>>(type_tag: &str, body: &'de str) -> Result<T, CodecError> {
    serde_json::from_str(body)
        .map_err(|error| CodecError::type_resolution(type_tag, error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_frames_are_recognised() {
        let inbound = Inbound::classify(Envelope::ping()).expect("classify ping");
        assert!(matches!(inbound, Inbound::Ping));
    }

    #[test]
    fn close_frames_carry_reason() {
        let id = CorrelationId::fresh();
        let envelope = Envelope::close(id, &CloseReason::custom("bye")).expect("encode close");
        let Inbound::Close {
            correlation_id,
            reason,
        } = Inbound::classify(envelope).expect("classify close")
        else {
            panic!("expected close frame");
        };
        assert_eq!(correlation_id, id);
        assert_eq!(reason, CloseReason::custom("bye"));
    }

    #[test]
    fn body_shape_separates_requests_from_events() {
        let request = Envelope::new("demo.count", r#"{"correlation_id":"5f0c6f0e-8d36-4b4e-9b8e-3e2f1c0a9d11","payload":{"n":1}}"#);
        let event = Envelope::new("demo.count", r#"{"payload":{"n":1}}"#);
        assert!(matches!(
            Inbound::classify(request),
            Ok(Inbound::Dispatch(Dispatchable::Request { .. }))
        ));
        assert!(matches!(
            Inbound::classify(event),
            Ok(Inbound::Dispatch(Dispatchable::Event { .. }))
        ));
    }

    #[test]
    fn undecodable_body_is_a_type_resolution_failure() {
        let envelope = Envelope::new(RESPONSE_TAG, "not json");
        let error = Inbound::classify(envelope).expect_err("body should not decode");
        assert!(matches!(error, CodecError::TypeResolution { .. }));
    }
}
