//! Receive thread: decode, admit, classify, route.

use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::{CONNECTION_TARGET, Connection, ConnectionState};
use crate::codec::{CODEC_TARGET, CodecError, Envelope};
use crate::message::{CloseReason, Inbound};

const READ_ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Reads frames until the connection is torn down.
pub(super) fn run(connection: &Connection, mut reader: TcpStream) {
    while matches!(
        connection.state(),
        ConnectionState::Open | ConnectionState::Closing
    ) {
        let envelope = match Envelope::read_from(&mut reader) {
            Ok(envelope) => envelope,
            Err(error) => {
                if read_failed(connection, &error) {
                    break;
                }
                continue;
            }
        };
        connection.admit_inbound();
        match Inbound::classify(envelope) {
            Ok(Inbound::Ping) => trace!(target: CONNECTION_TARGET, "ping received"),
            Ok(Inbound::Close {
                correlation_id,
                reason,
            }) => {
                if connection.accept_remote_close(correlation_id, reason) {
                    break;
                }
            }
            Ok(Inbound::Dispatch(message)) => connection.route(message),
            Err(error) => warn!(
                target: CODEC_TARGET,
                remote = %connection.remote_addr(),
                error = %error,
                "discarding unresolvable frame"
            ),
        }
    }
    debug!(target: CONNECTION_TARGET, remote = %connection.remote_addr(), "receive loop stopped");
}

/// Handles a failed read; returns `true` when the loop must stop.
///
/// Failures after a local teardown began are expected and end the loop
/// quietly. A lost or corrupted stream while open closes the connection
/// without the handshake.
fn read_failed(connection: &Connection, error: &CodecError) -> bool {
    if !connection.is_open() {
        return true;
    }
    if error.severity().is_connection_fatal() {
        connection.abort(CloseReason::internal_error(format!("peer unreachable: {error}")));
        return true;
    }
    debug!(target: CODEC_TARGET, error = %error, "transient read failure");
    thread::sleep(READ_ERROR_BACKOFF);
    false
}
