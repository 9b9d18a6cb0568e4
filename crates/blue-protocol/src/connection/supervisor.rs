//! Heartbeat thread: pings, response timeouts and lifetime.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Instant;

use tracing::debug;

use super::{CONNECTION_TARGET, Connection, HEARTBEAT_INTERVAL, PING_INTERVAL};

/// Runs until the stop channel fires or the connection leaves `Open`.
///
/// Each tick sends a ping once [`PING_INTERVAL`] has elapsed, then closes the
/// connection when any request outlived the response timeout or the
/// connection outlived its lifetime.
pub(super) fn run(connection: &Connection, stop: &Receiver<()>) {
    let mut last_ping = Instant::now();
    loop {
        match stop.recv_timeout(HEARTBEAT_INTERVAL) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if !connection.is_open() {
            break;
        }
        if last_ping.elapsed() >= PING_INTERVAL {
            connection.send_ping();
            last_ping = Instant::now();
        }
        if connection.expire_requests() || connection.outlived() {
            break;
        }
    }
    debug!(target: CONNECTION_TARGET, remote = %connection.remote_addr(), "supervisor stopped");
}
