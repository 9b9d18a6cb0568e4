//! Shared fixtures for connection, dispatch and listener tests.

use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::{
    CloseReason, Connection, ConnectionOptions, DispatchError, DispatchRegistry, Event, Message,
    Request, Response,
};

/// Upper bound for every polling helper.
pub(crate) const WAIT_LIMIT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct CountRequest {
    pub(crate) count: u32,
}

impl Message for CountRequest {
    const TYPE_TAG: &'static str = "test.count";
}

impl Request for CountRequest {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct CountResponse {
    pub(crate) code: u32,
    pub(crate) doubled: u32,
}

/// Request type no test registry handles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct UnhandledRequest;

impl Message for UnhandledRequest {
    const TYPE_TAG: &'static str = "test.unhandled";
}

impl Request for UnhandledRequest {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct Notice {
    pub(crate) text: String,
}

impl Message for Notice {
    const TYPE_TAG: &'static str = "test.notice";
}

impl Event for Notice {}

/// Registry answering [`CountRequest`] with its doubled count.
pub(crate) fn counting_registry() -> DispatchRegistry {
    DispatchRegistry::builder()
        .request_fn(|request: CountRequest| {
            Response::ok().with_payload(&CountResponse {
                code: 0,
                doubled: request.count * 2,
            })
        })
        .build()
        .expect("counting registry builds")
}

/// Two connections joined over loopback TCP.
pub(crate) struct Pair {
    pub(crate) client: Connection,
    pub(crate) server: Connection,
}

impl Pair {
    /// Connects the peers without starting them.
    pub(crate) fn new(client: ConnectionOptions, server: ConnectionOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        let addr = listener.local_addr().expect("listener address");
        let client = Connection::connect(addr, client).expect("connect client");
        let (stream, _) = listener.accept().expect("accept client");
        let server = Connection::from_stream(stream, server).expect("wrap accepted stream");
        Self { client, server }
    }

    /// Connects and starts both peers.
    pub(crate) fn started(client: ConnectionOptions, server: ConnectionOptions) -> Self {
        let pair = Self::new(client, server);
        pair.server.start().expect("start server");
        pair.client.start().expect("start client");
        pair
    }
}

impl Drop for Pair {
    fn drop(&mut self) {
        self.client.close_without_reason();
        self.server.close_without_reason();
    }
}

/// Client connection whose peer is a raw socket driven by the test.
pub(crate) fn raw_peer(options: ConnectionOptions) -> (Connection, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener address");
    let connection = Connection::connect(addr, options).expect("connect client");
    let (stream, _) = listener.accept().expect("accept client");
    (connection, stream)
}

/// Records close reasons delivered to disconnect observers.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReasonLog(Arc<Mutex<Vec<CloseReason>>>);

impl ReasonLog {
    pub(crate) fn observe(&self, connection: &Connection) {
        let log = Arc::clone(&self.0);
        connection.on_disconnected(move |_, reason| {
            log.lock().expect("reason log lock").push(reason.clone());
        });
    }

    pub(crate) fn reasons(&self) -> Vec<CloseReason> {
        self.0.lock().expect("reason log lock").clone()
    }

    pub(crate) fn wait_for_first(&self) -> Option<CloseReason> {
        wait_until(|| !self.reasons().is_empty());
        self.reasons().first().cloned()
    }
}

/// Records dispatch failures delivered to dispatch-error observers.
#[derive(Debug, Clone, Default)]
pub(crate) struct DispatchLog(Arc<Mutex<Vec<String>>>);

impl DispatchLog {
    pub(crate) fn observe(&self, connection: &Connection) {
        let log = Arc::clone(&self.0);
        connection.on_dispatch_error(move |_, error: &DispatchError| {
            log.lock().expect("dispatch log lock").push(error.to_string());
        });
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.0.lock().expect("dispatch log lock").clone()
    }
}

/// Polls `condition` every 10 ms until it holds or [`WAIT_LIMIT`] elapses.
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_LIMIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
