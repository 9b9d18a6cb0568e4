//! Connection lifecycle, sending, and inbound dispatch.
//!
//! A [`Connection`] owns one TCP stream and, once started, two background
//! threads: a supervisor that pings the peer and enforces the response
//! timeout and lifetime policies, and a receive loop that decodes frames,
//! applies the inbound rate limit, and routes each message. In
//! [`ProcessingMode::Concurrent`] every inbound message is handled on its own
//! short-lived thread; in [`ProcessingMode::Queued`] messages wait in a queue
//! until the application calls [`Connection::process_all`] or
//! [`Connection::process_one`].
//!
//! Closing is a handshake: the closing side notifies its observers, sends a
//! close request carrying the reason, and waits briefly for the peer's
//! acknowledgement before releasing the socket and joining its threads.

mod errors;
mod queue;
mod receive;
mod state;
mod supervisor;
#[cfg(test)]
mod tests;

use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, RwLock, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use blue_config::{Endpoint, ProcessingMode, ShieldConfig};
use tracing::{debug, info, warn};

pub use self::errors::ConnectionError;
pub use self::state::ConnectionState;
use self::queue::MessageQueue;
use self::state::StateCell;
use crate::codec::{CodecError, Envelope};
use crate::dispatch::{
    Controller, DISPATCH_TARGET, DispatchError, DispatchRegistry, HandlerEntry, RegistrationError,
};
use crate::message::{
    CLOSE_TAG, CloseReason, CorrelationId, Dispatchable, Event, Request, Response,
};
use crate::pending::{PendingRequest, PendingRequests, PendingSummary, ReplyHandle, RequestError};
use crate::shield::Shield;
use crate::sync::{lock, read, write};

pub(crate) const CONNECTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connection");

/// How often the supervisor wakes.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// How often a ping is sent to the peer.
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Longest wait for the peer to acknowledge a close request.
pub const CLOSE_ACK_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Delay between acknowledging a peer's close request and releasing the
/// socket, so the acknowledgement is flushed before the stream shuts down.
pub const REMOTE_CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Longest wait for an outbound TCP connection to establish.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type DisconnectObserver = Arc<dyn Fn(&Connection, &CloseReason) + Send + Sync>;
type DispatchErrorObserver = Arc<dyn Fn(&Connection, &DispatchError) + Send + Sync>;

/// Settings applied to a connection when it is created.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    /// Rate-limit, timeout and lifetime policy.
    pub shield: ShieldConfig,
    /// Handlers for inbound messages.
    pub registry: DispatchRegistry,
    /// Handler execution model.
    pub mode: ProcessingMode,
}

impl ConnectionOptions {
    /// Replaces the shield policy.
    #[must_use]
    pub const fn with_shield(mut self, shield: ShieldConfig) -> Self {
        self.shield = shield;
        self
    }

    /// Replaces the dispatch registry.
    #[must_use]
    pub fn with_registry(mut self, registry: DispatchRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the processing mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }
}

/// One side of a protocol session.
///
/// Handles are cheap to clone and share one underlying connection. The
/// background threads hold handles of their own, so a started connection
/// stays alive until it is closed, either locally or by the peer.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

struct Shared {
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    connected_at: SystemTime,
    established: Instant,
    mode: ProcessingMode,
    state: StateCell,
    socket: TcpStream,
    writer: Mutex<TcpStream>,
    shield: Mutex<Shield>,
    pending: PendingRequests,
    registry: RwLock<DispatchRegistry>,
    queue: MessageQueue,
    disconnect_observers: Mutex<Vec<DisconnectObserver>>,
    dispatch_observers: Mutex<Vec<DispatchErrorObserver>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    supervisor_stop: Mutex<Option<mpsc::Sender<()>>>,
}

impl Connection {
    /// Opens an outbound TCP connection.
    ///
    /// The connection stays [`ConnectionState::Connecting`] until
    /// [`Connection::start`] runs, so handlers and observers can be attached
    /// before any traffic is processed.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Shield`] for an unsatisfiable policy,
    /// [`ConnectionError::Connect`] when the peer cannot be reached or
    /// [`ConnectionError::Socket`] when the stream cannot be prepared.
    pub fn connect(addr: SocketAddr, options: ConnectionOptions) -> Result<Self, ConnectionError> {
        options.shield.validate()?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(|source| {
            ConnectionError::Connect {
                addr: addr.to_string(),
                source,
            }
        })?;
        Self::from_stream(stream, options)
    }

    /// Resolves `endpoint` and opens an outbound TCP connection to it.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Resolve`] when the endpoint does not
    /// resolve, otherwise the errors of [`Connection::connect`].
    pub fn connect_endpoint(
        endpoint: &Endpoint,
        options: ConnectionOptions,
    ) -> Result<Self, ConnectionError> {
        let addr = endpoint.resolve()?;
        Self::connect(addr, options)
    }

    /// Wraps an established stream, typically one returned by `accept`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Shield`] for an unsatisfiable policy or
    /// [`ConnectionError::Socket`] when the stream cannot be configured or
    /// cloned.
    pub fn from_stream(stream: TcpStream, options: ConnectionOptions) -> Result<Self, ConnectionError> {
        options.shield.validate()?;
        stream.set_nonblocking(false).map_err(socket_error)?;
        stream.set_nodelay(true).map_err(socket_error)?;
        let remote_addr = stream.peer_addr().map_err(socket_error)?;
        let local_addr = stream.local_addr().map_err(socket_error)?;
        let writer = stream.try_clone().map_err(socket_error)?;
        let ConnectionOptions {
            shield,
            registry,
            mode,
        } = options;
        Ok(Self {
            shared: Arc::new(Shared {
                remote_addr,
                local_addr,
                connected_at: SystemTime::now(),
                established: Instant::now(),
                mode,
                state: StateCell::new(ConnectionState::Connecting),
                socket: stream,
                writer: Mutex::new(writer),
                shield: Mutex::new(Shield::new(shield)),
                pending: PendingRequests::default(),
                registry: RwLock::new(registry),
                queue: MessageQueue::default(),
                disconnect_observers: Mutex::new(Vec::new()),
                dispatch_observers: Mutex::new(Vec::new()),
                loops: Mutex::new(Vec::new()),
                supervisor_stop: Mutex::new(None),
            }),
        })
    }

    /// Opens the connection and spawns its supervisor and receive threads.
    ///
    /// Starting an open connection does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotOpen`] when the connection has already
    /// closed, or the failure that prevented a thread from starting; in the
    /// latter case the connection is closed with
    /// [`CloseCode::InternalError`](crate::CloseCode::InternalError).
    pub fn start(&self) -> Result<(), ConnectionError> {
        let mut loops = lock(&self.shared.loops);
        if !self
            .shared
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Open)
        {
            return match self.state() {
                ConnectionState::Open => Ok(()),
                state => Err(ConnectionError::NotOpen { state }),
            };
        }
        let spawned = self.spawn_loops(&mut loops);
        drop(loops);
        if let Err(error) = spawned {
            warn!(
                target: CONNECTION_TARGET,
                remote = %self.remote_addr(),
                error = %error,
                "failed to start connection"
            );
            self.abort(CloseReason::internal_error("failed to start connection threads"));
            return Err(error);
        }
        info!(
            target: CONNECTION_TARGET,
            remote = %self.remote_addr(),
            mode = %self.processing_mode(),
            "connection open"
        );
        Ok(())
    }

    fn spawn_loops(&self, loops: &mut Vec<JoinHandle<()>>) -> Result<(), ConnectionError> {
        let reader = self.shared.socket.try_clone().map_err(socket_error)?;
        let (stop, stopped) = mpsc::channel();
        *lock(&self.shared.supervisor_stop) = Some(stop);

        let supervisor = self.clone();
        loops.push(spawn_named("blue-supervisor", move || {
            supervisor::run(&supervisor, &stopped);
        })?);
        let receiver = self.clone();
        loops.push(spawn_named("blue-receive", move || {
            receive::run(&receiver, reader);
        })?);
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    /// Returns `true` while the connection accepts sends.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Address of the peer.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote_addr
    }

    /// Local address of the stream.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Wall-clock time the stream was established.
    #[must_use]
    pub fn connected_at(&self) -> SystemTime {
        self.shared.connected_at
    }

    /// Handler execution model.
    #[must_use]
    pub fn processing_mode(&self) -> ProcessingMode {
        self.shared.mode
    }

    /// Policy enforced on this connection.
    #[must_use]
    pub fn shield_config(&self) -> ShieldConfig {
        *lock(&self.shared.shield).config()
    }

    /// Requests still awaiting a response.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    /// Returns `true` while the request is awaiting its response.
    #[must_use]
    pub fn is_awaiting(&self, correlation_id: CorrelationId) -> bool {
        self.shared.pending.find(correlation_id).is_some()
    }

    /// Messages waiting for [`Connection::process_all`].
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Returns `true` when both handles refer to the same connection.
    #[must_use]
    pub fn same_connection(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Registers an observer for the close reason.
    ///
    /// Observers run once, on the thread that starts the teardown, before the
    /// close handshake begins.
    pub fn on_disconnected<F>(&self, observer: F)
    where
        F: Fn(&Self, &CloseReason) + Send + Sync + 'static,
    {
        lock(&self.shared.disconnect_observers).push(Arc::new(observer));
    }

    /// Registers an observer for messages that could not be dispatched.
    pub fn on_dispatch_error<F>(&self, observer: F)
    where
        F: Fn(&Self, &DispatchError) + Send + Sync + 'static,
    {
        lock(&self.shared.dispatch_observers).push(Arc::new(observer));
    }

    /// Adds a request handler that receives this connection.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] when the tag is invalid or taken.
    pub fn register_request_handler<R, F>(&self, handler: F) -> Result<(), RegistrationError>
    where
        R: Request,
        F: Fn(&Self, R) -> Response + Send + Sync + 'static,
    {
        write(&self.shared.registry).register_request_handler(handler)
    }

    /// Adds an event handler that receives this connection.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] when the tag is invalid or taken.
    pub fn register_event_handler<E, F>(&self, handler: F) -> Result<(), RegistrationError>
    where
        E: Event,
        F: Fn(&Self, E) + Send + Sync + 'static,
    {
        write(&self.shared.registry).register_event_handler(handler)
    }

    /// Adds every handler of a controller, or none of them.
    ///
    /// # Errors
    ///
    /// Returns the controller's first [`RegistrationError`].
    pub fn register_controller<C>(&self, controller: &C) -> Result<(), RegistrationError>
    where
        C: Controller + ?Sized,
    {
        write(&self.shared.registry).register_controller(controller)
    }

    /// Snapshot of this connection's registry.
    #[must_use]
    pub fn registry(&self) -> DispatchRegistry {
        read(&self.shared.registry).clone()
    }

    /// Sends a request and registers it for correlation.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotOpen`] unless the connection is open,
    /// an encoding error, or the write failure that closed the connection.
    pub fn send_request<R: Request>(&self, request: &R) -> Result<ReplyHandle, ConnectionError> {
        self.ensure_open()?;
        let correlation_id = CorrelationId::fresh();
        let envelope = Envelope::request(correlation_id, request)?;
        let (entry, handle) = PendingRequest::new(correlation_id, R::TYPE_TAG, false);
        self.shared.pending.add(entry);
        if let Err(error) = self.send_frame(&envelope) {
            self.shared.pending.remove(correlation_id);
            return Err(error);
        }
        debug!(
            target: CONNECTION_TARGET,
            type_tag = R::TYPE_TAG,
            correlation_id = %correlation_id,
            "request sent"
        );
        Ok(handle)
    }

    /// Sends a fire-and-forget event.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotOpen`] unless the connection is open,
    /// an encoding error, or the write failure that closed the connection.
    pub fn send_event<E: Event>(&self, event: &E) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.send_frame(&Envelope::event(event)?)
    }

    /// Sends a response frame.
    ///
    /// Dispatch stamps and sends handler responses automatically; this is for
    /// replies produced outside a handler.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotOpen`] unless the connection is open,
    /// an encoding error, or the write failure that closed the connection.
    pub fn send_response(&self, response: &Response) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.send_frame(&Envelope::response(response)?)
    }

    /// Closes the connection with the peer's cooperation.
    ///
    /// Does nothing unless the connection is open. Otherwise the disconnect
    /// observers run, a close request carrying `reason` is sent, and the call
    /// waits up to [`CLOSE_ACK_TIMEOUT`] for the acknowledgement. The socket
    /// is then shut down, unanswered requests fail with `reason`, and the
    /// background threads are joined before the call returns.
    pub fn close(&self, reason: CloseReason) {
        if !self
            .shared
            .state
            .transition(ConnectionState::Open, ConnectionState::Closing)
        {
            debug!(
                target: CONNECTION_TARGET,
                state = %self.state(),
                "close ignored; connection is not open"
            );
            return;
        }
        info!(
            target: CONNECTION_TARGET,
            remote = %self.remote_addr(),
            reason = %reason,
            "closing connection"
        );
        self.notify_disconnected(&reason);
        if let Some(acknowledgement) = self.request_close(&reason) {
            match acknowledgement.wait_timeout(CLOSE_ACK_TIMEOUT) {
                Some(_) => debug!(target: CONNECTION_TARGET, "peer acknowledged close"),
                None => debug!(target: CONNECTION_TARGET, "close acknowledgement timed out"),
            }
        }
        self.release(&reason);
    }

    /// Closes with [`CloseReason::no_reason`].
    pub fn close_without_reason(&self) {
        self.close(CloseReason::no_reason());
    }

    /// Handles every message queued so far, oldest first.
    ///
    /// Each failure is reported to the dispatch-error observers; the remaining
    /// messages are still handled.
    ///
    /// # Errors
    ///
    /// Returns the first [`DispatchError`] after the drain completes.
    pub fn process_all(&self) -> Result<usize, DispatchError> {
        let messages = self.shared.queue.drain();
        let processed = messages.len();
        let mut first_error = None;
        for message in messages {
            if let Err(error) = self.dispatch_reported(message)
                && first_error.is_none()
            {
                first_error = Some(error);
            }
        }
        first_error.map_or(Ok(processed), Err)
    }

    /// Handles the oldest queued message, returning `false` when none waits.
    ///
    /// # Errors
    ///
    /// Returns the [`DispatchError`] raised by the message's handler.
    pub fn process_one(&self) -> Result<bool, DispatchError> {
        let Some(message) = self.shared.queue.pop() else {
            return Ok(false);
        };
        self.dispatch_reported(message)?;
        Ok(true)
    }

    fn ensure_open(&self) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::Open => Ok(()),
            state => Err(ConnectionError::NotOpen { state }),
        }
    }

    fn write_frame(&self, envelope: &Envelope) -> Result<(), ConnectionError> {
        let mut writer = lock(&self.shared.writer);
        envelope.write_to(&mut *writer)?;
        Ok(())
    }

    /// Writes a frame, closing the connection when the stream fails.
    fn send_frame(&self, envelope: &Envelope) -> Result<(), ConnectionError> {
        let result = self.write_frame(envelope);
        if let Err(ConnectionError::Codec(CodecError::Io(error))) = &result {
            warn!(
                target: CONNECTION_TARGET,
                remote = %self.remote_addr(),
                type_tag = envelope.type_tag(),
                error = %error,
                "write failed; closing connection"
            );
            self.close(CloseReason::internal_error(format!(
                "failed to write to stream: {error}"
            )));
        }
        result
    }

    pub(crate) fn send_ping(&self) {
        if let Err(error) = self.send_frame(&Envelope::ping()) {
            debug!(target: CONNECTION_TARGET, error = %error, "ping not sent");
        }
    }

    /// Sends the close request and registers it so the receive loop resolves
    /// the acknowledgement without queueing it.
    fn request_close(&self, reason: &CloseReason) -> Option<ReplyHandle> {
        let correlation_id = CorrelationId::fresh();
        let envelope = match Envelope::close(correlation_id, reason) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(target: CONNECTION_TARGET, error = %error, "failed to encode close request");
                return None;
            }
        };
        let (entry, handle) = PendingRequest::new(correlation_id, CLOSE_TAG, true);
        self.shared.pending.add(entry);
        if let Err(error) = self.write_frame(&envelope) {
            debug!(target: CONNECTION_TARGET, error = %error, "close request not sent");
            self.shared.pending.remove(correlation_id);
            return None;
        }
        Some(handle)
    }

    /// Acknowledges a close request from the peer.
    ///
    /// Returns `true` when this call started the teardown and the caller must
    /// stop reading.
    pub(crate) fn accept_remote_close(&self, correlation_id: CorrelationId, reason: CloseReason) -> bool {
        let first = self
            .shared
            .state
            .transition(ConnectionState::Open, ConnectionState::Closing);
        if first {
            info!(
                target: CONNECTION_TARGET,
                remote = %self.remote_addr(),
                reason = %reason,
                "peer closed connection"
            );
            self.notify_disconnected(&reason);
        }
        let acknowledgement = Envelope::response(&Response::ok().stamped(correlation_id));
        match acknowledgement {
            Ok(envelope) => {
                if let Err(error) = self.write_frame(&envelope) {
                    debug!(target: CONNECTION_TARGET, error = %error, "close acknowledgement not sent");
                }
            }
            Err(error) => {
                warn!(target: CONNECTION_TARGET, error = %error, "failed to encode close acknowledgement");
            }
        }
        if first {
            thread::sleep(REMOTE_CLOSE_GRACE);
            self.release(&reason);
        }
        first
    }

    /// Tears the connection down without the close handshake.
    ///
    /// Used when the peer can no longer be reached.
    pub(crate) fn abort(&self, reason: CloseReason) {
        if !self
            .shared
            .state
            .transition(ConnectionState::Open, ConnectionState::Closing)
        {
            return;
        }
        warn!(
            target: CONNECTION_TARGET,
            remote = %self.remote_addr(),
            reason = %reason,
            "connection lost"
        );
        self.notify_disconnected(&reason);
        self.release(&reason);
    }

    /// Releases every resource; only the caller that won `Open → Closing`
    /// reaches this.
    fn release(&self, reason: &CloseReason) {
        drop(lock(&self.shared.supervisor_stop).take());
        if let Err(error) = self.shared.socket.shutdown(Shutdown::Both)
            && error.kind() != io::ErrorKind::NotConnected
        {
            debug!(target: CONNECTION_TARGET, error = %error, "socket shutdown failed");
        }
        for entry in self.shared.pending.drain() {
            entry.fail(RequestError::ConnectionClosed {
                reason: reason.clone(),
            });
        }
        self.shared.queue.clear();
        self.join_loops();
        self.shared.state.store(ConnectionState::Closed);
        info!(
            target: CONNECTION_TARGET,
            remote = %self.remote_addr(),
            reason = %reason,
            "connection closed"
        );
    }

    fn join_loops(&self) {
        let handles = std::mem::take(&mut *lock(&self.shared.loops));
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            let role = handle.thread().name().unwrap_or("connection").to_owned();
            if handle.join().is_err() {
                warn!(target: CONNECTION_TARGET, role = %role, "connection thread panicked");
            }
        }
    }

    fn notify_disconnected(&self, reason: &CloseReason) {
        let observers = lock(&self.shared.disconnect_observers).clone();
        for observer in observers {
            observer(self, reason);
        }
    }

    pub(crate) fn admit_inbound(&self) {
        let admission = crate::shield::admit_blocking(&self.shared.shield, || self.is_open());
        if let crate::shield::Admission::Admitted { waited } = admission
            && !waited.is_zero()
        {
            debug!(
                target: CONNECTION_TARGET,
                waited_ms = waited.as_millis(),
                "inbound message delayed by rate limit"
            );
        }
    }

    pub(crate) fn expire_requests(&self) -> bool {
        let Some(timeout) = self.shield_config().response_timeout() else {
            return false;
        };
        let expired = self.shared.pending.timed_out_since(timeout);
        if self.fail_expired(expired, timeout) == 0 {
            return false;
        }
        self.close(CloseReason::timeout(format!(
            "no response within {} ms",
            timeout.as_millis()
        )));
        true
    }

    /// Fails the scanned entries that are still pending and returns how many
    /// there were; a response may have resolved an entry since the scan.
    fn fail_expired(&self, expired: Vec<PendingSummary>, timeout: Duration) -> usize {
        let mut failed = 0;
        for summary in expired {
            let Some(entry) = self.shared.pending.remove(summary.correlation_id) else {
                continue;
            };
            failed += 1;
            warn!(
                target: CONNECTION_TARGET,
                type_tag = entry.type_tag(),
                correlation_id = %entry.correlation_id(),
                age_ms = summary.age.as_millis(),
                "request timed out"
            );
            entry.fail(RequestError::TimedOut {
                correlation_id: entry.correlation_id(),
                timeout,
            });
        }
        failed
    }

    pub(crate) fn outlived(&self) -> bool {
        let Some(limit) = self.shield_config().life_time() else {
            return false;
        };
        if self.shared.established.elapsed() < limit {
            return false;
        }
        self.close(CloseReason::lifetime_exceeded(format!(
            "connection exceeded its {} ms lifetime",
            limit.as_millis()
        )));
        true
    }

    /// Hands an inbound message to the configured execution model.
    pub(crate) fn route(&self, message: Dispatchable) {
        if let Dispatchable::Response(response) = &message
            && let Some(correlation_id) = response.correlation_id()
            && self.shared.pending.is_inline(correlation_id)
        {
            if let Some(entry) = self.shared.pending.remove(correlation_id) {
                entry.complete(response.clone());
            }
            return;
        }
        match self.shared.mode {
            ProcessingMode::Queued => self.shared.queue.push(message),
            ProcessingMode::Concurrent => {
                let connection = self.clone();
                let spawned = thread::Builder::new()
                    .name("blue-dispatch".to_owned())
                    .spawn(move || {
                        if connection.dispatch_reported(message).is_err() {
                            debug!(target: DISPATCH_TARGET, "dispatch worker finished with error");
                        }
                    });
                if let Err(error) = spawned {
                    warn!(
                        target: DISPATCH_TARGET,
                        error = %error,
                        "failed to spawn dispatch worker; message dropped"
                    );
                }
            }
        }
    }

    fn dispatch_reported(&self, message: Dispatchable) -> Result<(), DispatchError> {
        let type_tag = message.type_tag().to_owned();
        self.dispatch(message).inspect_err(|error| {
            warn!(
                target: DISPATCH_TARGET,
                remote = %self.remote_addr(),
                type_tag = %type_tag,
                error = %error,
                "dispatch failed"
            );
            let observers = lock(&self.shared.dispatch_observers).clone();
            for observer in observers {
                observer(self, error);
            }
        })
    }

    fn dispatch(&self, message: Dispatchable) -> Result<(), DispatchError> {
        match message {
            Dispatchable::Request {
                type_tag,
                correlation_id,
                payload,
            } => {
                let response = self
                    .handler_for(&type_tag)?
                    .answer(self, correlation_id, payload)?;
                self.send_response(&response)
                    .map_err(|error| DispatchError::ReplyFailed {
                        type_tag,
                        message: error.to_string(),
                    })
            }
            Dispatchable::Event { type_tag, payload } => {
                self.handler_for(&type_tag)?.consume(self, payload)
            }
            Dispatchable::Response(response) => self.resolve(response),
        }
    }

    fn handler_for(&self, type_tag: &str) -> Result<HandlerEntry, DispatchError> {
        read(&self.shared.registry).resolve(type_tag)
    }

    fn resolve(&self, response: Response) -> Result<(), DispatchError> {
        let correlation_id = response
            .correlation_id()
            .ok_or(DispatchError::MissingCorrelation)?;
        let entry = self
            .shared
            .pending
            .remove(correlation_id)
            .ok_or(DispatchError::UnknownCorrelation { correlation_id })?;
        debug!(
            target: CONNECTION_TARGET,
            type_tag = entry.type_tag(),
            correlation_id = %correlation_id,
            code = response.code(),
            "response received"
        );
        entry.complete(response);
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Connection")
            .field("remote_addr", &self.shared.remote_addr)
            .field("local_addr", &self.shared.local_addr)
            .field("state", &self.state())
            .field("mode", &self.shared.mode)
            .finish_non_exhaustive()
    }
}

fn socket_error(source: io::Error) -> ConnectionError {
    ConnectionError::Socket { source }
}

fn spawn_named(
    role: &'static str,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, ConnectionError> {
    thread::Builder::new()
        .name(role.to_owned())
        .spawn(body)
        .map_err(|source| ConnectionError::ThreadSpawn { role, source })
}
