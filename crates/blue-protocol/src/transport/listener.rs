//! Listener implementation for protocol sockets.

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;

use blue_config::{Config, Endpoint, ProcessingMode, ServerShieldConfig};
use tracing::{debug, info, warn};

use super::{LISTENER_TARGET, ListenerError};
use crate::connection::{Connection, ConnectionError, ConnectionOptions};
use crate::dispatch::DispatchRegistry;
use crate::message::CloseReason;
use crate::shield::{Admission, ServerShield, admit_blocking};
use crate::sync::lock;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);
const REFUSAL_MESSAGE: &str = "listener is not accepting new connections";

type ClientObserver = Arc<dyn Fn(&Connection) + Send + Sync>;
type ClientDisconnectObserver = Arc<dyn Fn(&Connection, &CloseReason) + Send + Sync>;

/// Settings shared by every connection a listener produces.
#[derive(Debug, Clone, Default)]
pub struct ListenerOptions {
    /// Listener policy, including the per-connection template.
    pub shield: ServerShieldConfig,
    /// Template registry cloned into every connection.
    pub registry: DispatchRegistry,
    /// Handler execution model for every connection.
    pub mode: ProcessingMode,
}

impl ListenerOptions {
    /// Takes the shield and processing mode from `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            shield: config.server_shield,
            registry: DispatchRegistry::default(),
            mode: config.processing_mode,
        }
    }

    /// Replaces the listener policy.
    #[must_use]
    pub const fn with_shield(mut self, shield: ServerShieldConfig) -> Self {
        self.shield = shield;
        self
    }

    /// Replaces the template registry.
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

/// Listener bound to an endpoint but not yet accepting.
pub struct SocketListener {
    endpoint: Endpoint,
    local_addr: SocketAddr,
    listener: TcpListener,
    options: ListenerOptions,
    connected: Vec<ClientObserver>,
    disconnected: Vec<ClientDisconnectObserver>,
}

impl SocketListener {
    /// Validates the policy and binds the endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the shield is invalid, the endpoint
    /// does not resolve, or binding fails.
    pub fn bind(endpoint: &Endpoint, options: ListenerOptions) -> Result<Self, ListenerError> {
        options.shield.validate()?;
        let addr = endpoint.resolve()?;
        let listener =
            TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::BindTcp { addr, source })?;
        Ok(Self {
            endpoint: endpoint.clone(),
            local_addr,
            listener,
            options,
            connected: Vec::new(),
            disconnected: Vec::new(),
        })
    }

    /// Address the socket is bound to, including any ephemeral port.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registers an observer for connections once they are open.
    pub fn on_client_connected<F>(&mut self, observer: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.connected.push(Arc::new(observer));
    }

    /// Registers an observer for connections as they close.
    pub fn on_client_disconnected<F>(&mut self, observer: F)
    where
        F: Fn(&Connection, &CloseReason) + Send + Sync + 'static,
    {
        self.disconnected.push(Arc::new(observer));
    }

    /// Starts accepting on a background thread.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the socket cannot be made non-blocking
    /// or the thread cannot be spawned.
    pub fn start(self) -> Result<ListenerHandle, ListenerError> {
        self.listener
            .set_nonblocking(true)
            .map_err(|source| ListenerError::NonBlocking { source })?;
        let Self {
            endpoint,
            local_addr,
            listener,
            options,
            connected,
            disconnected,
        } = self;
        let shared = Arc::new(ListenerShared {
            endpoint,
            local_addr,
            shield: Mutex::new(ServerShield::new(options.shield)),
            registry: options.registry,
            mode: options.mode,
            shutdown: AtomicBool::new(false),
            connected,
            disconnected,
            connections: Mutex::new(Vec::new()),
        });
        let accept_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("blue-listener".to_owned())
            .spawn(move || run_accept_loop(&listener, &accept_shared))
            .map_err(|source| ListenerError::ThreadSpawn { source })?;
        Ok(ListenerHandle {
            shared,
            handle: Some(handle),
        })
    }
}

impl fmt::Debug for SocketListener {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SocketListener")
            .field("endpoint", &self.endpoint)
            .field("local_addr", &self.local_addr)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

struct ListenerShared {
    endpoint: Endpoint,
    local_addr: SocketAddr,
    shield: Mutex<ServerShield>,
    registry: DispatchRegistry,
    mode: ProcessingMode,
    shutdown: AtomicBool,
    connected: Vec<ClientObserver>,
    disconnected: Vec<ClientDisconnectObserver>,
    connections: Mutex<Vec<Connection>>,
}

impl ListenerShared {
    fn is_stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn accepting(&self) -> bool {
        !self.is_stopping() && lock(&self.shield).accepts_new_connections()
    }

    /// Per-connection copies of the client shield and the registry.
    fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            shield: lock(&self.shield).client_template(),
            registry: self.registry.clone(),
            mode: self.mode,
        }
    }

    fn admit_socket(self: &Arc<Self>, stream: TcpStream) {
        let connection = match Connection::from_stream(stream, self.connection_options()) {
            Ok(connection) => connection,
            Err(error) => {
                warn!(target: LISTENER_TARGET, error = %error, "failed to prepare accepted socket");
                return;
            }
        };
        if !self.accepting() {
            refuse(connection);
            return;
        }
        self.track(&connection);
        if let Err(error) = connection.start() {
            warn!(target: LISTENER_TARGET, error = %error, "failed to start accepted connection");
            self.forget(&connection);
            return;
        }
        self.client_connected(&connection);
    }

    /// Wires the disconnect callback and records the connection.
    fn track(self: &Arc<Self>, connection: &Connection) {
        let listener = Arc::downgrade(self);
        connection.on_disconnected(move |connection, reason| {
            if let Some(listener) = listener.upgrade() {
                listener.client_disconnected(connection, reason);
            }
        });
        lock(&self.connections).push(connection.clone());
    }

    fn forget(&self, connection: &Connection) {
        lock(&self.connections).retain(|tracked| !tracked.same_connection(connection));
    }

    fn client_connected(&self, connection: &Connection) {
        info!(
            target: LISTENER_TARGET,
            remote = %connection.remote_addr(),
            "client connected"
        );
        for observer in &self.connected {
            observer(connection);
        }
    }

    fn client_disconnected(&self, connection: &Connection, reason: &CloseReason) {
        self.forget(connection);
        info!(
            target: LISTENER_TARGET,
            remote = %connection.remote_addr(),
            reason = %reason,
            "client disconnected"
        );
        for observer in &self.disconnected {
            observer(connection, reason);
        }
    }

    /// Waits for the connection-rate shield before a socket is handled.
    fn throttle(&self) -> bool {
        match admit_blocking(&self.shield, || !self.is_stopping()) {
            Admission::Admitted { waited } => {
                if !waited.is_zero() {
                    debug!(
                        target: LISTENER_TARGET,
                        waited_ms = waited.as_millis(),
                        "connection admission delayed by rate limit"
                    );
                }
                true
            }
            Admission::Abandoned => false,
        }
    }
}

/// Starts and immediately closes a connection the listener will not expose.
fn refuse(connection: Connection) {
    info!(
        target: LISTENER_TARGET,
        remote = %connection.remote_addr(),
        "refusing connection"
    );
    if let Err(error) = connection.start() {
        debug!(target: LISTENER_TARGET, error = %error, "refused connection did not start");
        return;
    }
    let refused = connection.clone();
    let spawned = thread::Builder::new()
        .name("blue-refuse".to_owned())
        .spawn(move || refused.close(CloseReason::connection_refused(REFUSAL_MESSAGE)));
    if let Err(error) = spawned {
        debug!(target: LISTENER_TARGET, error = %error, "closing refused connection inline");
        connection.close(CloseReason::connection_refused(REFUSAL_MESSAGE));
    }
}

/// Handle to the background listener thread.
pub struct ListenerHandle {
    shared: Arc<ListenerShared>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Endpoint the listener was bound from.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    /// Returns `true` until shutdown is requested or the thread exits.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.shared.is_stopping()
            && self
                .handle
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Whether accepted sockets are exposed.
    #[must_use]
    pub fn accepts_new_connections(&self) -> bool {
        self.shared.accepting()
    }

    /// Toggles whether accepted sockets are exposed or refused.
    pub fn set_accept_new_connections(&self, accept: bool) {
        lock(&self.shared.shield).set_accept_new_connections(accept);
    }

    /// Opens an outbound connection wired like an accepted one.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the peer cannot be reached or the
    /// connection fails to start.
    pub fn connect(&self, addr: SocketAddr) -> Result<Connection, ConnectionError> {
        let connection = Connection::connect(addr, self.shared.connection_options())?;
        self.shared.track(&connection);
        if let Err(error) = connection.start() {
            self.shared.forget(&connection);
            return Err(error);
        }
        self.shared.client_connected(&connection);
        Ok(connection)
    }

    /// Open connections produced by this listener.
    #[must_use]
    pub fn connections(&self) -> Vec<Connection> {
        lock(&self.shared.connections)
            .iter()
            .filter(|connection| connection.is_open())
            .cloned()
            .collect()
    }

    /// Stops accepting; existing connections stay open.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
    }

    /// Waits for the accept thread to exit.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] when the thread panicked.
    pub fn join(mut self) -> Result<(), ListenerError> {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(()) => Ok(()),
                Err(_) => Err(ListenerError::ThreadPanic),
            }
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ListenerHandle")
            .field("endpoint", &self.shared.endpoint)
            .field("local_addr", &self.shared.local_addr)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
    }
}

fn run_accept_loop(listener: &TcpListener, shared: &Arc<ListenerShared>) {
    info!(
        target: LISTENER_TARGET,
        endpoint = %shared.endpoint,
        local_addr = %shared.local_addr,
        "socket listener active"
    );
    let mut last_error = None::<io::ErrorKind>;
    while !shared.is_stopping() {
        match accept_connection(listener) {
            Ok(Some(stream)) => {
                last_error = None;
                if shared.throttle() {
                    shared.admit_socket(stream);
                }
            }
            Ok(None) => {
                thread::sleep(ACCEPT_BACKOFF);
            }
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(
                        target: LISTENER_TARGET,
                        error = %error,
                        "socket accept error"
                    );
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    info!(
        target: LISTENER_TARGET,
        endpoint = %shared.endpoint,
        "socket listener stopped"
    );
}

fn accept_connection(listener: &TcpListener) -> Result<Option<TcpStream>, io::Error> {
    match listener.accept() {
        Ok((stream, _)) => {
            stream.set_nonblocking(false)?;
            Ok(Some(stream))
        }
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(error) => Err(error),
    }
}
