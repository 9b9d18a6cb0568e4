//! Handler registry keyed by message type tag.

use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{DispatchError, MessageKind, RegistrationError};
use crate::connection::Connection;
use crate::message::{CorrelationId, Event, Request, Response, is_system_tag};

type RequestFn = dyn Fn(&Connection, Value) -> Result<Response, DispatchError> + Send + Sync;
type EventFn = dyn Fn(&Connection, Value) -> Result<(), DispatchError> + Send + Sync;

#[derive(Clone)]
enum Handler {
    Request(Arc<RequestFn>),
    Event(Arc<EventFn>),
}

/// One registered handler.
///
/// Entries are cheap to clone, so the connection clones the entry out of the
/// registry and invokes it without holding the registry lock.
#[derive(Clone)]
pub struct HandlerEntry {
    type_tag: &'static str,
    message_type: &'static str,
    with_connection: bool,
    handler: Handler,
}

impl HandlerEntry {
    /// Tag the handler is registered for.
    #[must_use]
    pub const fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    /// Rust type the handler decodes.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        self.message_type
    }

    /// Whether the handler receives the connection.
    #[must_use]
    pub const fn takes_connection(&self) -> bool {
        self.with_connection
    }

    /// Kind of message the handler accepts.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self.handler {
            Handler::Request(_) => MessageKind::Request,
            Handler::Event(_) => MessageKind::Event,
        }
    }

    /// Runs a request handler and stamps the request's identifier on the reply.
    pub(crate) fn answer(
        &self,
        connection: &Connection,
        correlation_id: CorrelationId,
        payload: Value,
    ) -> Result<Response, DispatchError> {
        match &self.handler {
            Handler::Request(handler) => {
                handler(connection, payload).map(|response| response.stamped(correlation_id))
            }
            Handler::Event(_) => Err(self.mismatch(MessageKind::Request)),
        }
    }

    /// Runs an event handler.
    pub(crate) fn consume(&self, connection: &Connection, payload: Value) -> Result<(), DispatchError> {
        match &self.handler {
            Handler::Event(handler) => handler(connection, payload),
            Handler::Request(_) => Err(self.mismatch(MessageKind::Event)),
        }
    }

    fn mismatch(&self, received: MessageKind) -> DispatchError {
        DispatchError::KindMismatch {
            type_tag: self.type_tag.to_owned(),
            registered: self.kind(),
            received,
        }
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HandlerEntry")
            .field("type_tag", &self.type_tag)
            .field("message_type", &self.message_type)
            .field("kind", &self.kind())
            .field("with_connection", &self.with_connection)
            .finish()
    }
}

/// Bundle of handlers registered together.
///
/// Implementors register every handler they own in one call; if any
/// registration fails none of the controller's handlers are kept.
pub trait Controller {
    /// Registers the controller's handlers.
    ///
    /// # Errors
    ///
    /// Returns the first [`RegistrationError`] encountered.
    fn register(&self, registry: &mut DispatchRegistry) -> Result<(), RegistrationError>;
}

/// Mapping from message type tag to handler.
///
/// Listeners clone their registry into every accepted connection, after which
/// each connection's copy evolves independently.
#[derive(Clone, Default)]
pub struct DispatchRegistry {
    entries: HashMap<&'static str, HandlerEntry>,
}

impl DispatchRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fluent builder.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registers a request handler that also receives the connection.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] when the tag is invalid or taken.
    pub fn register_request_handler<R, F>(&mut self, handler: F) -> Result<(), RegistrationError>
    where
        R: Request,
        F: Fn(&Connection, R) -> Response + Send + Sync + 'static,
    {
        let handler: Arc<RequestFn> = Arc::new(move |connection: &Connection, payload: Value| {
            let request = decode::<R>(R::TYPE_TAG, payload)?;
            Ok(handler(connection, request))
        });
        self.insert(entry::<R>(true, Handler::Request(handler)))
    }

    /// Registers a request handler that only receives the request.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] when the tag is invalid or taken.
    pub fn register_request_fn<R, F>(&mut self, handler: F) -> Result<(), RegistrationError>
    where
        R: Request,
        F: Fn(R) -> Response + Send + Sync + 'static,
    {
        let handler: Arc<RequestFn> = Arc::new(move |_: &Connection, payload: Value| {
            let request = decode::<R>(R::TYPE_TAG, payload)?;
            Ok(handler(request))
        });
        self.insert(entry::<R>(false, Handler::Request(handler)))
    }

    /// Registers an event handler that also receives the connection.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] when the tag is invalid or taken.
    pub fn register_event_handler<E, F>(&mut self, handler: F) -> Result<(), RegistrationError>
    where
        E: Event,
        F: Fn(&Connection, E) + Send + Sync + 'static,
    {
        let handler: Arc<EventFn> = Arc::new(move |connection: &Connection, payload: Value| {
            handler(connection, decode::<E>(E::TYPE_TAG, payload)?);
            Ok(())
        });
        self.insert(entry::<E>(true, Handler::Event(handler)))
    }

    /// Registers an event handler that only receives the event.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] when the tag is invalid or taken.
    pub fn register_event_fn<E, F>(&mut self, handler: F) -> Result<(), RegistrationError>
    where
        E: Event,
        F: Fn(E) + Send + Sync + 'static,
    {
        let handler: Arc<EventFn> = Arc::new(move |_: &Connection, payload: Value| {
            handler(decode::<E>(E::TYPE_TAG, payload)?);
            Ok(())
        });
        self.insert(entry::<E>(false, Handler::Event(handler)))
    }

    /// Registers every handler of `controller`, or none of them.
    ///
    /// # Errors
    ///
    /// Returns the controller's first [`RegistrationError`]; the registry is
    /// left unchanged.
    pub fn register_controller<C>(&mut self, controller: &C) -> Result<(), RegistrationError>
    where
        C: Controller + ?Sized,
    {
        let mut staged = self.clone();
        controller.register(&mut staged)?;
        *self = staged;
        Ok(())
    }

    /// Returns the entry for `type_tag`.
    #[must_use]
    pub fn get(&self, type_tag: &str) -> Option<&HandlerEntry> {
        self.entries.get(type_tag)
    }

    /// Returns `true` when a handler for `type_tag` exists.
    #[must_use]
    pub fn contains(&self, type_tag: &str) -> bool {
        self.entries.contains_key(type_tag)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered tags in sorted order.
    #[must_use]
    pub fn type_tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.entries.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    pub(crate) fn resolve(&self, type_tag: &str) -> Result<HandlerEntry, DispatchError> {
        self.get(type_tag)
            .cloned()
            .ok_or_else(|| DispatchError::no_handler(type_tag))
    }

    fn insert(&mut self, entry: HandlerEntry) -> Result<(), RegistrationError> {
        validate_tag(entry.type_tag, entry.message_type)?;
        if self.entries.contains_key(entry.type_tag) {
            return Err(RegistrationError::Duplicate {
                type_tag: entry.type_tag,
                message_type: entry.message_type,
            });
        }
        self.entries.insert(entry.type_tag, entry);
        Ok(())
    }
}

impl fmt::Debug for DispatchRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DispatchRegistry")
            .field("type_tags", &self.type_tags())
            .finish()
    }
}

fn entry<M: crate::message::Message>(with_connection: bool, handler: Handler) -> HandlerEntry {
    HandlerEntry {
        type_tag: M::TYPE_TAG,
        message_type: type_name::<M>(),
        with_connection,
        handler,
    }
}

fn validate_tag(type_tag: &'static str, message_type: &'static str) -> Result<(), RegistrationError> {
    if type_tag.is_empty() {
        return Err(RegistrationError::EmptyTag { message_type });
    }
    if is_system_tag(type_tag) {
        return Err(RegistrationError::ReservedTag {
            type_tag,
            message_type,
        });
    }
    Ok(())
}

fn decode<M: DeserializeOwned>(type_tag: &str, payload: Value) -> Result<M, DispatchError> {
    serde_json::from_value(payload).map_err(|source| DispatchError::Payload {
        type_tag: type_tag.to_owned(),
        message_type: type_name::<M>(),
        source,
    })
}

/// Fluent registry construction that reports the first failure at the end.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: DispatchRegistry,
    error: Option<RegistrationError>,
}

impl RegistryBuilder {
    /// Adds a request handler that receives the connection.
    #[must_use]
    pub fn request_handler<R, F>(self, handler: F) -> Self
    where
        R: Request,
        F: Fn(&Connection, R) -> Response + Send + Sync + 'static,
    {
        self.apply(|registry| registry.register_request_handler(handler))
    }

    /// Adds a request handler that only receives the request.
    #[must_use]
    pub fn request_fn<R, F>(self, handler: F) -> Self
    where
        R: Request,
        F: Fn(R) -> Response + Send + Sync + 'static,
    {
        self.apply(|registry| registry.register_request_fn(handler))
    }

    /// Adds an event handler that receives the connection.
    #[must_use]
    pub fn event_handler<E, F>(self, handler: F) -> Self
    where
        E: Event,
        F: Fn(&Connection, E) + Send + Sync + 'static,
    {
        self.apply(|registry| registry.register_event_handler(handler))
    }

    /// Adds an event handler that only receives the event.
    #[must_use]
    pub fn event_fn<E, F>(self, handler: F) -> Self
    where
        E: Event,
        F: Fn(E) + Send + Sync + 'static,
    {
        self.apply(|registry| registry.register_event_fn(handler))
    }

    /// Adds every handler of a controller.
    #[must_use]
    pub fn controller<C>(self, controller: &C) -> Self
    where
        C: Controller + ?Sized,
    {
        self.apply(|registry| registry.register_controller(controller))
    }

    /// Finishes the registry.
    ///
    /// # Errors
    ///
    /// Returns the first [`RegistrationError`] raised by any step.
    pub fn build(self) -> Result<DispatchRegistry, RegistrationError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.registry),
        }
    }

    fn apply(
        mut self,
        step: impl FnOnce(&mut DispatchRegistry) -> Result<(), RegistrationError>,
    ) -> Self {
        if self.error.is_none()
            && let Err(error) = step(&mut self.registry)
        {
            self.error = Some(error);
        }
        self
    }
}
