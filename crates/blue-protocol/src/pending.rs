//! Requests awaiting their response.
//!
//! Every outbound request is registered here before its frame is written. The
//! entry resolves exactly once: with the peer's response, with a timeout, or
//! with the reason its connection closed.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::message::{CloseReason, CorrelationId, Response};
use crate::sync::lock;

/// Why a request never received a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The response did not arrive within the response timeout.
    #[error("request {correlation_id} timed out after {timeout:?}")]
    TimedOut {
        /// Identifier of the request.
        correlation_id: CorrelationId,
        /// Configured response timeout.
        timeout: Duration,
    },
    /// The connection closed first.
    #[error("connection closed before a response arrived: {reason}")]
    ConnectionClosed {
        /// Reason the connection closed.
        reason: CloseReason,
    },
}

type ResponseCallback = Box<dyn FnOnce(&Response) + Send>;

#[derive(Default)]
struct SlotState {
    outcome: Option<Result<Response, RequestError>>,
    callbacks: Vec<ResponseCallback>,
}

#[derive(Default)]
struct ReplySlot {
    state: Mutex<SlotState>,
    resolved: Condvar,
}

impl ReplySlot {
    /// Stores the first outcome and wakes waiters; later outcomes are ignored.
    fn resolve(&self, outcome: Result<Response, RequestError>) -> bool {
        let callbacks = {
            let mut state = lock(&self.state);
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.callbacks)
        };
        self.resolved.notify_all();
        if let Ok(response) = &outcome {
            for callback in callbacks {
                callback(response);
            }
        }
        true
    }
}

/// Caller's view of a sent request.
#[derive(Clone)]
pub struct ReplyHandle {
    correlation_id: CorrelationId,
    slot: Arc<ReplySlot>,
}

impl ReplyHandle {
    /// Identifier stamped on the request frame.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Returns `true` once the request has an outcome.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        lock(&self.slot.state).outcome.is_some()
    }

    /// Runs `callback` with the response once it arrives.
    ///
    /// The callback runs immediately when the response is already present and
    /// never runs when the request fails.
    pub fn on_response<F>(&self, callback: F)
    where
        F: FnOnce(&Response) + Send + 'static,
    {
        let mut state = lock(&self.slot.state);
        match &state.outcome {
            None => state.callbacks.push(Box::new(callback)),
            Some(Ok(response)) => {
                let response = response.clone();
                drop(state);
                callback(&response);
            }
            Some(Err(_)) => {}
        }
    }

    /// Blocks until the request resolves.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] when the request timed out or its connection
    /// closed.
    pub fn wait(&self) -> Result<Response, RequestError> {
        let mut state = lock(&self.slot.state);
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            state = self
                .slot
                .resolved
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Blocks for at most `timeout`; `None` when still unresolved.
    ///
    /// A timeout too large to represent as a deadline waits indefinitely.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Response, RequestError>> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait());
        };
        let mut state = lock(&self.slot.state);
        loop {
            if let Some(outcome) = &state.outcome {
                return Some(outcome.clone());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self
                .slot
                .resolved
                .wait_timeout(state, remaining)
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .0;
        }
    }
}

impl std::fmt::Debug for ReplyHandle {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ReplyHandle")
            .field("correlation_id", &self.correlation_id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Registry entry for one outbound request.
pub(crate) struct PendingRequest {
    correlation_id: CorrelationId,
    type_tag: &'static str,
    sent_at: Instant,
    inline: bool,
    slot: Arc<ReplySlot>,
}

impl PendingRequest {
    /// Creates an entry and the handle returned to the caller.
    ///
    /// `inline` marks protocol requests whose responses must bypass the
    /// message queue.
    pub(crate) fn new(
        correlation_id: CorrelationId,
        type_tag: &'static str,
        inline: bool,
    ) -> (Self, ReplyHandle) {
        let slot = Arc::new(ReplySlot::default());
        let handle = ReplyHandle {
            correlation_id,
            slot: Arc::clone(&slot),
        };
        let entry = Self {
            correlation_id,
            type_tag,
            sent_at: Instant::now(),
            inline,
            slot,
        };
        (entry, handle)
    }

    pub(crate) const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub(crate) const fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    pub(crate) fn summary(&self, now: Instant) -> PendingSummary {
        PendingSummary {
            correlation_id: self.correlation_id,
            type_tag: self.type_tag,
            age: now.saturating_duration_since(self.sent_at),
        }
    }

    pub(crate) fn complete(&self, response: Response) -> bool {
        self.slot.resolve(Ok(response))
    }

    pub(crate) fn fail(&self, error: RequestError) -> bool {
        self.slot.resolve(Err(error))
    }
}

/// Snapshot of a pending entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingSummary {
    pub(crate) correlation_id: CorrelationId,
    pub(crate) type_tag: &'static str,
    pub(crate) age: Duration,
}

/// Thread-safe map from correlation identifier to pending entry.
#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: Mutex<HashMap<CorrelationId, PendingRequest>>,
}

impl PendingRequests {
    pub(crate) fn add(&self, request: PendingRequest) {
        lock(&self.entries).insert(request.correlation_id, request);
    }

    /// Removes the entry; a missing identifier is not an error.
    pub(crate) fn remove(&self, correlation_id: CorrelationId) -> Option<PendingRequest> {
        lock(&self.entries).remove(&correlation_id)
    }

    pub(crate) fn find(&self, correlation_id: CorrelationId) -> Option<PendingSummary> {
        lock(&self.entries)
            .get(&correlation_id)
            .map(|entry| entry.summary(Instant::now()))
    }

    pub(crate) fn is_inline(&self, correlation_id: CorrelationId) -> bool {
        lock(&self.entries)
            .get(&correlation_id)
            .is_some_and(|entry| entry.inline)
    }

    /// Entries older than `threshold`, left in place.
    pub(crate) fn timed_out_since(&self, threshold: Duration) -> Vec<PendingSummary> {
        self.timed_out_as_of(Instant::now(), threshold)
    }

    pub(crate) fn timed_out_as_of(&self, now: Instant, threshold: Duration) -> Vec<PendingSummary> {
        lock(&self.entries)
            .values()
            .map(|entry| entry.summary(now))
            .filter(|summary| summary.age > threshold)
            .collect()
    }

    /// Removes every entry.
    pub(crate) fn drain(&self) -> Vec<PendingRequest> {
        lock(&self.entries).drain().map(|(_, entry)| entry).collect()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }
}
