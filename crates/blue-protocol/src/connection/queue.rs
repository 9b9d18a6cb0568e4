//! Inbound messages waiting for the application to drain them.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::message::Dispatchable;
use crate::sync::lock;

#[derive(Debug, Default)]
pub(crate) struct MessageQueue {
    items: Mutex<VecDeque<Dispatchable>>,
}

impl MessageQueue {
    pub(crate) fn push(&self, message: Dispatchable) {
        lock(&self.items).push_back(message);
    }

    pub(crate) fn pop(&self) -> Option<Dispatchable> {
        lock(&self.items).pop_front()
    }

    /// Removes everything queued so far; later arrivals wait for the next drain.
    pub(crate) fn drain(&self) -> Vec<Dispatchable> {
        lock(&self.items).drain(..).collect()
    }

    pub(crate) fn clear(&self) {
        lock(&self.items).clear();
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.items).len()
    }
}
