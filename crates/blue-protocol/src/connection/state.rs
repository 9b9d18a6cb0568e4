//! Atomic connection state.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a connection.
///
/// Transitions only move forward: `Connecting → Open → Closing → Closed`.
/// Exactly one caller wins the `Open → Closing` transition, and that caller
/// alone releases the connection's resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Socket established, loops not yet running.
    Connecting,
    /// Loops running; sends accepted.
    Open,
    /// Teardown in progress.
    Closing,
    /// Socket released and loops joined.
    Closed,
}

impl ConnectionState {
    const fn to_raw(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Open => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        formatter.write_str(label)
    }
}

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state.to_raw()))
    }

    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_raw(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn store(&self, state: ConnectionState) {
        self.0.store(state.to_raw(), Ordering::SeqCst);
    }

    /// Moves from `from` to `to`; `false` when another state was current.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from.to_raw(), to.to_raw(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
