//! Sliding-window admission control.
//!
//! A [`Shield`] throttles inbound messages on one connection; a
//! [`ServerShield`] throttles accepted sockets on one listener. Both keep a
//! one-second and a one-minute window of admission instants. Admission is
//! granted only when both windows have spare capacity, and the instant is then
//! recorded in both. A caller that is refused does not fail: it waits and
//! retries until admitted or told to stop.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use blue_config::{ServerShieldConfig, ShieldConfig};
use tracing::debug;

use crate::sync::lock;

pub(crate) const SHIELD_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::shield");

/// Delay between admission attempts while a limit is exhausted.
pub const ADMISSION_POLL_INTERVAL: Duration = Duration::from_millis(100);

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

/// Admission instants within a trailing span.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    span: Duration,
    limit: usize,
    hits: VecDeque<Instant>,
}

impl SlidingWindow {
    /// Creates an empty window admitting `limit` hits per `span`.
    #[must_use]
    pub fn new(span: Duration, limit: u32) -> Self {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Self {
            span,
            limit,
            hits: VecDeque::new(),
        }
    }

    /// Drops hits at least one span older than `now`.
    pub fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.hits.front()
            && now.saturating_duration_since(*oldest) >= self.span
        {
            self.hits.pop_front();
        }
    }

    /// Returns `true` when another hit fits.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.hits.len() < self.limit
    }

    /// Records a hit.
    pub fn record(&mut self, now: Instant) {
        self.hits.push_back(now);
    }

    /// Hits currently inside the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Returns `true` when the window holds no hits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Paired per-second and per-minute windows.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    per_second: SlidingWindow,
    per_minute: SlidingWindow,
}

impl RateLimiter {
    /// Creates a limiter with empty windows.
    #[must_use]
    pub fn new(per_second: u32, per_minute: u32) -> Self {
        Self {
            per_second: SlidingWindow::new(SECOND, per_second),
            per_minute: SlidingWindow::new(MINUTE, per_minute),
        }
    }

    /// Admits one hit at `now` when both windows have capacity.
    ///
    /// Nothing is recorded when admission is refused.
    pub fn try_admit_at(&mut self, now: Instant) -> bool {
        self.per_second.prune(now);
        self.per_minute.prune(now);
        if !(self.per_second.has_capacity() && self.per_minute.has_capacity()) {
            return false;
        }
        self.per_second.record(now);
        self.per_minute.record(now);
        true
    }

    /// Hits admitted in the current second.
    #[must_use]
    pub fn second_window(&self) -> &SlidingWindow {
        &self.per_second
    }

    /// Hits admitted in the current minute.
    #[must_use]
    pub fn minute_window(&self) -> &SlidingWindow {
        &self.per_minute
    }
}

/// Something that can admit one hit at a given instant.
pub trait Admit {
    /// Attempts admission at `now`.
    fn try_admit_at(&mut self, now: Instant) -> bool;
}

impl Admit for RateLimiter {
    fn try_admit_at(&mut self, now: Instant) -> bool {
        Self::try_admit_at(self, now)
    }
}

/// Outcome of a blocking admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admitted after waiting for `waited`.
    Admitted {
        /// Time spent waiting for capacity.
        waited: Duration,
    },
    /// The caller stopped waiting before capacity appeared.
    Abandoned,
}

/// Blocks until `gate` admits a hit or `keep_waiting` returns `false`.
///
/// The lock is released between attempts so other threads can inspect or
/// reconfigure the gate while a caller waits.
pub fn admit_blocking<G: Admit>(gate: &Mutex<G>, keep_waiting: impl Fn() -> bool) -> Admission {
    let started = Instant::now();
    let mut logged = false;
    loop {
        if lock(gate).try_admit_at(Instant::now()) {
            return Admission::Admitted {
                waited: started.elapsed(),
            };
        }
        if !keep_waiting() {
            return Admission::Abandoned;
        }
        if !logged {
            debug!(target: SHIELD_TARGET, "rate limit reached; delaying admission");
            logged = true;
        }
        thread::sleep(ADMISSION_POLL_INTERVAL);
    }
}

/// Per-connection policy paired with its live windows.
#[derive(Debug, Clone)]
pub struct Shield {
    config: ShieldConfig,
    limiter: RateLimiter,
}

impl Shield {
    /// Builds a shield with empty windows from a policy template.
    #[must_use]
    pub fn new(config: ShieldConfig) -> Self {
        Self {
            limiter: RateLimiter::new(config.max_requests_per_second, config.max_requests_per_minute),
            config,
        }
    }

    /// Policy this shield enforces.
    #[must_use]
    pub const fn config(&self) -> &ShieldConfig {
        &self.config
    }
}

impl Admit for Shield {
    fn try_admit_at(&mut self, now: Instant) -> bool {
        self.limiter.try_admit_at(now)
    }
}

/// Listener policy paired with its live windows.
#[derive(Debug, Clone)]
pub struct ServerShield {
    config: ServerShieldConfig,
    limiter: RateLimiter,
}

impl ServerShield {
    /// Builds a server shield with empty windows.
    #[must_use]
    pub fn new(config: ServerShieldConfig) -> Self {
        Self {
            limiter: RateLimiter::new(
                config.max_connections_per_second,
                config.max_connections_per_minute,
            ),
            config,
        }
    }

    /// Whether accepted sockets are exposed.
    #[must_use]
    pub const fn accepts_new_connections(&self) -> bool {
        self.config.accept_new_connections
    }

    /// Toggles whether accepted sockets are exposed or refused.
    pub const fn set_accept_new_connections(&mut self, accept: bool) {
        self.config.accept_new_connections = accept;
    }

    /// Policy cloned into every accepted connection.
    #[must_use]
    pub const fn client_template(&self) -> ShieldConfig {
        self.config.default_client_shield
    }
}

impl Admit for ServerShield {
    fn try_admit_at(&mut self, now: Instant) -> bool {
        self.limiter.try_admit_at(now)
    }
}
