//! Circuit breaker guarding the broker.
//!
//! An explicit three-state machine:
//!
//! ```text
//!            failures >= threshold               open_timeout elapsed
//!  Closed ─────────────────────────▶ Open ───────────────────────────▶ HalfOpen
//!    ▲                                ▲                                   │
//!    │                                └──────────── trial fails ──────────┤
//!    └────────────────────────────── trial succeeds ──────────────────────┘
//! ```
//!
//! - **Closed**: calls pass through. Consecutive failures are counted inside a
//!   rolling `interval`; the counters reset when the interval rolls over.
//! - **Open**: calls are refused without touching the broker until
//!   `open_timeout` has elapsed.
//! - **HalfOpen**: up to `half_open_max_requests` trial calls are let through.
//!   The first success closes the breaker, the first failure reopens it.
//!
//! Every transition bumps a generation counter; outcomes reported for a permit
//! issued in an older generation are ignored.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::publisher::PublishError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Consecutive failures (within `interval`) that trip the breaker.
    pub failure_threshold: u32,
    /// Rolling window for the Closed-state counters. Zero disables rolling.
    pub interval: Duration,
    /// How long the breaker stays Open before probing.
    pub open_timeout: Duration,
    /// Concurrent trial calls admitted while HalfOpen.
    pub half_open_max_requests: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            interval: Duration::from_secs(60),
            open_timeout: Duration::from_secs(30),
            half_open_max_requests: 5,
        }
    }
}

/// Counters for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    fn on_abandon(&mut self) {
        self.requests = self.requests.saturating_sub(1);
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { window_ends: Option<Instant> },
    Open { retry_at: Instant },
    HalfOpen,
}

impl Phase {
    fn state(&self) -> BreakerState {
        match self {
            Phase::Closed { .. } => BreakerState::Closed,
            Phase::Open { .. } => BreakerState::Open,
            Phase::HalfOpen => BreakerState::HalfOpen,
        }
    }
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    counts: Counts,
    generation: u64,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    Failure,
    Abandoned,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        let now = Instant::now();
        let window_ends = window_end(&settings, now);
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(Inner {
                phase: Phase::Closed { window_ends },
                counts: Counts::default(),
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Current state, after applying any time-based transition that is due.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.advance(&mut inner, Instant::now());
        inner.phase.state()
    }

    pub fn counts(&self) -> Counts {
        let mut inner = self.lock();
        self.advance(&mut inner, Instant::now());
        inner.counts
    }

    /// Ask to make one call.
    ///
    /// Returns `CircuitOpen` while Open, or while HalfOpen with every trial
    /// slot taken. The returned permit must be settled with
    /// [`Permit::success`] or [`Permit::failure`]; dropping it unsettled
    /// (e.g. the call was cancelled) frees its slot without counting an outcome.
    pub fn try_acquire(&self) -> Result<Permit<'_>, PublishError> {
        let mut inner = self.lock();
        self.advance(&mut inner, Instant::now());

        match inner.phase {
            Phase::Open { .. } => return Err(PublishError::CircuitOpen),
            Phase::HalfOpen
                if inner.counts.requests >= self.settings.half_open_max_requests.max(1) =>
            {
                return Err(PublishError::CircuitOpen);
            }
            _ => {}
        }

        inner.counts.on_request();
        Ok(Permit {
            breaker: self,
            generation: inner.generation,
            state: inner.phase.state(),
            settled: false,
        })
    }

    fn settle(&self, generation: u64, outcome: Outcome) {
        let now = Instant::now();
        let mut inner = self.lock();
        self.advance(&mut inner, now);

        if generation != inner.generation {
            return;
        }

        match outcome {
            Outcome::Success => {
                inner.counts.on_success();
                if let Phase::HalfOpen = inner.phase {
                    self.transition(&mut inner, BreakerState::Closed, now);
                }
            }
            Outcome::Failure => {
                inner.counts.on_failure();
                match inner.phase {
                    Phase::Closed { .. }
                        if inner.counts.consecutive_failures
                            >= self.settings.failure_threshold.max(1) =>
                    {
                        self.transition(&mut inner, BreakerState::Open, now);
                    }
                    Phase::HalfOpen => self.transition(&mut inner, BreakerState::Open, now),
                    _ => {}
                }
            }
            Outcome::Abandoned => inner.counts.on_abandon(),
        }
    }

    fn advance(&self, inner: &mut Inner, now: Instant) {
        match inner.phase {
            Phase::Closed {
                window_ends: Some(end),
            } if end <= now => {
                inner.generation += 1;
                inner.counts = Counts::default();
                inner.phase = Phase::Closed {
                    window_ends: window_end(&self.settings, now),
                };
            }
            Phase::Open { retry_at } if retry_at <= now => {
                self.transition(inner, BreakerState::HalfOpen, now);
            }
            _ => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState, now: Instant) {
        let from = inner.phase.state();
        if from == to {
            return;
        }

        inner.generation += 1;
        inner.counts = Counts::default();
        inner.phase = match to {
            BreakerState::Closed => Phase::Closed {
                window_ends: window_end(&self.settings, now),
            },
            BreakerState::Open => Phase::Open {
                retry_at: now + self.settings.open_timeout,
            },
            BreakerState::HalfOpen => Phase::HalfOpen,
        };

        match to {
            BreakerState::Open => warn!(
                breaker = %self.name,
                ?from,
                open_timeout_ms = self.settings.open_timeout.as_millis() as u64,
                "circuit breaker opened"
            ),
            _ => info!(breaker = %self.name, ?from, to = ?to, "circuit breaker state changed"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State is always left consistent between statements, so a poisoned
        // lock is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn window_end(settings: &BreakerSettings, now: Instant) -> Option<Instant> {
    if settings.interval.is_zero() {
        None
    } else {
        Some(now + settings.interval)
    }
}

/// Permission for one call through the breaker.
#[derive(Debug)]
#[must_use = "a permit must be settled with success() or failure()"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    state: BreakerState,
    settled: bool,
}

impl Permit<'_> {
    /// State the breaker was in when the permit was issued.
    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, Outcome::Success);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, Outcome::Failure);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(self.generation, Outcome::Abandoned);
        }
    }
}
