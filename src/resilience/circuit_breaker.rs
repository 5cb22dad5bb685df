//! Circuit breaker for remote service protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: service assumed down, requests fail fast
//! - Half-Open: testing if service recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: recovery timeout elapsed and a request asks for admission
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails
//! ```
//!
//! # Design Decisions
//! - One breaker per named service, shared by every caller naming it
//! - All state behind a single mutex; transitions are atomic with their checks
//! - The breaker never fails a call itself; callers turn a denied admission into CircuitOpen

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }

    pub(crate) fn gauge_value(&self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::HalfOpen => 1.0,
            BreakerState::Open => 2.0,
        }
    }
}

/// Thresholds for a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// Consecutive failures at which Closed → Open. Must be positive.
    pub failure_threshold: u32,
    /// Time Open must last before a probe is admitted.
    pub recovery_timeout: Duration,
    /// Probes admitted concurrently while Half-Open; `None` admits every request.
    pub half_open_max_calls: Option<u32>,
}

impl BreakerPolicy {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            half_open_max_calls: None,
        }
    }

    /// Admit at most `calls` concurrent probes while half-open.
    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = Some(calls.max(1));
        self
    }
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

impl From<&CircuitBreakerConfig> for BreakerPolicy {
    fn from(config: &CircuitBreakerConfig) -> Self {
        let policy = Self::new(
            config.failure_threshold,
            Duration::from_secs(config.recovery_timeout_secs),
        );
        match config.half_open_max_calls {
            Some(calls) => policy.with_half_open_max_calls(calls),
            None => policy,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    probes_in_flight: u32,
}

/// Point-in-time view of a breaker, for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    /// Time until a probe is admitted, when open.
    pub retry_in: Option<Duration>,
}

/// Per-service failure-tracking state machine.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    policy: BreakerPolicy,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, policy: BreakerPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                probes_in_flight: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &BreakerPolicy {
        &self.policy
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Time left before an open breaker admits a probe. `None` unless open.
    pub fn retry_in(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        self.remaining_cooldown(&inner)
    }

    fn remaining_cooldown(&self, inner: &Inner) -> Option<Duration> {
        if inner.state != BreakerState::Open {
            return None;
        }
        let elapsed = inner.last_failure.map(|t| t.elapsed()).unwrap_or_default();
        Some(self.policy.recovery_timeout.saturating_sub(elapsed))
    }

    /// Check if the breaker admits a request.
    ///
    /// An open breaker whose recovery timeout has elapsed moves to half-open and
    /// admits the caller as the probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();

        let state = inner.state;
        match state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let recovered = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.policy.recovery_timeout)
                    .unwrap_or(true);

                if recovered {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    inner.probes_in_flight = 1;
                    tracing::info!(service = %self.name, "Circuit breaker half-open, testing service recovery");
                    true
                } else {
                    metrics::record_breaker_rejection(&self.name);
                    false
                }
            }
            BreakerState::HalfOpen => match self.policy.half_open_max_calls {
                Some(max) if inner.probes_in_flight >= max => {
                    metrics::record_breaker_rejection(&self.name);
                    false
                }
                _ => {
                    inner.probes_in_flight += 1;
                    true
                }
            },
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();

        let state = inner.state;
        match state {
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                inner.failure_count = 0;
                inner.probes_in_flight = 0;
                self.transition(&mut inner, BreakerState::Closed);
                tracing::info!(service = %self.name, "Circuit breaker closed, service recovered");
            }
            BreakerState::Open => {
                // Straggler admitted before the breaker opened; the open window stands.
                tracing::debug!(service = %self.name, "Ignoring success reported while open");
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        let state = inner.state;
        match state {
            BreakerState::Closed if inner.failure_count >= self.policy.failure_threshold => {
                self.transition(&mut inner, BreakerState::Open);
                tracing::warn!(
                    service = %self.name,
                    failures = inner.failure_count,
                    recovery_timeout_secs = self.policy.recovery_timeout.as_secs_f64(),
                    "Circuit breaker opened"
                );
            }
            BreakerState::HalfOpen => {
                inner.probes_in_flight = 0;
                self.transition(&mut inner, BreakerState::Open);
                tracing::warn!(service = %self.name, "Circuit breaker re-opened, probe failed");
            }
            _ => {}
        }
    }

    /// Force the breaker closed and clear its failure streak.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.probes_in_flight = 0;
        if inner.state != BreakerState::Closed {
            self.transition(&mut inner, BreakerState::Closed);
            tracing::info!(service = %self.name, "Circuit breaker reset");
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.policy.failure_threshold,
            retry_in: self.remaining_cooldown(&inner),
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        let from = inner.state;
        inner.state = to;
        metrics::record_breaker_transition(&self.name, from, to);
    }
}
