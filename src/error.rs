//! Failure taxonomy shared by every resilience primitive.
//!
//! # Propagation
//! ```text
//! operation → Transient / Permanent
//!     → RetryExecutor (retries Transient, wraps the last one in RetriesExhausted)
//!     → ResilientCall (CircuitOpen when admission is denied)
//!     → CancellableThreadPool (collects per-task failures, TaskTimeout, Cancelled)
//! ```
//!
//! # Design Decisions
//! - The original failure is never discarded; `root()` walks through wrappers
//! - Upstream status codes travel with the failure so callers can classify it
//! - Cancellation is its own kind, never folded into a generic failure

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by wrapped operations and by the resilience primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Retryable failure (network error, upstream timeout, 5xx).
    #[error("transient failure: {message}")]
    Transient { message: String, status: Option<u16> },

    /// Non-retryable failure, propagated immediately.
    #[error("permanent failure: {message}")]
    Permanent { message: String, status: Option<u16> },

    /// Admission denied by the service's circuit breaker.
    #[error("circuit breaker open for {service}, retry in {retry_in:?}")]
    CircuitOpen { service: String, retry_in: Duration },

    /// Retry budget spent; `last` is the failure of the final attempt.
    #[error("failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    /// A bounded put waited for capacity longer than its timeout.
    #[error("queue full after {0:?}")]
    QueueFull(Duration),

    /// A bounded get waited for an item longer than its timeout.
    #[error("queue empty after {0:?}")]
    QueueEmpty(Duration),

    /// The queue was closed; no further items will arrive.
    #[error("queue closed")]
    QueueClosed,

    /// Work did not resolve within its deadline. The underlying unit may still be running.
    #[error("task timed out after {0:?}")]
    TaskTimeout(Duration),

    /// Cooperative cancellation was observed.
    #[error("cancelled")]
    Cancelled,

    /// The operation panicked; the payload is kept as text.
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Fieldless mirror of [`Error`] used for retry classification and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
    CircuitOpen,
    RetriesExhausted,
    QueueFull,
    QueueEmpty,
    QueueClosed,
    TaskTimeout,
    Cancelled,
    Panicked,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::RetriesExhausted => "retries_exhausted",
            FailureKind::QueueFull => "queue_full",
            FailureKind::QueueEmpty => "queue_empty",
            FailureKind::QueueClosed => "queue_closed",
            FailureKind::TaskTimeout => "task_timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Panicked => "panicked",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Retryable failure without an upstream status.
    pub fn transient(message: impl Into<String>) -> Self {
        Error::Transient { message: message.into(), status: None }
    }

    /// Non-retryable failure without an upstream status.
    pub fn permanent(message: impl Into<String>) -> Self {
        Error::Permanent { message: message.into(), status: None }
    }

    /// Classify an upstream HTTP status: 408, 429 and 5xx are transient, everything else permanent.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 429 | 500..=599 => Error::Transient { message, status: Some(status) },
            _ => Error::Permanent { message, status: Some(status) },
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Transient { .. } => FailureKind::Transient,
            Error::Permanent { .. } => FailureKind::Permanent,
            Error::CircuitOpen { .. } => FailureKind::CircuitOpen,
            Error::RetriesExhausted { .. } => FailureKind::RetriesExhausted,
            Error::QueueFull(_) => FailureKind::QueueFull,
            Error::QueueEmpty(_) => FailureKind::QueueEmpty,
            Error::QueueClosed => FailureKind::QueueClosed,
            Error::TaskTimeout(_) => FailureKind::TaskTimeout,
            Error::Cancelled => FailureKind::Cancelled,
            Error::Panicked(_) => FailureKind::Panicked,
        }
    }

    /// The original failure, looking through `RetriesExhausted`.
    pub fn root(&self) -> &Error {
        match self {
            Error::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// Upstream status code of the original failure, if one was reported.
    pub fn status(&self) -> Option<u16> {
        match self.root() {
            Error::Transient { status, .. } | Error::Permanent { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Classify the failure for user-facing reporting.
    pub fn remediation(&self) -> Remediation {
        let root = self.root();
        match (root, root.status()) {
            (_, Some(401 | 403)) => Remediation::Authentication,
            (_, Some(429)) => Remediation::RateLimited,
            (Error::CircuitOpen { .. }, _) => Remediation::ServiceUnavailable,
            (Error::TaskTimeout(_), _) | (_, Some(408 | 504)) => Remediation::Timeout,
            (Error::Cancelled, _) => Remediation::Cancelled,
            (Error::Transient { .. }, _) | (Error::Permanent { status: Some(_), .. }, _) => {
                Remediation::Connectivity
            }
            _ => Remediation::Unexpected,
        }
    }
}

/// Coarse classification of a failure with a remediation hint for end users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    Authentication,
    RateLimited,
    Timeout,
    ServiceUnavailable,
    Connectivity,
    Cancelled,
    Unexpected,
}

impl Remediation {
    pub fn hint(&self) -> &'static str {
        match self {
            Remediation::Authentication => {
                "Authentication failed: the API key is invalid or expired. Check the provider account."
            }
            Remediation::RateLimited => {
                "Rate limit exceeded: too many requests. Retry in a few minutes."
            }
            Remediation::Timeout => {
                "The service timed out. It may be down; try another provider or retry later."
            }
            Remediation::ServiceUnavailable => {
                "The service is temporarily unavailable after repeated failures. Retry after the cooldown."
            }
            Remediation::Connectivity => {
                "Cannot reach the service. Check the internet connection or try another server."
            }
            Remediation::Cancelled => "The operation was cancelled.",
            Remediation::Unexpected => "Unexpected error. Check the logs for details.",
        }
    }
}

/// A failure paired with its classification, for callers that report rather than propagate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub error: Error,
    pub remediation: Remediation,
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        let remediation = error.remediation();
        Self { error, remediation }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.remediation.hint())
    }
}

/// Render a panic payload captured by `catch_unwind`.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
