//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a remote service:
//!     → registry.rs (one breaker per service name)
//!     → call.rs (admission check, then retry, then report outcome)
//!     → retries.rs (classify failure, back off, retry)
//!     → circuit_breaker.rs (track call-level failures, open when threshold reached)
//!
//! One-off deadline:
//!     → timeouts.rs (isolated thread, join with deadline)
//! ```
//!
//! # Design Decisions
//! - Every breaker mutation is serialized by a per-breaker lock
//! - The breaker sees the final outcome of a call, never individual attempts
//! - An open circuit is never retried
//! - Timeouts abandon work; nothing is forcibly terminated

pub mod backoff;
pub mod call;
pub mod circuit_breaker;
pub mod registry;
pub mod retries;
pub mod timeouts;

pub use call::{resilient, ResilientCall};
pub use circuit_breaker::{BreakerPolicy, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use registry::BreakerRegistry;
pub use retries::{RetryExecutor, RetryPolicy};
pub use timeouts::run_with_timeout;
