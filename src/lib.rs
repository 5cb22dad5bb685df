//! Resilient execution of unreliable, I/O-bound operations.
//!
//! Retries transient failures, stops calling a degraded service, runs many
//! operations in parallel without leaking threads, and applies backpressure
//! when producers outpace consumers.

pub mod config;
pub mod error;
pub mod observability;
pub mod pool;
pub mod resilience;
pub mod sim;

pub use config::ResilienceConfig;
pub use error::{Error, Failure, FailureKind, Remediation, Result};
pub use pool::{BoundedQueue, CancellableThreadPool, CompletionReport, PoolOptions, TaskHandle, TaskStatus};
pub use resilience::{
    resilient, run_with_timeout, BreakerPolicy, BreakerRegistry, BreakerState, CircuitBreaker, ResilientCall,
    RetryExecutor, RetryPolicy,
};
