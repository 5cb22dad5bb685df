//! Bounded concurrency subsystem.
//!
//! # Data Flow
//! ```text
//! submit(f)
//!     → task.rs (register slot, Queued)
//!     → queue.rs (bounded task buffer, blocks the producer when full)
//!     → executor.rs worker (claim slot → Running → run f → Succeeded/Failed)
//!     → task.rs board (resolution order)
//!     → wait_completion (progress callback, results + failures)
//! ```
//!
//! # Design Decisions
//! - Cancellation is cooperative; the flag is checked before a task is claimed
//! - A cancelled task resolves as `Cancelled`, never as a failure of the task itself
//! - Each task resolves exactly once; late results of abandoned tasks are dropped

pub mod executor;
pub mod queue;
pub mod task;

pub use executor::{CancellableThreadPool, CompletionReport, PoolOptions, PoolState};
pub use queue::BoundedQueue;
pub use task::{TaskHandle, TaskId, TaskStatus};
