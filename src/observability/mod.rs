//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers, retries, pool and queues produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Every state transition is logged with the service or task it concerns
//! - Metrics are cheap (atomic increments behind the facade)

pub mod logging;
pub mod metrics;
