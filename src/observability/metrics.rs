//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilience_retries_total` (counter): retry attempts by operation
//! - `resilience_retries_exhausted_total` (counter): calls that spent their retry budget
//! - `circuit_breaker_transitions_total` (counter): state changes by service, from, to
//! - `circuit_breaker_rejections_total` (counter): admissions denied by service
//! - `circuit_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `pool_tasks_total` (counter): resolved tasks by outcome
//! - `pool_tasks_outstanding` (gauge): submitted but unresolved tasks
//! - `pool_task_duration_seconds` (histogram): task run time
//! - `queue_depth` (gauge): items buffered by queue name
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; a no-op until a recorder is installed
//! - Prometheus exporter is opt-in via config

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::BreakerState;

/// Install the Prometheus recorder and HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_retry(operation: &str, attempt: u32) {
    counter!("resilience_retries_total", "operation" => operation.to_string()).increment(1);
    tracing::trace!(operation, attempt, "retry recorded");
}

pub fn record_retries_exhausted(operation: &str) {
    counter!("resilience_retries_exhausted_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_breaker_transition(service: &str, from: BreakerState, to: BreakerState) {
    counter!(
        "circuit_breaker_transitions_total",
        "service" => service.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    gauge!("circuit_breaker_state", "service" => service.to_string()).set(to.gauge_value());
}

pub fn record_breaker_rejection(service: &str) {
    counter!("circuit_breaker_rejections_total", "service" => service.to_string()).increment(1);
}

pub fn record_task_outcome(outcome: &'static str, started: Option<Instant>) {
    counter!("pool_tasks_total", "outcome" => outcome).increment(1);
    if let Some(started) = started {
        histogram!("pool_task_duration_seconds").record(started.elapsed().as_secs_f64());
    }
}

pub fn record_outstanding_tasks(count: usize) {
    gauge!("pool_tasks_outstanding").set(count as f64);
}

pub fn record_queue_depth(queue: &str, depth: usize) {
    gauge!("queue_depth", "queue" => queue.to_string()).set(depth as f64);
}
