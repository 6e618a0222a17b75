//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define breaker and transport metrics (requests, latency, state)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `breaker_requests_total` (counter): guarded calls by operation, outcome
//! - `breaker_request_duration_seconds` (histogram): guarded-call latency
//! - `breaker_rejections_total` (counter): open-circuit rejections
//! - `breaker_transitions_total` (counter): state transitions by target
//! - `breaker_state` (gauge): 0=closed, 1=half_open, 2=open
//! - `transport_requests_total` (counter): pooled requests by authority, outcome
//! - `transport_request_duration_seconds` (histogram): end-to-end latency
//! - `transport_retries_total` (counter): transient-failure retries
//!
//! # Design Decisions
//! - Every record call is a no-op until a recorder is installed, so the
//!   hot path never depends on exporter state

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus exporter listening on `addr`.
///
/// Failure to install is logged, not fatal; the process runs without a
/// scrape endpoint and record calls stay no-ops.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_metrics();
            tracing::info!(address = %addr, "metrics endpoint listening");
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "failed to install metrics exporter");
        }
    }
}

fn describe_metrics() {
    describe_counter!(
        "breaker_requests_total",
        "Guarded calls by operation type and outcome"
    );
    describe_histogram!(
        "breaker_request_duration_seconds",
        "Latency of guarded calls that were admitted"
    );
    describe_counter!(
        "breaker_rejections_total",
        "Calls rejected because the circuit was open"
    );
    describe_counter!(
        "breaker_transitions_total",
        "Circuit state transitions by target state"
    );
    describe_gauge!("breaker_state", "Circuit state: 0=closed, 1=half_open, 2=open");
    describe_counter!(
        "transport_requests_total",
        "Pooled HTTP requests by authority and outcome"
    );
    describe_histogram!(
        "transport_request_duration_seconds",
        "End-to-end pooled request latency, retries included"
    );
    describe_counter!(
        "transport_retries_total",
        "Transport attempts retried after a transient failure"
    );
}

pub fn record_breaker_request(operation: &str, outcome: &'static str, latency: Duration) {
    counter!(
        "breaker_requests_total",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "breaker_request_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(latency.as_secs_f64());
}

pub fn record_breaker_rejection(operation: &str) {
    counter!("breaker_rejections_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_breaker_transition(operation: &str, to: CircuitState) {
    counter!(
        "breaker_transitions_total",
        "operation" => operation.to_string(),
        "to" => to.to_string()
    )
    .increment(1);

    let code = match to {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("breaker_state", "operation" => operation.to_string()).set(code);
}

pub fn record_transport_request(authority: &str, outcome: &'static str, latency: Duration) {
    counter!(
        "transport_requests_total",
        "authority" => authority.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "transport_request_duration_seconds",
        "authority" => authority.to_string()
    )
    .record(latency.as_secs_f64());
}

pub fn record_transport_retry(authority: &str) {
    counter!("transport_retries_total", "authority" => authority.to_string()).increment(1);
}
