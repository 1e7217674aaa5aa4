//! Metrics collection and exposition.
//!
//! # Metrics
//! - `microhost_requests_total` (counter): packet calls by direction, outcome
//! - `microhost_request_duration_seconds` (histogram): call latency
//! - `microhost_active_connections` (gauge): live packet connections
//! - `microhost_publishes_total` (counter): publishes by kind, outcome
//! - `microhost_pending_publishes` (gauge): fan-out publishes awaiting ack
//! - `microhost_worker_exits_total` (counter): worker exits by kind
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is installed once, in the parent process

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Failure is logged, not returned: the host runs fine without metrics.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one completed packet call.
///
/// `direction` is `inbound` (served here) or `outbound` (issued from here).
pub fn record_request(direction: &str, outcome: &str, elapsed: Duration) {
    counter!(
        "microhost_requests_total",
        "direction" => direction.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(
        "microhost_request_duration_seconds",
        "direction" => direction.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn set_active_connections(count: usize) {
    gauge!("microhost_active_connections").set(count as f64);
}

pub fn record_publish(kind: &str, outcome: &str) {
    counter!(
        "microhost_publishes_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn set_pending_publishes(count: usize) {
    gauge!("microhost_pending_publishes").set(count as f64);
}

pub fn record_worker_exit(kind: &str) {
    counter!("microhost_worker_exits_total", "kind" => kind.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_a_recorder_is_a_no_op() {
        record_request("inbound", "ok", Duration::from_millis(3));
        set_active_connections(2);
        record_publish("broker", "ok");
        set_pending_publishes(0);
        record_worker_exit("clean");
    }
}
