//! Metrics collection and export for Chorus.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use chorus_core::BroadcastReport;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "chorus_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "chorus_connections_active";
    pub const MESSAGES_TOTAL: &str = "chorus_messages_total";
    pub const MESSAGES_BYTES: &str = "chorus_messages_bytes";
    pub const ROOMS_ACTIVE: &str = "chorus_rooms_active";
    pub const ROOM_JOINS_TOTAL: &str = "chorus_room_joins_total";
    pub const FANOUT_TOTAL: &str = "chorus_fanout_total";
    pub const LATENCY_SECONDS: &str = "chorus_latency_seconds";
    pub const ERRORS_TOTAL: &str = "chorus_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages processed");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of active rooms");
    metrics::describe_counter!(
        names::ROOM_JOINS_TOTAL,
        "Total number of times a connection entered a room"
    );
    metrics::describe_counter!(
        names::FANOUT_TOTAL,
        "Per-recipient fan-out results, by outcome"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound message handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a connection entering a room.
pub fn record_join() {
    counter!(names::ROOM_JOINS_TOTAL).increment(1);
}

/// Record the per-recipient results of a fan-out.
pub fn record_broadcast(report: &BroadcastReport) {
    let outcomes = [
        ("delivered", report.delivered),
        ("dropped", report.dropped),
        ("stale", report.stale),
        ("evicted", report.evicted),
    ];
    for (outcome, count) in outcomes {
        if count > 0 {
            counter!(names::FANOUT_TOTAL, "outcome" => outcome).increment(count as u64);
        }
    }
}

/// Record message latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Update active room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder() {
        // No recorder is installed; every call must be a silent no-op.
        let _guard = ConnectionMetricsGuard::new();
        record_broadcast(&BroadcastReport {
            delivered: 3,
            dropped: 1,
            ..Default::default()
        });
        record_join();
        record_error("malformed");
        set_active_rooms(2);
    }
}
