//! Metrics collection and export.
//!
//! Instrumented with the `metrics` crate and exported in Prometheus
//! format on a separate port.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "stagecast_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "stagecast_connections_active";
    pub const ROOMS_ACTIVE: &str = "stagecast_rooms_active";
    pub const FRAMES_TOTAL: &str = "stagecast_frames_total";
    pub const FRAMES_BYTES: &str = "stagecast_frames_bytes";
    pub const SIGNALS_RELAYED_TOTAL: &str = "stagecast_signals_relayed_total";
    pub const FANOUT_DELIVERIES_TOTAL: &str = "stagecast_fanout_deliveries_total";
    pub const NOTIFICATIONS_TOTAL: &str = "stagecast_notifications_total";
    pub const REJECTIONS_TOTAL: &str = "stagecast_rejections_total";
    pub const LATENCY_SECONDS: &str = "stagecast_latency_seconds";
    pub const ERRORS_TOTAL: &str = "stagecast_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of live connections"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of active rooms");
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total bytes of frames processed");
    metrics::describe_counter!(
        names::SIGNALS_RELAYED_TOTAL,
        "Total number of signaling payloads relayed"
    );
    metrics::describe_counter!(
        names::FANOUT_DELIVERIES_TOTAL,
        "Total per-recipient deliveries from room fan-out"
    );
    metrics::describe_counter!(
        names::NOTIFICATIONS_TOTAL,
        "Total per-connection deliveries from targeted notification"
    );
    metrics::describe_counter!(
        names::REJECTIONS_TOTAL,
        "Total protocol-violation rejections sent"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound frame processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
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

/// Record a processed frame.
pub fn record_frame(bytes: usize, direction: &str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction.to_string()).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction.to_string()).increment(bytes as u64);
}

/// Record a relayed signal.
pub fn record_signal() {
    counter!(names::SIGNALS_RELAYED_TOTAL).increment(1);
}

/// Record room fan-out deliveries.
pub fn record_fanout(recipients: usize) {
    counter!(names::FANOUT_DELIVERIES_TOTAL).increment(recipients as u64);
}

/// Record targeted-notification deliveries.
pub fn record_notifications(recipients: usize) {
    counter!(names::NOTIFICATIONS_TOTAL).increment(recipients as u64);
}

/// Record a protocol-violation rejection.
pub fn record_rejection() {
    counter!(names::REJECTIONS_TOTAL).increment(1);
}

/// Record inbound frame latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Update the active room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
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
