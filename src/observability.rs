use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "roomgrid_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "roomgrid_request_duration_seconds";

/// Counter: drag-and-drop moves rejected because the target was taken.
pub const RESCHEDULE_CONFLICTS_TOTAL: &str = "roomgrid_reschedule_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: open TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomgrid_connections_active";

pub const CONNECTIONS_TOTAL: &str = "roomgrid_connections_total";

/// Counter: connections turned away at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomgrid_connections_rejected_total";

/// Gauge: locations with a loaded engine.
pub const LOCATIONS_ACTIVE: &str = "roomgrid_locations_active";

/// Counter: bookings marked completed by housekeeping.
pub const BOOKINGS_COMPLETED_TOTAL: &str = "roomgrid_bookings_completed_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomgrid_wal_flush_duration_seconds";

/// Histogram: events per WAL flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomgrid_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
