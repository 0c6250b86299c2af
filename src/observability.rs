use std::net::SocketAddr;

use crate::notify::Operation;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking attempts. Labels: operation, result.
pub const BOOKINGS_TOTAL: &str = "roomledger_bookings_total";

/// Histogram: booking attempt latency in seconds. Labels: operation.
pub const BOOKING_DURATION_SECONDS: &str = "roomledger_booking_duration_seconds";

/// Counter: availability checks. Labels: result.
pub const AVAILABILITY_CHECKS_TOTAL: &str = "roomledger_availability_checks_total";

/// Counter: catalog mutations. Labels: operation, result.
pub const CATALOG_CHANGES_TOTAL: &str = "roomledger_catalog_changes_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: resources currently in the catalog.
pub const RESOURCES_ACTIVE: &str = "roomledger_resources_active";

/// Counter: lock acquisitions or writer hand-offs that hit the store timeout.
/// Labels: stage.
pub const STORE_TIMEOUTS_TOTAL: &str = "roomledger_store_timeouts_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomledger_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomledger_wal_flush_batch_size";

/// Counter: failed WAL batches (every commit in the batch was rejected).
pub const WAL_FLUSH_FAILURES_TOTAL: &str = "roomledger_wal_flush_failures_total";

/// Counter: completed compactions.
pub const COMPACTIONS_TOTAL: &str = "roomledger_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus metrics exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

pub fn operation_label(op: Operation) -> &'static str {
    match op {
        Operation::Create => "create",
        Operation::Update => "update",
        Operation::Delete => "delete",
    }
}
