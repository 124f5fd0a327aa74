use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking attempts. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "slotbook_bookings_total";

/// Histogram: booking latency in seconds.
pub const BOOKING_DURATION_SECONDS: &str = "slotbook_booking_duration_seconds";

/// Counter: bookings kept without a slot row to flip.
pub const STALE_SLOTS_TOTAL: &str = "slotbook_stale_slots_total";

/// Counter: appointments released or cancelled. Labels: kind.
pub const RELEASES_TOTAL: &str = "slotbook_releases_total";

/// Counter: configuration mutations. Labels: op.
pub const CONFIG_CHANGES_TOTAL: &str = "slotbook_config_changes_total";

/// Counter: resolution-path reads that degraded to an empty answer. Labels: op.
pub const DEGRADED_READS_TOTAL: &str = "slotbook_degraded_reads_total";

/// Histogram: slot resolution latency in seconds.
pub const RESOLVE_DURATION_SECONDS: &str = "slotbook_resolve_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: tier lookups. Labels: result (hit, miss).
pub const TIER_CACHE_LOOKUPS_TOTAL: &str = "slotbook_tier_cache_lookups_total";

/// Counter: stale appointments repaired by the reconciler.
pub const RECONCILED_TOTAL: &str = "slotbook_reconciled_total";

/// Gauge: appointments still waiting for a slot after the last pass.
pub const RECONCILE_BACKLOG: &str = "slotbook_reconcile_backlog";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotbook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a failed booking.
pub fn error_label(err: &EngineError) -> &'static str {
    match err {
        EngineError::Validation(_) => "validation",
        EngineError::DuplicateSlot { .. } => "duplicate_slot",
        EngineError::SlotTaken { .. } => "slot_taken",
        EngineError::UnknownSlot { .. } => "unknown_slot",
        EngineError::Storage(_) => "storage",
        EngineError::NotFound(_) => "not_found",
        EngineError::InvalidTransition { .. } => "invalid_transition",
        EngineError::ConfirmationRequired => "confirmation_required",
    }
}
