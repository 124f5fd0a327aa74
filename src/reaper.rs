use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, ReconcileReport, today};
use crate::observability;
use crate::store::{AvailabilityStore, WalStore};

/// Background task that retries slot claims of stale appointments.
pub async fn run_reconciler<S: AvailabilityStore>(engine: Arc<Engine<S>>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        reconcile_pass(&engine).await;
        let pruned = engine.prune_day_locks(today());
        if pruned > 0 {
            debug!(pruned, "past day locks dropped");
        }
    }
}

/// One reconciliation pass. Failures are logged and retried next tick.
pub async fn reconcile_pass<S: AvailabilityStore>(engine: &Engine<S>) -> Option<ReconcileReport> {
    match engine.reconcile_stale().await {
        Ok(report) => {
            metrics::gauge!(observability::RECONCILE_BACKLOG).set(report.still_stale as f64);
            if report.examined > 0 {
                info!(
                    examined = report.examined,
                    repaired = report.repaired,
                    still_stale = report.still_stale,
                    "reconcile pass"
                );
            }
            Some(report)
        }
        Err(e) => {
            warn!("reconcile pass failed: {e}");
            None
        }
    }
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine<WalStore>>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine<WalStore>, threshold: u64) -> bool {
    let appends = engine.store().appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "compaction not due");
        return false;
    }
    match engine.store().compact().await {
        Ok(()) => {
            metrics::counter!(observability::WAL_COMPACTIONS_TOTAL, "status" => "ok").increment(1);
            info!(appends, "WAL compacted");
            true
        }
        Err(e) => {
            metrics::counter!(observability::WAL_COMPACTIONS_TOTAL, "status" => "error").increment(1);
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}
