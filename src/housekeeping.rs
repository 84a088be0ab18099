use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::observability;

/// Background task: bookings whose guests have left become `completed`.
pub async fn run_housekeeping(engine: Arc<Engine>, every: Duration) {
    // First pass one period after startup, not immediately.
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    loop {
        interval.tick().await;
        let completed = engine.complete_departed(engine.today()).await;
        if !completed.is_empty() {
            info!("housekeeping: completed {} departed bookings", completed.len());
            metrics::counter!(observability::BOOKINGS_COMPLETED_TOTAL)
                .increment(completed.len() as u64);
        }
    }
}

/// Background task: rewrite the WAL once it has grown by `threshold` appends.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}
