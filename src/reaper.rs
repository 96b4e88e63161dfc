use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::{now_ms, Ms};

/// Background task that cancels reservations left unpaid for longer than
/// `pending_ttl_ms`, releasing their slots.
pub async fn run_reaper(engine: Arc<Engine>, pending_ttl_ms: Ms) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        reap_stale_pending(&engine, now_ms() - pending_ttl_ms).await;
    }
}

/// Cancel every pending reservation created at or before `cutoff`.
pub async fn reap_stale_pending(engine: &Engine, cutoff: Ms) -> usize {
    let mut reaped = 0;
    for id in engine.collect_stale_pending(cutoff).await {
        match engine.cancel_if_stale_pending(id, cutoff).await {
            Ok(true) => {
                reaped += 1;
                metrics::counter!(crate::observability::PENDING_REAPED_TOTAL).increment(1);
                info!("reaped unpaid reservation {id}");
            }
            Ok(false) => tracing::debug!("reaper skip {id}: no longer pending"),
            Err(e) => tracing::debug!("reaper skip {id}: {e}"),
        }
    }
    reaped
}

/// Background task that rewrites the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
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
