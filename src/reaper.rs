use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::limits::*;

/// Background task that re-attempts audit entries whose first write failed.
pub async fn run_audit_retry(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(AUDIT_RETRY_INTERVAL);
    loop {
        interval.tick().await;
        if engine.pending_audit_count().await == 0 {
            continue;
        }
        let written = engine.retry_pending_audits().await;
        let left = engine.pending_audit_count().await;
        if written > 0 {
            info!("audit retry wrote {written} entries, {left} still pending");
        } else {
            debug!("audit retry made no progress, {left} pending");
        }
    }
}

/// Background task that compacts the WAL once `threshold` appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
