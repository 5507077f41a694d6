use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::Engine;
use crate::observability::COMPACTIONS_TOTAL;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the calendar's log once `threshold` records have been appended
/// since the last compaction. Returns whether a compaction ran.
pub async fn maybe_compact(engine: &Engine, threshold: u64) -> bool {
    let appended = engine.appends_since_compact().await;
    if threshold == 0 || appended < threshold {
        return false;
    }
    debug!("{appended} appends since last compaction, compacting");
    match engine.compact().await {
        Ok(()) => {
            metrics::counter!(COMPACTIONS_TOTAL).increment(1);
            true
        }
        Err(e) => {
            warn!("compaction failed: {e}");
            false
        }
    }
}

/// Background task that keeps one calendar's log short.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        maybe_compact(&engine, threshold).await;
    }
}
