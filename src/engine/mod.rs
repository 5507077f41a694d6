mod conflict;
mod error;
mod merge;
mod mutations;
mod plan;
mod queries;

pub use error::EngineError;

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::limits::*;
use crate::model::*;
use crate::store::{IntervalStore, WalStore};

/// Interval reconciliation for one calendar.
///
/// Every write reads the current neighborhood from the store, plans the
/// operations that restore the calendar invariants and submits them as one
/// batch. Nothing is cached between calls; the store is the source of truth.
pub struct Engine {
    store: Arc<dyn IntervalStore>,
    tolerance: Ts,
    /// Serializes read-plan-apply sequences.
    write_gate: Mutex<()>,
}

impl Engine {
    /// `tolerance` is the largest gap, in seconds, across which same-priced
    /// intervals are merged.
    pub fn new(store: Arc<dyn IntervalStore>, tolerance: Ts) -> Self {
        Self {
            store,
            tolerance: tolerance.clamp(0, MAX_MERGE_TOLERANCE_SECS),
            write_gate: Mutex::new(()),
        }
    }

    /// Engine over a WAL-backed store at `wal_path`, replaying it first.
    pub fn open(wal_path: &Path, tolerance: Ts) -> io::Result<Self> {
        let store = WalStore::open(wal_path)?;
        Ok(Self::new(Arc::new(store), tolerance))
    }

    pub fn tolerance(&self) -> Ts {
        self.tolerance
    }

    /// Merge, drop updates that change nothing, verify and submit.
    ///
    /// `candidates` is what the plan was computed from. The caller holds the
    /// write gate.
    pub(super) async fn commit(
        &self,
        candidates: &[Interval],
        batch: Batch,
    ) -> Result<(), EngineError> {
        let mut batch = merge::merge_continuous(batch, self.tolerance);
        batch.updates.retain(|u| {
            !candidates
                .iter()
                .any(|existing| existing.span == u.key && u.is_noop_for(existing))
        });

        if let Err(e) = conflict::check_no_overlap(candidates, &batch) {
            error!("refusing batch {batch:?}: {e}");
            return Err(e);
        }
        if batch.is_empty() {
            debug!("nothing to write");
            return Ok(());
        }

        let growth = batch.creates.len().saturating_sub(batch.deletes.len());
        if growth > 0 && self.store.len().await + growth > MAX_INTERVALS_PER_CALENDAR {
            return Err(EngineError::LimitExceeded("too many intervals in calendar"));
        }

        debug!(
            "applying batch: {} updates, {} creates, {} deletes",
            batch.updates.len(),
            batch.creates.len(),
            batch.deletes.len()
        );
        metrics::histogram!(crate::observability::BATCH_OPERATIONS).record(batch.len() as f64);
        self.store.batch_apply(&batch).await?;
        Ok(())
    }
}
