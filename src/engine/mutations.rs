use tracing::{debug, info, warn};

use crate::model::*;

use super::conflict::validate_span;
use super::plan::{carry_unchanged, plan_create};
use super::{Engine, EngineError};

impl Engine {
    /// Write `request` over whatever the calendar holds there, trimming,
    /// splitting or replacing what it overlaps and merging same-priced
    /// neighbors.
    pub async fn create(&self, request: CreateRequest) -> Result<(), EngineError> {
        validate_span(&request.span)?;
        let _gate = self.write_gate.lock().await;
        self.create_locked(request).await
    }

    /// Write several requests in order under one hold of the write gate.
    ///
    /// Every span is validated before the first write, so a malformed row
    /// writes nothing. Each row still commits on its own: a store failure on
    /// row N leaves the rows before it written.
    pub async fn create_all(&self, requests: Vec<CreateRequest>) -> Result<usize, EngineError> {
        for request in &requests {
            validate_span(&request.span)?;
        }
        let _gate = self.write_gate.lock().await;
        let total = requests.len();
        for (written, request) in requests.into_iter().enumerate() {
            if let Err(e) = self.create_locked(request).await {
                warn!("multi-row create stopped after {written} of {total} rows: {e}");
                return Err(e);
            }
        }
        Ok(total)
    }

    async fn create_locked(&self, request: CreateRequest) -> Result<(), EngineError> {
        let candidates = self
            .store
            .range_query(request.span.widen(self.tolerance), false)
            .await;
        let Some(batch) = plan_create(&request, &candidates) else {
            debug!("create {}@{}: already present", request.span, request.price);
            return Ok(());
        };
        self.commit(&candidates, batch).await
    }

    /// Replace the interval stored at `request.key`.
    ///
    /// If nothing but the interval itself lies near the new bounds, it is
    /// rewritten in place. Otherwise it is deleted and the new bounds are
    /// written like a create, all in one batch.
    pub async fn update(&self, request: UpdateRequest) -> Result<(), EngineError> {
        validate_span(&request.new_span)?;
        let _gate = self.write_gate.lock().await;

        let nearby = self
            .store
            .range_query(request.new_span.widen(self.tolerance), false)
            .await;
        if let [only] = nearby.as_slice()
            && only.span == request.key
        {
            if request.is_noop_for(only) {
                return Ok(());
            }
            return match self.store.update(request).await? {
                true => Ok(()),
                false => Err(EngineError::NotFound(request.key)),
            };
        }

        let old = self
            .store
            .get_by_key(request.key)
            .await
            .ok_or(EngineError::NotFound(request.key))?;
        // One window over both slots, so every interval lying between a
        // neighbor of the old slot and a neighbor of the new one is planned too.
        let hull = Span::new(
            old.span.from.min(request.new_span.from),
            old.span.to.max(request.new_span.to),
        );
        let mut candidates = self
            .store
            .range_query(hull.widen(self.tolerance), false)
            .await;
        candidates.retain(|i| i.span != old.span);

        let create = CreateRequest::new(request.new_span, request.price);
        let mut batch = plan_create(&create, &candidates)
            .unwrap_or_else(|| carry_unchanged(&candidates));
        batch.deletes.push(DeleteRequest::new(old.span));
        debug!("update {old} -> {}@{}: rewriting", request.new_span, request.price);
        self.commit(&candidates, batch).await
    }

    pub async fn delete(&self, request: DeleteRequest) -> Result<(), EngineError> {
        let _gate = self.write_gate.lock().await;
        if self.store.delete(request.key).await? {
            Ok(())
        } else {
            Err(EngineError::NotFound(request.key))
        }
    }

    /// Rewrite the log as the current contents of the calendar.
    pub async fn compact(&self) -> Result<(), EngineError> {
        let _gate = self.write_gate.lock().await;
        self.store.compact().await?;
        info!("compacted calendar ({} intervals)", self.store.len().await);
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.store.appends_since_compact().await
    }
}
