use std::io;
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

/// Persistence seam for a single calendar.
///
/// Implementations keep intervals non-overlapping and return them in ascending
/// `from` order. `batch_apply` is all-or-nothing.
#[async_trait]
pub trait IntervalStore: Send + Sync {
    /// Intervals touching `span`. With `strict`, only those lying entirely inside it.
    async fn range_query(&self, span: Span, strict: bool) -> Vec<Interval>;
    async fn get_by_key(&self, key: Span) -> Option<Interval>;
    async fn get_all(&self) -> Vec<Interval>;
    async fn create(&self, interval: Interval) -> Result<Interval, StoreError>;
    /// Returns `false` if nothing is stored at `request.key`.
    async fn update(&self, request: UpdateRequest) -> Result<bool, StoreError>;
    /// Returns `false` if nothing is stored at `key`.
    async fn delete(&self, key: Span) -> Result<bool, StoreError>;
    async fn batch_apply(&self, batch: &Batch) -> Result<(), StoreError>;
    async fn len(&self) -> usize;
    async fn compact(&self) -> Result<(), StoreError>;
    async fn appends_since_compact(&self) -> u64;
}

#[derive(Debug)]
pub enum StoreError {
    KeyNotFound(Span),
    DuplicateKey(Span),
    Overlap { span: Span, existing: Span },
    WalError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::KeyNotFound(span) => write!(f, "no interval stored at {span}"),
            StoreError::DuplicateKey(span) => write!(f, "interval {span} already exists"),
            StoreError::Overlap { span, existing } => {
                write!(f, "interval {span} overlaps stored interval {existing}")
            }
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

fn insert(cal: &mut Calendar, interval: Interval) -> Result<(), StoreError> {
    cal.insert_interval(interval).map_err(|rejection| match rejection {
        InsertRejection::DuplicateKey => StoreError::DuplicateKey(interval.span),
        InsertRejection::Overlap(existing) => StoreError::Overlap {
            span: interval.span,
            existing,
        },
    })
}

/// Apply `batch` to `cal`. On error `cal` is left partially modified, so callers
/// run this against a copy.
///
/// All update keys are removed before any updated interval is reinserted, so
/// updates may move into space vacated by another update of the same batch.
fn apply_batch(cal: &mut Calendar, batch: &Batch) -> Result<(), StoreError> {
    for delete in &batch.deletes {
        cal.remove_interval(&delete.key)
            .ok_or(StoreError::KeyNotFound(delete.key))?;
    }
    for update in &batch.updates {
        cal.remove_interval(&update.key)
            .ok_or(StoreError::KeyNotFound(update.key))?;
    }
    for update in &batch.updates {
        insert(cal, Interval::new(update.new_span, update.price))?;
    }
    for create in &batch.creates {
        insert(cal, Interval::new(create.span, create.price))?;
    }
    Ok(())
}

/// Apply a single update. On error `cal` is unchanged.
fn apply_update(cal: &mut Calendar, request: &UpdateRequest) -> Result<bool, StoreError> {
    let Some(old) = cal.remove_interval(&request.key) else {
        return Ok(false);
    };
    if let Err(e) = insert(cal, Interval::new(request.new_span, request.price)) {
        // Reinserting what was just removed cannot collide.
        let _ = cal.insert_interval(old);
        return Err(e);
    }
    Ok(true)
}

fn apply_event(cal: &mut Calendar, event: &Event) -> Result<(), StoreError> {
    match event {
        Event::IntervalCreated { span, price } => insert(cal, Interval::new(*span, *price)),
        Event::IntervalUpdated { key, span, price } => {
            match apply_update(cal, &UpdateRequest::new(*key, *span, *price))? {
                true => Ok(()),
                false => Err(StoreError::KeyNotFound(*key)),
            }
        }
        Event::IntervalDeleted { key } => cal
            .remove_interval(key)
            .map(|_| ())
            .ok_or(StoreError::KeyNotFound(*key)),
        Event::BatchApplied { batch, .. } => apply_batch(cal, batch),
    }
}

fn query(cal: &Calendar, span: &Span, strict: bool) -> Vec<Interval> {
    if strict {
        cal.within(span).copied().collect()
    } else {
        cal.overlapping(span).to_vec()
    }
}

// ── In-memory store ──────────────────────────────────────

/// Volatile store. Same semantics as `WalStore` without persistence.
#[derive(Default)]
pub struct MemoryStore {
    calendar: RwLock<Calendar>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntervalStore for MemoryStore {
    async fn range_query(&self, span: Span, strict: bool) -> Vec<Interval> {
        query(&*self.calendar.read().await, &span, strict)
    }

    async fn get_by_key(&self, key: Span) -> Option<Interval> {
        self.calendar.read().await.get(&key).copied()
    }

    async fn get_all(&self) -> Vec<Interval> {
        self.calendar.read().await.intervals.clone()
    }

    async fn create(&self, interval: Interval) -> Result<Interval, StoreError> {
        insert(&mut *self.calendar.write().await, interval)?;
        Ok(interval)
    }

    async fn update(&self, request: UpdateRequest) -> Result<bool, StoreError> {
        apply_update(&mut *self.calendar.write().await, &request)
    }

    async fn delete(&self, key: Span) -> Result<bool, StoreError> {
        Ok(self.calendar.write().await.remove_interval(&key).is_some())
    }

    async fn batch_apply(&self, batch: &Batch) -> Result<(), StoreError> {
        let mut cal = self.calendar.write().await;
        let mut next = cal.clone();
        apply_batch(&mut next, batch)?;
        *cal = next;
        Ok(())
    }

    async fn len(&self) -> usize {
        self.calendar.read().await.len()
    }

    async fn compact(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        0
    }
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task owning the WAL. Every append that is already queued when
/// the first one is picked up shares a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut pending = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => pending.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        flush_pending(&mut wal, &mut pending);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_pending(wal: &mut Wal, pending: &mut Vec<PendingAppend>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(pending.len() as f64);
    let started = Instant::now();

    let mut result = pending
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes are not
    // attributed to the next group.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    for (_, tx) in pending.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            flush_pending(wal, &mut vec![(event, response)]);
        }
    }
}

// ── Durable store ────────────────────────────────────────

/// Calendar persisted by a write-ahead log.
///
/// Every mutation is validated against the in-memory calendar while the write
/// lock is held, then made durable, then published. Readers never observe a
/// change the log does not contain.
pub struct WalStore {
    calendar: RwLock<Calendar>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay `path` and start the writer task. Must be called inside a Tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let mut calendar = Calendar::new();
        for event in &events {
            apply_event(&mut calendar, event).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("WAL {} does not replay: {e}", path.display()),
                )
            })?;
        }
        debug!(
            "replayed {} events from {} ({} intervals)",
            events.len(),
            path.display(),
            calendar.len()
        );

        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            calendar: RwLock::new(calendar),
            wal_tx,
        })
    }

    async fn wal_append(&self, event: Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }
}

#[async_trait]
impl IntervalStore for WalStore {
    async fn range_query(&self, span: Span, strict: bool) -> Vec<Interval> {
        query(&*self.calendar.read().await, &span, strict)
    }

    async fn get_by_key(&self, key: Span) -> Option<Interval> {
        self.calendar.read().await.get(&key).copied()
    }

    async fn get_all(&self) -> Vec<Interval> {
        self.calendar.read().await.intervals.clone()
    }

    async fn create(&self, interval: Interval) -> Result<Interval, StoreError> {
        let mut cal = self.calendar.write().await;
        insert(&mut cal, interval)?;
        let event = Event::IntervalCreated {
            span: interval.span,
            price: interval.price,
        };
        if let Err(e) = self.wal_append(event).await {
            cal.remove_interval(&interval.span);
            return Err(e);
        }
        Ok(interval)
    }

    async fn update(&self, request: UpdateRequest) -> Result<bool, StoreError> {
        let mut cal = self.calendar.write().await;
        let mut next = cal.clone();
        if !apply_update(&mut next, &request)? {
            return Ok(false);
        }
        self.wal_append(Event::IntervalUpdated {
            key: request.key,
            span: request.new_span,
            price: request.price,
        })
        .await?;
        *cal = next;
        Ok(true)
    }

    async fn delete(&self, key: Span) -> Result<bool, StoreError> {
        let mut cal = self.calendar.write().await;
        if cal.get(&key).is_none() {
            return Ok(false);
        }
        self.wal_append(Event::IntervalDeleted { key }).await?;
        cal.remove_interval(&key);
        Ok(true)
    }

    async fn batch_apply(&self, batch: &Batch) -> Result<(), StoreError> {
        let mut cal = self.calendar.write().await;
        let mut next = cal.clone();
        apply_batch(&mut next, batch)?;
        self.wal_append(Event::BatchApplied {
            id: Ulid::new(),
            batch: batch.clone(),
        })
        .await?;
        *cal = next;
        Ok(())
    }

    async fn len(&self) -> usize {
        self.calendar.read().await.len()
    }

    /// Rewrite the log as one `IntervalCreated` per live interval. The read
    /// lock keeps writers out until the new file is in place.
    async fn compact(&self) -> Result<(), StoreError> {
        let cal = self.calendar.read().await;
        let events: Vec<Event> = cal
            .intervals
            .iter()
            .map(|i| Event::IntervalCreated {
                span: i.span,
                price: i.price,
            })
            .collect();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
