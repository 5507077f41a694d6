use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::model::Ts;
use crate::observability::CALENDARS_ACTIVE;

/// Per-calendar engines, keyed by the database name of the connection.
/// Each calendar has its own WAL file and compactor task.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    merge_tolerance: Ts,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, merge_tolerance: Ts) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            merge_tolerance,
        }
    }

    /// Get or lazily open the engine for `calendar`.
    pub fn get_or_create(&self, calendar: &str) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(calendar) {
            return Ok(engine.value().clone());
        }
        if calendar.len() > MAX_CALENDAR_NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "calendar name too long",
            ));
        }
        let safe_name = sanitize(calendar);
        if safe_name.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty calendar name",
            ));
        }

        if self.engines.len() >= MAX_CALENDARS {
            return Err(io::Error::other("too many calendars"));
        }

        // The entry lock keeps two first connections from opening one WAL twice.
        let engine = match self.engines.entry(calendar.to_string()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
                let engine = Arc::new(Engine::open(&wal_path, self.merge_tolerance)?);
                slot.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        info!("opened calendar {calendar:?}");
        metrics::gauge!(CALENDARS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

/// Keep only characters safe in a file name.
fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}
