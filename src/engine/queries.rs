use crate::limits::MIN_VALID_TS;
use crate::model::*;

use super::conflict::{now_ts, validate_span};
use super::{Engine, EngineError};

impl Engine {
    pub async fn get(&self, key: Span) -> Result<Interval, EngineError> {
        self.store
            .get_by_key(key)
            .await
            .ok_or(EngineError::NotFound(key))
    }

    /// Intervals touching `[from, to]`, or with `strict` only those lying
    /// entirely inside it. Missing bounds default to the epoch and to now.
    pub async fn get_all_in_time_range(
        &self,
        from: Option<Ts>,
        to: Option<Ts>,
        strict: bool,
    ) -> Result<Vec<Interval>, EngineError> {
        let span = Span {
            from: from.unwrap_or(MIN_VALID_TS),
            to: to.unwrap_or_else(now_ts),
        };
        validate_span(&span)?;
        Ok(self.store.range_query(span, strict).await)
    }

    pub async fn get_all(&self) -> Vec<Interval> {
        self.store.get_all().await
    }

    pub async fn interval_count(&self) -> usize {
        self.store.len().await
    }
}
