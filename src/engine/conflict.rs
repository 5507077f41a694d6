use std::collections::HashSet;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ts() -> Ts {
    chrono::Utc::now().timestamp()
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.from > span.to {
        return Err(EngineError::InvalidSpan(*span));
    }
    if span.from < MIN_VALID_TS || span.to > MAX_VALID_TS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Recompute the intervals `batch` leaves behind within the window covered by
/// `candidates` and refuse the batch if any two of them overlap.
pub(crate) fn check_no_overlap(candidates: &[Interval], batch: &Batch) -> Result<(), EngineError> {
    let removed: HashSet<Span> = batch
        .deletes
        .iter()
        .map(|d| d.key)
        .chain(batch.updates.iter().map(|u| u.key))
        .collect();

    let mut result: Vec<Span> = candidates
        .iter()
        .map(|i| i.span)
        .filter(|s| !removed.contains(s))
        .chain(batch.updates.iter().map(|u| u.new_span))
        .chain(batch.creates.iter().map(|c| c.span))
        .collect();
    result.sort_by_key(|s| s.from);

    for pair in result.windows(2) {
        if pair[0].to >= pair[1].from {
            return Err(EngineError::Invariant(format!(
                "planned intervals {} and {} overlap",
                pair[0], pair[1]
            )));
        }
    }
    Ok(())
}
