//! Hard resource limits. Requests exceeding these are refused rather than degraded.

use crate::model::Ts;

/// Calendars (databases) loaded at once by one server.
pub const MAX_CALENDARS: usize = 1024;

/// Longest accepted database name. The sanitized name becomes a file name.
pub const MAX_CALENDAR_NAME_LEN: usize = 200;

/// Stored intervals per calendar.
pub const MAX_INTERVALS_PER_CALENDAR: usize = 1_000_000;

/// Rows in a single multi-row INSERT.
pub const MAX_INSERT_ROWS: usize = 1000;

/// Upper bound for the configurable merge tolerance (one day).
pub const MAX_MERGE_TOLERANCE_SECS: Ts = 86_400;

/// 1970-01-01 00:00:00 UTC.
pub const MIN_VALID_TS: Ts = 0;

/// 9999-12-31 23:59:59 UTC.
pub const MAX_VALID_TS: Ts = 253_402_300_799;

/// Longest SQL text accepted from a client.
pub const MAX_SQL_LEN: usize = 1 << 20;
