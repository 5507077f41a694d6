use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix seconds, UTC. Interval boundaries never carry sub-second precision.
pub type Ts = i64;

/// Canonical text form of a timestamp on the wire and in logs.
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const TS_FORMATS_ACCEPTED: [&str; 3] = [TS_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

pub fn parse_ts(s: &str) -> Result<Ts, ParseError> {
    let s = s.trim();
    for fmt in TS_FORMATS_ACCEPTED {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.and_utc().timestamp());
        }
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp())
        .map_err(|_| ParseError::Timestamp(s.to_string()))
}

pub fn format_ts(ts: Ts) -> String {
    match DateTime::from_timestamp(ts, 0) {
        Some(dt) => dt.format(TS_FORMAT).to_string(),
        None => ts.to_string(),
    }
}

/// Closed interval `[from, to]`, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub from: Ts,
    pub to: Ts,
}

impl Span {
    pub fn new(from: Ts, to: Ts) -> Self {
        debug_assert!(from <= to, "Span from must not be after to");
        Self { from, to }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.from <= other.to && other.from <= self.to
    }


    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.from <= other.from && other.to <= self.to
    }

    /// Grow both ends by `by` seconds.
    pub fn widen(&self, by: Ts) -> Span {
        Span::new(self.from.saturating_sub(by), self.to.saturating_add(by))
    }

    /// Seconds from the end of `self` to the start of `next`. Positive only when
    /// `next` starts after `self` ends; touching spans have a gap of 1.
    pub fn gap_to(&self, next: &Span) -> Ts {
        next.from - self.to
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", format_ts(self.from), format_ts(self.to))
    }
}

/// Exact price, always held at two decimal places. Serialized as its canonical string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Price(Decimal);

impl Price {
    pub const SCALE: u32 = 2;

    pub fn new(value: Decimal) -> Self {
        let mut value =
            value.round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero);
        value.rescale(Self::SCALE);
        Self(value)
    }
}

impl FromStr for Price {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value = Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map_err(|_| ParseError::Price(s.to_string()))?;
        if value.is_sign_negative() && !value.is_zero() {
            return Err(ParseError::NegativePrice(s.to_string()));
        }
        Ok(Price::new(value))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Price> for String {
    fn from(price: Price) -> String {
        price.to_string()
    }
}

impl TryFrom<String> for Price {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A priced span of time. Stored intervals are keyed by their span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub span: Span,
    pub price: Price,
}

impl Interval {
    pub fn new(span: Span, price: Price) -> Self {
        Self { span, price }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.span, self.price)
    }
}

// ── Requests ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub span: Span,
    pub price: Price,
}

impl CreateRequest {
    pub fn new(span: Span, price: Price) -> Self {
        Self { span, price }
    }
}

/// Replace the interval stored at `key` with `new_span` at `price`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub key: Span,
    pub new_span: Span,
    pub price: Price,
}

impl UpdateRequest {
    pub fn new(key: Span, new_span: Span, price: Price) -> Self {
        Self { key, new_span, price }
    }

    /// Rewrites `existing` with its own bounds and price.
    pub fn unchanged(existing: &Interval) -> Self {
        Self::new(existing.span, existing.span, existing.price)
    }

    /// True if applying this update to `existing` would change nothing.
    pub fn is_noop_for(&self, existing: &Interval) -> bool {
        self.key == existing.span && self.new_span == existing.span && self.price == existing.price
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub key: Span,
}

impl DeleteRequest {
    pub fn new(key: Span) -> Self {
        Self { key }
    }
}

/// Operations applied to a store as one all-or-nothing unit.
/// Deletes are applied first, then updates, then creates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub updates: Vec<UpdateRequest>,
    pub creates: Vec<CreateRequest>,
    pub deletes: Vec<DeleteRequest>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.creates.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len() + self.creates.len() + self.deletes.len()
    }
}

/// The WAL record format. A whole batch is one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    IntervalCreated {
        span: Span,
        price: Price,
    },
    IntervalUpdated {
        key: Span,
        span: Span,
        price: Price,
    },
    IntervalDeleted {
        key: Span,
    },
    BatchApplied {
        id: Ulid,
        batch: Batch,
    },
}

// ── Calendar ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertRejection {
    DuplicateKey,
    Overlap(Span),
}

/// Non-overlapping intervals sorted by `span.from`. Because nothing overlaps,
/// `span.to` is sorted as well.
#[derive(Debug, Clone, Default)]
pub struct Calendar {
    pub intervals: Vec<Interval>,
}

impl Calendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    fn position(&self, key: &Span) -> Option<usize> {
        let pos = self.intervals.partition_point(|i| i.span.from < key.from);
        match self.intervals.get(pos) {
            Some(i) if i.span == *key => Some(pos),
            _ => None,
        }
    }

    pub fn get(&self, key: &Span) -> Option<&Interval> {
        self.position(key).map(|pos| &self.intervals[pos])
    }

    /// Insert keeping sort order, refusing duplicates and overlaps.
    pub fn insert_interval(&mut self, interval: Interval) -> Result<(), InsertRejection> {
        let pos = self
            .intervals
            .partition_point(|i| i.span.from < interval.span.from);
        if let Some(next) = self.intervals.get(pos) {
            if next.span == interval.span {
                return Err(InsertRejection::DuplicateKey);
            }
            if next.span.overlaps(&interval.span) {
                return Err(InsertRejection::Overlap(next.span));
            }
        }
        if pos > 0 {
            let prev = &self.intervals[pos - 1];
            if prev.span.overlaps(&interval.span) {
                return Err(InsertRejection::Overlap(prev.span));
            }
        }
        self.intervals.insert(pos, interval);
        Ok(())
    }

    /// Remove interval by key.
    pub fn remove_interval(&mut self, key: &Span) -> Option<Interval> {
        self.position(key).map(|pos| self.intervals.remove(pos))
    }

    /// Intervals sharing at least one instant with `query`.
    pub fn overlapping(&self, query: &Span) -> &[Interval] {
        let left = self.intervals.partition_point(|i| i.span.to < query.from);
        let right = self.intervals.partition_point(|i| i.span.from <= query.to);
        if left >= right {
            return &[];
        }
        &self.intervals[left..right]
    }

    /// Intervals lying entirely inside `query`.
    pub fn within(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        self.overlapping(query)
            .iter()
            .filter(move |i| query.contains_span(&i.span))
    }
}

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Timestamp(String),
    Price(String),
    NegativePrice(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Timestamp(s) => {
                write!(f, "invalid timestamp {s:?}, expected YYYY-MM-DD HH:MM:SS")
            }
            ParseError::Price(s) => write!(f, "price must be numeric, got {s:?}"),
            ParseError::NegativePrice(s) => write!(f, "price must not be negative, got {s:?}"),
        }
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Ts {
        parse_ts(s).unwrap()
    }

    fn price(s: &str) -> Price {
        s.parse().unwrap()
    }

    fn interval(from: &str, to: &str, p: &str) -> Interval {
        Interval::new(Span::new(ts(from), ts(to)), price(p))
    }

    #[test]
    fn ts_roundtrip_canonical_format() {
        let t = ts("2019-09-19 15:00:00");
        assert_eq!(format_ts(t), "2019-09-19 15:00:00");
    }

    #[test]
    fn ts_accepts_alternate_formats() {
        let canonical = ts("2019-02-20 15:00:00");
        assert_eq!(ts("2019-02-20 15:00"), canonical);
        assert_eq!(ts("2019-02-20T15:00:00"), canonical);
        assert_eq!(ts("2019-02-20T15:00:00Z"), canonical);
        assert_eq!(ts("2019-02-20T17:00:00+02:00"), canonical);
    }

    #[test]
    fn ts_rejects_garbage() {
        assert!(matches!(parse_ts("yesterday"), Err(ParseError::Timestamp(_))));
        assert!(parse_ts("2019-13-01 00:00:00").is_err());
    }

    #[test]
    fn price_normalizes_to_two_decimals() {
        assert_eq!(price("200").to_string(), "200.00");
        assert_eq!(price("200.00").to_string(), "200.00");
        assert_eq!(price("200.1").to_string(), "200.10");
        assert_eq!(price("200"), price("200.00"));
        assert_eq!(price("200.1"), price("200.10"));
        assert_eq!(price(" 15.5 ").to_string(), "15.50");
    }

    #[test]
    fn price_rounds_extra_precision() {
        assert_eq!(price("1.005").to_string(), "1.01");
        assert_eq!(price("1.004").to_string(), "1.00");
    }

    #[test]
    fn price_rejects_non_numeric_and_negative() {
        assert!(matches!("abc".parse::<Price>(), Err(ParseError::Price(_))));
        assert!(matches!("-1".parse::<Price>(), Err(ParseError::NegativePrice(_))));
        assert_eq!(price("0").to_string(), "0.00");
    }

    #[test]
    fn span_closed_semantics() {
        let s = Span::new(100, 200);
        assert!(s.overlaps(&Span::new(100, 100)));
        assert!(s.overlaps(&Span::new(200, 200))); // closed
        assert!(!s.overlaps(&Span::new(201, 201)));
    }

    #[test]
    fn span_overlap_and_touch() {
        let a = Span::new(100, 200);
        assert!(a.overlaps(&Span::new(200, 300))); // shared instant
        assert!(!a.overlaps(&Span::new(201, 300)));
        assert_eq!(a.gap_to(&Span::new(201, 300)), 1);
        assert_eq!(a.gap_to(&Span::new(260, 300)), 60);
    }

    #[test]
    fn span_widen() {
        assert_eq!(Span::new(100, 200).widen(60), Span::new(40, 260));
    }

    #[test]
    fn calendar_keeps_order() {
        let mut cal = Calendar::new();
        cal.insert_interval(interval("2019-02-20 16:00:00", "2019-02-20 17:00:00", "1"))
            .unwrap();
        cal.insert_interval(interval("2019-02-20 12:00:00", "2019-02-20 13:00:00", "2"))
            .unwrap();
        cal.insert_interval(interval("2019-02-20 14:00:00", "2019-02-20 15:00:00", "3"))
            .unwrap();
        let prices: Vec<String> = cal.intervals.iter().map(|i| i.price.to_string()).collect();
        assert_eq!(prices, vec!["2.00", "3.00", "1.00"]);
    }

    #[test]
    fn calendar_rejects_duplicate_and_overlap() {
        let mut cal = Calendar::new();
        let base = Interval::new(Span::new(100, 200), price("1"));
        cal.insert_interval(base).unwrap();
        assert_eq!(cal.insert_interval(base), Err(InsertRejection::DuplicateKey));
        assert_eq!(
            cal.insert_interval(Interval::new(Span::new(200, 300), price("1"))),
            Err(InsertRejection::Overlap(Span::new(100, 200)))
        );
        assert_eq!(
            cal.insert_interval(Interval::new(Span::new(50, 100), price("1"))),
            Err(InsertRejection::Overlap(Span::new(100, 200)))
        );
        assert!(cal.insert_interval(Interval::new(Span::new(201, 300), price("1"))).is_ok());
        assert_eq!(cal.len(), 2);
    }

    #[test]
    fn calendar_remove_by_key() {
        let mut cal = Calendar::new();
        cal.insert_interval(Interval::new(Span::new(100, 200), price("1"))).unwrap();
        assert!(cal.remove_interval(&Span::new(100, 199)).is_none());
        assert!(cal.remove_interval(&Span::new(100, 200)).is_some());
        assert!(cal.is_empty());
    }

    #[test]
    fn overlapping_includes_straddlers() {
        let mut cal = Calendar::new();
        for (from, to) in [(0, 99), (100, 199), (200, 299), (300, 399)] {
            cal.insert_interval(Interval::new(Span::new(from, to), price("1"))).unwrap();
        }
        let hits: Vec<Span> = cal
            .overlapping(&Span::new(150, 250))
            .iter()
            .map(|i| i.span)
            .collect();
        assert_eq!(hits, vec![Span::new(100, 199), Span::new(200, 299)]);

        let strict: Vec<Span> = cal.within(&Span::new(150, 399)).map(|i| i.span).collect();
        assert_eq!(strict, vec![Span::new(200, 299), Span::new(300, 399)]);
    }

    #[test]
    fn overlapping_large_interval_spanning_query() {
        let mut cal = Calendar::new();
        cal.insert_interval(Interval::new(Span::new(0, 10_000), price("1"))).unwrap();
        assert_eq!(cal.overlapping(&Span::new(500, 600)).len(), 1);
        assert_eq!(cal.within(&Span::new(500, 600)).count(), 0);
    }

    #[test]
    fn overlapping_empty_and_disjoint() {
        let mut cal = Calendar::new();
        assert!(cal.overlapping(&Span::new(0, 1000)).is_empty());
        cal.insert_interval(Interval::new(Span::new(100, 200), price("1"))).unwrap();
        assert!(cal.overlapping(&Span::new(201, 300)).is_empty());
        assert!(cal.overlapping(&Span::new(0, 99)).is_empty());
    }

    #[test]
    fn price_at_instant() {
        let mut cal = Calendar::new();
        cal.insert_interval(Interval::new(Span::new(100, 200), price("7"))).unwrap();
        let at = |t| cal.overlapping(&Span::new(t, t)).first().map(|i| i.price);
        assert_eq!(at(200), Some(price("7")));
        assert_eq!(at(201), None);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BatchApplied {
            id: Ulid::new(),
            batch: Batch {
                updates: vec![UpdateRequest::new(
                    Span::new(0, 10),
                    Span::new(0, 20),
                    price("15.5"),
                )],
                creates: vec![CreateRequest::new(Span::new(30, 40), price("3"))],
                deletes: vec![DeleteRequest::new(Span::new(50, 60))],
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
