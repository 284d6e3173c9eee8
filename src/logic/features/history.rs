//! History Access - Collaborator interface for historical traffic lookups
//!
//! The relational store lives outside the core. Implementations must return
//! records ordered by timestamp ascending and may return an empty list.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use thiserror::Error;

use super::record::{EntityKey, TrafficRecord};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history backend error: {0}")]
    Backend(String),

    #[error("history backend unavailable")]
    Unavailable,
}

/// Time range `[start, end]` used for lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl HistoryWindow {
    /// Window of `seconds` ending at `end`
    pub fn trailing(end: DateTime<Utc>, seconds: i64) -> Self {
        Self {
            start: window_start(end, seconds),
            end,
        }
    }

    /// Whether every timestamp of `other` falls inside this window
    pub fn covers(&self, other: &HistoryWindow) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Inclusive on both ends
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// `end - seconds`, saturating at the earliest representable instant
pub fn window_start(end: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
    Duration::try_seconds(seconds.max(0))
        .and_then(|span| end.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Historical record lookups
pub trait HistoryAccessor: Send + Sync {
    fn fetch_recent(
        &self,
        entity: &EntityKey,
        window: HistoryWindow,
    ) -> Result<Vec<TrafficRecord>, HistoryError>;
}

/// Accessor with no history at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHistory;

impl HistoryAccessor for NoHistory {
    fn fetch_recent(&self, _: &EntityKey, _: HistoryWindow) -> Result<Vec<TrafficRecord>, HistoryError> {
        Ok(Vec::new())
    }
}

/// In-process history store (tests, CLI replay)
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    records: RwLock<Vec<TrafficRecord>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<TrafficRecord>) -> Self {
        Self { records: RwLock::new(records) }
    }

    pub fn push(&self, record: TrafficRecord) {
        self.records.write().push(record);
    }

    pub fn extend<I: IntoIterator<Item = TrafficRecord>>(&self, records: I) {
        self.records.write().extend(records);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl HistoryAccessor for InMemoryHistory {
    fn fetch_recent(
        &self,
        entity: &EntityKey,
        window: HistoryWindow,
    ) -> Result<Vec<TrafficRecord>, HistoryError> {
        let records = self.records.read();
        let mut matched: Vec<TrafficRecord> = records
            .iter()
            .filter(|r| entity.matches(r))
            .filter(|r| r.timestamp.map(|ts| window.contains(ts)).unwrap_or(false))
            .cloned()
            .collect();

        // Stable: insertion order breaks timestamp ties
        matched.sort_by_key(|r| r.timestamp);
        Ok(matched)
    }
}
