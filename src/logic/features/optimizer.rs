//! Feature Optimizer - Batch rate features with one history fetch per IP
//!
//! Records are grouped by source IP, merged with that IP's prior history and
//! swept once with two pointers. Per-endpoint counts and the error count are
//! maintained incrementally as the window slides.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::history::{window_start, HistoryAccessor, HistoryWindow};
use super::record::{EntityKey, RecordIdentity, TrafficRecord};
use super::vector::FeatureVectorBuilder;
use super::FeatureError;
use crate::constants::DEFAULT_RATE_WINDOW_SECONDS;

// ============================================================================
// RATE FEATURES
// ============================================================================

/// Trailing-window activity of one source IP as seen from one record
///
/// Counts include the current record, so a record with no prior traffic
/// reports one request, one endpoint and the full window as inter-arrival.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateFeatures {
    pub requests_per_ip: f64,
    pub requests_per_endpoint: f64,
    pub unique_endpoints: f64,
    pub avg_inter_arrival: f64,
    pub error_rate: f64,
}

impl RateFeatures {
    /// Values for a record with no prior traffic in a window of `window_seconds`
    pub fn isolated(window_seconds: i64, is_error: bool) -> Self {
        Self {
            requests_per_ip: 1.0,
            requests_per_endpoint: 1.0,
            unique_endpoints: 1.0,
            avg_inter_arrival: window_seconds as f64,
            error_rate: if is_error { 1.0 } else { 0.0 },
        }
    }

    pub fn write_into(&self, builder: &mut FeatureVectorBuilder) {
        builder.insert("requests_per_ip", self.requests_per_ip);
        builder.insert("requests_per_endpoint", self.requests_per_endpoint);
        builder.insert("unique_endpoints", self.unique_endpoints);
        builder.insert("avg_inter_arrival", self.avg_inter_arrival);
        builder.insert("error_rate", self.error_rate);
    }
}

impl Default for RateFeatures {
    /// Global default for records without timestamp or source IP
    fn default() -> Self {
        Self::isolated(DEFAULT_RATE_WINDOW_SECONDS, false)
    }
}

/// Window aggregates before the current record is folded in
struct WindowState<'a> {
    prior: usize,
    first_prior: Option<DateTime<Utc>>,
    endpoint_counts: &'a HashMap<String, usize>,
    errors: usize,
}

fn finish(state: WindowState<'_>, current: &TrafficRecord, ts: DateTime<Utc>, window_seconds: i64) -> RateFeatures {
    let endpoint = current.endpoint();
    let same_endpoint = state.endpoint_counts.get(endpoint).copied().unwrap_or(0);
    let unique = state.endpoint_counts.len() + usize::from(same_endpoint == 0);
    let errors = state.errors + usize::from(current.is_error());
    let total = state.prior + 1;

    let avg_inter_arrival = match state.first_prior {
        Some(first) if state.prior > 0 => {
            (ts - first).num_milliseconds().max(0) as f64 / 1000.0 / state.prior as f64
        }
        _ => window_seconds as f64,
    };

    RateFeatures {
        requests_per_ip: total as f64,
        requests_per_endpoint: (same_endpoint + 1) as f64,
        unique_endpoints: unique as f64,
        avg_inter_arrival,
        error_rate: errors as f64 / total as f64,
    }
}

/// Rate features of one record against an explicit list of other records
///
/// Used by the single-record path; only records from the same IP with a
/// timestamp inside `[ts - window, ts]` count, and a record with the same id
/// as `current` is skipped.
pub fn window_features(
    current: &TrafficRecord,
    history: &[TrafficRecord],
    window_seconds: i64,
) -> RateFeatures {
    let (Some(ip), Some(ts)) = (current.source_ip(), current.timestamp) else {
        return RateFeatures::isolated(window_seconds, current.is_error());
    };
    let window = HistoryWindow::trailing(ts, window_seconds);

    let mut endpoint_counts: HashMap<String, usize> = HashMap::new();
    let mut prior = 0;
    let mut errors = 0;
    let mut first_prior: Option<DateTime<Utc>> = None;

    for record in history {
        if record.source_ip() != Some(ip) {
            continue;
        }
        if current.id.is_some() && record.id == current.id {
            continue;
        }
        let Some(when) = record.timestamp.filter(|t| window.contains(*t)) else {
            continue;
        };

        prior += 1;
        errors += usize::from(record.is_error());
        *endpoint_counts.entry(record.endpoint().to_string()).or_default() += 1;
        first_prior = Some(first_prior.map_or(when, |f| f.min(when)));
    }

    let state = WindowState {
        prior,
        first_prior,
        endpoint_counts: &endpoint_counts,
        errors,
    };
    finish(state, current, ts, window_seconds)
}

/// Cached trailing history of one source IP
///
/// Holds what the accessor returned for `span` plus every record observed
/// through the single-record path since, trimmed to the rate window of the
/// latest record. Rate features are always recomputed from it per record.
#[derive(Debug, Clone)]
pub struct RateHistory {
    span: HistoryWindow,
    records: Vec<TrafficRecord>,
}

impl RateHistory {
    pub fn new(span: HistoryWindow, records: Vec<TrafficRecord>) -> Self {
        Self { span, records }
    }

    pub fn span(&self) -> HistoryWindow {
        self.span
    }

    pub fn records(&self) -> &[TrafficRecord] {
        &self.records
    }

    /// Whether `window` can be served without another fetch
    pub fn reaches(&self, window: &HistoryWindow) -> bool {
        self.span.start <= window.start && window.start <= self.span.end
    }

    /// Fold a scored record in and drop records older than `window`
    pub fn observe(&mut self, record: &TrafficRecord, window: &HistoryWindow) {
        let Some(ts) = record.timestamp else {
            return;
        };

        let known = match record.id {
            Some(id) => self.records.iter().any(|r| r.id == Some(id)),
            None => ts <= self.span.end,
        };
        if !known {
            self.records.push(record.clone());
            self.span.end = self.span.end.max(ts);
        }

        if window.start > self.span.start {
            self.records
                .retain(|r| r.timestamp.map_or(false, |t| t >= window.start));
            self.span.start = window.start;
        }
    }
}

// ============================================================================
// FEATURE OPTIMIZER
// ============================================================================

/// One element of a per-IP sweep; history sorts before batch on equal timestamps
struct SweepItem<'a> {
    ts: DateTime<Utc>,
    batch_index: Option<usize>,
    record: &'a TrafficRecord,
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureOptimizer {
    default_window_seconds: i64,
}

impl FeatureOptimizer {
    pub fn new(default_window_seconds: i64) -> Self {
        Self {
            default_window_seconds: default_window_seconds.max(1),
        }
    }

    pub fn default_window_seconds(&self) -> i64 {
        self.default_window_seconds
    }

    /// Rate features for every record, in input order
    ///
    /// History is fetched once per source IP. Records without timestamp or IP
    /// receive `RateFeatures::default()`. History errors abort the batch.
    pub fn batch_extract_rate_features(
        &self,
        records: &[TrafficRecord],
        history: &dyn HistoryAccessor,
        time_window_seconds: i64,
    ) -> Result<Vec<(RecordIdentity, RateFeatures)>, FeatureError> {
        let window_seconds = time_window_seconds.max(0);
        let mut output: Vec<(RecordIdentity, RateFeatures)> = records
            .iter()
            .enumerate()
            .map(|(index, r)| (RecordIdentity { index, id: r.id }, RateFeatures::default()))
            .collect();

        // Group by IP, keeping input order inside each group
        let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();
        let mut group_of: HashMap<&str, usize> = HashMap::new();
        for (index, record) in records.iter().enumerate() {
            let (Some(ip), Some(_)) = (record.source_ip(), record.timestamp) else {
                continue;
            };
            let slot = *group_of.entry(ip).or_insert_with(|| {
                groups.push((ip, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(index);
        }

        for (ip, members) in &groups {
            let prior = self.fetch_group_history(ip, members, records, history, window_seconds)?;
            self.sweep_group(members, &prior, records, window_seconds, &mut output);
        }

        log::debug!(
            "Batch rate features: {} records, {} source IPs",
            records.len(),
            groups.len()
        );
        Ok(output)
    }

    fn fetch_group_history(
        &self,
        ip: &str,
        members: &[usize],
        records: &[TrafficRecord],
        history: &dyn HistoryAccessor,
        window_seconds: i64,
    ) -> Result<Vec<TrafficRecord>, FeatureError> {
        let stamps = members.iter().filter_map(|&i| records[i].timestamp);
        let (Some(start), Some(end)) = (stamps.clone().min(), stamps.max()) else {
            return Ok(Vec::new());
        };

        let window = HistoryWindow {
            start: window_start(start, window_seconds),
            end,
        };
        let fetched = history.fetch_recent(&EntityKey::source_ip(ip), window)?;

        let batch_ids: HashSet<u64> = members.iter().filter_map(|&i| records[i].id).collect();
        Ok(fetched
            .into_iter()
            .filter(|r| r.id.map_or(true, |id| !batch_ids.contains(&id)))
            .filter(|r| r.source_ip() == Some(ip))
            .collect())
    }

    fn sweep_group(
        &self,
        members: &[usize],
        prior: &[TrafficRecord],
        records: &[TrafficRecord],
        window_seconds: i64,
        output: &mut [(RecordIdentity, RateFeatures)],
    ) {
        let mut items: Vec<SweepItem<'_>> = prior
            .iter()
            .filter_map(|r| r.timestamp.map(|ts| SweepItem { ts, batch_index: None, record: r }))
            .chain(members.iter().filter_map(|&i| {
                records[i].timestamp.map(|ts| SweepItem {
                    ts,
                    batch_index: Some(i),
                    record: &records[i],
                })
            }))
            .collect();

        // Stable: history first on ties, then input order
        items.sort_by_key(|item| (item.ts, item.batch_index.is_some()));

        let mut endpoint_counts: HashMap<String, usize> = HashMap::new();
        let mut errors = 0usize;
        let mut left = 0usize;

        for right in 0..items.len() {
            let ts = items[right].ts;
            let cutoff = window_start(ts, window_seconds);
            while left < right && items[left].ts < cutoff {
                let leaving = items[left].record;
                errors -= usize::from(leaving.is_error());
                let endpoint = leaving.endpoint();
                if let Some(count) = endpoint_counts.get_mut(endpoint) {
                    *count -= 1;
                    if *count == 0 {
                        endpoint_counts.remove(endpoint);
                    }
                }
                left += 1;
            }

            if let Some(index) = items[right].batch_index {
                let state = WindowState {
                    prior: right - left,
                    first_prior: (right > left).then(|| items[left].ts),
                    endpoint_counts: &endpoint_counts,
                    errors,
                };
                output[index].1 = finish(state, items[right].record, ts, window_seconds);
            }

            let entering = items[right].record;
            errors += usize::from(entering.is_error());
            *endpoint_counts.entry(entering.endpoint().to_string()).or_default() += 1;
        }
    }
}

impl Default for FeatureOptimizer {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_WINDOW_SECONDS)
    }
}

// ============================================================================
// TESTS
// ============================================================================
