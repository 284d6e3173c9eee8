//! Baseline Record - Running statistics for one baseline key
//!
//! Welford accumulation for mean/variance plus a ring-buffer reservoir of the
//! most recent samples for order statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::StatsSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineRecord {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,

    reservoir: Vec<f64>,
    reservoir_capacity: usize,
    cursor: usize,

    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    window_seconds: u64,
    version: u64,
}

impl BaselineRecord {
    pub fn new(reservoir_capacity: usize, window_seconds: u64) -> Self {
        let now = Utc::now();
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: 0.0,
            max: 0.0,
            reservoir: Vec::new(),
            reservoir_capacity: reservoir_capacity.max(1),
            cursor: 0,
            created_at: now,
            last_updated: now,
            window_seconds,
            version: 1,
        }
    }

    /// Fresh record over a window, stamped with `version`
    pub fn from_window(values: &[f64], reservoir_capacity: usize, window_seconds: u64, version: u64) -> Self {
        let mut record = Self::new(reservoir_capacity, window_seconds);
        record.version = version;
        for &v in values {
            record.push(v, None);
        }
        record
    }

    /// Add one sample. Non-finite values are ignored; returns whether it counted.
    pub fn push(&mut self, value: f64, at: Option<DateTime<Utc>>) -> bool {
        if !value.is_finite() {
            return false;
        }

        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);

        if self.count == 1 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }

        if self.reservoir.len() < self.reservoir_capacity {
            self.reservoir.push(value);
        } else {
            self.reservoir[self.cursor] = value;
        }
        self.cursor = (self.cursor + 1) % self.reservoir_capacity;

        self.last_updated = at.unwrap_or_else(Utc::now).max(self.last_updated);
        true
    }

    // ------------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------------

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn m2(&self) -> f64 {
        self.m2
    }

    /// Population variance
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).max(0.0)
        }
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            count: self.count,
            mean: self.mean,
            std: self.std(),
        }
    }

    /// Linear-interpolated percentile (`q` in [0, 1]) over the reservoir
    pub fn percentile(&self, q: f64) -> Option<f64> {
        percentile(&self.reservoir, q)
    }

    pub fn p50(&self) -> Option<f64> {
        self.percentile(0.50)
    }

    pub fn p95(&self) -> Option<f64> {
        self.percentile(0.95)
    }

    pub fn p99(&self) -> Option<f64> {
        self.percentile(0.99)
    }

    /// Reservoir contents (insertion order is not preserved once it wraps)
    pub fn samples(&self) -> &[f64] {
        &self.reservoir
    }

    pub fn reservoir_capacity(&self) -> usize {
        self.reservoir_capacity
    }

    // ------------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------------

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Linear-interpolated percentile of an unsorted slice
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}
