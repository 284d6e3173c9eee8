//! Drift Module - Recent window vs stored baseline
//!
//! The engine owns control flow (sample-count gate, direction, refresh); the
//! statistic itself sits behind `DriftTest` so it can be swapped.
//!
//! - `MeanShiftTest`: |recent mean - baseline mean| in baseline standard
//!   deviations, plus a standard-deviation ratio check.
//! - `KolmogorovSmirnovTest`: two-sample KS distance between the baseline
//!   reservoir and the recent window at significance `alpha`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_DRIFT_SENSITIVITY, DEFAULT_KS_ALPHA};

use super::record::BaselineRecord;
use super::types::{BaselineKey, StatsSummary};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Std ratio (either way) treated as a spread change
const DEFAULT_STD_RATIO_LIMIT: f64 = 3.0;

/// Floor for the baseline standard deviation in the mean-shift statistic
const MIN_BASELINE_STD: f64 = 1e-6;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatistic {
    MeanShift,
    KolmogorovSmirnov,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftDirection {
    Stable,
    Increasing,
    Decreasing,
}

/// Raw output of a drift test
#[derive(Debug, Clone, PartialEq)]
pub struct DriftVerdict {
    pub drift: bool,
    pub magnitude: f64,
    pub responsible: Vec<String>,
}

/// Result of comparing a recent window with a stored baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftAssessment {
    pub key: BaselineKey,
    pub drift: bool,
    pub magnitude: f64,
    pub statistic: DriftStatistic,
    pub responsible: Vec<String>,
    pub direction: DriftDirection,
    pub baseline: StatsSummary,
    pub recent: StatsSummary,
    /// Set when there was not enough evidence to run the test
    pub reason: Option<String>,
    pub assessed_at: DateTime<Utc>,
}

impl DriftAssessment {
    /// Drift=false because one of the windows is too small
    pub fn insufficient(
        key: BaselineKey,
        statistic: DriftStatistic,
        baseline: StatsSummary,
        recent: StatsSummary,
        min_samples: usize,
    ) -> Self {
        Self {
            key,
            drift: false,
            magnitude: 0.0,
            statistic,
            responsible: Vec::new(),
            direction: DriftDirection::Stable,
            baseline,
            recent,
            reason: Some(format!(
                "insufficient samples: baseline {}, recent {}, need {}",
                baseline.count, recent.count, min_samples
            )),
            assessed_at: Utc::now(),
        }
    }
}

// ============================================================================
// DRIFT TEST TRAIT
// ============================================================================

pub trait DriftTest: Send + Sync {
    fn statistic(&self) -> DriftStatistic;

    /// Compare `recent` (finite values only) with `baseline`
    fn evaluate(&self, baseline: &BaselineRecord, recent: &[f64]) -> DriftVerdict;
}

/// Serializable choice of drift test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriftTestKind {
    MeanShift { sensitivity: f64 },
    KolmogorovSmirnov { alpha: f64 },
}

impl DriftTestKind {
    pub fn build(&self) -> Box<dyn DriftTest> {
        match *self {
            DriftTestKind::MeanShift { sensitivity } => Box::new(MeanShiftTest::new(sensitivity)),
            DriftTestKind::KolmogorovSmirnov { alpha } => Box::new(KolmogorovSmirnovTest::new(alpha)),
        }
    }
}

impl Default for DriftTestKind {
    fn default() -> Self {
        DriftTestKind::MeanShift {
            sensitivity: DEFAULT_DRIFT_SENSITIVITY,
        }
    }
}

// ============================================================================
// MEAN SHIFT
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct MeanShiftTest {
    sensitivity: f64,
    std_ratio_limit: f64,
}

impl MeanShiftTest {
    pub fn new(sensitivity: f64) -> Self {
        Self {
            sensitivity,
            std_ratio_limit: DEFAULT_STD_RATIO_LIMIT,
        }
    }

    pub fn with_std_ratio_limit(mut self, limit: f64) -> Self {
        self.std_ratio_limit = limit;
        self
    }
}

impl Default for MeanShiftTest {
    fn default() -> Self {
        Self::new(DEFAULT_DRIFT_SENSITIVITY)
    }
}

impl DriftTest for MeanShiftTest {
    fn statistic(&self) -> DriftStatistic {
        DriftStatistic::MeanShift
    }

    fn evaluate(&self, baseline: &BaselineRecord, recent: &[f64]) -> DriftVerdict {
        let base = baseline.summary();
        let now = StatsSummary::of(recent);
        let mut responsible = Vec::new();

        let shift = (now.mean - base.mean).abs() / base.std.max(MIN_BASELINE_STD);
        if shift > self.sensitivity {
            responsible.push("mean".to_string());
        }

        // Spread change only means something against a non-degenerate baseline
        if base.std > MIN_BASELINE_STD {
            let ratio = now.std / base.std;
            if ratio > self.std_ratio_limit || ratio < 1.0 / self.std_ratio_limit {
                responsible.push("std".to_string());
            }
        }

        DriftVerdict {
            drift: !responsible.is_empty(),
            magnitude: shift,
            responsible,
        }
    }
}

// ============================================================================
// KOLMOGOROV-SMIRNOV
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct KolmogorovSmirnovTest {
    alpha: f64,
}

impl KolmogorovSmirnovTest {
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }

    /// Critical distance for sample sizes `n` and `m`
    fn critical_value(&self, n: usize, m: usize) -> f64 {
        let c_alpha = (-(self.alpha / 2.0).ln() / 2.0).sqrt();
        let (n, m) = (n as f64, m as f64);
        c_alpha * ((n + m) / (n * m)).sqrt()
    }
}

impl Default for KolmogorovSmirnovTest {
    fn default() -> Self {
        Self::new(DEFAULT_KS_ALPHA)
    }
}

impl DriftTest for KolmogorovSmirnovTest {
    fn statistic(&self) -> DriftStatistic {
        DriftStatistic::KolmogorovSmirnov
    }

    fn evaluate(&self, baseline: &BaselineRecord, recent: &[f64]) -> DriftVerdict {
        let reference = baseline.samples();
        if reference.is_empty() || recent.is_empty() {
            return DriftVerdict {
                drift: false,
                magnitude: 0.0,
                responsible: Vec::new(),
            };
        }

        let distance = ks_distance(reference, recent);
        let critical = self.critical_value(reference.len(), recent.len());
        let drift = distance > critical;

        DriftVerdict {
            drift,
            magnitude: distance / critical,
            responsible: if drift { vec!["distribution".to_string()] } else { Vec::new() },
        }
    }
}

/// Two-sample KS statistic: max distance between the empirical CDFs
pub fn ks_distance(a: &[f64], b: &[f64]) -> f64 {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);

    let (n, m) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut distance: f64 = 0.0;

    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        distance = distance.max((i as f64 / n - j as f64 / m).abs());
    }
    distance
}

/// Direction of the recent mean relative to the baseline
pub fn direction(drift: bool, baseline: &StatsSummary, recent: &StatsSummary) -> DriftDirection {
    if !drift || recent.mean == baseline.mean {
        DriftDirection::Stable
    } else if recent.mean > baseline.mean {
        DriftDirection::Increasing
    } else {
        DriftDirection::Decreasing
    }
}
