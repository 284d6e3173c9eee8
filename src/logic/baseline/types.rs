use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logic::features::EntityKey;

// ============================================================================
// BASELINE KEY
// ============================================================================

/// Quantity tracked by a baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMetric {
    PayloadSize,
    ResponseTime,
    RequestRate,
    AnomalyScore,
}

impl BaselineMetric {
    pub const ALL: [BaselineMetric; 4] = [
        BaselineMetric::PayloadSize,
        BaselineMetric::ResponseTime,
        BaselineMetric::RequestRate,
        BaselineMetric::AnomalyScore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BaselineMetric::PayloadSize => "payload_size",
            BaselineMetric::ResponseTime => "response_time",
            BaselineMetric::RequestRate => "request_rate",
            BaselineMetric::AnomalyScore => "anomaly_score",
        }
    }
}

impl fmt::Display for BaselineMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BaselineKey {
    pub entity: EntityKey,
    pub metric: BaselineMetric,
}

impl BaselineKey {
    pub fn new(entity: EntityKey, metric: BaselineMetric) -> Self {
        Self { entity, metric }
    }

    pub fn global(metric: BaselineMetric) -> Self {
        Self::new(EntityKey::Global, metric)
    }
}

impl fmt::Display for BaselineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.metric)
    }
}

// ============================================================================
// OBSERVATIONS
// ============================================================================

/// One value offered to a baseline, optionally with the anomaly score of the
/// request it came from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub value: f64,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Observation {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            score: None,
            timestamp: None,
        }
    }

    pub fn scored(value: f64, score: f64) -> Self {
        Self {
            score: Some(score),
            ..Self::new(value)
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// What `update` did with an observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateOutcome {
    /// Learned; `count` is the record's sample count afterwards
    Accepted { count: u64 },
    /// Score at or above the entity's learning gate
    Gated { score: f64, gate: f64 },
    /// NaN or infinite value
    NonFinite,
}

impl UpdateOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UpdateOutcome::Accepted { .. })
    }
}

// ============================================================================
// SUMMARIES
// ============================================================================

/// Count / mean / population standard deviation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub count: u64,
    pub mean: f64,
    pub std: f64,
}

impl StatsSummary {
    /// Summary of a plain window; non-finite values are skipped
    pub fn of(values: &[f64]) -> Self {
        let mut count = 0u64;
        let mut mean = 0.0;
        let mut m2 = 0.0;
        for &v in values.iter().filter(|v| v.is_finite()) {
            count += 1;
            let delta = v - mean;
            mean += delta / count as f64;
            m2 += delta * (v - mean);
        }
        let std = if count > 0 { (m2 / count as f64).sqrt() } else { 0.0 };
        Self { count, mean, std }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_match_serde() {
        for metric in BaselineMetric::ALL {
            let json = serde_json::to_value(metric).unwrap();
            assert_eq!(json, metric.as_str());
        }
    }

    #[test]
    fn test_summary_skips_non_finite() {
        let summary = StatsSummary::of(&[2.0, 4.0, f64::NAN, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(summary.count, 8);
        assert!((summary.mean - 5.0).abs() < 1e-12);
        assert!((summary.std - 2.0).abs() < 1e-12);
        assert_eq!(StatsSummary::of(&[]), StatsSummary::default());
    }
}
