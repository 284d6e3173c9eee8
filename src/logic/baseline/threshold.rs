//! Adaptive Threshold - Operating threshold derived from normal scores
//!
//! A high percentile of the anomaly scores learned as normal for a scope,
//! clamped to a configured band. With too few samples the static fallback is
//! used instead. Every computed threshold carries its provenance.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logic::features::EntityKey;

use super::record::BaselineRecord;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdScope {
    Global,
    Entity(EntityKey),
}

impl ThresholdScope {
    /// Entity whose anomaly-score baseline feeds this scope
    pub fn entity(&self) -> EntityKey {
        match self {
            ThresholdScope::Global => EntityKey::Global,
            ThresholdScope::Entity(entity) => entity.clone(),
        }
    }
}

impl From<EntityKey> for ThresholdScope {
    fn from(entity: EntityKey) -> Self {
        match entity {
            EntityKey::Global => ThresholdScope::Global,
            other => ThresholdScope::Entity(other),
        }
    }
}

impl fmt::Display for ThresholdScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdScope::Global => f.write_str("global"),
            ThresholdScope::Entity(entity) => write!(f, "{}", entity),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMethod {
    Percentile,
    StaticFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveThreshold {
    pub value: f64,
    pub scope: ThresholdScope,
    pub method: ThresholdMethod,
    /// Version of the anomaly-score baseline it was derived from (0 = none)
    pub baseline_version: u64,
    pub sample_count: u64,
    pub computed_at: DateTime<Utc>,
    pub id: Uuid,
}

impl AdaptiveThreshold {
    /// Threshold not backed by any baseline
    pub fn fixed(value: f64, scope: ThresholdScope, method: ThresholdMethod) -> Self {
        Self {
            value,
            scope,
            method,
            baseline_version: 0,
            sample_count: 0,
            computed_at: Utc::now(),
            id: Uuid::new_v4(),
        }
    }
}

/// Parameters for deriving a threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    pub percentile: f64,
    pub min: f64,
    pub max: f64,
    pub fallback: f64,
    pub min_samples: usize,
}

impl ThresholdPolicy {
    /// Derive a threshold for `scope` from its anomaly-score baseline
    pub fn compute(&self, scope: ThresholdScope, scores: Option<&BaselineRecord>) -> AdaptiveThreshold {
        let Some(record) = scores.filter(|r| r.samples().len() >= self.min_samples) else {
            let mut threshold = AdaptiveThreshold::fixed(self.fallback, scope, ThresholdMethod::StaticFallback);
            if let Some(record) = scores {
                threshold.baseline_version = record.version();
                threshold.sample_count = record.count();
            }
            return threshold;
        };

        let raw = record.percentile(self.percentile).unwrap_or(self.fallback);
        AdaptiveThreshold {
            value: raw.clamp(self.min, self.max),
            scope,
            method: ThresholdMethod::Percentile,
            baseline_version: record.version(),
            sample_count: record.count(),
            computed_at: Utc::now(),
            id: Uuid::new_v4(),
        }
    }
}
