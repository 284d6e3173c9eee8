//! Feedback - Operator corrections for past verdicts
//!
//! Labels arrive through `FeedbackQueue` (the sink the surrounding service
//! writes to) and are applied by `BaselineStats::apply_feedback`:
//! - false positive: widen the entity's learning gate, learn the corrected
//!   observations and the score that was wrongly flagged
//! - true positive: tighten the gate
//! - informative / other: counted only

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::logic::features::EntityKey;

use super::types::BaselineMetric;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackLabel {
    FalsePositive,
    TruePositive,
    Informative,
    Other,
}

/// Value the operator says should have been learned as normal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub metric: BaselineMetric,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub entity: EntityKey,
    pub label: FeedbackLabel,
    /// Anomaly score of the verdict being corrected
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub corrections: Vec<Correction>,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn new(entity: EntityKey, label: FeedbackLabel) -> Self {
        Self {
            entity,
            label,
            score: None,
            corrections: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_correction(mut self, metric: BaselineMetric, value: f64) -> Self {
        self.corrections.push(Correction { metric, value });
        self
    }
}

/// Counts per label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub total: u64,
    pub false_positives: u64,
    pub true_positives: u64,
    pub informative: u64,
    pub other: u64,
}

impl FeedbackStats {
    pub fn record(&mut self, label: FeedbackLabel) {
        self.total += 1;
        match label {
            FeedbackLabel::FalsePositive => self.false_positives += 1,
            FeedbackLabel::TruePositive => self.true_positives += 1,
            FeedbackLabel::Informative => self.informative += 1,
            FeedbackLabel::Other => self.other += 1,
        }
    }

    /// False positives among labelled verdicts (FP + TP)
    pub fn false_positive_rate(&self) -> f64 {
        let labelled = self.false_positives + self.true_positives;
        if labelled == 0 {
            0.0
        } else {
            self.false_positives as f64 / labelled as f64
        }
    }
}

/// Bounded FIFO between the feedback collaborator and the engine
pub struct FeedbackQueue {
    pending: Mutex<VecDeque<FeedbackRecord>>,
    capacity: usize,
}

impl FeedbackQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue; the oldest entry is dropped when full
    pub fn submit(&self, record: FeedbackRecord) {
        let mut pending = self.pending.lock();
        if pending.len() >= self.capacity {
            if let Some(dropped) = pending.pop_front() {
                log::warn!(
                    "Feedback queue full ({}), dropping {:?} for {}",
                    self.capacity,
                    dropped.label,
                    dropped.entity
                );
            }
        }
        pending.push_back(record);
    }

    /// Take everything queued, oldest first
    pub fn drain(&self) -> Vec<FeedbackRecord> {
        self.pending.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl Default for FeedbackQueue {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_fifo_and_bounded() {
        let queue = FeedbackQueue::new(2);
        let ip = |n: u8| EntityKey::source_ip(format!("10.0.0.{}", n));

        queue.submit(FeedbackRecord::new(ip(1), FeedbackLabel::FalsePositive));
        queue.submit(FeedbackRecord::new(ip(2), FeedbackLabel::TruePositive));
        queue.submit(FeedbackRecord::new(ip(3), FeedbackLabel::Other));
        assert_eq!(queue.len(), 2);

        let drained = queue.drain();
        assert_eq!(drained[0].entity, ip(2));
        assert_eq!(drained[1].entity, ip(3));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stats() {
        let mut stats = FeedbackStats::default();
        assert_eq!(stats.false_positive_rate(), 0.0);

        for label in [
            FeedbackLabel::FalsePositive,
            FeedbackLabel::FalsePositive,
            FeedbackLabel::FalsePositive,
            FeedbackLabel::TruePositive,
            FeedbackLabel::Informative,
        ] {
            stats.record(label);
        }
        assert_eq!(stats.total, 5);
        assert_eq!(stats.informative, 1);
        assert!((stats.false_positive_rate() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_record_deserializes_with_defaults() {
        let json = r#"{"entity":{"kind":"global"},"label":"false_positive","timestamp":"2024-01-01T00:00:00Z"}"#;
        let record: FeedbackRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.label, FeedbackLabel::FalsePositive);
        assert!(record.corrections.is_empty());
        assert_eq!(record.score, None);
    }
}
