//! Scoring Pipeline - Extract → detect → alert, and learn from normal traffic
//!
//! Owns the wiring between the feature extractor, the ensemble detector and
//! the baseline engine:
//! - anomalies go to the `AlertEmitter`
//! - everything else is offered to the baselines, gated by its score
//! - queued operator feedback is applied on demand
//! - `maintenance` recomputes due thresholds and, when enabled, moves the
//!   detector onto the global adaptive threshold

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::logic::baseline::{
    AdaptiveThreshold, BaselineKey, BaselineMetric, BaselineStats, DriftResponse, FeedbackQueue, Observation,
    ThresholdScope,
};
use crate::logic::config::CoreConfig;
use crate::logic::detector::{AnomalyDetector, DetectionResult};
use crate::logic::features::{EntityKey, FeatureExtractor, FeatureVector, HistoryAccessor, TrafficRecord};

// ============================================================================
// ALERTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub id: Uuid,
    pub record_id: Option<u64>,
    pub entity: EntityKey,
    pub result: DetectionResult,
    /// Operating threshold the verdict was made against
    pub threshold: f64,
    pub created_at: DateTime<Utc>,
}

/// Receives every anomalous verdict
pub trait AlertEmitter: Send + Sync {
    fn emit(&self, alert: &AnomalyAlert);
}

/// Writes alerts to the log
pub struct LogEmitter;

impl AlertEmitter for LogEmitter {
    fn emit(&self, alert: &AnomalyAlert) {
        log::warn!(
            "Anomaly {} on {}: score {:.3} (threshold {:.3}, confidence {:.2})",
            alert.id,
            alert.entity,
            alert.result.anomaly_score,
            alert.threshold,
            alert.result.confidence
        );
    }
}

/// Keeps alerts in memory
#[derive(Default)]
pub struct CollectingEmitter {
    alerts: Mutex<Vec<AnomalyAlert>>,
}

impl CollectingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<AnomalyAlert> {
        self.alerts.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }
}

impl AlertEmitter for CollectingEmitter {
    fn emit(&self, alert: &AnomalyAlert) {
        self.alerts.lock().push(alert.clone());
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct ScoringPipeline {
    extractor: FeatureExtractor,
    detector: Arc<AnomalyDetector>,
    baselines: Arc<BaselineStats>,
    history: Arc<dyn HistoryAccessor>,
    emitter: Arc<dyn AlertEmitter>,
    feedback: Arc<FeedbackQueue>,
    adaptive_threshold: bool,
}

impl ScoringPipeline {
    pub fn new(
        config: &CoreConfig,
        detector: Arc<AnomalyDetector>,
        baselines: Arc<BaselineStats>,
        history: Arc<dyn HistoryAccessor>,
        emitter: Arc<dyn AlertEmitter>,
    ) -> Self {
        let extractor = FeatureExtractor::new(config.extractor_config()).with_baselines(Arc::clone(&baselines));
        Self {
            extractor,
            detector,
            baselines,
            history,
            emitter,
            feedback: Arc::new(FeedbackQueue::default()),
            adaptive_threshold: config.adaptive_threshold,
        }
    }

    pub fn detector(&self) -> &Arc<AnomalyDetector> {
        &self.detector
    }

    pub fn baselines(&self) -> &Arc<BaselineStats> {
        &self.baselines
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Sink the feedback collaborator submits corrections to
    pub fn feedback_queue(&self) -> Arc<FeedbackQueue> {
        Arc::clone(&self.feedback)
    }

    // ------------------------------------------------------------------------
    // Scoring
    // ------------------------------------------------------------------------

    pub fn process(&self, record: &TrafficRecord) -> Result<DetectionResult> {
        let vector = self
            .extractor
            .extract_features(record, self.history.as_ref(), None)?;
        let result = self.detector.detect(&vector)?;
        self.route(record, &vector, &result);
        Ok(result)
    }

    /// Score a batch with the optimizer's shared window pass; input order kept
    pub fn process_batch(&self, records: &[TrafficRecord]) -> Result<Vec<DetectionResult>> {
        let vectors = self.extractor.extract_batch(records, self.history.as_ref())?;

        let mut results = Vec::with_capacity(records.len());
        for (record, vector) in records.iter().zip(vectors.iter()) {
            let result = self.detector.detect(vector)?;
            self.route(record, vector, &result);
            results.push(result);
        }
        Ok(results)
    }

    fn route(&self, record: &TrafficRecord, vector: &FeatureVector, result: &DetectionResult) {
        let entity = EntityKey::for_record(record).unwrap_or(EntityKey::Global);

        if result.is_anomaly {
            let alert = AnomalyAlert {
                id: Uuid::new_v4(),
                record_id: record.id,
                entity,
                result: *result,
                threshold: self.detector.anomaly_threshold(),
                created_at: Utc::now(),
            };
            log::debug!("Alert {} features: {}", alert.id, vector.to_log_entry());
            self.emitter.emit(&alert);
        } else {
            self.learn(&entity, record, vector, result);
        }
    }

    /// Offer a normal record to its entity's baselines
    fn learn(&self, entity: &EntityKey, record: &TrafficRecord, vector: &FeatureVector, result: &DetectionResult) {
        let score = result.anomaly_score;
        let observe = |value: f64| {
            let observation = Observation::scored(value, score);
            match record.timestamp {
                Some(ts) => observation.at(ts),
                None => observation,
            }
        };

        let mut offered = vec![(BaselineMetric::AnomalyScore, score)];
        if let Some(size) = record.payload_size {
            offered.push((BaselineMetric::PayloadSize, size as f64));
        }
        if let Some(ms) = record.response_time_ms {
            offered.push((BaselineMetric::ResponseTime, ms));
        }
        if let Some(rate) = vector.get("requests_per_ip") {
            offered.push((BaselineMetric::RequestRate, rate));
        }

        for (metric, value) in offered {
            self.baselines
                .update(&BaselineKey::new(entity.clone(), metric), observe(value));
        }
        if *entity != EntityKey::Global {
            self.baselines
                .update(&BaselineKey::global(BaselineMetric::AnomalyScore), observe(score));
        }
    }

    // ------------------------------------------------------------------------
    // Feedback & maintenance
    // ------------------------------------------------------------------------

    /// Apply everything in the feedback queue; returns how many were applied
    pub fn apply_pending_feedback(&self) -> usize {
        let pending = self.feedback.drain();
        for feedback in &pending {
            self.baselines.apply_feedback(feedback);
            self.extractor.invalidate(&feedback.entity);
        }
        pending.len()
    }

    /// Drift check for one baseline; a refresh invalidates the entity's
    /// cached features and may move the detector threshold
    pub fn check_drift(&self, key: &BaselineKey, recent_window: &[f64]) -> Result<DriftResponse> {
        let response = self.baselines.check_and_refresh(key, recent_window)?;
        if response.refreshed_version.is_some() {
            self.extractor.invalidate(&key.entity);
        }
        if let Some(threshold) = &response.threshold {
            self.adopt(threshold)?;
        }
        Ok(response)
    }

    /// Scheduled work: recompute due thresholds and adopt the global one
    pub fn maintenance(&self, now: DateTime<Utc>) -> Result<Vec<AdaptiveThreshold>> {
        let recomputed = self.baselines.recompute_due_thresholds(now);
        if recomputed.is_empty() {
            return Ok(recomputed);
        }

        self.extractor.clear_cache();
        if let Some(global) = recomputed.iter().find(|t| t.scope == ThresholdScope::Global) {
            self.adopt(global)?;
        }
        Ok(recomputed)
    }

    fn adopt(&self, threshold: &AdaptiveThreshold) -> Result<()> {
        if self.adaptive_threshold && threshold.scope == ThresholdScope::Global {
            self.detector.apply_adaptive_threshold(threshold)?;
        }
        Ok(())
    }
}
