//! Baseline Module - Per-entity statistics, drift and adaptive thresholds
//!
//! Tracks running statistics per `BaselineKey` (entity + metric) from
//! accepted traffic, detects drift between a recent window and the stored
//! baseline, and derives the detector's operating threshold from the scores
//! learned as normal.
//!
//! # Architecture
//! - `types.rs`: keys, observations, summaries
//! - `record.rs`: Welford accumulator + percentile reservoir
//! - `drift.rs`: `DriftTest` trait, mean-shift and KS tests
//! - `threshold.rs`: `AdaptiveThreshold` and its derivation
//! - `feedback.rs`: correction labels and the feedback queue
//! - `sort.rs`: enumerated sort keys for listings
//! - `storage.rs` / `validate.rs`: versioned JSON snapshots
//!
//! # Concurrency
//! Records live in a `RwLock<HashMap<_, Arc<Mutex<BaselineRecord>>>>`. The
//! map lock is held only to find or insert a slot; every increment happens
//! under that key's own mutex, so concurrent updates are never lost.
//!
//! # Learning gate
//! An observation carrying an anomaly score is only learned when the score
//! is below the entity's gate. Feedback moves the gate per entity within a
//! bounded band around the configured default.

pub mod drift;
pub mod feedback;
pub mod record;
pub mod sort;
pub mod storage;
pub mod threshold;
pub mod types;
pub mod validate;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ANOMALY_THRESHOLD, DEFAULT_BASELINE_UPDATE_INTERVAL, DEFAULT_DRIFT_MIN_SAMPLES, DEFAULT_LEARNING_GATE,
    DEFAULT_RESERVOIR_SIZE, DEFAULT_THRESHOLD_MAX, DEFAULT_THRESHOLD_MIN, DEFAULT_THRESHOLD_PERCENTILE,
    FEEDBACK_GATE_MAX_SHIFT, FEEDBACK_GATE_STEP,
};
use crate::logic::features::EntityKey;

pub use drift::{
    DriftAssessment, DriftDirection, DriftStatistic, DriftTest, DriftTestKind, KolmogorovSmirnovTest, MeanShiftTest,
};
pub use feedback::{Correction, FeedbackLabel, FeedbackQueue, FeedbackRecord, FeedbackStats};
pub use record::BaselineRecord;
pub use sort::{BaselineListing, BaselineSortKey, SortOrder};
pub use storage::{BaselineSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use threshold::{AdaptiveThreshold, ThresholdMethod, ThresholdPolicy, ThresholdScope};
pub use types::{BaselineKey, BaselineMetric, Observation, StatsSummary, UpdateOutcome};
pub use validate::BaselineError;

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// Recent samples kept per key for percentiles and the KS test
    pub reservoir_size: usize,
    /// Accumulation window recorded on each baseline (seconds)
    pub window_seconds: u64,
    /// Scheduled threshold recomputation interval (seconds)
    pub update_interval_seconds: u64,
    /// Minimum samples in either window before drift can be declared
    pub min_samples: usize,
    /// Default learning gate (anomaly score) for every entity
    pub learning_gate: f64,
    pub drift_test: DriftTestKind,
    pub threshold: ThresholdPolicy,
}

impl BaselineConfig {
    pub fn validate(&self) -> Result<(), BaselineError> {
        if self.reservoir_size == 0 {
            return Err(BaselineError::Configuration("reservoir_size must be positive".into()));
        }
        if self.min_samples == 0 {
            return Err(BaselineError::Configuration("min_samples must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.learning_gate) {
            return Err(BaselineError::Configuration(format!(
                "learning_gate must be in [0, 1] range, got {}",
                self.learning_gate
            )));
        }

        let policy = &self.threshold;
        if !(0.0..=1.0).contains(&policy.percentile) {
            return Err(BaselineError::Configuration(format!(
                "threshold percentile must be in [0, 1] range, got {}",
                policy.percentile
            )));
        }
        if !(0.0..=1.0).contains(&policy.min) || !(0.0..=1.0).contains(&policy.max) || policy.min > policy.max {
            return Err(BaselineError::Configuration(format!(
                "threshold band [{}, {}] must lie within [0, 1] with min <= max",
                policy.min, policy.max
            )));
        }
        if !(0.0..=1.0).contains(&policy.fallback) {
            return Err(BaselineError::Configuration(format!(
                "fallback threshold must be in [0, 1] range, got {}",
                policy.fallback
            )));
        }

        match self.drift_test {
            DriftTestKind::MeanShift { sensitivity } if !(sensitivity > 0.0) => Err(BaselineError::Configuration(
                format!("drift sensitivity must be positive, got {}", sensitivity),
            )),
            DriftTestKind::KolmogorovSmirnov { alpha } if !(alpha > 0.0 && alpha < 1.0) => Err(
                BaselineError::Configuration(format!("KS alpha must be in (0, 1), got {}", alpha)),
            ),
            _ => Ok(()),
        }
    }
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            reservoir_size: DEFAULT_RESERVOIR_SIZE,
            window_seconds: DEFAULT_BASELINE_UPDATE_INTERVAL,
            update_interval_seconds: DEFAULT_BASELINE_UPDATE_INTERVAL,
            min_samples: DEFAULT_DRIFT_MIN_SAMPLES,
            learning_gate: DEFAULT_LEARNING_GATE,
            drift_test: DriftTestKind::default(),
            threshold: ThresholdPolicy {
                percentile: DEFAULT_THRESHOLD_PERCENTILE,
                min: DEFAULT_THRESHOLD_MIN,
                max: DEFAULT_THRESHOLD_MAX,
                fallback: DEFAULT_ANOMALY_THRESHOLD,
                min_samples: DEFAULT_DRIFT_MIN_SAMPLES,
            },
        }
    }
}

/// What `check_and_refresh` did
#[derive(Debug, Clone)]
pub struct DriftResponse {
    pub assessment: DriftAssessment,
    /// New baseline version when the baseline was replaced
    pub refreshed_version: Option<u64>,
    pub threshold: Option<AdaptiveThreshold>,
}

// ============================================================================
// ENGINE
// ============================================================================

type Slot = Arc<Mutex<BaselineRecord>>;

pub struct BaselineStats {
    config: BaselineConfig,
    drift_test: Box<dyn DriftTest>,
    records: RwLock<HashMap<BaselineKey, Slot>>,
    gates: RwLock<HashMap<EntityKey, f64>>,
    thresholds: RwLock<HashMap<ThresholdScope, AdaptiveThreshold>>,
    feedback: Mutex<FeedbackStats>,
    last_recompute: Mutex<Option<DateTime<Utc>>>,
}

impl BaselineStats {
    pub fn new(config: BaselineConfig) -> Self {
        Self {
            drift_test: config.drift_test.build(),
            config,
            records: RwLock::new(HashMap::new()),
            gates: RwLock::new(HashMap::new()),
            thresholds: RwLock::new(HashMap::new()),
            feedback: Mutex::new(FeedbackStats::default()),
            last_recompute: Mutex::new(None),
        }
    }

    /// Replace the configured drift test with a custom one
    pub fn with_drift_test(mut self, test: Box<dyn DriftTest>) -> Self {
        self.drift_test = test;
        self
    }

    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    fn slot(&self, key: &BaselineKey) -> Slot {
        if let Some(slot) = self.records.read().get(key) {
            return Arc::clone(slot);
        }
        let mut records = self.records.write();
        let slot = records.entry(key.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(BaselineRecord::new(
                self.config.reservoir_size,
                self.config.window_seconds,
            )))
        });
        Arc::clone(slot)
    }

    fn existing(&self, key: &BaselineKey) -> Option<Slot> {
        self.records.read().get(key).cloned()
    }

    // ------------------------------------------------------------------------
    // Learning
    // ------------------------------------------------------------------------

    /// Learn one observation, subject to the entity's learning gate
    pub fn update(&self, key: &BaselineKey, observation: Observation) -> UpdateOutcome {
        if !observation.value.is_finite() {
            log::trace!("Baseline {}: dropped non-finite value", key);
            return UpdateOutcome::NonFinite;
        }

        if let Some(score) = observation.score {
            let gate = self.learning_gate(&key.entity);
            if !score.is_finite() || score >= gate {
                log::trace!("Baseline {}: score {:.3} at or above gate {:.3}", key, score, gate);
                return UpdateOutcome::Gated { score, gate };
            }
        }

        let slot = self.slot(key);
        let mut record = slot.lock();
        record.push(observation.value, observation.timestamp);
        UpdateOutcome::Accepted { count: record.count() }
    }

    /// Feed an explicit history window without gating; returns values learned
    pub fn ingest_window(&self, key: &BaselineKey, values: &[f64]) -> usize {
        let slot = self.slot(key);
        let mut record = slot.lock();
        let learned = values.iter().filter(|&&v| record.push(v, None)).count();
        log::debug!("Baseline {}: ingested {} of {} values", key, learned, values.len());
        learned
    }

    /// Replace the baseline for `key` with statistics over `window`
    ///
    /// Returns the new version.
    pub fn refresh_baseline(&self, key: &BaselineKey, window: &[f64]) -> Result<u64, BaselineError> {
        if !window.iter().any(|v| v.is_finite()) {
            return Err(BaselineError::EmptyWindow(key.to_string()));
        }

        let slot = self.slot(key);
        let mut record = slot.lock();
        let version = record.version() + 1;
        *record = BaselineRecord::from_window(
            window,
            self.config.reservoir_size,
            self.config.window_seconds,
            version,
        );

        log::info!(
            "Baseline {} refreshed: v{} over {} samples (mean {:.3}, std {:.3})",
            key,
            version,
            record.count(),
            record.mean(),
            record.std()
        );
        Ok(version)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn summary(&self, key: &BaselineKey) -> Option<StatsSummary> {
        self.existing(key).map(|slot| slot.lock().summary())
    }

    /// Copy of the record for `key`
    pub fn record(&self, key: &BaselineKey) -> Option<BaselineRecord> {
        self.existing(key).map(|slot| slot.lock().clone())
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn list_records(&self, sort_key: BaselineSortKey, order: SortOrder) -> Vec<BaselineListing> {
        let slots: Vec<(BaselineKey, Slot)> = self
            .records
            .read()
            .iter()
            .map(|(k, s)| (k.clone(), Arc::clone(s)))
            .collect();

        let mut listings: Vec<BaselineListing> = slots
            .into_iter()
            .map(|(key, slot)| {
                let record = slot.lock();
                BaselineListing {
                    key,
                    summary: record.summary(),
                    min: record.min(),
                    max: record.max(),
                    p50: record.p50(),
                    p95: record.p95(),
                    p99: record.p99(),
                    version: record.version(),
                    last_updated: record.last_updated(),
                }
            })
            .collect();

        sort::sort_listings(&mut listings, sort_key, order);
        listings
    }

    // ------------------------------------------------------------------------
    // Drift
    // ------------------------------------------------------------------------

    pub fn detect_drift(&self, key: &BaselineKey, recent_window: &[f64]) -> DriftAssessment {
        let statistic = self.drift_test.statistic();
        let recent: Vec<f64> = recent_window.iter().copied().filter(|v| v.is_finite()).collect();
        let recent_summary = StatsSummary::of(&recent);
        let min = self.config.min_samples;

        let Some(record) = self.record(key) else {
            return DriftAssessment::insufficient(key.clone(), statistic, StatsSummary::default(), recent_summary, min);
        };
        let baseline_summary = record.summary();

        if baseline_summary.count < min as u64 || recent.len() < min {
            log::debug!(
                "Drift check {} skipped: baseline {} / recent {} samples (need {})",
                key,
                baseline_summary.count,
                recent.len(),
                min
            );
            return DriftAssessment::insufficient(key.clone(), statistic, baseline_summary, recent_summary, min);
        }

        let verdict = self.drift_test.evaluate(&record, &recent);
        let direction = drift::direction(verdict.drift, &baseline_summary, &recent_summary);

        if verdict.drift {
            log::warn!(
                "Drift on {}: {:?} magnitude {:.2} ({}), mean {:.3} -> {:.3}",
                key,
                statistic,
                verdict.magnitude,
                verdict.responsible.join(", "),
                baseline_summary.mean,
                recent_summary.mean
            );
        }

        DriftAssessment {
            key: key.clone(),
            drift: verdict.drift,
            magnitude: verdict.magnitude,
            statistic,
            responsible: verdict.responsible,
            direction,
            baseline: baseline_summary,
            recent: recent_summary,
            reason: None,
            assessed_at: Utc::now(),
        }
    }

    /// Detect drift; on drift refresh the baseline from the recent window and
    /// recompute the threshold it feeds
    pub fn check_and_refresh(&self, key: &BaselineKey, recent_window: &[f64]) -> Result<DriftResponse, BaselineError> {
        let assessment = self.detect_drift(key, recent_window);
        if !assessment.drift {
            return Ok(DriftResponse {
                assessment,
                refreshed_version: None,
                threshold: None,
            });
        }

        let version = self.refresh_baseline(key, recent_window)?;
        let threshold = (key.metric == BaselineMetric::AnomalyScore)
            .then(|| self.compute_adaptive_threshold(ThresholdScope::from(key.entity.clone())));

        Ok(DriftResponse {
            assessment,
            refreshed_version: Some(version),
            threshold,
        })
    }

    // ------------------------------------------------------------------------
    // Thresholds
    // ------------------------------------------------------------------------

    /// Derive and store the threshold for `scope`
    pub fn compute_adaptive_threshold(&self, scope: ThresholdScope) -> AdaptiveThreshold {
        let key = BaselineKey::new(scope.entity(), BaselineMetric::AnomalyScore);
        let record = self.record(&key);
        let threshold = self.config.threshold.compute(scope, record.as_ref());

        log::debug!(
            "Adaptive threshold for {}: {:.4} ({:?}, baseline v{}, {} samples)",
            threshold.scope,
            threshold.value,
            threshold.method,
            threshold.baseline_version,
            threshold.sample_count
        );
        self.thresholds
            .write()
            .insert(threshold.scope.clone(), threshold.clone());
        threshold
    }

    pub fn current_threshold(&self, scope: &ThresholdScope) -> Option<AdaptiveThreshold> {
        self.thresholds.read().get(scope).cloned()
    }

    /// Recompute every threshold when the update interval has elapsed
    ///
    /// Returns the recomputed thresholds (empty when not yet due), global first.
    pub fn recompute_due_thresholds(&self, now: DateTime<Utc>) -> Vec<AdaptiveThreshold> {
        {
            let mut last = self.last_recompute.lock();
            let interval = self.config.update_interval_seconds as i64;
            if let Some(previous) = *last {
                if (now - previous).num_seconds() < interval {
                    return Vec::new();
                }
            }
            *last = Some(now);
        }

        let mut entities: Vec<EntityKey> = self
            .records
            .read()
            .keys()
            .filter(|k| k.metric == BaselineMetric::AnomalyScore && k.entity != EntityKey::Global)
            .map(|k| k.entity.clone())
            .collect();
        entities.sort();

        let mut scopes = vec![ThresholdScope::Global];
        scopes.extend(entities.into_iter().map(ThresholdScope::Entity));

        let recomputed: Vec<AdaptiveThreshold> = scopes
            .into_iter()
            .map(|scope| self.compute_adaptive_threshold(scope))
            .collect();
        log::info!("Recomputed {} adaptive threshold(s)", recomputed.len());
        recomputed
    }

    // ------------------------------------------------------------------------
    // Feedback
    // ------------------------------------------------------------------------

    pub fn learning_gate(&self, entity: &EntityKey) -> f64 {
        self.gates
            .read()
            .get(entity)
            .copied()
            .unwrap_or(self.config.learning_gate)
    }

    /// Apply one correction; returns the entity's learning gate afterwards
    pub fn apply_feedback(&self, feedback: &FeedbackRecord) -> f64 {
        self.feedback.lock().record(feedback.label);

        let gate = match feedback.label {
            FeedbackLabel::FalsePositive => {
                for correction in &feedback.corrections {
                    let key = BaselineKey::new(feedback.entity.clone(), correction.metric);
                    self.ingest_window(&key, &[correction.value]);
                }
                if let Some(score) = feedback.score {
                    self.learn_score(&feedback.entity, score);
                }
                self.shift_gate(&feedback.entity, FEEDBACK_GATE_STEP)
            }
            FeedbackLabel::TruePositive => self.shift_gate(&feedback.entity, -FEEDBACK_GATE_STEP),
            FeedbackLabel::Informative | FeedbackLabel::Other => self.learning_gate(&feedback.entity),
        };

        log::info!(
            "Feedback {:?} for {}: learning gate now {:.2}",
            feedback.label,
            feedback.entity,
            gate
        );
        gate
    }

    pub fn feedback_stats(&self) -> FeedbackStats {
        *self.feedback.lock()
    }

    /// A score confirmed as normal feeds the entity and global score baselines
    fn learn_score(&self, entity: &EntityKey, score: f64) {
        self.ingest_window(&BaselineKey::new(entity.clone(), BaselineMetric::AnomalyScore), &[score]);
        if *entity != EntityKey::Global {
            self.ingest_window(&BaselineKey::global(BaselineMetric::AnomalyScore), &[score]);
        }
    }

    fn shift_gate(&self, entity: &EntityKey, delta: f64) -> f64 {
        let base = self.config.learning_gate;
        let low = (base - FEEDBACK_GATE_MAX_SHIFT).max(0.0);
        let high = (base + FEEDBACK_GATE_MAX_SHIFT).min(1.0);

        let mut gates = self.gates.write();
        let gate = gates.entry(entity.clone()).or_insert(base);
        *gate = (*gate + delta).clamp(low, high);
        *gate
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    pub fn snapshot(&self) -> BaselineSnapshot {
        let slots: Vec<(BaselineKey, Slot)> = self
            .records
            .read()
            .iter()
            .map(|(k, s)| (k.clone(), Arc::clone(s)))
            .collect();
        let mut records: Vec<storage::RecordEntry> = slots
            .into_iter()
            .map(|(key, slot)| storage::RecordEntry {
                key,
                record: slot.lock().clone(),
            })
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));

        let mut gates: Vec<storage::GateEntry> = self
            .gates
            .read()
            .iter()
            .map(|(entity, gate)| storage::GateEntry {
                entity: entity.clone(),
                gate: *gate,
            })
            .collect();
        gates.sort_by(|a, b| a.entity.cmp(&b.entity));

        let mut thresholds: Vec<AdaptiveThreshold> = self.thresholds.read().values().cloned().collect();
        thresholds.sort_by(|a, b| a.scope.entity().cmp(&b.scope.entity()));

        BaselineSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            saved_at: Utc::now(),
            records,
            gates,
            thresholds,
            feedback: self.feedback_stats(),
        }
    }

    /// Replace all state with a snapshot's contents
    pub fn restore(&self, snapshot: BaselineSnapshot) -> Result<usize, BaselineError> {
        validate::validate_snapshot(&snapshot)?;

        let count = snapshot.records.len();
        *self.records.write() = snapshot
            .records
            .into_iter()
            .map(|entry| (entry.key, Arc::new(Mutex::new(entry.record))))
            .collect();
        *self.gates.write() = snapshot.gates.into_iter().map(|g| (g.entity, g.gate)).collect();
        *self.thresholds.write() = snapshot
            .thresholds
            .into_iter()
            .map(|t| (t.scope.clone(), t))
            .collect();
        *self.feedback.lock() = snapshot.feedback;
        Ok(count)
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<(), BaselineError> {
        let snapshot = self.snapshot();
        storage::save_snapshot(&snapshot, path)?;
        log::info!("Saved {} baseline record(s) to {}", snapshot.records.len(), path.display());
        Ok(())
    }

    /// Load and restore a snapshot; returns the number of records restored
    pub fn load_snapshot(&self, path: &Path) -> Result<usize, BaselineError> {
        let snapshot = storage::load_snapshot(path)?;
        let count = self.restore(snapshot)?;
        log::info!("Loaded {} baseline record(s) from {}", count, path.display());
        Ok(count)
    }
}

impl Default for BaselineStats {
    fn default() -> Self {
        Self::new(BaselineConfig::default())
    }
}
