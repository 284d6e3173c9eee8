use std::sync::Barrier;

use chrono::{Duration, Utc};

use super::*;

fn ip(addr: &str) -> EntityKey {
    EntityKey::source_ip(addr)
}

fn alternating(n: usize, low: f64, high: f64) -> Vec<f64> {
    (0..n).map(|i| if i % 2 == 0 { low } else { high }).collect()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

// ============================================================================
// Learning
// ============================================================================

#[test]
fn test_update_accepts_gates_and_drops() {
    let stats = BaselineStats::default();
    let key = BaselineKey::new(ip("10.0.0.1"), BaselineMetric::PayloadSize);

    assert_eq!(stats.update(&key, Observation::new(512.0)), UpdateOutcome::Accepted { count: 1 });
    assert_eq!(stats.update(&key, Observation::scored(600.0, 0.1)), UpdateOutcome::Accepted { count: 2 });
    assert!(matches!(stats.update(&key, Observation::scored(9_000.0, 0.9)), UpdateOutcome::Gated { .. }));
    assert_eq!(stats.update(&key, Observation::new(f64::NAN)), UpdateOutcome::NonFinite);

    let summary = stats.summary(&key).unwrap();
    assert_eq!(summary.count, 2);
    assert!(close(summary.mean, 556.0));
}

#[test]
fn test_gate_is_exclusive() {
    let stats = BaselineStats::default();
    let key = BaselineKey::new(ip("10.0.0.1"), BaselineMetric::ResponseTime);

    // Exactly at the gate is not learned
    assert!(!stats.update(&key, Observation::scored(40.0, 0.5)).is_accepted());
    assert!(stats.update(&key, Observation::scored(40.0, 0.49)).is_accepted());
}

#[test]
fn test_concurrent_updates_are_not_lost() {
    let stats = BaselineStats::default();
    let key = BaselineKey::new(ip("10.0.0.1"), BaselineMetric::RequestRate);
    let threads = 8;
    let per_thread = 1_000;
    let barrier = Barrier::new(threads);

    std::thread::scope(|s| {
        for t in 0..threads {
            let (stats, key, barrier) = (&stats, &key, &barrier);
            s.spawn(move || {
                barrier.wait();
                for _ in 0..per_thread {
                    stats.update(key, Observation::new(t as f64));
                }
            });
        }
    });

    let summary = stats.summary(&key).unwrap();
    assert_eq!(summary.count, (threads * per_thread) as u64);
    assert!(close(summary.mean, 3.5));
}

#[test]
fn test_refresh_replaces_and_bumps_version() {
    let stats = BaselineStats::default();
    let key = BaselineKey::new(ip("10.0.0.1"), BaselineMetric::PayloadSize);
    stats.ingest_window(&key, &alternating(100, 400.0, 600.0));
    assert_eq!(stats.record(&key).unwrap().version(), 1);

    let version = stats.refresh_baseline(&key, &[10.0, 20.0, f64::NAN, 30.0]).unwrap();
    assert_eq!(version, 2);

    let record = stats.record(&key).unwrap();
    assert_eq!(record.version(), 2);
    assert_eq!(record.count(), 3);
    assert!(close(record.mean(), 20.0));
    assert_eq!(record.min(), 10.0);
    assert_eq!(record.max(), 30.0);
}

#[test]
fn test_refresh_rejects_empty_window() {
    let stats = BaselineStats::default();
    let key = BaselineKey::global(BaselineMetric::AnomalyScore);

    let err = stats.refresh_baseline(&key, &[f64::NAN]).unwrap_err();
    assert!(matches!(err, BaselineError::EmptyWindow(_)));
    assert_eq!(err.category(), crate::error::ErrorCategory::DataQuality);
    assert!(stats.is_empty());
}

// ============================================================================
// Drift
// ============================================================================

#[test]
fn test_drift_false_with_too_few_recent_samples() {
    let stats = BaselineStats::default();
    let key = BaselineKey::new(ip("10.0.0.1"), BaselineMetric::PayloadSize);
    stats.ingest_window(&key, &alternating(100, 90.0, 110.0));

    // Enormous shift, but only 10 samples
    let assessment = stats.detect_drift(&key, &[10_000.0; 10]);
    assert!(!assessment.drift);
    assert_eq!(assessment.direction, DriftDirection::Stable);
    assert!(assessment.reason.unwrap().contains("insufficient samples"));
    assert_eq!(assessment.recent.count, 10);
}

#[test]
fn test_drift_false_without_baseline() {
    let stats = BaselineStats::default();
    let key = BaselineKey::new(ip("10.0.0.9"), BaselineMetric::PayloadSize);

    let assessment = stats.detect_drift(&key, &[1.0; 100]);
    assert!(!assessment.drift);
    assert_eq!(assessment.baseline.count, 0);
    assert!(assessment.reason.is_some());
}

#[test]
fn test_drift_detected_on_mean_shift() {
    let stats = BaselineStats::default();
    let key = BaselineKey::new(ip("10.0.0.1"), BaselineMetric::ResponseTime);
    stats.ingest_window(&key, &alternating(100, 90.0, 110.0));

    let assessment = stats.detect_drift(&key, &alternating(40, 190.0, 210.0));
    assert!(assessment.drift);
    assert_eq!(assessment.statistic, DriftStatistic::MeanShift);
    assert_eq!(assessment.direction, DriftDirection::Increasing);
    assert!(close(assessment.magnitude, 10.0));
    assert!(assessment.responsible.contains(&"mean".to_string()));
    assert!(assessment.reason.is_none());

    // Same distribution, no drift
    let stable = stats.detect_drift(&key, &alternating(40, 92.0, 108.0));
    assert!(!stable.drift);
}

#[test]
fn test_ks_drift_test_from_config() {
    let config = BaselineConfig {
        drift_test: DriftTestKind::KolmogorovSmirnov { alpha: 0.05 },
        ..BaselineConfig::default()
    };
    let stats = BaselineStats::new(config);
    let key = BaselineKey::new(ip("10.0.0.1"), BaselineMetric::PayloadSize);
    stats.ingest_window(&key, &(0..100).map(|v| v as f64).collect::<Vec<_>>());

    let shifted: Vec<f64> = (0..50).map(|v| 300.0 + v as f64).collect();
    let assessment = stats.detect_drift(&key, &shifted);
    assert!(assessment.drift);
    assert_eq!(assessment.statistic, DriftStatistic::KolmogorovSmirnov);
    assert_eq!(assessment.responsible, vec!["distribution".to_string()]);
}

struct AlwaysDrift;

impl DriftTest for AlwaysDrift {
    fn statistic(&self) -> DriftStatistic {
        DriftStatistic::MeanShift
    }

    fn evaluate(&self, _baseline: &BaselineRecord, _recent: &[f64]) -> drift::DriftVerdict {
        drift::DriftVerdict {
            drift: true,
            magnitude: 99.0,
            responsible: vec!["custom".into()],
        }
    }
}

#[test]
fn test_custom_drift_test_still_respects_min_samples() {
    let stats = BaselineStats::default().with_drift_test(Box::new(AlwaysDrift));
    let key = BaselineKey::new(ip("10.0.0.1"), BaselineMetric::PayloadSize);
    stats.ingest_window(&key, &[1.0; 50]);

    assert!(!stats.detect_drift(&key, &[1.0; 5]).drift);
    let assessment = stats.detect_drift(&key, &[1.0; 50]);
    assert!(assessment.drift);
    assert_eq!(assessment.magnitude, 99.0);
}

#[test]
fn test_check_and_refresh_recomputes_threshold() {
    let stats = BaselineStats::default();
    let key = BaselineKey::global(BaselineMetric::AnomalyScore);
    stats.ingest_window(&key, &alternating(50, 0.1, 0.2));

    let response = stats.check_and_refresh(&key, &alternating(40, 0.6, 0.7)).unwrap();
    assert!(response.assessment.drift);
    assert_eq!(response.refreshed_version, Some(2));

    let threshold = response.threshold.unwrap();
    assert_eq!(threshold.method, ThresholdMethod::Percentile);
    assert_eq!(threshold.baseline_version, 2);
    assert!(close(threshold.value, 0.7));
    assert_eq!(stats.current_threshold(&ThresholdScope::Global), Some(threshold));

    // No drift: nothing refreshed
    let quiet = stats.check_and_refresh(&key, &alternating(40, 0.6, 0.7)).unwrap();
    assert!(!quiet.assessment.drift);
    assert_eq!(quiet.refreshed_version, None);
    assert_eq!(stats.record(&key).unwrap().version(), 2);
}

// ============================================================================
// Thresholds
// ============================================================================

#[test]
fn test_adaptive_threshold_fallback_then_percentile() {
    let stats = BaselineStats::default();
    let entity = ip("10.0.0.1");
    let scope = ThresholdScope::Entity(entity.clone());

    let fallback = stats.compute_adaptive_threshold(scope.clone());
    assert_eq!(fallback.method, ThresholdMethod::StaticFallback);
    assert!(close(fallback.value, 0.7));

    let scores: Vec<f64> = (0..=100).map(|i| 0.2 + 0.004 * i as f64).collect();
    stats.ingest_window(&BaselineKey::new(entity, BaselineMetric::AnomalyScore), &scores);

    let adaptive = stats.compute_adaptive_threshold(scope.clone());
    assert_eq!(adaptive.method, ThresholdMethod::Percentile);
    assert!(close(adaptive.value, 0.58));
    assert_eq!(adaptive.sample_count, 101);
    assert_ne!(adaptive.id, fallback.id);
    assert_eq!(stats.current_threshold(&scope).unwrap().id, adaptive.id);
}

#[test]
fn test_recompute_due_thresholds_respects_interval() {
    let stats = BaselineStats::default();
    stats.ingest_window(&BaselineKey::new(ip("10.0.0.2"), BaselineMetric::AnomalyScore), &[0.1; 40]);
    stats.ingest_window(&BaselineKey::new(ip("10.0.0.1"), BaselineMetric::AnomalyScore), &[0.2; 40]);
    stats.ingest_window(&BaselineKey::new(ip("10.0.0.3"), BaselineMetric::PayloadSize), &[1.0; 40]);

    let now = Utc::now();
    let first = stats.recompute_due_thresholds(now);
    let scopes: Vec<ThresholdScope> = first.iter().map(|t| t.scope.clone()).collect();
    assert_eq!(
        scopes,
        vec![
            ThresholdScope::Global,
            ThresholdScope::Entity(ip("10.0.0.1")),
            ThresholdScope::Entity(ip("10.0.0.2")),
        ]
    );

    assert!(stats.recompute_due_thresholds(now + Duration::seconds(10)).is_empty());
    let interval = stats.config().update_interval_seconds as i64;
    assert_eq!(stats.recompute_due_thresholds(now + Duration::seconds(interval)).len(), 3);
}

// ============================================================================
// Feedback
// ============================================================================

#[test]
fn test_false_positive_widens_gate_and_learns() {
    let stats = BaselineStats::default();
    let entity = ip("10.0.0.1");
    let key = BaselineKey::new(entity.clone(), BaselineMetric::PayloadSize);

    assert!(!stats.update(&key, Observation::scored(2_048.0, 0.52)).is_accepted());

    let feedback = FeedbackRecord::new(entity.clone(), FeedbackLabel::FalsePositive)
        .with_score(0.52)
        .with_correction(BaselineMetric::PayloadSize, 2_048.0);
    let gate = stats.apply_feedback(&feedback);
    assert!(close(gate, 0.55));

    // Correction and confirmed-normal score were learned
    assert_eq!(stats.summary(&key).unwrap().count, 1);
    let score_key = BaselineKey::new(entity.clone(), BaselineMetric::AnomalyScore);
    assert_eq!(stats.summary(&score_key).unwrap().count, 1);
    assert_eq!(
        stats.summary(&BaselineKey::global(BaselineMetric::AnomalyScore)).unwrap().count,
        1
    );

    // Same request is now below the entity's gate
    assert!(stats.update(&key, Observation::scored(2_048.0, 0.52)).is_accepted());
    // Other entities keep the default gate
    assert!(close(stats.learning_gate(&ip("10.0.0.2")), 0.5));
}

#[test]
fn test_gate_shift_is_bounded() {
    let stats = BaselineStats::default();
    let loose = ip("10.0.0.1");
    let strict = ip("10.0.0.2");

    for _ in 0..20 {
        stats.apply_feedback(&FeedbackRecord::new(loose.clone(), FeedbackLabel::FalsePositive));
        stats.apply_feedback(&FeedbackRecord::new(strict.clone(), FeedbackLabel::TruePositive));
    }
    assert!(close(stats.learning_gate(&loose), 0.8));
    assert!(close(stats.learning_gate(&strict), 0.2));

    let stats_after = stats.feedback_stats();
    assert_eq!(stats_after.total, 40);
    assert_eq!(stats_after.false_positives, 20);
    assert_eq!(stats_after.true_positives, 20);
}

#[test]
fn test_informative_feedback_only_counts() {
    let stats = BaselineStats::default();
    let entity = ip("10.0.0.1");

    let gate = stats.apply_feedback(
        &FeedbackRecord::new(entity.clone(), FeedbackLabel::Informative)
            .with_correction(BaselineMetric::PayloadSize, 10.0),
    );
    assert!(close(gate, 0.5));
    assert!(stats.is_empty());
    assert_eq!(stats.feedback_stats().informative, 1);
}

// ============================================================================
// Listing & persistence
// ============================================================================

#[test]
fn test_list_records_sorted() {
    let stats = BaselineStats::default();
    stats.ingest_window(&BaselineKey::new(ip("10.0.0.1"), BaselineMetric::PayloadSize), &[1.0; 5]);
    stats.ingest_window(&BaselineKey::new(ip("10.0.0.2"), BaselineMetric::PayloadSize), &[1.0; 50]);
    stats.ingest_window(&BaselineKey::global(BaselineMetric::AnomalyScore), &[0.2; 20]);

    let by_count = stats.list_records("count".parse().unwrap(), "desc".parse().unwrap());
    let counts: Vec<u64> = by_count.iter().map(|l| l.summary.count).collect();
    assert_eq!(counts, vec![50, 20, 5]);

    let by_entity = stats.list_records(BaselineSortKey::Entity, SortOrder::Ascending);
    assert_eq!(by_entity[0].key.entity, EntityKey::Global);
    assert!(by_entity[0].p95.is_some());

    assert!("owner".parse::<BaselineSortKey>().is_err());
}

#[test]
fn test_snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("baseline.json");

    let stats = BaselineStats::default();
    let key = BaselineKey::new(ip("10.0.0.1"), BaselineMetric::PayloadSize);
    stats.ingest_window(&key, &alternating(60, 400.0, 600.0));
    stats.apply_feedback(&FeedbackRecord::new(ip("10.0.0.1"), FeedbackLabel::TruePositive));
    let threshold = stats.compute_adaptive_threshold(ThresholdScope::Global);
    stats.save_snapshot(&path).unwrap();

    let restored = BaselineStats::default();
    assert_eq!(restored.load_snapshot(&path).unwrap(), 1);

    let record = restored.record(&key).unwrap();
    assert_eq!(record.count(), 60);
    assert!(close(record.mean(), 500.0));
    assert_eq!(record.samples().len(), 60);
    assert!(close(restored.learning_gate(&ip("10.0.0.1")), 0.45));
    assert_eq!(restored.current_threshold(&ThresholdScope::Global).unwrap().id, threshold.id);
    assert_eq!(restored.feedback_stats().true_positives, 1);
}

#[test]
fn test_snapshot_version_mismatch_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("baseline.json");

    let stats = BaselineStats::default();
    stats.ingest_window(&BaselineKey::global(BaselineMetric::ResponseTime), &[45.0; 10]);
    let mut snapshot = stats.snapshot();
    snapshot.format_version = SNAPSHOT_FORMAT_VERSION + 1;
    storage::save_snapshot(&snapshot, &path).unwrap();

    let fresh = BaselineStats::default();
    match fresh.load_snapshot(&path) {
        Err(BaselineError::SnapshotVersion { expected, actual }) => {
            assert_eq!(expected, SNAPSHOT_FORMAT_VERSION);
            assert_eq!(actual, SNAPSHOT_FORMAT_VERSION + 1);
        }
        other => panic!("expected SnapshotVersion error, got {:?}", other),
    }
    assert!(fresh.is_empty());
}

#[test]
fn test_missing_snapshot_is_collaborator_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = BaselineStats::default()
        .load_snapshot(&dir.path().join("absent.json"))
        .unwrap_err();
    assert_eq!(err.category(), crate::error::ErrorCategory::Collaborator);
}

#[test]
fn test_config_validation() {
    assert!(BaselineConfig::default().validate().is_ok());

    let bad_gate = BaselineConfig {
        learning_gate: 1.5,
        ..BaselineConfig::default()
    };
    assert!(bad_gate.validate().is_err());

    let bad_alpha = BaselineConfig {
        drift_test: DriftTestKind::KolmogorovSmirnov { alpha: 0.0 },
        ..BaselineConfig::default()
    };
    assert!(bad_alpha.validate().is_err());
}
