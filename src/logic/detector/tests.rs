use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use ndarray::Array2;

use super::*;
use crate::logic::baseline::{AdaptiveThreshold, ThresholdMethod, ThresholdScope};
use crate::logic::features::FeatureVector;
use crate::logic::model::{
    IsolationForestAdapter, IsolationForestConfig, MeanReconstructor, ModelPair, StaticModelSource,
};

// ============================================================================
// FIXTURES
// ============================================================================

const NAMES: [&str; 7] = [
    "requests_per_ip",
    "payload_size",
    "response_time",
    "status_code",
    "is_status_200",
    "hour",
    "url_length",
];

fn names() -> Vec<String> {
    NAMES.iter().map(|s| s.to_string()).collect()
}

fn normal_vector(i: usize) -> FeatureVector {
    FeatureVector::from_pairs([
        ("requests_per_ip", (10 + i % 5) as f64),
        ("payload_size", (100 + i * 2) as f64),
        ("response_time", (50 + i % 10) as f64),
        ("status_code", 200.0),
        ("is_status_200", 1.0),
        ("hour", (i % 24) as f64),
        ("url_length", (30 + i % 10) as f64),
    ])
}

fn anomaly_vector(i: usize) -> FeatureVector {
    FeatureVector::from_pairs([
        ("requests_per_ip", (1000 + i * 100) as f64),
        ("payload_size", (10_000 + i * 1000) as f64),
        ("response_time", (5000 + i * 500) as f64),
        ("status_code", 500.0),
        ("is_status_200", 0.0),
        ("hour", (i % 24) as f64),
        ("url_length", (500 + i * 50) as f64),
    ])
}

fn training_matrix() -> Array2<f64> {
    let order = names();
    let rows: Vec<f64> = (0..50).flat_map(|i| normal_vector(i).to_array(&order)).collect();
    Array2::from_shape_vec((50, NAMES.len()), rows).unwrap()
}

fn trained_detector() -> AnomalyDetector {
    let data = training_matrix();
    let isolation = IsolationForestAdapter::fit(names(), data.view(), IsolationForestConfig::default()).unwrap();
    let reconstruction = MeanReconstructor::fit(names(), data.view()).unwrap();

    let detector = AnomalyDetector::default();
    detector
        .install_models(Arc::new(isolation), Arc::new(reconstruction), "test")
        .unwrap();
    detector
}

/// Adapter returning a fixed score
struct FixedAdapter {
    kind: ModelKind,
    score: f64,
    trained: bool,
    names: Vec<String>,
}

impl FixedAdapter {
    fn new(kind: ModelKind, score: f64) -> Arc<dyn ModelAdapter> {
        Arc::new(Self {
            kind,
            score,
            trained: true,
            names: names(),
        })
    }
}

impl ModelAdapter for FixedAdapter {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn feature_names(&self) -> &[String] {
        &self.names
    }

    fn score(&self, _: &[f64]) -> Result<f64, ModelError> {
        Ok(self.score)
    }

    fn model_info(&self) -> serde_json::Value {
        serde_json::json!({ "type": "fixed", "score": self.score })
    }
}

// ============================================================================
// CONSTRUCTION & SETTINGS
// ============================================================================

#[test]
fn test_init_defaults() {
    let detector = AnomalyDetector::default();
    let info = detector.get_detector_info();

    assert!(!info.if_initialized);
    assert!(!info.ae_initialized);
    assert_eq!(detector.if_weight(), 0.5);
    assert_eq!(detector.ae_weight(), 0.5);
    assert_eq!(detector.anomaly_threshold(), 0.5);
}

#[test]
fn test_init_custom_and_invalid() {
    let detector = AnomalyDetector::new(0.7, 0.3, 0.6).unwrap();
    assert_eq!(detector.if_weight(), 0.7);
    assert_eq!(detector.anomaly_threshold(), 0.6);

    let err = AnomalyDetector::new(0.6, 0.5, 0.5).err().unwrap();
    assert!(err.to_string().contains("weights must sum to 1.0"));
    let err = AnomalyDetector::new(1.5, -0.5, 0.5).err().unwrap();
    assert!(err.to_string().contains("must be in [0, 1] range"));
    let err = AnomalyDetector::new(0.5, 0.5, 1.5).err().unwrap();
    assert!(err.to_string().contains("threshold must be in [0, 1] range"));
}

#[test]
fn test_setters_validate_and_keep_state_on_error() {
    let detector = trained_detector();

    detector.set_weights(0.8, 0.2).unwrap();
    assert_eq!((detector.if_weight(), detector.ae_weight()), (0.8, 0.2));

    assert!(detector.set_weights(0.6, 0.5).is_err());
    assert!(detector.set_weights(1.5, -0.5).is_err());
    assert_eq!((detector.if_weight(), detector.ae_weight()), (0.8, 0.2));

    detector.set_threshold(0.7).unwrap();
    assert_eq!(detector.anomaly_threshold(), 0.7);
    let err = detector.set_threshold(1.5).unwrap_err();
    assert_eq!(err.category(), crate::ErrorCategory::Configuration);
    assert_eq!(detector.anomaly_threshold(), 0.7);
}

#[test]
fn test_combine_scores_uses_current_weights() {
    let detector = AnomalyDetector::default();
    assert!((detector.combine_scores(0.3, 0.7) - 0.5).abs() < 1e-6);

    detector.set_weights(0.7, 0.3).unwrap();
    assert!((detector.combine_scores(0.5, 0.5) - 0.5).abs() < 1e-6);
    assert_eq!(detector.combine_scores(0.0, 0.0), 0.0);
    assert_eq!(detector.combine_scores(1.0, 1.0), 1.0);
}

// ============================================================================
// READINESS
// ============================================================================

#[test]
fn test_detect_without_models() {
    let detector = AnomalyDetector::default();
    let features = FeatureVector::from_pairs([("feature1", 1.0), ("feature2", 2.0)]);

    let err = detector.detect(&features).unwrap_err();
    assert!(matches!(err, DetectorError::NotInitialized(ModelKind::Isolation)));
    assert!(err.to_string().contains("not initialized"));

    detector.install_adapter(FixedAdapter::new(ModelKind::Isolation, 0.1)).unwrap();
    let err = detector.detect(&features).unwrap_err();
    assert!(matches!(err, DetectorError::NotInitialized(ModelKind::Reconstruction)));
}

#[test]
fn test_detect_with_untrained_models() {
    let detector = AnomalyDetector::default();
    detector
        .install_models(
            Arc::new(IsolationForestAdapter::untrained(names())),
            Arc::new(MeanReconstructor::untrained(names())),
            "untrained",
        )
        .unwrap();

    let err = detector.detect(&normal_vector(0)).unwrap_err();
    assert!(err.to_string().contains("not trained"));
    assert_eq!(err.category(), crate::ErrorCategory::NotReady);

    let info = detector.get_detector_info();
    assert!(info.if_initialized && !info.if_trained);
}

#[test]
fn test_schema_mismatch_rejected() {
    let data = training_matrix();
    let isolation = IsolationForestAdapter::fit(names(), data.view(), IsolationForestConfig::default()).unwrap();
    let mut reversed = names();
    reversed.reverse();
    let reconstruction = MeanReconstructor::fit(reversed, data.view()).unwrap();

    let detector = AnomalyDetector::default();
    let err = detector
        .install_models(Arc::new(isolation), Arc::new(reconstruction), "bad")
        .unwrap_err();
    assert!(matches!(err, DetectorError::FeatureSchema(_)));
    assert!(!detector.get_detector_info().if_initialized);
}

#[test]
fn test_wrong_slot_rejected() {
    let detector = AnomalyDetector::default();
    let err = detector
        .install_models(
            FixedAdapter::new(ModelKind::Reconstruction, 0.1),
            FixedAdapter::new(ModelKind::Reconstruction, 0.1),
            "v",
        )
        .unwrap_err();
    assert!(matches!(err, DetectorError::Configuration(_)));
}

// ============================================================================
// DETECTION
// ============================================================================

#[test]
fn test_detect_normal_traffic_in_range() {
    let detector = trained_detector();
    let result = detector.detect(&normal_vector(0)).unwrap();

    for value in [
        result.anomaly_score,
        result.isolation_forest_score,
        result.autoencoder_score,
        result.confidence,
    ] {
        assert!((0.0..=1.0).contains(&value), "{} out of range", value);
    }
}

#[test]
fn test_detect_anomaly_traffic() {
    let detector = trained_detector();
    let result = detector.detect(&anomaly_vector(0)).unwrap();

    assert!(result.is_anomaly, "anomaly scored {:?}", result);
    assert!((0.0..=1.0).contains(&result.confidence));
}

#[test]
fn test_anomalies_score_higher_on_average() {
    let detector = trained_detector();

    let normal: f64 = (0..10)
        .map(|i| detector.detect(&normal_vector(i)).unwrap().anomaly_score)
        .sum::<f64>()
        / 10.0;
    let anomalous: f64 = (0..5)
        .map(|i| detector.detect(&anomaly_vector(i)).unwrap().anomaly_score)
        .sum::<f64>()
        / 5.0;

    assert!(anomalous >= normal - 0.2, "anomalous {} vs normal {}", anomalous, normal);
}

#[test]
fn test_aligned_input_matches_vector_input() {
    let detector = trained_detector();
    let vector = normal_vector(3);
    let aligned = vector.to_array(&names());

    let from_vector = detector.detect(&vector).unwrap();
    let from_slice = detector.detect(aligned.as_slice()).unwrap();
    assert_eq!(from_vector, from_slice);

    let short = vec![1.0, 2.0];
    assert!(matches!(detector.detect(&short), Err(DetectorError::FeatureSchema(_))));
}

#[test]
fn test_missing_features_imputed() {
    let detector = trained_detector();
    let partial = FeatureVector::from_pairs([("payload_size", 120.0), ("unrelated", 9.0)]);
    let result = detector.detect(&partial).unwrap();
    assert!((0.0..=1.0).contains(&result.anomaly_score));
}

#[test]
fn test_detect_batch_matches_single() {
    let detector = trained_detector();
    let order = names();
    let vectors: Vec<FeatureVector> = (0..4).map(normal_vector).chain((0..2).map(anomaly_vector)).collect();
    let flat: Vec<f64> = vectors.iter().flat_map(|v| v.to_array(&order)).collect();
    let matrix = Array2::from_shape_vec((vectors.len(), order.len()), flat).unwrap();

    let batch = detector.detect_batch(&matrix).unwrap();
    assert_eq!(batch.len(), vectors.len());
    for (vector, result) in vectors.iter().zip(&batch) {
        assert_eq!(detector.detect(vector).unwrap(), *result);
    }

    let narrow = Array2::<f64>::zeros((2, 3));
    assert!(matches!(detector.detect_batch(&narrow), Err(DetectorError::FeatureSchema(_))));
}

#[test]
fn test_agreement_and_confidence() {
    let detector = AnomalyDetector::default();
    detector
        .install_models(
            FixedAdapter::new(ModelKind::Isolation, 0.95),
            FixedAdapter::new(ModelKind::Reconstruction, 0.15),
            "split",
        )
        .unwrap();

    let result = detector.detect(&normal_vector(0)).unwrap();
    assert!(!result.model_agreement);
    assert!((result.confidence - 0.2).abs() < 1e-9);
    assert!(result.is_anomaly);
}

#[test]
fn test_non_finite_adapter_score_rejected() {
    let detector = AnomalyDetector::default();
    detector
        .install_models(
            FixedAdapter::new(ModelKind::Isolation, f64::NAN),
            FixedAdapter::new(ModelKind::Reconstruction, 0.1),
            "nan",
        )
        .unwrap();

    let err = detector.detect(&normal_vector(0)).unwrap_err();
    assert!(matches!(err, DetectorError::Model(ModelError::Inference(_))));
}

// ============================================================================
// ADMIN & HOT RELOAD
// ============================================================================

#[test]
fn test_get_detector_info() {
    let detector = trained_detector();
    let info = detector.get_detector_info();

    assert!(info.if_initialized && info.if_trained);
    assert!(info.ae_initialized && info.ae_trained);
    assert_eq!(info.if_weight, 0.5);
    assert_eq!(info.model_version.as_deref(), Some("test"));
    assert_eq!(info.if_model_info.as_ref().unwrap()["type"], "isolation_forest");

    let map = info.to_map();
    for key in [
        "if_initialized",
        "if_trained",
        "ae_initialized",
        "ae_trained",
        "if_weight",
        "ae_weight",
        "anomaly_threshold",
        "if_model_info",
        "ae_model_info",
    ] {
        assert!(map.contains_key(key), "missing {}", key);
    }
}

#[test]
fn test_reload_from_source() {
    let detector = AnomalyDetector::default();
    let source = StaticModelSource::new(ModelPair::new(
        FixedAdapter::new(ModelKind::Isolation, 0.2),
        FixedAdapter::new(ModelKind::Reconstruction, 0.4),
        "v7",
    ));

    assert_eq!(detector.reload_from(&source).unwrap(), "v7");
    assert_eq!(detector.model_version().as_deref(), Some("v7"));
    assert!((detector.detect(&normal_vector(0)).unwrap().anomaly_score - 0.3).abs() < 1e-9);
}

#[test]
fn test_apply_adaptive_threshold() {
    let detector = AnomalyDetector::default();
    let threshold = AdaptiveThreshold::fixed(0.65, ThresholdScope::Global, ThresholdMethod::StaticFallback);
    detector.apply_adaptive_threshold(&threshold).unwrap();
    assert_eq!(detector.anomaly_threshold(), 0.65);
}

/// Readers never observe scores from two different model pairs
#[test]
fn test_hot_swap_is_atomic() {
    let detector = AnomalyDetector::default();
    let low = (FixedAdapter::new(ModelKind::Isolation, 0.2), FixedAdapter::new(ModelKind::Reconstruction, 0.2));
    let high = (FixedAdapter::new(ModelKind::Isolation, 0.9), FixedAdapter::new(ModelKind::Reconstruction, 0.9));
    detector.install_models(low.0.clone(), low.1.clone(), "low").unwrap();

    let done = AtomicBool::new(false);
    let vector = normal_vector(0);

    thread::scope(|s| {
        s.spawn(|| {
            for i in 0..200 {
                let (isolation, reconstruction) = if i % 2 == 0 { &high } else { &low };
                detector
                    .install_models(isolation.clone(), reconstruction.clone(), format!("v{}", i))
                    .unwrap();
                detector.set_weights(if i % 2 == 0 { 0.8 } else { 0.5 }, if i % 2 == 0 { 0.2 } else { 0.5 }).unwrap();
            }
            done.store(true, Ordering::SeqCst);
        });

        for _ in 0..4 {
            s.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    let result = detector.detect(&vector).unwrap();
                    assert_eq!(result.isolation_forest_score, result.autoencoder_score);
                    assert!((0.0..=1.0).contains(&result.anomaly_score));
                }
            });
        }
    });
}
