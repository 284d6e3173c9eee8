//! TRIDENT Core - Adaptive Anomaly Scoring
//!
//! Scores HTTP traffic records for anomalousness so a WAF rule recommender
//! can act on them.
//!
//! ## Architecture
//! - `logic/features/` - Record → `FeatureVector` (cache, batch optimizer)
//! - `logic/model/` - Model adapter contract + reference adapters, model sources
//! - `logic/detector/` - Ensemble fusion of the two model scores
//! - `logic/baseline/` - Per-entity baselines, drift, adaptive thresholds
//! - `logic/pipeline.rs` - Glue: extract → detect → alert / learn

pub mod constants;
pub mod error;
pub mod logic;

pub use error::{Error, ErrorCategory, Result};

pub use logic::baseline::{
    AdaptiveThreshold, BaselineConfig, BaselineKey, BaselineMetric, BaselineStats,
    DriftAssessment, DriftResponse, FeedbackLabel, FeedbackRecord, Observation, ThresholdScope,
};
pub use logic::config::CoreConfig;
pub use logic::detector::{AnomalyDetector, DetectionInput, DetectionResult, DetectorSettings};
pub use logic::features::{
    EntityKey, FeatureCache, FeatureExtractor, FeatureFamily, FeatureOptimizer, FeatureVector,
    HistoryAccessor, InMemoryHistory, TrafficRecord,
};
pub use logic::model::{ModelAdapter, ModelKind, ModelSource};
pub use logic::pipeline::{AlertEmitter, AnomalyAlert, CollectingEmitter, LogEmitter, ScoringPipeline};
