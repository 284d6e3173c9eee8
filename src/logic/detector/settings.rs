//! Detector Settings - Validated ensemble weights and operating threshold
//!
//! Settings are a small `Copy` value. The detector publishes a new `Arc` on
//! every accepted mutation, so `detect` always reads one consistent tuple.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    AGREEMENT_CONFIDENCE_BOOST, DEFAULT_AE_WEIGHT, DEFAULT_DETECTOR_THRESHOLD, DEFAULT_IF_WEIGHT,
    WEIGHT_SUM_TOLERANCE,
};
use crate::error::ErrorCategory;
use crate::logic::model::{ModelError, ModelKind};

use super::result::DetectionResult;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("invalid detector configuration: {0}")]
    Configuration(String),

    #[error("models not available: {0} model not initialized")]
    NotInitialized(ModelKind),

    #[error("models not available: {0} model not trained")]
    NotTrained(ModelKind),

    #[error("feature schema mismatch: {0}")]
    FeatureSchema(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl DetectorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DetectorError::Configuration(_) | DetectorError::FeatureSchema(_) => ErrorCategory::Configuration,
            DetectorError::NotInitialized(_) | DetectorError::NotTrained(_) => ErrorCategory::NotReady,
            DetectorError::Model(e) => e.category(),
        }
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorSettings {
    if_weight: f64,
    ae_weight: f64,
    anomaly_threshold: f64,
}

impl DetectorSettings {
    /// Validated settings; weights in [0, 1] summing to 1.0, threshold in [0, 1]
    pub fn new(if_weight: f64, ae_weight: f64, anomaly_threshold: f64) -> Result<Self, DetectorError> {
        validate_weights(if_weight, ae_weight)?;
        validate_threshold(anomaly_threshold)?;
        Ok(Self {
            if_weight,
            ae_weight,
            anomaly_threshold,
        })
    }

    pub fn if_weight(&self) -> f64 {
        self.if_weight
    }

    pub fn ae_weight(&self) -> f64 {
        self.ae_weight
    }

    pub fn anomaly_threshold(&self) -> f64 {
        self.anomaly_threshold
    }

    pub fn with_weights(self, if_weight: f64, ae_weight: f64) -> Result<Self, DetectorError> {
        Self::new(if_weight, ae_weight, self.anomaly_threshold)
    }

    pub fn with_threshold(self, anomaly_threshold: f64) -> Result<Self, DetectorError> {
        Self::new(self.if_weight, self.ae_weight, anomaly_threshold)
    }

    /// Weighted fusion clamped to [0, 1]
    pub fn combine_scores(&self, if_score: f64, ae_score: f64) -> f64 {
        (self.if_weight * if_score + self.ae_weight * ae_score).clamp(0.0, 1.0)
    }

    /// Verdict for two component scores
    ///
    /// Confidence starts at `1 - |if - ae|`; when both models fall on the same
    /// side of the threshold it closes half of the remaining gap to 1.0.
    pub fn evaluate(&self, if_score: f64, ae_score: f64) -> DetectionResult {
        let if_score = if_score.clamp(0.0, 1.0);
        let ae_score = ae_score.clamp(0.0, 1.0);
        let threshold = self.anomaly_threshold;

        let anomaly_score = self.combine_scores(if_score, ae_score);
        let model_agreement = (if_score >= threshold) == (ae_score >= threshold);

        let base = (1.0 - (if_score - ae_score).abs()).clamp(0.0, 1.0);
        let confidence = if model_agreement {
            (base + (1.0 - base) * AGREEMENT_CONFIDENCE_BOOST).clamp(0.0, 1.0)
        } else {
            base
        };

        DetectionResult {
            is_anomaly: anomaly_score >= threshold,
            anomaly_score,
            isolation_forest_score: if_score,
            autoencoder_score: ae_score,
            confidence,
            model_agreement,
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            if_weight: DEFAULT_IF_WEIGHT,
            ae_weight: DEFAULT_AE_WEIGHT,
            anomaly_threshold: DEFAULT_DETECTOR_THRESHOLD,
        }
    }
}

fn validate_weights(if_weight: f64, ae_weight: f64) -> Result<(), DetectorError> {
    for (name, weight) in [("if_weight", if_weight), ("ae_weight", ae_weight)] {
        if !(0.0..=1.0).contains(&weight) {
            return Err(DetectorError::Configuration(format!(
                "{} must be in [0, 1] range, got {}",
                name, weight
            )));
        }
    }

    let sum = if_weight + ae_weight;
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(DetectorError::Configuration(format!(
            "weights must sum to 1.0, got {}",
            sum
        )));
    }
    Ok(())
}

fn validate_threshold(threshold: f64) -> Result<(), DetectorError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(DetectorError::Configuration(format!(
            "threshold must be in [0, 1] range, got {}",
            threshold
        )));
    }
    Ok(())
}
