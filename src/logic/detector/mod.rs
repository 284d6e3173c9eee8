//! Detector Module - Ensemble anomaly detector
//!
//! Fuses an isolation-based and a reconstruction-based adapter into one
//! score, confidence and verdict.
//!
//! # Concurrency
//! Settings and the model pair are each held as `RwLock<Arc<..>>`. Mutators
//! build a new value and swap the `Arc`; `detect` clones both `Arc`s up front
//! and scores against that snapshot, so a hot-reload or a weight change never
//! shows up half-applied.

pub mod result;
pub mod settings;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use ndarray::Array2;
use parking_lot::RwLock;

use crate::logic::baseline::AdaptiveThreshold;
use crate::logic::features::FeatureVector;
use crate::logic::model::{ModelAdapter, ModelError, ModelKind, ModelSource};

pub use result::{DetectionResult, DetectorInfo};
pub use settings::{DetectorError, DetectorSettings};

// ============================================================================
// INPUT
// ============================================================================

/// Either a named vector (aligned per adapter) or a pre-aligned row
#[derive(Debug, Clone, Copy)]
pub enum DetectionInput<'a> {
    Vector(&'a FeatureVector),
    Aligned(&'a [f64]),
}

impl<'a> From<&'a FeatureVector> for DetectionInput<'a> {
    fn from(vector: &'a FeatureVector) -> Self {
        DetectionInput::Vector(vector)
    }
}

impl<'a> From<&'a [f64]> for DetectionInput<'a> {
    fn from(row: &'a [f64]) -> Self {
        DetectionInput::Aligned(row)
    }
}

impl<'a> From<&'a Vec<f64>> for DetectionInput<'a> {
    fn from(row: &'a Vec<f64>) -> Self {
        DetectionInput::Aligned(row.as_slice())
    }
}

// ============================================================================
// MODEL SLOTS
// ============================================================================

#[derive(Clone, Default)]
struct ModelSlots {
    isolation: Option<Arc<dyn ModelAdapter>>,
    reconstruction: Option<Arc<dyn ModelAdapter>>,
    version: Option<String>,
}

impl ModelSlots {
    /// Both adapters, present and trained
    fn ready(&self) -> Result<(&Arc<dyn ModelAdapter>, &Arc<dyn ModelAdapter>), DetectorError> {
        let isolation = self
            .isolation
            .as_ref()
            .ok_or(DetectorError::NotInitialized(ModelKind::Isolation))?;
        let reconstruction = self
            .reconstruction
            .as_ref()
            .ok_or(DetectorError::NotInitialized(ModelKind::Reconstruction))?;

        if !isolation.is_trained() {
            return Err(DetectorError::NotTrained(ModelKind::Isolation));
        }
        if !reconstruction.is_trained() {
            return Err(DetectorError::NotTrained(ModelKind::Reconstruction));
        }
        Ok((isolation, reconstruction))
    }

    /// Two trained adapters must agree on their feature schema
    fn check_schema(&self) -> Result<(), DetectorError> {
        if let (Some(isolation), Some(reconstruction)) = (&self.isolation, &self.reconstruction) {
            if isolation.is_trained()
                && reconstruction.is_trained()
                && isolation.feature_names() != reconstruction.feature_names()
            {
                return Err(DetectorError::FeatureSchema(format!(
                    "isolation model expects {} features, reconstruction model expects {} (or a different order)",
                    isolation.feature_names().len(),
                    reconstruction.feature_names().len()
                )));
            }
        }
        Ok(())
    }
}

fn check_kind(adapter: &Arc<dyn ModelAdapter>, expected: ModelKind) -> Result<(), DetectorError> {
    if adapter.kind() != expected {
        return Err(DetectorError::Configuration(format!(
            "{} adapter installed in the {} slot",
            adapter.kind(),
            expected
        )));
    }
    Ok(())
}

fn checked_score(adapter: &Arc<dyn ModelAdapter>, row: &[f64]) -> Result<f64, DetectorError> {
    let score = adapter.score(row)?;
    if !score.is_finite() {
        return Err(ModelError::Inference(format!("{} returned a non-finite score", adapter.kind())).into());
    }
    Ok(score.clamp(0.0, 1.0))
}

// ============================================================================
// ANOMALY DETECTOR
// ============================================================================

pub struct AnomalyDetector {
    settings: RwLock<Arc<DetectorSettings>>,
    models: RwLock<Arc<ModelSlots>>,
}

impl AnomalyDetector {
    /// Detector without models; weights and threshold are validated
    pub fn new(if_weight: f64, ae_weight: f64, anomaly_threshold: f64) -> Result<Self, DetectorError> {
        Ok(Self::with_settings(DetectorSettings::new(if_weight, ae_weight, anomaly_threshold)?))
    }

    pub fn with_settings(settings: DetectorSettings) -> Self {
        Self {
            settings: RwLock::new(Arc::new(settings)),
            models: RwLock::new(Arc::new(ModelSlots::default())),
        }
    }

    // ------------------------------------------------------------------------
    // Model management
    // ------------------------------------------------------------------------

    /// Swap in a new adapter pair atomically
    pub fn install_models(
        &self,
        isolation: Arc<dyn ModelAdapter>,
        reconstruction: Arc<dyn ModelAdapter>,
        version: impl Into<String>,
    ) -> Result<(), DetectorError> {
        check_kind(&isolation, ModelKind::Isolation)?;
        check_kind(&reconstruction, ModelKind::Reconstruction)?;

        let slots = ModelSlots {
            isolation: Some(isolation),
            reconstruction: Some(reconstruction),
            version: Some(version.into()),
        };
        slots.check_schema()?;

        log::info!("Installed model pair (version {})", slots.version.as_deref().unwrap_or("-"));
        *self.models.write() = Arc::new(slots);
        Ok(())
    }

    /// Replace one ensemble member, keeping the other
    pub fn install_adapter(&self, adapter: Arc<dyn ModelAdapter>) -> Result<(), DetectorError> {
        let mut guard = self.models.write();
        let mut slots = ModelSlots::clone(&guard);
        match adapter.kind() {
            ModelKind::Isolation => slots.isolation = Some(adapter),
            ModelKind::Reconstruction => slots.reconstruction = Some(adapter),
        }
        slots.version = None;
        slots.check_schema()?;
        *guard = Arc::new(slots);
        Ok(())
    }

    /// Load a pair from a model source and install it; returns the version
    pub fn reload_from(&self, source: &dyn ModelSource) -> Result<String, DetectorError> {
        let pair = source.load()?;
        let version = pair.version.clone();
        self.install_models(pair.isolation, pair.reconstruction, pair.version)?;
        Ok(version)
    }

    pub fn model_version(&self) -> Option<String> {
        self.models.read().version.clone()
    }

    /// Feature order expected by the installed isolation adapter
    pub fn feature_names(&self) -> Option<Vec<String>> {
        let models = Arc::clone(&self.models.read());
        models
            .isolation
            .as_ref()
            .or(models.reconstruction.as_ref())
            .map(|a| a.feature_names().to_vec())
    }

    // ------------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------------

    pub fn settings(&self) -> DetectorSettings {
        **self.settings.read()
    }

    pub fn if_weight(&self) -> f64 {
        self.settings().if_weight()
    }

    pub fn ae_weight(&self) -> f64 {
        self.settings().ae_weight()
    }

    pub fn anomaly_threshold(&self) -> f64 {
        self.settings().anomaly_threshold()
    }

    pub fn set_weights(&self, if_weight: f64, ae_weight: f64) -> Result<(), DetectorError> {
        let mut guard = self.settings.write();
        let updated = guard.with_weights(if_weight, ae_weight)?;
        *guard = Arc::new(updated);
        log::info!("Ensemble weights set to if={} ae={}", if_weight, ae_weight);
        Ok(())
    }

    pub fn set_threshold(&self, threshold: f64) -> Result<(), DetectorError> {
        let mut guard = self.settings.write();
        let updated = guard.with_threshold(threshold)?;
        *guard = Arc::new(updated);
        log::info!("Anomaly threshold set to {}", threshold);
        Ok(())
    }

    /// Adopt a recomputed threshold from the baseline engine
    pub fn apply_adaptive_threshold(&self, threshold: &AdaptiveThreshold) -> Result<(), DetectorError> {
        self.set_threshold(threshold.value)?;
        log::debug!(
            "Adaptive threshold {} applied ({:?}, baseline v{}, id {})",
            threshold.value,
            threshold.method,
            threshold.baseline_version,
            threshold.id
        );
        Ok(())
    }

    /// Weighted fusion with the current weights
    pub fn combine_scores(&self, if_score: f64, ae_score: f64) -> f64 {
        self.settings().combine_scores(if_score, ae_score)
    }

    // ------------------------------------------------------------------------
    // Detection
    // ------------------------------------------------------------------------

    pub fn detect<'a>(&self, input: impl Into<DetectionInput<'a>>) -> Result<DetectionResult, DetectorError> {
        let models = Arc::clone(&self.models.read());
        let settings = self.settings();
        let (isolation, reconstruction) = models.ready()?;

        let (if_score, ae_score) = match input.into() {
            DetectionInput::Vector(vector) => (
                checked_score(isolation, &vector.to_array(isolation.feature_names()))?,
                checked_score(reconstruction, &vector.to_array(reconstruction.feature_names()))?,
            ),
            DetectionInput::Aligned(row) => {
                let expected = isolation.feature_names().len();
                if row.len() != expected {
                    return Err(DetectorError::FeatureSchema(format!(
                        "aligned input has {} values, models expect {}",
                        row.len(),
                        expected
                    )));
                }
                (checked_score(isolation, row)?, checked_score(reconstruction, row)?)
            }
        };

        let result = settings.evaluate(if_score, ae_score);
        log::trace!(
            "Detection: score={:.4} if={:.4} ae={:.4} anomaly={}",
            result.anomaly_score,
            if_score,
            ae_score,
            result.is_anomaly
        );
        Ok(result)
    }

    /// Score every row of an aligned matrix against one state snapshot
    pub fn detect_batch(&self, rows: &Array2<f64>) -> Result<Vec<DetectionResult>, DetectorError> {
        let models = Arc::clone(&self.models.read());
        let settings = self.settings();
        let (isolation, reconstruction) = models.ready()?;

        let expected = isolation.feature_names().len();
        if rows.ncols() != expected {
            return Err(DetectorError::FeatureSchema(format!(
                "batch has {} columns, models expect {}",
                rows.ncols(),
                expected
            )));
        }

        rows.outer_iter()
            .map(|row| {
                let row = row.to_vec();
                let if_score = checked_score(isolation, &row)?;
                let ae_score = checked_score(reconstruction, &row)?;
                Ok(settings.evaluate(if_score, ae_score))
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn get_detector_info(&self) -> DetectorInfo {
        let models = Arc::clone(&self.models.read());
        let settings = self.settings();

        DetectorInfo {
            if_initialized: models.isolation.is_some(),
            if_trained: models.isolation.as_ref().map(|a| a.is_trained()).unwrap_or(false),
            ae_initialized: models.reconstruction.is_some(),
            ae_trained: models.reconstruction.as_ref().map(|a| a.is_trained()).unwrap_or(false),
            if_weight: settings.if_weight(),
            ae_weight: settings.ae_weight(),
            anomaly_threshold: settings.anomaly_threshold(),
            if_model_info: models.isolation.as_ref().map(|a| a.model_info()),
            ae_model_info: models.reconstruction.as_ref().map(|a| a.model_info()),
            model_version: models.version.clone(),
        }
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::with_settings(DetectorSettings::default())
    }
}
