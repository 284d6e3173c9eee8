//! Model Adapter - Capability the ensemble depends on
//!
//! The detector never sees a concrete model type. Anything that can report a
//! trained state, its expected feature order and a score in [0, 1] can be
//! installed, including stubs in tests.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorCategory;

// ============================================================================
// MODEL KIND
// ============================================================================

/// Role of an adapter inside the ensemble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Density / isolation based model
    Isolation,
    /// Reconstruction-error based model
    Reconstruction,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Isolation => write!(f, "isolation forest"),
            ModelKind::Reconstruction => write!(f, "autoencoder"),
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{0} model not trained")]
    NotTrained(ModelKind),

    #[error("feature dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("training failed: {0}")]
    Training(String),

    #[error("invalid model artifact: {0}")]
    Artifact(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("model I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("model serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ModelError::NotTrained(_) => ErrorCategory::NotReady,
            ModelError::DimensionMismatch { .. } => ErrorCategory::Configuration,
            ModelError::Training(_) => ErrorCategory::DataQuality,
            ModelError::Artifact(_)
            | ModelError::Inference(_)
            | ModelError::Io(_)
            | ModelError::Serialization(_) => ErrorCategory::Collaborator,
        }
    }
}

// ============================================================================
// ADAPTER TRAIT
// ============================================================================

/// Trained anomaly model as seen by the ensemble
///
/// Implementations are immutable once trained; the detector swaps whole
/// adapters instead of mutating them.
pub trait ModelAdapter: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn is_trained(&self) -> bool;

    /// Expected feature order of `score` input
    fn feature_names(&self) -> &[String];

    /// Anomaly score in [0, 1] for features aligned to `feature_names`
    fn score(&self, features: &[f64]) -> Result<f64, ModelError>;

    /// Self-reported description for health endpoints
    fn model_info(&self) -> serde_json::Value;
}

/// Reject inputs whose length differs from the adapter's schema
pub fn check_dimension(expected: usize, features: &[f64]) -> Result<(), ModelError> {
    if features.len() != expected {
        return Err(ModelError::DimensionMismatch {
            expected,
            actual: features.len(),
        });
    }
    Ok(())
}
