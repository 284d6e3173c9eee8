//! Error handling
//!
//! Each module owns its error enum; this crate-level `Error` wraps them so the
//! service layer can map failures to a category without matching every variant.

use thiserror::Error;

use crate::logic::baseline::BaselineError;
use crate::logic::config::ConfigError;
use crate::logic::detector::DetectorError;
use crate::logic::features::FeatureError;
use crate::logic::model::ModelError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("feature extraction failed: {0}")]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Baseline(#[from] BaselineError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Coarse failure class reported to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid weights/threshold/schema. Fix the configuration.
    Configuration,
    /// Models absent or untrained. Retry later.
    NotReady,
    /// Noisy input that could not be defaulted.
    DataQuality,
    /// History store, model source or filesystem failed.
    Collaborator,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Detector(e) => e.category(),
            Error::Model(e) => e.category(),
            Error::Feature(_) => ErrorCategory::Collaborator,
            Error::Baseline(e) => e.category(),
            Error::Config(_) => ErrorCategory::Configuration,
        }
    }
}
