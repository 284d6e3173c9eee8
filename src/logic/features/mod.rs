//! Features Module - Feature Extraction Engine
//!
//! Turns raw traffic records into fixed-layout feature vectors.
//! Expensive per-IP aggregates go through the cache or the batch optimizer.

pub mod cache;
pub mod extractor;
pub mod history;
pub mod layout;
pub mod optimizer;
pub mod patterns;
pub mod record;
pub mod vector;


use thiserror::Error;

// Re-export common types
pub use cache::{CacheKey, CacheStats, FeatureCache, FeatureFamily};
pub use extractor::{ExtractorConfig, FeatureExtractor};
pub use history::{HistoryAccessor, HistoryError, HistoryWindow, InMemoryHistory, NoHistory};
pub use layout::{feature_index, layout_hash, layout_names, FEATURE_COUNT, FEATURE_LAYOUT, FEATURE_VERSION};
pub use optimizer::{FeatureOptimizer, RateFeatures, RateHistory};
pub use record::{EntityKey, RecordIdentity, TrafficRecord};
pub use vector::{FeatureVector, FeatureVectorBuilder};

/// Extraction failure; malformed records never produce one
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error(transparent)]
    History(#[from] HistoryError),
}
