//! Logic Module - Scoring Engines
//!
//! ## Layout
//! - `features/` - Feature extraction (intrinsic, rate, baseline deviation)
//! - `model/` - Model adapters and model sources
//! - `detector/` - Ensemble detector
//! - `baseline/` - Baselines, drift, adaptive thresholds, feedback
//! - `pipeline` - End-to-end scoring glue

pub mod config;
pub mod features;
pub mod model;
pub mod detector;
pub mod baseline;
pub mod pipeline;
