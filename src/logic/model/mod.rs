//! Model Module - Anomaly model adapters
//!
//! The ensemble only depends on the `ModelAdapter` capability.
//! Reference adapters and model sources live here so models can be swapped.

pub mod adapter;
pub mod isolation;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod reconstruction;
pub mod source;

// Re-export common types
pub use adapter::{ModelAdapter, ModelError, ModelKind};
pub use isolation::{IsolationForestAdapter, IsolationForestConfig};
#[cfg(feature = "onnx")]
pub use onnx::OnnxReconstructionAdapter;
pub use reconstruction::{MeanReconstructor, NormalizationParams};
pub use source::{FileModelSource, ModelPair, ModelSource, StaticModelSource};
