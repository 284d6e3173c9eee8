//! ONNX Reconstruction Adapter - Exported autoencoder via ONNX Runtime
//!
//! Compiled only with the `onnx` feature. The graph takes a `[1, n]` f32
//! tensor of normalized features and returns its reconstruction; the score
//! uses the same `min(mse / (threshold * 2), 1)` scaling as the reference
//! reconstructor.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;

use super::adapter::{check_dimension, ModelAdapter, ModelError, ModelKind};
use super::reconstruction::NormalizationParams;

pub struct OnnxReconstructionAdapter {
    session: Mutex<Session>,
    output_name: String,
    feature_names: Vec<String>,
    normalization: NormalizationParams,
    mse_threshold: f64,
    model_path: PathBuf,
    loaded_at: chrono::DateTime<chrono::Utc>,
}

impl OnnxReconstructionAdapter {
    pub fn load(
        model_path: &Path,
        feature_names: Vec<String>,
        normalization: NormalizationParams,
        mse_threshold: f64,
    ) -> Result<Self, ModelError> {
        log::info!("Loading ONNX model from: {}", model_path.display());

        if !model_path.exists() {
            return Err(ModelError::Artifact(format!("model not found: {}", model_path.display())));
        }
        if !(mse_threshold.is_finite() && mse_threshold > 0.0) {
            return Err(ModelError::Artifact(format!("invalid MSE threshold {}", mse_threshold)));
        }

        let session = Session::builder()
            .map_err(|e| ModelError::Artifact(format!("failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ModelError::Artifact(format!("failed to set optimization: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| ModelError::Artifact(format!("failed to load model: {}", e)))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ModelError::Artifact("no output defined".to_string()))?;

        log::info!("ONNX model loaded ({} features)", feature_names.len());

        Ok(Self {
            session: Mutex::new(session),
            output_name,
            feature_names,
            normalization,
            mse_threshold,
            model_path: model_path.to_path_buf(),
            loaded_at: chrono::Utc::now(),
        })
    }
}

impl ModelAdapter for OnnxReconstructionAdapter {
    fn kind(&self) -> ModelKind {
        ModelKind::Reconstruction
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn score(&self, features: &[f64]) -> Result<f64, ModelError> {
        check_dimension(self.feature_names.len(), features)?;

        let normalized: Vec<f32> = self
            .normalization
            .normalize(features)
            .into_iter()
            .map(|v| v as f32)
            .collect();
        let input_array = Array2::<f32>::from_shape_vec((1, normalized.len()), normalized.clone())
            .map_err(|e| ModelError::Inference(format!("array error: {}", e)))?;
        let input_tensor = Value::from_array(input_array)
            .map_err(|e| ModelError::Inference(format!("tensor error: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| ModelError::Inference(format!("inference failed: {}", e)))?;
        let output = outputs
            .get(&self.output_name)
            .ok_or_else(|| ModelError::Inference("no output".to_string()))?;
        let (_, reconstructed) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("extract error: {}", e)))?;

        let count = normalized.len().min(reconstructed.len());
        if count == 0 {
            return Err(ModelError::Inference("empty reconstruction".to_string()));
        }
        let mse = normalized
            .iter()
            .zip(reconstructed.iter())
            .map(|(x, y)| (*x as f64 - *y as f64).powi(2))
            .sum::<f64>()
            / count as f64;

        Ok((mse / (self.mse_threshold * 2.0)).clamp(0.0, 1.0))
    }

    fn model_info(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "onnx_autoencoder",
            "trained": true,
            "model_path": self.model_path.display().to_string(),
            "mse_threshold": self.mse_threshold,
            "feature_count": self.feature_names.len(),
            "inference_device": "ONNX Runtime (CPU)",
            "loaded_at": self.loaded_at,
        })
    }
}
