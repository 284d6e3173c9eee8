//! Mean Reconstructor - Reference reconstruction-based adapter
//!
//! Features are min/max normalized against the training range and
//! "reconstructed" as the training centroid. Reconstruction MSE is scaled by
//! the 95th percentile MSE seen in training:
//!   score = min(mse / (threshold * 2), 1)
//! so a typical training row lands near 0.5 or below.

use chrono::{DateTime, Utc};
use ndarray::{Array1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::adapter::{check_dimension, ModelAdapter, ModelError, ModelKind};

/// Smallest MSE threshold kept after training
const MIN_MSE_THRESHOLD: f64 = 1e-6;

/// Training-error percentile used as the MSE threshold
const THRESHOLD_PERCENTILE: f64 = 0.95;

/// Min/max normalization parameters from training
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub min_vals: Vec<f64>,
    pub max_vals: Vec<f64>,
}

impl NormalizationParams {
    /// Identity-like params for `n` features already in [0, 1]
    pub fn unit(n: usize) -> Self {
        Self {
            min_vals: vec![0.0; n],
            max_vals: vec![1.0; n],
        }
    }

    pub fn fit(data: &ArrayView2<'_, f64>) -> Self {
        let min_vals = data
            .axis_iter(Axis(1))
            .map(|col| col.iter().copied().fold(f64::INFINITY, f64::min))
            .collect();
        let max_vals = data
            .axis_iter(Axis(1))
            .map(|col| col.iter().copied().fold(f64::NEG_INFINITY, f64::max))
            .collect();
        Self { min_vals, max_vals }
    }

    /// Scale into [0, 1]; values outside the training range are clamped
    pub fn normalize(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .enumerate()
            .map(|(i, &value)| {
                let min_val = self.min_vals.get(i).copied().unwrap_or(0.0);
                let max_val = self.max_vals.get(i).copied().unwrap_or(1.0);
                let range = (max_val - min_val).max(1e-8);
                ((value - min_val) / range).clamp(0.0, 1.0)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeanReconstructor {
    feature_names: Vec<String>,
    normalization: NormalizationParams,
    centroid: Vec<f64>,
    mse_threshold: f64,
    training_rows: usize,
    trained_at: Option<DateTime<Utc>>,
}

impl MeanReconstructor {
    /// Adapter with a schema but no centroid; `is_trained()` is false
    pub fn untrained(feature_names: Vec<String>) -> Self {
        let n = feature_names.len();
        Self {
            feature_names,
            normalization: NormalizationParams::unit(n),
            centroid: Vec::new(),
            mse_threshold: MIN_MSE_THRESHOLD,
            training_rows: 0,
            trained_at: None,
        }
    }

    pub fn fit(feature_names: Vec<String>, data: ArrayView2<'_, f64>) -> Result<Self, ModelError> {
        if data.nrows() == 0 {
            return Err(ModelError::Training("no training rows".to_string()));
        }
        if data.ncols() != feature_names.len() {
            return Err(ModelError::DimensionMismatch {
                expected: feature_names.len(),
                actual: data.ncols(),
            });
        }

        let normalization = NormalizationParams::fit(&data);
        let normalized: Vec<Vec<f64>> = data
            .outer_iter()
            .map(|row| normalization.normalize(&row.to_vec()))
            .collect();

        let mut centroid = Array1::<f64>::zeros(data.ncols());
        for row in &normalized {
            centroid += &Array1::from_vec(row.clone());
        }
        centroid /= normalized.len() as f64;
        let centroid = centroid.to_vec();

        let mut errors: Vec<f64> = normalized.iter().map(|row| mse(row, &centroid)).collect();
        errors.sort_by(|a, b| a.total_cmp(b));
        let index = ((errors.len() - 1) as f64 * THRESHOLD_PERCENTILE).round() as usize;
        let mse_threshold = errors[index.min(errors.len() - 1)].max(MIN_MSE_THRESHOLD);

        log::info!(
            "Mean reconstructor trained: {} rows x {} features, MSE threshold {:.6}",
            data.nrows(),
            data.ncols(),
            mse_threshold
        );

        Ok(Self {
            feature_names,
            normalization,
            centroid,
            mse_threshold,
            training_rows: data.nrows(),
            trained_at: Some(Utc::now()),
        })
    }

    pub fn mse_threshold(&self) -> f64 {
        self.mse_threshold
    }

    /// Raw reconstruction error of one aligned row
    pub fn reconstruction_error(&self, features: &[f64]) -> Result<f64, ModelError> {
        if !self.is_trained() {
            return Err(ModelError::NotTrained(ModelKind::Reconstruction));
        }
        check_dimension(self.feature_names.len(), features)?;
        Ok(mse(&self.normalization.normalize(features), &self.centroid))
    }
}

fn mse(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>() / a.len() as f64
}

impl ModelAdapter for MeanReconstructor {
    fn kind(&self) -> ModelKind {
        ModelKind::Reconstruction
    }

    fn is_trained(&self) -> bool {
        !self.centroid.is_empty()
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn score(&self, features: &[f64]) -> Result<f64, ModelError> {
        let error = self.reconstruction_error(features)?;
        Ok((error / (self.mse_threshold * 2.0)).clamp(0.0, 1.0))
    }

    fn model_info(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "mean_reconstructor",
            "trained": self.is_trained(),
            "mse_threshold": self.mse_threshold,
            "training_rows": self.training_rows,
            "feature_count": self.feature_names.len(),
            "trained_at": self.trained_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{}", i)).collect()
    }

    fn training() -> Array2<f64> {
        Array2::from_shape_fn((100, 2), |(r, c)| 10.0 + ((r + c * 5) % 10) as f64)
    }

    #[test]
    fn test_normalization_clamps() {
        let params = NormalizationParams {
            min_vals: vec![0.0, 10.0],
            max_vals: vec![10.0, 10.0],
        };
        assert_eq!(params.normalize(&[5.0, 10.0]), vec![0.5, 0.0]);
        assert_eq!(params.normalize(&[50.0, 20.0]), vec![1.0, 1.0]);
        assert_eq!(params.normalize(&[-5.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_outlier_saturates() {
        let model = MeanReconstructor::fit(names(2), training().view()).unwrap();

        let typical = model.score(&[14.5, 14.5]).unwrap();
        let extreme = model.score(&[1_000.0, 1_000.0]).unwrap();

        assert!(typical < 0.5, "typical {}", typical);
        assert!(extreme > 0.9 && extreme <= 1.0, "extreme {}", extreme);
    }

    #[test]
    fn test_untrained() {
        let model = MeanReconstructor::untrained(names(2));
        assert!(!model.is_trained());
        assert!(matches!(model.score(&[0.0, 0.0]), Err(ModelError::NotTrained(ModelKind::Reconstruction))));
    }

    #[test]
    fn test_serde_keeps_scores() {
        let model = MeanReconstructor::fit(names(2), training().view()).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let restored: MeanReconstructor = serde_json::from_str(&json).unwrap();

        let x = [12.0, 17.0];
        assert!((model.score(&x).unwrap() - restored.score(&x).unwrap()).abs() < 1e-9);
    }
}
