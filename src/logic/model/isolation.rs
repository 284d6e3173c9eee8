//! Isolation Forest - Reference isolation-based adapter
//!
//! Seeded, so the same training matrix always yields the same forest.
//! Score = 2^(-E[h(x)] / c(ψ)) where h is the path length and ψ the
//! subsample size; ≈1 isolates quickly (anomalous), ≤0.5 is ordinary.

use chrono::{DateTime, Utc};
use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::adapter::{check_dimension, ModelAdapter, ModelError, ModelKind};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForestConfig {
    pub n_trees: usize,
    /// Rows drawn (without replacement) per tree
    pub sample_size: usize,
    pub seed: u64,
}

impl Default for IsolationForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            sample_size: 256,
            seed: 42,
        }
    }
}

// ============================================================================
// TREE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

/// Arena-allocated tree, root at index 0
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn build(data: &ArrayView2<'_, f64>, rows: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(data, rows, 0, height_limit, rng);
        tree
    }

    fn grow(
        &mut self,
        data: &ArrayView2<'_, f64>,
        rows: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });

        if depth >= height_limit || rows.len() <= 1 {
            return id;
        }

        // Only features that still vary can split
        let candidates: Vec<(usize, f64, f64)> = (0..data.ncols())
            .filter_map(|col| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    let v = data[[r, col]];
                    (lo.min(v), hi.max(v))
                });
                (hi > lo).then_some((col, lo, hi))
            })
            .collect();
        if candidates.is_empty() {
            return id;
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| data[[r, feature]] < threshold);

        let left = self.grow(data, left_rows, depth + 1, height_limit, rng);
        let right = self.grow(data, right_rows, depth + 1, height_limit, rng);
        self.nodes[id] = Node::Split { feature, threshold, left, right };
        id
    }

    fn path_length(&self, x: &[f64]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match self.nodes.get(node) {
                Some(Node::Split { feature, threshold, left, right }) => {
                    node = if x[*feature] < *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Some(Node::Leaf { size }) => return depth + average_path_length(*size),
                None => return depth,
            }
        }
    }
}

/// Average unsuccessful-search path length in a BST of `n` nodes
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

// ============================================================================
// ADAPTER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForestAdapter {
    feature_names: Vec<String>,
    config: IsolationForestConfig,
    trees: Vec<IsolationTree>,
    /// Effective ψ (min of configured size and training rows)
    subsample: usize,
    training_rows: usize,
    trained_at: Option<DateTime<Utc>>,
}

impl IsolationForestAdapter {
    /// Adapter with a schema but no trees; `is_trained()` is false
    pub fn untrained(feature_names: Vec<String>) -> Self {
        Self {
            feature_names,
            config: IsolationForestConfig::default(),
            trees: Vec::new(),
            subsample: 0,
            training_rows: 0,
            trained_at: None,
        }
    }

    /// Fit on rows of normal traffic; columns follow `feature_names`
    pub fn fit(
        feature_names: Vec<String>,
        data: ArrayView2<'_, f64>,
        config: IsolationForestConfig,
    ) -> Result<Self, ModelError> {
        if data.nrows() == 0 {
            return Err(ModelError::Training("no training rows".to_string()));
        }
        if data.ncols() != feature_names.len() {
            return Err(ModelError::DimensionMismatch {
                expected: feature_names.len(),
                actual: data.ncols(),
            });
        }
        if config.n_trees == 0 || config.sample_size < 2 {
            return Err(ModelError::Training(
                "isolation forest needs at least one tree and a sample size of 2".to_string(),
            ));
        }

        let subsample = config.sample_size.min(data.nrows());
        let height_limit = (subsample.max(2) as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let trees = (0..config.n_trees)
            .map(|_| {
                let rows = sample(&mut rng, data.nrows(), subsample).into_vec();
                IsolationTree::build(&data, rows, height_limit, &mut rng)
            })
            .collect();

        log::info!(
            "Isolation forest trained: {} trees, ψ={}, {} rows x {} features",
            config.n_trees,
            subsample,
            data.nrows(),
            data.ncols()
        );

        Ok(Self {
            feature_names,
            config,
            trees,
            subsample,
            training_rows: data.nrows(),
            trained_at: Some(Utc::now()),
        })
    }
}

impl ModelAdapter for IsolationForestAdapter {
    fn kind(&self) -> ModelKind {
        ModelKind::Isolation
    }

    fn is_trained(&self) -> bool {
        !self.trees.is_empty()
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn score(&self, features: &[f64]) -> Result<f64, ModelError> {
        if !self.is_trained() {
            return Err(ModelError::NotTrained(ModelKind::Isolation));
        }
        check_dimension(self.feature_names.len(), features)?;

        let mean_path = self.trees.iter().map(|t| t.path_length(features)).sum::<f64>()
            / self.trees.len() as f64;
        let normalizer = average_path_length(self.subsample);
        if normalizer <= 0.0 {
            return Ok(0.5);
        }

        Ok(2f64.powf(-mean_path / normalizer).clamp(0.0, 1.0))
    }

    fn model_info(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "isolation_forest",
            "trained": self.is_trained(),
            "n_trees": self.trees.len(),
            "sample_size": self.subsample,
            "seed": self.config.seed,
            "training_rows": self.training_rows,
            "feature_count": self.feature_names.len(),
            "trained_at": self.trained_at,
        })
    }
}
