//! Gradient-boosted regression trees (squared loss)
//!
//! Starts from the target mean and fits each shallow tree to the current
//! residuals on a row subsample drawn without replacement.

use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use super::features::{FeatureRow, FEATURE_COUNT};
use super::tree::{normalize_importance, MaxFeatures, RegressionTree, TreeParams};
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Fraction of rows used per round
    pub subsample: f64,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 150,
            max_depth: 6,
            learning_rate: 0.1,
            subsample: 0.8,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

impl BoostingParams {
    fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(EngineError::InvalidParameter("n_estimators must be positive".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(EngineError::InvalidParameter(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(EngineError::InvalidParameter(format!(
                "subsample must be in (0, 1], got {}",
                self.subsample
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    init: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoosting {
    pub fn fit(x: &[FeatureRow], y: &[f64], params: &BoostingParams, seed: u64) -> Result<Self> {
        params.validate()?;
        if x.is_empty() || x.len() != y.len() {
            return Err(EngineError::InsufficientData { required: 1, actual: x.len().min(y.len()) });
        }

        let n = x.len();
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features: MaxFeatures::All,
        };
        let mut rng = ChaCha20Rng::seed_from_u64(seed);

        let init = y.iter().sum::<f64>() / n as f64;
        let mut current = vec![init; n];
        let mut trees = Vec::with_capacity(params.n_estimators);
        let sample_size = ((n as f64 * params.subsample).round() as usize).clamp(1, n);

        for _ in 0..params.n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&current).map(|(t, c)| t - c).collect();
            let rows: Vec<usize> = if sample_size < n {
                index::sample(&mut rng, n, sample_size).into_vec()
            } else {
                (0..n).collect()
            };

            let tree = RegressionTree::fit(x, &residuals, &rows, &tree_params, &mut rng)?;
            for (i, row) in x.iter().enumerate() {
                current[i] += params.learning_rate * tree.predict(row)?;
            }
            trees.push(tree);
        }

        Ok(Self {
            init,
            learning_rate: params.learning_rate,
            trees,
        })
    }

    pub fn predict(&self, row: &FeatureRow) -> Result<f64> {
        let mut value = self.init;
        for tree in &self.trees {
            value += self.learning_rate * tree.predict(row)?;
        }
        Ok(value)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn feature_importance(&self) -> Vec<f64> {
        let mut total = vec![0.0; FEATURE_COUNT];
        for tree in &self.trees {
            for (acc, v) in total.iter_mut().zip(tree.impurity_decrease()) {
                *acc += v;
            }
        }
        normalize_importance(&total)
    }
}
