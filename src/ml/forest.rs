//! Bagged random forest regressor

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use super::features::{FeatureRow, FEATURE_COUNT};
use super::tree::{normalize_importance, MaxFeatures, RegressionTree, TreeParams};
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    /// Draw each tree's rows with replacement
    pub bootstrap: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: 12,
            min_samples_split: 5,
            min_samples_leaf: 2,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
        }
    }
}

impl ForestParams {
    pub fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            max_features: self.max_features,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn fit(x: &[FeatureRow], y: &[f64], params: &ForestParams, seed: u64) -> Result<Self> {
        if params.n_estimators == 0 {
            return Err(EngineError::InvalidParameter("n_estimators must be positive".into()));
        }
        if x.is_empty() {
            return Err(EngineError::InsufficientData { required: 1, actual: 0 });
        }

        let tree_params = params.tree_params();
        let n = x.len();
        let mut trees = Vec::with_capacity(params.n_estimators);

        for i in 0..params.n_estimators {
            let mut rng = ChaCha20Rng::seed_from_u64(seed.wrapping_add(i as u64));
            let rows: Vec<usize> = if params.bootstrap {
                (0..n).map(|_| rng.random_range(0..n)).collect()
            } else {
                (0..n).collect()
            };
            trees.push(RegressionTree::fit(x, y, &rows, &tree_params, &mut rng)?);
        }

        Ok(Self { trees })
    }

    /// Mean of the tree predictions
    pub fn predict(&self, row: &FeatureRow) -> Result<f64> {
        if self.trees.is_empty() {
            return Err(EngineError::CorruptModel("forest has no trees".into()));
        }
        let mut sum = 0.0;
        for tree in &self.trees {
            sum += tree.predict(row)?;
        }
        Ok(sum / self.trees.len() as f64)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Normalised impurity decrease averaged over trees
    pub fn feature_importance(&self) -> Vec<f64> {
        let mut total = vec![0.0; FEATURE_COUNT];
        for tree in &self.trees {
            let per_tree = normalize_importance(tree.impurity_decrease());
            for (acc, v) in total.iter_mut().zip(per_tree) {
                *acc += v;
            }
        }
        normalize_importance(&total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> (Vec<FeatureRow>, Vec<f64>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..200 {
            let mut row = [0.0; FEATURE_COUNT];
            let a = (i % 20) as f64;
            let b = (i / 20) as f64;
            row[0] = a;
            row[1] = b;
            row[2] = ((i * 7) % 13) as f64;
            x.push(row);
            y.push(0.5 * a + 0.1 * b);
        }
        (x, y)
    }

    fn params() -> ForestParams {
        ForestParams {
            n_estimators: 15,
            max_features: MaxFeatures::All,
            ..ForestParams::default()
        }
    }

    #[test]
    fn test_forest_fits_signal() {
        let (x, y) = data();
        let forest = RandomForest::fit(&x, &y, &params(), 42).unwrap();
        assert_eq!(forest.n_trees(), 15);

        let preds: Vec<f64> = x.iter().map(|r| forest.predict(r).unwrap()).collect();
        assert!(crate::ml::metrics::r2(&y, &preds) > 0.95);

        let importance = forest.feature_importance();
        assert!(importance[0] > importance[1]);
        assert!(importance[0] > importance[2]);
        assert!((importance.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_forest_is_seeded() {
        let (x, y) = data();
        let a = RandomForest::fit(&x, &y, &params(), 7).unwrap();
        let b = RandomForest::fit(&x, &y, &params(), 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_estimators_rejected() {
        let (x, y) = data();
        let p = ForestParams {
            n_estimators: 0,
            ..params()
        };
        assert!(matches!(
            RandomForest::fit(&x, &y, &p, 1),
            Err(EngineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_empty_forest_errors() {
        let forest = RandomForest { trees: Vec::new() };
        assert!(forest.predict(&[0.0; FEATURE_COUNT]).is_err());
    }
}
