//! CART regression tree
//!
//! Greedy variance-reduction splits on scaled feature rows. Used directly as
//! the weak learner of gradient boosting and bagged into the random forest.
//! Nodes live in a flat vector; children are referenced by index.

use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::features::{FeatureRow, FEATURE_COUNT};
use crate::error::{EngineError, Result};

/// Number of columns considered at each split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    All,
    Sqrt,
    Fixed(usize),
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        let k = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::Fixed(k) => *k,
        };
        k.clamp(1, n_features)
    }
}

/// Growth limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 12,
            min_samples_split: 5,
            min_samples_leaf: 2,
            max_features: MaxFeatures::All,
        }
    }
}

impl TreeParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(EngineError::InvalidParameter("max_depth must be positive".into()));
        }
        if self.min_samples_leaf == 0 {
            return Err(EngineError::InvalidParameter("min_samples_leaf must be positive".into()));
        }
        if self.min_samples_split < 2 {
            return Err(EngineError::InvalidParameter("min_samples_split must be at least 2".into()));
        }
        if let MaxFeatures::Fixed(0) = self.max_features {
            return Err(EngineError::InvalidParameter("max_features must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    /// Total squared-error reduction per column, accumulated while growing
    #[serde(skip)]
    impurity_decrease: Vec<f64>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

impl RegressionTree {
    /// Grow a tree on the rows of `x` selected by `indices`
    pub fn fit<R: Rng + ?Sized>(
        x: &[FeatureRow],
        y: &[f64],
        indices: &[usize],
        params: &TreeParams,
        rng: &mut R,
    ) -> Result<Self> {
        params.validate()?;
        if x.len() != y.len() {
            return Err(EngineError::DimensionMismatch { expected: x.len(), actual: y.len() });
        }
        if indices.is_empty() {
            return Err(EngineError::InsufficientData { required: 1, actual: 0 });
        }

        let mut tree = Self {
            nodes: Vec::new(),
            impurity_decrease: vec![0.0; FEATURE_COUNT],
        };
        tree.grow(x, y, indices.to_vec(), 0, params, rng);
        Ok(tree)
    }

    fn grow<R: Rng + ?Sized>(
        &mut self,
        x: &[FeatureRow],
        y: &[f64],
        indices: Vec<usize>,
        depth: usize,
        params: &TreeParams,
        rng: &mut R,
    ) -> usize {
        let id = self.nodes.len();
        let n = indices.len() as f64;
        let value = indices.iter().map(|&i| y[i]).sum::<f64>() / n;
        self.nodes.push(Node::Leaf { value });

        let splittable = depth < params.max_depth
            && indices.len() >= params.min_samples_split
            && indices.len() >= 2 * params.min_samples_leaf;
        if !splittable {
            return id;
        }

        let Some(best) = best_split(x, y, &indices, params, rng) else {
            return id;
        };

        self.impurity_decrease[best.feature] += best.gain;
        let left = self.grow(x, y, best.left, depth + 1, params, rng);
        let right = self.grow(x, y, best.right, depth + 1, params, rng);
        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        id
    }

    pub fn predict(&self, row: &FeatureRow) -> Result<f64> {
        let mut id = 0;
        // A well-formed tree reaches a leaf in at most `nodes.len()` steps
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(id) {
                Some(Node::Leaf { value }) => return Ok(*value),
                Some(Node::Split { feature, threshold, left, right }) => {
                    let value = row
                        .get(*feature)
                        .ok_or_else(|| EngineError::CorruptModel(format!("split on unknown feature {feature}")))?;
                    id = if *value <= *threshold { *left } else { *right };
                }
                None => return Err(EngineError::CorruptModel(format!("missing tree node {id}"))),
            }
        }
        Err(EngineError::CorruptModel("cycle in tree nodes".into()))
    }

    pub fn impurity_decrease(&self) -> &[f64] {
        &self.impurity_decrease
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

fn best_split<R: Rng + ?Sized>(
    x: &[FeatureRow],
    y: &[f64],
    indices: &[usize],
    params: &TreeParams,
    rng: &mut R,
) -> Option<SplitCandidate> {
    let n = indices.len();
    let min_leaf = params.min_samples_leaf;
    let k = params.max_features.resolve(FEATURE_COUNT);
    let features: Vec<usize> = if k >= FEATURE_COUNT {
        (0..FEATURE_COUNT).collect()
    } else {
        index::sample(rng, FEATURE_COUNT, k).into_vec()
    };

    let total: f64 = indices.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
    let parent_sse = total_sq - total * total / n as f64;
    if parent_sse <= 1e-12 {
        return None;
    }

    // (feature, threshold, gain)
    let mut best: Option<(usize, f64, f64)> = None;
    let mut sorted = indices.to_vec();

    for feature in features {
        sorted.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for pos in 1..n {
            let yi = y[sorted[pos - 1]];
            left_sum += yi;
            left_sq += yi * yi;

            if pos < min_leaf || n - pos < min_leaf {
                continue;
            }
            let lo = x[sorted[pos - 1]][feature];
            let hi = x[sorted[pos]][feature];
            if lo == hi {
                continue;
            }

            let right_sum = total - left_sum;
            let right_sq = total_sq - left_sq;
            let left_sse = left_sq - left_sum * left_sum / pos as f64;
            let right_sse = right_sq - right_sum * right_sum / (n - pos) as f64;
            let gain = parent_sse - left_sse - right_sse;

            if gain > best.as_ref().map_or(1e-12, |b| b.2) {
                let mut threshold = lo + (hi - lo) / 2.0;
                if threshold >= hi {
                    threshold = lo;
                }
                best = Some((feature, threshold, gain));
            }
        }
    }

    best.map(|(feature, threshold, gain)| {
        let (left, right) = indices.iter().partition(|&&i| x[i][feature] <= threshold);
        SplitCandidate {
            feature,
            threshold,
            gain,
            left,
            right,
        }
    })
}

/// Scale raw impurity decreases so they sum to 1
pub fn normalize_importance(raw: &[f64]) -> Vec<f64> {
    let total: f64 = raw.iter().sum();
    if total > 0.0 {
        raw.iter().map(|v| v / total).collect()
    } else {
        vec![0.0; raw.len()]
    }
}
