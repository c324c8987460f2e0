//! Per-member confidence
//!
//! Each kind starts from a fixed prior that is lowered in market conditions
//! where all members extrapolate poorly (extreme volatility, unusual volume,
//! gas far from baseline) and raised slightly in very calm markets.

use std::collections::BTreeMap;

use super::ensemble::ModelKind;
use super::features::FeatureVector;

pub const MIN_CONFIDENCE: f64 = 0.4;
pub const MAX_CONFIDENCE: f64 = 0.95;

/// Baseline confidence of a member kind
pub fn prior(kind: ModelKind) -> f64 {
    match kind {
        ModelKind::RandomForest => 0.87,
        ModelKind::GradientBoosting => 0.84,
        ModelKind::NeuralNetwork => 0.81,
    }
}

/// Confidence of `kind` for these features, in [0.4, 0.95]
pub fn score(kind: ModelKind, features: &FeatureVector) -> f64 {
    let mut confidence = prior(kind);

    if features.volatility > 20.0 {
        confidence -= 0.15;
    } else if features.volatility > 12.0 {
        confidence -= 0.08;
    } else if features.volatility < 2.0 {
        confidence += 0.05;
    }

    if features.volume_ratio > 2.0 || features.volume_ratio < 0.4 {
        confidence -= 0.08;
    }

    if features.gas_trend.abs() > 0.7 {
        confidence -= 0.06;
    }

    confidence.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

/// Confidence for every member that produced a prediction
pub fn score_all<'a, I>(kinds: I, features: &FeatureVector) -> BTreeMap<ModelKind, f64>
where
    I: IntoIterator<Item = &'a ModelKind>,
{
    kinds.into_iter().map(|&k| (k, score(k, features))).collect()
}
