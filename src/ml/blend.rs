//! Blending member predictions into one fee
//!
//! The best member (highest test R² at training time) is trusted directly when
//! it produced a prediction; otherwise the confidence-weighted mean of the
//! members that did predict is used. The weighted mean is always reported.

use std::collections::BTreeMap;

use super::ensemble::ModelKind;
use super::oracle::clamp_fee;

pub const MIN_BLEND_CONFIDENCE: f64 = 0.3;
pub const MAX_BLEND_CONFIDENCE: f64 = 0.95;

/// Which prediction became the recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimarySource {
    Member(ModelKind),
    /// Best member unavailable, weighted mean used
    Ensemble,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlendOutcome {
    /// Recommended fee, clamped to the business range
    pub final_fee: f64,
    /// Confidence-weighted mean, unclamped
    pub ensemble_fee: f64,
    pub confidence: f64,
    pub primary: PrimarySource,
}

/// Blend predictions; `None` when no member predicted
pub fn blend(
    predictions: &BTreeMap<ModelKind, f64>,
    confidences: &BTreeMap<ModelKind, f64>,
    best: Option<ModelKind>,
) -> Option<BlendOutcome> {
    if predictions.is_empty() {
        return None;
    }

    let confidence_of = |kind: &ModelKind| confidences.get(kind).copied().unwrap_or(0.0);

    let total_weight: f64 = predictions.keys().map(confidence_of).sum();
    let ensemble_fee = if total_weight > 0.0 {
        predictions.iter().map(|(k, p)| p * confidence_of(k)).sum::<f64>() / total_weight
    } else {
        predictions.values().sum::<f64>() / predictions.len() as f64
    };

    let (raw_fee, confidence, primary) = match best.and_then(|b| predictions.get(&b).map(|p| (b, *p))) {
        Some((kind, prediction)) => (prediction, confidence_of(&kind), PrimarySource::Member(kind)),
        None => {
            let mean_confidence = predictions.keys().map(confidence_of).sum::<f64>() / predictions.len() as f64;
            (ensemble_fee, mean_confidence, PrimarySource::Ensemble)
        }
    };

    Some(BlendOutcome {
        final_fee: clamp_fee(raw_fee),
        ensemble_fee,
        confidence: confidence.clamp(MIN_BLEND_CONFIDENCE, MAX_BLEND_CONFIDENCE),
        primary,
    })
}
