//! Per-column feature scaling
//!
//! Tree members use a robust scaler (median / IQR) so heavy-tailed columns
//! like volume do not dominate; the neural member uses mean / std.
//! Scalers are fitted on the training partition only.

use serde::{Deserialize, Serialize};

use super::features::{FeatureRow, FEATURE_COUNT};
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerKind {
    Standard,
    Robust,
}

/// Fitted scaler parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureScaler {
    Standard { mean: Vec<f64>, scale: Vec<f64> },
    Robust { center: Vec<f64>, scale: Vec<f64> },
}

impl FeatureScaler {
    pub fn fit(kind: ScalerKind, rows: &[FeatureRow]) -> Result<Self> {
        if rows.is_empty() {
            return Err(EngineError::InsufficientData { required: 1, actual: 0 });
        }

        let mut centers = Vec::with_capacity(FEATURE_COUNT);
        let mut scales = Vec::with_capacity(FEATURE_COUNT);

        for col in 0..FEATURE_COUNT {
            let mut values: Vec<f64> = rows.iter().map(|r| r[col]).collect();
            let (center, scale) = match kind {
                ScalerKind::Standard => {
                    let n = values.len() as f64;
                    let mean = values.iter().sum::<f64>() / n;
                    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                    (mean, var.sqrt())
                }
                ScalerKind::Robust => {
                    values.sort_by(|a, b| a.total_cmp(b));
                    let median = percentile(&values, 0.5);
                    let iqr = percentile(&values, 0.75) - percentile(&values, 0.25);
                    (median, iqr)
                }
            };
            centers.push(center);
            // Constant columns pass through unscaled
            scales.push(if scale.is_finite() && scale > 0.0 { scale } else { 1.0 });
        }

        Ok(match kind {
            ScalerKind::Standard => FeatureScaler::Standard { mean: centers, scale: scales },
            ScalerKind::Robust => FeatureScaler::Robust { center: centers, scale: scales },
        })
    }

    pub fn kind(&self) -> ScalerKind {
        match self {
            FeatureScaler::Standard { .. } => ScalerKind::Standard,
            FeatureScaler::Robust { .. } => ScalerKind::Robust,
        }
    }

    fn params(&self) -> (&[f64], &[f64]) {
        match self {
            FeatureScaler::Standard { mean, scale } => (mean, scale),
            FeatureScaler::Robust { center, scale } => (center, scale),
        }
    }

    pub fn transform(&self, row: &FeatureRow) -> Result<FeatureRow> {
        let (center, scale) = self.params();
        if center.len() != FEATURE_COUNT || scale.len() != FEATURE_COUNT {
            return Err(EngineError::DimensionMismatch {
                expected: FEATURE_COUNT,
                actual: center.len().min(scale.len()),
            });
        }

        let mut out = [0.0; FEATURE_COUNT];
        for (i, value) in row.iter().enumerate() {
            out[i] = (value - center[i]) / scale[i];
        }
        Ok(out)
    }

    pub fn transform_all(&self, rows: &[FeatureRow]) -> Result<Vec<FeatureRow>> {
        rows.iter().map(|r| self.transform(r)).collect()
    }
}

/// Linear-interpolated percentile of sorted values, `q` in [0, 1]
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<FeatureRow> {
        (0..5)
            .map(|i| {
                let mut r = [7.0; FEATURE_COUNT];
                r[0] = i as f64; // 0..4
                r[1] = (i * i) as f64; // 0,1,4,9,16
                r
            })
            .collect()
    }

    #[test]
    fn test_standard_scaler() {
        let s = FeatureScaler::fit(ScalerKind::Standard, &rows()).unwrap();
        let out = s.transform(&rows()[4]).unwrap();
        // mean 2, population std sqrt(2)
        assert!((out[0] - 2.0 / 2f64.sqrt()).abs() < 1e-12);
        // constant column: scale 1, centred
        assert_eq!(out[5], 0.0);
    }

    #[test]
    fn test_robust_scaler() {
        let s = FeatureScaler::fit(ScalerKind::Robust, &rows()).unwrap();
        let FeatureScaler::Robust { center, scale } = &s else {
            panic!("expected robust scaler");
        };
        assert_eq!(center[0], 2.0);
        assert_eq!(scale[0], 2.0); // q75 = 3, q25 = 1
        assert_eq!(center[1], 4.0);
        assert_eq!(scale[1], 8.0); // q75 = 9, q25 = 1
        assert_eq!(scale[5], 1.0);
        assert_eq!(s.kind(), ScalerKind::Robust);
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&v, 0.5) - 2.5).abs() < 1e-12);
        assert!((percentile(&v, 0.25) - 1.75).abs() < 1e-12);
        assert_eq!(percentile(&[5.0], 0.9), 5.0);
    }

    #[test]
    fn test_empty_fit_rejected() {
        assert!(FeatureScaler::fit(ScalerKind::Standard, &[]).is_err());
    }

    #[test]
    fn test_corrupt_dimensions() {
        let s = FeatureScaler::Standard { mean: vec![0.0; 3], scale: vec![1.0; 3] };
        let err = s.transform(&[0.0; FEATURE_COUNT]).unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { expected: 14, actual: 3 }));
    }

    #[test]
    fn test_serde_tagged() {
        let s = FeatureScaler::fit(ScalerKind::Robust, &rows()).unwrap();
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"kind\":\"robust\""));
        let back: FeatureScaler = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
