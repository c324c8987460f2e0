//! Regression metrics and data splitting

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{EngineError, Result};

/// Evaluation of one trained member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub train_r2: f64,
    pub test_r2: f64,
    pub test_mse: f64,
    pub test_mae: f64,
    /// Mean k-fold R² on the training partition (tree members)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv_r2_mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv_r2_std: Option<f64>,
    /// Epochs actually run (neural member)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epochs_trained: Option<usize>,
    /// Normalised impurity decrease per column (tree members)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_importance: Option<BTreeMap<String, f64>>,
    pub train_samples: usize,
    pub test_samples: usize,
}

/// Coefficient of determination. A constant target scores 1 when matched
/// exactly and 0 otherwise.
pub fn r2(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_tot: f64 = y_true.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = y_true.iter().zip(y_pred).map(|(y, p)| (y - p).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn mse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    y_true.iter().zip(y_pred).map(|(y, p)| (y - p).powi(2)).sum::<f64>() / y_true.len() as f64
}

pub fn mae(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    y_true.iter().zip(y_pred).map(|(y, p)| (y - p).abs()).sum::<f64>() / y_true.len() as f64
}

/// Mean and population standard deviation
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Seeded shuffled split into (train, test) row indices
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(EngineError::InvalidParameter(format!(
            "test_fraction must be in (0, 1), got {test_fraction}"
        )));
    }
    if n < 2 {
        return Err(EngineError::InsufficientData { required: 2, actual: n });
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let n_test = ((n as f64 * test_fraction).round() as usize).clamp(1, n - 1);
    let train = indices.split_off(n_test);
    Ok((train, indices))
}

/// Contiguous k-fold partitions of `0..n` as (fit, validate) index pairs
pub fn k_fold(n: usize, k: usize) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
    if k < 2 || k > n {
        return Err(EngineError::InvalidParameter(format!(
            "cannot split {n} rows into {k} folds"
        )));
    }

    let base = n / k;
    let extra = n % k;
    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let len = base + usize::from(fold < extra);
        let validate: Vec<usize> = (start..start + len).collect();
        let fit: Vec<usize> = (0..start).chain(start + len..n).collect();
        folds.push((fit, validate));
        start += len;
    }
    Ok(folds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_r2() {
        let y = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(r2(&y, &y), 1.0);
        assert_eq!(r2(&y, &[2.5; 4]), 0.0);
        assert!(r2(&y, &[4.0, 3.0, 2.0, 1.0]) < 0.0);
        assert_eq!(r2(&[2.0, 2.0], &[2.0, 2.0]), 1.0);
        assert_eq!(r2(&[2.0, 2.0], &[2.0, 3.0]), 0.0);
    }

    #[test]
    fn test_errors() {
        let y = [1.0, 2.0, 3.0];
        let p = [1.5, 2.0, 2.0];
        assert!((mse(&y, &p) - 1.25 / 3.0).abs() < 1e-12);
        assert!((mae(&y, &p) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_split_is_seeded_partition() {
        let (train, test) = train_test_split(100, 0.2, 42).unwrap();
        assert_eq!(train.len(), 80);
        assert_eq!(test.len(), 20);

        let mut all: Vec<usize> = train.iter().chain(test.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());

        assert_eq!(train_test_split(100, 0.2, 42).unwrap(), (train, test));
        assert!(train_test_split(100, 1.0, 42).is_err());
        assert!(train_test_split(1, 0.2, 42).is_err());
    }

    #[test]
    fn test_k_fold_covers_everything_once() {
        let folds = k_fold(11, 3).unwrap();
        assert_eq!(folds.len(), 3);
        let sizes: Vec<usize> = folds.iter().map(|(_, v)| v.len()).collect();
        assert_eq!(sizes, vec![4, 4, 3]);
        for (fit, validate) in &folds {
            assert_eq!(fit.len() + validate.len(), 11);
            assert!(validate.iter().all(|i| !fit.contains(i)));
        }
        assert!(k_fold(3, 5).is_err());
        assert!(k_fold(10, 1).is_err());
    }

    #[test]
    fn test_mean_std() {
        let (m, s) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(m, 5.0);
        assert_eq!(s, 2.0);
    }
}
