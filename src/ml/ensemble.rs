//! Model ensemble: training and per-member prediction
//!
//! Each configured member is trained on the same shuffled split with its own
//! scaler. A member that fails to train (or later to predict) is logged and
//! left out; the rest of the ensemble carries on.
//!
//! Usage:
//! ```ignore
//! let trainer = EnsembleTrainer::new(ModelsConfig::default()).with_cv_folds(5);
//! let outcome = trainer.train(&samples)?;
//! let (predictions, failures) = outcome.model_set.predict_all(&features);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

use super::boosting::{BoostingParams, GradientBoosting};
use super::features::{feature_column_names, FeatureRow, FeatureVector, FEATURE_COLUMNS};
use super::forest::{ForestParams, RandomForest};
use super::metrics::{self, TrainingMetrics};
use super::neural::{NeuralNetwork, NeuralParams};
use super::scaler::{FeatureScaler, ScalerKind};
use super::synthetic::{to_matrix, TrainingSample};
use crate::error::{EngineError, Result};

/// Persisted format version; artifacts with another version are not loaded
pub const MODEL_VERSION: &str = "1.0";

/// Fewest samples a training run accepts
pub const MIN_TRAINING_SAMPLES: usize = 10;

/// Ensemble member kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    RandomForest,
    GradientBoosting,
    NeuralNetwork,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [
        ModelKind::RandomForest,
        ModelKind::GradientBoosting,
        ModelKind::NeuralNetwork,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::RandomForest => "random_forest",
            ModelKind::GradientBoosting => "gradient_boosting",
            ModelKind::NeuralNetwork => "neural_network",
        }
    }

    /// Scaler paired with this kind
    pub fn scaler_kind(&self) -> ScalerKind {
        match self {
            ModelKind::RandomForest | ModelKind::GradientBoosting => ScalerKind::Robust,
            ModelKind::NeuralNetwork => ScalerKind::Standard,
        }
    }

    pub fn is_tree_based(&self) -> bool {
        !matches!(self, ModelKind::NeuralNetwork)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Member list and hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Members in insertion order; ties on test R² go to the earlier one
    pub members: Vec<ModelKind>,
    pub random_forest: ForestParams,
    pub gradient_boosting: BoostingParams,
    pub neural_network: NeuralParams,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            members: ModelKind::ALL.to_vec(),
            random_forest: ForestParams::default(),
            gradient_boosting: BoostingParams::default(),
            neural_network: NeuralParams::default(),
        }
    }
}

/// Fitted parameters of one member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FittedModel {
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
    NeuralNetwork(NeuralNetwork),
}

impl FittedModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            FittedModel::RandomForest(_) => ModelKind::RandomForest,
            FittedModel::GradientBoosting(_) => ModelKind::GradientBoosting,
            FittedModel::NeuralNetwork(_) => ModelKind::NeuralNetwork,
        }
    }

    /// Predict on an already scaled row
    pub fn predict_scaled(&self, row: &FeatureRow) -> Result<f64> {
        match self {
            FittedModel::RandomForest(m) => m.predict(row),
            FittedModel::GradientBoosting(m) => m.predict(row),
            FittedModel::NeuralNetwork(m) => m.predict(row),
        }
    }
}

/// A trained member: model, its scaler and how it scored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberArtifact {
    pub kind: ModelKind,
    pub model: FittedModel,
    pub scaler: FeatureScaler,
    pub metrics: TrainingMetrics,
}

impl MemberArtifact {
    /// Scale a raw row and predict; non-finite outputs are errors
    pub fn predict_row(&self, row: &FeatureRow) -> Result<f64> {
        let scaled = self.scaler.transform(row)?;
        let value = self.model.predict_scaled(&scaled)?;
        if !value.is_finite() {
            return Err(EngineError::MemberPredict {
                kind: self.kind.to_string(),
                reason: format!("non-finite output {value}"),
            });
        }
        Ok(value)
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<f64> {
        self.predict_row(&features.to_array())
    }
}

/// Ensemble-level facts persisted alongside the members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleMetadata {
    pub feature_columns: Vec<String>,
    pub is_trained: bool,
    pub best_model_name: Option<ModelKind>,
    pub training_timestamp: Option<DateTime<Utc>>,
    pub model_version: String,
    /// Trained members in insertion order
    #[serde(default)]
    pub members: Vec<ModelKind>,
    #[serde(default)]
    pub sample_count: usize,
    #[serde(default)]
    pub seed: u64,
    /// SHA-256 of each artifact file, keyed by file name
    #[serde(default)]
    pub artifact_digests: BTreeMap<String, String>,
}

impl EnsembleMetadata {
    /// Whether these artifacts were produced for the current codec and format
    pub fn is_compatible(&self) -> bool {
        self.model_version == MODEL_VERSION
            && self.feature_columns.len() == FEATURE_COLUMNS.len()
            && self.feature_columns.iter().zip(FEATURE_COLUMNS.iter()).all(|(a, b)| a == b)
    }
}

/// A member that could not train or predict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberFailure {
    pub kind: ModelKind,
    pub reason: String,
}

/// Immutable set of trained members
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSet {
    pub members: Vec<MemberArtifact>,
    pub metadata: EnsembleMetadata,
}

impl ModelSet {
    pub fn member(&self, kind: ModelKind) -> Option<&MemberArtifact> {
        self.members.iter().find(|m| m.kind == kind)
    }

    pub fn kinds(&self) -> Vec<ModelKind> {
        self.members.iter().map(|m| m.kind).collect()
    }

    pub fn best_model(&self) -> Option<ModelKind> {
        self.metadata.best_model_name
    }

    pub fn metrics(&self) -> BTreeMap<ModelKind, TrainingMetrics> {
        self.members.iter().map(|m| (m.kind, m.metrics.clone())).collect()
    }

    /// Predict with every member; failures are reported, not fatal
    pub fn predict_all(&self, features: &FeatureVector) -> (BTreeMap<ModelKind, f64>, Vec<MemberFailure>) {
        let row = features.to_array();
        let mut predictions = BTreeMap::new();
        let mut failures = Vec::new();

        for member in &self.members {
            match member.predict_row(&row) {
                Ok(value) => {
                    debug!("Model {} predicted {:.4}", member.kind, value);
                    predictions.insert(member.kind, value);
                }
                Err(e) => {
                    warn!("Model {} failed: {}", member.kind, e);
                    failures.push(MemberFailure {
                        kind: member.kind,
                        reason: e.to_string(),
                    });
                }
            }
        }

        (predictions, failures)
    }
}

/// Result of one training run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model_set: ModelSet,
    pub metrics: BTreeMap<ModelKind, TrainingMetrics>,
    pub failures: Vec<MemberFailure>,
}

/// Trains every configured member on one split
#[derive(Debug, Clone)]
pub struct EnsembleTrainer {
    models: ModelsConfig,
    test_fraction: f64,
    split_seed: u64,
    cv_folds: usize,
    data_seed: u64,
}

/// Train and test partitions of the raw rows
struct Split {
    x_train: Vec<FeatureRow>,
    y_train: Vec<f64>,
    x_test: Vec<FeatureRow>,
    y_test: Vec<f64>,
}

impl EnsembleTrainer {
    pub fn new(models: ModelsConfig) -> Self {
        Self {
            models,
            test_fraction: 0.2,
            split_seed: 42,
            cv_folds: 5,
            data_seed: 0,
        }
    }

    pub fn with_split(mut self, test_fraction: f64, split_seed: u64) -> Self {
        self.test_fraction = test_fraction;
        self.split_seed = split_seed;
        self
    }

    /// Seed the training data was generated from, recorded in the metadata
    pub fn with_data_seed(mut self, data_seed: u64) -> Self {
        self.data_seed = data_seed;
        self
    }

    /// Cross-validation folds for tree members; below 2 disables it
    pub fn with_cv_folds(mut self, cv_folds: usize) -> Self {
        self.cv_folds = cv_folds;
        self
    }

    pub fn train(&self, samples: &[TrainingSample]) -> Result<TrainingOutcome> {
        if samples.len() < MIN_TRAINING_SAMPLES {
            return Err(EngineError::InsufficientData {
                required: MIN_TRAINING_SAMPLES,
                actual: samples.len(),
            });
        }

        let (x, y) = to_matrix(samples);
        let (train_idx, test_idx) = metrics::train_test_split(x.len(), self.test_fraction, self.split_seed)?;
        let split = Split {
            x_train: train_idx.iter().map(|&i| x[i]).collect(),
            y_train: train_idx.iter().map(|&i| y[i]).collect(),
            x_test: test_idx.iter().map(|&i| x[i]).collect(),
            y_test: test_idx.iter().map(|&i| y[i]).collect(),
        };

        info!(
            "Training {} ensemble members on {} rows ({} train / {} test)",
            self.models.members.len(),
            samples.len(),
            split.x_train.len(),
            split.x_test.len()
        );

        let mut members: Vec<MemberArtifact> = Vec::new();
        let mut failures = Vec::new();

        for &kind in &self.models.members {
            if members.iter().any(|m| m.kind == kind) {
                warn!("Model {} listed twice, ignoring duplicate", kind);
                continue;
            }
            match self.train_member(kind, &split) {
                Ok(member) => {
                    info!(
                        "Model {} trained: test R²={:.4}, MAE={:.5}",
                        kind, member.metrics.test_r2, member.metrics.test_mae
                    );
                    members.push(member);
                }
                Err(e) => {
                    warn!("Model {} failed: {}", kind, e);
                    failures.push(MemberFailure {
                        kind,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if members.is_empty() {
            return Err(EngineError::NoMembersTrained);
        }

        let best = best_member(&members);
        let metrics: BTreeMap<ModelKind, TrainingMetrics> =
            members.iter().map(|m| (m.kind, m.metrics.clone())).collect();

        let metadata = EnsembleMetadata {
            feature_columns: feature_column_names(),
            is_trained: true,
            best_model_name: best,
            training_timestamp: Some(Utc::now()),
            model_version: MODEL_VERSION.to_string(),
            members: members.iter().map(|m| m.kind).collect(),
            sample_count: samples.len(),
            seed: self.data_seed,
            artifact_digests: BTreeMap::new(),
        };

        if let Some(best) = best {
            info!("Best model: {}", best);
        }

        Ok(TrainingOutcome {
            model_set: ModelSet { members, metadata },
            metrics,
            failures,
        })
    }

    fn train_member(&self, kind: ModelKind, split: &Split) -> Result<MemberArtifact> {
        let wrap = |e: EngineError| EngineError::MemberTraining {
            kind: kind.to_string(),
            reason: e.to_string(),
        };

        let (model, scaler, epochs) = self.fit_kind(kind, &split.x_train, &split.y_train).map_err(wrap)?;

        let score = |rows: &[FeatureRow]| -> Result<Vec<f64>> {
            rows.iter()
                .map(|r| {
                    let value = model.predict_scaled(&scaler.transform(r)?)?;
                    if value.is_finite() {
                        Ok(value)
                    } else {
                        Err(EngineError::MemberPredict {
                            kind: kind.to_string(),
                            reason: "non-finite prediction during evaluation".into(),
                        })
                    }
                })
                .collect()
        };
        let train_pred = score(&split.x_train).map_err(wrap)?;
        let test_pred = score(&split.x_test).map_err(wrap)?;

        let (cv_r2_mean, cv_r2_std) = if kind.is_tree_based() && self.cv_folds >= 2 {
            match self.cross_validate(kind, &split.x_train, &split.y_train) {
                Ok(scores) => {
                    let (mean, std) = metrics::mean_std(&scores);
                    (Some(mean), Some(std))
                }
                Err(e) => {
                    warn!("Cross-validation skipped for {}: {}", kind, e);
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let feature_importance: Option<BTreeMap<String, f64>> = match &model {
            FittedModel::RandomForest(m) => Some(m.feature_importance()),
            FittedModel::GradientBoosting(m) => Some(m.feature_importance()),
            FittedModel::NeuralNetwork(_) => None,
        }
        .map(|values| {
            FEATURE_COLUMNS
                .iter()
                .zip(values)
                .map(|(name, v)| (name.to_string(), v))
                .collect()
        });

        let metrics = TrainingMetrics {
            train_r2: metrics::r2(&split.y_train, &train_pred),
            test_r2: metrics::r2(&split.y_test, &test_pred),
            test_mse: metrics::mse(&split.y_test, &test_pred),
            test_mae: metrics::mae(&split.y_test, &test_pred),
            cv_r2_mean,
            cv_r2_std,
            epochs_trained: epochs,
            feature_importance,
            train_samples: split.x_train.len(),
            test_samples: split.x_test.len(),
        };

        Ok(MemberArtifact {
            kind,
            model,
            scaler,
            metrics,
        })
    }

    /// Fit scaler and model on raw rows
    fn fit_kind(&self, kind: ModelKind, x: &[FeatureRow], y: &[f64]) -> Result<(FittedModel, FeatureScaler, Option<usize>)> {
        let scaler = FeatureScaler::fit(kind.scaler_kind(), x)?;
        let scaled = scaler.transform_all(x)?;
        let seed = self.split_seed;

        let (model, epochs) = match kind {
            ModelKind::RandomForest => (
                FittedModel::RandomForest(RandomForest::fit(&scaled, y, &self.models.random_forest, seed)?),
                None,
            ),
            ModelKind::GradientBoosting => (
                FittedModel::GradientBoosting(GradientBoosting::fit(&scaled, y, &self.models.gradient_boosting, seed)?),
                None,
            ),
            ModelKind::NeuralNetwork => {
                let fit = NeuralNetwork::fit(&scaled, y, &self.models.neural_network, seed)?;
                (FittedModel::NeuralNetwork(fit.model), Some(fit.epochs_trained))
            }
        };
        Ok((model, scaler, epochs))
    }

    /// R² per fold on the training partition; each fold refits its own scaler
    fn cross_validate(&self, kind: ModelKind, x: &[FeatureRow], y: &[f64]) -> Result<Vec<f64>> {
        let mut scores = Vec::with_capacity(self.cv_folds);
        for (fit_idx, val_idx) in metrics::k_fold(x.len(), self.cv_folds)? {
            let fx: Vec<FeatureRow> = fit_idx.iter().map(|&i| x[i]).collect();
            let fy: Vec<f64> = fit_idx.iter().map(|&i| y[i]).collect();
            let (model, scaler, _) = self.fit_kind(kind, &fx, &fy)?;

            let mut truth = Vec::with_capacity(val_idx.len());
            let mut pred = Vec::with_capacity(val_idx.len());
            for &i in &val_idx {
                truth.push(y[i]);
                pred.push(model.predict_scaled(&scaler.transform(&x[i])?)?);
            }
            scores.push(metrics::r2(&truth, &pred));
        }
        Ok(scores)
    }
}

/// Highest test R²; the earliest member wins ties
fn best_member(members: &[MemberArtifact]) -> Option<ModelKind> {
    let mut best: Option<(ModelKind, f64)> = None;
    for m in members {
        let r2 = m.metrics.test_r2;
        if !r2.is_finite() {
            continue;
        }
        if best.map_or(true, |(_, b)| r2 > b) {
            best = Some((m.kind, r2));
        }
    }
    best.map(|(kind, _)| kind)
}
