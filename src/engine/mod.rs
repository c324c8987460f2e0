//! Fee recommendation engine
//!
//! Ties the pipeline together:
//!
//! ```text
//! MarketDataSnapshot -> codec -> ensemble members -> confidence -> blend
//!                                                      -> condition + reasoning -> PredictionResult
//! ```
//!
//! The engine is an explicit service object meant to be shared as
//! `Arc<FeeEngine>`. The published model set is an `Arc<ModelSet>` behind a
//! short-lived lock: predictions clone the `Arc` and run without holding it,
//! and a retrain swaps in a complete new set. Training itself is serialised
//! by an async gate and runs on the blocking pool.
//!
//! Usage:
//! ```ignore
//! let engine = FeeEngine::load_or_init(Config::load(None)?).await?;
//! let result = engine.predict(&snapshot).await;
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::data::MarketDataSource;
use crate::error::{EngineError, Result};
use crate::ml::features::{encode_with_gas_default, feature_column_names, FeatureVector, FEATURE_COUNT};
use crate::ml::{
    blend, confidence, reasoning, EnsembleTrainer, MemberFailure, ModelKind, ModelSet, PrimarySource,
    SyntheticGenerator, TrainingMetrics,
};
use crate::regime::{ConditionClassifier, MarketCondition};
use crate::storage::ModelStore;
use crate::types::{round_to, MarketDataSnapshot, PredictionResult, ENSEMBLE_MODEL, FALLBACK_MODEL};


/// Reasoning attached to fallback results
pub const FALLBACK_REASONING: &str = "Using fallback base fee due to insufficient data or model errors";

/// Confidence attached to fallback results
pub const FALLBACK_CONFIDENCE: f64 = 0.4;

/// Model lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// No models loaded or trained yet
    Uninitialized,
    /// First training run in progress
    Training,
    /// A model set is published
    Ready,
}

/// Progress of the most recent explicit retrain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetrainStatus {
    Idle,
    Running {
        started_at: DateTime<Utc>,
        sample_count: usize,
    },
    Completed {
        finished_at: DateTime<Utc>,
        best_model: Option<ModelKind>,
        metrics: BTreeMap<ModelKind, TrainingMetrics>,
    },
    Failed {
        finished_at: DateTime<Utc>,
        error: String,
    },
}

impl RetrainStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, RetrainStatus::Running { .. })
    }
}

/// Overrides for one training run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrainRequest {
    pub sample_count: Option<usize>,
    pub seed: Option<u64>,
}

/// Snapshot of what the engine currently serves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub state: EngineState,
    pub is_trained: bool,
    pub best_model: Option<ModelKind>,
    pub available_models: Vec<ModelKind>,
    pub feature_columns: Vec<String>,
    pub training_timestamp: Option<DateTime<Utc>>,
    pub model_version: Option<String>,
    pub sample_count: Option<usize>,
    pub retrain_status: RetrainStatus,
    pub metrics: BTreeMap<ModelKind, TrainingMetrics>,
}

pub struct FeeEngine {
    config: Config,
    store: Option<ModelStore>,
    classifier: ConditionClassifier,
    models: RwLock<Option<Arc<ModelSet>>>,
    state: RwLock<EngineState>,
    retrain_status: RwLock<RetrainStatus>,
    /// Held for the whole generate -> fit -> persist -> publish sequence
    training_gate: tokio::sync::Mutex<()>,
}

impl FeeEngine {
    pub fn new(config: Config) -> Self {
        let store = config
            .storage
            .enabled
            .then(|| ModelStore::new(&config.storage.models_dir, config.storage.keep_generations));
        let classifier = ConditionClassifier::new(config.engine.conditions.clone());

        Self {
            config,
            store,
            classifier,
            models: RwLock::new(None),
            state: RwLock::new(EngineState::Uninitialized),
            retrain_status: RwLock::new(RetrainStatus::Idle),
            training_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Build an engine, load persisted models and optionally train eagerly
    pub async fn load_or_init(config: Config) -> Result<Arc<Self>> {
        let engine = Arc::new(Self::new(config));

        if let Some(store) = engine.store.clone() {
            let loaded = tokio::task::spawn_blocking(move || store.load())
                .await
                .map_err(|e| EngineError::Internal(format!("model loading task failed: {e}")))?;
            match loaded {
                Ok(Some(set)) => {
                    engine.publish(set);
                }
                Ok(None) => debug!("No persisted models found"),
                Err(e) => warn!("Failed to load persisted models: {}", e),
            }
        }

        if !engine.is_trained() && engine.config.engine.train_on_startup {
            engine.ensure_trained().await?;
        }

        Ok(engine)
    }

    pub fn store(&self) -> Option<&ModelStore> {
        self.store.as_ref()
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    pub fn is_trained(&self) -> bool {
        self.models.read().is_some()
    }

    /// Currently published model set
    pub fn model_set(&self) -> Option<Arc<ModelSet>> {
        self.models.read().clone()
    }

    pub fn retrain_status(&self) -> RetrainStatus {
        self.retrain_status.read().clone()
    }

    fn publish(&self, set: ModelSet) -> Arc<ModelSet> {
        let set = Arc::new(set);
        *self.models.write() = Some(Arc::clone(&set));
        *self.state.write() = EngineState::Ready;
        set
    }

    /// Return the published set, training one first if there is none
    pub async fn ensure_trained(&self) -> Result<Arc<ModelSet>> {
        if let Some(set) = self.model_set() {
            return Ok(set);
        }

        let _gate = self.training_gate.lock().await;
        // Another request may have trained while we waited
        if let Some(set) = self.model_set() {
            return Ok(set);
        }

        info!("No trained models available, training on first use");
        let training = &self.config.training;
        let (set, _) = self.train_locked(training.sample_count, training.seed).await?;
        Ok(set)
    }

    /// Generate, fit, persist and publish; the caller holds the training gate
    async fn train_locked(
        &self,
        sample_count: usize,
        seed: u64,
    ) -> Result<(Arc<ModelSet>, BTreeMap<ModelKind, TrainingMetrics>)> {
        if !self.is_trained() {
            *self.state.write() = EngineState::Training;
        }

        let config = self.config.clone();
        let store = self.store.clone();
        let joined = tokio::task::spawn_blocking(move || train_and_persist(&config, store.as_ref(), sample_count, seed))
            .await
            .map_err(|e| EngineError::Internal(format!("training task failed: {e}")));

        match joined.and_then(|r| r) {
            Ok((set, metrics)) => Ok((self.publish(set), metrics)),
            Err(e) => {
                if !self.is_trained() {
                    *self.state.write() = EngineState::Uninitialized;
                }
                Err(e)
            }
        }
    }

    /// Retrain now and wait for the result
    pub async fn retrain(&self, request: RetrainRequest) -> Result<BTreeMap<ModelKind, TrainingMetrics>> {
        let sample_count = request.sample_count.unwrap_or(self.config.training.sample_count);
        let seed = request.seed.unwrap_or(self.config.training.seed);

        let _gate = self.training_gate.lock().await;
        *self.retrain_status.write() = RetrainStatus::Running {
            started_at: Utc::now(),
            sample_count,
        };
        info!("Retraining with {} samples (seed {})", sample_count, seed);

        match self.train_locked(sample_count, seed).await {
            Ok((set, metrics)) => {
                *self.retrain_status.write() = RetrainStatus::Completed {
                    finished_at: Utc::now(),
                    best_model: set.best_model(),
                    metrics: metrics.clone(),
                };
                Ok(metrics)
            }
            Err(e) => {
                warn!("Retraining failed, keeping previous models: {}", e);
                *self.retrain_status.write() = RetrainStatus::Failed {
                    finished_at: Utc::now(),
                    error: e.to_string(),
                };
                Err(e)
            }
        }
    }

    /// Start a retrain in the background; false if one is already running
    pub fn spawn_retrain(self: &Arc<Self>, request: RetrainRequest) -> bool {
        {
            let mut status = self.retrain_status.write();
            if status.is_running() {
                return false;
            }
            *status = RetrainStatus::Running {
                started_at: Utc::now(),
                sample_count: request.sample_count.unwrap_or(self.config.training.sample_count),
            };
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.retrain(request).await {
                debug!("Background retrain ended with error: {}", e);
            }
        });
        true
    }

    /// Recommend a fee for a snapshot; never fails
    pub async fn predict(&self, snapshot: &MarketDataSnapshot) -> PredictionResult {
        let features = match encode_with_gas_default(snapshot, self.config.engine.default_gas_price_gwei) {
            Ok(f) => f,
            Err(e) => {
                warn!("Cannot build features: {}", e);
                return self.fallback();
            }
        };

        let set = match self.ensure_trained().await {
            Ok(set) => set,
            Err(e) => {
                warn!("No usable models: {}", e);
                return self.fallback();
            }
        };

        self.predict_with(&set, &features)
    }

    /// Fetch a snapshot from `source` and recommend a fee
    pub async fn recommend(&self, source: &dyn MarketDataSource) -> PredictionResult {
        match source.snapshot().await {
            Ok(snapshot) => self.predict(&snapshot).await,
            Err(e) => {
                warn!("Market data unavailable: {}", e);
                self.fallback()
            }
        }
    }

    fn predict_with(&self, set: &ModelSet, features: &FeatureVector) -> PredictionResult {
        let (predictions, failures) = set.predict_all(features);
        log_failures(&failures);

        let confidences = confidence::score_all(predictions.keys(), features);
        let Some(outcome) = blend(&predictions, &confidences, set.best_model()) else {
            warn!("Every model failed to predict");
            return self.fallback();
        };

        let base_fee = self.config.engine.base_fee_rate;
        let reasons = reasoning::explain(features, &predictions, outcome.final_fee, base_fee);
        let primary_model = match outcome.primary {
            PrimarySource::Member(kind) => kind.to_string(),
            PrimarySource::Ensemble => ENSEMBLE_MODEL.to_string(),
        };

        PredictionResult {
            recommended_fee: round_to(outcome.final_fee, 4),
            confidence: round_to(outcome.confidence, 3),
            reasoning: reasoning::render(&reasons),
            market_condition: self.classifier.classify(features),
            primary_model,
            ensemble_prediction: round_to(outcome.ensemble_fee, 4),
            all_predictions: predictions
                .iter()
                .map(|(k, v)| (k.to_string(), round_to(*v, 4)))
                .collect(),
            model_confidences: confidences
                .iter()
                .map(|(k, v)| (k.to_string(), round_to(*v, 3)))
                .collect(),
            features_used: FEATURE_COUNT,
            prediction_timestamp: Utc::now(),
        }
    }

    /// Base-fee recommendation used whenever the models cannot answer
    pub fn fallback(&self) -> PredictionResult {
        let base_fee = round_to(self.config.engine.base_fee_rate, 4);
        PredictionResult {
            recommended_fee: base_fee,
            confidence: FALLBACK_CONFIDENCE,
            reasoning: FALLBACK_REASONING.to_string(),
            market_condition: MarketCondition::Unknown,
            primary_model: FALLBACK_MODEL.to_string(),
            ensemble_prediction: base_fee,
            all_predictions: BTreeMap::new(),
            model_confidences: BTreeMap::new(),
            features_used: 0,
            prediction_timestamp: Utc::now(),
        }
    }

    pub fn info(&self) -> ModelInfo {
        let set = self.model_set();
        let meta = set.as_ref().map(|s| &s.metadata);

        ModelInfo {
            state: self.state(),
            is_trained: set.is_some(),
            best_model: meta.and_then(|m| m.best_model_name),
            available_models: set.as_ref().map(|s| s.kinds()).unwrap_or_default(),
            feature_columns: feature_column_names(),
            training_timestamp: meta.and_then(|m| m.training_timestamp),
            model_version: meta.map(|m| m.model_version.clone()),
            sample_count: meta.map(|m| m.sample_count),
            retrain_status: self.retrain_status(),
            metrics: set.as_ref().map(|s| s.metrics()).unwrap_or_default(),
        }
    }
}

fn log_failures(failures: &[MemberFailure]) {
    for failure in failures {
        debug!("Model {} skipped for this prediction: {}", failure.kind, failure.reason);
    }
}

/// CPU-bound half of a training run
fn train_and_persist(
    config: &Config,
    store: Option<&ModelStore>,
    sample_count: usize,
    seed: u64,
) -> Result<(ModelSet, BTreeMap<ModelKind, TrainingMetrics>)> {
    let training = &config.training;
    let generator = SyntheticGenerator::new(training.synthetic.clone(), config.engine.base_fee_rate);
    let samples = generator.generate(sample_count, seed);

    let outcome = EnsembleTrainer::new(config.models.clone())
        .with_split(training.test_fraction, training.split_seed)
        .with_cv_folds(training.cv_folds)
        .with_data_seed(seed)
        .train(&samples)?;

    for failure in &outcome.failures {
        warn!("Model {} was not trained: {}", failure.kind, failure.reason);
    }

    let set = outcome.model_set;

    if let Some(store) = store {
        if let Err(e) = store.save(&set) {
            warn!("Failed to persist models, keeping them in memory: {}", e);
        }
    }

    Ok((set, outcome.metrics))
}
