//! Configuration management
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! TOML file, and `FEE_ENGINE__<SECTION>__<KEY>` environment variables (a
//! `.env` file is honoured).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::ml::{ModelsConfig, SyntheticConfig};
use crate::regime::ConditionThresholds;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "FEE_ENGINE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub training: TrainingConfig,
    pub models: ModelsConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Engine behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base trading fee in percent
    pub base_fee_rate: f64,
    /// Train eagerly when no persisted models exist
    pub train_on_startup: bool,
    /// Gas price assumed when the snapshot has none (gwei)
    pub default_gas_price_gwei: f64,
    /// Market condition decision table
    pub conditions: ConditionThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_fee_rate: 0.3,
            train_on_startup: false,
            default_gas_price_gwei: 28.0,
            conditions: ConditionThresholds::default(),
        }
    }
}

/// Training run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Synthetic rows generated per run
    pub sample_count: usize,
    /// Generator seed
    pub seed: u64,
    /// Share of rows held out for evaluation
    pub test_fraction: f64,
    /// Seed of the train/test shuffle and of model fitting
    pub split_seed: u64,
    /// Cross-validation folds for tree members (0 disables)
    pub cv_folds: usize,
    pub synthetic: SyntheticConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            sample_count: 10_000,
            seed: 42,
            test_fraction: 0.2,
            split_seed: 42,
            cv_folds: 5,
            synthetic: SyntheticConfig::default(),
        }
    }
}

/// Model persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub enabled: bool,
    pub models_dir: PathBuf,
    /// Generations kept on disk, including the current one
    pub keep_generations: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            models_dir: PathBuf::from("models/production"),
            keep_generations: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        Ok(config)
    }
}
