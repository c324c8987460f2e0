//! Machine learning core of the fee engine
//!
//! - Feature codec shared by training and live inference
//! - Synthetic market history labelled by a heuristic fee oracle
//! - Ensemble of regressors (random forest, gradient boosting, neural net)
//! - Confidence scoring and blending of member predictions
//! - Plain-language reasoning for the final recommendation

pub mod blend;
pub mod boosting;
pub mod confidence;
pub mod ensemble;
pub mod features;
pub mod forest;
pub mod metrics;
pub mod neural;
pub mod oracle;
pub mod reasoning;
pub mod scaler;
pub mod synthetic;
pub mod tree;

#[cfg(test)]
mod tests;

pub use blend::{blend, BlendOutcome, PrimarySource};
pub use ensemble::{
    EnsembleMetadata, EnsembleTrainer, FittedModel, MemberArtifact, MemberFailure, ModelKind, ModelSet,
    ModelsConfig, TrainingOutcome, MODEL_VERSION,
};
pub use features::{encode, FeatureRow, FeatureVector, FEATURE_COLUMNS, FEATURE_COUNT};
pub use metrics::TrainingMetrics;
pub use oracle::{optimal_fee, MAX_FEE, MIN_FEE};
pub use scaler::{FeatureScaler, ScalerKind};
pub use synthetic::{SyntheticConfig, SyntheticGenerator, TrainingSample};
