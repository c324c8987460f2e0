//! Error types for the fee engine

use thiserror::Error;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Market data unavailable: {0}")]
    FeatureUnavailable(String),

    #[error("Training failed for {kind}: {reason}")]
    MemberTraining { kind: String, reason: String },

    #[error("Prediction failed for {kind}: {reason}")]
    MemberPredict { kind: String, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Insufficient data: need at least {required} samples, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Corrupt model: {0}")]
    CorruptModel(String),

    #[error("No ensemble member could be trained")]
    NoMembersTrained,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the error should route the caller to the fallback prediction
    pub fn is_unavailable(&self) -> bool {
        matches!(self, EngineError::FeatureUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
