//! DEX Fee Recommendation Engine
//!
//! Recommends a trading fee (in percent) for a decentralised exchange from a
//! snapshot of market conditions, using an ensemble of regressors trained on
//! synthetic market history.
//!
//! ## Architecture
//!
//! ```text
//! MarketDataSource → Feature codec → Ensemble (RF / GB / NN) → Confidence → Blend → PredictionResult
//!                                          ↑                                  ↑
//!                 Synthetic generator + fee oracle          Market condition + reasoning
//!                                          ↓
//!                                 ModelStore (generations on disk)
//! ```

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod ml;
pub mod regime;
pub mod storage;
pub mod types;

#[cfg(test)]
mod error_tests;
