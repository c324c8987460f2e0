//! Shared record types: market snapshots in, fee recommendations out

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::regime::MarketCondition;

/// Point-in-time market state handed over by the market-data collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketDataSnapshot {
    /// Price/volume record; absent when the price API did not answer
    #[serde(default)]
    pub price: Option<PriceData>,
    /// Network conditions (gas); optional
    #[serde(default)]
    pub network: Option<NetworkData>,
    /// When the snapshot was taken
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

/// Price and volume sub-record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceData {
    /// Spot price in USD
    pub spot_price: f64,
    /// 24h traded volume in USD
    pub volume_24h: f64,
    /// 24h price change in percent
    #[serde(default)]
    pub price_change_24h: f64,
    /// 1h price change in percent, if the source reports it
    #[serde(default)]
    pub price_change_1h: Option<f64>,
    /// Market capitalisation in USD
    #[serde(default)]
    pub market_cap: f64,
    /// Volatility in percent; defaults to |24h change| when missing
    #[serde(default)]
    pub volatility: Option<f64>,
    /// Real 7-day volume average, when historical aggregates are available
    #[serde(default)]
    pub volume_ma_7d: Option<f64>,
    /// Real 7-day volatility average
    #[serde(default)]
    pub volatility_ma_7d: Option<f64>,
}

/// Network sub-record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkData {
    pub gas_price_gwei: f64,
}

impl MarketDataSnapshot {
    /// Snapshot with a price record observed now
    pub fn with_price(price: PriceData) -> Self {
        Self {
            price: Some(price),
            network: None,
            observed_at: Utc::now(),
        }
    }

    pub fn gas_price(mut self, gas_price_gwei: f64) -> Self {
        self.network = Some(NetworkData { gas_price_gwei });
        self
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }
}

/// Fee recommendation returned for every prediction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Recommended fee in percent (4 decimals)
    pub recommended_fee: f64,
    /// Overall confidence (0-1)
    pub confidence: f64,
    /// Human-readable justification
    pub reasoning: String,
    pub market_condition: MarketCondition,
    /// Member whose prediction became the recommendation, "ensemble" or "fallback"
    pub primary_model: String,
    /// Confidence-weighted mean of all member predictions
    pub ensemble_prediction: f64,
    pub all_predictions: BTreeMap<String, f64>,
    pub model_confidences: BTreeMap<String, f64>,
    pub features_used: usize,
    pub prediction_timestamp: DateTime<Utc>,
}

impl PredictionResult {
    pub fn is_fallback(&self) -> bool {
        self.primary_model == FALLBACK_MODEL
    }
}

/// `primary_model` value of the fallback path
pub const FALLBACK_MODEL: &str = "fallback";

/// `primary_model` value when the best member was unavailable
pub const ENSEMBLE_MODEL: &str = "ensemble";

/// Round to a fixed number of decimals for presentation
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
