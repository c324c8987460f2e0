//! Market Condition Classification
//!
//! Summarises the current feature vector into one discrete label used for
//! explainability in fee recommendations:
//! - **Extreme volatility**: violent swings with a large 24h move
//! - **High volatility (congested)**: volatile market on a busy network
//! - **Stable (liquid)**: calm market, volume above its weekly average
//! - **Network congested**: gas pressure without market stress
//!
//! Rules are evaluated top-down and the first match wins, so the order of the
//! checks in [`ConditionClassifier::classify`] is part of the contract.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ml::FeatureVector;

/// Market condition label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketCondition {
    /// Volatility > 20% and |24h change| > 15%
    ExtremeVolatility,
    /// Volatility > 12% while gas trend > 0.4
    HighVolatilityCongested,
    /// Volatility > 8%
    HighVolatility,
    /// Volatility < 2% with volume ratio > 1.2
    StableLiquid,
    /// Volatility < 3%
    Stable,
    /// Gas trend > 0.6
    NetworkCongested,
    /// Nothing stands out
    Moderate,
    /// No usable market data (fallback path only)
    Unknown,
}

impl MarketCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCondition::ExtremeVolatility => "extreme_volatility",
            MarketCondition::HighVolatilityCongested => "high_volatility_congested",
            MarketCondition::HighVolatility => "high_volatility",
            MarketCondition::StableLiquid => "stable_liquid",
            MarketCondition::Stable => "stable",
            MarketCondition::NetworkCongested => "network_congested",
            MarketCondition::Moderate => "moderate",
            MarketCondition::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MarketCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds of the decision table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionThresholds {
    /// Volatility above which the market may be extreme (percent)
    pub extreme_volatility: f64,
    /// |24h change| required alongside extreme volatility (percent)
    pub extreme_price_change: f64,
    /// Volatility for the congested-volatile label
    pub congested_volatility: f64,
    /// Gas trend for the congested-volatile label
    pub congested_gas_trend: f64,
    /// Volatility above which the market is "high volatility"
    pub high_volatility: f64,
    /// Volatility below which a liquid market is "stable_liquid"
    pub stable_liquid_volatility: f64,
    /// Volume ratio required for "stable_liquid"
    pub stable_liquid_volume_ratio: f64,
    /// Volatility below which the market is "stable"
    pub stable_volatility: f64,
    /// Gas trend above which the network is congested
    pub network_congested_gas_trend: f64,
}

impl Default for ConditionThresholds {
    fn default() -> Self {
        Self {
            extreme_volatility: 20.0,
            extreme_price_change: 15.0,
            congested_volatility: 12.0,
            congested_gas_trend: 0.4,
            high_volatility: 8.0,
            stable_liquid_volatility: 2.0,
            stable_liquid_volume_ratio: 1.2,
            stable_volatility: 3.0,
            network_congested_gas_trend: 0.6,
        }
    }
}

/// Decision-table classifier
#[derive(Debug, Clone, Default)]
pub struct ConditionClassifier {
    thresholds: ConditionThresholds,
}

impl ConditionClassifier {
    pub fn new(thresholds: ConditionThresholds) -> Self {
        Self { thresholds }
    }

    /// Classify a feature vector; first matching rule wins
    pub fn classify(&self, features: &FeatureVector) -> MarketCondition {
        let t = &self.thresholds;
        let volatility = features.volatility;
        let volume_ratio = features.volume_ratio;
        let gas_trend = features.gas_trend;
        let price_change_24h = features.price_change_24h.abs();

        if volatility > t.extreme_volatility && price_change_24h > t.extreme_price_change {
            MarketCondition::ExtremeVolatility
        } else if volatility > t.congested_volatility && gas_trend > t.congested_gas_trend {
            MarketCondition::HighVolatilityCongested
        } else if volatility > t.high_volatility {
            MarketCondition::HighVolatility
        } else if volatility < t.stable_liquid_volatility
            && volume_ratio > t.stable_liquid_volume_ratio
        {
            MarketCondition::StableLiquid
        } else if volatility < t.stable_volatility {
            MarketCondition::Stable
        } else if gas_trend > t.network_congested_gas_trend {
            MarketCondition::NetworkCongested
        } else {
            MarketCondition::Moderate
        }
    }
}

/// Classify with default thresholds
pub fn classify(features: &FeatureVector) -> MarketCondition {
    ConditionClassifier::default().classify(features)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(volatility: f64, volume_ratio: f64, gas_trend: f64, price_change_24h: f64) -> FeatureVector {
        FeatureVector {
            volatility,
            volume_ratio,
            gas_trend,
            price_change_24h,
            ..FeatureVector::default()
        }
    }

    #[test]
    fn test_extreme_volatility_requires_large_move() {
        assert_eq!(classify(&features(22.0, 1.0, 0.0, 18.0)), MarketCondition::ExtremeVolatility);
        assert_eq!(classify(&features(22.0, 1.0, 0.0, -18.0)), MarketCondition::ExtremeVolatility);
        // Same volatility, small move: falls through to high volatility
        assert_eq!(classify(&features(22.0, 1.0, 0.0, 5.0)), MarketCondition::HighVolatility);
    }

    #[test]
    fn test_rule_order_extreme_beats_congested() {
        // Matches both rule 1 and rule 2; rule 1 wins
        let f = features(25.0, 1.0, 0.9, 20.0);
        assert_eq!(classify(&f), MarketCondition::ExtremeVolatility);
    }

    #[test]
    fn test_high_volatility_congested() {
        assert_eq!(classify(&features(14.0, 1.0, 0.5, 2.0)), MarketCondition::HighVolatilityCongested);
        assert_eq!(classify(&features(10.0, 1.0, 0.5, 2.0)), MarketCondition::HighVolatility);
    }

    #[test]
    fn test_stable_labels() {
        assert_eq!(classify(&features(1.0, 1.5, 0.0, 0.2)), MarketCondition::StableLiquid);
        assert_eq!(classify(&features(1.0, 1.087, -0.03, 0.0)), MarketCondition::Stable);
        assert_eq!(classify(&features(2.5, 1.5, 0.0, 0.0)), MarketCondition::Stable);
    }

    #[test]
    fn test_rule_order_stable_beats_congested_network() {
        // Calm market on a congested network is still "stable"
        assert_eq!(classify(&features(1.5, 1.0, 0.8, 0.0)), MarketCondition::Stable);
        assert_eq!(classify(&features(5.0, 1.0, 0.8, 0.0)), MarketCondition::NetworkCongested);
    }

    #[test]
    fn test_moderate_default() {
        assert_eq!(classify(&features(5.0, 1.0, 0.1, 3.0)), MarketCondition::Moderate);
    }

    #[test]
    fn test_custom_thresholds() {
        let classifier = ConditionClassifier::new(ConditionThresholds {
            high_volatility: 4.0,
            ..Default::default()
        });
        assert_eq!(classifier.classify(&features(5.0, 1.0, 0.1, 3.0)), MarketCondition::HighVolatility);
    }

    #[test]
    fn test_condition_serialization() {
        let json = serde_json::to_string(&MarketCondition::HighVolatilityCongested).unwrap();
        assert_eq!(json, "\"high_volatility_congested\"");
        assert_eq!(MarketCondition::StableLiquid.to_string(), "stable_liquid");
    }
}
