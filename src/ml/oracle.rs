//! Optimal-fee oracle
//!
//! Heuristic "ground truth" used to label synthetic training rows. Seven
//! piecewise factors are blended with fixed weights and scaled by the base
//! fee rate:
//!
//! | factor     | weight |
//! |------------|--------|
//! | volatility | 0.35   |
//! | volume     | 0.25   |
//! | gas        | 0.20   |
//! | time       | 0.10   |
//! | momentum   | 0.05   |
//! | liquidity  | 0.03   |
//! | stability  | 0.02   |
//!
//! [`optimal_fee`] is pure. [`labelled_fee`] adds the label noise.

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use super::features::FeatureVector;

/// Lowest fee the engine will ever recommend (percent)
pub const MIN_FEE: f64 = 0.05;
/// Highest fee the engine will ever recommend (percent)
pub const MAX_FEE: f64 = 2.5;

/// Standard deviation of the label noise
pub const LABEL_NOISE_STD: f64 = 0.015;

/// Clamp a fee into the business range
pub fn clamp_fee(fee: f64) -> f64 {
    fee.clamp(MIN_FEE, MAX_FEE)
}

/// Per-factor multipliers for one feature vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeFactors {
    pub volatility: f64,
    pub volume: f64,
    pub gas: f64,
    pub time: f64,
    pub momentum: f64,
    pub liquidity: f64,
    pub stability: f64,
}

impl FeeFactors {
    pub fn compute(v: &FeatureVector) -> Self {
        Self {
            volatility: volatility_factor(v.volatility),
            volume: volume_factor(v.volume_ratio),
            gas: gas_factor(v.gas_trend),
            time: time_factor(v.hour_of_day, v.day_of_week),
            momentum: 1.0 + (v.price_momentum.abs() / 10.0).min(0.3),
            liquidity: liquidity_factor(v.liquidity_score),
            stability: stability_factor(v.price_change_24h.abs()),
        }
    }

    /// Weighted blend, before the base fee is applied
    pub fn weighted(&self) -> f64 {
        self.volatility * 0.35
            + self.volume * 0.25
            + self.gas * 0.20
            + self.time * 0.10
            + self.momentum * 0.05
            + self.liquidity * 0.03
            + self.stability * 0.02
    }
}

fn volatility_factor(volatility: f64) -> f64 {
    if volatility > 15.0 {
        1.5 + (volatility - 15.0) * 0.08
    } else if volatility > 8.0 {
        1.2 + (volatility - 8.0) * 0.04
    } else if volatility < 2.0 {
        0.7 + volatility * 0.1
    } else {
        0.9 + (volatility - 2.0) * 0.05
    }
}

fn volume_factor(volume_ratio: f64) -> f64 {
    if volume_ratio > 1.5 {
        0.85
    } else if volume_ratio > 1.2 {
        0.95 - (volume_ratio - 1.2) * 0.33
    } else if volume_ratio < 0.6 {
        1.25
    } else if volume_ratio < 0.8 {
        1.1 + (0.8 - volume_ratio) * 0.75
    } else {
        1.0
    }
}

fn gas_factor(gas_trend: f64) -> f64 {
    if gas_trend > 0.5 {
        1.3 + gas_trend * 0.4
    } else if gas_trend > 0.2 {
        1.1 + gas_trend * 0.5
    } else if gas_trend < -0.2 {
        0.9 + gas_trend * 0.2
    } else {
        1.0 + gas_trend * 0.3
    }
}

fn time_factor(hour: f64, day: f64) -> f64 {
    let hour = hour as u32;
    let mut factor = match hour {
        14..=16 => 1.15,
        21 | 22 => 1.08,
        2..=5 => 0.85,
        _ => 1.0,
    };
    if day >= 5.0 {
        factor *= 0.92;
    }
    factor
}

fn liquidity_factor(liquidity_score: f64) -> f64 {
    if liquidity_score > 8.0 {
        0.9
    } else if liquidity_score > 4.0 {
        0.95
    } else if liquidity_score < 1.0 {
        1.2
    } else if liquidity_score < 2.0 {
        1.1
    } else {
        1.0
    }
}

fn stability_factor(price_change_24h: f64) -> f64 {
    if price_change_24h > 10.0 {
        1.1 + (price_change_24h - 10.0) * 0.02
    } else if price_change_24h < 1.0 {
        0.95
    } else {
        1.0
    }
}

/// Noise-free optimal fee for `v` at the given base fee rate
pub fn optimal_fee(v: &FeatureVector, base_fee: f64) -> f64 {
    clamp_fee(base_fee * FeeFactors::compute(v).weighted())
}

/// Optimal fee plus Gaussian label noise bounded to three standard deviations
pub fn labelled_fee<R: Rng + ?Sized>(v: &FeatureVector, base_fee: f64, rng: &mut R) -> f64 {
    let z: f64 = StandardNormal.sample(rng);
    let bound = 3.0 * LABEL_NOISE_STD;
    let noise = (z * LABEL_NOISE_STD).clamp(-bound, bound);
    clamp_fee(base_fee * FeeFactors::compute(v).weighted() + noise)
}
