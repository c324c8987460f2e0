//! Synthetic training data
//!
//! Simulates hourly market history with the patterns the fee heuristic cares
//! about: volatility clustering, intraday and weekday seasonality, volume and
//! gas reacting to volatility. Rows are labelled by the oracle afterwards.
//!
//! Output is bit-for-bit reproducible for a given seed. Row `i` sits `i` hours
//! after a fixed Monday 00:00 UTC anchor, so `hour_of_day = i % 24` and
//! `day_of_week = (i / 24) % 7`.
//!
//! ```ignore
//! let generator = SyntheticGenerator::new(SyntheticConfig::default(), 0.3);
//! let samples = generator.generate(10_000, 42);
//! ```

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Exp1, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::features::{self, FeatureRow, FeatureVector};
use super::oracle;

/// Hours in the 7-day moving-average window
pub const MA_WINDOW_HOURS: usize = 168;

/// Simulation constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Mean of the exponential volatility shock (percent)
    pub base_volatility: f64,
    /// Weight of the previous hour's volatility
    pub volatility_persistence: f64,
    pub min_volatility: f64,
    pub max_volatility: f64,
    /// Baseline 24h volume (USD)
    pub base_volume: f64,
    pub min_volume: f64,
    pub max_volume: f64,
    /// Baseline market cap (USD)
    pub base_market_cap: f64,
    pub min_market_cap: f64,
    pub max_market_cap: f64,
    /// Baseline gas price (gwei)
    pub base_gas: f64,
    pub min_gas: f64,
    pub max_gas: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            base_volatility: 4.0,
            volatility_persistence: 0.7,
            min_volatility: 0.5,
            max_volatility: 30.0,
            base_volume: 1.2e9,
            min_volume: 1e8,
            max_volume: 8e9,
            base_market_cap: 28e9,
            min_market_cap: 15e9,
            max_market_cap: 50e9,
            base_gas: 28.0,
            min_gas: 18.0,
            max_gas: 400.0,
        }
    }
}

/// One labelled training row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    #[serde(flatten)]
    pub features: FeatureVector,
    /// Oracle label (percent)
    pub optimal_fee: f64,
}

/// Split samples into model inputs and targets
pub fn to_matrix(samples: &[TrainingSample]) -> (Vec<FeatureRow>, Vec<f64>) {
    samples
        .iter()
        .map(|s| (s.features.to_array(), s.optimal_fee))
        .unzip()
}

#[derive(Debug, Clone)]
pub struct SyntheticGenerator {
    config: SyntheticConfig,
    base_fee: f64,
}

impl SyntheticGenerator {
    pub fn new(config: SyntheticConfig, base_fee: f64) -> Self {
        Self { config, base_fee }
    }

    /// Generate `n_samples` labelled rows from `seed`
    pub fn generate(&self, n_samples: usize, seed: u64) -> Vec<TrainingSample> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let rows = self.simulate(n_samples, &mut rng);

        let samples: Vec<TrainingSample> = rows
            .into_iter()
            .map(|features| TrainingSample {
                optimal_fee: oracle::labelled_fee(&features, self.base_fee, &mut rng),
                features,
            })
            .collect();

        debug!("Generated {} synthetic samples (seed {})", samples.len(), seed);
        samples
    }

    fn simulate(&self, n_samples: usize, rng: &mut ChaCha20Rng) -> Vec<FeatureVector> {
        let c = &self.config;
        let mut rows: Vec<FeatureVector> = Vec::with_capacity(n_samples);

        for i in 0..n_samples {
            let hour = (i % 24) as u32;
            let day = ((i / 24) % 7) as u32;
            let peak = matches!(hour, 14 | 15 | 16 | 21 | 22);
            let dead = matches!(hour, 2..=5);
            let weekend = day >= 5;

            // Volatility clustering
            let shock = exponential(rng, c.base_volatility);
            let mut volatility = match rows.last() {
                Some(prev) => c.volatility_persistence * prev.volatility + (1.0 - c.volatility_persistence) * shock,
                None => shock,
            };
            let hour_mult = if peak { 1.4 } else if dead { 0.6 } else { 1.0 };
            let day_mult = if day <= 2 { 1.2 } else if weekend { 0.7 } else { 1.0 };
            volatility = (volatility * hour_mult * day_mult).clamp(c.min_volatility, c.max_volatility);

            // Volume follows volatility and the trading session
            let session = match hour {
                14..=16 => 1.8,
                2..=5 => 0.3,
                _ => 1.0,
            };
            let volume_24h = (c.base_volume
                * (1.0 + (volatility / 10.0).min(2.0) * 0.5)
                * session
                * lognormal(rng, 0.4))
            .clamp(c.min_volume, c.max_volume);

            let price_change_1h = normal(rng, volatility / 15.0);
            let price_change_24h = normal(rng, volatility / 4.0);

            let market_cap = (c.base_market_cap * (1.0 + normal(rng, 0.02))).clamp(c.min_market_cap, c.max_market_cap);

            let mut gas_mult = if peak { 1.6 } else if dead { 0.7 } else { 1.0 };
            if weekend {
                gas_mult *= 0.8;
            }
            let gas_price_gwei = (c.base_gas
                * gas_mult
                * (1.0 + (volatility / 20.0).min(1.0) * 0.5)
                * lognormal(rng, 0.3))
            .clamp(c.min_gas, c.max_gas);

            let (volume_ma_7d, volatility_ma_7d) = if i >= MA_WINDOW_HOURS {
                let window = &rows[i - MA_WINDOW_HOURS..i];
                let n = MA_WINDOW_HOURS as f64;
                (
                    window.iter().map(|r| r.volume_24h).sum::<f64>() / n,
                    window.iter().map(|r| r.volatility).sum::<f64>() / n,
                )
            } else {
                let volume_jitter = rng.random_range(0.8..1.2);
                let volatility_jitter = rng.random_range(0.7..1.3);
                (volume_24h * volume_jitter, volatility * volatility_jitter)
            };

            rows.push(FeatureVector {
                volatility,
                volume_24h,
                price_change_1h,
                price_change_24h,
                market_cap,
                gas_price_gwei,
                liquidity_score: features::liquidity_score(volume_24h, market_cap),
                hour_of_day: hour as f64,
                day_of_week: day as f64,
                volume_ma_7d,
                volatility_ma_7d,
                price_momentum: price_change_24h * (1.0 + volatility / 20.0),
                volume_ratio: features::volume_ratio(volume_24h, volume_ma_7d),
                gas_trend: features::gas_trend(gas_price_gwei),
            });
        }

        rows
    }
}

fn exponential<R: Rng + ?Sized>(rng: &mut R, mean: f64) -> f64 {
    let e: f64 = Exp1.sample(rng);
    mean * e
}

fn normal<R: Rng + ?Sized>(rng: &mut R, std_dev: f64) -> f64 {
    let z: f64 = StandardNormal.sample(rng);
    std_dev * z
}

fn lognormal<R: Rng + ?Sized>(rng: &mut R, sigma: f64) -> f64 {
    let z: f64 = StandardNormal.sample(rng);
    (sigma * z).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> SyntheticGenerator {
        SyntheticGenerator::new(SyntheticConfig::default(), 0.3)
    }

    #[test]
    fn test_deterministic_for_seed() {
        let a = generator().generate(400, 42);
        let b = generator().generate(400, 42);
        assert_eq!(a, b);

        let c = generator().generate(400, 43);
        assert_ne!(a, c);
    }

    #[test]
    fn test_ranges() {
        let c = SyntheticConfig::default();
        for s in generator().generate(1000, 1) {
            let f = s.features;
            assert!(f.volatility >= c.min_volatility && f.volatility <= c.max_volatility);
            assert!(f.volume_24h >= c.min_volume && f.volume_24h <= c.max_volume);
            assert!(f.market_cap >= c.min_market_cap && f.market_cap <= c.max_market_cap);
            assert!(f.gas_price_gwei >= c.min_gas && f.gas_price_gwei <= c.max_gas);
            assert!((0.0..=23.0).contains(&f.hour_of_day));
            assert!((0.0..=6.0).contains(&f.day_of_week));
            assert!(s.optimal_fee >= oracle::MIN_FEE && s.optimal_fee <= oracle::MAX_FEE);
            assert!(f.is_finite());
        }
    }

    #[test]
    fn test_calendar_from_anchor() {
        let rows = generator().generate(200, 3);
        assert_eq!(rows[0].features.hour_of_day, 0.0);
        assert_eq!(rows[0].features.day_of_week, 0.0);
        assert_eq!(rows[25].features.hour_of_day, 1.0);
        assert_eq!(rows[25].features.day_of_week, 1.0);
        assert_eq!(rows[24 * 6 + 5].features.day_of_week, 6.0);
    }

    #[test]
    fn test_moving_average_uses_previous_week() {
        let rows = generator().generate(MA_WINDOW_HOURS + 5, 9);
        let i = MA_WINDOW_HOURS + 2;
        let expected: f64 = rows[i - MA_WINDOW_HOURS..i]
            .iter()
            .map(|r| r.features.volume_24h)
            .sum::<f64>()
            / MA_WINDOW_HOURS as f64;
        assert!((rows[i].features.volume_ma_7d - expected).abs() / expected < 1e-12);
        assert!((rows[i].features.volume_ratio - rows[i].features.volume_24h / expected).abs() < 1e-9);
    }

    #[test]
    fn test_labels_track_oracle() {
        for s in generator().generate(300, 5) {
            let clean = oracle::optimal_fee(&s.features, 0.3);
            assert!((s.optimal_fee - clean).abs() <= 3.0 * oracle::LABEL_NOISE_STD + 1e-12);
        }
    }

    #[test]
    fn test_to_matrix() {
        let samples = generator().generate(10, 1);
        let (x, y) = to_matrix(&samples);
        assert_eq!(x.len(), 10);
        assert_eq!(y[3], samples[3].optimal_fee);
        assert_eq!(x[3][0], samples[3].features.volatility);
    }
}
