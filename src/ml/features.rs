//! Feature codec
//!
//! Turns a [`MarketDataSnapshot`] into the fixed 14-column [`FeatureVector`]
//! the ensemble is trained on. Column order is shared by the generator, the
//! scalers, the persisted metadata and the live path.
//!
//! Where the snapshot lacks a historical aggregate the codec falls back to an
//! approximation of it (e.g. 7-day volume average = 0.92 x current volume).
//! Real aggregates are always preferred when supplied.

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::MarketDataSnapshot;

/// Number of model inputs
pub const FEATURE_COUNT: usize = 14;

/// Column names in model input order
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] = [
    "volatility",
    "volume_24h",
    "price_change_1h",
    "price_change_24h",
    "market_cap",
    "gas_price_gwei",
    "liquidity_score",
    "hour_of_day",
    "day_of_week",
    "volume_ma_7d",
    "volatility_ma_7d",
    "price_momentum",
    "volume_ratio",
    "gas_trend",
];

/// Gas price treated as "normal" (gwei)
pub const GAS_BASELINE_GWEI: f64 = 28.0;

/// Normalisation span of the gas trend (400 - 28 gwei)
pub const GAS_TREND_SPAN: f64 = 372.0;

/// Approximation ratios used when aggregates are missing
const PRICE_CHANGE_1H_RATIO: f64 = 0.08;
const VOLUME_MA_RATIO: f64 = 0.92;
const VOLATILITY_MA_RATIO: f64 = 1.08;
const LIVE_MOMENTUM_RATIO: f64 = 1.15;

/// One row of model input
pub type FeatureRow = [f64; FEATURE_COUNT];

/// Named model inputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Volatility in percent
    pub volatility: f64,
    /// 24h volume (USD)
    pub volume_24h: f64,
    pub price_change_1h: f64,
    pub price_change_24h: f64,
    pub market_cap: f64,
    pub gas_price_gwei: f64,
    /// Volume as a percentage of market cap
    pub liquidity_score: f64,
    /// 0..=23, UTC
    pub hour_of_day: f64,
    /// 0..=6, Monday = 0
    pub day_of_week: f64,
    pub volume_ma_7d: f64,
    pub volatility_ma_7d: f64,
    pub price_momentum: f64,
    /// Current volume over its 7-day average
    pub volume_ratio: f64,
    /// Gas price normalised against the 28 gwei baseline
    pub gas_trend: f64,
}

impl FeatureVector {
    pub fn to_array(&self) -> FeatureRow {
        [
            self.volatility,
            self.volume_24h,
            self.price_change_1h,
            self.price_change_24h,
            self.market_cap,
            self.gas_price_gwei,
            self.liquidity_score,
            self.hour_of_day,
            self.day_of_week,
            self.volume_ma_7d,
            self.volatility_ma_7d,
            self.price_momentum,
            self.volume_ratio,
            self.gas_trend,
        ]
    }

    pub fn from_array(row: &FeatureRow) -> Self {
        Self {
            volatility: row[0],
            volume_24h: row[1],
            price_change_1h: row[2],
            price_change_24h: row[3],
            market_cap: row[4],
            gas_price_gwei: row[5],
            liquidity_score: row[6],
            hour_of_day: row[7],
            day_of_week: row[8],
            volume_ma_7d: row[9],
            volatility_ma_7d: row[10],
            price_momentum: row[11],
            volume_ratio: row[12],
            gas_trend: row[13],
        }
    }

    /// Whether every column is a finite number
    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

/// Column names as owned strings, for metadata
pub fn feature_column_names() -> Vec<String> {
    FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect()
}

/// Volume as a percentage of market cap; 0 without a market cap
pub fn liquidity_score(volume_24h: f64, market_cap: f64) -> f64 {
    if market_cap > 0.0 {
        volume_24h / market_cap.max(1.0) * 100.0
    } else {
        0.0
    }
}

/// Current volume relative to its 7-day average; 1 when the average is unknown
pub fn volume_ratio(volume_24h: f64, volume_ma_7d: f64) -> f64 {
    if volume_ma_7d > 0.0 {
        volume_24h / volume_ma_7d
    } else {
        1.0
    }
}

pub fn gas_trend(gas_price_gwei: f64) -> f64 {
    (gas_price_gwei - GAS_BASELINE_GWEI) / GAS_TREND_SPAN
}

/// Encode a snapshot using the 28 gwei baseline for missing gas data
pub fn encode(snapshot: &MarketDataSnapshot) -> Result<FeatureVector> {
    encode_with_gas_default(snapshot, GAS_BASELINE_GWEI)
}

/// Encode a snapshot, substituting `default_gas` when the network record is
/// missing or its gas price is not a positive finite number
pub fn encode_with_gas_default(snapshot: &MarketDataSnapshot, default_gas: f64) -> Result<FeatureVector> {
    let price = snapshot
        .price
        .as_ref()
        .ok_or_else(|| EngineError::FeatureUnavailable("snapshot has no price record".into()))?;

    if !price.spot_price.is_finite() || price.spot_price <= 0.0 {
        return Err(EngineError::FeatureUnavailable(format!(
            "invalid spot price {}",
            price.spot_price
        )));
    }
    if !price.volume_24h.is_finite() || price.volume_24h < 0.0 {
        return Err(EngineError::FeatureUnavailable(format!(
            "invalid 24h volume {}",
            price.volume_24h
        )));
    }

    let finite_or = |value: Option<f64>, fallback: f64| value.filter(|v| v.is_finite()).unwrap_or(fallback);

    let price_change_24h = if price.price_change_24h.is_finite() { price.price_change_24h } else { 0.0 };
    let market_cap = if price.market_cap.is_finite() { price.market_cap } else { 0.0 };
    let volume_24h = price.volume_24h;

    let volatility = finite_or(price.volatility, price_change_24h.abs());
    let price_change_1h = finite_or(price.price_change_1h, price_change_24h * PRICE_CHANGE_1H_RATIO);
    let volume_ma_7d = finite_or(price.volume_ma_7d, volume_24h * VOLUME_MA_RATIO);
    let volatility_ma_7d = finite_or(price.volatility_ma_7d, volatility * VOLATILITY_MA_RATIO);

    let gas_price_gwei = snapshot
        .network
        .as_ref()
        .map(|n| n.gas_price_gwei)
        .filter(|g| g.is_finite() && *g > 0.0)
        .unwrap_or(default_gas);

    let at = snapshot.observed_at;

    Ok(FeatureVector {
        volatility,
        volume_24h,
        price_change_1h,
        price_change_24h,
        market_cap,
        gas_price_gwei,
        liquidity_score: liquidity_score(volume_24h, market_cap),
        hour_of_day: at.hour() as f64,
        day_of_week: at.weekday().num_days_from_monday() as f64,
        volume_ma_7d,
        volatility_ma_7d,
        price_momentum: price_change_24h * LIVE_MOMENTUM_RATIO,
        volume_ratio: volume_ratio(volume_24h, volume_ma_7d),
        gas_trend: gas_trend(gas_price_gwei),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NetworkData, PriceData};
    use chrono::{TimeZone, Utc};

    fn snapshot() -> MarketDataSnapshot {
        MarketDataSnapshot::with_price(PriceData {
            spot_price: 2500.0,
            volume_24h: 1_000_000_000.0,
            price_change_24h: -4.0,
            market_cap: 20_000_000_000.0,
            ..Default::default()
        })
        // Wednesday 15:00 UTC
        .observed_at(Utc.with_ymd_and_hms(2024, 1, 3, 15, 0, 0).unwrap())
    }

    #[test]
    fn test_column_order_matches_array() {
        let v = FeatureVector {
            volatility: 1.0,
            gas_trend: 14.0,
            hour_of_day: 8.0,
            ..Default::default()
        };
        let row = v.to_array();
        assert_eq!(row[0], 1.0);
        assert_eq!(row[7], 8.0);
        assert_eq!(row[13], 14.0);
        assert_eq!(FeatureVector::from_array(&row), v);
        assert_eq!(FEATURE_COLUMNS[7], "hour_of_day");
        assert_eq!(FEATURE_COLUMNS[13], "gas_trend");
    }

    #[test]
    fn test_encode_derivations() {
        let f = encode(&snapshot()).unwrap();
        assert_eq!(f.volatility, 4.0);
        assert!((f.price_change_1h - (-0.32)).abs() < 1e-12);
        assert!((f.volume_ma_7d - 920_000_000.0).abs() < 1e-3);
        assert!((f.volatility_ma_7d - 4.32).abs() < 1e-12);
        assert!((f.price_momentum - (-4.6)).abs() < 1e-12);
        assert!((f.volume_ratio - 1.0 / 0.92).abs() < 1e-12);
        assert!((f.liquidity_score - 5.0).abs() < 1e-12);
        assert_eq!(f.gas_price_gwei, 28.0);
        assert_eq!(f.gas_trend, 0.0);
        assert_eq!(f.hour_of_day, 15.0);
        assert_eq!(f.day_of_week, 2.0);
    }

    #[test]
    fn test_encode_prefers_supplied_aggregates() {
        let mut snap = snapshot();
        if let Some(price) = snap.price.as_mut() {
            price.volatility = Some(9.0);
            price.price_change_1h = Some(0.5);
            price.volume_ma_7d = Some(500_000_000.0);
            price.volatility_ma_7d = Some(7.0);
        }
        let f = encode(&snap.gas_price(400.0)).unwrap();
        assert_eq!(f.volatility, 9.0);
        assert_eq!(f.price_change_1h, 0.5);
        assert_eq!(f.volatility_ma_7d, 7.0);
        assert!((f.volume_ratio - 2.0).abs() < 1e-12);
        assert!((f.gas_trend - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_encode_unavailable() {
        let no_price = MarketDataSnapshot::default();
        assert!(encode(&no_price).unwrap_err().is_unavailable());

        let mut bad_spot = snapshot();
        if let Some(p) = bad_spot.price.as_mut() {
            p.spot_price = 0.0;
        }
        assert!(encode(&bad_spot).unwrap_err().is_unavailable());

        let mut bad_volume = snapshot();
        if let Some(p) = bad_volume.price.as_mut() {
            p.volume_24h = f64::NAN;
        }
        assert!(encode(&bad_volume).unwrap_err().is_unavailable());
    }

    #[test]
    fn test_missing_market_cap_and_bad_gas() {
        let mut snap = snapshot();
        if let Some(p) = snap.price.as_mut() {
            p.market_cap = 0.0;
        }
        snap.network = Some(NetworkData { gas_price_gwei: -5.0 });
        let f = encode(&snap).unwrap();
        assert_eq!(f.liquidity_score, 0.0);
        assert_eq!(f.gas_price_gwei, GAS_BASELINE_GWEI);
    }

    #[test]
    fn test_shared_derivations() {
        assert_eq!(volume_ratio(10.0, 0.0), 1.0);
        assert_eq!(volume_ratio(10.0, 5.0), 2.0);
        assert_eq!(liquidity_score(10.0, -1.0), 0.0);
        assert!((gas_trend(214.0) - 0.5).abs() < 1e-12);
    }
}
