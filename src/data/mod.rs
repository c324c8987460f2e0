//! Market data sources
//!
//! The engine never talks to price or gas APIs itself; it asks a
//! [`MarketDataSource`] for the latest [`MarketDataSnapshot`]. Implementations
//! here cover a JSON file on disk and a snapshot already held in memory.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::types::MarketDataSnapshot;

/// Supplier of market snapshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Latest snapshot; an error is treated like missing market data
    async fn snapshot(&self) -> Result<MarketDataSnapshot>;
}

/// Reads a snapshot serialised as JSON from a file on every call
#[derive(Debug, Clone)]
pub struct FileMarketData {
    path: PathBuf,
}

impl FileMarketData {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MarketDataSource for FileMarketData {
    async fn snapshot(&self) -> Result<MarketDataSnapshot> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            EngineError::FeatureUnavailable(format!("reading {}: {}", self.path.display(), e))
        })?;
        let snapshot: MarketDataSnapshot = serde_json::from_slice(&bytes)?;
        debug!("Loaded market snapshot from {}", self.path.display());
        Ok(snapshot)
    }
}

/// Serves a snapshot that was already decoded, e.g. piped in on stdin
#[derive(Debug, Clone, Default)]
pub struct StaticMarketData {
    snapshot: MarketDataSnapshot,
}

impl StaticMarketData {
    pub fn new(snapshot: MarketDataSnapshot) -> Self {
        Self { snapshot }
    }

    /// Decode a JSON snapshot
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(Self::new(serde_json::from_slice(bytes)?))
    }
}

#[async_trait]
impl MarketDataSource for StaticMarketData {
    async fn snapshot(&self) -> Result<MarketDataSnapshot> {
        Ok(self.snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceData;
    use std::io::Write;

    #[tokio::test]
    async fn test_file_source_reads_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"price": {{"spot_price": 2500.0, "volume_24h": 1.0e9, "price_change_24h": -2.5}},
                "network": {{"gas_price_gwei": 35.0}},
                "observed_at": "2024-01-03T15:00:00Z"}}"#
        )
        .unwrap();

        let snapshot = FileMarketData::new(file.path()).snapshot().await.unwrap();
        let price = snapshot.price.unwrap();
        assert_eq!(price.spot_price, 2500.0);
        assert_eq!(price.price_change_24h, -2.5);
        assert_eq!(price.volatility, None);
        assert_eq!(snapshot.network.unwrap().gas_price_gwei, 35.0);
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let err = FileMarketData::new("/nonexistent/snapshot.json").snapshot().await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticMarketData::default();
        assert!(source.snapshot().await.unwrap().price.is_none());

        let source = StaticMarketData::new(MarketDataSnapshot::with_price(PriceData {
            spot_price: 1.0,
            volume_24h: 10.0,
            ..Default::default()
        }));
        assert!(source.snapshot().await.unwrap().price.is_some());
    }

    #[tokio::test]
    async fn test_static_source_from_json() {
        let source = StaticMarketData::from_json(br#"{"price": {"spot_price": 2.0, "volume_24h": 5.0}}"#).unwrap();
        assert_eq!(source.snapshot().await.unwrap().price.unwrap().spot_price, 2.0);
        assert!(StaticMarketData::from_json(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_mock_source() {
        let mut mock = MockMarketDataSource::new();
        mock.expect_snapshot()
            .times(1)
            .returning(|| Err(EngineError::FeatureUnavailable("api down".into())));
        assert!(mock.snapshot().await.is_err());
    }
}
