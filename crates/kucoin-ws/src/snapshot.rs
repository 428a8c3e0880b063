//! Where observations get the snapshots they calibrate against

use async_trait::async_trait;
use kucoin_rest::{MarketEndpoints, RestClient};
use kucoin_types::{KucoinError, KucoinResult, Level2Snapshot, Level3Snapshot, Market};
use std::sync::Arc;

/// Fetches a full-depth snapshot for one symbol
#[async_trait]
pub trait SnapshotSource<S: Send + 'static>: Send + Sync {
    async fn fetch(&self, symbol: &str) -> KucoinResult<S>;
}

/// Level 2 snapshots over REST; futures symbols use the contract endpoint
pub struct Level2Snapshots {
    rest: Arc<dyn RestClient>,
    market: Market,
}

impl Level2Snapshots {
    pub fn new(rest: Arc<dyn RestClient>, market: Market) -> Self {
        Self { rest, market }
    }
}

#[async_trait]
impl SnapshotSource<Level2Snapshot> for Level2Snapshots {
    async fn fetch(&self, symbol: &str) -> KucoinResult<Level2Snapshot> {
        let market = MarketEndpoints::new(self.rest.as_ref());
        let result = match self.market {
            Market::Spot => market.level2_snapshot(symbol).await,
            Market::Futures => market.futures_level2_snapshot(symbol).await,
        };
        result.map_err(|e| KucoinError::snapshot_failed(symbol, e))
    }
}

/// Level 3 snapshots over REST
pub struct Level3Snapshots {
    rest: Arc<dyn RestClient>,
}

impl Level3Snapshots {
    pub fn new(rest: Arc<dyn RestClient>) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl SnapshotSource<Level3Snapshot> for Level3Snapshots {
    async fn fetch(&self, symbol: &str) -> KucoinResult<Level3Snapshot> {
        MarketEndpoints::new(self.rest.as_ref())
            .level3_snapshot(symbol)
            .await
            .map_err(|e| KucoinError::snapshot_failed(symbol, e))
    }
}
