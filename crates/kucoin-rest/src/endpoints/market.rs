//! Order book snapshot endpoints
//!
//! Full-depth spot snapshots are private on the exchange side and are
//! signed; the partial (20/100 level) and futures snapshots are public.

use kucoin_types::{Level2Snapshot, Level3Snapshot};
use serde_json::json;
use tracing::{debug, instrument};

use super::token::decode;
use crate::client::{Method, RestClient};
use crate::error::{RestError, RestResult};

pub const LEVEL2_FULL_PATH: &str = "/api/v3/market/orderbook/level2";
pub const LEVEL3_FULL_PATH: &str = "/api/v3/market/orderbook/level3";
pub const FUTURES_LEVEL2_PATH: &str = "/api/v1/level2/snapshot";

/// Market data endpoints
pub struct MarketEndpoints<'a> {
    client: &'a dyn RestClient,
}

impl<'a> MarketEndpoints<'a> {
    pub fn new(client: &'a dyn RestClient) -> Self {
        Self { client }
    }

    /// Full-depth aggregated book
    #[instrument(skip(self))]
    pub async fn level2_snapshot(&self, symbol: &str) -> RestResult<Level2Snapshot> {
        debug!("Fetching full level 2 snapshot");
        let data = self
            .client
            .make_request(
                Method::Get,
                LEVEL2_FULL_PATH,
                Some(json!({ "symbol": symbol })),
                true,
            )
            .await?;
        decode(data)
    }

    /// Top 20 or 100 levels
    #[instrument(skip(self))]
    pub async fn level2_partial(&self, symbol: &str, depth: u32) -> RestResult<Level2Snapshot> {
        if depth != 20 && depth != 100 {
            return Err(RestError::InvalidParameter(format!(
                "partial depth must be 20 or 100, got {depth}"
            )));
        }
        let path = format!("/api/v1/market/orderbook/level2_{depth}");
        debug!(%path, "Fetching partial level 2 snapshot");
        let data = self
            .client
            .make_request(Method::Get, &path, Some(json!({ "symbol": symbol })), false)
            .await?;
        decode(data)
    }

    /// Full order-by-order book
    #[instrument(skip(self))]
    pub async fn level3_snapshot(&self, symbol: &str) -> RestResult<Level3Snapshot> {
        debug!("Fetching level 3 snapshot");
        let data = self
            .client
            .make_request(
                Method::Get,
                LEVEL3_FULL_PATH,
                Some(json!({ "symbol": symbol })),
                true,
            )
            .await?;
        decode(data)
    }

    /// Futures contract book; call through a client pointed at the futures base
    #[instrument(skip(self))]
    pub async fn futures_level2_snapshot(&self, symbol: &str) -> RestResult<Level2Snapshot> {
        debug!("Fetching futures level 2 snapshot");
        let data = self
            .client
            .make_request(
                Method::Get,
                FUTURES_LEVEL2_PATH,
                Some(json!({ "symbol": symbol })),
                false,
            )
            .await?;
        decode(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRestClient;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_level2_snapshot() {
        let mock = MockRestClient::new();
        mock.respond(
            LEVEL2_FULL_PATH,
            json!({
                "sequence": "3262786978",
                "time": 1550653727731u64,
                "bids": [["6500.12", "0.45054140"]],
                "asks": [["6500.16", "0.57753524"]]
            }),
        );

        let snap = MarketEndpoints::new(&mock)
            .level2_snapshot("BTC-USDT")
            .await
            .unwrap();
        assert_eq!(snap.sequence, 3262786978);
        assert_eq!(snap.bids[0].price, dec!(6500.12));

        let calls = mock.requests();
        assert!(calls[0].requires_auth);
        assert_eq!(calls[0].params.as_ref().unwrap()["symbol"], "BTC-USDT");
    }

    #[tokio::test]
    async fn test_partial_depth_validated() {
        let mock = MockRestClient::new();
        let err = MarketEndpoints::new(&mock)
            .level2_partial("BTC-USDT", 50)
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::InvalidParameter(_)));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_partial_is_public() {
        let mock = MockRestClient::new();
        mock.respond(
            "/api/v1/market/orderbook/level2_20",
            json!({"sequence": "7", "time": 1, "bids": [], "asks": []}),
        );
        let snap = MarketEndpoints::new(&mock)
            .level2_partial("ETH-USDT", 20)
            .await
            .unwrap();
        assert_eq!(snap.sequence, 7);
        assert!(!mock.requests()[0].requires_auth);
    }

    #[tokio::test]
    async fn test_level3_snapshot() {
        let mock = MockRestClient::new();
        mock.respond(
            LEVEL3_FULL_PATH,
            json!({
                "sequence": "1573503933086",
                "time": 1573520918000u64,
                "asks": [["5e0d672c1f311300093ac522", "0.1917", "390.9275", 1577936689346546088u64]],
                "bids": []
            }),
        );
        let snap = MarketEndpoints::new(&mock)
            .level3_snapshot("KCS-USDT")
            .await
            .unwrap();
        assert_eq!(snap.asks.len(), 1);
        assert_eq!(snap.asks[0].order_id, "5e0d672c1f311300093ac522");
    }

    #[tokio::test]
    async fn test_malformed_snapshot() {
        let mock = MockRestClient::new();
        mock.respond(LEVEL2_FULL_PATH, json!({"bids": "nope"}));
        let err = MarketEndpoints::new(&mock)
            .level2_snapshot("BTC-USDT")
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::Parse(_)));
    }
}
