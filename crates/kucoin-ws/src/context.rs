//! Shared collaborators for feeds
//!
//! A context carries the REST clients (for tokens and snapshots) and the
//! socket connector. Production contexts put both REST clients behind one
//! request throttle so the whole process stays inside the rate limit.

use kucoin_rest::{Credentials, HttpRestClient, RequestThrottle, RestClient, RestConfig};
use kucoin_types::{KucoinResult, Market};
use std::fmt;
use std::sync::Arc;

use crate::transport::{Connector, WsConnector};

#[derive(Clone)]
pub struct KucoinContext {
    spot: Arc<dyn RestClient>,
    futures: Arc<dyn RestClient>,
    connector: Arc<dyn Connector>,
}

impl fmt::Debug for KucoinContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KucoinContext").finish_non_exhaustive()
    }
}

impl KucoinContext {
    pub fn new(
        spot: Arc<dyn RestClient>,
        futures: Arc<dyn RestClient>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            spot,
            futures,
            connector,
        }
    }

    /// HTTP clients against the public KuCoin hosts and a real websocket connector
    ///
    /// Full-depth Level 2 and Level 3 snapshots need `credentials`.
    pub fn production(credentials: Option<Credentials>) -> KucoinResult<Self> {
        let throttle = Arc::new(RequestThrottle::default());
        let mut spot = RestConfig::spot().with_throttle(throttle.clone());
        let mut futures = RestConfig::futures().with_throttle(throttle);
        if let Some(credentials) = credentials {
            spot = spot.with_credentials(credentials.clone());
            futures = futures.with_credentials(credentials);
        }
        Ok(Self {
            spot: Arc::new(HttpRestClient::new(spot)?),
            futures: Arc::new(HttpRestClient::new(futures)?),
            connector: Arc::new(WsConnector::new()),
        })
    }

    /// REST client for `market`
    pub fn rest(&self, market: Market) -> Arc<dyn RestClient> {
        match market {
            Market::Spot => self.spot.clone(),
            Market::Futures => self.futures.clone(),
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockConnector;
    use kucoin_rest::MockRestClient;

    #[test]
    fn test_rest_by_market() {
        let spot = MockRestClient::new();
        let futures = MockRestClient::new();
        let spot_arc: Arc<dyn RestClient> = Arc::new(spot);
        let ctx = KucoinContext::new(
            spot_arc.clone(),
            Arc::new(futures),
            Arc::new(MockConnector::new()),
        );
        assert!(Arc::ptr_eq(&ctx.rest(Market::Spot), &spot_arc));
        assert!(!Arc::ptr_eq(&ctx.rest(Market::Futures), &spot_arc));
    }

    #[test]
    fn test_production_builds_without_credentials() {
        assert!(KucoinContext::production(None).is_ok());
    }
}
