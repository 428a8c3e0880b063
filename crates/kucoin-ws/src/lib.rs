//! Websocket market data client for KuCoin
//!
//! This crate turns KuCoin's websocket feeds into calibrated, sequence
//! checked order books.
//!
//! # Features
//!
//! - Token negotiation, welcome handshake and ping/pong liveness
//! - Up to four logical feeds multiplexed over one socket via tunnels
//! - Per-symbol calibration of Level 2 and Level 3 books against REST snapshots
//! - Throttled live book pushes with per-symbol observer filters
//! - Scanner fast path for high-rate Level 3 diffs
//!
//! Reconnection is left to the caller: watch for
//! [`ConnectionEvent::Disconnected`], call `connect()` again and then
//! [`OrderBookFeed::resubscribe`].
//!
//! # Example
//!
//! ```no_run
//! use kucoin_types::Market;
//! use kucoin_ws::{KucoinContext, Level2Feed, SymbolFilter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = KucoinContext::production(None)?;
//!     let feed = Level2Feed::level2(&ctx, Market::Spot);
//!
//!     if !feed.connect().await? {
//!         return Err("connect failed".into());
//!     }
//!     feed.subscribe(&["BTC-USDT", "ETH-USDT"])?;
//!
//!     let _handle = feed.on_book(SymbolFilter::all(), |book| {
//!         println!("{} mid {:?}", book.symbol, book.mid_price());
//!     });
//!     tokio::signal::ctrl_c().await?;
//!     feed.dispose();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod context;
pub mod distribution;
pub mod events;
pub mod feeds;
pub mod framer;
pub mod hooks;
pub mod observation;
pub mod registry;
pub mod router;
pub mod scan;
pub mod snapshot;
pub mod transport;

// Re-export main types
pub use config::{ConnectionConfig, GapPolicy, ObservationConfig};
pub use connection::{FeedConnection, WeakConnection, MAX_TUNNEL_CHILDREN};
pub use context::KucoinContext;
pub use distribution::{CallbackHandle, Distributor, FeedLifecycle, Observer, SymbolFilter};
pub use events::{ConnectionEvent, ConnectionState, DisconnectReason, ObservationEvent};
pub use feeds::{Level2Feed, Level3Feed, OrderBookFeed, TickerFeed};
pub use framer::FrameExtractor;
pub use hooks::{ConnectInfo, Hooks};
pub use observation::{CalibrationState, LiveBookOf, Observation};
pub use registry::{FeedUpdate, SubscriptionRegistry};
pub use router::{ErrorRecord, MessageHandler, MessageRouter};
pub use scan::Inbound;
pub use snapshot::{Level2Snapshots, Level3Snapshots, SnapshotSource};
pub use transport::{Connector, TransportError, WsConnector};

#[cfg(any(test, feature = "test-utils"))]
pub use transport::{MockConnector, MockServer};

#[cfg(test)]
pub(crate) mod testkit {
    use async_trait::async_trait;
    use kucoin_rest::endpoints::token::{PRIVATE_BULLET_PATH, PUBLIC_BULLET_PATH};
    use kucoin_rest::MockRestClient;
    use kucoin_types::{KucoinError, KucoinResult};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::context::KucoinContext;
    use crate::snapshot::SnapshotSource;
    use crate::transport::MockConnector;

    /// Bullet response with one spot instance server
    pub fn bullet_json() -> Value {
        json!({
            "token": "2neAiuYvAU61ZDXANAGAsiL4",
            "instanceServers": [{
                "endpoint": "wss://ws-api-spot.kucoin.com/",
                "encrypt": true,
                "protocol": "websocket",
                "pingInterval": 18000,
                "pingTimeout": 10000
            }]
        })
    }

    /// Context whose spot and futures REST clients are the same mock
    pub fn mock_context() -> (KucoinContext, MockRestClient, MockConnector) {
        let rest = MockRestClient::new();
        rest.respond(PUBLIC_BULLET_PATH, bullet_json());
        rest.respond(PRIVATE_BULLET_PATH, bullet_json());
        let connector = MockConnector::new();
        let shared: Arc<MockRestClient> = Arc::new(rest.clone());
        let ctx = KucoinContext::new(shared.clone(), shared, Arc::new(connector.clone()));
        (ctx, rest, connector)
    }

    /// Yield in 1ms steps until `check` holds
    pub async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..10_000 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition not reached");
    }

    enum Reply<S> {
        Ok(S),
        Fail,
        Hang,
    }

    /// Snapshot source whose answer the test controls
    pub struct ScriptedSource<S> {
        reply: Mutex<Reply<S>>,
        calls: AtomicUsize,
    }

    impl<S: Clone + Send + Sync + 'static> ScriptedSource<S> {
        fn with(reply: Reply<S>) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(reply),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn returning(snapshot: S) -> Arc<Self> {
            Self::with(Reply::Ok(snapshot))
        }

        pub fn failing() -> Arc<Self> {
            Self::with(Reply::Fail)
        }

        pub fn hanging() -> Arc<Self> {
            Self::with(Reply::Hang)
        }

        pub fn set(&self, snapshot: S) {
            *self.reply.lock() = Reply::Ok(snapshot);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl<S: Clone + Send + Sync + 'static> SnapshotSource<S> for ScriptedSource<S> {
        async fn fetch(&self, symbol: &str) -> KucoinResult<S> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = match &*self.reply.lock() {
                Reply::Ok(snapshot) => Some(Ok(snapshot.clone())),
                Reply::Fail => Some(Err(KucoinError::snapshot_failed(symbol, "scripted failure"))),
                Reply::Hang => None,
            };
            match reply {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }
    }
}
