//! Ready-made feeds: order books and the all-symbols ticker
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
//!     feed.connect().await?;
//!     feed.subscribe(&["BTC-USDT"])?;
//!
//!     let mut books = feed.observe(SymbolFilter::only(["BTC-USDT"]));
//!     while let Some(book) = books.recv().await {
//!         println!("{:?} {:?}", book.best_bid(), book.best_ask());
//!     }
//!     Ok(())
//! }
//! ```

use kucoin_book::{L3Book, Level2Book, OrderBook};
use kucoin_types::topic::{level2_base, LEVEL3, TICKER};
use kucoin_types::{Envelope, KucoinError, KucoinResult, Market, Ticker, Topic};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, ObservationConfig};
use crate::connection::{FeedConnection, WeakConnection};
use crate::context::KucoinContext;
use crate::distribution::{CallbackHandle, Distributor, FeedLifecycle, Observer, SymbolFilter};
use crate::events::ConnectionState;
use crate::observation::{LiveBookOf, Observation};
use crate::registry::{FeedUpdate, SubscriptionRegistry};
use crate::router::MessageHandler;
use crate::scan::Inbound;
use crate::snapshot::{Level2Snapshots, Level3Snapshots, SnapshotSource};

/// Calibrated order books for a set of symbols on one connection
pub struct OrderBookFeed<B: OrderBook> {
    registry: SubscriptionRegistry<B>,
}

pub type Level2Feed = OrderBookFeed<Level2Book>;
pub type Level3Feed = OrderBookFeed<L3Book>;

impl OrderBookFeed<Level2Book> {
    /// Aggregated book feed with default settings
    pub fn level2(ctx: &KucoinContext, market: Market) -> Self {
        Self::level2_with(
            ctx,
            ConnectionConfig::default().with_market(market),
            ObservationConfig::default(),
        )
    }

    pub fn level2_with(
        ctx: &KucoinContext,
        connection: ConnectionConfig,
        observation: ObservationConfig,
    ) -> Self {
        let market = connection.market;
        let rest = ctx.rest(market);
        let source = Arc::new(Level2Snapshots::new(rest.clone(), market));
        let connection = FeedConnection::new(connection, rest, ctx.connector());
        Self::with_parts(connection, level2_base(market), observation, source)
    }
}

impl OrderBookFeed<L3Book> {
    /// Spot Level 3 feed; diffs are scanned on the fast path
    pub fn level3(ctx: &KucoinContext) -> Self {
        Self::level3_with(
            ctx,
            ConnectionConfig::spot().with_fast_path(true),
            ObservationConfig::default(),
        )
    }

    pub fn level3_with(
        ctx: &KucoinContext,
        connection: ConnectionConfig,
        observation: ObservationConfig,
    ) -> Self {
        let rest = ctx.rest(Market::Spot);
        let source = Arc::new(Level3Snapshots::new(rest.clone()));
        let connection = FeedConnection::new(connection, rest, ctx.connector());
        Self::with_parts(connection, LEVEL3, observation, source)
    }
}

impl<B> OrderBookFeed<B>
where
    B: OrderBook,
    B::Update: FeedUpdate,
{
    /// Assemble a feed from an existing connection and snapshot source
    pub fn with_parts(
        connection: FeedConnection,
        topic_base: impl Into<String>,
        config: ObservationConfig,
        source: Arc<dyn SnapshotSource<B::Snapshot>>,
    ) -> Self {
        Self {
            registry: SubscriptionRegistry::new(connection, topic_base, config, source),
        }
    }

    /// Connect the underlying socket; `Ok(false)` if the attempt failed
    pub async fn connect(&self) -> KucoinResult<bool> {
        self.registry.connection().connect().await
    }

    pub fn subscribe(
        &self,
        symbols: &[&str],
    ) -> KucoinResult<HashMap<String, Arc<Observation<B>>>> {
        self.registry.subscribe(symbols)
    }

    pub fn subscribe_one(&self, symbol: &str) -> KucoinResult<Arc<Observation<B>>> {
        self.registry
            .subscribe(&[symbol])?
            .remove(symbol)
            .ok_or_else(|| KucoinError::InvalidSymbol(symbol.to_string()))
    }

    pub fn unsubscribe(&self, symbols: &[&str]) -> KucoinResult<()> {
        self.registry.unsubscribe(symbols)
    }

    /// See [`SubscriptionRegistry::resubscribe`]
    pub fn resubscribe(&self) -> KucoinResult<usize> {
        self.registry.resubscribe()
    }

    /// Live book pushes for the symbols in `filter`
    pub fn observe(&self, filter: SymbolFilter) -> Observer<LiveBookOf<B>> {
        self.registry.books().attach(filter)
    }

    pub fn on_book<F>(&self, filter: SymbolFilter, callback: F) -> CallbackHandle
    where
        F: Fn(LiveBookOf<B>) + Send + Sync + 'static,
    {
        self.registry.books().attach_callback(filter, callback)
    }

    /// Every diff applied to a calibrated book, in sequence order
    pub fn updates(&self, filter: SymbolFilter) -> Observer<B::Update> {
        self.registry.updates().attach(filter)
    }

    pub fn get(&self, symbol: &str) -> Option<Arc<Observation<B>>> {
        self.registry.get(symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.registry.symbols()
    }

    pub fn connection(&self) -> &FeedConnection {
        self.registry.connection()
    }

    pub fn registry(&self) -> &SubscriptionRegistry<B> {
        &self.registry
    }

    /// Dispose every observation, then the connection
    pub fn dispose(&self) {
        self.registry.dispose();
        self.registry.connection().dispose();
    }
}

// ============================================================================
// Ticker
// ============================================================================

/// Sends the `ticker:all` subscription while anyone is observing
struct TickerLifecycle {
    connection: WeakConnection,
    active: AtomicBool,
}

impl TickerLifecycle {
    fn send(&self, subscribe: bool) {
        let Some(connection) = self.connection.upgrade() else {
            return;
        };
        if !connection.is_connected() {
            debug!(subscribe, "Ticker subscription deferred until connected");
            return;
        }
        let topic = Topic::with_symbols(TICKER, ["all"]).to_string();
        let id = connection.next_request_id();
        let envelope = if subscribe {
            Envelope::subscribe(id, topic, false)
        } else {
            Envelope::unsubscribe(id, topic, false)
        };
        match connection.send(&envelope) {
            Ok(()) if subscribe => connection.mark_state(ConnectionState::Subscribed),
            Ok(()) => connection.mark_state(ConnectionState::Unsubscribed),
            Err(e) => warn!(error = %e, subscribe, "Ticker subscription change failed"),
        }
    }
}

impl FeedLifecycle for TickerLifecycle {
    fn start(&self) {
        self.active.store(true, Ordering::SeqCst);
        info!("Starting ticker stream");
        self.send(true);
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        info!("Stopping ticker stream");
        self.send(false);
    }
}

struct TickerHandler {
    tickers: Distributor<Ticker>,
}

impl MessageHandler for TickerHandler {
    fn handle(&self, message: Inbound) -> KucoinResult<()> {
        let Inbound::Envelope(env) = message else {
            return Ok(());
        };
        if env.topic_base() != Some(TICKER) {
            return Ok(());
        }
        self.tickers.push_next(Ticker::from_envelope(&env)?);
        Ok(())
    }
}

/// Best bid/ask for every spot symbol
///
/// The wire subscription exists only while at least one observer is
/// attached.
pub struct TickerFeed {
    connection: FeedConnection,
    tickers: Distributor<Ticker>,
    lifecycle: Arc<TickerLifecycle>,
}

impl TickerFeed {
    pub fn new(ctx: &KucoinContext) -> Self {
        let connection = FeedConnection::new(
            ConnectionConfig::spot(),
            ctx.rest(Market::Spot),
            ctx.connector(),
        );
        Self::with_connection(connection, ObservationConfig::default().channel_capacity)
    }

    pub fn with_connection(connection: FeedConnection, capacity: usize) -> Self {
        let tickers = Distributor::new(capacity);
        let lifecycle = Arc::new(TickerLifecycle {
            connection: connection.downgrade(),
            active: AtomicBool::new(false),
        });
        tickers.set_lifecycle(lifecycle.clone());
        connection.set_handler(Arc::new(TickerHandler {
            tickers: tickers.clone(),
        }));
        Self {
            connection,
            tickers,
            lifecycle,
        }
    }

    /// Connect, subscribing straight away if observers are already waiting
    pub async fn connect(&self) -> KucoinResult<bool> {
        let connected = self.connection.connect().await?;
        if connected && self.lifecycle.active.load(Ordering::SeqCst) {
            self.lifecycle.send(true);
        }
        Ok(connected)
    }

    pub fn observe(&self, filter: SymbolFilter) -> Observer<Ticker> {
        self.tickers.attach(filter)
    }

    pub fn on_ticker<F>(&self, filter: SymbolFilter, callback: F) -> CallbackHandle
    where
        F: Fn(Ticker) + Send + Sync + 'static,
    {
        self.tickers.attach_callback(filter, callback)
    }

    pub fn observer_count(&self) -> usize {
        self.tickers.observer_count()
    }

    pub fn connection(&self) -> &FeedConnection {
        &self.connection
    }

    pub fn dispose(&self) {
        self.connection.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{eventually, mock_context};
    use kucoin_types::MessageType;

    #[tokio::test(start_paused = true)]
    async fn test_ticker_subscription_follows_observers() {
        let (ctx, _, connector) = mock_context();
        let feed = TickerFeed::new(&ctx);
        assert!(feed.connect().await.unwrap());
        let server = connector.last_server().unwrap();
        assert!(server.sent_of(MessageType::Subscribe).is_empty());

        let mut eth = feed.observe(SymbolFilter::only(["ETH-USDT"]));
        let subscribes = server.sent_of(MessageType::Subscribe);
        assert_eq!(subscribes.len(), 1);
        assert_eq!(subscribes[0].topic.as_deref(), Some("/market/ticker:all"));

        server.push(r#"{"type":"message","topic":"/market/ticker:all","subject":"BTC-USDT","data":{"price":"60000","sequence":"1","time":1}}"#);
        server.push(r#"{"type":"message","topic":"/market/ticker:all","subject":"ETH-USDT","data":{"price":"3000","sequence":"2","time":2}}"#);
        let ticker = eth.recv().await.unwrap();
        assert_eq!(ticker.symbol, "ETH-USDT");

        drop(eth);
        assert_eq!(server.sent_of(MessageType::Unsubscribe).len(), 1);
        assert_eq!(feed.connection().state(), ConnectionState::Unsubscribed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_subscribes_on_connect_when_observed() {
        let (ctx, _, connector) = mock_context();
        let feed = TickerFeed::new(&ctx);
        let _all = feed.observe(SymbolFilter::all());

        assert!(feed.connect().await.unwrap());
        let server = connector.last_server().unwrap();
        assert_eq!(server.sent_of(MessageType::Subscribe).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_level3_feed_uses_fast_path_topic() {
        let (ctx, _, connector) = mock_context();
        let feed = Level3Feed::level3(&ctx);
        assert!(feed.connection().config().fast_path);
        feed.connect().await.unwrap();

        let observation = feed.subscribe_one("BTC-USDT").unwrap();
        let server = connector.last_server().unwrap();
        let subscribes = server.sent_of(MessageType::Subscribe);
        assert_eq!(subscribes[0].topic.as_deref(), Some("/spotMarket/level3:BTC-USDT"));

        feed.dispose();
        assert!(observation.is_disposed());
        assert!(feed.connection().is_disposed());
        eventually(|| feed.symbols().is_empty()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_futures_level2_topic() {
        let (ctx, _, connector) = mock_context();
        let feed = Level2Feed::level2(&ctx, Market::Futures);
        feed.connect().await.unwrap();
        feed.subscribe(&["XBTUSDTM"]).unwrap();

        let server = connector.last_server().unwrap();
        let subscribes = server.sent_of(MessageType::Subscribe);
        assert_eq!(
            subscribes[0].topic.as_deref(),
            Some("/contractMarket/level2:XBTUSDTM")
        );
    }
}
