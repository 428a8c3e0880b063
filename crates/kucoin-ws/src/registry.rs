//! Per-connection table of symbol observations
//!
//! The registry owns one [`Observation`] per subscribed symbol, installs
//! itself as the connection's message handler and routes every diff on its
//! topic to the observation for that symbol. Subscribing several symbols
//! sends a single batched `subscribe` frame.

use dashmap::DashMap;
use kucoin_book::OrderBook;
use kucoin_types::{
    Envelope, KucoinError, KucoinResult, Level2Update, Level3Update, Sequenced, Symbol, Topic,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

use crate::config::ObservationConfig;
use crate::connection::FeedConnection;
use crate::distribution::Distributor;
use crate::events::ConnectionState;
use crate::observation::{LiveBookOf, Observation, WireSubscription};
use crate::router::MessageHandler;
use crate::scan::Inbound;
use crate::snapshot::SnapshotSource;

/// Diff types that can be decoded from a routed message
pub trait FeedUpdate: Sized {
    fn decode(message: Inbound) -> KucoinResult<Self>;
}

impl FeedUpdate for Level2Update {
    fn decode(message: Inbound) -> KucoinResult<Self> {
        match message {
            Inbound::Envelope(env) => Level2Update::from_envelope(&env),
            Inbound::Level3 { topic, .. } => Err(KucoinError::UnexpectedMessage(format!(
                "level 3 diff on level 2 feed: {topic}"
            ))),
        }
    }
}

impl FeedUpdate for Level3Update {
    fn decode(message: Inbound) -> KucoinResult<Self> {
        match message {
            Inbound::Level3 { update, .. } => Ok(update),
            Inbound::Envelope(env) => Level3Update::from_envelope(&env),
        }
    }
}

struct RegistryInner<B: OrderBook> {
    connection: FeedConnection,
    topic_base: String,
    config: ObservationConfig,
    source: Arc<dyn SnapshotSource<B::Snapshot>>,
    observations: DashMap<String, Arc<Observation<B>>>,
    books: Distributor<LiveBookOf<B>>,
    updates: Distributor<B::Update>,
    /// Serializes subscribe/unsubscribe so batches do not interleave
    subscribe_lock: Mutex<()>,
    disposed: AtomicBool,
}

/// Observations for one topic on one connection
pub struct SubscriptionRegistry<B: OrderBook> {
    inner: Arc<RegistryInner<B>>,
}

impl<B: OrderBook> Clone for SubscriptionRegistry<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B> SubscriptionRegistry<B>
where
    B: OrderBook,
    B::Update: FeedUpdate,
{
    /// Create a registry and install it as `connection`'s handler
    pub fn new(
        connection: FeedConnection,
        topic_base: impl Into<String>,
        config: ObservationConfig,
        source: Arc<dyn SnapshotSource<B::Snapshot>>,
    ) -> Self {
        let capacity = config.channel_capacity;
        let inner = Arc::new(RegistryInner {
            connection,
            topic_base: topic_base.into(),
            config,
            source,
            observations: DashMap::new(),
            books: Distributor::new(capacity),
            updates: Distributor::new(capacity),
            subscribe_lock: Mutex::new(()),
            disposed: AtomicBool::new(false),
        });
        inner.connection.set_handler(Arc::new(RegistryHandler {
            inner: Arc::downgrade(&inner),
        }));
        Self { inner }
    }

    /// Observe `symbols`, returning the observation for each
    ///
    /// Symbols that are already observed are returned as-is and not
    /// re-subscribed. The new ones go out in one `subscribe` frame; if that
    /// send fails none of them are kept.
    pub fn subscribe(
        &self,
        symbols: &[&str],
    ) -> KucoinResult<HashMap<String, Arc<Observation<B>>>> {
        let inner = &self.inner;
        if inner.disposed.load(Ordering::SeqCst) {
            return Err(KucoinError::Disposed);
        }
        let parsed = symbols
            .iter()
            .map(|s| {
                s.parse::<Symbol>()
                    .map_err(|e| KucoinError::InvalidSymbol(e.to_string()))
            })
            .collect::<KucoinResult<Vec<_>>>()?;

        let _guard = inner.subscribe_lock.lock();
        let mut result = HashMap::new();
        let mut fresh: Vec<String> = Vec::new();
        for symbol in parsed {
            let key = symbol.as_str().to_string();
            if result.contains_key(&key) {
                continue;
            }
            if let Some(existing) = inner.observations.get(&key) {
                result.insert(key, existing.clone());
                continue;
            }
            let created = Observation::new(
                key.clone(),
                inner.config.clone(),
                inner.source.clone(),
                inner.books.clone(),
                inner.updates.clone(),
                Some(WireSubscription {
                    connection: inner.connection.downgrade(),
                    topic_base: inner.topic_base.clone(),
                    private: inner.connection.config().private,
                }),
            );
            let observation = match created {
                Ok(observation) => observation,
                Err(e) => {
                    self.rollback(&fresh);
                    return Err(e);
                }
            };
            inner.observations.insert(key.clone(), observation.clone());
            fresh.push(key.clone());
            result.insert(key, observation);
        }

        if fresh.is_empty() {
            return Ok(result);
        }

        let topic = Topic::with_symbols(inner.topic_base.as_str(), fresh.iter().map(String::as_str));
        let envelope = Envelope::subscribe(
            inner.connection.next_request_id(),
            topic.to_string(),
            inner.connection.config().private,
        );
        if let Err(e) = inner.connection.send(&envelope) {
            warn!(topic = %topic, error = %e, "Subscribe failed");
            self.rollback(&fresh);
            return Err(e);
        }
        info!(topic = %topic, "Subscribed");
        inner.connection.mark_state(ConnectionState::Subscribed);
        Ok(result)
    }

    fn rollback(&self, keys: &[String]) {
        for key in keys {
            if let Some((_, observation)) = self.inner.observations.remove(key) {
                observation.dispose();
            }
        }
    }

    /// Stop observing `symbols`; unknown symbols are ignored
    pub fn unsubscribe(&self, symbols: &[&str]) -> KucoinResult<()> {
        let inner = &self.inner;
        if inner.disposed.load(Ordering::SeqCst) {
            return Err(KucoinError::Disposed);
        }
        let _guard = inner.subscribe_lock.lock();
        let mut removed = 0;
        for symbol in symbols {
            if let Some((_, observation)) = inner.observations.remove(*symbol) {
                observation.dispose();
                removed += 1;
            }
        }
        if removed > 0 && inner.observations.is_empty() {
            inner.connection.mark_state(ConnectionState::Unsubscribed);
        }
        debug!(removed, "Unsubscribed");
        Ok(())
    }

    /// Reset every observation and subscribe them again in one frame
    ///
    /// Call after `connect()` succeeds on a connection that had dropped.
    /// Returns how many symbols were re-subscribed.
    pub fn resubscribe(&self) -> KucoinResult<usize> {
        let inner = &self.inner;
        if inner.disposed.load(Ordering::SeqCst) {
            return Err(KucoinError::Disposed);
        }
        let _guard = inner.subscribe_lock.lock();
        let symbols = self.symbols();
        if symbols.is_empty() {
            return Ok(0);
        }
        for entry in inner.observations.iter() {
            entry.value().reset()?;
        }
        let topic = Topic::with_symbols(inner.topic_base.as_str(), symbols.iter().map(String::as_str));
        let envelope = Envelope::subscribe(
            inner.connection.next_request_id(),
            topic.to_string(),
            inner.connection.config().private,
        );
        inner.connection.send(&envelope)?;
        inner.connection.mark_state(ConnectionState::Subscribed);
        info!(topic = %topic, "Resubscribed");
        Ok(symbols.len())
    }

    pub fn get(&self, symbol: &str) -> Option<Arc<Observation<B>>> {
        self.inner.observations.get(symbol).map(|o| o.clone())
    }

    /// Observed symbols, sorted
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .inner
            .observations
            .iter()
            .map(|e| e.key().clone())
            .collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.inner.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.observations.is_empty()
    }

    pub fn topic_base(&self) -> &str {
        &self.inner.topic_base
    }

    pub fn connection(&self) -> &FeedConnection {
        &self.inner.connection
    }

    /// Live books of every observed symbol
    pub fn books(&self) -> &Distributor<LiveBookOf<B>> {
        &self.inner.books
    }

    /// Applied diffs of every observed symbol
    pub fn updates(&self) -> &Distributor<B::Update> {
        &self.inner.updates
    }

    /// Dispose every observation; the connection itself is left alone
    pub fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _guard = inner.subscribe_lock.lock();
        for entry in inner.observations.iter() {
            entry.value().dispose();
        }
        inner.observations.clear();
        debug!(topic = %inner.topic_base, "Registry disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

struct RegistryHandler<B: OrderBook> {
    inner: Weak<RegistryInner<B>>,
}

impl<B> MessageHandler for RegistryHandler<B>
where
    B: OrderBook,
    B::Update: FeedUpdate,
{
    fn handle(&self, message: Inbound) -> KucoinResult<()> {
        let Some(inner) = self.inner.upgrade() else {
            return Ok(());
        };
        if message.topic_base() != Some(inner.topic_base.as_str()) {
            trace!(topic = ?message.topic(), "Ignoring message for another topic");
            return Ok(());
        }
        let update = B::Update::decode(message)?;
        let observation = inner
            .observations
            .get(update.symbol())
            .map(|o| o.clone());
        match observation {
            Some(observation) => observation.on_next(update),
            None => trace!(symbol = update.symbol(), "No observation for symbol"),
        }
        Ok(())
    }
}
