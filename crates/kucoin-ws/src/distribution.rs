//! Fan-out of books, diffs and tickers to observers
//!
//! A [`Distributor`] is a broadcast channel plus an observer count.
//! Publishing never blocks; an observer that falls more than the channel
//! capacity behind skips ahead and a warning is logged.
//!
//! # Auto start/stop
//!
//! Feeds whose wire subscription should only exist while someone is
//! listening install a [`FeedLifecycle`]. It gets `start()` when the first
//! observer attaches and `stop()` when the last one goes away.

use kucoin_types::Keyed;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Which symbols an observer wants; empty means all of them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolFilter {
    symbols: HashSet<String>,
}

impl SymbolFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_all(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn matches(&self, symbol: &str) -> bool {
        self.symbols.is_empty() || self.symbols.contains(symbol)
    }
}

/// Hooks run when a distributor gains its first or loses its last observer
pub trait FeedLifecycle: Send + Sync {
    fn start(&self);
    fn stop(&self);
}

struct DistInner<T> {
    tx: broadcast::Sender<T>,
    observers: Mutex<usize>,
    lifecycle: RwLock<Option<Arc<dyn FeedLifecycle>>>,
}

impl<T> DistInner<T> {
    fn detach(&self) {
        let mut observers = self.observers.lock();
        *observers = observers.saturating_sub(1);
        if *observers == 0 {
            if let Some(lifecycle) = self.lifecycle.read().as_ref() {
                debug!("Last observer detached");
                lifecycle.stop();
            }
        }
    }
}

/// Broadcasts items to attached observers
pub struct Distributor<T> {
    inner: Arc<DistInner<T>>,
}

impl<T> Clone for Distributor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Keyed + Clone + Send + 'static> Distributor<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(DistInner {
                tx,
                observers: Mutex::new(0),
                lifecycle: RwLock::new(None),
            }),
        }
    }

    pub fn set_lifecycle(&self, lifecycle: Arc<dyn FeedLifecycle>) {
        *self.inner.lifecycle.write() = Some(lifecycle);
    }

    /// Publish to every observer; returns how many receivers got it
    pub fn push_next(&self, item: T) -> usize {
        self.inner.tx.send(item).unwrap_or(0)
    }

    pub fn observer_count(&self) -> usize {
        *self.inner.observers.lock()
    }

    pub fn attach(&self, filter: SymbolFilter) -> Observer<T> {
        let mut observers = self.inner.observers.lock();
        *observers += 1;
        if *observers == 1 {
            if let Some(lifecycle) = self.inner.lifecycle.read().as_ref() {
                debug!("First observer attached");
                lifecycle.start();
            }
        }
        Observer {
            rx: self.inner.tx.subscribe(),
            filter,
            dist: Arc::downgrade(&self.inner),
        }
    }

    /// Run `callback` for every matching item on its own task
    ///
    /// Must be called inside a tokio runtime. Dropping the handle detaches.
    pub fn attach_callback<F>(&self, filter: SymbolFilter, callback: F) -> CallbackHandle
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let mut observer = self.attach(filter);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    item = observer.recv() => match item {
                        Some(item) => callback(item),
                        None => break,
                    },
                }
            }
        });
        CallbackHandle { cancel, task }
    }
}

/// One attached receiver
pub struct Observer<T> {
    rx: broadcast::Receiver<T>,
    filter: SymbolFilter,
    dist: Weak<DistInner<T>>,
}

impl<T: Keyed + Clone> Observer<T> {
    /// Next matching item; `None` once the distributor is gone
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(item) if self.filter.matches(item.key()) => return Some(item),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Observer lagged, skipping ahead");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching item if one is already queued
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(item) if self.filter.matches(item.key()) => return Some(item),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Observer lagged, skipping ahead");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn filter(&self) -> &SymbolFilter {
        &self.filter
    }
}

impl<T> Drop for Observer<T> {
    fn drop(&mut self) {
        if let Some(dist) = self.dist.upgrade() {
            dist.detach();
        }
    }
}

/// Keeps a callback observer alive
pub struct CallbackHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CallbackHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::eventually;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Item(String, u32);

    impl Keyed for Item {
        fn key(&self) -> &str {
            &self.0
        }
    }

    #[derive(Default)]
    struct Counting {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl FeedLifecycle for Counting {
        fn start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_filtered_observer() {
        let dist = Distributor::new(16);
        let mut eth = dist.attach(SymbolFilter::only(["ETH-USDT"]));
        let mut all = dist.attach(SymbolFilter::all());

        dist.push_next(Item("BTC-USDT".into(), 1));
        dist.push_next(Item("ETH-USDT".into(), 2));

        assert_eq!(eth.recv().await, Some(Item("ETH-USDT".into(), 2)));
        assert_eq!(eth.try_recv(), None);
        assert_eq!(all.try_recv().map(|i| i.1), Some(1));
        assert_eq!(all.try_recv().map(|i| i.1), Some(2));
    }

    #[test]
    fn test_push_without_observers() {
        let dist = Distributor::new(4);
        assert_eq!(dist.push_next(Item("X".into(), 0)), 0);
    }

    #[test]
    fn test_lifecycle_first_and_last() {
        let dist: Distributor<Item> = Distributor::new(4);
        let lifecycle = Arc::new(Counting::default());
        dist.set_lifecycle(lifecycle.clone());

        let a = dist.attach(SymbolFilter::all());
        let b = dist.attach(SymbolFilter::all());
        assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 1);
        assert_eq!(dist.observer_count(), 2);

        drop(a);
        assert_eq!(lifecycle.stops.load(Ordering::SeqCst), 0);
        drop(b);
        assert_eq!(lifecycle.stops.load(Ordering::SeqCst), 1);

        let _c = dist.attach(SymbolFilter::all());
        assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lagging_observer_skips_ahead() {
        let dist = Distributor::new(2);
        let mut slow = dist.attach(SymbolFilter::all());
        for n in 0..5 {
            dist.push_next(Item("A".into(), n));
        }
        assert_eq!(slow.recv().await.map(|i| i.1), Some(3));
    }

    #[tokio::test]
    async fn test_callback_runs_and_detaches() {
        let dist = Distributor::new(8);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handle = dist.attach_callback(SymbolFilter::only(["A"]), move |item: Item| {
            counter.fetch_add(item.1 as usize, Ordering::SeqCst);
        });

        dist.push_next(Item("A".into(), 2));
        dist.push_next(Item("B".into(), 40));
        dist.push_next(Item("A".into(), 3));
        eventually(|| seen.load(Ordering::SeqCst) == 5).await;

        drop(handle);
        eventually(|| dist.observer_count() == 0).await;
    }

    #[tokio::test]
    async fn test_closed_when_distributor_dropped() {
        let dist: Distributor<Item> = Distributor::new(4);
        let mut observer = dist.attach(SymbolFilter::all());
        drop(dist);
        assert_eq!(observer.recv().await, None);
    }
}
