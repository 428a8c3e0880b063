//! Per-symbol calibration engine
//!
//! An [`Observation`] turns a stream of sequenced diffs into a consistent
//! book:
//!
//! 1. **Buffering**: diffs are queued; nothing is applied.
//! 2. **Initializing**: once `cycle` has passed since the first buffered
//!    diff, a full snapshot is fetched.
//! 3. **Calibrated**: the book is seeded from the snapshot, the buffer is
//!    replayed in arrival order (skipping anything the snapshot already
//!    contains) and live diffs are applied as they arrive.
//!
//! A failed snapshot puts the observation in **Faulted** until
//! [`reset`](Observation::reset). A diff that skips sequence numbers sends
//! it back to Buffering under [`GapPolicy::Resync`].
//!
//! A background task ticks every `push_tick`. It triggers the snapshot and
//! publishes the truncated [`LiveBook`] at most once per `update_interval`,
//! and only when something changed.

use kucoin_book::{LiveBook, OrderBook, SequenceCheck};
use kucoin_types::{Envelope, KucoinError, KucoinResult, Sequenced, Topic};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{GapPolicy, ObservationConfig};
use crate::connection::WeakConnection;
use crate::distribution::{Distributor, Observer, SymbolFilter};
use crate::events::{ConnectionState, ObservationEvent};
use crate::snapshot::SnapshotSource;

/// Where an observation is in its calibration cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalibrationState {
    Buffering,
    Initializing,
    Calibrated,
    /// Snapshot failed; diffs are dropped until `reset()`
    Faulted,
}

pub type LiveBookOf<B> = Arc<LiveBook<<B as OrderBook>::Unit>>;

/// The wire subscription an observation is part of
pub(crate) struct WireSubscription {
    pub connection: WeakConnection,
    pub topic_base: String,
    pub private: bool,
}

struct Core<B: OrderBook> {
    state: CalibrationState,
    buffer: Vec<B::Update>,
    first_buffered_at: Option<Instant>,
    book: Option<B>,
    last_push: Option<Instant>,
    /// Bumped whenever the book is thrown away, so a late snapshot is ignored
    epoch: u64,
}

impl<B: OrderBook> Core<B> {
    fn restart(&mut self, state: CalibrationState) {
        self.state = state;
        self.buffer.clear();
        self.first_buffered_at = None;
        self.book = None;
        self.epoch += 1;
    }
}

struct Shared<B: OrderBook> {
    symbol: String,
    config: ObservationConfig,
    core: Mutex<Core<B>>,
    push_requested: AtomicBool,
    initialized: AtomicBool,
    calibrated: AtomicBool,
    disposed: AtomicBool,
    live: RwLock<LiveBookOf<B>>,
    books: Distributor<LiveBookOf<B>>,
    updates: Distributor<B::Update>,
    events: broadcast::Sender<ObservationEvent>,
    source: Arc<dyn SnapshotSource<B::Snapshot>>,
    subscription: Option<WireSubscription>,
    cancel: CancellationToken,
}

enum Replay<U> {
    Calibrated {
        applied: Vec<U>,
        discarded: usize,
    },
    /// `rest` holds the gapping diff followed by everything after it
    Gap {
        expected: u64,
        received: u64,
        rest: Vec<U>,
    },
}

/// Calibrated full-depth book for one symbol
pub struct Observation<B: OrderBook> {
    shared: Arc<Shared<B>>,
}

impl<B: OrderBook> fmt::Debug for Observation<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observation")
            .field("symbol", &self.shared.symbol)
            .field("state", &self.state())
            .field("sequence", &self.sequence())
            .finish()
    }
}

impl<B: OrderBook> Observation<B> {
    pub(crate) fn new(
        symbol: impl Into<String>,
        config: ObservationConfig,
        source: Arc<dyn SnapshotSource<B::Snapshot>>,
        books: Distributor<LiveBookOf<B>>,
        updates: Distributor<B::Update>,
        subscription: Option<WireSubscription>,
    ) -> KucoinResult<Arc<Self>> {
        let handle = Handle::try_current().map_err(|_| {
            KucoinError::Configuration("observations need a tokio runtime".to_string())
        })?;
        let symbol = symbol.into();
        let (events, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            live: RwLock::new(Arc::new(LiveBook::empty(symbol.clone()))),
            symbol,
            config,
            core: Mutex::new(Core {
                state: CalibrationState::Buffering,
                buffer: Vec::new(),
                first_buffered_at: None,
                book: None,
                last_push: None,
                epoch: 0,
            }),
            push_requested: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            calibrated: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            books,
            updates,
            events,
            source,
            subscription,
            cancel: CancellationToken::new(),
        });
        handle.spawn(run(shared.clone()));
        debug!(symbol = %shared.symbol, "Observation started");
        Ok(Arc::new(Self { shared }))
    }

    /// An observation fed by hand rather than by a connection
    ///
    /// Must be called inside a tokio runtime.
    pub fn standalone(
        symbol: impl Into<String>,
        config: ObservationConfig,
        source: Arc<dyn SnapshotSource<B::Snapshot>>,
    ) -> KucoinResult<Arc<Self>> {
        let capacity = config.channel_capacity;
        Self::new(
            symbol,
            config,
            source,
            Distributor::new(capacity),
            Distributor::new(capacity),
            None,
        )
    }

    /// Feed one diff
    pub fn on_next(&self, update: B::Update) {
        let shared = &self.shared;
        if shared.disposed.load(Ordering::Acquire) {
            return;
        }

        let mut core = shared.core.lock();
        match core.state {
            CalibrationState::Buffering | CalibrationState::Initializing => {
                if core.first_buffered_at.is_none() && core.state == CalibrationState::Buffering {
                    core.first_buffered_at = Some(Instant::now());
                }
                core.buffer.push(update);
            }
            CalibrationState::Faulted => {
                trace!(symbol = %shared.symbol, "Faulted, dropping diff");
            }
            CalibrationState::Calibrated => {
                let Some(book) = core.book.as_mut() else {
                    return;
                };
                match book.classify(&update) {
                    SequenceCheck::Stale => {
                        trace!(
                            symbol = %shared.symbol,
                            sequence = update.sequence_end(),
                            "Dropping stale diff"
                        );
                    }
                    SequenceCheck::Next => shared.apply_live(book, update),
                    SequenceCheck::Gap { expected, received } => match shared.config.gap_policy {
                        GapPolicy::Permissive => {
                            warn!(symbol = %shared.symbol, expected, received, "Sequence gap, applying anyway");
                            shared.apply_live(book, update);
                        }
                        GapPolicy::Resync => {
                            core.restart(CalibrationState::Buffering);
                            core.first_buffered_at = Some(Instant::now());
                            core.buffer.push(update);
                            drop(core);
                            shared.desynchronized(expected, received);
                        }
                    },
                }
            }
        }
    }

    /// Drop everything and start buffering again
    pub fn reset(&self) -> KucoinResult<()> {
        let shared = &self.shared;
        if shared.disposed.load(Ordering::Acquire) {
            return Err(KucoinError::Disposed);
        }
        {
            let mut core = shared.core.lock();
            core.restart(CalibrationState::Buffering);
            core.last_push = None;
        }
        shared.initialized.store(false, Ordering::Release);
        shared.calibrated.store(false, Ordering::Release);
        shared.push_requested.store(false, Ordering::Release);
        *shared.live.write() = Arc::new(LiveBook::empty(shared.symbol.clone()));
        info!(symbol = %shared.symbol, "Observation reset");
        shared.emit(ObservationEvent::Reset {
            symbol: shared.symbol.clone(),
        });
        Ok(())
    }

    /// Stop the loop and unsubscribe; a no-op the second time
    pub fn dispose(&self) {
        let shared = &self.shared;
        if shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        shared.cancel.cancel();
        shared.core.lock().restart(CalibrationState::Buffering);
        shared.calibrated.store(false, Ordering::Release);

        if let Some(sub) = &shared.subscription {
            if let Some(conn) = sub.connection.upgrade() {
                let topic = Topic::with_symbols(sub.topic_base.as_str(), [shared.symbol.as_str()]);
                let envelope =
                    Envelope::unsubscribe(conn.next_request_id(), topic.to_string(), sub.private);
                if let Err(e) = conn.send(&envelope) {
                    debug!(symbol = %shared.symbol, error = %e, "Unsubscribe not sent");
                }
            }
        }
        info!(symbol = %shared.symbol, "Observation disposed");
    }

    pub fn symbol(&self) -> &str {
        &self.shared.symbol
    }

    pub fn state(&self) -> CalibrationState {
        self.shared.core.lock().state
    }

    /// A snapshot has been loaded
    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::Acquire)
    }

    /// The buffer has been replayed and live diffs are being applied
    pub fn is_calibrated(&self) -> bool {
        self.shared.calibrated.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Most recently published live book
    pub fn live_book(&self) -> LiveBookOf<B> {
        self.shared.live.read().clone()
    }

    /// Sequence of the full-depth book, if there is one
    pub fn sequence(&self) -> Option<u64> {
        self.shared.core.lock().book.as_ref().map(|b| b.sequence())
    }

    pub fn buffered_len(&self) -> usize {
        self.shared.core.lock().buffer.len()
    }

    /// Read the full-depth book under its lock
    pub fn with_book<R>(&self, f: impl FnOnce(&B) -> R) -> Option<R> {
        self.shared.core.lock().book.as_ref().map(f)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ObservationEvent> {
        self.shared.events.subscribe()
    }

    /// Live book pushes for this symbol
    pub fn observe(&self) -> Observer<LiveBookOf<B>> {
        self.shared
            .books
            .attach(SymbolFilter::only([self.shared.symbol.as_str()]))
    }

    /// Applied diffs for this symbol
    pub fn updates(&self) -> Observer<B::Update> {
        self.shared
            .updates
            .attach(SymbolFilter::only([self.shared.symbol.as_str()]))
    }
}

impl<B: OrderBook> Drop for Observation<B> {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl<B: OrderBook> Shared<B> {
    fn emit(&self, event: ObservationEvent) {
        let _ = self.events.send(event);
    }

    fn mark_connection(&self, state: ConnectionState) {
        if let Some(conn) = self
            .subscription
            .as_ref()
            .and_then(|s| s.connection.upgrade())
        {
            conn.mark_state(state);
        }
    }

    /// Published under the book lock so observers see arrival order
    fn apply_live(&self, book: &mut B, update: B::Update) {
        book.apply(&update);
        self.updates.push_next(update);
        self.push_requested.store(true, Ordering::Release);
    }

    fn desynchronized(&self, expected: u64, received: u64) {
        self.initialized.store(false, Ordering::Release);
        self.calibrated.store(false, Ordering::Release);
        self.push_requested.store(false, Ordering::Release);
        warn!(symbol = %self.symbol, expected, received, "Sequence gap, resynchronizing");
        self.emit(ObservationEvent::Desynchronized {
            symbol: self.symbol.clone(),
            expected,
            received,
        });
    }

    /// Move to Initializing if the buffer has waited a full cycle
    fn due_for_snapshot(&self) -> Option<u64> {
        let mut core = self.core.lock();
        if core.state != CalibrationState::Buffering {
            return None;
        }
        let first = core.first_buffered_at?;
        if first.elapsed() < self.config.cycle {
            return None;
        }
        core.state = CalibrationState::Initializing;
        Some(core.epoch)
    }

    async fn calibrate(&self, epoch: u64) {
        self.mark_connection(ConnectionState::Initializing);
        debug!(symbol = %self.symbol, "Fetching snapshot");

        let limit = self.config.snapshot_timeout;
        let fetched = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = timeout(limit, self.source.fetch(&self.symbol)) => result,
        };
        let snapshot = match fetched {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => return self.fault(epoch, e),
            Err(_) => {
                return self.fault(
                    epoch,
                    KucoinError::SnapshotTimeout {
                        symbol: self.symbol.clone(),
                        timeout: limit,
                    },
                )
            }
        };

        let mut book = B::from_snapshot(&self.symbol, snapshot);
        let snapshot_sequence = book.sequence();

        let outcome = {
            let mut core = self.core.lock();
            if core.epoch != epoch || core.state != CalibrationState::Initializing {
                debug!(symbol = %self.symbol, "Snapshot arrived after a reset, ignoring");
                return;
            }
            let buffered = std::mem::take(&mut core.buffer);
            match self.replay(&mut book, buffered) {
                Replay::Calibrated { applied, discarded } => {
                    let count = applied.len();
                    for update in applied {
                        self.updates.push_next(update);
                    }
                    let sequence = book.sequence();
                    core.book = Some(book);
                    core.state = CalibrationState::Calibrated;
                    core.first_buffered_at = None;
                    Ok((sequence, count, discarded))
                }
                Replay::Gap {
                    expected,
                    received,
                    rest,
                } => {
                    core.restart(CalibrationState::Buffering);
                    core.buffer = rest;
                    core.first_buffered_at = Some(Instant::now());
                    Err((expected, received))
                }
            }
        };

        self.emit(ObservationEvent::Initialized {
            symbol: self.symbol.clone(),
            sequence: snapshot_sequence,
        });
        match outcome {
            Ok((sequence, applied, discarded)) => {
                self.initialized.store(true, Ordering::Release);
                self.calibrated.store(true, Ordering::Release);
                self.push_requested.store(true, Ordering::Release);
                info!(symbol = %self.symbol, sequence, applied, discarded, "Calibrated");
                self.emit(ObservationEvent::Calibrated {
                    symbol: self.symbol.clone(),
                    sequence,
                    applied,
                    discarded,
                });
                self.mark_connection(ConnectionState::Running);
            }
            Err((expected, received)) => self.desynchronized(expected, received),
        }
    }

    /// Replay buffered diffs in arrival order onto a fresh book
    fn replay(&self, book: &mut B, buffered: Vec<B::Update>) -> Replay<B::Update> {
        let mut applied = Vec::with_capacity(buffered.len());
        let mut discarded = 0;
        let mut pending = buffered.into_iter();

        while let Some(update) = pending.next() {
            match book.classify(&update) {
                SequenceCheck::Stale => discarded += 1,
                SequenceCheck::Next => {
                    book.apply(&update);
                    applied.push(update);
                }
                SequenceCheck::Gap { expected, received } => match self.config.gap_policy {
                    GapPolicy::Permissive => {
                        warn!(symbol = %self.symbol, expected, received, "Gap during replay, applying anyway");
                        book.apply(&update);
                        applied.push(update);
                    }
                    GapPolicy::Resync => {
                        let mut rest = vec![update];
                        rest.extend(pending);
                        return Replay::Gap {
                            expected,
                            received,
                            rest,
                        };
                    }
                },
            }
        }

        Replay::Calibrated { applied, discarded }
    }

    fn fault(&self, epoch: u64, err: KucoinError) {
        {
            let mut core = self.core.lock();
            if core.epoch != epoch || core.state != CalibrationState::Initializing {
                return;
            }
            core.restart(CalibrationState::Faulted);
        }
        error!(symbol = %self.symbol, error = %err, "Snapshot failed");
        self.emit(ObservationEvent::SnapshotFailed {
            symbol: self.symbol.clone(),
            error: err,
        });
    }

    /// Publish the live book if something changed and the interval allows
    fn maybe_push(&self) {
        if !self.push_requested.load(Ordering::Acquire) {
            return;
        }
        let live = {
            let mut core = self.core.lock();
            if let Some(last) = core.last_push {
                if last.elapsed() < self.config.update_interval {
                    return;
                }
            }
            let Some(book) = core.book.as_ref() else {
                return;
            };
            let live = Arc::new(book.project(self.config.pieces));
            core.last_push = Some(Instant::now());
            self.push_requested.store(false, Ordering::Release);
            live
        };
        trace!(symbol = %self.symbol, sequence = live.sequence, "Pushing live book");
        *self.live.write() = live.clone();
        self.books.push_next(live);
    }
}

async fn run<B: OrderBook>(shared: Arc<Shared<B>>) {
    let mut tick = interval(shared.config.push_tick);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = tick.tick() => {}
        }
        if let Some(epoch) = shared.due_for_snapshot() {
            shared.calibrate(epoch).await;
        }
        shared.maybe_push();
    }
    debug!(symbol = %shared.symbol, "Observation loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{eventually, ScriptedSource};
    use kucoin_book::{L3Book, Level2Book};
    use kucoin_types::{
        Level, Level2Snapshot, Level2Update, Level3Snapshot, Level3Update, PriceChange, Side,
        SnapshotOrder,
    };
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const SYMBOL: &str = "BTC-USDT";

    fn l2_snapshot(sequence: u64) -> Level2Snapshot {
        Level2Snapshot {
            sequence,
            time: 0,
            asks: vec![Level::new(dec!(101), dec!(1))],
            bids: vec![Level::new(dec!(99), dec!(1))],
        }
    }

    fn l2_diff(sequence: u64, price: rust_decimal::Decimal, size: rust_decimal::Decimal) -> Level2Update {
        Level2Update::new(
            SYMBOL,
            sequence,
            sequence,
            vec![PriceChange::new(price, size, sequence)],
            vec![],
        )
    }

    fn l2_observation(
        source: &Arc<ScriptedSource<Level2Snapshot>>,
        config: ObservationConfig,
    ) -> Arc<Observation<Level2Book>> {
        Observation::standalone(SYMBOL, config, source.clone()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_skips_what_the_snapshot_contains() {
        let source = ScriptedSource::returning(l2_snapshot(100));
        let obs = l2_observation(&source, ObservationConfig::default());
        let mut events = obs.subscribe_events();

        obs.on_next(l2_diff(97, dec!(105), dec!(9)));
        obs.on_next(l2_diff(99, dec!(106), dec!(9)));
        obs.on_next(l2_diff(101, dec!(102), dec!(2)));
        obs.on_next(l2_diff(102, dec!(103), dec!(3)));
        assert_eq!(obs.state(), CalibrationState::Buffering);
        assert_eq!(obs.buffered_len(), 4);
        assert!(obs.sequence().is_none());

        eventually(|| obs.is_calibrated()).await;
        assert!(obs.is_initialized());
        assert_eq!(obs.sequence(), Some(102));
        assert_eq!(source.calls(), 1);

        let asks = obs.with_book(|b| b.top_asks(0)).unwrap();
        let prices: Vec<_> = asks.iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![dec!(101), dec!(102), dec!(103)]);

        loop {
            if let ObservationEvent::Calibrated {
                applied, discarded, ..
            } = events.recv().await.unwrap()
            {
                assert_eq!((applied, discarded), (2, 2));
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_waits_for_cycle() {
        let source = ScriptedSource::returning(l2_snapshot(10));
        let obs = l2_observation(&source, ObservationConfig::default().with_cycle(Duration::from_secs(2)));

        obs.on_next(l2_diff(11, dec!(102), dec!(1)));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(source.calls(), 0);

        eventually(|| obs.is_calibrated()).await;
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivered_match_is_not_applied_twice() {
        let snapshot = Level3Snapshot {
            sequence: 10,
            time: 0,
            asks: vec![SnapshotOrder {
                order_id: "A".into(),
                price: dec!(101),
                size: dec!(5),
                time: 0,
            }],
            bids: vec![],
        };
        let source = ScriptedSource::returning(snapshot);
        let obs: Arc<Observation<L3Book>> =
            Observation::standalone(SYMBOL, ObservationConfig::default(), source.clone()).unwrap();

        let fill = Level3Update::matched(SYMBOL, 11, Side::Buy, "A", dec!(2));
        obs.on_next(fill.clone());
        eventually(|| obs.is_calibrated()).await;
        assert_eq!(obs.with_book(|b| b.get_order("A").map(|o| o.size)).flatten(), Some(dec!(3)));

        obs.on_next(fill);
        assert_eq!(obs.with_book(|b| b.get_order("A").map(|o| o.size)).flatten(), Some(dec!(3)));
        assert_eq!(obs.sequence(), Some(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_triggers_resync() {
        let source = ScriptedSource::returning(l2_snapshot(100));
        let obs = l2_observation(&source, ObservationConfig::default());
        obs.on_next(l2_diff(101, dec!(102), dec!(1)));
        eventually(|| obs.is_calibrated()).await;
        let mut events = obs.subscribe_events();

        obs.on_next(l2_diff(105, dec!(104), dec!(4)));
        assert_eq!(obs.state(), CalibrationState::Buffering);
        assert_eq!(obs.buffered_len(), 1);
        assert!(!obs.is_calibrated());
        match events.recv().await.unwrap() {
            ObservationEvent::Desynchronized { expected, received, .. } => {
                assert_eq!((expected, received), (102, 105));
            }
            other => panic!("unexpected {other:?}"),
        }

        source.set(l2_snapshot(104));
        eventually(|| obs.is_calibrated()).await;
        assert_eq!(obs.sequence(), Some(105));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permissive_applies_across_gap() {
        let source = ScriptedSource::returning(l2_snapshot(100));
        let obs = l2_observation(
            &source,
            ObservationConfig::default().with_gap_policy(GapPolicy::Permissive),
        );
        obs.on_next(l2_diff(101, dec!(102), dec!(1)));
        eventually(|| obs.is_calibrated()).await;

        obs.on_next(l2_diff(105, dec!(104), dec!(4)));
        assert!(obs.is_calibrated());
        assert_eq!(obs.sequence(), Some(105));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_failure_faults_until_reset() {
        let source = ScriptedSource::failing();
        let obs = l2_observation(&source, ObservationConfig::default());
        let mut events = obs.subscribe_events();

        obs.on_next(l2_diff(101, dec!(102), dec!(1)));
        match events.recv().await.unwrap() {
            ObservationEvent::SnapshotFailed { symbol, error } => {
                assert_eq!(symbol, SYMBOL);
                assert!(matches!(error, KucoinError::SnapshotFailed { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(obs.state(), CalibrationState::Faulted);

        obs.on_next(l2_diff(102, dec!(102), dec!(1)));
        assert_eq!(obs.buffered_len(), 0);

        source.set(l2_snapshot(100));
        obs.reset().unwrap();
        assert_eq!(obs.state(), CalibrationState::Buffering);
        obs.on_next(l2_diff(103, dec!(102), dec!(1)));
        eventually(|| obs.is_calibrated()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_timeout() {
        let source = ScriptedSource::hanging();
        let obs = l2_observation(
            &source,
            ObservationConfig::default().with_snapshot_timeout(Duration::from_secs(3)),
        );
        let mut events = obs.subscribe_events();

        obs.on_next(l2_diff(101, dec!(102), dec!(1)));
        match events.recv().await.unwrap() {
            ObservationEvent::SnapshotFailed { error, .. } => {
                assert!(matches!(error, KucoinError::SnapshotTimeout { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(obs.state(), CalibrationState::Faulted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_book_is_truncated() {
        let asks = (0..200)
            .map(|i| Level::new(dec!(1000) + rust_decimal::Decimal::from(i), dec!(1)))
            .collect();
        let snapshot = Level2Snapshot {
            sequence: 5,
            time: 0,
            asks,
            bids: vec![],
        };
        let source = ScriptedSource::returning(snapshot);
        let obs = l2_observation(&source, ObservationConfig::default());
        let mut pushes = obs.observe();

        obs.on_next(l2_diff(6, dec!(999), dec!(1)));
        let live = pushes.recv().await.unwrap();
        assert_eq!(live.asks.len(), 50);
        assert_eq!(live.asks[0].price, dec!(999));
        assert_eq!(live.sequence, 6);
        assert_eq!(obs.live_book().asks.len(), 50);
        assert_eq!(obs.with_book(|b| b.top_asks(0).len()), Some(201));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushes_are_rate_limited() {
        let source = ScriptedSource::returning(l2_snapshot(100));
        let obs = l2_observation(
            &source,
            ObservationConfig::default().with_update_interval(Duration::from_secs(1)),
        );
        let mut pushes = obs.observe();
        obs.on_next(l2_diff(101, dec!(102), dec!(1)));
        pushes.recv().await.unwrap();

        obs.on_next(l2_diff(102, dec!(102), dec!(2)));
        obs.on_next(l2_diff(103, dec!(102), dec!(3)));
        let before = Instant::now();
        let live = pushes.recv().await.unwrap();
        assert!(before.elapsed() >= Duration::from_millis(900));
        assert_eq!(live.sequence, 103);
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_stream_in_order() {
        let source = ScriptedSource::returning(l2_snapshot(100));
        let obs = l2_observation(&source, ObservationConfig::default());
        let mut updates = obs.updates();

        for seq in [99, 101, 102] {
            obs.on_next(l2_diff(seq, dec!(102), dec!(1)));
        }
        eventually(|| obs.is_calibrated()).await;
        obs.on_next(l2_diff(103, dec!(102), dec!(1)));

        let mut seen = Vec::new();
        while let Some(update) = updates.try_recv() {
            seen.push(update.sequence_start);
        }
        assert_eq!(seen, vec![101, 102, 103]);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let source = ScriptedSource::returning(l2_snapshot(1));
        let obs = l2_observation(&source, ObservationConfig::default());
        obs.dispose();
        obs.dispose();
        assert!(obs.is_disposed());
        assert!(matches!(obs.reset(), Err(KucoinError::Disposed)));
        obs.on_next(l2_diff(2, dec!(1), dec!(1)));
        assert_eq!(obs.buffered_len(), 0);
    }

    #[test]
    fn test_requires_runtime() {
        let source = ScriptedSource::returning(l2_snapshot(1));
        let result: KucoinResult<Arc<Observation<Level2Book>>> =
            Observation::standalone(SYMBOL, ObservationConfig::default(), source);
        assert!(matches!(result, Err(KucoinError::Configuration(_))));
    }
}
