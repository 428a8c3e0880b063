//! L3 orderbook storage with order-level tracking

use kucoin_types::{Level, Level3Snapshot, Level3Subject, Level3Update, SnapshotOrder};
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use crate::l3::order::{L3Order, L3PriceLevel, OrderLocation};
use crate::orderbook::{BookSide, OrderBook};
use crate::storage::limit;

/// L3 orderbook with individual order tracking
///
/// - BTreeMap of price levels for sorted iteration
/// - HashMap order index for O(1) lookup by order ID
///
/// # Example
///
/// ```
/// use kucoin_book::l3::{L3Book, L3Order};
/// use kucoin_book::BookSide;
/// use rust_decimal_macros::dec;
///
/// let mut book = L3Book::new("BTC-USDT");
/// book.add_order(L3Order::new("order1", dec!(100), dec!(1)), BookSide::Bid);
/// book.add_order(L3Order::new("order2", dec!(100), dec!(2)), BookSide::Bid);
///
/// let bids = book.aggregated_bids(0);
/// assert_eq!(bids[0].size, dec!(3));
/// ```
#[derive(Debug, Clone)]
pub struct L3Book {
    symbol: String,
    bids: BTreeMap<Reverse<Decimal>, L3PriceLevel>,
    asks: BTreeMap<Decimal, L3PriceLevel>,
    order_index: HashMap<String, OrderLocation>,
    sequence: u64,
    timestamp: i64,
}

impl L3Book {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            order_index: HashMap::new(),
            sequence: 0,
            timestamp: 0,
        }
    }

    // ========================================================================
    // Order Operations
    // ========================================================================

    /// Add a new order at the back of its price queue
    ///
    /// Returns false if the ID is already resting.
    pub fn add_order(&mut self, order: L3Order, side: BookSide) -> bool {
        if self.order_index.contains_key(&order.order_id) {
            return false;
        }

        let price = order.price;
        self.order_index
            .insert(order.order_id.clone(), OrderLocation { price, side });

        match side {
            BookSide::Bid => self
                .bids
                .entry(Reverse(price))
                .or_insert_with(|| L3PriceLevel::new(price))
                .push(order),
            BookSide::Ask => self
                .asks
                .entry(price)
                .or_insert_with(|| L3PriceLevel::new(price))
                .push(order),
        }
        true
    }

    /// Remove an order, dropping its level when it empties
    pub fn remove_order(&mut self, order_id: &str) -> Option<L3Order> {
        let location = self.order_index.remove(order_id)?;

        match location.side {
            BookSide::Bid => {
                let key = Reverse(location.price);
                let level = self.bids.get_mut(&key)?;
                let order = level.remove(order_id);
                if level.is_empty() {
                    self.bids.remove(&key);
                }
                order
            }
            BookSide::Ask => {
                let level = self.asks.get_mut(&location.price)?;
                let order = level.remove(order_id);
                if level.is_empty() {
                    self.asks.remove(&location.price);
                }
                order
            }
        }
    }

    /// Set an order's remaining size; zero removes it
    pub fn resize_order(&mut self, order_id: &str, new_size: Decimal) -> bool {
        if new_size <= Decimal::ZERO {
            return self.remove_order(order_id).is_some();
        }

        let Some(location) = self.order_index.get(order_id).copied() else {
            return false;
        };
        match location.side {
            BookSide::Bid => self
                .bids
                .get_mut(&Reverse(location.price))
                .is_some_and(|level| level.resize(order_id, new_size)),
            BookSide::Ask => self
                .asks
                .get_mut(&location.price)
                .is_some_and(|level| level.resize(order_id, new_size)),
        }
    }

    /// Reduce a resting order by a matched size
    ///
    /// The maker must rest on `maker_side`. Returns false if it does not.
    pub fn fill_order(&mut self, order_id: &str, maker_side: BookSide, filled: Decimal) -> bool {
        let Some(location) = self.order_index.get(order_id).copied() else {
            return false;
        };
        if location.side != maker_side {
            return false;
        }
        let Some(remaining) = self.get_order(order_id).map(|o| o.size - filled) else {
            return false;
        };
        self.resize_order(order_id, remaining)
    }

    pub fn get_order(&self, order_id: &str) -> Option<&L3Order> {
        let location = self.order_index.get(order_id)?;
        match location.side {
            BookSide::Bid => self.bids.get(&Reverse(location.price))?.get(order_id),
            BookSide::Ask => self.asks.get(&location.price)?.get(order_id),
        }
    }

    pub fn order_side(&self, order_id: &str) -> Option<BookSide> {
        self.order_index.get(order_id).map(|loc| loc.side)
    }

    pub fn has_order(&self, order_id: &str) -> bool {
        self.order_index.contains_key(order_id)
    }

    // ========================================================================
    // Book Operations
    // ========================================================================

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.order_index.clear();
        self.sequence = 0;
    }

    pub fn best_bid_price(&self) -> Option<Decimal> {
        self.bids.values().next().map(|l| l.price)
    }

    pub fn best_ask_price(&self) -> Option<Decimal> {
        self.asks.values().next().map(|l| l.price)
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask_price()? - self.best_bid_price()?)
    }

    /// Bid levels, highest first
    pub fn bid_levels(&self) -> impl Iterator<Item = &L3PriceLevel> {
        self.bids.values()
    }

    /// Ask levels, lowest first
    pub fn ask_levels(&self) -> impl Iterator<Item = &L3PriceLevel> {
        self.asks.values()
    }

    pub fn bid_level_count(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_level_count(&self) -> usize {
        self.asks.len()
    }

    /// Total number of resting orders
    pub fn order_count(&self) -> usize {
        self.order_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order_index.is_empty()
    }

    // ========================================================================
    // Aggregation
    // ========================================================================

    /// Bids aggregated into Level 2 rows; `0` means all levels
    pub fn aggregated_bids(&self, n: usize) -> Vec<Level> {
        self.bids
            .values()
            .take(limit(n))
            .map(|level| Level::new(level.price, level.total_size()))
            .collect()
    }

    /// Asks aggregated into Level 2 rows; `0` means all levels
    pub fn aggregated_asks(&self, n: usize) -> Vec<Level> {
        self.asks
            .values()
            .take(limit(n))
            .map(|level| Level::new(level.price, level.total_size()))
            .collect()
    }

    fn insert_snapshot_side(&mut self, mut orders: Vec<SnapshotOrder>, side: BookSide) {
        // FIFO within a price is by placement time
        orders.sort_by_key(|o| o.time);
        for o in orders {
            let order = L3Order::new(o.order_id, o.price, o.size).with_time(o.time);
            self.add_order(order, side);
        }
    }

    fn apply_event(&mut self, update: &Level3Update) -> bool {
        match update.subject {
            Level3Subject::Received => false,
            Level3Subject::Open => {
                let (Some(side), Some(id), Some(price), Some(size)) = (
                    update.side,
                    update.order_id.as_deref(),
                    update.price,
                    update.size,
                ) else {
                    return false;
                };
                if size <= Decimal::ZERO {
                    return false;
                }
                let order = L3Order::new(id, price, size).with_time(update.time);
                self.add_order(order, side.into())
            }
            Level3Subject::Change => match (update.order_id.as_deref(), update.new_size) {
                (Some(id), Some(new_size)) => self.resize_order(id, new_size),
                _ => false,
            },
            Level3Subject::Match => {
                let (Some(maker), Some(size)) = (update.maker_order_id.as_deref(), update.size)
                else {
                    return false;
                };
                match update.side {
                    // The maker rests on the side opposite the taker
                    Some(taker) => self.fill_order(maker, BookSide::from(taker).opposite(), size),
                    None => match self.order_side(maker) {
                        Some(side) => self.fill_order(maker, side, size),
                        None => false,
                    },
                }
            }
            Level3Subject::Done => update
                .order_id
                .as_deref()
                .is_some_and(|id| self.remove_order(id).is_some()),
        }
    }
}

impl OrderBook for L3Book {
    type Unit = L3Order;
    type Update = Level3Update;
    type Snapshot = Level3Snapshot;

    fn from_snapshot(symbol: &str, snapshot: Level3Snapshot) -> Self {
        let mut book = Self::new(symbol);
        book.insert_snapshot_side(snapshot.asks, BookSide::Ask);
        book.insert_snapshot_side(snapshot.bids, BookSide::Bid);
        book.sequence = snapshot.sequence;
        book.timestamp = snapshot.time;
        book
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn apply(&mut self, update: &Level3Update) -> usize {
        let changed = self.apply_event(update);
        self.sequence = self.sequence.max(update.sequence);
        if update.time != 0 {
            self.timestamp = update.time;
        }
        usize::from(changed)
    }

    /// Orders from the best `pieces` ask levels, price-time ordered
    fn top_asks(&self, pieces: usize) -> Vec<L3Order> {
        self.asks
            .values()
            .take(limit(pieces))
            .flat_map(|level| level.orders().cloned())
            .collect()
    }

    /// Orders from the best `pieces` bid levels, price-time ordered
    fn top_bids(&self, pieces: usize) -> Vec<L3Order> {
        self.bids
            .values()
            .take(limit(pieces))
            .flat_map(|level| level.orders().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::SequenceCheck;
    use kucoin_types::Side;
    use rust_decimal_macros::dec;

    fn seeded() -> L3Book {
        let snapshot = Level3Snapshot {
            sequence: 100,
            time: 0,
            asks: vec![
                SnapshotOrder {
                    order_id: "a2".into(),
                    price: dec!(101),
                    size: dec!(2),
                    time: 2,
                },
                SnapshotOrder {
                    order_id: "a1".into(),
                    price: dec!(101),
                    size: dec!(1),
                    time: 1,
                },
            ],
            bids: vec![SnapshotOrder {
                order_id: "b1".into(),
                price: dec!(99),
                size: dec!(5),
                time: 1,
            }],
        };
        L3Book::from_snapshot("BTC-USDT", snapshot)
    }

    #[test]
    fn test_snapshot_fifo_by_time() {
        let book = seeded();
        assert_eq!(book.sequence(), 100);
        let ids: Vec<_> = book.top_asks(0).into_iter().map(|o| o.order_id).collect();
        assert_eq!(ids, ["a1", "a2"]);
        assert_eq!(book.aggregated_asks(0)[0].size, dec!(3));
    }

    #[test]
    fn test_open_inserts() {
        let mut book = seeded();
        let update = Level3Update::open("BTC-USDT", 101, Side::Buy, "b2", dec!(100), dec!(1));
        assert_eq!(book.classify(&update), SequenceCheck::Next);
        assert_eq!(book.apply(&update), 1);
        assert_eq!(book.best_bid_price(), Some(dec!(100)));
        assert_eq!(book.sequence(), 101);
    }

    #[test]
    fn test_change_resizes() {
        let mut book = seeded();
        book.apply(&Level3Update::change("BTC-USDT", 101, "b1", dec!(2)));
        assert_eq!(book.get_order("b1").unwrap().size, dec!(2));
    }

    #[test]
    fn test_match_decrements_maker_on_opposite_side() {
        let mut book = seeded();
        // Taker buys into resting ask a1
        let update = Level3Update::matched("BTC-USDT", 101, Side::Buy, "a1", dec!(0.4));
        assert_eq!(book.apply(&update), 1);
        assert_eq!(book.get_order("a1").unwrap().size, dec!(0.6));
        assert_eq!(book.aggregated_asks(1)[0].size, dec!(2.6));

        // Full fill removes the maker
        book.apply(&Level3Update::matched("BTC-USDT", 102, Side::Buy, "a1", dec!(0.6)));
        assert!(!book.has_order("a1"));
    }

    #[test]
    fn test_match_on_wrong_side_is_ignored() {
        let mut book = seeded();
        // A sell taker cannot hit a resting ask
        let update = Level3Update::matched("BTC-USDT", 101, Side::Sell, "a1", dec!(0.4));
        assert_eq!(book.apply(&update), 0);
        assert_eq!(book.get_order("a1").unwrap().size, dec!(1));
        // The sequence still advances
        assert_eq!(book.sequence(), 101);
    }

    #[test]
    fn test_done_removes() {
        let mut book = seeded();
        book.apply(&Level3Update::done("BTC-USDT", 101, "b1"));
        assert!(book.best_bid_price().is_none());
        assert_eq!(book.bid_level_count(), 0);
    }

    #[test]
    fn test_received_only_advances_sequence() {
        let mut book = seeded();
        let received = Level3Update::new(Level3Subject::Received, "BTC-USDT", 101);
        assert_eq!(book.apply(&received), 0);
        assert_eq!(book.sequence(), 101);
        assert_eq!(book.order_count(), 3);
    }

    #[test]
    fn test_duplicate_is_stale() {
        let mut book = seeded();
        let open = Level3Update::open("BTC-USDT", 101, Side::Sell, "a3", dec!(102), dec!(1));
        book.apply(&open);
        assert_eq!(book.classify(&open), SequenceCheck::Stale);
    }

    #[test]
    fn test_projection_by_levels() {
        let mut book = seeded();
        book.add_order(L3Order::new("a3", dec!(102), dec!(1)), BookSide::Ask);
        // One level holds both a1 and a2
        assert_eq!(book.top_asks(1).len(), 2);
        assert_eq!(book.top_asks(2).len(), 3);
    }
}
