//! Level 2 (aggregated price level) book

use kucoin_types::{Level, Level2Snapshot, Level2Update, PriceChange};
use rust_decimal::Decimal;

use crate::orderbook::{BookSide, OrderBook};
use crate::storage::TreeBook;

/// Full-depth Level 2 book for one symbol
#[derive(Debug, Clone)]
pub struct Level2Book {
    symbol: String,
    storage: TreeBook,
    sequence: u64,
    timestamp: i64,
}

impl Level2Book {
    /// Empty book at sequence 0
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            storage: TreeBook::new(),
            sequence: 0,
            timestamp: 0,
        }
    }

    pub fn storage(&self) -> &TreeBook {
        &self.storage
    }

    pub fn best_bid(&self) -> Option<Level> {
        self.storage.best_bid()
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.storage.best_ask()
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    pub fn size_at(&self, side: BookSide, price: Decimal) -> Option<Decimal> {
        self.storage.size_at(side, price)
    }

    // Rows stamped at or below the current sequence are already in the book
    fn apply_rows(&mut self, side: BookSide, rows: &[PriceChange], floor: u64) -> usize {
        rows.iter()
            .filter(|row| row.sequence == 0 || row.sequence > floor)
            .filter(|row| self.storage.set(side, row.price, row.size))
            .count()
    }
}

impl OrderBook for Level2Book {
    type Unit = Level;
    type Update = Level2Update;
    type Snapshot = Level2Snapshot;

    fn from_snapshot(symbol: &str, snapshot: Level2Snapshot) -> Self {
        let mut book = Self::new(symbol);
        for level in snapshot.asks {
            book.storage.set(BookSide::Ask, level.price, level.size);
        }
        for level in snapshot.bids {
            book.storage.set(BookSide::Bid, level.price, level.size);
        }
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

    fn apply(&mut self, update: &Level2Update) -> usize {
        let floor = self.sequence;
        let changed = self.apply_rows(BookSide::Ask, &update.changes.asks, floor)
            + self.apply_rows(BookSide::Bid, &update.changes.bids, floor);

        self.sequence = self.sequence.max(update.sequence_end);
        if update.time != 0 {
            self.timestamp = update.time;
        }
        changed
    }

    fn top_asks(&self, pieces: usize) -> Vec<Level> {
        self.storage.top_asks(pieces)
    }

    fn top_bids(&self, pieces: usize) -> Vec<Level> {
        self.storage.top_bids(pieces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::SequenceCheck;
    use rust_decimal_macros::dec;

    fn snapshot(sequence: u64) -> Level2Snapshot {
        Level2Snapshot {
            sequence,
            time: 1,
            asks: vec![Level::new(dec!(101), dec!(1)), Level::new(dec!(102), dec!(2))],
            bids: vec![Level::new(dec!(100), dec!(5)), Level::new(dec!(99), dec!(1))],
        }
    }

    fn ask(price: Decimal, size: Decimal, seq: u64) -> PriceChange {
        PriceChange::new(price, size, seq)
    }

    #[test]
    fn test_from_snapshot() {
        let book = Level2Book::from_snapshot("BTC-USDT", snapshot(100));
        assert_eq!(book.sequence(), 100);
        assert_eq!(book.best_ask().unwrap().price, dec!(101));
        assert_eq!(book.best_bid().unwrap().price, dec!(100));
        assert_eq!(book.spread(), Some(dec!(1)));
    }

    #[test]
    fn test_apply_insert_update_remove() {
        let mut book = Level2Book::from_snapshot("BTC-USDT", snapshot(100));
        let update = Level2Update::new(
            "BTC-USDT",
            101,
            103,
            vec![ask(dec!(101), dec!(0), 101), ask(dec!(103), dec!(4), 102)],
            vec![ask(dec!(100), dec!(6), 103)],
        );
        assert_eq!(book.classify(&update), SequenceCheck::Next);
        assert_eq!(book.apply(&update), 3);

        assert_eq!(book.sequence(), 103);
        assert_eq!(book.size_at(BookSide::Ask, dec!(101)), None);
        assert_eq!(book.size_at(BookSide::Ask, dec!(103)), Some(dec!(4)));
        assert_eq!(book.size_at(BookSide::Bid, dec!(100)), Some(dec!(6)));
    }

    #[test]
    fn test_stale_update_classified() {
        let book = Level2Book::from_snapshot("BTC-USDT", snapshot(100));
        let update = Level2Update::new("BTC-USDT", 99, 100, vec![], vec![]);
        assert_eq!(book.classify(&update), SequenceCheck::Stale);
    }

    #[test]
    fn test_gap_classified() {
        let book = Level2Book::from_snapshot("BTC-USDT", snapshot(100));
        let update = Level2Update::new("BTC-USDT", 105, 106, vec![], vec![]);
        assert_eq!(
            book.classify(&update),
            SequenceCheck::Gap {
                expected: 101,
                received: 105
            }
        );
    }

    #[test]
    fn test_straddling_batch_applies_only_new_rows() {
        let mut book = Level2Book::from_snapshot("BTC-USDT", snapshot(100));
        // Row at 99 is already in the snapshot and must not be replayed
        let update = Level2Update::new(
            "BTC-USDT",
            99,
            101,
            vec![ask(dec!(101), dec!(9), 99), ask(dec!(102), dec!(7), 101)],
            vec![],
        );
        assert_eq!(book.classify(&update), SequenceCheck::Next);
        assert_eq!(book.apply(&update), 1);
        assert_eq!(book.size_at(BookSide::Ask, dec!(101)), Some(dec!(1)));
        assert_eq!(book.size_at(BookSide::Ask, dec!(102)), Some(dec!(7)));
        assert_eq!(book.sequence(), 101);
    }

    #[test]
    fn test_truncated_projection() {
        let mut asks = Vec::new();
        for i in 0..200 {
            asks.push(Level::new(Decimal::from(1000 - i), dec!(1)));
        }
        let snap = Level2Snapshot {
            sequence: 1,
            time: 0,
            asks,
            bids: vec![],
        };
        let book = Level2Book::from_snapshot("BTC-USDT", snap);
        let live = book.project(50);

        assert_eq!(live.asks.len(), 50);
        assert_eq!(live.asks[0].price, dec!(801));
        assert_eq!(live.asks[49].price, dec!(850));
        assert!(live.asks.windows(2).all(|w| w[0].price < w[1].price));
        assert_eq!(book.project(0).asks.len(), 200);
    }
}
