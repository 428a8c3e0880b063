//! BTreeMap-based price level storage
//!
//! Provides O(log N) operations for Level 2 book management.
//! Uses `Reverse<Decimal>` for bids to maintain descending order.

use kucoin_types::Level;
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::BookSide;

/// Price level storage
///
/// - Bids: keyed by `Reverse<Decimal>` so iteration starts at the highest price
/// - Asks: keyed by `Decimal` so iteration starts at the lowest price
#[derive(Debug, Clone, Default)]
pub struct TreeBook {
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl TreeBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the size at a price; zero removes the level
    ///
    /// Returns true if the book changed.
    pub fn set(&mut self, side: BookSide, price: Decimal, size: Decimal) -> bool {
        match (side, size.is_zero()) {
            (BookSide::Bid, true) => self.bids.remove(&Reverse(price)).is_some(),
            (BookSide::Ask, true) => self.asks.remove(&price).is_some(),
            (BookSide::Bid, false) => self.bids.insert(Reverse(price), size) != Some(size),
            (BookSide::Ask, false) => self.asks.insert(price, size) != Some(size),
        }
    }

    /// Size resting at a price
    pub fn size_at(&self, side: BookSide, price: Decimal) -> Option<Decimal> {
        match side {
            BookSide::Bid => self.bids.get(&Reverse(price)).copied(),
            BookSide::Ask => self.asks.get(&price).copied(),
        }
    }

    pub fn best_bid(&self) -> Option<Level> {
        self.bids
            .iter()
            .next()
            .map(|(Reverse(price), size)| Level::new(*price, *size))
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.asks
            .iter()
            .next()
            .map(|(price, size)| Level::new(*price, *size))
    }

    /// Iterator over bids (highest to lowest price)
    pub fn bids(&self) -> impl Iterator<Item = Level> + '_ {
        self.bids
            .iter()
            .map(|(Reverse(price), size)| Level::new(*price, *size))
    }

    /// Iterator over asks (lowest to highest price)
    pub fn asks(&self) -> impl Iterator<Item = Level> + '_ {
        self.asks.iter().map(|(price, size)| Level::new(*price, *size))
    }

    /// Top `n` bids; `0` means every level
    pub fn top_bids(&self, n: usize) -> Vec<Level> {
        self.bids().take(limit(n)).collect()
    }

    /// Top `n` asks; `0` means every level
    pub fn top_asks(&self, n: usize) -> Vec<Level> {
        self.asks().take(limit(n)).collect()
    }

    pub fn bid_count(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_count(&self) -> usize {
        self.asks.len()
    }

    pub fn level_count(&self) -> usize {
        self.bid_count() + self.ask_count()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }
}

/// Depth limit where 0 means unbounded
pub(crate) fn limit(pieces: usize) -> usize {
    if pieces == 0 {
        usize::MAX
    } else {
        pieces
    }
}
