//! Bounded-depth, read-optimized projection of a full-depth book

use kucoin_types::Keyed;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::orderbook::BookUnit;

/// Default live depth
pub const DEFAULT_PIECES: usize = 50;

/// Truncated view pushed to consumers
///
/// Asks are ascending and bids descending. Every unit was copied under the
/// same lock, so all of them reflect `sequence`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveBook<U> {
    pub symbol: String,
    pub sequence: u64,
    pub timestamp: i64,
    pub asks: Vec<U>,
    pub bids: Vec<U>,
}

impl<U: BookUnit> LiveBook<U> {
    /// Empty view for a symbol that has not been calibrated
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            sequence: 0,
            timestamp: 0,
            asks: Vec::new(),
            bids: Vec::new(),
        }
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(BookUnit::price)
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(BookUnit::price)
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        Some((self.best_ask()? + self.best_bid()?) / Decimal::TWO)
    }

    /// Sum of sizes on each side: (asks, bids)
    pub fn depth_totals(&self) -> (Decimal, Decimal) {
        let asks = self.asks.iter().map(BookUnit::size).sum();
        let bids = self.bids.iter().map(BookUnit::size).sum();
        (asks, bids)
    }

    /// A crossed book means something upstream is out of sync
    pub fn is_crossed(&self) -> bool {
        matches!((self.best_bid(), self.best_ask()), (Some(bid), Some(ask)) if bid >= ask)
    }
}

impl<U> Keyed for LiveBook<U> {
    fn key(&self) -> &str {
        &self.symbol
    }
}
