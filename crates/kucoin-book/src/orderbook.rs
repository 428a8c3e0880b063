//! The `OrderBook` abstraction shared by the Level 2 and Level 3 books
//!
//! A calibration engine only needs four things from a book: build it from a
//! REST snapshot, tell where it is in the sequence, apply the next update and
//! project the top of book for consumers. Both market-data levels implement
//! this trait, so the engine is written once over `B: OrderBook`.

use kucoin_types::{Keyed, Level, Sequenced, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::live::LiveBook;

/// Book side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookSide {
    Bid,
    Ask,
}

impl BookSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Bid => Self::Ask,
            Self::Ask => Self::Bid,
        }
    }
}

impl From<Side> for BookSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => Self::Bid,
            Side::Sell => Self::Ask,
        }
    }
}

/// Something with a price and a size that a live book can hold
pub trait BookUnit: Clone + Send + Sync + 'static {
    fn price(&self) -> Decimal;
    fn size(&self) -> Decimal;
}

impl BookUnit for Level {
    fn price(&self) -> Decimal {
        self.price
    }

    fn size(&self) -> Decimal {
        self.size
    }
}

/// Where an incoming update sits relative to a book's sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Already reflected in the book (end <= sequence); discard
    Stale,
    /// Contiguous with, or overlapping, the book; apply
    Next,
    /// Updates between the book and this one are missing
    Gap { expected: u64, received: u64 },
}

/// Full-depth order book maintained by a calibration engine
pub trait OrderBook: Send + Sync + 'static {
    /// Element of the projected live book
    type Unit: BookUnit;
    /// Incremental update applied in sequence order
    type Update: Sequenced + Keyed + Clone + Send + Sync + 'static;
    /// REST snapshot the book is seeded from
    type Snapshot: Send + 'static;

    /// Seed a book; its sequence becomes the snapshot's sequence
    fn from_snapshot(symbol: &str, snapshot: Self::Snapshot) -> Self;

    fn symbol(&self) -> &str;

    /// Sequence of the last applied update (or the snapshot)
    fn sequence(&self) -> u64;

    /// Exchange timestamp of the last applied update (or the snapshot)
    fn timestamp(&self) -> i64;

    /// Apply one update and advance the sequence to its end
    ///
    /// Callers check [`OrderBook::classify`] first. Returns the number of
    /// rows or orders that changed.
    fn apply(&mut self, update: &Self::Update) -> usize;

    /// Best `pieces` asks, ascending; `0` means all
    fn top_asks(&self, pieces: usize) -> Vec<Self::Unit>;

    /// Best `pieces` bids, descending; `0` means all
    fn top_bids(&self, pieces: usize) -> Vec<Self::Unit>;

    fn classify(&self, update: &Self::Update) -> SequenceCheck {
        let current = self.sequence();
        if update.sequence_end() <= current {
            SequenceCheck::Stale
        } else if update.sequence_start() <= current + 1 {
            SequenceCheck::Next
        } else {
            SequenceCheck::Gap {
                expected: current + 1,
                received: update.sequence_start(),
            }
        }
    }

    /// Copy the top of book into a live view
    fn project(&self, pieces: usize) -> LiveBook<Self::Unit> {
        LiveBook {
            symbol: self.symbol().to_string(),
            sequence: self.sequence(),
            timestamp: self.timestamp(),
            asks: self.top_asks(pieces),
            bids: self.top_bids(pieces),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_conversion() {
        assert_eq!(BookSide::from(Side::Buy), BookSide::Bid);
        assert_eq!(BookSide::from(Side::Sell), BookSide::Ask);
        assert_eq!(BookSide::Bid.opposite(), BookSide::Ask);
    }
}
