//! Side, Market and Level 3 subject enums

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side as reported on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy order, rests on the bid side
    Buy,
    /// Sell order, rests on the ask side
    Sell,
}

impl Side {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Parse the lowercase wire form
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// Market family a feed belongs to
///
/// Spot and futures use different REST hosts and topics, and their tunnels
/// never share one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    #[default]
    Spot,
    Futures,
}

impl Market {
    pub fn is_futures(&self) -> bool {
        matches!(self, Self::Futures)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spot => write!(f, "spot"),
            Self::Futures => write!(f, "futures"),
        }
    }
}

/// Subject of a Level 3 (full match) message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level3Subject {
    /// Order accepted by the matching engine, not yet on the book
    Received,
    /// Order placed on the book
    Open,
    /// Resting order size changed
    Change,
    /// Taker matched against a resting maker order
    Match,
    /// Order left the book (filled or canceled)
    Done,
}

impl Level3Subject {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "received" => Some(Self::Received),
            "open" => Some(Self::Open),
            "change" | "update" => Some(Self::Change),
            "match" => Some(Self::Match),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Open => "open",
            Self::Change => "change",
            Self::Match => "match",
            Self::Done => "done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_side_wire() {
        assert_eq!(Side::from_wire("buy"), Some(Side::Buy));
        assert_eq!(Side::from_wire("SELL"), None);
        let json = serde_json::to_string(&Side::Sell).unwrap();
        assert_eq!(json, "\"sell\"");
    }

    #[test]
    fn test_level3_subject_roundtrip() {
        for subject in [
            Level3Subject::Received,
            Level3Subject::Open,
            Level3Subject::Change,
            Level3Subject::Match,
            Level3Subject::Done,
        ] {
            assert_eq!(Level3Subject::from_wire(subject.as_str()), Some(subject));
        }
        assert_eq!(Level3Subject::from_wire("bogus"), None);
    }

    #[test]
    fn test_market_default_is_spot() {
        assert_eq!(Market::default(), Market::Spot);
        assert!(Market::Futures.is_futures());
        assert_eq!(Market::Futures.to_string(), "futures");
    }
}
