//! Sequenced market-data updates decoded from `message` envelopes

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enums::{Level3Subject, Side};
use crate::envelope::Envelope;
use crate::error::{KucoinError, KucoinResult};
use crate::level::{
    deserialize_opt_decimal, deserialize_sequence, deserialize_timestamp, parse_decimal,
    PriceChange,
};

/// Anything routed or filtered by symbol
pub trait Keyed {
    fn key(&self) -> &str;
}

impl<T: Keyed + ?Sized> Keyed for std::sync::Arc<T> {
    fn key(&self) -> &str {
        (**self).key()
    }
}

/// An update carrying a sequence range for one symbol
///
/// Single-event updates report the same value for start and end.
pub trait Sequenced {
    fn sequence_start(&self) -> u64;
    fn sequence_end(&self) -> u64;
    fn symbol(&self) -> &str;
}

// ============================================================================
// Level 2
// ============================================================================

/// Asks and bids touched by one Level 2 update
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Level2Changes {
    #[serde(default)]
    pub asks: Vec<PriceChange>,
    #[serde(default)]
    pub bids: Vec<PriceChange>,
}

/// Batched Level 2 diff (`trade.l2update`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level2Update {
    #[serde(default)]
    pub symbol: String,
    #[serde(deserialize_with = "deserialize_sequence")]
    pub sequence_start: u64,
    #[serde(deserialize_with = "deserialize_sequence")]
    pub sequence_end: u64,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub time: i64,
    #[serde(default)]
    pub changes: Level2Changes,
}

/// Futures diff: `{"sequence":18,"change":"5000.0,sell,83","timestamp":...}`
#[derive(Debug, Deserialize)]
struct FuturesLevel2Data {
    #[serde(deserialize_with = "deserialize_sequence")]
    sequence: u64,
    change: String,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    timestamp: i64,
}

impl Level2Update {
    pub fn new(
        symbol: impl Into<String>,
        sequence_start: u64,
        sequence_end: u64,
        asks: Vec<PriceChange>,
        bids: Vec<PriceChange>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            sequence_start,
            sequence_end,
            time: 0,
            changes: Level2Changes { asks, bids },
        }
    }

    /// Decode spot or futures Level 2 data; the symbol falls back to the topic
    pub fn from_envelope(env: &Envelope) -> KucoinResult<Self> {
        let data = env
            .data
            .as_ref()
            .ok_or_else(|| KucoinError::UnexpectedMessage("level2 message has no data".into()))?;

        let mut update = if data.get("change").is_some() {
            let raw: FuturesLevel2Data = env.data_as()?;
            let change = parse_futures_change(&raw.change, raw.sequence)?;
            let (asks, bids) = match change.0 {
                Side::Sell => (vec![change.1], Vec::new()),
                Side::Buy => (Vec::new(), vec![change.1]),
            };
            let mut update = Self::new(String::new(), raw.sequence, raw.sequence, asks, bids);
            update.time = raw.timestamp;
            update
        } else {
            env.data_as::<Self>()?
        };

        if update.symbol.is_empty() {
            update.symbol = env
                .topic_suffix()
                .ok_or_else(|| KucoinError::UnexpectedMessage("level2 topic has no symbol".into()))?
                .to_string();
        }
        Ok(update)
    }

    /// Number of price rows in this update
    pub fn len(&self) -> usize {
        self.changes.asks.len() + self.changes.bids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_futures_change(change: &str, sequence: u64) -> KucoinResult<(Side, PriceChange)> {
    let bad = || KucoinError::UnexpectedMessage(format!("invalid futures change {change:?}"));
    let mut parts = change.split(',');
    let price = parts.next().ok_or_else(bad)?;
    let side = parts.next().and_then(Side::from_wire).ok_or_else(bad)?;
    let size = parts.next().ok_or_else(bad)?;
    let price = parse_decimal(price).map_err(|_| bad())?;
    let size = parse_decimal(size).map_err(|_| bad())?;
    Ok((side, PriceChange::new(price, size, sequence)))
}

impl Sequenced for Level2Update {
    fn sequence_start(&self) -> u64 {
        self.sequence_start
    }

    fn sequence_end(&self) -> u64 {
        self.sequence_end
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl Keyed for Level2Update {
    fn key(&self) -> &str {
        &self.symbol
    }
}

// ============================================================================
// Level 3
// ============================================================================

/// One order-level event (`received`, `open`, `change`, `match`, `done`)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Level3Update {
    pub subject: Level3Subject,
    pub symbol: String,
    pub sequence: u64,
    pub side: Option<Side>,
    pub order_id: Option<String>,
    pub price: Option<Decimal>,
    /// Order size on `open`/`received`, matched size on `match`
    pub size: Option<Decimal>,
    /// Remaining size on `change`
    pub new_size: Option<Decimal>,
    pub maker_order_id: Option<String>,
    pub taker_order_id: Option<String>,
    pub trade_id: Option<String>,
    pub time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Level3Data {
    #[serde(default)]
    symbol: String,
    #[serde(deserialize_with = "deserialize_sequence")]
    sequence: u64,
    #[serde(default)]
    side: Option<Side>,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    price: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    size: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    new_size: Option<Decimal>,
    #[serde(default)]
    maker_order_id: Option<String>,
    #[serde(default)]
    taker_order_id: Option<String>,
    #[serde(default)]
    trade_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    time: i64,
    /// Older channels send `ts`; `time` wins when both are present
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    ts: i64,
}

impl Level3Update {
    /// Empty update of the given subject; fields are filled by the caller
    pub fn new(subject: Level3Subject, symbol: impl Into<String>, sequence: u64) -> Self {
        Self {
            subject,
            symbol: symbol.into(),
            sequence,
            side: None,
            order_id: None,
            price: None,
            size: None,
            new_size: None,
            maker_order_id: None,
            taker_order_id: None,
            trade_id: None,
            time: 0,
        }
    }

    pub fn open(
        symbol: impl Into<String>,
        sequence: u64,
        side: Side,
        order_id: impl Into<String>,
        price: Decimal,
        size: Decimal,
    ) -> Self {
        Self {
            side: Some(side),
            order_id: Some(order_id.into()),
            price: Some(price),
            size: Some(size),
            ..Self::new(Level3Subject::Open, symbol, sequence)
        }
    }

    pub fn change(
        symbol: impl Into<String>,
        sequence: u64,
        order_id: impl Into<String>,
        new_size: Decimal,
    ) -> Self {
        Self {
            order_id: Some(order_id.into()),
            new_size: Some(new_size),
            ..Self::new(Level3Subject::Change, symbol, sequence)
        }
    }

    /// `taker_side` is the side of the aggressing order
    pub fn matched(
        symbol: impl Into<String>,
        sequence: u64,
        taker_side: Side,
        maker_order_id: impl Into<String>,
        size: Decimal,
    ) -> Self {
        Self {
            side: Some(taker_side),
            maker_order_id: Some(maker_order_id.into()),
            size: Some(size),
            ..Self::new(Level3Subject::Match, symbol, sequence)
        }
    }

    pub fn done(symbol: impl Into<String>, sequence: u64, order_id: impl Into<String>) -> Self {
        Self {
            order_id: Some(order_id.into()),
            ..Self::new(Level3Subject::Done, symbol, sequence)
        }
    }

    /// Decode from a `message` envelope; the subject names the event
    pub fn from_envelope(env: &Envelope) -> KucoinResult<Self> {
        let subject = env
            .subject
            .as_deref()
            .and_then(Level3Subject::from_wire)
            .ok_or_else(|| {
                KucoinError::UnexpectedMessage(format!(
                    "unknown level3 subject {:?}",
                    env.subject
                ))
            })?;
        let data: Level3Data = env.data_as()?;

        let symbol = if data.symbol.is_empty() {
            env.topic_suffix().unwrap_or_default().to_string()
        } else {
            data.symbol
        };

        Ok(Self {
            subject,
            symbol,
            sequence: data.sequence,
            side: data.side,
            order_id: data.order_id,
            price: data.price,
            size: data.size,
            new_size: data.new_size,
            maker_order_id: data.maker_order_id,
            taker_order_id: data.taker_order_id,
            trade_id: data.trade_id,
            time: if data.time != 0 { data.time } else { data.ts },
        })
    }
}

impl Sequenced for Level3Update {
    fn sequence_start(&self) -> u64 {
        self.sequence
    }

    fn sequence_end(&self) -> u64 {
        self.sequence
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl Keyed for Level3Update {
    fn key(&self) -> &str {
        &self.symbol
    }
}

// ============================================================================
// Ticker
// ============================================================================

/// Best bid/ask and last trade for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    #[serde(default)]
    pub symbol: String,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub sequence: i64,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub price: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub size: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub best_ask: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub best_ask_size: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub best_bid: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub best_bid_size: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub time: i64,
}

impl Ticker {
    /// Decode; on `ticker:all` the symbol is the subject, otherwise the topic suffix
    pub fn from_envelope(env: &Envelope) -> KucoinResult<Self> {
        let mut ticker: Self = env.data_as()?;
        if ticker.symbol.is_empty() {
            let symbol = match env.topic_suffix() {
                Some("all") | None => env.subject.as_deref(),
                Some(suffix) => Some(suffix),
            };
            ticker.symbol = symbol
                .ok_or_else(|| KucoinError::UnexpectedMessage("ticker has no symbol".into()))?
                .to_string();
        }
        Ok(ticker)
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask? - self.best_bid?)
    }
}

impl Keyed for Ticker {
    fn key(&self) -> &str {
        &self.symbol
    }
}
