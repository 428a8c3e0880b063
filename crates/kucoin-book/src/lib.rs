//! Order book engine for KuCoin market data
//!
//! This crate provides the full-depth book data structures the calibration
//! engine drives, plus the truncated live projection handed to consumers.
//! It has no async runtime or networking dependency.
//!
//! # Example
//!
//! ```
//! use kucoin_book::{Level2Book, OrderBook};
//! use kucoin_types::{Level2Snapshot, Level2Update, Level, PriceChange};
//! use rust_decimal_macros::dec;
//!
//! let snapshot = Level2Snapshot {
//!     sequence: 10,
//!     time: 0,
//!     asks: vec![Level::new(dec!(101), dec!(1))],
//!     bids: vec![Level::new(dec!(100), dec!(2))],
//! };
//! let mut book = Level2Book::from_snapshot("BTC-USDT", snapshot);
//!
//! let diff = Level2Update::new("BTC-USDT", 11, 11, vec![PriceChange::new(dec!(101), dec!(0), 11)], vec![]);
//! book.apply(&diff);
//!
//! assert_eq!(book.sequence(), 11);
//! assert!(book.project(50).asks.is_empty());
//! ```

pub mod l3;
pub mod level2;
pub mod live;
pub mod orderbook;
pub mod storage;

// Re-export main types
pub use l3::{L3Book, L3Order};
pub use level2::Level2Book;
pub use live::{LiveBook, DEFAULT_PIECES};
pub use orderbook::{BookSide, BookUnit, OrderBook, SequenceCheck};
pub use storage::TreeBook;
