//! Shared types for the KuCoin market-data client
//!
//! This crate provides the wire and market-data definitions used across the
//! workspace. It has minimal dependencies and can be used independently.
//!
//! # Key Types
//!
//! - [`Envelope`], [`MessageType`] - Websocket frames in both directions
//! - [`Topic`] - `base:sym1,sym2` subscription topics
//! - [`Level2Update`], [`Level3Update`], [`Ticker`] - Decoded market data
//! - [`Sequenced`], [`Keyed`] - Traits the book and fan-out layers rely on
//! - [`Level2Snapshot`], [`Level3Snapshot`] - REST snapshots for calibration
//! - [`KucoinError`] - Error types

pub mod enums;
pub mod envelope;
pub mod error;
pub mod level;
pub mod snapshot;
pub mod symbol;
pub mod topic;
pub mod update;

// Re-export commonly used types
pub use enums::*;
pub use envelope::{Envelope, MessageType};
pub use error::*;
pub use level::{parse_decimal, Level, PriceChange};
pub use snapshot::{Level2Snapshot, Level3Snapshot, SnapshotOrder};
pub use symbol::*;
pub use topic::Topic;
pub use update::*;

// Re-export rust_decimal for users
pub use rust_decimal::Decimal;
