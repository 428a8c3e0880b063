//! Level 3 orderbook implementation
//!
//! Tracks individual orders rather than aggregated price levels. Orders at
//! the same price queue FIFO; a HashMap index gives O(1) lookup by order ID,
//! which `change`, `match` and `done` events rely on.

pub mod book;
pub mod order;

pub use book::L3Book;
pub use order::{L3Order, L3PriceLevel, OrderLocation};
