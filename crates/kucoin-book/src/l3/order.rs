//! L3 order types for individual order tracking

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::orderbook::{BookSide, BookUnit};

/// Individual resting order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L3Order {
    /// Exchange order ID
    pub order_id: String,
    pub price: Decimal,
    /// Remaining size
    pub size: Decimal,
    /// Time the order was placed (exchange nanoseconds)
    pub time: i64,
}

impl L3Order {
    pub fn new(order_id: impl Into<String>, price: Decimal, size: Decimal) -> Self {
        Self {
            order_id: order_id.into(),
            price,
            size,
            time: 0,
        }
    }

    pub fn with_time(mut self, time: i64) -> Self {
        self.time = time;
        self
    }
}

impl BookUnit for L3Order {
    fn price(&self) -> Decimal {
        self.price
    }

    fn size(&self) -> Decimal {
        self.size
    }
}

/// Price level containing multiple orders (FIFO queue)
///
/// Orders at the same price are kept oldest first.
#[derive(Debug, Clone, Default)]
pub struct L3PriceLevel {
    pub price: Decimal,
    orders: Vec<L3Order>,
    /// Cached sum of all order sizes
    total_size: Decimal,
}

impl L3PriceLevel {
    pub fn new(price: Decimal) -> Self {
        Self {
            price,
            orders: Vec::new(),
            total_size: Decimal::ZERO,
        }
    }

    /// Append an order at the back of the queue
    pub fn push(&mut self, order: L3Order) {
        self.total_size += order.size;
        self.orders.push(order);
    }

    /// Remove an order by ID
    pub fn remove(&mut self, order_id: &str) -> Option<L3Order> {
        let idx = self.orders.iter().position(|o| o.order_id == order_id)?;
        let order = self.orders.remove(idx);
        self.total_size -= order.size;
        Some(order)
    }

    /// Set an order's remaining size; queue position is kept
    pub fn resize(&mut self, order_id: &str, new_size: Decimal) -> bool {
        match self.orders.iter_mut().find(|o| o.order_id == order_id) {
            Some(order) => {
                self.total_size = self.total_size - order.size + new_size;
                order.size = new_size;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, order_id: &str) -> Option<&L3Order> {
        self.orders.iter().find(|o| o.order_id == order_id)
    }

    pub fn total_size(&self) -> Decimal {
        self.total_size
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Orders, oldest first
    pub fn orders(&self) -> impl Iterator<Item = &L3Order> {
        self.orders.iter()
    }
}

/// Where an order lives, for O(1) lookup by ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLocation {
    pub price: Decimal,
    pub side: BookSide,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_level_fifo() {
        let mut level = L3PriceLevel::new(dec!(100));
        level.push(L3Order::new("a", dec!(100), dec!(1)));
        level.push(L3Order::new("b", dec!(100), dec!(2)));
        level.push(L3Order::new("c", dec!(100), dec!(3)));

        let ids: Vec<_> = level.orders().map(|o| o.order_id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(level.total_size(), dec!(6));
    }

    #[test]
    fn test_level_remove_and_resize() {
        let mut level = L3PriceLevel::new(dec!(100));
        level.push(L3Order::new("a", dec!(100), dec!(1)));
        level.push(L3Order::new("b", dec!(100), dec!(2)));

        assert!(level.resize("b", dec!(0.5)));
        assert_eq!(level.total_size(), dec!(1.5));

        let removed = level.remove("a").unwrap();
        assert_eq!(removed.size, dec!(1));
        assert_eq!(level.total_size(), dec!(0.5));
        assert!(level.remove("a").is_none());
        assert!(!level.resize("zzz", dec!(1)));
    }
}
