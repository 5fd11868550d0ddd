use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::price::Price;
use crate::symbol::Symbol;

pub type OrderId = Uuid;

/// Wall-clock timestamp in nanoseconds since the epoch. `created_at`'s
/// tiebreak is the book's own `sequence` counter (§3), not this value —
/// `Timestamp` is for display and persistence ordering, never for matching
/// decisions.
pub type Timestamp = u128;

pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

/// The authoritative order record (§3). `quantity` and `filled_quantity` are
/// integers only — fractional quantities are a non-goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub user_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: u64,
    pub price: Price,
    pub status: OrderStatus,
    pub filled_quantity: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Order {
    pub fn new(user_id: String, symbol: Symbol, side: Side, quantity: u64, price: Price) -> Self {
        let ts = now();
        Order {
            order_id: Uuid::new_v4(),
            user_id,
            symbol,
            side,
            quantity,
            price,
            status: OrderStatus::Pending,
            filled_quantity: 0,
            created_at: ts,
            updated_at: ts,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.quantity - self.filled_quantity
    }
}
