use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::orders::{OrderId, Timestamp, now};
use crate::price::Price;
use crate::symbol::Symbol;

pub type TradeId = Uuid;

/// A matched transaction between a resting (maker) and incoming (taker)
/// order.
///
/// - `price` is always the maker's price — the resting order's limit, never
///   the taker's. This is a hard contract (§4.1) and is asserted by the
///   matching loop in [`crate::orderbook`], not re-derived here.
/// - `quantity` is the filled amount, `min(taker.remaining, maker.remaining)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub symbol: Symbol,
    pub quantity: u64,
    pub price: Price,
    pub executed_at: Timestamp,
}

impl Trade {
    pub fn new(
        buy_order_id: OrderId,
        sell_order_id: OrderId,
        symbol: Symbol,
        quantity: u64,
        price: Price,
    ) -> Self {
        Trade {
            trade_id: Uuid::new_v4(),
            buy_order_id,
            sell_order_id,
            symbol,
            quantity,
            price,
            executed_at: now(),
        }
    }
}
