use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::orders::{Order, OrderId, OrderStatus, Side};
use crate::price::Price;
use crate::symbol::Symbol;
use crate::trade::Trade;

/// The in-book representation of one resting order (§3). Mirrors [`Order`]
/// but carries `sequence` — the sole tiebreaker for time priority — and
/// `remaining`, the live quantity still available to match.
#[derive(Debug, Clone)]
struct OrderNode {
    order_id: OrderId,
    user_id: String,
    side: Side,
    price: Price,
    /// Size at the moment this node last (re)entered the book. Together
    /// with `remaining` this gives `filled_quantity = quantity - remaining`
    /// without having to look the authoritative `Order` up mid-match.
    quantity: u64,
    remaining: u64,
    sequence: u64,
}

/// A side's price levels, best price first when iterated the right way:
/// bids are read back-to-front (`next_back`), asks front-to-back (`next`).
type Levels = BTreeMap<Price, VecDeque<OrderNode>>;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("order not found")]
pub struct CancelError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModifyError {
    #[error("order not found")]
    NotFound,
    #[error("{0}")]
    Invalid(String),
}

/// A maker (resting) order's fill delta produced by someone else's
/// `submit`/`modify`. The engine persists this alongside the taker's own
/// update and the trades themselves (§4.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MakerFill {
    pub order_id: OrderId,
    pub filled_quantity: u64,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakerResult {
    pub status: OrderStatus,
    pub filled_quantity: u64,
    pub remaining: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub trades: Vec<Trade>,
    pub taker: TakerResult,
    pub maker_fills: Vec<MakerFill>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModifyOutcome {
    pub status: OrderStatus,
    pub trades: Vec<Trade>,
    pub filled_quantity: u64,
    pub residual_remaining: u64,
    pub maker_fills: Vec<MakerFill>,
}

/// An order currently crossing the book, tracked independently of the
/// authoritative [`Order`] record so that `modify`'s cancel+resubmit path
/// can drive the same matching loop as a plain `submit`.
struct IncomingOrder {
    order_id: OrderId,
    user_id: String,
    side: Side,
    price: Price,
    remaining: u64,
}

/// Per-symbol order book: two [`BTreeMap`]-backed priority structures plus
/// an `order_id -> (side, price)` index for O(1) lookup into the right
/// price level on cancel/modify (§3, §4.2).
///
/// Not internally synchronized — callers (the [`crate::engine::MatchingEngine`])
/// are expected to hold the symbol's mutex for the duration of any mutating
/// call, per §4.1's "assumed to run under the symbol's exclusive lock".
pub struct OrderBook {
    pub symbol: Symbol,
    bids: Levels,
    asks: Levels,
    index: HashMap<OrderId, (Side, Price)>,
    next_sequence: u64,
}

/// Opaque, clone-based snapshot of an [`OrderBook`]'s mutable state. See
/// [`OrderBook::checkpoint`].
#[derive(Clone)]
pub struct BookCheckpoint {
    bids: Levels,
    asks: Levels,
    index: HashMap<OrderId, (Side, Price)>,
    next_sequence: u64,
}

impl OrderBook {
    pub fn new(symbol: Symbol) -> Self {
        OrderBook {
            symbol,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: HashMap::new(),
            next_sequence: 0,
        }
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.keys().next().copied()
    }

    /// Top `n` levels each side, aggregated by price. Bids descending, asks
    /// ascending (§4.1).
    pub fn depth(&self, n: usize) -> (Vec<(Price, u64)>, Vec<(Price, u64)>) {
        let bids = self
            .bids
            .iter()
            .rev()
            .take(n)
            .map(|(price, level)| (*price, level.iter().map(|node| node.remaining).sum()))
            .collect();
        let asks = self
            .asks
            .iter()
            .take(n)
            .map(|(price, level)| (*price, level.iter().map(|node| node.remaining).sum()))
            .collect();
        (bids, asks)
    }

    pub fn contains(&self, order_id: OrderId) -> bool {
        self.index.contains_key(&order_id)
    }

    /// Order ids resting at one price level, in queue order (oldest first).
    /// Exposed for invariant tests (§8's "sequence within a level is
    /// strictly ascending front-to-back") — the HTTP layer never calls this.
    pub fn level_order_ids(&self, side: Side, price: Price) -> Vec<OrderId> {
        self.levels(side)
            .get(&price)
            .map(|queue| queue.iter().map(|node| node.order_id).collect())
            .unwrap_or_default()
    }

    /// Snapshots the full book state so the engine can undo a `submit`,
    /// `cancel`, or `modify` whose persistence commit failed (§9). Cloning
    /// the whole book is the simplest correct rollback available without an
    /// intrusive journal of the operation just performed, and at the order
    /// counts this engine is sized for it is cheap enough not to matter.
    pub fn checkpoint(&self) -> BookCheckpoint {
        BookCheckpoint {
            bids: self.bids.clone(),
            asks: self.asks.clone(),
            index: self.index.clone(),
            next_sequence: self.next_sequence,
        }
    }

    pub fn restore(&mut self, checkpoint: BookCheckpoint) {
        self.bids = checkpoint.bids;
        self.asks = checkpoint.asks;
        self.index = checkpoint.index;
        self.next_sequence = checkpoint.next_sequence;
    }

    fn levels(&self, side: Side) -> &Levels {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn levels_mut(&mut self, side: Side) -> &mut Levels {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    fn best_price(&self, side: Side) -> Option<Price> {
        match side {
            Side::Buy => self.best_bid(),
            Side::Sell => self.best_ask(),
        }
    }

    /// Runs the price-time priority matching loop (§4.1 step 1) against the
    /// opposite side, mutating `incoming.remaining` and the resting nodes it
    /// consumes in place. Shared by `submit` and the cancel+resubmit branch
    /// of `modify` so both paths match identically.
    fn match_incoming(&mut self, incoming: &mut IncomingOrder) -> (Vec<Trade>, Vec<MakerFill>) {
        let opp_side = incoming.side.opposite();
        let mut trades = Vec::new();
        let mut maker_fills = Vec::new();

        loop {
            if incoming.remaining == 0 {
                break;
            }
            let Some(level_price) = self.best_price(opp_side) else {
                break;
            };
            let crosses = match incoming.side {
                Side::Buy => level_price <= incoming.price,
                Side::Sell => level_price >= incoming.price,
            };
            if !crosses {
                break;
            }

            let level_map = self.levels_mut(opp_side);
            let queue = level_map
                .get_mut(&level_price)
                .expect("best price must have a non-empty level");

            let fill;
            let maker_order_id;
            let maker_filled_quantity;
            let maker_remaining_after;
            {
                let maker = queue.front_mut().expect("level is never left empty");
                fill = incoming.remaining.min(maker.remaining);
                maker.remaining -= fill;
                maker_order_id = maker.order_id;
                maker_filled_quantity = maker.quantity - maker.remaining;
                maker_remaining_after = maker.remaining;
            }
            incoming.remaining -= fill;

            // Execution price is always the maker's (resting order's) price —
            // a hard contract (§4.1c), not a tunable.
            let (buy_order_id, sell_order_id) = match incoming.side {
                Side::Buy => (incoming.order_id, maker_order_id),
                Side::Sell => (maker_order_id, incoming.order_id),
            };
            trace!(?buy_order_id, ?sell_order_id, fill, %level_price, "match");
            trades.push(Trade::new(
                buy_order_id,
                sell_order_id,
                self.symbol.clone(),
                fill,
                level_price,
            ));

            let maker_status = if maker_remaining_after == 0 {
                OrderStatus::Filled
            } else {
                OrderStatus::Partial
            };
            maker_fills.push(MakerFill {
                order_id: maker_order_id,
                filled_quantity: maker_filled_quantity,
                status: maker_status,
            });

            if maker_remaining_after == 0 {
                queue.pop_front();
                self.index.remove(&maker_order_id);
            }
            if queue.is_empty() {
                level_map.remove(&level_price);
            }
        }

        (trades, maker_fills)
    }

    /// Rests `remaining` units of `order_id` at `price` with a brand-new
    /// `sequence` — always a loss of time priority relative to any node
    /// already at that price, by construction.
    fn rest(
        &mut self,
        side: Side,
        price: Price,
        order_id: OrderId,
        user_id: String,
        quantity: u64,
        remaining: u64,
    ) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let node = OrderNode {
            order_id,
            user_id,
            side,
            price,
            quantity,
            remaining,
            sequence,
        };
        self.levels_mut(side).entry(price).or_default().push_back(node);
        self.index.insert(order_id, (side, price));
    }

    fn remove_node(&mut self, side: Side, price: Price, order_id: OrderId) {
        let level_map = self.levels_mut(side);
        let queue = level_map
            .get_mut(&price)
            .expect("index points at a level that must exist");
        let pos = queue
            .iter()
            .position(|node| node.order_id == order_id)
            .expect("index points at a node that must be in its level");
        queue.remove(pos);
        if queue.is_empty() {
            level_map.remove(&price);
        }
        self.index.remove(&order_id);
    }

    /// Matches `order` against the book, then rests any residual (§4.1).
    /// `order` is taken by reference: the caller (engine) owns the
    /// authoritative record and persists it using the returned outcome.
    pub fn submit(&mut self, order: &Order) -> SubmitOutcome {
        let mut incoming = IncomingOrder {
            order_id: order.order_id,
            user_id: order.user_id.clone(),
            side: order.side,
            price: order.price,
            remaining: order.remaining(),
        };
        let (trades, maker_fills) = self.match_incoming(&mut incoming);
        let just_filled = order.remaining() - incoming.remaining;

        if incoming.remaining > 0 {
            self.rest(
                order.side,
                order.price,
                order.order_id,
                order.user_id.clone(),
                order.quantity,
                incoming.remaining,
            );
        }

        let total_filled = order.filled_quantity + just_filled;
        let status = if incoming.remaining == 0 {
            OrderStatus::Filled
        } else if total_filled > 0 {
            OrderStatus::Partial
        } else {
            OrderStatus::Pending
        };
        debug!(order_id = %order.order_id, ?status, trades = trades.len(), "submit settled");

        SubmitOutcome {
            trades,
            taker: TakerResult {
                status,
                filled_quantity: total_filled,
                remaining: incoming.remaining,
            },
            maker_fills,
        }
    }

    /// Removes a resting order from its price level and the index,
    /// returning its filled quantity at the moment of cancellation (the
    /// engine needs this to persist the terminal order state). Idempotent-
    /// cancel is the caller's responsibility (§8's "idempotent cancel of
    /// terminal order" law): once removed, a second `cancel` of the same id
    /// returns `NotFound` here because the index no longer has it.
    pub fn cancel(&mut self, order_id: OrderId) -> Result<u64, CancelError> {
        let &(side, price) = self.index.get(&order_id).ok_or(CancelError)?;
        let filled_quantity = {
            let queue = self.levels(side).get(&price).expect("indexed level exists");
            let node = queue
                .iter()
                .find(|node| node.order_id == order_id)
                .expect("indexed node exists in its level");
            node.quantity - node.remaining
        };
        self.remove_node(side, price, order_id);
        Ok(filled_quantity)
    }

    /// Modify semantics per §4.3: a price change or a quantity increase
    /// loses time priority (cancel + resubmit through the same matching
    /// loop as `submit`); a quantity decrease above the filled amount
    /// shrinks the resting node in place and keeps its `sequence`.
    pub fn modify(
        &mut self,
        order_id: OrderId,
        new_quantity: Option<u64>,
        new_price: Option<Price>,
    ) -> Result<ModifyOutcome, ModifyError> {
        let &(side, price) = self.index.get(&order_id).ok_or(ModifyError::NotFound)?;
        let (current_quantity, current_remaining, user_id) = {
            let queue = self.levels(side).get(&price).expect("indexed level exists");
            let node = queue
                .iter()
                .find(|node| node.order_id == order_id)
                .expect("indexed node exists in its level");
            (node.quantity, node.remaining, node.user_id.clone())
        };
        let filled_quantity = current_quantity - current_remaining;

        if let Some(nq) = new_quantity {
            if nq < filled_quantity {
                return Err(ModifyError::Invalid(format!(
                    "new_quantity {nq} is below filled_quantity {filled_quantity}"
                )));
            }
        }

        let price_changed = new_price.is_some_and(|p| p != price);
        let qty_increased = new_quantity.is_some_and(|q| q > current_quantity);

        if price_changed || qty_increased {
            self.remove_node(side, price, order_id);
            let new_total = new_quantity.unwrap_or(current_quantity);
            let target_price = new_price.unwrap_or(price);
            let mut incoming = IncomingOrder {
                order_id,
                user_id: user_id.clone(),
                side,
                price: target_price,
                remaining: new_total - filled_quantity,
            };
            let (trades, maker_fills) = self.match_incoming(&mut incoming);
            let residual = incoming.remaining;
            if residual > 0 {
                self.rest(side, target_price, order_id, user_id, new_total, residual);
            }
            let total_filled = new_total - residual;
            let status = if residual == 0 {
                OrderStatus::Filled
            } else if total_filled > 0 {
                OrderStatus::Partial
            } else {
                OrderStatus::Pending
            };
            return Ok(ModifyOutcome {
                status,
                trades,
                filled_quantity: total_filled,
                residual_remaining: residual,
                maker_fills,
            });
        }

        // In-place shrink (or true no-op when neither argument changes anything).
        let new_total = new_quantity.unwrap_or(current_quantity);
        if new_total == filled_quantity {
            self.remove_node(side, price, order_id);
            return Ok(ModifyOutcome {
                status: OrderStatus::Filled,
                trades: Vec::new(),
                filled_quantity,
                residual_remaining: 0,
                maker_fills: Vec::new(),
            });
        }

        let new_remaining = new_total - filled_quantity;
        {
            let queue = self
                .levels_mut(side)
                .get_mut(&price)
                .expect("indexed level exists");
            let node = queue
                .iter_mut()
                .find(|node| node.order_id == order_id)
                .expect("indexed node exists in its level");
            node.quantity = new_total;
            node.remaining = new_remaining;
        }
        let status = if filled_quantity > 0 {
            OrderStatus::Partial
        } else {
            OrderStatus::Pending
        };
        Ok(ModifyOutcome {
            status,
            trades: Vec::new(),
            filled_quantity,
            residual_remaining: new_remaining,
            maker_fills: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(user: &str, side: Side, price: i64, qty: u64) -> Order {
        Order::new(
            user.to_string(),
            "AAPL".parse().unwrap(),
            side,
            qty,
            Price::from_scaled(price),
        )
    }

    fn book() -> OrderBook {
        OrderBook::new("AAPL".parse().unwrap())
    }

    /// Scenario 1 — simple cross: full fill both sides, book ends empty.
    #[test]
    fn simple_cross_fully_fills_both_sides() {
        let mut ob = book();
        let sell = order("s1", Side::Sell, 150_0000, 100);
        let sell_id = sell.order_id;
        let out = ob.submit(&sell);
        assert_eq!(out.taker.status, OrderStatus::Pending);

        let buy = order("b1", Side::Buy, 150_0000, 100);
        let out = ob.submit(&buy);

        assert_eq!(out.trades.len(), 1);
        assert_eq!(out.trades[0].quantity, 100);
        assert_eq!(out.trades[0].price, Price::from_scaled(150_0000));
        assert_eq!(out.taker.status, OrderStatus::Filled);
        assert_eq!(out.maker_fills.len(), 1);
        assert_eq!(out.maker_fills[0].order_id, sell_id);
        assert_eq!(out.maker_fills[0].status, OrderStatus::Filled);
        assert!(ob.best_bid().is_none());
        assert!(ob.best_ask().is_none());
    }

    /// Scenario 2 — partial fill, rest.
    #[test]
    fn partial_fill_rests_the_remainder() {
        let mut ob = book();
        ob.submit(&order("s1", Side::Sell, 150_0000, 100));
        let out = ob.submit(&order("b1", Side::Buy, 150_0000, 60));

        assert_eq!(out.trades[0].quantity, 60);
        assert_eq!(out.taker.status, OrderStatus::Filled);
        assert_eq!(out.maker_fills[0].status, OrderStatus::Partial);
        assert_eq!(out.maker_fills[0].filled_quantity, 60);
        assert_eq!(ob.best_ask(), Some(Price::from_scaled(150_0000)));
        let (_, asks) = ob.depth(10);
        assert_eq!(asks[0].1, 40);
    }

    /// Scenario 3 — maker price rule: trade executes at the resting price.
    #[test]
    fn maker_price_wins_over_taker_limit() {
        let mut ob = book();
        ob.submit(&order("s1", Side::Sell, 149_0000, 100));
        let out = ob.submit(&order("b1", Side::Buy, 151_0000, 100));

        assert_eq!(out.trades.len(), 1);
        assert_eq!(out.trades[0].price, Price::from_scaled(149_0000));
        assert_eq!(out.taker.status, OrderStatus::Filled);
        assert_eq!(out.maker_fills[0].status, OrderStatus::Filled);
    }

    /// Scenario 4 — time priority: earlier order at the same price fills first.
    #[test]
    fn equal_price_fills_in_arrival_order() {
        let mut ob = book();
        let s1 = order("s1", Side::Sell, 150_0000, 50);
        let s1_id = s1.order_id;
        ob.submit(&s1);
        let s2 = order("s2", Side::Sell, 150_0000, 50);
        let s2_id = s2.order_id;
        ob.submit(&s2);

        let out = ob.submit(&order("b1", Side::Buy, 150_0000, 60));

        assert_eq!(out.trades.len(), 2);
        assert_eq!(out.trades[0].quantity, 50);
        assert_eq!(out.trades[0].sell_order_id, s1_id);
        assert_eq!(out.trades[1].quantity, 10);
        assert_eq!(out.trades[1].sell_order_id, s2_id);
        assert_eq!(out.maker_fills[0].status, OrderStatus::Filled);
        assert_eq!(out.maker_fills[1].status, OrderStatus::Partial);
        assert_eq!(out.maker_fills[1].filled_quantity, 10);
    }

    /// Scenario 5 — cancel then no-match.
    #[test]
    fn cancel_then_resubmit_does_not_match_itself() {
        let mut ob = book();
        let buy = order("b1", Side::Buy, 150_0000, 100);
        let buy_id = buy.order_id;
        ob.submit(&buy);

        ob.cancel(buy_id).unwrap();
        assert!(ob.best_bid().is_none());

        let out = ob.submit(&order("s1", Side::Sell, 150_0000, 100));
        assert!(out.trades.is_empty());
        assert_eq!(ob.best_ask(), Some(Price::from_scaled(150_0000)));
    }

    /// Scenario 6 — modify price-to-same-price is a no-op (keeps priority);
    /// modify to a different price and back loses priority.
    #[test]
    fn modify_price_change_loses_priority() {
        let mut ob = book();
        let b1 = order("b1", Side::Buy, 149_0000, 100);
        let b1_id = b1.order_id;
        ob.submit(&b1);
        let b2 = order("b2", Side::Buy, 149_0000, 100);
        let b2_id = b2.order_id;
        ob.submit(&b2);

        // No-op modify: same price, keeps priority.
        ob.modify(b1_id, None, Some(Price::from_scaled(149_0000)))
            .unwrap();

        // Move away and back: loses priority relative to b2.
        ob.modify(b1_id, None, Some(Price::from_scaled(148_0000)))
            .unwrap();
        ob.modify(b1_id, None, Some(Price::from_scaled(149_0000)))
            .unwrap();

        let out = ob.submit(&order("s1", Side::Sell, 149_0000, 100));
        assert_eq!(out.trades[0].buy_order_id, b2_id, "b2 should fill first now");
        assert_eq!(out.maker_fills[0].order_id, b2_id);
    }

    #[test]
    fn idempotent_cancel_of_terminal_order_fails() {
        let mut ob = book();
        let buy = order("b1", Side::Buy, 150_0000, 100);
        let buy_id = buy.order_id;
        ob.submit(&buy);

        ob.cancel(buy_id).unwrap();
        assert_eq!(ob.cancel(buy_id), Err(CancelError));
    }

    #[test]
    fn modify_quantity_increase_loses_priority_and_rematches() {
        let mut ob = book();
        ob.submit(&order("s1", Side::Sell, 150_0000, 10));
        let b1 = order("b1", Side::Buy, 149_0000, 50);
        let b1_id = b1.order_id;
        ob.submit(&b1);

        // Raising both price and quantity via modify: now crosses the resting ask.
        let out = ob
            .modify(b1_id, Some(80), Some(Price::from_scaled(150_0000)))
            .unwrap();
        assert_eq!(out.trades.len(), 1);
        assert_eq!(out.trades[0].quantity, 10);
        assert_eq!(out.status, OrderStatus::Partial);
        assert_eq!(out.residual_remaining, 70);
    }

    #[test]
    fn modify_quantity_decrease_in_place_preserves_priority() {
        let mut ob = book();
        let b1 = order("b1", Side::Buy, 150_0000, 100);
        let b1_id = b1.order_id;
        ob.submit(&b1);

        let out = ob.modify(b1_id, Some(40), None).unwrap();
        assert_eq!(out.status, OrderStatus::Pending);
        assert_eq!(out.residual_remaining, 40);
        let (bids, _) = ob.depth(10);
        assert_eq!(bids[0].1, 40);
    }

    #[test]
    fn modify_quantity_equal_to_filled_marks_filled_and_removes_node() {
        let mut ob = book();
        ob.submit(&order("s1", Side::Sell, 150_0000, 40));
        let b1 = order("b1", Side::Buy, 150_0000, 100);
        let b1_id = b1.order_id;
        let out = ob.submit(&b1);
        assert_eq!(out.taker.filled_quantity, 40);
        assert_eq!(out.taker.remaining, 60);

        let out = ob.modify(b1_id, Some(40), None).unwrap();
        assert_eq!(out.status, OrderStatus::Filled);
        assert_eq!(out.residual_remaining, 0);
        assert!(!ob.contains(b1_id));
    }

    #[test]
    fn modify_below_filled_quantity_is_invalid() {
        let mut ob = book();
        ob.submit(&order("s1", Side::Sell, 150_0000, 40));
        let b1 = order("b1", Side::Buy, 150_0000, 100);
        let b1_id = b1.order_id;
        ob.submit(&b1);

        let err = ob.modify(b1_id, Some(10), None).unwrap_err();
        assert!(matches!(err, ModifyError::Invalid(_)));
    }

    #[test]
    fn modify_unknown_order_is_not_found() {
        let mut ob = book();
        let err = ob
            .modify(uuid::Uuid::new_v4(), Some(10), None)
            .unwrap_err();
        assert_eq!(err, ModifyError::NotFound);
    }

    #[test]
    fn no_crossing_after_resting_orders_on_both_sides() {
        let mut ob = book();
        ob.submit(&order("b1", Side::Buy, 99_0000, 10));
        ob.submit(&order("s1", Side::Sell, 101_0000, 10));
        assert!(ob.best_bid() < ob.best_ask());
    }

    #[test]
    fn depth_is_sorted_best_first_on_each_side() {
        let mut ob = book();
        ob.submit(&order("b1", Side::Buy, 100_0000, 5));
        ob.submit(&order("b2", Side::Buy, 101_0000, 5));
        ob.submit(&order("s1", Side::Sell, 103_0000, 5));
        ob.submit(&order("s2", Side::Sell, 102_0000, 5));

        let (bids, asks) = ob.depth(10);
        assert_eq!(bids[0].0, Price::from_scaled(101_0000));
        assert_eq!(bids[1].0, Price::from_scaled(100_0000));
        assert_eq!(asks[0].0, Price::from_scaled(102_0000));
        assert_eq!(asks[1].0, Price::from_scaled(103_0000));
    }
}
