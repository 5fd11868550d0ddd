use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::errors::EngineError;
use crate::orderbook::{ModifyError, ModifyOutcome, OrderBook};
use crate::orders::{Order, OrderId, OrderStatus, Side, now};
use crate::price::Price;
use crate::store::{PersistenceGateway, WriteOp};
use crate::symbol::Symbol;
use crate::trade::Trade;

#[derive(Debug, Clone, Serialize)]
pub struct MarketSummary {
    pub symbol: Symbol,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepthSnapshot {
    pub symbol: Symbol,
    pub bids: Vec<(Price, u64)>,
    pub asks: Vec<(Price, u64)>,
}

/// Registry of per-symbol order books plus the persistence gateway they
/// commit through (§4.4). One [`tokio::sync::Mutex`] per symbol — looked up
/// in a [`DashMap`] — replaces a single lock over every symbol at once: a
/// burst of orders on `AAPL` never waits behind one on `MSFT`.
pub struct MatchingEngine<G: PersistenceGateway> {
    books: DashMap<Symbol, Arc<Mutex<OrderBook>>>,
    gateway: Arc<G>,
}

impl<G: PersistenceGateway> MatchingEngine<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        MatchingEngine {
            books: DashMap::new(),
            gateway,
        }
    }

    fn book_for(&self, symbol: &Symbol) -> Arc<Mutex<OrderBook>> {
        self.books
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(Mutex::new(OrderBook::new(symbol.clone()))))
            .clone()
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.books.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Validates, matches, and persists a new order (§4.1, §4.4). The
    /// matching mutation and the persistence commit happen inside the same
    /// critical section (§9): if the commit fails, the book is rolled back
    /// to its pre-match checkpoint before the lock is released, so the
    /// in-memory book and the store never diverge. The order record, every
    /// trade, and every maker's fill delta are handed to the gateway as one
    /// [`WriteOp`] batch so they land atomically (§4.5) instead of as
    /// independent writes that could partially commit.
    ///
    /// Returns the settled order alongside the trades this call generated,
    /// in execution order, so callers (the HTTP layer) never have to
    /// re-derive "what did my own order just do" from a store query.
    pub async fn submit(
        &self,
        user_id: String,
        symbol: Symbol,
        side: Side,
        quantity: u64,
        price: Price,
    ) -> Result<(Order, Vec<Trade>), EngineError> {
        if quantity == 0 {
            return Err(EngineError::Validation("quantity must be > 0".into()));
        }

        let order = Order::new(user_id, symbol.clone(), side, quantity, price);
        let book = self.book_for(&symbol);
        let mut guard = book.lock().await;
        let checkpoint = guard.checkpoint();
        let outcome = guard.submit(&order);

        let mut settled = order;
        settled.status = outcome.taker.status;
        settled.filled_quantity = outcome.taker.filled_quantity;
        settled.updated_at = now();

        let fill_ts = now();
        let mut ops = vec![WriteOp::NewOrder(settled.clone())];
        ops.extend(outcome.trades.iter().cloned().map(WriteOp::Trade));
        ops.extend(outcome.maker_fills.iter().map(|maker| WriteOp::Fill {
            order_id: maker.order_id,
            filled_quantity: maker.filled_quantity,
            status: maker.status,
            updated_at: fill_ts,
        }));

        match self.gateway.commit(ops).await {
            Ok(()) => {
                drop(guard);
                Ok((settled, outcome.trades))
            }
            Err(e) => {
                guard.restore(checkpoint);
                drop(guard);
                Err(EngineError::Persistence(e))
            }
        }
    }

    /// Cancels a resting order (§4.1). Rolls the book back if the terminal
    /// `CANCELLED` status can't be persisted.
    pub async fn cancel(&self, symbol: Symbol, order_id: OrderId) -> Result<(), EngineError> {
        let book = self.book_for(&symbol);
        let mut guard = book.lock().await;
        let checkpoint = guard.checkpoint();
        let filled_quantity = guard.cancel(order_id).map_err(|_| EngineError::NotFound)?;

        let ops = vec![WriteOp::Fill {
            order_id,
            filled_quantity,
            status: OrderStatus::Cancelled,
            updated_at: now(),
        }];

        match self.gateway.commit(ops).await {
            Ok(()) => {
                drop(guard);
                Ok(())
            }
            Err(e) => {
                guard.restore(checkpoint);
                drop(guard);
                Err(EngineError::Persistence(e))
            }
        }
    }

    /// Applies a price and/or quantity change (§4.3) and persists the
    /// result, rolling the book back on a failed commit exactly as `submit`
    /// and `cancel` do. The modified order's own fill delta, every trade a
    /// cancel+resubmit produced, and every maker's fill delta are committed
    /// as one [`WriteOp`] batch, same as `submit`.
    pub async fn modify(
        &self,
        symbol: Symbol,
        order_id: OrderId,
        new_quantity: Option<u64>,
        new_price: Option<Price>,
    ) -> Result<ModifyOutcome, EngineError> {
        let book = self.book_for(&symbol);
        let mut guard = book.lock().await;
        let checkpoint = guard.checkpoint();
        let outcome = guard
            .modify(order_id, new_quantity, new_price)
            .map_err(|e| match e {
                ModifyError::NotFound => EngineError::NotFound,
                ModifyError::Invalid(msg) => EngineError::InvalidState(msg),
            })?;

        let updated_at = now();
        let mut ops = vec![WriteOp::Fill {
            order_id,
            filled_quantity: outcome.filled_quantity,
            status: outcome.status,
            updated_at,
        }];
        ops.extend(outcome.trades.iter().cloned().map(WriteOp::Trade));
        ops.extend(outcome.maker_fills.iter().map(|maker| WriteOp::Fill {
            order_id: maker.order_id,
            filled_quantity: maker.filled_quantity,
            status: maker.status,
            updated_at,
        }));

        match self.gateway.commit(ops).await {
            Ok(()) => {
                drop(guard);
                Ok(outcome)
            }
            Err(e) => {
                guard.restore(checkpoint);
                drop(guard);
                Err(EngineError::Persistence(e))
            }
        }
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order, EngineError> {
        self.gateway
            .get_order(order_id)
            .await?
            .ok_or(EngineError::NotFound)
    }

    pub async fn list_user_orders(&self, user_id: &str) -> Result<Vec<Order>, EngineError> {
        Ok(self.gateway.list_user_orders(user_id).await?)
    }

    pub async fn list_trades(
        &self,
        symbol: Symbol,
        after: Option<String>,
        limit: usize,
    ) -> Result<(Vec<Trade>, Option<String>), EngineError> {
        Ok(self.gateway.list_trades(symbol, after, limit).await?)
    }

    pub async fn market_summary(&self, symbol: &Symbol) -> MarketSummary {
        let Some(book) = self.books.get(symbol) else {
            return MarketSummary {
                symbol: symbol.clone(),
                best_bid: None,
                best_ask: None,
            };
        };
        let book = book.clone();
        let guard = book.lock().await;
        MarketSummary {
            symbol: symbol.clone(),
            best_bid: guard.best_bid(),
            best_ask: guard.best_ask(),
        }
    }

    pub async fn depth(&self, symbol: &Symbol, levels: usize) -> DepthSnapshot {
        let Some(book) = self.books.get(symbol) else {
            return DepthSnapshot {
                symbol: symbol.clone(),
                bids: Vec::new(),
                asks: Vec::new(),
            };
        };
        let book = book.clone();
        let guard = book.lock().await;
        let (bids, asks) = guard.depth(levels);
        DepthSnapshot {
            symbol: symbol.clone(),
            bids,
            asks,
        }
    }
}
