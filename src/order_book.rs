//! Per-symbol order book.
//!
//! Owns a bid side and an ask side of disk-offset references plus the
//! book-wide mutex that serializes all operations on one symbol. All order
//! bytes live in the order store; the book is a pure index and can always
//! be rebuilt from storage.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::book_side::BookSide;
use crate::error::StorageError;
use crate::matching::{match_incoming, Execution};
use crate::storage::{DiskOffset, OrderStore};
use crate::types::{Order, OrderId, OrderStatus, Side};

struct Sides {
    bids: BookSide,
    asks: BookSide,
}

impl Sides {
    fn of(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }
}

/// What the book observed while removing an order, read from disk under
/// the book lock. The remaining quantity here is authoritative for the
/// refund: a fill racing the cancel can never double-credit.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CancelOutcome {
    pub remaining: u32,
    pub side: Side,
    pub price: Decimal,
}

pub struct OrderBook {
    symbol: String,
    store: Arc<OrderStore>,
    inner: Mutex<Sides>,
}

impl OrderBook {
    pub(crate) fn new(symbol: impl Into<String>, store: Arc<OrderStore>) -> Self {
        Self {
            symbol: symbol.into(),
            store,
            inner: Mutex::new(Sides {
                bids: BookSide::new(Side::Buy),
                asks: BookSide::new(Side::Sell),
            }),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    fn lock(&self) -> MutexGuard<'_, Sides> {
        self.inner.lock().expect("lock")
    }

    /// Run the matching loop for an already-persisted order and rest any
    /// unfilled remainder. Returns the executions in fill order.
    pub(crate) fn submit(
        &self,
        incoming: &mut Order,
        offset: DiskOffset,
    ) -> Result<Vec<Execution>, StorageError> {
        let mut sides = self.lock();
        let opp = sides.of(incoming.side.opposite());
        let executions = match_incoming(opp, &self.store, incoming, offset)?;
        if incoming.remaining_qty > 0 {
            sides.of(incoming.side).insert(incoming.price, offset);
        }
        Ok(executions)
    }

    /// Remove an order from the book and mark it cancelled on disk.
    /// Returns `None` when the order is no longer open (already filled or
    /// cancelled by the time the book lock was acquired).
    pub(crate) fn cancel(
        &self,
        id: OrderId,
        offset: DiskOffset,
    ) -> Result<Option<CancelOutcome>, StorageError> {
        let mut sides = self.lock();
        let mut order = self.store.load(offset)?;
        if order.id != id || !order.is_open() {
            return Ok(None);
        }
        if !sides.of(order.side).remove(order.price, offset) {
            return Ok(None);
        }
        let outcome = CancelOutcome {
            remaining: order.remaining_qty,
            side: order.side,
            price: order.price,
        };
        order.status = OrderStatus::Cancelled;
        order.remaining_qty = 0;
        self.store.update(&order, offset)?;
        Ok(Some(outcome))
    }

    /// Highest-priority resting buy order, loaded from disk.
    pub fn best_bid(&self) -> Result<Option<Order>, StorageError> {
        let sides = self.lock();
        match sides.bids.best() {
            Some((_, offset)) => Ok(Some(self.store.load(offset)?)),
            None => Ok(None),
        }
    }

    /// Highest-priority resting sell order, loaded from disk.
    pub fn best_ask(&self) -> Result<Option<Order>, StorageError> {
        let sides = self.lock();
        match sides.asks.best() {
            Some((_, offset)) => Ok(Some(self.store.load(offset)?)),
            None => Ok(None),
        }
    }

    /// Whether both sides are empty.
    pub fn is_empty(&self) -> bool {
        let sides = self.lock();
        sides.bids.is_empty() && sides.asks.is_empty()
    }

    /// Snapshot of both sides in priority order, loading each resting
    /// order from disk.
    pub fn depth(&self) -> Result<BookDepth, StorageError> {
        let sides = self.lock();
        Ok(BookDepth {
            symbol: self.symbol.clone(),
            bids: self.side_depth(&sides.bids)?,
            asks: self.side_depth(&sides.asks)?,
        })
    }

    fn side_depth(&self, side: &BookSide) -> Result<Vec<DepthLevel>, StorageError> {
        let mut out = Vec::new();
        for price in side.prices() {
            let Some(queue) = side.level(price) else {
                continue;
            };
            let mut orders = Vec::with_capacity(queue.len());
            let mut total = 0u64;
            for &offset in queue {
                let order = self.store.load(offset)?;
                total += u64::from(order.remaining_qty);
                orders.push(RestingView {
                    order_id: order.id,
                    user_id: order.user_id,
                    remaining_qty: order.remaining_qty,
                });
            }
            out.push(DepthLevel {
                price,
                total_quantity: total,
                orders,
            });
        }
        Ok(out)
    }

    /// Drop both sides and reload every open order of this symbol from
    /// storage, in submission order (timestamp, then id). Afterwards the
    /// book is indistinguishable from the one that produced the records.
    pub(crate) fn rebuild_from_storage(&self) -> Result<usize, StorageError> {
        let mut rows = self.store.load_for_symbol(&self.symbol)?;
        rows.retain(|(_, order)| order.is_open() && order.remaining_qty > 0);
        rows.sort_by_key(|(_, order)| (order.timestamp, order.id.0));

        let mut sides = self.lock();
        sides.bids.clear();
        sides.asks.clear();
        let count = rows.len();
        for (offset, order) in rows {
            sides.of(order.side).insert(order.price, offset);
        }
        Ok(count)
    }
}

/// One resting order as shown in a depth snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct RestingView {
    pub order_id: OrderId,
    pub user_id: String,
    pub remaining_qty: u32,
}

/// All orders at one price, FIFO.
#[derive(Clone, Debug, Serialize)]
pub struct DepthLevel {
    pub price: Decimal,
    pub total_quantity: u64,
    pub orders: Vec<RestingView>,
}

/// Point-in-time view of a book, bids and asks in priority order.
#[derive(Clone, Debug, Serialize)]
pub struct BookDepth {
    pub symbol: String,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

impl fmt::Display for BookDepth {
    /// Asks are printed top-down so the spread sits in the middle.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== ORDER BOOK {} ===", self.symbol)?;
        writeln!(f, "  ASK:")?;
        for level in self.asks.iter().rev() {
            writeln!(
                f,
                "    {:>10} x {:<6} ({} orders)",
                level.price,
                level.total_quantity,
                level.orders.len()
            )?;
        }
        writeln!(f, "  BID:")?;
        for level in &self.bids {
            writeln!(
                f,
                "    {:>10} x {:<6} ({} orders)",
                level.price,
                level.total_quantity,
                level.orders.len()
            )?;
        }
        Ok(())
    }
}
