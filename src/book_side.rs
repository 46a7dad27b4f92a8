//! One side of an order book: an ordered map from price to a FIFO queue of
//! order references (disk offsets).
//!
//! The book never owns order state; the offsets point into the order store,
//! which holds the bytes. Scan direction depends on the side: bids are
//! walked from the highest price down, asks from the lowest price up.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;

use crate::storage::DiskOffset;
use crate::types::Side;

pub(crate) struct BookSide {
    side: Side,
    levels: BTreeMap<Decimal, VecDeque<DiskOffset>>,
}

impl BookSide {
    pub(crate) fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    pub(crate) fn side(&self) -> Side {
        self.side
    }

    /// Append a reference at the tail of its price level (FIFO time
    /// priority for everything arriving after it).
    pub(crate) fn insert(&mut self, price: Decimal, offset: DiskOffset) {
        self.levels.entry(price).or_default().push_back(offset);
    }

    /// Remove one specific reference from its level (cancel path).
    pub(crate) fn remove(&mut self, price: Decimal, offset: DiskOffset) -> bool {
        let Some(queue) = self.levels.get_mut(&price) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|&entry| entry != offset);
        let removed = queue.len() < before;
        if queue.is_empty() {
            self.levels.remove(&price);
        }
        removed
    }

    /// Dequeue the head of a price level (a counterparty just filled).
    pub(crate) fn pop_front(&mut self, price: Decimal) -> Option<DiskOffset> {
        let queue = self.levels.get_mut(&price)?;
        let front = queue.pop_front();
        if queue.is_empty() {
            self.levels.remove(&price);
        }
        front
    }

    /// Head of the best price level: highest price for bids, lowest for
    /// asks. Empty queues are skipped.
    pub(crate) fn best(&self) -> Option<(Decimal, DiskOffset)> {
        self.best_from(None)
    }

    /// Head of the best level at or beyond `cursor` in scan direction.
    /// `None` cursor means the true best. Used by matching to skip whole
    /// price levels (self-match prevention).
    pub(crate) fn best_from(&self, cursor: Option<Decimal>) -> Option<(Decimal, DiskOffset)> {
        let found = match (self.side, cursor) {
            (Side::Sell, None) => self.levels.iter().find(|(_, q)| !q.is_empty()),
            (Side::Sell, Some(from)) => self
                .levels
                .range(from..)
                .find(|(_, q)| !q.is_empty()),
            (Side::Buy, None) => self.levels.iter().rev().find(|(_, q)| !q.is_empty()),
            (Side::Buy, Some(from)) => self
                .levels
                .range(..=from)
                .rev()
                .find(|(_, q)| !q.is_empty()),
        };
        found.and_then(|(price, queue)| queue.front().map(|&off| (*price, off)))
    }

    /// Next populated price strictly beyond `price` in scan direction
    /// (higher for asks, lower for bids).
    pub(crate) fn next_level(&self, price: Decimal) -> Option<Decimal> {
        match self.side {
            Side::Sell => self
                .levels
                .range((Bound::Excluded(price), Bound::Unbounded))
                .map(|(p, _)| *p)
                .next(),
            Side::Buy => self.levels.range(..price).rev().map(|(p, _)| *p).next(),
        }
    }

    /// Populated prices in scan order (best first).
    pub(crate) fn prices(&self) -> Vec<Decimal> {
        match self.side {
            Side::Sell => self.levels.keys().copied().collect(),
            Side::Buy => self.levels.keys().rev().copied().collect(),
        }
    }

    /// FIFO queue at one price level.
    pub(crate) fn level(&self, price: Decimal) -> Option<&VecDeque<DiskOffset>> {
        self.levels.get(&price)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Total references across all levels.
    pub(crate) fn order_count(&self) -> usize {
        self.levels.values().map(|q| q.len()).sum()
    }

    pub(crate) fn clear(&mut self) {
        self.levels.clear();
    }
}
