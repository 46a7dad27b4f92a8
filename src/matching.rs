//! Price-time priority matching.
//!
//! [`match_incoming`] runs one persisted order against the opposite side of
//! its book: counterparties are loaded from the order store, fills rewrite
//! both records in place, and the trade price is always the resting order's
//! limit. Orders from the same user never match; the whole price level is
//! skipped.

use rust_decimal::Decimal;

use crate::book_side::BookSide;
use crate::error::StorageError;
use crate::storage::{DiskOffset, OrderStore};
use crate::types::{Order, OrderId, Side};

/// One fill produced while matching an incoming order.
#[derive(Clone, Debug)]
pub(crate) struct Execution {
    pub counterparty: OrderId,
    pub counterparty_user: String,
    /// The resting order's limit price.
    pub price: Decimal,
    pub quantity: u32,
    /// Whether the resting order was fully filled by this execution.
    pub counterparty_filled: bool,
}

fn crosses(side: Side, limit: Decimal, level: Decimal) -> bool {
    match side {
        Side::Buy => level <= limit,
        Side::Sell => level >= limit,
    }
}

/// Match `incoming` (already persisted at `incoming_offset`) against `opp`.
///
/// Mutates `incoming` in memory and on disk as fills land. The caller rests
/// any unfilled remainder on its own side afterwards.
pub(crate) fn match_incoming(
    opp: &mut BookSide,
    store: &OrderStore,
    incoming: &mut Order,
    incoming_offset: DiskOffset,
) -> Result<Vec<Execution>, StorageError> {
    let mut executions = Vec::new();
    // Levels at or better than the cursor are exhausted or self-owned.
    let mut cursor: Option<Decimal> = None;

    while incoming.remaining_qty > 0 {
        let Some((level_price, front)) = opp.best_from(cursor) else {
            break;
        };
        if !crosses(incoming.side, incoming.price, level_price) {
            break;
        }
        let mut counter = store.load(front)?;
        if counter.remaining_qty == 0 {
            // Stale reference; drop it and rescan the level.
            opp.pop_front(level_price);
            continue;
        }
        if counter.user_id == incoming.user_id {
            // Self-match prevention skips the entire price level, other
            // owners' orders at this price included.
            match opp.next_level(level_price) {
                Some(next) => {
                    cursor = Some(next);
                    continue;
                }
                None => break,
            }
        }

        let quantity = incoming.remaining_qty.min(counter.remaining_qty);
        incoming.fill(quantity);
        counter.fill(quantity);
        store.update(incoming, incoming_offset)?;
        store.update(&counter, front)?;

        let counterparty_filled = counter.remaining_qty == 0;
        if counterparty_filled {
            // A partially filled counterparty keeps its place at the head
            // of the level; only a full fill dequeues it.
            opp.pop_front(level_price);
        }
        executions.push(Execution {
            counterparty: counter.id,
            counterparty_user: counter.user_id,
            price: counter.price,
            quantity,
            counterparty_filled,
        });
    }

    Ok(executions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::OrderStore;
    use crate::types::{unix_timestamp, OrderStatus};
    use rust_decimal_macros::dec;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: OrderStore,
        next_id: u64,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let store = OrderStore::open(dir.path()).expect("open");
            Self {
                _dir: dir,
                store,
                next_id: 1,
            }
        }

        fn rest(
            &mut self,
            side: &mut BookSide,
            user: &str,
            price: Decimal,
            qty: u32,
        ) -> (DiskOffset, OrderId) {
            let id = OrderId(self.next_id);
            self.next_id += 1;
            let order = Order::new(id, user, "AAPL", side.side(), price, qty, unix_timestamp());
            let offset = self.store.persist(&order).expect("persist");
            side.insert(price, offset);
            (offset, id)
        }

        fn incoming(&mut self, side: Side, user: &str, price: Decimal, qty: u32) -> (Order, DiskOffset) {
            let id = OrderId(self.next_id);
            self.next_id += 1;
            let order = Order::new(id, user, "AAPL", side, price, qty, unix_timestamp());
            let offset = self.store.persist(&order).expect("persist");
            (order, offset)
        }
    }

    #[test]
    fn full_cross_at_resting_price() {
        let mut fx = Fixture::new();
        let mut asks = BookSide::new(Side::Sell);
        let (sell_off, sell_id) = fx.rest(&mut asks, "bob", dec!(150.00), 10);

        let (mut buy, buy_off) = fx.incoming(Side::Buy, "alice", dec!(151.00), 10);
        let execs = match_incoming(&mut asks, &fx.store, &mut buy, buy_off).expect("match");

        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].counterparty, sell_id);
        assert_eq!(execs[0].price, dec!(150.00), "trade at resting price");
        assert_eq!(execs[0].quantity, 10);
        assert!(execs[0].counterparty_filled);
        assert_eq!(buy.status, OrderStatus::Filled);
        assert!(asks.is_empty());
        // Both records were rewritten on disk.
        assert_eq!(fx.store.load(sell_off).expect("load").status, OrderStatus::Filled);
        assert_eq!(fx.store.load(buy_off).expect("load").remaining_qty, 0);
    }

    #[test]
    fn price_priority_beats_time() {
        let mut fx = Fixture::new();
        let mut asks = BookSide::new(Side::Sell);
        fx.rest(&mut asks, "bob", dec!(155.00), 20);
        let (_, best_id) = fx.rest(&mut asks, "bob", dec!(152.00), 20);
        fx.rest(&mut asks, "bob", dec!(153.00), 20);

        let (mut buy, buy_off) = fx.incoming(Side::Buy, "alice", dec!(160.00), 50);
        let execs = match_incoming(&mut asks, &fx.store, &mut buy, buy_off).expect("match");

        let prices: Vec<Decimal> = execs.iter().map(|e| e.price).collect();
        assert_eq!(prices, vec![dec!(152.00), dec!(153.00), dec!(155.00)]);
        assert_eq!(execs[0].counterparty, best_id);
        assert_eq!(
            execs.iter().map(|e| e.quantity).collect::<Vec<_>>(),
            vec![20, 20, 10]
        );
        assert_eq!(buy.remaining_qty, 0);
    }

    #[test]
    fn fifo_within_level() {
        let mut fx = Fixture::new();
        let mut asks = BookSide::new(Side::Sell);
        let (_, first_id) = fx.rest(&mut asks, "bob", dec!(100.00), 5);
        fx.rest(&mut asks, "carol", dec!(100.00), 5);

        let (mut buy, buy_off) = fx.incoming(Side::Buy, "alice", dec!(100.00), 5);
        let execs = match_incoming(&mut asks, &fx.store, &mut buy, buy_off).expect("match");
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].counterparty, first_id, "earlier order fills first");
    }

    #[test]
    fn partial_fill_keeps_counterparty_at_head() {
        let mut fx = Fixture::new();
        let mut bids = BookSide::new(Side::Buy);
        let (big_off, big_id) = fx.rest(&mut bids, "alice", dec!(100.00), 10);
        fx.rest(&mut bids, "carol", dec!(100.00), 10);

        let (mut sell, sell_off) = fx.incoming(Side::Sell, "bob", dec!(100.00), 4);
        let execs = match_incoming(&mut bids, &fx.store, &mut sell, sell_off).expect("match");
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].counterparty, big_id);
        assert!(!execs[0].counterparty_filled);
        // The partially filled bid is still the head of its level.
        assert_eq!(bids.best(), Some((dec!(100.00), big_off)));
        assert_eq!(fx.store.load(big_off).expect("load").remaining_qty, 6);
    }

    #[test]
    fn no_cross_leaves_book_untouched() {
        let mut fx = Fixture::new();
        let mut asks = BookSide::new(Side::Sell);
        fx.rest(&mut asks, "bob", dec!(150.00), 10);

        let (mut buy, buy_off) = fx.incoming(Side::Buy, "alice", dec!(149.99), 10);
        let execs = match_incoming(&mut asks, &fx.store, &mut buy, buy_off).expect("match");
        assert!(execs.is_empty());
        assert_eq!(buy.remaining_qty, 10);
        assert_eq!(asks.order_count(), 1);
    }

    #[test]
    fn self_match_skips_whole_level() {
        let mut fx = Fixture::new();
        let mut asks = BookSide::new(Side::Sell);
        // alice's own sell is first at 100; carol sits behind her at the
        // same price, and bob rests at 101.
        fx.rest(&mut asks, "alice", dec!(100.00), 10);
        fx.rest(&mut asks, "carol", dec!(100.00), 10);
        let (_, bob_id) = fx.rest(&mut asks, "bob", dec!(101.00), 10);

        let (mut buy, buy_off) = fx.incoming(Side::Buy, "alice", dec!(101.00), 10);
        let execs = match_incoming(&mut asks, &fx.store, &mut buy, buy_off).expect("match");

        // The whole 100 level is skipped, carol included; bob at 101 fills.
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].counterparty, bob_id);
        assert_eq!(execs[0].price, dec!(101.00));
        assert_eq!(asks.order_count(), 2);
    }

    #[test]
    fn self_match_only_level_rests_incoming() {
        let mut fx = Fixture::new();
        let mut asks = BookSide::new(Side::Sell);
        fx.rest(&mut asks, "alice", dec!(100.00), 10);

        let (mut buy, buy_off) = fx.incoming(Side::Buy, "alice", dec!(100.00), 10);
        let execs = match_incoming(&mut asks, &fx.store, &mut buy, buy_off).expect("match");
        assert!(execs.is_empty());
        assert_eq!(buy.remaining_qty, 10, "incoming left to rest");
        assert_eq!(asks.order_count(), 1, "resting sell untouched");
    }

    #[test]
    fn zero_remaining_counterparty_is_popped_and_skipped() {
        let mut fx = Fixture::new();
        let mut asks = BookSide::new(Side::Sell);
        let (stale_off, _) = fx.rest(&mut asks, "bob", dec!(100.00), 5);
        let (_, live_id) = fx.rest(&mut asks, "carol", dec!(100.00), 5);

        // Zero out the first order on disk without dequeueing it.
        let mut stale = fx.store.load(stale_off).expect("load");
        stale.fill(5);
        fx.store.update(&stale, stale_off).expect("update");

        let (mut buy, buy_off) = fx.incoming(Side::Buy, "alice", dec!(100.00), 5);
        let execs = match_incoming(&mut asks, &fx.store, &mut buy, buy_off).expect("match");
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].counterparty, live_id);
        assert!(asks.is_empty());
    }
}
