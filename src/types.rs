//! Core entities and identifiers.
//!
//! All identifiers are newtype wrappers. [`Order`], [`Trade`], and [`User`]
//! are the persistent value types; their fixed-width disk layouts live in
//! `storage::records`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Unique order identifier, allocated monotonically by the engine.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique trade identifier, allocated monotonically by the engine.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TradeId(pub u64);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Single-byte tag used in the order record ('B' or 'S').
    pub(crate) fn tag(self) -> u8 {
        match self {
            Side::Buy => b'B',
            Side::Sell => b'S',
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'B' => Some(Side::Buy),
            b'S' => Some(Side::Sell),
            _ => None,
        }
    }

    /// The side an incoming order matches against.
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order lifecycle status. `Filled` and `Cancelled` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Active,
    Partial,
    Filled,
    Cancelled,
}

impl OrderStatus {
    /// Single-byte tag used in the order record.
    pub(crate) fn tag(self) -> u8 {
        match self {
            OrderStatus::Active => b'A',
            OrderStatus::Partial => b'P',
            OrderStatus::Filled => b'F',
            OrderStatus::Cancelled => b'C',
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'A' => Some(OrderStatus::Active),
            b'P' => Some(OrderStatus::Partial),
            b'F' => Some(OrderStatus::Filled),
            b'C' => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Active => write!(f, "ACTIVE"),
            OrderStatus::Partial => write!(f, "PARTIAL"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// A limit intent to transact on one instrument.
///
/// Created on submission, mutated on every fill and on cancel, never
/// deleted: the record stays addressable on disk for the life of the venue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub original_qty: u32,
    pub remaining_qty: u32,
    pub status: OrderStatus,
    /// Seconds since the Unix epoch at submission.
    pub timestamp: i64,
}

impl Order {
    pub fn new(
        id: OrderId,
        user_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        price: Decimal,
        quantity: u32,
        timestamp: i64,
    ) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            symbol: symbol.into(),
            side,
            price,
            original_qty: quantity,
            remaining_qty: quantity,
            status: OrderStatus::Active,
            timestamp,
        }
    }

    /// Reduce the remaining quantity by a fill and update the status.
    /// `quantity` must not exceed `remaining_qty`.
    pub(crate) fn fill(&mut self, quantity: u32) {
        self.remaining_qty = self.remaining_qty.saturating_sub(quantity);
        self.status = if self.remaining_qty == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
    }

    /// Whether the order can still rest on or match in a book.
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} {} {}/{} @ {} [{}]",
            self.id,
            self.user_id,
            self.side,
            self.symbol,
            self.remaining_qty,
            self.original_qty,
            self.price,
            self.status
        )
    }
}

/// A record of one match between two orders. Never mutated or deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buy_user_id: String,
    pub sell_user_id: String,
    pub symbol: String,
    /// The resting order's limit price at the time of the match.
    pub price: Decimal,
    pub quantity: u32,
    /// Seconds since the Unix epoch at execution.
    pub timestamp: i64,
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trade #{}: {} x {} @ {} ({} buys from {})",
            self.id, self.symbol, self.quantity, self.price, self.buy_user_id, self.sell_user_id
        )
    }
}

/// Account state: cash, per-symbol holdings, and the set of open order ids.
///
/// Cash and holdings never go negative; all mutators enforce this.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    id: String,
    cash: Decimal,
    holdings: BTreeMap<String, u32>,
    active_orders: BTreeSet<OrderId>,
}

impl User {
    pub fn new(id: impl Into<String>, cash: Decimal) -> Self {
        Self {
            id: id.into(),
            cash,
            holdings: BTreeMap::new(),
            active_orders: BTreeSet::new(),
        }
    }

    pub(crate) fn from_parts(
        id: String,
        cash: Decimal,
        holdings: BTreeMap<String, u32>,
        active_orders: BTreeSet<OrderId>,
    ) -> Self {
        Self {
            id,
            cash,
            holdings,
            active_orders,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    /// Debit cash; refuses (returning `false`) rather than going negative.
    pub(crate) fn deduct_cash(&mut self, amount: Decimal) -> bool {
        if amount > self.cash {
            return false;
        }
        self.cash -= amount;
        true
    }

    pub(crate) fn credit_cash(&mut self, amount: Decimal) {
        self.cash += amount;
    }

    /// Shares held of `symbol` (absent symbol reads as zero).
    pub fn shares_of(&self, symbol: &str) -> u32 {
        self.holdings.get(symbol).copied().unwrap_or(0)
    }

    /// All holdings, keyed by symbol. Entries stay once created, possibly
    /// at zero quantity, so settlement can never run out of record slots.
    pub fn holdings(&self) -> &BTreeMap<String, u32> {
        &self.holdings
    }

    /// Whether crediting `symbol` would consume a fresh holding slot.
    pub(crate) fn needs_holding_slot(&self, symbol: &str) -> bool {
        !self.holdings.contains_key(symbol)
    }

    /// Number of holding entries (including zero-quantity slots).
    pub(crate) fn holding_slots(&self) -> usize {
        self.holdings.len()
    }

    pub(crate) fn add_shares(&mut self, symbol: &str, quantity: u32) {
        *self.holdings.entry(symbol.to_string()).or_insert(0) += quantity;
    }

    /// Debit shares; refuses (returning `false`) rather than going negative.
    pub(crate) fn remove_shares(&mut self, symbol: &str, quantity: u32) -> bool {
        match self.holdings.get_mut(symbol) {
            Some(held) if *held >= quantity => {
                *held -= quantity;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn register_order(&mut self, id: OrderId) {
        self.active_orders.insert(id);
    }

    pub(crate) fn release_order(&mut self, id: OrderId) {
        self.active_orders.remove(&id);
    }

    /// Ids of this user's orders whose status is active or partial.
    pub fn active_order_ids(&self) -> &BTreeSet<OrderId> {
        &self.active_orders
    }
}

/// Seconds since the Unix epoch.
pub fn unix_timestamp() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fill_transitions_partial_then_filled() {
        let mut order = Order::new(OrderId(1), "u", "SYM", Side::Buy, dec!(10.00), 10, 0);
        order.fill(4);
        assert_eq!(order.remaining_qty, 6);
        assert_eq!(order.status, OrderStatus::Partial);
        order.fill(6);
        assert_eq!(order.remaining_qty, 0);
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(!order.is_open());
    }

    #[test]
    fn deduct_cash_refuses_overdraft() {
        let mut user = User::new("u", dec!(100.00));
        assert!(!user.deduct_cash(dec!(100.01)));
        assert_eq!(user.cash(), dec!(100.00));
        assert!(user.deduct_cash(dec!(100.00)));
        assert_eq!(user.cash(), Decimal::ZERO);
    }

    #[test]
    fn shares_never_go_negative() {
        let mut user = User::new("u", Decimal::ZERO);
        assert!(!user.remove_shares("SYM", 1));
        user.add_shares("SYM", 5);
        assert!(user.remove_shares("SYM", 5));
        assert_eq!(user.shares_of("SYM"), 0);
        assert!(!user.remove_shares("SYM", 1));
    }

    #[test]
    fn holding_slot_persists_at_zero() {
        let mut user = User::new("u", Decimal::ZERO);
        user.add_shares("SYM", 3);
        user.remove_shares("SYM", 3);
        assert!(!user.needs_holding_slot("SYM"));
        assert_eq!(user.holding_slots(), 1);
    }

    #[test]
    fn side_and_status_tags_round_trip() {
        for side in [Side::Buy, Side::Sell] {
            assert_eq!(Side::from_tag(side.tag()), Some(side));
        }
        for status in [
            OrderStatus::Active,
            OrderStatus::Partial,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::from_tag(status.tag()), Some(status));
        }
        assert_eq!(Side::from_tag(b'x'), None);
        assert_eq!(OrderStatus::from_tag(b'x'), None);
    }
}
