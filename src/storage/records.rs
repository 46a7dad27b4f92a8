//! Fixed-width on-disk record layouts.
//!
//! All records are little-endian with no padding beyond the stated reserved
//! bytes. Strings are NUL-padded to their field width, so every value must
//! leave room for at least one terminating NUL.
//!
//! ```text
//! OrderRecord:  i32 order_id | u8[32] user_id | u8[8] symbol | u8 side
//!               | f64 price | i32 original_qty | i32 remaining_qty
//!               | u8 status | i64 timestamp
//! TradeRecord:  i32 trade_id | i32 buy_order_id | i32 sell_order_id
//!               | u8[64] buy_user_id | u8[64] sell_user_id | u8[32] symbol
//!               | f64 price | i32 quantity | i64 timestamp | u8[64] reserved
//! UserRecord:   u8[64] user_id | f64 cash | i32 num_holdings
//!               | (u8[32] symbol, i32 qty)[50] | i32 num_active_orders
//!               | i32 active_order_ids[100] | u8[128] reserved
//! Metadata:     i32 next_order_id | i32 next_trade_id | i32 total_users
//!               | i32 total_orders | i32 total_trades | i64 last_save_time
//!               | u8[256] reserved
//! ```

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::StorageError;
use crate::types::{Order, OrderId, OrderStatus, Side, Trade, TradeId, User};

/// Most holdings a user record can carry.
pub const MAX_HOLDINGS: usize = 50;
/// Most simultaneously open orders a user record can carry.
pub const MAX_ACTIVE_ORDERS: usize = 100;

pub const ORDER_RECORD_SIZE: usize = 4 + 32 + 8 + 1 + 8 + 4 + 4 + 1 + 8;
pub const TRADE_RECORD_SIZE: usize = 4 + 4 + 4 + 64 + 64 + 32 + 8 + 4 + 8 + 64;
pub const USER_RECORD_SIZE: usize =
    64 + 8 + 4 + MAX_HOLDINGS * (32 + 4) + 4 + MAX_ACTIVE_ORDERS * 4 + 128;
pub const METADATA_SIZE: usize = 4 * 5 + 8 + 256;

const _: () = assert!(ORDER_RECORD_SIZE == 70);
const _: () = assert!(TRADE_RECORD_SIZE == 256);
const _: () = assert!(USER_RECORD_SIZE == 2408);
const _: () = assert!(METADATA_SIZE == 284);

/// Persisted counters and totals, always overwritten at offset 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub next_order_id: u64,
    pub next_trade_id: u64,
    pub total_users: u64,
    pub total_orders: u64,
    pub total_trades: u64,
    pub last_save_time: i64,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            next_order_id: 1,
            next_trade_id: 1,
            total_users: 0,
            total_orders: 0,
            total_trades: 0,
            last_save_time: 0,
        }
    }
}

// --- field helpers -------------------------------------------------------

fn put_str(
    buf: &mut [u8],
    at: usize,
    width: usize,
    value: &str,
    field: &'static str,
) -> Result<(), StorageError> {
    let bytes = value.as_bytes();
    if bytes.len() >= width || bytes.contains(&0) {
        return Err(StorageError::FieldTooLong {
            field,
            value: value.to_string(),
        });
    }
    buf[at..at + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn get_str(buf: &[u8], at: usize, width: usize) -> String {
    let raw = &buf[at..at + width];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn put_i32(buf: &mut [u8], at: usize, value: i32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_i32(buf: &[u8], at: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    i32::from_le_bytes(raw)
}

fn put_i64(buf: &mut [u8], at: usize, value: i64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

fn get_i64(buf: &[u8], at: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    i64::from_le_bytes(raw)
}

fn put_f64(buf: &mut [u8], at: usize, value: f64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

fn get_f64(buf: &[u8], at: usize) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    f64::from_le_bytes(raw)
}

fn id_to_i32(id: u64, field: &'static str) -> Result<i32, StorageError> {
    i32::try_from(id).map_err(|_| StorageError::FieldTooLong {
        field,
        value: id.to_string(),
    })
}

fn i32_to_u64(value: i32, field: &'static str) -> Result<u64, StorageError> {
    u64::try_from(value).map_err(|_| StorageError::InvalidField { field })
}

fn qty_to_i32(qty: u32, field: &'static str) -> Result<i32, StorageError> {
    i32::try_from(qty).map_err(|_| StorageError::FieldTooLong {
        field,
        value: qty.to_string(),
    })
}

fn i32_to_qty(value: i32, field: &'static str) -> Result<u32, StorageError> {
    u32::try_from(value).map_err(|_| StorageError::InvalidField { field })
}

fn money_to_f64(value: Decimal, field: &'static str) -> Result<f64, StorageError> {
    value.to_f64().ok_or(StorageError::FieldTooLong {
        field,
        value: value.to_string(),
    })
}

fn f64_to_money(value: f64, field: &'static str) -> Result<Decimal, StorageError> {
    Decimal::from_f64(value).ok_or(StorageError::InvalidField { field })
}

// --- orders --------------------------------------------------------------

pub(crate) fn encode_order(order: &Order) -> Result<[u8; ORDER_RECORD_SIZE], StorageError> {
    let mut buf = [0u8; ORDER_RECORD_SIZE];
    put_i32(&mut buf, 0, id_to_i32(order.id.0, "order_id")?);
    put_str(&mut buf, 4, 32, &order.user_id, "order.user_id")?;
    put_str(&mut buf, 36, 8, &order.symbol, "order.symbol")?;
    buf[44] = order.side.tag();
    put_f64(&mut buf, 45, money_to_f64(order.price, "order.price")?);
    put_i32(&mut buf, 53, qty_to_i32(order.original_qty, "order.original_qty")?);
    put_i32(&mut buf, 57, qty_to_i32(order.remaining_qty, "order.remaining_qty")?);
    buf[61] = order.status.tag();
    put_i64(&mut buf, 62, order.timestamp);
    Ok(buf)
}

pub(crate) fn decode_order(buf: &[u8]) -> Result<Order, StorageError> {
    let id = OrderId(i32_to_u64(get_i32(buf, 0), "order_id")?);
    let side = Side::from_tag(buf[44]).ok_or(StorageError::InvalidField {
        field: "order.side",
    })?;
    let status = OrderStatus::from_tag(buf[61]).ok_or(StorageError::InvalidField {
        field: "order.status",
    })?;
    Ok(Order {
        id,
        user_id: get_str(buf, 4, 32),
        symbol: get_str(buf, 36, 8),
        side,
        price: f64_to_money(get_f64(buf, 45), "order.price")?,
        original_qty: i32_to_qty(get_i32(buf, 53), "order.original_qty")?,
        remaining_qty: i32_to_qty(get_i32(buf, 57), "order.remaining_qty")?,
        status,
        timestamp: get_i64(buf, 62),
    })
}

// --- trades --------------------------------------------------------------

pub(crate) fn encode_trade(trade: &Trade) -> Result<[u8; TRADE_RECORD_SIZE], StorageError> {
    let mut buf = [0u8; TRADE_RECORD_SIZE];
    put_i32(&mut buf, 0, id_to_i32(trade.id.0, "trade_id")?);
    put_i32(&mut buf, 4, id_to_i32(trade.buy_order_id.0, "buy_order_id")?);
    put_i32(&mut buf, 8, id_to_i32(trade.sell_order_id.0, "sell_order_id")?);
    put_str(&mut buf, 12, 64, &trade.buy_user_id, "trade.buy_user_id")?;
    put_str(&mut buf, 76, 64, &trade.sell_user_id, "trade.sell_user_id")?;
    put_str(&mut buf, 140, 32, &trade.symbol, "trade.symbol")?;
    put_f64(&mut buf, 172, money_to_f64(trade.price, "trade.price")?);
    put_i32(&mut buf, 180, qty_to_i32(trade.quantity, "trade.quantity")?);
    put_i64(&mut buf, 184, trade.timestamp);
    Ok(buf)
}

pub(crate) fn decode_trade(buf: &[u8]) -> Result<Trade, StorageError> {
    Ok(Trade {
        id: TradeId(i32_to_u64(get_i32(buf, 0), "trade_id")?),
        buy_order_id: OrderId(i32_to_u64(get_i32(buf, 4), "buy_order_id")?),
        sell_order_id: OrderId(i32_to_u64(get_i32(buf, 8), "sell_order_id")?),
        buy_user_id: get_str(buf, 12, 64),
        sell_user_id: get_str(buf, 76, 64),
        symbol: get_str(buf, 140, 32),
        price: f64_to_money(get_f64(buf, 172), "trade.price")?,
        quantity: i32_to_qty(get_i32(buf, 180), "trade.quantity")?,
        timestamp: get_i64(buf, 184),
    })
}

// --- users ---------------------------------------------------------------

pub(crate) fn encode_user(user: &User) -> Result<[u8; USER_RECORD_SIZE], StorageError> {
    let mut buf = [0u8; USER_RECORD_SIZE];
    put_str(&mut buf, 0, 64, user.id(), "user.user_id")?;
    put_f64(&mut buf, 64, money_to_f64(user.cash(), "user.cash_balance")?);

    let holdings = user.holdings();
    if holdings.len() > MAX_HOLDINGS {
        return Err(StorageError::FieldTooLong {
            field: "user.num_holdings",
            value: holdings.len().to_string(),
        });
    }
    put_i32(&mut buf, 72, holdings.len() as i32);
    for (slot, (symbol, qty)) in holdings.iter().enumerate() {
        let at = 76 + slot * 36;
        put_str(&mut buf, at, 32, symbol, "user.holding.symbol")?;
        put_i32(&mut buf, at + 32, qty_to_i32(*qty, "user.holding.quantity")?);
    }

    let active = user.active_order_ids();
    if active.len() > MAX_ACTIVE_ORDERS {
        return Err(StorageError::FieldTooLong {
            field: "user.num_active_orders",
            value: active.len().to_string(),
        });
    }
    put_i32(&mut buf, 1876, active.len() as i32);
    for (slot, id) in active.iter().enumerate() {
        put_i32(&mut buf, 1880 + slot * 4, id_to_i32(id.0, "user.active_order_id")?);
    }
    Ok(buf)
}

pub(crate) fn decode_user(buf: &[u8]) -> Result<User, StorageError> {
    let id = get_str(buf, 0, 64);
    let cash = f64_to_money(get_f64(buf, 64), "user.cash_balance")?;

    let num_holdings = get_i32(buf, 72);
    if num_holdings < 0 || num_holdings as usize > MAX_HOLDINGS {
        return Err(StorageError::InvalidField {
            field: "user.num_holdings",
        });
    }
    let mut holdings = BTreeMap::new();
    for slot in 0..num_holdings as usize {
        let at = 76 + slot * 36;
        let symbol = get_str(buf, at, 32);
        let qty = i32_to_qty(get_i32(buf, at + 32), "user.holding.quantity")?;
        holdings.insert(symbol, qty);
    }

    let num_active = get_i32(buf, 1876);
    if num_active < 0 || num_active as usize > MAX_ACTIVE_ORDERS {
        return Err(StorageError::InvalidField {
            field: "user.num_active_orders",
        });
    }
    let mut active = BTreeSet::new();
    for slot in 0..num_active as usize {
        let raw = get_i32(buf, 1880 + slot * 4);
        active.insert(OrderId(i32_to_u64(raw, "user.active_order_id")?));
    }

    Ok(User::from_parts(id, cash, holdings, active))
}

// --- metadata ------------------------------------------------------------

pub(crate) fn encode_metadata(meta: &Metadata) -> Result<[u8; METADATA_SIZE], StorageError> {
    let mut buf = [0u8; METADATA_SIZE];
    put_i32(&mut buf, 0, id_to_i32(meta.next_order_id, "next_order_id")?);
    put_i32(&mut buf, 4, id_to_i32(meta.next_trade_id, "next_trade_id")?);
    put_i32(&mut buf, 8, id_to_i32(meta.total_users, "total_users")?);
    put_i32(&mut buf, 12, id_to_i32(meta.total_orders, "total_orders")?);
    put_i32(&mut buf, 16, id_to_i32(meta.total_trades, "total_trades")?);
    put_i64(&mut buf, 20, meta.last_save_time);
    Ok(buf)
}

pub(crate) fn decode_metadata(buf: &[u8]) -> Result<Metadata, StorageError> {
    Ok(Metadata {
        next_order_id: i32_to_u64(get_i32(buf, 0), "next_order_id")?.max(1),
        next_trade_id: i32_to_u64(get_i32(buf, 4), "next_trade_id")?.max(1),
        total_users: i32_to_u64(get_i32(buf, 8), "total_users")?,
        total_orders: i32_to_u64(get_i32(buf, 12), "total_orders")?,
        total_trades: i32_to_u64(get_i32(buf, 16), "total_trades")?,
        last_save_time: get_i64(buf, 20),
    })
}
