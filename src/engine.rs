//! The matching engine coordinator.
//!
//! [`Engine`] owns the record stores, the in-memory caches, the per-symbol
//! books, and the id counters. It sequences order admission (validate →
//! reserve → allocate id → persist order → persist user), hands the order
//! to the book for matching, settles each resulting trade, and persists
//! metadata on a fixed cadence and at shutdown. Opening an engine over an
//! existing data directory reconstructs the exact prior state.
//!
//! Lock hierarchy (acquire in this order, release in any): engine state,
//! then user registry, then trade append, then the per-book lock.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditSink, NullAuditSink};
use crate::cache::LruCache;
use crate::error::{EngineError, StorageError};
use crate::matching::Execution;
use crate::order_book::{BookDepth, OrderBook};
use crate::storage::{
    Metadata, MetadataStore, OrderStore, SymbolStore, TradeStore, UserStore, MAX_ACTIVE_ORDERS,
    MAX_HOLDINGS,
};
use crate::types::{unix_timestamp, Order, OrderId, OrderStatus, Side, Trade, TradeId, User};

/// Longest user id accepted; bounded by the 32-byte order record field.
pub const MAX_USER_ID_LEN: usize = 31;
/// Longest symbol accepted; bounded by the 8-byte order record field.
pub const MAX_SYMBOL_LEN: usize = 7;

/// Engine configuration. `Default` matches the standalone venue: `data/`
/// in the working directory, administrator `admin123`, metadata persisted
/// every 10 orders.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Directory holding every data and index file. Created on open.
    pub data_dir: PathBuf,
    /// The single identity allowed to list symbols.
    pub admin_id: String,
    /// Persist metadata after this many admitted orders (and always at
    /// shutdown).
    pub metadata_save_interval: u64,
    pub order_cache_capacity: usize,
    pub user_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            admin_id: "admin123".to_string(),
            metadata_save_interval: 10,
            order_cache_capacity: 1000,
            user_cache_capacity: 100,
        }
    }
}

impl EngineConfig {
    /// Build from the environment: `DATA_DIR`, `ADMIN_ID`,
    /// `METADATA_SAVE_INTERVAL`. Unset variables keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(admin) = std::env::var("ADMIN_ID") {
            if !admin.is_empty() {
                config.admin_id = admin;
            }
        }
        if let Ok(interval) = std::env::var("METADATA_SAVE_INTERVAL") {
            if let Ok(parsed) = interval.parse::<u64>() {
                config.metadata_save_interval = parsed.max(1);
            }
        }
        config
    }
}

/// Result of a successful order submission: the final state of the
/// incoming order plus the trades it produced, in fill order.
#[derive(Clone, Debug, Serialize)]
pub struct OrderReceipt {
    pub order: Order,
    pub trades: Vec<Trade>,
}

/// Result of a successful cancellation.
#[derive(Clone, Debug, Serialize)]
pub struct CancelReceipt {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    /// Shares (sell) or share-count worth of cash (buy) returned.
    pub refunded_qty: u32,
}

struct EngineState {
    next_order_id: u64,
    next_trade_id: u64,
    orders_since_save: u64,
    books: HashMap<String, Arc<OrderBook>>,
}

struct UserRegistry {
    cache: LruCache<String, User>,
}

pub struct Engine {
    config: EngineConfig,
    orders: Arc<OrderStore>,
    users: UserStore,
    trades: TradeStore,
    symbols: SymbolStore,
    metadata: MetadataStore,
    state: Mutex<EngineState>,
    registry: Mutex<UserRegistry>,
    trade_lock: Mutex<()>,
    order_cache: Mutex<LruCache<u64, Order>>,
    audit_sink: Box<dyn AuditSink>,
}

impl Engine {
    /// Open the engine over `config.data_dir`, creating the directory if
    /// needed and recovering all prior state from disk.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&config.data_dir).map_err(StorageError::from)?;
        let orders = Arc::new(OrderStore::open(&config.data_dir)?);
        let users = UserStore::open(&config.data_dir)?;
        let trades = TradeStore::open(&config.data_dir)?;
        let symbols = SymbolStore::open(&config.data_dir)?;
        let metadata = MetadataStore::open(&config.data_dir)?;

        let meta = metadata.load()?;
        // The data files outrank the metadata counters: a crash between
        // saves must never lead to id reuse.
        let next_order_id = meta.next_order_id.max(orders.max_id() + 1);
        let next_trade_id = meta.next_trade_id.max(trades.max_id() + 1);

        let mut books = HashMap::new();
        for symbol in symbols.load_all()? {
            let book = Arc::new(OrderBook::new(&symbol, Arc::clone(&orders)));
            let restored = book.rebuild_from_storage()?;
            debug!("rebuilt book {symbol}: {restored} resting orders");
            books.insert(symbol, book);
        }

        let mut user_cache = LruCache::new(config.user_cache_capacity);
        for user in users.load_all()? {
            user_cache.put(user.id().to_string(), user);
        }

        info!(
            "engine open: {} users, {} orders, {} trades, {} books; next order id {next_order_id}, next trade id {next_trade_id}",
            users.count(),
            orders.count(),
            trades.count(),
            books.len()
        );

        Ok(Self {
            orders,
            users,
            trades,
            symbols,
            metadata,
            state: Mutex::new(EngineState {
                next_order_id,
                next_trade_id,
                orders_since_save: 0,
                books,
            }),
            registry: Mutex::new(UserRegistry { cache: user_cache }),
            trade_lock: Mutex::new(()),
            order_cache: Mutex::new(LruCache::new(config.order_cache_capacity)),
            audit_sink: Box::new(NullAuditSink),
            config,
        })
    }

    /// Replace the audit sink (builder style, before the engine is shared).
    pub fn with_audit(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.audit_sink = sink;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // --- accounts and symbols -------------------------------------------

    /// Create an account with an initial cash balance. Rejects duplicates.
    pub fn create_user(&self, user_id: &str, initial_cash: Decimal) -> Result<(), EngineError> {
        validate_user_id(user_id)?;
        if initial_cash < Decimal::ZERO || initial_cash.normalize().scale() > 2 {
            return Err(EngineError::InvalidCash);
        }
        let mut registry = self.registry.lock().expect("lock");
        if self.users.exists(user_id) {
            return Err(EngineError::DuplicateUser(user_id.to_string()));
        }
        let user = User::new(user_id, initial_cash);
        self.users.persist(&user)?;
        registry.cache.put(user_id.to_string(), user);
        drop(registry);
        info!("created user {user_id} with ${initial_cash}");
        self.audit(
            user_id,
            "user_create",
            serde_json::json!({ "initial_cash": initial_cash }),
            "success",
        );
        Ok(())
    }

    /// List a new symbol and create its empty book. Only the configured
    /// administrator identity may call this.
    pub fn add_symbol(&self, symbol: &str, requester_id: &str) -> Result<(), EngineError> {
        if requester_id != self.config.admin_id {
            return Err(EngineError::Unauthorized(requester_id.to_string()));
        }
        validate_symbol(symbol)?;
        let mut state = self.state.lock().expect("lock");
        if !self.symbols.add(symbol)? {
            return Err(EngineError::DuplicateSymbol(symbol.to_string()));
        }
        state.books.insert(
            symbol.to_string(),
            Arc::new(OrderBook::new(symbol, Arc::clone(&self.orders))),
        );
        drop(state);
        info!("listed symbol {symbol}");
        self.audit(
            requester_id,
            "symbol_add",
            serde_json::json!({ "symbol": symbol }),
            "success",
        );
        Ok(())
    }

    pub fn symbol_exists(&self, symbol: &str) -> Result<bool, EngineError> {
        Ok(self.symbols.contains(symbol)?)
    }

    /// All listed symbols, in listing order.
    pub fn symbols(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.symbols.load_all()?)
    }

    /// Credit shares to an account (venue seeding; shares enter the system
    /// only through this operation).
    pub fn grant_shares(
        &self,
        user_id: &str,
        symbol: &str,
        quantity: u32,
    ) -> Result<(), EngineError> {
        if quantity == 0 {
            return Err(EngineError::InvalidQuantity);
        }
        if !self.symbols.contains(symbol)? {
            return Err(EngineError::UnknownSymbol(symbol.to_string()));
        }
        let mut registry = self.registry.lock().expect("lock");
        let mut user = self
            .load_user_locked(&mut registry, user_id)?
            .ok_or_else(|| EngineError::UnknownUser(user_id.to_string()))?;
        if user.needs_holding_slot(symbol) && user.holding_slots() >= MAX_HOLDINGS {
            return Err(EngineError::CapacityExceeded {
                user: user_id.to_string(),
                what: "holdings",
            });
        }
        user.add_shares(symbol, quantity);
        self.users.update(&user)?;
        registry.cache.put(user_id.to_string(), user);
        drop(registry);
        self.audit(
            user_id,
            "shares_grant",
            serde_json::json!({ "symbol": symbol, "quantity": quantity }),
            "success",
        );
        Ok(())
    }

    // --- order submission ------------------------------------------------

    /// Admit a limit order: validate, reserve cash or shares, persist,
    /// match against the book, and settle every resulting trade.
    pub fn place_order(
        &self,
        user_id: &str,
        symbol: &str,
        side: Side,
        price: Decimal,
        quantity: u32,
    ) -> Result<OrderReceipt, EngineError> {
        let result = self.place_order_inner(user_id, symbol, side, price, quantity);
        match &result {
            Ok(receipt) => self.audit(
                user_id,
                "order_submit",
                serde_json::json!({
                    "order_id": receipt.order.id,
                    "symbol": symbol,
                    "side": side,
                    "price": price,
                    "quantity": quantity,
                    "trades": receipt.trades.len(),
                }),
                "success",
            ),
            Err(err) => self.audit(
                user_id,
                "order_submit",
                serde_json::json!({ "symbol": symbol, "error": err.to_string() }),
                "rejected",
            ),
        }
        result
    }

    fn place_order_inner(
        &self,
        user_id: &str,
        symbol: &str,
        side: Side,
        price: Decimal,
        quantity: u32,
    ) -> Result<OrderReceipt, EngineError> {
        if quantity == 0 {
            return Err(EngineError::InvalidQuantity);
        }
        if price <= Decimal::ZERO || price.normalize().scale() > 2 {
            return Err(EngineError::InvalidPrice);
        }
        if !self.symbols.contains(symbol)? {
            return Err(EngineError::UnknownSymbol(symbol.to_string()));
        }
        let book = self.book(symbol)?;

        // Reservation window: engine state and user registry held
        // together so id allocation and the debit are one atomic unit.
        let (mut order, offset) = {
            let mut state = self.state.lock().expect("lock");
            let mut registry = self.registry.lock().expect("lock");
            let mut user = self
                .load_user_locked(&mut registry, user_id)?
                .ok_or_else(|| EngineError::UnknownUser(user_id.to_string()))?;

            if user.active_order_ids().len() >= MAX_ACTIVE_ORDERS {
                return Err(EngineError::CapacityExceeded {
                    user: user_id.to_string(),
                    what: "active orders",
                });
            }
            match side {
                Side::Buy => {
                    if user.needs_holding_slot(symbol) && user.holding_slots() >= MAX_HOLDINGS {
                        return Err(EngineError::CapacityExceeded {
                            user: user_id.to_string(),
                            what: "holdings",
                        });
                    }
                    let cost = price * Decimal::from(quantity);
                    if !user.deduct_cash(cost) {
                        return Err(EngineError::InsufficientFunds {
                            required: cost,
                            available: user.cash(),
                        });
                    }
                    // Claim the holding slot now so settlement can never
                    // overflow the user record.
                    user.add_shares(symbol, 0);
                }
                Side::Sell => {
                    let held = user.shares_of(symbol);
                    if !user.remove_shares(symbol, quantity) {
                        return Err(EngineError::InsufficientShares {
                            symbol: symbol.to_string(),
                            required: quantity,
                            available: held,
                        });
                    }
                }
            }

            let id = OrderId(state.next_order_id);
            let order = Order::new(id, user_id, symbol, side, price, quantity, unix_timestamp());
            let offset = match self.orders.persist(&order) {
                Ok(offset) => offset,
                Err(err) => {
                    // The reservation never reached disk; drop the dirty
                    // in-memory copy and report the failure.
                    registry.cache.remove(&user_id.to_string());
                    return Err(err.into());
                }
            };
            state.next_order_id += 1;
            state.orders_since_save += 1;

            user.register_order(id);
            if let Err(err) = self.users.update(&user) {
                // Neutralize the persisted order so recovery cannot
                // resurrect a reservation the user record never saw.
                let mut void = order.clone();
                void.status = OrderStatus::Cancelled;
                void.remaining_qty = 0;
                if let Err(undo) = self.orders.update(&void, offset) {
                    error!("could not void order {id} after failed user persist: {undo}");
                }
                registry.cache.remove(&user_id.to_string());
                return Err(err.into());
            }
            registry.cache.put(user_id.to_string(), user);
            (order, offset)
        };
        self.cache_order(&order);
        debug!("admitted {order}");

        // Matching runs under the book lock only.
        let executions = book.submit(&mut order, offset)?;

        let mut trades = Vec::with_capacity(executions.len());
        for execution in &executions {
            self.order_cache
                .lock()
                .expect("lock")
                .remove(&execution.counterparty.0);
            trades.push(self.settle(&order, execution));
        }
        if order.status == OrderStatus::Filled {
            self.release_active(user_id, order.id)?;
        }
        self.cache_order(&order);
        self.maybe_save_metadata();
        Ok(OrderReceipt { order, trades })
    }

    /// Allocate a trade id, move shares and cash between the two users,
    /// and persist the trade record. Settlement I/O failures abort the
    /// process: a half-applied trade cannot be unwound.
    fn settle(&self, incoming: &Order, execution: &Execution) -> Trade {
        let id = {
            let mut state = self.state.lock().expect("lock");
            let id = state.next_trade_id;
            state.next_trade_id += 1;
            TradeId(id)
        };
        let (buy_order_id, sell_order_id, buy_user_id, sell_user_id) = match incoming.side {
            Side::Buy => (
                incoming.id,
                execution.counterparty,
                incoming.user_id.clone(),
                execution.counterparty_user.clone(),
            ),
            Side::Sell => (
                execution.counterparty,
                incoming.id,
                execution.counterparty_user.clone(),
                incoming.user_id.clone(),
            ),
        };
        let trade = Trade {
            id,
            buy_order_id,
            sell_order_id,
            buy_user_id,
            sell_user_id,
            symbol: incoming.symbol.clone(),
            price: execution.price,
            quantity: execution.quantity,
            timestamp: unix_timestamp(),
        };

        {
            let mut registry = self.registry.lock().expect("lock");
            if let Err(err) = self.apply_trade(&mut registry, &trade, execution, incoming.side) {
                error!("settling trade {} failed: {err}", trade.id);
                panic!("trade settlement failure is unrecoverable: {err}");
            }
        }
        {
            let _append = self.trade_lock.lock().expect("lock");
            if let Err(err) = self.trades.persist(&trade) {
                error!("persisting trade {} failed: {err}", trade.id);
                panic!("trade persistence failure is unrecoverable: {err}");
            }
        }
        debug!("executed {trade}");
        trade
    }

    fn apply_trade(
        &self,
        registry: &mut UserRegistry,
        trade: &Trade,
        execution: &Execution,
        incoming_side: Side,
    ) -> Result<(), EngineError> {
        let mut buyer = self
            .load_user_locked(registry, &trade.buy_user_id)?
            .ok_or_else(|| EngineError::UnknownUser(trade.buy_user_id.clone()))?;
        let mut seller = self
            .load_user_locked(registry, &trade.sell_user_id)?
            .ok_or_else(|| EngineError::UnknownUser(trade.sell_user_id.clone()))?;

        buyer.add_shares(&trade.symbol, trade.quantity);
        seller.credit_cash(trade.price * Decimal::from(trade.quantity));
        if execution.counterparty_filled {
            match incoming_side {
                Side::Buy => seller.release_order(execution.counterparty),
                Side::Sell => buyer.release_order(execution.counterparty),
            }
        }
        self.users.update(&buyer)?;
        self.users.update(&seller)?;
        registry.cache.put(trade.buy_user_id.clone(), buyer);
        registry.cache.put(trade.sell_user_id.clone(), seller);
        Ok(())
    }

    // --- cancellation ----------------------------------------------------

    /// Cancel a resting order and refund the unmatched remainder: cash at
    /// the order's limit price for buys, shares for sells.
    pub fn cancel_order(&self, id: OrderId, user_id: &str) -> Result<CancelReceipt, EngineError> {
        let result = self.cancel_order_inner(id, user_id);
        match &result {
            Ok(receipt) => self.audit(
                user_id,
                "order_cancel",
                serde_json::json!({
                    "order_id": id,
                    "symbol": receipt.symbol,
                    "refunded_qty": receipt.refunded_qty,
                }),
                "success",
            ),
            Err(err) => self.audit(
                user_id,
                "order_cancel",
                serde_json::json!({ "order_id": id, "error": err.to_string() }),
                "rejected",
            ),
        }
        result
    }

    fn cancel_order_inner(
        &self,
        id: OrderId,
        user_id: &str,
    ) -> Result<CancelReceipt, EngineError> {
        let (offset, order) = {
            let _state = self.state.lock().expect("lock");
            self.orders
                .load_by_id(id)?
                .ok_or(EngineError::OrderNotFound(id))?
        };
        if order.user_id != user_id {
            return Err(EngineError::NotOrderOwner {
                id,
                user: user_id.to_string(),
            });
        }
        if order.status.is_terminal() {
            return Err(EngineError::OrderClosed {
                id,
                status: order.status,
            });
        }

        let book = self.book(&order.symbol)?;
        let outcome = match book.cancel(id, offset)? {
            Some(outcome) => outcome,
            None => {
                // A fill won the race between our snapshot and the book
                // lock; report the order's current terminal status.
                let now = self.orders.load(offset)?;
                return Err(EngineError::OrderClosed {
                    id,
                    status: now.status,
                });
            }
        };

        {
            let mut registry = self.registry.lock().expect("lock");
            let mut user = self
                .load_user_locked(&mut registry, user_id)?
                .ok_or_else(|| EngineError::UnknownUser(user_id.to_string()))?;
            if outcome.remaining > 0 {
                match outcome.side {
                    Side::Buy => {
                        user.credit_cash(outcome.price * Decimal::from(outcome.remaining))
                    }
                    Side::Sell => user.add_shares(&order.symbol, outcome.remaining),
                }
            }
            user.release_order(id);
            self.users.update(&user)?;
            registry.cache.put(user_id.to_string(), user);
        }
        self.order_cache.lock().expect("lock").remove(&id.0);
        info!(
            "order {id} cancelled, refunded {} units of {}",
            outcome.remaining, order.symbol
        );
        Ok(CancelReceipt {
            order_id: id,
            symbol: order.symbol,
            side: outcome.side,
            price: outcome.price,
            refunded_qty: outcome.remaining,
        })
    }

    // --- queries ---------------------------------------------------------

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>, EngineError> {
        let mut registry = self.registry.lock().expect("lock");
        Ok(self.load_user_locked(&mut registry, user_id)?)
    }

    /// A user's holdings by symbol (zero-quantity slots included).
    pub fn get_holdings(
        &self,
        user_id: &str,
    ) -> Result<Option<std::collections::BTreeMap<String, u32>>, EngineError> {
        Ok(self.get_user(user_id)?.map(|u| u.holdings().clone()))
    }

    pub fn get_order(&self, id: OrderId) -> Result<Option<Order>, EngineError> {
        if let Some(order) = self.order_cache.lock().expect("lock").get(&id.0) {
            return Ok(Some(order));
        }
        match self.orders.load_by_id(id)? {
            Some((_, order)) => {
                self.cache_order(&order);
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    /// Shared handle to a symbol's book (depth and best-of-book queries).
    pub fn book(&self, symbol: &str) -> Result<Arc<OrderBook>, EngineError> {
        let state = self.state.lock().expect("lock");
        state
            .books
            .get(symbol)
            .cloned()
            .ok_or_else(|| EngineError::UnknownSymbol(symbol.to_string()))
    }

    pub fn get_order_book(&self, symbol: &str) -> Result<BookDepth, EngineError> {
        Ok(self.book(symbol)?.depth()?)
    }

    pub fn get_all_trades(&self) -> Result<Vec<Trade>, EngineError> {
        Ok(self.trades.load_all()?)
    }

    pub fn get_user_trades(&self, user_id: &str) -> Result<Vec<Trade>, EngineError> {
        Ok(self.trades.load_for_user(user_id)?)
    }

    /// The user's open orders, loaded from disk in id order.
    pub fn get_user_active_orders(&self, user_id: &str) -> Result<Vec<Order>, EngineError> {
        let user = self
            .get_user(user_id)?
            .ok_or_else(|| EngineError::UnknownUser(user_id.to_string()))?;
        let mut out = Vec::with_capacity(user.active_order_ids().len());
        for &id in user.active_order_ids() {
            if let Some((_, order)) = self.orders.load_by_id(id)? {
                out.push(order);
            }
        }
        Ok(out)
    }

    /// Every order the user ever placed (order history).
    pub fn get_user_orders(&self, user_id: &str) -> Result<Vec<Order>, EngineError> {
        Ok(self.orders.load_for_user(user_id)?)
    }

    // --- persistence cadence ---------------------------------------------

    /// Persist metadata and flush index sidecars. Safe to call more than
    /// once; also invoked on drop.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        let (next_order_id, next_trade_id) = {
            let state = self.state.lock().expect("lock");
            (state.next_order_id, state.next_trade_id)
        };
        self.save_metadata(next_order_id, next_trade_id)?;
        self.orders.save_index()?;
        self.users.save_index()?;
        self.trades.save_index()?;
        debug!(
            "cache hit rates: orders {:.1}%, users {:.1}%",
            self.order_cache.lock().expect("lock").hit_rate() * 100.0,
            self.registry.lock().expect("lock").cache.hit_rate() * 100.0
        );
        info!("engine shut down cleanly");
        Ok(())
    }

    fn maybe_save_metadata(&self) {
        let due = {
            let mut state = self.state.lock().expect("lock");
            if state.orders_since_save >= self.config.metadata_save_interval {
                state.orders_since_save = 0;
                Some((state.next_order_id, state.next_trade_id))
            } else {
                None
            }
        };
        if let Some((next_order_id, next_trade_id)) = due {
            if let Err(err) = self.save_metadata(next_order_id, next_trade_id) {
                warn!("periodic metadata save failed: {err}");
            }
        }
    }

    fn save_metadata(&self, next_order_id: u64, next_trade_id: u64) -> Result<(), StorageError> {
        self.metadata.save(&Metadata {
            next_order_id,
            next_trade_id,
            total_users: self.users.count() as u64,
            total_orders: self.orders.count() as u64,
            total_trades: self.trades.count() as u64,
            last_save_time: unix_timestamp(),
        })
    }

    // --- internals -------------------------------------------------------

    fn load_user_locked(
        &self,
        registry: &mut UserRegistry,
        user_id: &str,
    ) -> Result<Option<User>, StorageError> {
        if let Some(user) = registry.cache.get(&user_id.to_string()) {
            return Ok(Some(user));
        }
        match self.users.load_user(user_id)? {
            Some(user) => {
                registry.cache.put(user_id.to_string(), user.clone());
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    fn release_active(&self, user_id: &str, id: OrderId) -> Result<(), EngineError> {
        let mut registry = self.registry.lock().expect("lock");
        let mut user = self
            .load_user_locked(&mut registry, user_id)?
            .ok_or_else(|| EngineError::UnknownUser(user_id.to_string()))?;
        user.release_order(id);
        self.users.update(&user)?;
        registry.cache.put(user_id.to_string(), user);
        Ok(())
    }

    fn cache_order(&self, order: &Order) {
        self.order_cache
            .lock()
            .expect("lock")
            .put(order.id.0, order.clone());
    }

    fn audit(&self, actor: &str, action: &str, resource: serde_json::Value, outcome: &str) {
        self.audit_sink
            .emit(&AuditEvent::now(actor, action, Some(resource), outcome));
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("shutdown on drop failed: {err}");
        }
    }
}

fn validate_user_id(user_id: &str) -> Result<(), EngineError> {
    let reason = if user_id.is_empty() {
        "must not be empty"
    } else if user_id.len() > MAX_USER_ID_LEN {
        "longer than 31 bytes"
    } else if user_id.bytes().any(|b| b == 0) {
        "must not contain NUL"
    } else {
        return Ok(());
    };
    Err(EngineError::InvalidIdentifier {
        value: user_id.to_string(),
        reason,
    })
}

fn validate_symbol(symbol: &str) -> Result<(), EngineError> {
    let reason = if symbol.is_empty() {
        "must not be empty"
    } else if symbol.len() > MAX_SYMBOL_LEN {
        "longer than 7 bytes"
    } else if symbol.bytes().any(|b| b == 0) {
        "must not contain NUL"
    } else {
        return Ok(());
    };
    Err(EngineError::InvalidIdentifier {
        value: symbol.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn engine_in(dir: &tempfile::TempDir) -> Engine {
        Engine::open(EngineConfig {
            data_dir: dir.path().join("data"),
            ..EngineConfig::default()
        })
        .expect("open engine")
    }

    #[test]
    fn create_user_rejects_duplicates_and_bad_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_in(&dir);
        engine.create_user("alice", dec!(1000.00)).expect("create");
        assert!(matches!(
            engine.create_user("alice", dec!(5.00)),
            Err(EngineError::DuplicateUser(_))
        ));
        assert!(matches!(
            engine.create_user("", dec!(5.00)),
            Err(EngineError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            engine.create_user("this-user-id-is-far-too-long-to-fit", dec!(5.00)),
            Err(EngineError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            engine.create_user("bob", dec!(-1.00)),
            Err(EngineError::InvalidCash)
        ));
    }

    #[test]
    fn add_symbol_requires_admin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_in(&dir);
        assert!(matches!(
            engine.add_symbol("AAPL", "mallory"),
            Err(EngineError::Unauthorized(_))
        ));
        engine.add_symbol("AAPL", "admin123").expect("add");
        assert!(engine.symbol_exists("AAPL").expect("exists"));
        assert!(matches!(
            engine.add_symbol("AAPL", "admin123"),
            Err(EngineError::DuplicateSymbol(_))
        ));
        assert!(matches!(
            engine.add_symbol("WAYTOOLONG", "admin123"),
            Err(EngineError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn place_order_validates_inputs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_in(&dir);
        engine.add_symbol("AAPL", "admin123").expect("add");
        engine.create_user("alice", dec!(1000.00)).expect("create");

        assert!(matches!(
            engine.place_order("alice", "MSFT", Side::Buy, dec!(10.00), 1),
            Err(EngineError::UnknownSymbol(_))
        ));
        assert!(matches!(
            engine.place_order("ghost", "AAPL", Side::Buy, dec!(10.00), 1),
            Err(EngineError::UnknownUser(_))
        ));
        assert!(matches!(
            engine.place_order("alice", "AAPL", Side::Buy, dec!(10.00), 0),
            Err(EngineError::InvalidQuantity)
        ));
        assert!(matches!(
            engine.place_order("alice", "AAPL", Side::Buy, dec!(0.00), 1),
            Err(EngineError::InvalidPrice)
        ));
        assert!(matches!(
            engine.place_order("alice", "AAPL", Side::Buy, dec!(10.001), 1),
            Err(EngineError::InvalidPrice)
        ));
        assert!(matches!(
            engine.place_order("alice", "AAPL", Side::Sell, dec!(10.00), 1),
            Err(EngineError::InsufficientShares { .. })
        ));
    }

    #[test]
    fn reservation_debits_and_cancel_refunds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_in(&dir);
        engine.add_symbol("AAPL", "admin123").expect("add");
        engine.create_user("alice", dec!(1000.00)).expect("create");

        let receipt = engine
            .place_order("alice", "AAPL", Side::Buy, dec!(10.00), 30)
            .expect("place");
        assert!(receipt.trades.is_empty());
        let alice = engine.get_user("alice").expect("get").expect("present");
        assert_eq!(alice.cash(), dec!(700.00));
        assert_eq!(
            alice.active_order_ids().iter().copied().collect::<Vec<_>>(),
            vec![receipt.order.id]
        );

        let cancel = engine
            .cancel_order(receipt.order.id, "alice")
            .expect("cancel");
        assert_eq!(cancel.refunded_qty, 30);
        let alice = engine.get_user("alice").expect("get").expect("present");
        assert_eq!(alice.cash(), dec!(1000.00));
        assert!(alice.active_order_ids().is_empty());

        // Terminal orders cannot be cancelled twice.
        assert!(matches!(
            engine.cancel_order(receipt.order.id, "alice"),
            Err(EngineError::OrderClosed { .. })
        ));
    }

    #[test]
    fn cancel_enforces_ownership() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_in(&dir);
        engine.add_symbol("AAPL", "admin123").expect("add");
        engine.create_user("alice", dec!(1000.00)).expect("create");
        engine.create_user("bob", dec!(1000.00)).expect("create");
        let receipt = engine
            .place_order("alice", "AAPL", Side::Buy, dec!(10.00), 1)
            .expect("place");
        assert!(matches!(
            engine.cancel_order(receipt.order.id, "bob"),
            Err(EngineError::NotOrderOwner { .. })
        ));
        assert!(matches!(
            engine.cancel_order(OrderId(999), "bob"),
            Err(EngineError::OrderNotFound(_))
        ));
    }

    #[test]
    fn matched_trade_moves_cash_and_shares() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_in(&dir);
        engine.add_symbol("AAPL", "admin123").expect("add");
        engine.create_user("alice", dec!(10000.00)).expect("create");
        engine.create_user("bob", dec!(10000.00)).expect("create");
        engine.grant_shares("bob", "AAPL", 100).expect("grant");

        engine
            .place_order("bob", "AAPL", Side::Sell, dec!(150.00), 50)
            .expect("sell");
        let receipt = engine
            .place_order("alice", "AAPL", Side::Buy, dec!(150.00), 50)
            .expect("buy");
        assert_eq!(receipt.trades.len(), 1);
        let trade = &receipt.trades[0];
        assert_eq!(trade.price, dec!(150.00));
        assert_eq!(trade.quantity, 50);
        assert_eq!(trade.buy_user_id, "alice");
        assert_eq!(trade.sell_user_id, "bob");

        let alice = engine.get_user("alice").expect("get").expect("present");
        assert_eq!(alice.cash(), dec!(2500.00));
        assert_eq!(alice.shares_of("AAPL"), 50);
        assert!(alice.active_order_ids().is_empty());

        let bob = engine.get_user("bob").expect("get").expect("present");
        assert_eq!(bob.cash(), dec!(17500.00));
        assert_eq!(bob.shares_of("AAPL"), 50);
        assert!(bob.active_order_ids().is_empty());

        assert_eq!(engine.get_all_trades().expect("trades").len(), 1);
        assert_eq!(engine.get_user_trades("alice").expect("trades").len(), 1);
        assert!(engine.get_user_trades("carol").expect("trades").is_empty());
    }

    #[test]
    fn active_order_capacity_is_enforced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_in(&dir);
        engine.add_symbol("AAPL", "admin123").expect("add");
        engine.create_user("alice", dec!(100000.00)).expect("create");
        for _ in 0..MAX_ACTIVE_ORDERS {
            engine
                .place_order("alice", "AAPL", Side::Buy, dec!(1.00), 1)
                .expect("place");
        }
        assert!(matches!(
            engine.place_order("alice", "AAPL", Side::Buy, dec!(1.00), 1),
            Err(EngineError::CapacityExceeded { .. })
        ));
    }
}
