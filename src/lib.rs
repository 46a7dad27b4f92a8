//! # Bourse
//!
//! Persistent multi-symbol limit-order matching engine for a simulated
//! equities venue: price-time priority matching, cash/share reservation,
//! and disk-first storage that reconstructs exact state across restarts.
//!
//! ## Entry point
//!
//! Use [`Engine`] as the single entry point: open it over a data directory
//! with [`Engine::open`], then [`Engine::create_user`],
//! [`Engine::add_symbol`], [`Engine::place_order`], and
//! [`Engine::cancel_order`]. Every state change is durable before the call
//! returns; reopening the same directory recovers users, orders, trades,
//! and books.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bourse::{Engine, EngineConfig, Side};
//! use rust_decimal::Decimal;
//!
//! # fn main() -> Result<(), bourse::EngineError> {
//! let engine = Engine::open(EngineConfig::default())?;
//! engine.add_symbol("AAPL", "admin123")?;
//! engine.create_user("alice", Decimal::from(10_000))?;
//! engine.create_user("bob", Decimal::from(10_000))?;
//! engine.grant_shares("bob", "AAPL", 100)?;
//!
//! engine.place_order("bob", "AAPL", Side::Sell, Decimal::from(150), 50)?;
//! let receipt = engine.place_order("alice", "AAPL", Side::Buy, Decimal::from(150), 30)?;
//! assert_eq!(receipt.trades.len(), 1);
//! engine.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//!
//! - [`storage`]: paged record files, fixed-width layouts, index sidecars
//!   with rebuild-on-corruption, and the metadata record.
//! - [`OrderBook`]: per-symbol bid/ask sides holding disk-offset
//!   references; matching loads counterparties from the order store.
//! - [`Engine`]: order admission, reservation, settlement, cancellation,
//!   recovery, and the four-lock concurrency model.

pub mod audit;
mod book_side;
mod cache;
pub mod engine;
mod error;
mod matching;
mod order_book;
pub mod simulation;
pub mod storage;
mod types;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, NullAuditSink, StdoutAuditSink};
pub use engine::{
    CancelReceipt, Engine, EngineConfig, OrderReceipt, MAX_SYMBOL_LEN, MAX_USER_ID_LEN,
};
pub use error::{EngineError, StorageError};
pub use order_book::{BookDepth, DepthLevel, OrderBook, RestingView};
pub use simulation::{replay, seed_accounts, Flow, FlowConfig, OrderRequest, ReplayStats};
pub use storage::{DiskOffset, Metadata, MAX_ACTIVE_ORDERS, MAX_HOLDINGS};
pub use types::{
    unix_timestamp, Order, OrderId, OrderStatus, Side, Trade, TradeId, User,
};
