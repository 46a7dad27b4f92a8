//! Disk-first storage: the paged file store, fixed-width record layouts,
//! and the typed stores for orders, users, trades, symbols, and metadata.
//!
//! Disk is the source of truth. Index sidecars are caches: any anomaly on
//! open discards them and rebuilds by scanning the data files.

mod file_store;
mod metadata_store;
mod order_store;
mod page_cache;
pub mod records;
mod sidecar;
mod symbol_store;
mod trade_store;
mod user_store;

pub use file_store::{DiskOffset, RecordFile};
pub use metadata_store::MetadataStore;
pub use order_store::OrderStore;
pub use records::{Metadata, MAX_ACTIVE_ORDERS, MAX_HOLDINGS};
pub use symbol_store::SymbolStore;
pub use trade_store::TradeStore;
pub use user_store::UserStore;
