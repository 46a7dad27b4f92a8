//! Error taxonomy: storage-layer failures and engine-level rejections.
//!
//! [`StorageError`] covers the disk layer (I/O, truncated records, layout
//! violations, corrupt indexes). [`EngineError`] covers validation, resource,
//! and state rejections reported to callers, and wraps storage failures.

use crate::types::{OrderId, OrderStatus};
use rust_decimal::Decimal;
use thiserror::Error;

/// Failures raised by the disk layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying file I/O failed.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// A read past the end of the data file.
    #[error("truncated record at offset {offset}: wanted {wanted} bytes, file holds {len}")]
    TruncatedRecord {
        /// Raw byte offset of the attempted read.
        offset: u64,
        /// Bytes requested.
        wanted: usize,
        /// Current file length.
        len: u64,
    },

    /// An overwrite outside the existing file extent.
    #[error("offset {offset} is beyond file length {len}")]
    OffsetOutOfBounds {
        /// Raw byte offset of the attempted write.
        offset: u64,
        /// Current file length.
        len: u64,
    },

    /// A value does not fit its fixed-width record field.
    #[error("value {value:?} does not fit record field {field}")]
    FieldTooLong {
        /// Record field name.
        field: &'static str,
        /// The offending value.
        value: String,
    },

    /// A record field held a value outside its domain.
    #[error("record field {field} holds an invalid value")]
    InvalidField {
        /// Record field name.
        field: &'static str,
    },
}

/// Rejections and failures reported by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The symbol has not been listed.
    #[error("unknown symbol {0}")]
    UnknownSymbol(String),

    /// No account with this user id.
    #[error("unknown user {0}")]
    UnknownUser(String),

    /// An account with this user id already exists.
    #[error("user {0} already exists")]
    DuplicateUser(String),

    /// The symbol is already listed.
    #[error("symbol {0} is already listed")]
    DuplicateSymbol(String),

    /// Only the administrator may list symbols.
    #[error("user {0} is not authorized to list symbols")]
    Unauthorized(String),

    /// An identifier violates the on-disk length rules.
    #[error("invalid identifier {value:?}: {reason}")]
    InvalidIdentifier {
        /// The offending identifier.
        value: String,
        /// What rule it breaks.
        reason: &'static str,
    },

    /// Quantity must be a positive whole number of shares.
    #[error("quantity must be positive")]
    InvalidQuantity,

    /// Price must be positive with at most two decimal places.
    #[error("price must be positive with at most two decimal places")]
    InvalidPrice,

    /// Cash amounts must be non-negative with at most two decimal places.
    #[error("cash amount must be non-negative with at most two decimal places")]
    InvalidCash,

    /// The buyer cannot cover the reservation.
    #[error("insufficient funds: need {required}, have {available}")]
    InsufficientFunds {
        /// Cash required for the reservation.
        required: Decimal,
        /// Cash currently available.
        available: Decimal,
    },

    /// The seller does not hold enough shares.
    #[error("insufficient shares of {symbol}: need {required}, have {available}")]
    InsufficientShares {
        /// Symbol being sold.
        symbol: String,
        /// Shares required for the reservation.
        required: u32,
        /// Shares currently held.
        available: u32,
    },

    /// No order with this id.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// The order belongs to a different user.
    #[error("order {id} does not belong to {user}")]
    NotOrderOwner {
        /// The order in question.
        id: OrderId,
        /// The requesting user.
        user: String,
    },

    /// The order has already reached a terminal status.
    #[error("order {id} is already {status}")]
    OrderClosed {
        /// The order in question.
        id: OrderId,
        /// Its terminal status.
        status: OrderStatus,
    },

    /// A user record slot array is full.
    #[error("user {user} has no room for more {what}")]
    CapacityExceeded {
        /// The affected account.
        user: String,
        /// Which slot array is full ("holdings" or "active orders").
        what: &'static str,
    },

    /// A storage-layer failure surfaced through an engine operation.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
