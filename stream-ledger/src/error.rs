//! Error types for the stream ledger

use crate::types::Address;
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Stored key does not have the expected layout
    #[error("Malformed key in {region}: {reason}")]
    MalformedKey {
        /// Region the key was read from
        region: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// A flow merge would leave a negative rate
    #[error("Flow rate from {from} to {to} cannot become negative: {rate}")]
    NegativeFlowRate {
        /// Payer
        from: Address,
        /// Counterparty
        to: Address,
        /// Resulting rate
        rate: Decimal,
    },

    /// A flow from an account to itself
    #[error("Flow from {0} to itself is not allowed")]
    SelfFlow(Address),

    /// A price point already exists for this time
    #[error("Price already submitted for time {0}")]
    DuplicatePrice(i64),

    /// Price points must be appended in time order
    #[error("Price at time {time} is not after the latest point at {latest}")]
    StalePrice {
        /// Submission time
        time: i64,
        /// Time of the latest existing point
        latest: i64,
    },

    /// Price must be positive
    #[error("Invalid price {price} at time {time}")]
    InvalidPrice {
        /// Submission time
        time: i64,
        /// Submitted price
        price: u64,
    },

    /// Invariant violation
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
