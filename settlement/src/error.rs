//! Error types for the settlement keeper

use rust_decimal::Decimal;
use stream_ledger::Address;
use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] stream_ledger::Error),

    /// Unlocking more than is locked
    #[error("Lock balance of {account} would become negative: {lock_balance}")]
    NegativeLockBalance {
        /// Account
        account: Address,
        /// Resulting lock balance
        lock_balance: Decimal,
    },

    /// The auto-settle index points at an account with no stream record
    #[error("Auto-settle entry for {0} has no stream record")]
    DanglingAutoSettleRecord(Address),

    /// Withdrawal larger than the settled static balance
    #[error("Insufficient balance for {account}: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Account
        account: Address,
        /// Requested amount
        requested: Decimal,
        /// Static balance after settling to now
        available: Decimal,
    },

    /// Operation not allowed on a force-settled account
    #[error("Stream account {0} is frozen")]
    StreamAccountFrozen(Address),

    /// Account has never been referenced
    #[error("Stream record not found for {0}")]
    StreamRecordNotFound(Address),

    /// Amount must be positive
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Bank transfer rejected
    #[error("Bank error: {0}")]
    Bank(#[from] crate::bank::BankError),

    /// No oracle price at or before the given time
    #[error("No price found at or before {time}")]
    PriceNotFound {
        /// Lookup time
        time: i64,
    },

    /// Price point dated after the current block
    #[error("Price at time {time} is in the future (block time {now})")]
    FuturePrice {
        /// Submission time
        time: i64,
        /// Block time
        now: i64,
    },

    /// USD-denominated outflow total would become negative
    #[error("USD flow from {from} to {to} cannot become negative: {rate}")]
    NegativeUsdFlow {
        /// Payer
        from: Address,
        /// Storage provider
        to: Address,
        /// Resulting USD rate
        rate: Decimal,
    },

    /// Store commit failed after the bank batch landed and the reversal failed too
    #[error("Bank and ledger diverged: {0}")]
    BankLedgerDiverged(String),

    /// Arithmetic overflow
    #[error("Arithmetic overflow: {0}")]
    Overflow(&'static str),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors that indicate corrupted state rather than a rejected request
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::NegativeLockBalance { .. }
                | Error::DanglingAutoSettleRecord(_)
                | Error::BankLedgerDiverged(_)
                | Error::Ledger(stream_ledger::Error::InvariantViolation(_))
                | Error::Ledger(stream_ledger::Error::Storage(_))
                | Error::Ledger(stream_ledger::Error::Serialization(_))
                | Error::Ledger(stream_ledger::Error::MalformedKey { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let addr = Address::new([1; 20]);
        assert!(Error::DanglingAutoSettleRecord(addr).is_fatal());
        assert!(Error::NegativeLockBalance {
            account: addr,
            lock_balance: Decimal::NEGATIVE_ONE
        }
        .is_fatal());

        assert!(Error::BankLedgerDiverged("commit failed".to_string()).is_fatal());

        assert!(!Error::PriceNotFound { time: 5 }.is_fatal());
        assert!(!Error::InsufficientBalance {
            account: addr,
            requested: Decimal::TEN,
            available: Decimal::ONE,
        }
        .is_fatal());
        assert!(!Error::Ledger(stream_ledger::Error::NegativeFlowRate {
            from: addr,
            to: addr,
            rate: Decimal::NEGATIVE_ONE,
        })
        .is_fatal());
    }
}
