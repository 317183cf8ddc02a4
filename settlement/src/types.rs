//! Core types for the settlement keeper

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stream_ledger::Address;

/// Block being executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    /// Block height
    pub height: u64,

    /// Block time (unix seconds)
    pub time: i64,
}

impl BlockContext {
    /// Create a block context
    pub fn new(height: u64, time: i64) -> Self {
        Self { height, time }
    }

    /// Block time as a UTC timestamp
    pub fn block_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.time, 0).single()
    }
}

/// Amount of one denomination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Denomination
    pub denom: String,

    /// Amount (integral, non-negative)
    pub amount: Decimal,
}

impl Coin {
    /// Create a coin
    pub fn new(denom: impl Into<String>, amount: Decimal) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }
}

impl std::fmt::Display for Coin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// Event emitted by a committed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentEvent {
    /// Account was force-settled and its balance swept to governance
    ForceSettle {
        /// Settled account
        account: Address,
        /// Static + buffer balance swept
        settled_balance: Decimal,
        /// Block time of the settlement
        block_time: i64,
    },

    /// Tokens moved from a bank account into a stream account
    Deposit {
        /// Bank account debited
        from: Address,
        /// Stream account credited
        to: Address,
        /// Amount
        amount: Decimal,
    },

    /// Tokens moved from a stream account back to its bank account
    Withdraw {
        /// Account
        to: Address,
        /// Amount
        amount: Decimal,
    },

    /// Frozen account returned to normal
    Resume {
        /// Account
        account: Address,
        /// Outgoing rate re-applied
        restored_rate: Decimal,
    },
}

/// Outcome of one auto-settle sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Index entries re-checked
    pub processed: usize,

    /// Accounts force-settled during the sweep
    pub force_settled: usize,

    /// Whether due entries were left for the next block
    pub backlog: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_time() {
        let block = BlockContext::new(1, 86_400);
        let time = block.block_time().unwrap();
        assert_eq!(time.timestamp(), 86_400);
    }

    #[test]
    fn test_coin_display() {
        assert_eq!(Coin::new("BNB", Decimal::from(5)).to_string(), "5BNB");
    }
}
