//! Core types for the stream ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for balances and rates, integral values only)
//! - Fixed-width addresses so composite keys stay prefix-scannable

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Fixed-point precision of oracle prices (price / precision = USD per token)
pub const PRICE_PRECISION: u64 = 100_000_000;

/// 20-byte account address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address([u8; Address::LEN]);

impl Address {
    /// Address length in bytes
    pub const LEN: usize = 20;

    /// Create from raw bytes
    pub const fn new(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, if it has exactly [`Address::LEN`] bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; Self::LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Deterministic module account: first 20 bytes of `sha256(module || salt)`
    pub fn module_address(module: &str, salt: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(module.as_bytes());
        hasher.update(salt);
        let digest = hasher.finalize();

        let mut bytes = [0u8; Self::LEN];
        bytes.copy_from_slice(&digest[..Self::LEN]);
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0u8; Self::LEN];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

/// Stream account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum StreamAccountStatus {
    /// Streams are running
    #[default]
    Normal = 0,
    /// Force-settled; outgoing flows are frozen
    Frozen = 1,
}

/// Per-account stream state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    /// Account address
    pub account: Address,

    /// Block time of the last update (seconds)
    pub crud_timestamp: i64,

    /// Spendable balance as of `crud_timestamp` (may go negative)
    pub static_balance: Decimal,

    /// Reserve covering `ReserveTime` seconds of negative netflow
    pub buffer_balance: Decimal,

    /// Earmarked, unspendable balance
    pub lock_balance: Decimal,

    /// Inbound minus outbound rate, per second (zero while frozen)
    pub netflow_rate: Decimal,

    /// Inbound rate received while frozen; restored to `netflow_rate` on resume
    pub frozen_inflow_rate: Decimal,

    /// Account status
    pub status: StreamAccountStatus,

    /// When the account is due for settlement (0 = not scheduled)
    pub settle_timestamp: i64,

    /// USD-denominated outgoing flows, sorted by provider address
    pub out_flows_in_usd: Vec<OutFlowInUsd>,

    /// Block time at which `out_flows_in_usd` was last converted to native rates
    pub usd_priced_at: i64,

    /// Oracle price used for that conversion (0 = never converted)
    pub usd_price: u64,
}

impl StreamRecord {
    /// Zero-initialized record created at `now`
    pub fn new(account: Address, now: i64) -> Self {
        Self {
            account,
            crud_timestamp: now,
            static_balance: Decimal::ZERO,
            buffer_balance: Decimal::ZERO,
            lock_balance: Decimal::ZERO,
            netflow_rate: Decimal::ZERO,
            frozen_inflow_rate: Decimal::ZERO,
            status: StreamAccountStatus::Normal,
            settle_timestamp: 0,
            out_flows_in_usd: Vec::new(),
            usd_priced_at: now,
            usd_price: 0,
        }
    }

    /// Static + buffer + lock
    pub fn total_balance(&self) -> Decimal {
        self.static_balance + self.buffer_balance + self.lock_balance
    }

    /// Whether the account has been force-settled
    pub fn is_frozen(&self) -> bool {
        self.status == StreamAccountStatus::Frozen
    }
}

/// Delta addressed to one stream record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecordChange {
    /// Target account
    pub addr: Address,
    /// Netflow rate delta
    pub rate_change: Decimal,
    /// Static balance delta
    pub static_balance_change: Decimal,
    /// Lock balance delta (moved out of static balance)
    pub lock_balance_change: Decimal,
}

impl StreamRecordChange {
    /// All-zero change for `addr`
    pub fn new(addr: Address) -> Self {
        Self {
            addr,
            rate_change: Decimal::ZERO,
            static_balance_change: Decimal::ZERO,
            lock_balance_change: Decimal::ZERO,
        }
    }

    /// Set the rate delta
    pub fn with_rate_change(mut self, rate_change: Decimal) -> Self {
        self.rate_change = rate_change;
        self
    }

    /// Set the static balance delta
    pub fn with_static_balance_change(mut self, static_balance_change: Decimal) -> Self {
        self.static_balance_change = static_balance_change;
        self
    }

    /// Set the lock balance delta
    pub fn with_lock_balance_change(mut self, lock_balance_change: Decimal) -> Self {
        self.lock_balance_change = lock_balance_change;
        self
    }

    /// Sum another change for the same account into this one
    pub fn merge(&mut self, other: &StreamRecordChange) {
        debug_assert_eq!(self.addr, other.addr);
        self.rate_change += other.rate_change;
        self.static_balance_change += other.static_balance_change;
        self.lock_balance_change += other.lock_balance_change;
    }

    /// Whether every delta is zero
    pub fn is_zero(&self) -> bool {
        self.rate_change.is_zero()
            && self.static_balance_change.is_zero()
            && self.lock_balance_change.is_zero()
    }
}

/// Payment edge between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    /// Payer
    pub from: Address,
    /// Payee
    pub to: Address,
    /// Rate per second (never negative once stored)
    pub rate: Decimal,
    /// Set when the payer has been force-settled
    pub frozen: bool,
}

impl Flow {
    /// Unfrozen flow delta
    pub fn new(from: Address, to: Address, rate: Decimal) -> Self {
        Self {
            from,
            to,
            rate,
            frozen: false,
        }
    }
}

/// Status part of an out-flow key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OutFlowStatus {
    /// Payment is running
    Active = 0,
    /// Payer has been force-settled
    Frozen = 1,
}

impl OutFlowStatus {
    /// Key byte
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse key byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(OutFlowStatus::Active),
            1 => Some(OutFlowStatus::Frozen),
            _ => None,
        }
    }
}

/// Payer-scoped view of a flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutFlow {
    /// Counterparty
    pub to_address: Address,
    /// Rate per second (a signed delta when passed as a change)
    pub rate: Decimal,
    /// Status
    pub status: OutFlowStatus,
}

impl OutFlow {
    /// Active out-flow (or active delta) to `to_address`
    pub fn active(to_address: Address, rate: Decimal) -> Self {
        Self {
            to_address,
            rate,
            status: OutFlowStatus::Active,
        }
    }
}

/// USD-priced outgoing flow to a storage provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutFlowInUsd {
    /// Storage provider
    pub sp_address: Address,
    /// USD rate per second, scaled like native rates
    pub rate: Decimal,
}

impl OutFlowInUsd {
    /// Create a USD flow (or delta)
    pub fn new(sp_address: Address, rate: Decimal) -> Self {
        Self { sp_address, rate }
    }
}

/// Entry of the time-ordered auto-settle index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AutoSettleRecord {
    /// Scheduled settlement time
    pub timestamp: i64,
    /// Account to re-check
    pub addr: Address,
}

/// Oracle price submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Submission time (seconds)
    pub time: i64,
    /// USD per token, scaled by [`PRICE_PRECISION`]
    pub price: u64,
}

impl PricePoint {
    /// Fixed-point ratio of this point
    pub fn ratio(&self) -> Price {
        Price {
            num: Decimal::from(self.price),
            precision: Decimal::from(PRICE_PRECISION),
        }
    }
}

/// Fixed-point price ratio `num / precision`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Price {
    /// Numerator
    pub num: Decimal,
    /// Denominator
    pub precision: Decimal,
}

impl Price {
    /// Convert a USD rate into a native-token rate, truncated toward zero
    ///
    /// Returns `None` on overflow or a zero price.
    pub fn usd_to_native(&self, usd: Decimal) -> Option<Decimal> {
        usd.checked_mul(self.precision)?
            .checked_div(self.num)
            .map(|rate| rate.trunc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_roundtrip_display() {
        let addr = Address::new([0xab; 20]);
        let text = addr.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn test_module_address_is_deterministic() {
        let a = Address::module_address("payment", b"governance");
        let b = Address::module_address("payment", b"governance");
        let c = Address::module_address("payment", b"other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_change_merge() {
        let addr = Address::new([1; 20]);
        let mut change = StreamRecordChange::new(addr).with_rate_change(Decimal::from(10));
        change.merge(&StreamRecordChange::new(addr).with_static_balance_change(Decimal::from(5)));
        change.merge(&StreamRecordChange::new(addr).with_rate_change(Decimal::from(-10)));

        assert!(change.rate_change.is_zero());
        assert_eq!(change.static_balance_change, Decimal::from(5));
        assert!(!change.is_zero());
    }

    #[test]
    fn test_usd_to_native_truncates() {
        // 300 USD per token
        let price = PricePoint { time: 0, price: 300 * PRICE_PRECISION }.ratio();
        assert_eq!(price.usd_to_native(Decimal::from(1000)), Some(Decimal::from(3)));
        assert_eq!(price.usd_to_native(Decimal::from(-1000)), Some(Decimal::from(-3)));

        let zero = PricePoint { time: 0, price: 0 }.ratio();
        assert_eq!(zero.usd_to_native(Decimal::ONE), None);
    }
}
