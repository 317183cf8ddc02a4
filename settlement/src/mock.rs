//! In-memory collaborators for tests and local runs

use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use stream_ledger::{Address, OutFlowInUsd};

use crate::bank::{AccountKeeper, BankError, BankKeeper, Transfer};
use crate::pricing::{PriceQuoter, StorePrice};
use crate::types::Coin;
use crate::Result;

/// Bank holding balances in ordered maps
#[derive(Debug, Clone, Default)]
pub struct MockBank {
    accounts: BTreeMap<(Address, String), Decimal>,
    modules: BTreeMap<(String, String), Decimal>,
    blocked: BTreeSet<Address>,
}

impl MockBank {
    /// Empty bank
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit an account out of thin air
    pub fn mint(&mut self, addr: &Address, denom: &str, amount: Decimal) {
        *self.accounts.entry((*addr, denom.to_string())).or_default() += amount;
    }

    /// Refuse every transfer crediting `addr`
    pub fn reject_credits_to(&mut self, addr: Address) {
        self.blocked.insert(addr);
    }

    fn check_blocked(&self, addr: &Address) -> std::result::Result<(), BankError> {
        if self.blocked.contains(addr) {
            return Err(BankError::Rejected(format!("{} does not accept credits", addr)));
        }
        Ok(())
    }

    /// Sum of every account and module balance in `denom`
    pub fn total_supply(&self, denom: &str) -> Decimal {
        let accounts: Decimal = self
            .accounts
            .iter()
            .filter(|((_, d), _)| d == denom)
            .map(|(_, amount)| *amount)
            .sum();
        let modules: Decimal = self
            .modules
            .iter()
            .filter(|((_, d), _)| d == denom)
            .map(|(_, amount)| *amount)
            .sum();
        accounts + modules
    }

    fn debit(
        balance: &mut Decimal,
        holder: String,
        amount: Decimal,
    ) -> std::result::Result<(), BankError> {
        if amount <= Decimal::ZERO {
            return Err(BankError::InvalidAmount(amount));
        }
        if *balance < amount {
            return Err(BankError::InsufficientFunds {
                holder,
                requested: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        Ok(())
    }
}

impl BankKeeper for MockBank {
    fn balance(&self, addr: &Address, denom: &str) -> Decimal {
        self.accounts
            .get(&(*addr, denom.to_string()))
            .copied()
            .unwrap_or_default()
    }

    fn module_balance(&self, module: &str, denom: &str) -> Decimal {
        self.modules
            .get(&(module.to_string(), denom.to_string()))
            .copied()
            .unwrap_or_default()
    }

    fn send_coins_from_account_to_module(
        &mut self,
        from: &Address,
        module: &str,
        coin: &Coin,
    ) -> std::result::Result<(), BankError> {
        let balance = self.accounts.entry((*from, coin.denom.clone())).or_default();
        Self::debit(balance, from.to_string(), coin.amount)?;
        *self
            .modules
            .entry((module.to_string(), coin.denom.clone()))
            .or_default() += coin.amount;
        Ok(())
    }

    fn send_coins_from_module_to_account(
        &mut self,
        module: &str,
        to: &Address,
        coin: &Coin,
    ) -> std::result::Result<(), BankError> {
        self.check_blocked(to)?;
        let balance = self
            .modules
            .entry((module.to_string(), coin.denom.clone()))
            .or_default();
        Self::debit(balance, module.to_string(), coin.amount)?;
        *self.accounts.entry((*to, coin.denom.clone())).or_default() += coin.amount;
        Ok(())
    }

    fn apply_transfers(&mut self, transfers: &[Transfer]) -> std::result::Result<(), BankError> {
        let snapshot = (self.accounts.clone(), self.modules.clone());
        for transfer in transfers {
            let applied = match transfer {
                Transfer::ToModule { from, module, coin } => {
                    self.send_coins_from_account_to_module(from, module, coin)
                }
                Transfer::FromModule { module, to, coin } => {
                    self.send_coins_from_module_to_account(module, to, coin)
                }
            };
            if let Err(err) = applied {
                (self.accounts, self.modules) = snapshot;
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Account registry backed by a set
#[derive(Debug, Clone, Default)]
pub struct MockAccounts {
    accounts: BTreeSet<Address>,
}

impl MockAccounts {
    /// Registry containing `accounts`
    pub fn with(accounts: impl IntoIterator<Item = Address>) -> Self {
        Self {
            accounts: accounts.into_iter().collect(),
        }
    }

    /// Register an account
    pub fn insert(&mut self, addr: Address) {
        self.accounts.insert(addr);
    }
}

impl AccountKeeper for MockAccounts {
    fn has_account(&self, addr: &Address) -> bool {
        self.accounts.contains(addr)
    }
}

/// Bucket as seen by [`MockPriceQuoter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockBucket {
    /// Primary storage provider
    pub primary_sp: Address,
    /// Secondary storage providers
    pub secondary_sps: Vec<Address>,
}

/// Object as seen by [`MockPriceQuoter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockObject {
    /// Payload size in bytes
    pub size: u64,
}

/// Linear price schedule
#[derive(Debug, Clone)]
pub struct MockPriceQuoter {
    /// USD rate per unit of read quota
    pub read_price_per_quota: Decimal,
    /// USD rate per stored byte, paid to each secondary provider
    pub store_price_per_byte: Decimal,
    /// USD rate per stored byte, paid to the primary provider
    pub primary_price_per_byte: Decimal,
}

impl Default for MockPriceQuoter {
    fn default() -> Self {
        Self {
            read_price_per_quota: Decimal::from(10),
            store_price_per_byte: Decimal::from(2),
            primary_price_per_byte: Decimal::from(3),
        }
    }
}

impl PriceQuoter for MockPriceQuoter {
    type Bucket = MockBucket;
    type Object = MockObject;

    fn read_price(&self, _sp: &Address, quota: u64, _time: i64) -> Result<Decimal> {
        Ok(self.read_price_per_quota * Decimal::from(quota))
    }

    fn store_price(&self, bucket: &MockBucket, object: &MockObject) -> Result<StorePrice> {
        let size = Decimal::from(object.size);
        let mut flows = vec![OutFlowInUsd::new(
            bucket.primary_sp,
            self.primary_price_per_byte * size,
        )];
        flows.extend(
            bucket
                .secondary_sps
                .iter()
                .map(|sp| OutFlowInUsd::new(*sp, self.store_price_per_byte * size)),
        );
        let rate = flows.iter().map(|flow| flow.rate).sum();
        Ok(StorePrice { rate, flows })
    }
}
