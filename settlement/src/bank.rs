//! External collaborators: token bank and account registry
//!
//! Bank transfers made during a transaction are journaled and only reach the
//! [`BankKeeper`] once the transaction succeeds, as one
//! [`BankKeeper::apply_transfers`] batch. Each journaled transfer is checked
//! against the bank balance plus the journal's pending deltas, so the flush
//! at commit cannot fail on funds. A bank may still refuse the batch, in
//! which case none of it lands.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use stream_ledger::Address;
use thiserror::Error;

use crate::types::Coin;

/// Bank errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BankError {
    /// Sender balance too low
    #[error("Insufficient funds in {holder}: requested {requested}, available {available}")]
    InsufficientFunds {
        /// Debited account or module
        holder: String,
        /// Requested amount
        requested: Decimal,
        /// Spendable amount
        available: Decimal,
    },

    /// Transfer amount must be positive
    #[error("Invalid transfer amount {0}")]
    InvalidAmount(Decimal),

    /// Bank refused the transfer
    #[error("Transfer rejected: {0}")]
    Rejected(String),
}

/// Token bank
pub trait BankKeeper {
    /// Spendable balance of an account
    fn balance(&self, addr: &Address, denom: &str) -> Decimal;

    /// Balance held by a module account
    fn module_balance(&self, module: &str, denom: &str) -> Decimal;

    /// Move coins from an account into a module account
    fn send_coins_from_account_to_module(
        &mut self,
        from: &Address,
        module: &str,
        coin: &Coin,
    ) -> Result<(), BankError>;

    /// Move coins from a module account to an account
    fn send_coins_from_module_to_account(
        &mut self,
        module: &str,
        to: &Address,
        coin: &Coin,
    ) -> Result<(), BankError>;

    /// Apply `transfers` in order as one unit
    ///
    /// Either every transfer lands or the bank is left untouched.
    fn apply_transfers(&mut self, transfers: &[Transfer]) -> Result<(), BankError>;
}

/// Account registry
pub trait AccountKeeper {
    /// Whether `addr` exists as a bank account
    fn has_account(&self, addr: &Address) -> bool;
}

/// Direction of a journaled transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    /// Account to module
    ToModule {
        /// Debited account
        from: Address,
        /// Credited module
        module: String,
        /// Amount
        coin: Coin,
    },
    /// Module to account
    FromModule {
        /// Debited module
        module: String,
        /// Credited account
        to: Address,
        /// Amount
        coin: Coin,
    },
}

impl Transfer {
    /// The transfer undoing this one
    pub fn reversed(&self) -> Transfer {
        match self {
            Transfer::ToModule { from, module, coin } => Transfer::FromModule {
                module: module.clone(),
                to: *from,
                coin: coin.clone(),
            },
            Transfer::FromModule { module, to, coin } => Transfer::ToModule {
                from: *to,
                module: module.clone(),
                coin: coin.clone(),
            },
        }
    }
}

/// Transfers of one in-flight transaction
#[derive(Debug, Default)]
pub struct BankJournal {
    transfers: Vec<Transfer>,
    accounts: BTreeMap<(Address, String), Decimal>,
    modules: BTreeMap<(String, String), Decimal>,
}

impl BankJournal {
    /// Empty journal
    pub fn new() -> Self {
        Self::default()
    }

    /// Journaled transfers in order
    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    /// Account balance as seen by the transaction
    pub fn balance<B: BankKeeper + ?Sized>(&self, bank: &B, addr: &Address, denom: &str) -> Decimal {
        bank.balance(addr, denom)
            + self
                .accounts
                .get(&(*addr, denom.to_string()))
                .copied()
                .unwrap_or_default()
    }

    /// Module balance as seen by the transaction
    pub fn module_balance<B: BankKeeper + ?Sized>(&self, bank: &B, module: &str, denom: &str) -> Decimal {
        bank.module_balance(module, denom)
            + self
                .modules
                .get(&(module.to_string(), denom.to_string()))
                .copied()
                .unwrap_or_default()
    }

    /// Journal an account → module transfer
    pub fn send_coins_from_account_to_module<B: BankKeeper + ?Sized>(
        &mut self,
        bank: &B,
        from: &Address,
        module: &str,
        coin: &Coin,
    ) -> Result<(), BankError> {
        check_amount(coin)?;
        let available = self.balance(bank, from, &coin.denom);
        if available < coin.amount {
            return Err(BankError::InsufficientFunds {
                holder: from.to_string(),
                requested: coin.amount,
                available,
            });
        }

        *self.accounts.entry((*from, coin.denom.clone())).or_default() -= coin.amount;
        *self
            .modules
            .entry((module.to_string(), coin.denom.clone()))
            .or_default() += coin.amount;
        self.transfers.push(Transfer::ToModule {
            from: *from,
            module: module.to_string(),
            coin: coin.clone(),
        });
        Ok(())
    }

    /// Journal a module → account transfer
    pub fn send_coins_from_module_to_account<B: BankKeeper + ?Sized>(
        &mut self,
        bank: &B,
        module: &str,
        to: &Address,
        coin: &Coin,
    ) -> Result<(), BankError> {
        check_amount(coin)?;
        let available = self.module_balance(bank, module, &coin.denom);
        if available < coin.amount {
            return Err(BankError::InsufficientFunds {
                holder: module.to_string(),
                requested: coin.amount,
                available,
            });
        }

        *self
            .modules
            .entry((module.to_string(), coin.denom.clone()))
            .or_default() -= coin.amount;
        *self.accounts.entry((*to, coin.denom.clone())).or_default() += coin.amount;
        self.transfers.push(Transfer::FromModule {
            module: module.to_string(),
            to: *to,
            coin: coin.clone(),
        });
        Ok(())
    }

    /// Apply the journaled transfers to the bank as one batch
    ///
    /// Returns the applied transfers so the caller can reverse them.
    pub fn flush<B: BankKeeper + ?Sized>(self, bank: &mut B) -> Result<Vec<Transfer>, BankError> {
        if !self.transfers.is_empty() {
            bank.apply_transfers(&self.transfers)?;
        }
        Ok(self.transfers)
    }
}

fn check_amount(coin: &Coin) -> Result<(), BankError> {
    if coin.amount <= Decimal::ZERO {
        return Err(BankError::InvalidAmount(coin.amount));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBank;

    #[test]
    fn test_journal_tracks_pending_balances() {
        let alice = Address::new([1; 20]);
        let mut bank = MockBank::new();
        bank.mint(&alice, "BNB", Decimal::from(100));

        let mut journal = BankJournal::new();
        journal
            .send_coins_from_account_to_module(&bank, &alice, "payment", &Coin::new("BNB", Decimal::from(60)))
            .unwrap();
        assert_eq!(journal.balance(&bank, &alice, "BNB"), Decimal::from(40));

        let err = journal
            .send_coins_from_account_to_module(&bank, &alice, "payment", &Coin::new("BNB", Decimal::from(41)))
            .unwrap_err();
        assert!(matches!(err, BankError::InsufficientFunds { .. }));

        // Nothing reaches the bank until flush
        assert_eq!(bank.balance(&alice, "BNB"), Decimal::from(100));
        let applied = journal.flush(&mut bank).unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(bank.balance(&alice, "BNB"), Decimal::from(40));
        assert_eq!(bank.module_balance("payment", "BNB"), Decimal::from(60));
    }

    #[test]
    fn test_module_transfer_needs_module_funds() {
        let bank = MockBank::new();
        let mut journal = BankJournal::new();
        let err = journal
            .send_coins_from_module_to_account(
                &bank,
                "payment",
                &Address::new([2; 20]),
                &Coin::new("BNB", Decimal::ONE),
            )
            .unwrap_err();
        assert!(matches!(err, BankError::InsufficientFunds { .. }));
        assert!(journal.transfers().is_empty());
    }

    #[test]
    fn test_rejected_flush_leaves_bank_untouched() {
        let (alice, bob) = (Address::new([1; 20]), Address::new([2; 20]));
        let mut bank = MockBank::new();
        bank.mint(&alice, "BNB", Decimal::from(100));
        bank.reject_credits_to(bob);

        let mut journal = BankJournal::new();
        let coin = Coin::new("BNB", Decimal::from(40));
        journal
            .send_coins_from_account_to_module(&bank, &alice, "payment", &coin)
            .unwrap();
        journal
            .send_coins_from_module_to_account(&bank, "payment", &bob, &coin)
            .unwrap();

        let err = journal.flush(&mut bank).unwrap_err();
        assert!(matches!(err, BankError::Rejected(_)));
        assert_eq!(bank.balance(&alice, "BNB"), Decimal::from(100));
        assert!(bank.module_balance("payment", "BNB").is_zero());
    }

    #[test]
    fn test_reversed_transfer_swaps_direction() {
        let alice = Address::new([1; 20]);
        let coin = Coin::new("BNB", Decimal::TEN);
        let transfer = Transfer::ToModule {
            from: alice,
            module: "payment".to_string(),
            coin: coin.clone(),
        };
        assert_eq!(
            transfer.reversed(),
            Transfer::FromModule {
                module: "payment".to_string(),
                to: alice,
                coin,
            }
        );
        assert_eq!(transfer.reversed().reversed(), transfer);
    }
}
