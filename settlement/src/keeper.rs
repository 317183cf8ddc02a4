//! Payment stream keeper
//!
//! Owns module parameters, the governance account and the external
//! collaborators. State transitions are implemented across `stream`, `flow`,
//! `usd`, `pricing` and `sweep`; [`Keeper::execute`] gives each of them
//! all-or-nothing semantics.

use rust_decimal::Decimal;
use stream_ledger::{Address, KvStore};

use crate::bank::{AccountKeeper, BankKeeper, Transfer};
use crate::config::{Config, Params};
use crate::context::Context;
use crate::metrics::Metrics;
use crate::types::{BlockContext, Coin, PaymentEvent, SweepReport};
use crate::{Error, Result};

/// Payment stream keeper
pub struct Keeper<B, A> {
    params: Params,
    module_name: String,
    governance: Address,
    bank: B,
    accounts: A,
    metrics: Metrics,
}

impl<B, A> std::fmt::Debug for Keeper<B, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keeper")
            .field("params", &self.params)
            .field("module_name", &self.module_name)
            .field("governance", &self.governance)
            .finish_non_exhaustive()
    }
}

impl<B: BankKeeper, A: AccountKeeper> Keeper<B, A> {
    /// Create a keeper from configuration and collaborators
    pub fn new(config: &Config, bank: B, accounts: A) -> Result<Self> {
        config.params.validate()?;

        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to create metrics: {}", e)))?;
        let governance =
            Address::module_address(&config.module_name, config.governance_salt.as_bytes());

        tracing::info!(
            module = %config.module_name,
            governance = %governance,
            reserve_time = config.params.reserve_time,
            forced_settle_time = config.params.forced_settle_time,
            "Payment keeper initialized"
        );

        Ok(Self {
            params: config.params.clone(),
            module_name: config.module_name.clone(),
            governance,
            bank,
            accounts,
            metrics,
        })
    }

    /// Run `f` as one transaction
    ///
    /// On `Ok` the journaled bank transfers are applied as one batch, then
    /// the buffered store writes are committed and the queued events are
    /// returned. A refused batch or an `Err` from `f` discards everything; a
    /// failed commit reverses the bank batch.
    pub fn execute<S, T, F>(
        &mut self,
        store: &mut S,
        block: BlockContext,
        f: F,
    ) -> Result<(T, Vec<PaymentEvent>)>
    where
        S: KvStore + ?Sized,
        F: FnOnce(&Self, &mut Context<'_, S>) -> Result<T>,
    {
        let mut ctx = Context::new(store, block);
        let value = match f(self, &mut ctx) {
            Ok(value) => value,
            Err(err) => {
                if err.is_fatal() {
                    tracing::error!(height = block.height, error = %err, "Transaction hit fatal error");
                } else {
                    tracing::debug!(height = block.height, error = %err, "Transaction rejected");
                }
                return Err(err);
            }
        };

        let (cache, journal, events) = ctx.into_parts();
        let applied = journal.flush(&mut self.bank)?;
        if let Err(err) = cache.commit() {
            let reversal: Vec<Transfer> = applied.iter().rev().map(Transfer::reversed).collect();
            if !reversal.is_empty() {
                if let Err(bank_err) = self.bank.apply_transfers(&reversal) {
                    tracing::error!(
                        height = block.height,
                        commit_error = %err,
                        bank_error = %bank_err,
                        "Failed to reverse bank transfers after store commit failure"
                    );
                    return Err(Error::BankLedgerDiverged(format!(
                        "commit failed ({}) and reversal failed ({})",
                        err, bank_err
                    )));
                }
            }
            tracing::error!(height = block.height, error = %err, "Store commit failed; bank transfers reversed");
            return Err(err.into());
        }
        Ok((value, events))
    }

    /// Per-block sweep of due auto-settle entries, as its own transaction
    pub fn end_block<S: KvStore + ?Sized>(
        &mut self,
        store: &mut S,
        block: BlockContext,
    ) -> Result<(SweepReport, Vec<PaymentEvent>)> {
        self.execute(store, block, |keeper, ctx| keeper.auto_settle(ctx))
    }

    /// Module parameters
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Module account name
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Account receiving force-settled balances
    pub fn governance_address(&self) -> &Address {
        &self.governance
    }

    /// Token bank
    pub fn bank(&self) -> &B {
        &self.bank
    }

    /// Token bank, mutably (outside transactions only)
    pub fn bank_mut(&mut self) -> &mut B {
        &mut self.bank
    }

    /// Account registry
    pub fn accounts(&self) -> &A {
        &self.accounts
    }

    /// Account registry, mutably (outside transactions only)
    pub fn accounts_mut(&mut self) -> &mut A {
        &mut self.accounts
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) fn fee_coin(&self, amount: Decimal) -> Coin {
        Coin::new(self.params.fee_denom.clone(), amount)
    }

    pub(crate) fn reserve_time(&self) -> Decimal {
        Decimal::from(self.params.reserve_time)
    }

    pub(crate) fn forced_settle_time(&self) -> Decimal {
        Decimal::from(self.params.forced_settle_time)
    }
}
