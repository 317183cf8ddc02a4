//! Settlement core
//!
//! [`Keeper::update_stream_record`] is the only place balances change. Each
//! call advances the record to block time and applies one merged change in a
//! fixed order:
//!
//! 1. accrue `netflow_rate * elapsed` into the static balance
//! 2. move the lock delta between static and lock balance
//! 3. apply the rate delta and re-size the buffer to `max(0, -rate) * reserve_time`
//! 4. apply the static delta
//! 5. pull any shortfall from the owner's bank account (soft failure)
//! 6. project exhaustion; force-settle inside the forced-settle window
//! 7. move the auto-settle index entry to the new settle timestamp

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use stream_ledger::{
    auto_settle, flows, out_flows, stream_records, Address, KvStore, StreamAccountStatus,
    StreamRecord, StreamRecordChange,
};

use crate::bank::{AccountKeeper, BankKeeper};
use crate::context::Context;
use crate::keeper::Keeper;
use crate::types::PaymentEvent;
use crate::{Error, Result};

impl<B: BankKeeper, A: AccountKeeper> Keeper<B, A> {
    /// Advance `record` to block time, apply `change` and persist the result
    pub fn update_stream_record<S: KvStore + ?Sized>(
        &self,
        ctx: &mut Context<'_, S>,
        record: &mut StreamRecord,
        change: &StreamRecordChange,
    ) -> Result<()> {
        debug_assert_eq!(record.account, change.addr);
        let now = ctx.now();
        let old_settle_timestamp = record.settle_timestamp;

        // 1. time accrual; a frozen account keeps receiving its inflow
        if now != record.crud_timestamp {
            let elapsed = Decimal::from(now - record.crud_timestamp);
            let accrued = (record.netflow_rate + record.frozen_inflow_rate)
                .checked_mul(elapsed)
                .ok_or(Error::Overflow("stream accrual"))?;
            record.static_balance += accrued;
            record.crud_timestamp = now;
        }

        // 2. lock
        if !change.lock_balance_change.is_zero() {
            record.lock_balance += change.lock_balance_change;
            record.static_balance -= change.lock_balance_change;
            if record.lock_balance < Decimal::ZERO {
                return Err(Error::NegativeLockBalance {
                    account: record.account,
                    lock_balance: record.lock_balance,
                });
            }
        }

        // 3. rate and buffer
        if !change.rate_change.is_zero() && record.is_frozen() {
            record.frozen_inflow_rate += change.rate_change;
            if record.frozen_inflow_rate < Decimal::ZERO {
                return Err(stream_ledger::Error::InvariantViolation(format!(
                    "frozen account {} has negative inflow {}",
                    record.account, record.frozen_inflow_rate
                ))
                .into());
            }
        } else if !change.rate_change.is_zero() {
            record.netflow_rate += change.rate_change;
            let required = self.required_buffer(record.netflow_rate)?;
            let delta = required - record.buffer_balance;
            record.buffer_balance += delta;
            record.static_balance -= delta;
        }

        // 4. static delta
        record.static_balance += change.static_balance_change;

        // 5. overdraft correction
        if record.static_balance < Decimal::ZERO && self.accounts().has_account(&record.account) {
            self.cover_shortfall(ctx, record);
        }

        // 6. exhaustion projection
        if record.netflow_rate < Decimal::ZERO {
            let pay_duration =
                ((record.static_balance + record.buffer_balance) / record.netflow_rate.abs()).trunc();
            if pay_duration <= self.forced_settle_time() {
                return self.force_settle(ctx, record, old_settle_timestamp);
            }
            let forced = i64::try_from(self.params().forced_settle_time)
                .map_err(|_| Error::Overflow("forced settle time"))?;
            let pay_duration = pay_duration.to_i64().unwrap_or(i64::MAX);
            record.settle_timestamp = now.saturating_sub(forced).saturating_add(pay_duration);
        } else {
            record.settle_timestamp = 0;
        }

        // 7. index maintenance
        auto_settle::replace(
            &mut ctx.store,
            &record.account,
            old_settle_timestamp,
            record.settle_timestamp,
        )?;
        stream_records::set(&mut ctx.store, record)?;
        self.metrics().record_update();

        tracing::debug!(
            account = %record.account,
            static_balance = %record.static_balance,
            buffer_balance = %record.buffer_balance,
            netflow_rate = %record.netflow_rate,
            settle_timestamp = record.settle_timestamp,
            "Stream record updated"
        );
        Ok(())
    }

    /// Load (or lazily create) the record of `change.addr` and apply `change`
    pub fn update_stream_record_by_addr<S: KvStore + ?Sized>(
        &self,
        ctx: &mut Context<'_, S>,
        change: &StreamRecordChange,
    ) -> Result<StreamRecord> {
        let mut record = stream_records::get_or_new(&ctx.store, &change.addr, ctx.now())?;
        self.update_stream_record(ctx, &mut record, change)?;
        Ok(record)
    }

    /// Merge changes per account and apply each merged change once
    pub fn apply_stream_record_changes<S: KvStore + ?Sized>(
        &self,
        ctx: &mut Context<'_, S>,
        changes: &[StreamRecordChange],
    ) -> Result<()> {
        let mut merged: BTreeMap<Address, StreamRecordChange> = BTreeMap::new();
        for change in changes {
            merged
                .entry(change.addr)
                .and_modify(|existing| existing.merge(change))
                .or_insert_with(|| change.clone());
        }

        for change in merged.values().filter(|change| !change.is_zero()) {
            self.update_stream_record_by_addr(ctx, change)?;
        }
        Ok(())
    }

    /// Sweep a defaulting account to governance and freeze its outflows
    ///
    /// Static, buffer and netflow rate all end at zero. Inflow that remains
    /// once the outflows are frozen moves to `frozen_inflow_rate`.
    fn force_settle<S: KvStore + ?Sized>(
        &self,
        ctx: &mut Context<'_, S>,
        record: &mut StreamRecord,
        old_settle_timestamp: i64,
    ) -> Result<()> {
        let account = record.account;
        let settled = record.static_balance + record.buffer_balance;

        let frozen = flows::freeze_flows_by_from_user(&mut ctx.store, &account)?;
        out_flows::freeze(&mut ctx.store, &account)?;
        let frozen_rate: Decimal = frozen.iter().map(|flow| flow.rate).sum();

        let remaining_inflow = record.netflow_rate + frozen_rate;
        if remaining_inflow < Decimal::ZERO {
            return Err(stream_ledger::Error::InvariantViolation(format!(
                "{} still has netflow {} after freezing its outflows",
                account, remaining_inflow
            ))
            .into());
        }
        record.static_balance = Decimal::ZERO;
        record.buffer_balance = Decimal::ZERO;
        record.netflow_rate = Decimal::ZERO;
        record.frozen_inflow_rate += remaining_inflow;
        record.status = StreamAccountStatus::Frozen;
        record.settle_timestamp = 0;
        auto_settle::replace(&mut ctx.store, &account, old_settle_timestamp, 0)?;
        stream_records::set(&mut ctx.store, record)?;

        let mut changes: Vec<StreamRecordChange> = frozen
            .iter()
            .map(|flow| StreamRecordChange::new(flow.to).with_rate_change(-flow.rate))
            .collect();
        if !settled.is_zero() {
            changes.push(
                StreamRecordChange::new(*self.governance_address()).with_static_balance_change(settled),
            );
        }
        self.apply_stream_record_changes(ctx, &changes)?;

        // Counterparty updates may have cycled back to this account
        *record = stream_records::get(&ctx.store, &account)?.ok_or_else(|| {
            stream_ledger::Error::InvariantViolation(format!(
                "force-settled record {} vanished",
                account
            ))
        })?;

        self.metrics().record_force_settle(settled);
        tracing::info!(
            account = %account,
            settled = %settled,
            frozen_flows = frozen.len(),
            "Stream account force-settled"
        );
        ctx.emit(PaymentEvent::ForceSettle {
            account,
            settled_balance: settled,
            block_time: ctx.now(),
        });
        Ok(())
    }

    /// Return a frozen account to normal if it can fund its frozen outflows
    ///
    /// Returns whether the account was resumed.
    pub fn try_resume<S: KvStore + ?Sized>(
        &self,
        ctx: &mut Context<'_, S>,
        account: &Address,
    ) -> Result<bool> {
        let Some(mut record) = stream_records::get(&ctx.store, account)? else {
            return Ok(false);
        };
        if !record.is_frozen() {
            return Ok(false);
        }

        let frozen = out_flows::frozen(&ctx.store, account)?;
        let total: Decimal = frozen.iter().map(|flow| flow.rate).sum();
        let required = self.required_buffer(-total)?;

        // Settle to now before judging the balance
        self.update_stream_record(ctx, &mut record, &StreamRecordChange::new(*account))?;
        if record.static_balance < required {
            tracing::debug!(
                account = %account,
                static_balance = %record.static_balance,
                required = %required,
                "Frozen account cannot resume yet"
            );
            return Ok(false);
        }

        let inflow = record.frozen_inflow_rate;
        record.frozen_inflow_rate = Decimal::ZERO;
        record.status = StreamAccountStatus::Normal;
        stream_records::set(&mut ctx.store, &record)?;
        flows::unfreeze_flows_by_from_user(&mut ctx.store, account)?;
        out_flows::unfreeze(&mut ctx.store, account)?;

        let receivers: Vec<StreamRecordChange> = frozen
            .iter()
            .map(|flow| StreamRecordChange::new(flow.to_address).with_rate_change(flow.rate))
            .collect();
        self.apply_stream_record_changes(ctx, &receivers)?;
        self.update_stream_record_by_addr(
            ctx,
            &StreamRecordChange::new(*account).with_rate_change(inflow - total),
        )?;

        tracing::info!(
            account = %account,
            restored_rate = %total,
            restored_inflow = %inflow,
            "Stream account resumed"
        );
        ctx.emit(PaymentEvent::Resume {
            account: *account,
            restored_rate: total,
        });
        Ok(true)
    }

    /// Move `amount` from `from`'s bank account into `to`'s stream account
    pub fn deposit<S: KvStore + ?Sized>(
        &self,
        ctx: &mut Context<'_, S>,
        from: &Address,
        to: &Address,
        amount: Decimal,
    ) -> Result<StreamRecord> {
        ensure_positive(amount)?;
        let coin = self.fee_coin(amount);
        ctx.bank
            .send_coins_from_account_to_module(self.bank(), from, self.module_name(), &coin)?;

        let record = self.update_stream_record_by_addr(
            ctx,
            &StreamRecordChange::new(*to).with_static_balance_change(amount),
        )?;
        ctx.emit(PaymentEvent::Deposit {
            from: *from,
            to: *to,
            amount,
        });
        tracing::debug!(from = %from, to = %to, amount = %amount, "Deposit");

        if record.is_frozen() && self.try_resume(ctx, to)? {
            return stream_records::get(&ctx.store, to)?.ok_or(Error::StreamRecordNotFound(*to));
        }
        Ok(record)
    }

    /// Move `amount` from `account`'s stream balance back to its bank account
    pub fn withdraw<S: KvStore + ?Sized>(
        &self,
        ctx: &mut Context<'_, S>,
        account: &Address,
        amount: Decimal,
    ) -> Result<StreamRecord> {
        ensure_positive(amount)?;
        let mut record =
            stream_records::get(&ctx.store, account)?.ok_or(Error::StreamRecordNotFound(*account))?;
        if record.is_frozen() {
            return Err(Error::StreamAccountFrozen(*account));
        }

        self.update_stream_record(ctx, &mut record, &StreamRecordChange::new(*account))?;
        if record.is_frozen() {
            return Err(Error::StreamAccountFrozen(*account));
        }
        if record.static_balance < amount {
            return Err(Error::InsufficientBalance {
                account: *account,
                requested: amount,
                available: record.static_balance,
            });
        }

        self.update_stream_record(
            ctx,
            &mut record,
            &StreamRecordChange::new(*account).with_static_balance_change(-amount),
        )?;
        // The debit itself must not leave the account inside the forced-settle window
        if record.is_frozen() {
            return Err(Error::StreamAccountFrozen(*account));
        }
        let coin = self.fee_coin(amount);
        ctx.bank
            .send_coins_from_module_to_account(self.bank(), self.module_name(), account, &coin)?;

        ctx.emit(PaymentEvent::Withdraw {
            to: *account,
            amount,
        });
        tracing::debug!(account = %account, amount = %amount, "Withdraw");
        Ok(record)
    }

    /// Earmark `amount` of the static balance
    pub fn lock_balance<S: KvStore + ?Sized>(
        &self,
        ctx: &mut Context<'_, S>,
        account: &Address,
        amount: Decimal,
    ) -> Result<StreamRecord> {
        ensure_positive(amount)?;
        let mut record =
            stream_records::get(&ctx.store, account)?.ok_or(Error::StreamRecordNotFound(*account))?;
        if record.is_frozen() {
            return Err(Error::StreamAccountFrozen(*account));
        }

        self.update_stream_record(ctx, &mut record, &StreamRecordChange::new(*account))?;
        if record.static_balance < amount {
            return Err(Error::InsufficientBalance {
                account: *account,
                requested: amount,
                available: record.static_balance,
            });
        }

        self.update_stream_record(
            ctx,
            &mut record,
            &StreamRecordChange::new(*account).with_lock_balance_change(amount),
        )?;
        Ok(record)
    }

    /// Release `amount` of locked balance back to static
    pub fn unlock_balance<S: KvStore + ?Sized>(
        &self,
        ctx: &mut Context<'_, S>,
        account: &Address,
        amount: Decimal,
    ) -> Result<StreamRecord> {
        ensure_positive(amount)?;
        self.update_stream_record_by_addr(
            ctx,
            &StreamRecordChange::new(*account).with_lock_balance_change(-amount),
        )
    }

    fn required_buffer(&self, netflow_rate: Decimal) -> Result<Decimal> {
        if netflow_rate >= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        netflow_rate
            .abs()
            .checked_mul(self.reserve_time())
            .ok_or(Error::Overflow("buffer balance"))
    }

    fn cover_shortfall<S: KvStore + ?Sized>(&self, ctx: &mut Context<'_, S>, record: &mut StreamRecord) {
        let shortfall = -record.static_balance;
        let coin = self.fee_coin(shortfall);
        match ctx.bank.send_coins_from_account_to_module(
            self.bank(),
            &record.account,
            self.module_name(),
            &coin,
        ) {
            Ok(()) => {
                record.static_balance += shortfall;
                self.metrics().record_overdraft_correction(true);
                tracing::debug!(account = %record.account, amount = %shortfall, "Covered overdraft from bank");
            }
            Err(err) => {
                self.metrics().record_overdraft_correction(false);
                tracing::warn!(
                    account = %record.account,
                    amount = %shortfall,
                    error = %err,
                    "Failed to cover overdraft from bank"
                );
            }
        }
    }
}

fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::InvalidAmount(amount));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::mock::{MockAccounts, MockBank};
    use crate::types::BlockContext;
    use stream_ledger::MemStore;

    const DAY: i64 = 86_400;

    fn addr(b: u8) -> Address {
        Address::new([b; 20])
    }

    fn keeper() -> Keeper<MockBank, MockAccounts> {
        Keeper::new(&Config::default(), MockBank::new(), MockAccounts::default()).unwrap()
    }

    fn at(time: i64) -> BlockContext {
        BlockContext::new(time as u64, time)
    }

    #[test]
    fn test_accrual_and_buffer() {
        let keeper = keeper();
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, at(1_000));
        let payer = addr(1);

        keeper
            .update_stream_record_by_addr(
                &mut ctx,
                &StreamRecordChange::new(payer)
                    .with_static_balance_change(Decimal::from(20_000_000_000i64)),
            )
            .unwrap();
        let record = keeper
            .update_stream_record_by_addr(
                &mut ctx,
                &StreamRecordChange::new(payer).with_rate_change(Decimal::from(-10)),
            )
            .unwrap();

        let buffer = Decimal::from(10 * 15_552_000i64);
        assert_eq!(record.buffer_balance, buffer);
        assert_eq!(record.static_balance, Decimal::from(20_000_000_000i64) - buffer);
        assert!(auto_settle::contains(&ctx.store, record.settle_timestamp, &payer).unwrap());

        ctx.block = at(1_000 + DAY);
        let record = keeper
            .update_stream_record_by_addr(&mut ctx, &StreamRecordChange::new(payer))
            .unwrap();
        assert_eq!(
            record.static_balance,
            Decimal::from(20_000_000_000i64) - buffer - Decimal::from(10 * DAY)
        );
        assert_eq!(record.crud_timestamp, 1_000 + DAY);
    }

    #[test]
    fn test_noop_change_is_idempotent() {
        let keeper = keeper();
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, at(50));
        let payer = addr(1);

        let first = keeper
            .update_stream_record_by_addr(
                &mut ctx,
                &StreamRecordChange::new(payer)
                    .with_static_balance_change(Decimal::from(1_000_000_000i64))
                    .with_rate_change(Decimal::from(-3)),
            )
            .unwrap();
        let second = keeper
            .update_stream_record_by_addr(&mut ctx, &StreamRecordChange::new(payer))
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_positive_rate_releases_buffer_and_index() {
        let keeper = keeper();
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, at(0));
        let account = addr(1);

        keeper
            .update_stream_record_by_addr(
                &mut ctx,
                &StreamRecordChange::new(account)
                    .with_static_balance_change(Decimal::from(1_000_000_000i64))
                    .with_rate_change(Decimal::from(-5)),
            )
            .unwrap();
        let record = keeper
            .update_stream_record_by_addr(
                &mut ctx,
                &StreamRecordChange::new(account).with_rate_change(Decimal::from(8)),
            )
            .unwrap();

        assert_eq!(record.netflow_rate, Decimal::from(3));
        assert!(record.buffer_balance.is_zero());
        assert_eq!(record.static_balance, Decimal::from(1_000_000_000i64));
        assert_eq!(record.settle_timestamp, 0);
        assert!(auto_settle::all(&ctx.store).unwrap().is_empty());
    }

    #[test]
    fn test_unlock_beyond_locked_is_fatal() {
        let keeper = keeper();
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, at(0));
        let account = addr(1);
        keeper
            .update_stream_record_by_addr(
                &mut ctx,
                &StreamRecordChange::new(account).with_static_balance_change(Decimal::from(100)),
            )
            .unwrap();

        let record = keeper.lock_balance(&mut ctx, &account, Decimal::from(40)).unwrap();
        assert_eq!(record.lock_balance, Decimal::from(40));
        assert_eq!(record.static_balance, Decimal::from(60));

        let err = keeper
            .unlock_balance(&mut ctx, &account, Decimal::from(41))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, Error::NegativeLockBalance { .. }));
    }

    #[test]
    fn test_lock_requires_static_balance() {
        let keeper = keeper();
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, at(0));
        let account = addr(1);
        keeper
            .update_stream_record_by_addr(
                &mut ctx,
                &StreamRecordChange::new(account).with_static_balance_change(Decimal::from(10)),
            )
            .unwrap();

        let err = keeper.lock_balance(&mut ctx, &account, Decimal::from(11)).unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
    }

    #[test]
    fn test_overdraft_pulled_from_bank() {
        let mut keeper = keeper();
        let account = addr(1);
        keeper.accounts_mut().insert(account);
        keeper.bank_mut().mint(&account, "BNB", Decimal::from(500));

        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, at(0));
        let record = keeper
            .update_stream_record_by_addr(
                &mut ctx,
                &StreamRecordChange::new(account).with_static_balance_change(Decimal::from(-300)),
            )
            .unwrap();
        assert!(record.static_balance.is_zero());
        assert_eq!(ctx.bank.balance(keeper.bank(), &account, "BNB"), Decimal::from(200));
        assert_eq!(keeper.metrics().overdraft_corrections.get(), 1);
    }

    #[test]
    fn test_changes_merged_per_account() {
        let keeper = keeper();
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, at(0));
        let a = addr(1);

        keeper
            .apply_stream_record_changes(
                &mut ctx,
                &[
                    StreamRecordChange::new(a).with_static_balance_change(Decimal::from(7)),
                    StreamRecordChange::new(addr(2)),
                    StreamRecordChange::new(a).with_static_balance_change(Decimal::from(3)),
                ],
            )
            .unwrap();

        assert_eq!(
            stream_records::get(&ctx.store, &a).unwrap().unwrap().static_balance,
            Decimal::from(10)
        );
        // All-zero merged change touches nothing
        assert!(stream_records::get(&ctx.store, &addr(2)).unwrap().is_none());
        assert_eq!(keeper.metrics().record_updates.get(), 1);
    }
}
