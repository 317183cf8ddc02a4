//! Per-block auto-settle sweep

use stream_ledger::{auto_settle, stream_records, KvStore, StreamRecordChange};

use crate::bank::{AccountKeeper, BankKeeper};
use crate::context::Context;
use crate::keeper::Keeper;
use crate::types::SweepReport;
use crate::{Error, Result};

impl<B: BankKeeper, A: AccountKeeper> Keeper<B, A> {
    /// Re-check accounts whose settle timestamp has passed
    ///
    /// Processes due entries oldest first, at most `max_auto_force_settle_num`
    /// per call. Each re-check either force-settles the account or moves its
    /// entry past block time, so the index head is re-read every iteration.
    pub fn auto_settle<S: KvStore + ?Sized>(&self, ctx: &mut Context<'_, S>) -> Result<SweepReport> {
        let now = ctx.now();
        let cap = usize::try_from(self.params().max_auto_force_settle_num).unwrap_or(usize::MAX);
        let mut report = SweepReport::default();

        while report.processed < cap {
            let Some(entry) = auto_settle::due(&ctx.store, now, 1)?.into_iter().next() else {
                break;
            };

            let mut record = stream_records::get(&ctx.store, &entry.addr)?
                .ok_or(Error::DanglingAutoSettleRecord(entry.addr))?;
            if record.settle_timestamp != entry.timestamp {
                return Err(stream_ledger::Error::InvariantViolation(format!(
                    "auto-settle entry {} for {} disagrees with settle timestamp {}",
                    entry.timestamp, entry.addr, record.settle_timestamp
                ))
                .into());
            }

            self.update_stream_record(ctx, &mut record, &StreamRecordChange::new(entry.addr))?;
            report.processed += 1;
            if record.is_frozen() {
                report.force_settled += 1;
            }
        }

        report.backlog = cap > 0 && !auto_settle::due(&ctx.store, now, 1)?.is_empty();
        self.metrics().record_sweep(report.processed, report.backlog);
        if report.processed > 0 {
            tracing::info!(
                block_time = now,
                processed = report.processed,
                force_settled = report.force_settled,
                backlog = report.backlog,
                "Auto-settle sweep finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::mock::{MockAccounts, MockBank};
    use crate::types::BlockContext;
    use rust_decimal::Decimal;
    use stream_ledger::{Address, AutoSettleRecord, MemStore};

    #[test]
    fn test_dangling_entry_is_fatal() {
        let keeper = Keeper::new(&Config::default(), MockBank::new(), MockAccounts::default()).unwrap();
        let mut store = MemStore::new();
        let ghost = Address::new([3; 20]);
        auto_settle::set(
            &mut store,
            &AutoSettleRecord {
                timestamp: 10,
                addr: ghost,
            },
        )
        .unwrap();

        let mut ctx = Context::new(&mut store, BlockContext::new(1, 20));
        let err = keeper.auto_settle(&mut ctx).unwrap_err();
        assert!(matches!(err, Error::DanglingAutoSettleRecord(a) if a == ghost));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_zero_cap_processes_nothing() {
        let mut config = Config::default();
        config.params.max_auto_force_settle_num = 0;
        let keeper = Keeper::new(&config, MockBank::new(), MockAccounts::default()).unwrap();
        let mut store = MemStore::new();
        let account = Address::new([1; 20]);

        let mut ctx = Context::new(&mut store, BlockContext::new(1, 0));
        keeper
            .update_stream_record_by_addr(
                &mut ctx,
                &StreamRecordChange::new(account)
                    .with_static_balance_change(Decimal::from(1_000_000_000i64))
                    .with_rate_change(Decimal::from(-1)),
            )
            .unwrap();
        let settle_timestamp = stream_records::get(&ctx.store, &account)
            .unwrap()
            .unwrap()
            .settle_timestamp;

        ctx.block = BlockContext::new(2, settle_timestamp + 1);
        let report = keeper.auto_settle(&mut ctx).unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(auto_settle::contains(&ctx.store, settle_timestamp, &account).unwrap());
    }
}
