//! Native-rate flow changes

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use stream_ledger::{
    flows, out_flows, stream_records, Address, Flow, KvStore, OutFlow, StreamRecordChange,
};

use crate::bank::{AccountKeeper, BankKeeper};
use crate::context::Context;
use crate::keeper::Keeper;
use crate::{Error, Result};

impl<B: BankKeeper, A: AccountKeeper> Keeper<B, A> {
    /// Apply signed rate deltas from `from` to its counterparties
    ///
    /// Deltas are merged per counterparty before anything is written, so a
    /// batch is order independent. Returns the change in the number of
    /// distinct active counterparties.
    pub fn apply_flow_changes<S: KvStore + ?Sized>(
        &self,
        ctx: &mut Context<'_, S>,
        from: &Address,
        deltas: &[OutFlow],
    ) -> Result<i64> {
        let mut merged: BTreeMap<Address, Decimal> = BTreeMap::new();
        for delta in deltas {
            if delta.to_address == *from {
                return Err(stream_ledger::Error::SelfFlow(*from).into());
            }
            *merged.entry(delta.to_address).or_default() += delta.rate;
        }
        merged.retain(|_, rate| !rate.is_zero());
        if merged.is_empty() {
            return Ok(0);
        }

        if let Some(record) = stream_records::get(&ctx.store, from)? {
            if record.is_frozen() {
                return Err(Error::StreamAccountFrozen(*from));
            }
        }

        let merged_deltas: Vec<OutFlow> = merged
            .iter()
            .map(|(to, rate)| OutFlow::active(*to, *rate))
            .collect();
        let count_delta = out_flows::merge_active_out_flows(&mut ctx.store, from, &merged_deltas)?;
        for (to, rate) in &merged {
            flows::update(&mut ctx.store, &Flow::new(*from, *to, *rate))?;
        }

        // Receivers first: a payer force-settled by its own change must not
        // see counterparties dip below their final rate
        let receivers: Vec<StreamRecordChange> = merged
            .iter()
            .map(|(to, rate)| StreamRecordChange::new(*to).with_rate_change(*rate))
            .collect();
        self.apply_stream_record_changes(ctx, &receivers)?;

        let total: Decimal = merged.values().sum();
        self.update_stream_record_by_addr(
            ctx,
            &StreamRecordChange::new(*from).with_rate_change(-total),
        )?;

        tracing::debug!(
            from = %from,
            counterparties = merged.len(),
            rate_change = %total,
            count_delta,
            "Flow changes applied"
        );
        Ok(count_delta)
    }
}
