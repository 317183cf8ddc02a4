//! USD flow adapter
//!
//! Fees quoted in USD are paid in the native token. Per payer and provider
//! the persisted USD total is the source of truth; the native rate is
//! re-derived from it at each update so truncation never accumulates:
//!
//! `native change = conv(new_total, current price) - conv(old_total, price at last update)`
//!
//! The price at last update is stored on the record, so later oracle
//! submissions can never move the baseline.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use stream_ledger::{
    prices, stream_records, Address, KvStore, OutFlow, OutFlowInUsd, PricePoint,
};

use crate::bank::{AccountKeeper, BankKeeper};
use crate::context::Context;
use crate::keeper::Keeper;
use crate::{Error, Result};

impl<B: BankKeeper, A: AccountKeeper> Keeper<B, A> {
    /// Append an oracle price point
    ///
    /// The point must be dated at or before block time and after every
    /// existing point.
    pub fn submit_price<S: KvStore + ?Sized>(
        &self,
        ctx: &mut Context<'_, S>,
        time: i64,
        price: u64,
    ) -> Result<()> {
        let now = ctx.now();
        if time > now {
            return Err(Error::FuturePrice { time, now });
        }
        prices::submit(&mut ctx.store, PricePoint { time, price })?;
        tracing::info!(time, price, "Oracle price submitted");
        Ok(())
    }

    /// Latest price at or before `time`
    pub fn price_at<S: KvStore + ?Sized>(&self, ctx: &Context<'_, S>, time: i64) -> Result<PricePoint> {
        prices::latest_at(&ctx.store, time)?.ok_or(Error::PriceNotFound { time })
    }

    /// Apply USD rate deltas from `from` to storage providers
    ///
    /// Every existing USD flow of `from` is re-priced at the current price;
    /// the resulting native deltas go through [`Keeper::apply_flow_changes`].
    pub fn apply_usd_flow_changes<S: KvStore + ?Sized>(
        &self,
        ctx: &mut Context<'_, S>,
        from: &Address,
        usd_deltas: &[OutFlowInUsd],
    ) -> Result<()> {
        let now = ctx.now();
        let mut record = stream_records::get_or_new(&ctx.store, from, now)?;
        if record.is_frozen() {
            return Err(Error::StreamAccountFrozen(*from));
        }

        let current = self.price_at(ctx, now)?;
        let old_totals: BTreeMap<Address, Decimal> = record
            .out_flows_in_usd
            .iter()
            .map(|flow| (flow.sp_address, flow.rate))
            .collect();
        let previous = if old_totals.is_empty() {
            current
        } else if record.usd_price == 0 {
            return Err(stream_ledger::Error::InvariantViolation(format!(
                "{} holds USD flows without a conversion price",
                from
            ))
            .into());
        } else {
            PricePoint {
                time: record.usd_priced_at,
                price: record.usd_price,
            }
        };

        let mut new_totals = old_totals.clone();
        for delta in usd_deltas {
            *new_totals.entry(delta.sp_address).or_default() += delta.rate;
        }
        if let Some((sp, rate)) = new_totals.iter().find(|(_, rate)| **rate < Decimal::ZERO) {
            return Err(Error::NegativeUsdFlow {
                from: *from,
                to: *sp,
                rate: *rate,
            });
        }

        let mut native_deltas = Vec::new();
        for (sp, new_total) in &new_totals {
            let old_total = old_totals.get(sp).copied().unwrap_or_default();
            let change = to_native(&current, *new_total)? - to_native(&previous, old_total)?;
            if !change.is_zero() {
                native_deltas.push(OutFlow::active(*sp, change));
            }
        }

        let usd_flows: Vec<OutFlowInUsd> = new_totals
            .into_iter()
            .filter(|(_, rate)| !rate.is_zero())
            .map(|(sp, rate)| OutFlowInUsd::new(sp, rate))
            .collect();
        if native_deltas.is_empty() && usd_flows == record.out_flows_in_usd {
            return Ok(());
        }

        if current.price != previous.price {
            tracing::debug!(
                account = %from,
                previous_price = previous.price,
                current_price = current.price,
                "Re-pricing USD flows"
            );
        }

        record.out_flows_in_usd = usd_flows;
        record.usd_priced_at = now;
        record.usd_price = current.price;
        stream_records::set(&mut ctx.store, &record)?;

        self.apply_flow_changes(ctx, from, &native_deltas)?;
        Ok(())
    }

    /// Re-price every USD flow of `from` at the current price
    pub fn reprice_usd_flows<S: KvStore + ?Sized>(
        &self,
        ctx: &mut Context<'_, S>,
        from: &Address,
    ) -> Result<()> {
        self.apply_usd_flow_changes(ctx, from, &[])
    }
}

fn to_native(price: &PricePoint, usd: Decimal) -> Result<Decimal> {
    if usd.is_zero() {
        return Ok(Decimal::ZERO);
    }
    price
        .ratio()
        .usd_to_native(usd)
        .ok_or(Error::Overflow("usd conversion"))
}
