//! Storage and read fees priced in USD
//!
//! The price schedule itself is external; [`PriceQuoter`] returns USD rates
//! that are fed through the USD flow adapter.

use rust_decimal::Decimal;
use stream_ledger::{Address, KvStore, OutFlowInUsd};

use crate::bank::{AccountKeeper, BankKeeper};
use crate::context::Context;
use crate::keeper::Keeper;
use crate::Result;

/// Store fee quote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePrice {
    /// Total USD rate
    pub rate: Decimal,
    /// Per-provider USD rates
    pub flows: Vec<OutFlowInUsd>,
}

/// Opaque fee schedule
pub trait PriceQuoter {
    /// Bucket metadata the schedule reads
    type Bucket;
    /// Object metadata the schedule reads
    type Object;

    /// USD rate for `quota` of read traffic served by `sp`
    fn read_price(&self, sp: &Address, quota: u64, time: i64) -> Result<Decimal>;

    /// USD rates for storing `object` in `bucket`
    fn store_price(&self, bucket: &Self::Bucket, object: &Self::Object) -> Result<StorePrice>;
}

impl<B: BankKeeper, A: AccountKeeper> Keeper<B, A> {
    /// Re-price a bucket's read quota from `prev_quota` to `new_quota`
    pub fn charge_read_quota<S, Q>(
        &self,
        ctx: &mut Context<'_, S>,
        quoter: &Q,
        owner: &Address,
        sp: &Address,
        prev_quota: u64,
        new_quota: u64,
    ) -> Result<()>
    where
        S: KvStore + ?Sized,
        Q: PriceQuoter + ?Sized,
    {
        let now = ctx.now();
        let prev = quoter.read_price(sp, prev_quota, now)?;
        let next = quoter.read_price(sp, new_quota, now)?;
        let delta = next - prev;
        if delta.is_zero() {
            return Ok(());
        }
        tracing::debug!(owner = %owner, sp = %sp, prev_quota, new_quota, "Charging read quota");
        self.apply_usd_flow_changes(ctx, owner, &[OutFlowInUsd::new(*sp, delta)])
    }

    /// Start paying for a stored object
    pub fn charge_store<S, Q>(
        &self,
        ctx: &mut Context<'_, S>,
        quoter: &Q,
        owner: &Address,
        bucket: &Q::Bucket,
        object: &Q::Object,
    ) -> Result<()>
    where
        S: KvStore + ?Sized,
        Q: PriceQuoter + ?Sized,
    {
        let price = quoter.store_price(bucket, object)?;
        self.apply_usd_flow_changes(ctx, owner, &price.flows)
    }

    /// Stop paying for a deleted object
    pub fn uncharge_store<S, Q>(
        &self,
        ctx: &mut Context<'_, S>,
        quoter: &Q,
        owner: &Address,
        bucket: &Q::Bucket,
        object: &Q::Object,
    ) -> Result<()>
    where
        S: KvStore + ?Sized,
        Q: PriceQuoter + ?Sized,
    {
        let price = quoter.store_price(bucket, object)?;
        let flows: Vec<OutFlowInUsd> = price
            .flows
            .into_iter()
            .map(|flow| OutFlowInUsd::new(flow.sp_address, -flow.rate))
            .collect();
        self.apply_usd_flow_changes(ctx, owner, &flows)
    }
}
