//! Out-flow store: payer-scoped mirror of the flow graph
//!
//! Entries are keyed `payer ‖ status ‖ counterparty` so all ACTIVE (or all
//! FROZEN) out-flows of one payer form a contiguous range.

use crate::error::{Error, Result};
use crate::keys;
use crate::storage::{get_typed, put_typed, KeyRange, KvStore, Region, ScanOrder};
use crate::types::{Address, OutFlow, OutFlowStatus};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Rate of one out-flow entry
pub fn get<S: KvStore + ?Sized>(
    store: &S,
    payer: &Address,
    status: OutFlowStatus,
    to: &Address,
) -> Result<Option<Decimal>> {
    get_typed(store, Region::OutFlow, &keys::out_flow_key(payer, status, to))
}

/// Write one out-flow entry; a zero rate removes it
pub fn set<S: KvStore + ?Sized>(store: &mut S, payer: &Address, out_flow: &OutFlow) -> Result<()> {
    let key = keys::out_flow_key(payer, out_flow.status, &out_flow.to_address);
    if out_flow.rate.is_zero() {
        store.delete(Region::OutFlow, &key)
    } else {
        put_typed(store, Region::OutFlow, &key, &out_flow.rate)
    }
}

/// Out-flows of `payer` with the given status, ordered by counterparty
pub fn list<S: KvStore + ?Sized>(
    store: &S,
    payer: &Address,
    status: OutFlowStatus,
) -> Result<Vec<OutFlow>> {
    let range = KeyRange::prefix(&keys::out_flow_status_prefix(payer, status));
    store
        .scan(Region::OutFlow, &range, ScanOrder::Ascending, None)?
        .into_iter()
        .map(|(key, value)| -> Result<OutFlow> {
            let (_, status, to_address) = keys::parse_out_flow_key(&key)?;
            let rate: Decimal = bincode::deserialize(&value)?;
            Ok(OutFlow {
                to_address,
                rate,
                status,
            })
        })
        .collect()
}

/// ACTIVE out-flows of `payer`
pub fn active<S: KvStore + ?Sized>(store: &S, payer: &Address) -> Result<Vec<OutFlow>> {
    list(store, payer, OutFlowStatus::Active)
}

/// FROZEN out-flows of `payer`
pub fn frozen<S: KvStore + ?Sized>(store: &S, payer: &Address) -> Result<Vec<OutFlow>> {
    list(store, payer, OutFlowStatus::Frozen)
}

/// Merge signed rate deltas into the ACTIVE out-flows of `payer`
///
/// Deltas to the same counterparty are summed first and every result is
/// validated before anything is written. Returns the change in the number of
/// distinct active counterparties.
pub fn merge_active_out_flows<S: KvStore + ?Sized>(
    store: &mut S,
    payer: &Address,
    deltas: &[OutFlow],
) -> Result<i64> {
    let mut merged: BTreeMap<Address, Decimal> = BTreeMap::new();
    for delta in deltas {
        *merged.entry(delta.to_address).or_default() += delta.rate;
    }

    let mut updates = Vec::with_capacity(merged.len());
    for (to, delta) in merged {
        let existing = get(store, payer, OutFlowStatus::Active, &to)?;
        let rate = existing.unwrap_or_default() + delta;
        if rate < Decimal::ZERO {
            return Err(Error::NegativeFlowRate {
                from: *payer,
                to,
                rate,
            });
        }
        updates.push((to, existing.is_some(), rate));
    }

    let mut count_delta = 0i64;
    for (to, existed, rate) in updates {
        match (existed, rate.is_zero()) {
            (false, false) => count_delta += 1,
            (true, true) => count_delta -= 1,
            (false, true) => continue,
            (true, false) => {}
        }
        set(store, payer, &OutFlow::active(to, rate))?;
    }
    Ok(count_delta)
}

/// Move every ACTIVE out-flow of `payer` to FROZEN; returns the moved entries
pub fn freeze<S: KvStore + ?Sized>(store: &mut S, payer: &Address) -> Result<Vec<OutFlow>> {
    move_status(store, payer, OutFlowStatus::Active, OutFlowStatus::Frozen)
}

/// Move every FROZEN out-flow of `payer` back to ACTIVE; returns the moved entries
pub fn unfreeze<S: KvStore + ?Sized>(store: &mut S, payer: &Address) -> Result<Vec<OutFlow>> {
    move_status(store, payer, OutFlowStatus::Frozen, OutFlowStatus::Active)
}

fn move_status<S: KvStore + ?Sized>(
    store: &mut S,
    payer: &Address,
    from: OutFlowStatus,
    to: OutFlowStatus,
) -> Result<Vec<OutFlow>> {
    let moved = list(store, payer, from)?;
    for out_flow in &moved {
        store.delete(
            Region::OutFlow,
            &keys::out_flow_key(payer, from, &out_flow.to_address),
        )?;
        let rate = get(store, payer, to, &out_flow.to_address)?.unwrap_or_default() + out_flow.rate;
        set(
            store,
            payer,
            &OutFlow {
                to_address: out_flow.to_address,
                rate,
                status: to,
            },
        )?;
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStore;

    fn addr(b: u8) -> Address {
        Address::new([b; 20])
    }

    #[test]
    fn test_merge_returns_count_delta() {
        let mut store = MemStore::new();
        let payer = addr(1);

        let delta = merge_active_out_flows(
            &mut store,
            &payer,
            &[
                OutFlow::active(addr(2), Decimal::from(10)),
                OutFlow::active(addr(3), Decimal::from(4)),
                OutFlow::active(addr(2), Decimal::from(5)),
            ],
        )
        .unwrap();
        assert_eq!(delta, 2);
        assert_eq!(
            get(&store, &payer, OutFlowStatus::Active, &addr(2)).unwrap(),
            Some(Decimal::from(15))
        );

        let delta = merge_active_out_flows(
            &mut store,
            &payer,
            &[OutFlow::active(addr(3), Decimal::from(-4))],
        )
        .unwrap();
        assert_eq!(delta, -1);
        assert_eq!(active(&store, &payer).unwrap().len(), 1);
    }

    #[test]
    fn test_merge_validates_before_writing() {
        let mut store = MemStore::new();
        let payer = addr(1);
        merge_active_out_flows(&mut store, &payer, &[OutFlow::active(addr(2), Decimal::ONE)])
            .unwrap();

        let err = merge_active_out_flows(
            &mut store,
            &payer,
            &[
                OutFlow::active(addr(2), Decimal::from(7)),
                OutFlow::active(addr(3), Decimal::from(-1)),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, Error::NegativeFlowRate { .. }));
        assert_eq!(
            get(&store, &payer, OutFlowStatus::Active, &addr(2)).unwrap(),
            Some(Decimal::ONE)
        );
    }

    #[test]
    fn test_freeze_and_unfreeze_move_entries() {
        let mut store = MemStore::new();
        let payer = addr(1);
        merge_active_out_flows(
            &mut store,
            &payer,
            &[
                OutFlow::active(addr(2), Decimal::from(3)),
                OutFlow::active(addr(3), Decimal::from(4)),
            ],
        )
        .unwrap();

        let moved = freeze(&mut store, &payer).unwrap();
        assert_eq!(moved.len(), 2);
        assert!(active(&store, &payer).unwrap().is_empty());
        let frozen_rates: Vec<_> = frozen(&store, &payer).unwrap().iter().map(|f| f.rate).collect();
        assert_eq!(frozen_rates, vec![Decimal::from(3), Decimal::from(4)]);

        unfreeze(&mut store, &payer).unwrap();
        assert!(frozen(&store, &payer).unwrap().is_empty());
        assert_eq!(active(&store, &payer).unwrap().len(), 2);
    }
}
