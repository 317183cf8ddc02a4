//! Flow store: `(from, to)` payment edges
//!
//! A flow exists only while its merged rate is nonzero. Merging a delta that
//! would leave the rate negative is rejected and nothing is written.

use crate::error::{Error, Result};
use crate::keys;
use crate::storage::{get_typed, put_typed, KeyRange, KvStore, Region, ScanOrder};
use crate::types::{Address, Flow};
use rust_decimal::Decimal;

/// Load one edge
pub fn get<S: KvStore + ?Sized>(store: &S, from: &Address, to: &Address) -> Result<Option<Flow>> {
    get_typed(store, Region::Flow, &keys::flow_key(from, to))
}

/// Overwrite one edge
pub fn set<S: KvStore + ?Sized>(store: &mut S, flow: &Flow) -> Result<()> {
    put_typed(store, Region::Flow, &keys::flow_key(&flow.from, &flow.to), flow)
}

/// Remove one edge
pub fn delete<S: KvStore + ?Sized>(store: &mut S, from: &Address, to: &Address) -> Result<()> {
    store.delete(Region::Flow, &keys::flow_key(from, to))
}

/// Merge a signed rate delta into the `(from, to)` edge
///
/// Returns the stored edge, or `None` when the merged rate is exactly zero
/// and the edge was deleted.
pub fn update<S: KvStore + ?Sized>(store: &mut S, delta: &Flow) -> Result<Option<Flow>> {
    if delta.from == delta.to {
        return Err(Error::SelfFlow(delta.from));
    }

    let existing = get(store, &delta.from, &delta.to)?;
    let (rate, frozen) = match &existing {
        Some(flow) => (flow.rate + delta.rate, flow.frozen),
        None => (delta.rate, delta.frozen),
    };

    if rate < Decimal::ZERO {
        return Err(Error::NegativeFlowRate {
            from: delta.from,
            to: delta.to,
            rate,
        });
    }

    if rate.is_zero() {
        if existing.is_some() {
            delete(store, &delta.from, &delta.to)?;
            tracing::debug!(from = %delta.from, to = %delta.to, "Flow closed");
        }
        return Ok(None);
    }

    let flow = Flow {
        from: delta.from,
        to: delta.to,
        rate,
        frozen,
    };
    set(store, &flow)?;
    tracing::debug!(from = %flow.from, to = %flow.to, rate = %flow.rate, "Flow updated");
    Ok(Some(flow))
}

/// Every edge paid by `from`, ordered by counterparty
pub fn flows_by_from<S: KvStore + ?Sized>(store: &S, from: &Address) -> Result<Vec<Flow>> {
    store
        .scan(
            Region::Flow,
            &KeyRange::prefix(&keys::flow_prefix(from)),
            ScanOrder::Ascending,
            None,
        )?
        .into_iter()
        .map(|(_, value)| bincode::deserialize(&value).map_err(Error::from))
        .collect()
}

/// Mark every unfrozen edge paid by `from` as frozen; returns those edges
pub fn freeze_flows_by_from_user<S: KvStore + ?Sized>(
    store: &mut S,
    from: &Address,
) -> Result<Vec<Flow>> {
    set_frozen(store, from, true)
}

/// Clear the frozen flag on every edge paid by `from`; returns those edges
pub fn unfreeze_flows_by_from_user<S: KvStore + ?Sized>(
    store: &mut S,
    from: &Address,
) -> Result<Vec<Flow>> {
    set_frozen(store, from, false)
}

fn set_frozen<S: KvStore + ?Sized>(store: &mut S, from: &Address, frozen: bool) -> Result<Vec<Flow>> {
    let mut affected = Vec::new();
    for mut flow in flows_by_from(store, from)? {
        if flow.frozen == frozen {
            continue;
        }
        flow.frozen = frozen;
        set(store, &flow)?;
        affected.push(flow);
    }
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStore;

    fn addr(b: u8) -> Address {
        Address::new([b; 20])
    }

    #[test]
    fn test_update_creates_merges_and_deletes() {
        let mut store = MemStore::new();
        let (a, b) = (addr(1), addr(2));

        let flow = update(&mut store, &Flow::new(a, b, Decimal::from(10))).unwrap();
        assert_eq!(flow.map(|f| f.rate), Some(Decimal::from(10)));

        update(&mut store, &Flow::new(a, b, Decimal::from(5))).unwrap();
        assert_eq!(get(&store, &a, &b).unwrap().unwrap().rate, Decimal::from(15));

        assert!(update(&mut store, &Flow::new(a, b, Decimal::from(-15))).unwrap().is_none());
        assert!(get(&store, &a, &b).unwrap().is_none());
    }

    #[test]
    fn test_update_rejects_negative_and_self() {
        let mut store = MemStore::new();
        let (a, b) = (addr(1), addr(2));
        update(&mut store, &Flow::new(a, b, Decimal::from(3))).unwrap();

        let err = update(&mut store, &Flow::new(a, b, Decimal::from(-4))).unwrap_err();
        assert!(matches!(err, Error::NegativeFlowRate { .. }));
        assert_eq!(get(&store, &a, &b).unwrap().unwrap().rate, Decimal::from(3));

        let err = update(&mut store, &Flow::new(a, a, Decimal::ONE)).unwrap_err();
        assert!(matches!(err, Error::SelfFlow(_)));
    }

    #[test]
    fn test_zero_delta_on_missing_edge_is_noop() {
        let mut store = MemStore::new();
        assert!(update(&mut store, &Flow::new(addr(1), addr(2), Decimal::ZERO))
            .unwrap()
            .is_none());
        assert!(store.is_empty(Region::Flow));
    }

    #[test]
    fn test_freeze_returns_only_newly_frozen() {
        let mut store = MemStore::new();
        let payer = addr(1);
        update(&mut store, &Flow::new(payer, addr(2), Decimal::from(1))).unwrap();
        update(&mut store, &Flow::new(payer, addr(3), Decimal::from(2))).unwrap();
        update(&mut store, &Flow::new(addr(4), addr(2), Decimal::from(9))).unwrap();

        let frozen = freeze_flows_by_from_user(&mut store, &payer).unwrap();
        assert_eq!(frozen.len(), 2);
        assert!(frozen.iter().all(|f| f.frozen && f.from == payer));
        assert!(freeze_flows_by_from_user(&mut store, &payer).unwrap().is_empty());
        assert!(!get(&store, &addr(4), &addr(2)).unwrap().unwrap().frozen);

        let thawed = unfreeze_flows_by_from_user(&mut store, &payer).unwrap();
        assert_eq!(thawed.len(), 2);
        assert!(flows_by_from(&store, &payer).unwrap().iter().all(|f| !f.frozen));
    }
}
