//! Auto-settle index: accounts ordered by scheduled settlement time
//!
//! Entries carry no value; the key `timestamp ‖ account` is the record. A
//! timestamp of `0` means "not scheduled" and never has an entry.

use crate::error::Result;
use crate::keys;
use crate::storage::{KeyRange, KvStore, Region, ScanOrder};
use crate::types::{Address, AutoSettleRecord};

/// Insert an entry
pub fn set<S: KvStore + ?Sized>(store: &mut S, record: &AutoSettleRecord) -> Result<()> {
    store.set(
        Region::AutoSettle,
        &keys::auto_settle_key(record.timestamp, &record.addr),
        &[],
    )
}

/// Remove an entry
pub fn remove<S: KvStore + ?Sized>(store: &mut S, timestamp: i64, addr: &Address) -> Result<()> {
    store.delete(Region::AutoSettle, &keys::auto_settle_key(timestamp, addr))
}

/// Whether `(timestamp, addr)` is indexed
pub fn contains<S: KvStore + ?Sized>(store: &S, timestamp: i64, addr: &Address) -> Result<bool> {
    Ok(store
        .get(Region::AutoSettle, &keys::auto_settle_key(timestamp, addr))?
        .is_some())
}

/// Move `addr` from `old_ts` to `new_ts` (either may be `0` for absent)
pub fn replace<S: KvStore + ?Sized>(
    store: &mut S,
    addr: &Address,
    old_ts: i64,
    new_ts: i64,
) -> Result<()> {
    if old_ts == new_ts {
        return Ok(());
    }
    if old_ts != 0 {
        remove(store, old_ts, addr)?;
    }
    if new_ts != 0 {
        set(
            store,
            &AutoSettleRecord {
                timestamp: new_ts,
                addr: *addr,
            },
        )?;
    }
    tracing::debug!(account = %addr, old_ts, new_ts, "Auto-settle entry moved");
    Ok(())
}

/// Entries with `timestamp <= now`, oldest first, at most `limit`
pub fn due<S: KvStore + ?Sized>(store: &S, now: i64, limit: usize) -> Result<Vec<AutoSettleRecord>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let range = KeyRange::below(keys::auto_settle_upper_bound(now));
    scan(store, &range, Some(limit))
}

/// Every entry, oldest first
pub fn all<S: KvStore + ?Sized>(store: &S) -> Result<Vec<AutoSettleRecord>> {
    scan(store, &KeyRange::all(), None)
}

fn scan<S: KvStore + ?Sized>(
    store: &S,
    range: &KeyRange,
    limit: Option<usize>,
) -> Result<Vec<AutoSettleRecord>> {
    store
        .scan(Region::AutoSettle, range, ScanOrder::Ascending, limit)?
        .into_iter()
        .map(|(key, _)| keys::parse_auto_settle_key(&key))
        .collect()
}
