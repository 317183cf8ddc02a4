//! Stream record store

use crate::error::Result;
use crate::keys;
use crate::storage::{get_typed, put_typed, KeyRange, KvStore, Region, ScanOrder};
use crate::types::{Address, StreamRecord};

/// Load the record of `account`
pub fn get<S: KvStore + ?Sized>(store: &S, account: &Address) -> Result<Option<StreamRecord>> {
    get_typed(store, Region::StreamRecord, &keys::stream_record_key(account))
}

/// Load the record of `account`, or a zeroed one created at `now`
pub fn get_or_new<S: KvStore + ?Sized>(
    store: &S,
    account: &Address,
    now: i64,
) -> Result<StreamRecord> {
    Ok(get(store, account)?.unwrap_or_else(|| StreamRecord::new(*account, now)))
}

/// Persist a record (full overwrite)
pub fn set<S: KvStore + ?Sized>(store: &mut S, record: &StreamRecord) -> Result<()> {
    put_typed(
        store,
        Region::StreamRecord,
        &keys::stream_record_key(&record.account),
        record,
    )
}

/// Every stored record, ordered by account
pub fn all<S: KvStore + ?Sized>(store: &S) -> Result<Vec<StreamRecord>> {
    store
        .scan(Region::StreamRecord, &KeyRange::all(), ScanOrder::Ascending, None)?
        .into_iter()
        .map(|(_, value)| bincode::deserialize(&value).map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStore;
    use rust_decimal::Decimal;

    #[test]
    fn test_get_or_new_and_overwrite() {
        let mut store = MemStore::new();
        let addr = Address::new([7; 20]);

        let mut record = get_or_new(&store, &addr, 100).unwrap();
        assert_eq!(record.crud_timestamp, 100);
        assert!(get(&store, &addr).unwrap().is_none());

        record.static_balance = Decimal::from(42);
        set(&mut store, &record).unwrap();
        assert_eq!(get(&store, &addr).unwrap(), Some(record.clone()));
        assert_eq!(all(&store).unwrap(), vec![record]);
    }
}
