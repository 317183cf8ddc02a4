//! Price oracle store: append-only `(time, price)` series

use crate::error::{Error, Result};
use crate::keys;
use crate::storage::{get_typed, put_typed, KeyRange, KvStore, Region, ScanOrder};
use crate::types::PricePoint;

/// Append a price point
///
/// Points are immutable and strictly increasing in time: a second submission
/// for an existing time, a point dated before the latest one and a zero price
/// are all rejected.
pub fn submit<S: KvStore + ?Sized>(store: &mut S, point: PricePoint) -> Result<()> {
    if point.price == 0 || point.time < 0 {
        return Err(Error::InvalidPrice {
            time: point.time,
            price: point.price,
        });
    }
    let key = keys::price_key(point.time);
    if store.get(Region::Price, &key)?.is_some() {
        return Err(Error::DuplicatePrice(point.time));
    }
    if let Some(latest) = latest(store)? {
        if point.time <= latest.time {
            return Err(Error::StalePrice {
                time: point.time,
                latest: latest.time,
            });
        }
    }
    put_typed(store, Region::Price, &key, &point)?;
    tracing::debug!(time = point.time, price = point.price, "Price submitted");
    Ok(())
}

/// Point submitted exactly at `time`
pub fn get<S: KvStore + ?Sized>(store: &S, time: i64) -> Result<Option<PricePoint>> {
    get_typed(store, Region::Price, &keys::price_key(time))
}

/// Most recent point overall
pub fn latest<S: KvStore + ?Sized>(store: &S) -> Result<Option<PricePoint>> {
    store
        .scan(Region::Price, &KeyRange::all(), ScanOrder::Descending, Some(1))?
        .into_iter()
        .next()
        .map(|(_, value)| bincode::deserialize(&value).map_err(Error::from))
        .transpose()
}

/// Latest point with `time <= t`; never looks forward
pub fn latest_at<S: KvStore + ?Sized>(store: &S, t: i64) -> Result<Option<PricePoint>> {
    if t < 0 {
        return Ok(None);
    }
    store
        .scan(
            Region::Price,
            &KeyRange::below(keys::price_upper_bound(t)),
            ScanOrder::Descending,
            Some(1),
        )?
        .into_iter()
        .next()
        .map(|(_, value)| bincode::deserialize(&value).map_err(Error::from))
        .transpose()
}
