//! Write-buffering overlay over a parent store
//!
//! Every state transition runs against a [`CacheStore`]. Writes stay in the
//! overlay until [`CacheStore::commit`] flushes them to the parent as one
//! atomic batch; dropping the cache discards them. Reads see the overlay
//! first, so a transition observes its own writes.

use crate::error::Result;
use crate::storage::{KeyRange, KvPair, KvStore, Region, ScanOrder, WriteOp};
use std::collections::BTreeMap;

type Overlay = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Transactional overlay
#[derive(Debug)]
pub struct CacheStore<'a, S: KvStore + ?Sized> {
    parent: &'a mut S,
    overlay: BTreeMap<Region, Overlay>,
}

impl<'a, S: KvStore + ?Sized> CacheStore<'a, S> {
    /// Start buffering on top of `parent`
    pub fn new(parent: &'a mut S) -> Self {
        Self {
            parent,
            overlay: BTreeMap::new(),
        }
    }

    /// Number of buffered writes
    pub fn pending(&self) -> usize {
        self.overlay.values().map(BTreeMap::len).sum()
    }

    /// Flush buffered writes to the parent atomically
    pub fn commit(self) -> Result<()> {
        let ops: Vec<WriteOp> = self
            .overlay
            .into_iter()
            .flat_map(|(region, writes)| {
                writes.into_iter().map(move |(key, value)| match value {
                    Some(value) => WriteOp::Put { region, key, value },
                    None => WriteOp::Delete { region, key },
                })
            })
            .collect();

        if ops.is_empty() {
            return Ok(());
        }
        tracing::trace!(writes = ops.len(), "Committing cached writes");
        self.parent.write_batch(ops)
    }

    fn overlay_in_range<'b>(
        &'b self,
        region: Region,
        range: &'b KeyRange,
    ) -> impl Iterator<Item = (&'b Vec<u8>, &'b Option<Vec<u8>>)> + 'b {
        self.overlay
            .get(&region)
            .into_iter()
            .flat_map(|writes| writes.iter())
            .filter(move |(key, _)| range.contains(key))
    }
}

impl<'a, S: KvStore + ?Sized> KvStore for CacheStore<'a, S> {
    fn get(&self, region: Region, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.overlay.get(&region).and_then(|writes| writes.get(key)) {
            Some(value) => Ok(value.clone()),
            None => self.parent.get(region, key),
        }
    }

    fn set(&mut self, region: Region, key: &[u8], value: &[u8]) -> Result<()> {
        self.overlay
            .entry(region)
            .or_default()
            .insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, region: Region, key: &[u8]) -> Result<()> {
        self.overlay
            .entry(region)
            .or_default()
            .insert(key.to_vec(), None);
        Ok(())
    }

    fn scan(
        &self,
        region: Region,
        range: &KeyRange,
        order: ScanOrder,
        limit: Option<usize>,
    ) -> Result<Vec<KvPair>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }

        // Each overlay entry can hide at most one parent entry
        let shadowed = self.overlay_in_range(region, range).count();
        let parent_limit = limit.map(|limit| limit.saturating_add(shadowed));

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .parent
            .scan(region, range, order, parent_limit)?
            .into_iter()
            .collect();

        // A truncated parent scan only covers keys up to its last entry
        let parent_truncated = parent_limit.map_or(false, |l| merged.len() >= l && l > 0);
        let horizon = if parent_truncated {
            match order {
                ScanOrder::Ascending => merged.keys().next_back().cloned(),
                ScanOrder::Descending => merged.keys().next().cloned(),
            }
        } else {
            None
        };

        for (key, value) in self.overlay_in_range(region, range) {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        let within_horizon = |key: &Vec<u8>| match (&horizon, order) {
            (Some(h), ScanOrder::Ascending) => key <= h,
            (Some(h), ScanOrder::Descending) => key >= h,
            (None, _) => true,
        };

        let limit = limit.unwrap_or(usize::MAX);
        let pairs = match order {
            ScanOrder::Ascending => merged
                .into_iter()
                .filter(|(k, _)| within_horizon(k))
                .take(limit)
                .collect(),
            ScanOrder::Descending => merged
                .into_iter()
                .rev()
                .filter(|(k, _)| within_horizon(k))
                .take(limit)
                .collect(),
        };
        Ok(pairs)
    }

    fn write_batch(&mut self, ops: Vec<WriteOp>) -> Result<()> {
        for op in ops {
            match op {
                WriteOp::Put { region, key, value } => self.set(region, &key, &value)?,
                WriteOp::Delete { region, key } => self.delete(region, &key)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStore;

    fn parent() -> MemStore {
        let mut store = MemStore::new();
        for k in [1u8, 3, 5, 7] {
            store.set(Region::AutoSettle, &[k], &[k]).unwrap();
        }
        store
    }

    #[test]
    fn test_reads_see_own_writes() {
        let mut base = parent();
        let mut cache = CacheStore::new(&mut base);
        cache.set(Region::AutoSettle, &[2], &[2]).unwrap();
        cache.delete(Region::AutoSettle, &[3]).unwrap();

        assert_eq!(cache.get(Region::AutoSettle, &[2]).unwrap(), Some(vec![2]));
        assert_eq!(cache.get(Region::AutoSettle, &[3]).unwrap(), None);
        assert_eq!(cache.get(Region::AutoSettle, &[5]).unwrap(), Some(vec![5]));
    }

    #[test]
    fn test_scan_merges_overlay_with_limit() {
        let mut base = parent();
        let mut cache = CacheStore::new(&mut base);
        cache.delete(Region::AutoSettle, &[1]).unwrap();
        cache.delete(Region::AutoSettle, &[3]).unwrap();
        cache.set(Region::AutoSettle, &[6], &[6]).unwrap();

        let keys: Vec<u8> = cache
            .scan(Region::AutoSettle, &KeyRange::all(), ScanOrder::Ascending, Some(2))
            .unwrap()
            .into_iter()
            .map(|(k, _)| k[0])
            .collect();
        assert_eq!(keys, vec![5, 6]);

        let keys: Vec<u8> = cache
            .scan(Region::AutoSettle, &KeyRange::below(vec![7]), ScanOrder::Descending, Some(1))
            .unwrap()
            .into_iter()
            .map(|(k, _)| k[0])
            .collect();
        assert_eq!(keys, vec![6]);
    }

    #[test]
    fn test_drop_discards_and_commit_applies() {
        let mut base = parent();
        {
            let mut cache = CacheStore::new(&mut base);
            cache.delete(Region::AutoSettle, &[1]).unwrap();
        }
        assert_eq!(base.len(Region::AutoSettle), 4);

        let mut cache = CacheStore::new(&mut base);
        cache.delete(Region::AutoSettle, &[1]).unwrap();
        cache.set(Region::Price, &[0], &[1]).unwrap();
        assert_eq!(cache.pending(), 2);
        cache.commit().unwrap();

        assert_eq!(base.len(Region::AutoSettle), 3);
        assert_eq!(base.get(Region::Price, &[0]).unwrap(), Some(vec![1]));
    }

    #[test]
    fn test_nested_caches() {
        let mut base = parent();
        let mut outer = CacheStore::new(&mut base);
        {
            let mut inner = CacheStore::new(&mut outer);
            inner.set(Region::Flow, b"x", b"1").unwrap();
            inner.commit().unwrap();
        }
        assert_eq!(outer.get(Region::Flow, b"x").unwrap(), Some(b"1".to_vec()));
        outer.commit().unwrap();
        assert_eq!(base.get(Region::Flow, b"x").unwrap(), Some(b"1".to_vec()));
    }
}
