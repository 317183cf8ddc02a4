//! Storage layer
//!
//! Every store is a region of one key-value store. With the `rocksdb`
//! feature each region is a column family:
//!
//! - `stream_records` - Per-account stream state (key: account)
//! - `flows` - Payment edges (key: from || to)
//! - `out_flows` - Payer-scoped flow mirror (key: payer || status || to)
//! - `auto_settle` - Settlement schedule (key: timestamp || account)
//! - `prices` - Oracle price points (key: time)

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::ops::Bound;

/// Key-value pair returned by scans
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Store region (column family)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Region {
    /// Stream records
    StreamRecord,
    /// Flow edges
    Flow,
    /// Out-flow mirror
    OutFlow,
    /// Auto-settle index
    AutoSettle,
    /// Price points
    Price,
}

impl Region {
    /// All regions
    pub const ALL: [Region; 5] = [
        Region::StreamRecord,
        Region::Flow,
        Region::OutFlow,
        Region::AutoSettle,
        Region::Price,
    ];

    /// Column family name
    pub fn name(self) -> &'static str {
        match self {
            Region::StreamRecord => "stream_records",
            Region::Flow => "flows",
            Region::OutFlow => "out_flows",
            Region::AutoSettle => "auto_settle",
            Region::Price => "prices",
        }
    }
}

/// Scan direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    /// Smallest key first
    Ascending,
    /// Largest key first
    Descending,
}

/// Key range `[start, end)`; `None` is unbounded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    /// Inclusive lower bound
    pub start: Option<Vec<u8>>,
    /// Exclusive upper bound
    pub end: Option<Vec<u8>>,
}

impl KeyRange {
    /// Whole region
    pub fn all() -> Self {
        Self::default()
    }

    /// Every key starting with `prefix`
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            start: Some(prefix.to_vec()),
            end: crate::keys::prefix_end(prefix),
        }
    }

    /// Every key strictly below `end`
    pub fn below(end: Vec<u8>) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    /// Whether `key` falls inside the range
    pub fn contains(&self, key: &[u8]) -> bool {
        self.start.as_deref().map_or(true, |start| key >= start)
            && self.end.as_deref().map_or(true, |end| key < end)
    }

    /// Whether no key can fall inside the range
    pub fn is_empty(&self) -> bool {
        matches!((&self.start, &self.end), (Some(start), Some(end)) if start >= end)
    }
}

/// Buffered write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or overwrite
    Put {
        /// Region
        region: Region,
        /// Key
        key: Vec<u8>,
        /// Value
        value: Vec<u8>,
    },
    /// Remove
    Delete {
        /// Region
        region: Region,
        /// Key
        key: Vec<u8>,
    },
}

/// Region-aware key-value store
pub trait KvStore {
    /// Point read
    fn get(&self, region: Region, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite
    fn set(&mut self, region: Region, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove (no-op when absent)
    fn delete(&mut self, region: Region, key: &[u8]) -> Result<()>;

    /// Ordered scan of `range`, returning at most `limit` pairs
    fn scan(
        &self,
        region: Region,
        range: &KeyRange,
        order: ScanOrder,
        limit: Option<usize>,
    ) -> Result<Vec<KvPair>>;

    /// Apply a batch of writes atomically
    fn write_batch(&mut self, ops: Vec<WriteOp>) -> Result<()>;
}

/// In-memory store backed by ordered maps
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    regions: BTreeMap<Region, BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a region
    pub fn len(&self, region: Region) -> usize {
        self.regions.get(&region).map_or(0, BTreeMap::len)
    }

    /// Whether a region is empty
    pub fn is_empty(&self, region: Region) -> bool {
        self.len(region) == 0
    }
}

impl KvStore for MemStore {
    fn get(&self, region: Region, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .regions
            .get(&region)
            .and_then(|map| map.get(key))
            .cloned())
    }

    fn set(&mut self, region: Region, key: &[u8], value: &[u8]) -> Result<()> {
        self.regions
            .entry(region)
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, region: Region, key: &[u8]) -> Result<()> {
        if let Some(map) = self.regions.get_mut(&region) {
            map.remove(key);
        }
        Ok(())
    }

    fn scan(
        &self,
        region: Region,
        range: &KeyRange,
        order: ScanOrder,
        limit: Option<usize>,
    ) -> Result<Vec<KvPair>> {
        let Some(map) = self.regions.get(&region) else {
            return Ok(Vec::new());
        };
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let bounds: (Bound<&[u8]>, Bound<&[u8]>) = (
            range.start.as_deref().map_or(Bound::Unbounded, Bound::Included),
            range.end.as_deref().map_or(Bound::Unbounded, Bound::Excluded),
        );
        let iter = map.range::<[u8], _>(bounds);
        let limit = limit.unwrap_or(usize::MAX);

        let pairs = match order {
            ScanOrder::Ascending => iter
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            ScanOrder::Descending => iter
                .rev()
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
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

/// Read and decode a bincode value
pub(crate) fn get_typed<S, T>(store: &S, region: Region, key: &[u8]) -> Result<Option<T>>
where
    S: KvStore + ?Sized,
    T: serde::de::DeserializeOwned,
{
    store
        .get(region, key)?
        .map(|bytes| bincode::deserialize(&bytes).map_err(Error::from))
        .transpose()
}

/// Encode and write a bincode value
pub(crate) fn put_typed<S, T>(store: &mut S, region: Region, key: &[u8], value: &T) -> Result<()>
where
    S: KvStore + ?Sized,
    T: serde::Serialize,
{
    let bytes = bincode::serialize(value)?;
    store.set(region, key, &bytes)
}

#[cfg(feature = "rocksdb")]
pub use rocks::RocksStore;

#[cfg(feature = "rocksdb")]
mod rocks {
    use super::*;
    use crate::Config;
    use rocksdb::{
        ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
        WriteBatch, DB,
    };

    /// Storage wrapper for RocksDB
    pub struct RocksStore {
        db: DB,
    }

    impl std::fmt::Debug for RocksStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RocksStore")
                .field("path", &self.db.path())
                .finish()
        }
    }

    impl RocksStore {
        /// Open or create database
        pub fn open(config: &Config) -> Result<Self> {
            let path = &config.data_dir;
            std::fs::create_dir_all(path)?;

            let mut db_opts = Options::default();
            db_opts.create_if_missing(true);
            db_opts.create_missing_column_families(true);

            // Tuning from config
            db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
            db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
            db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
            db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
            db_opts.set_level_zero_file_num_compaction_trigger(
                config.rocksdb.level0_file_num_compaction_trigger,
            );
            db_opts.set_compaction_style(DBCompactionStyle::Level);

            if config.rocksdb.enable_statistics {
                db_opts.enable_statistics();
            }

            let cf_descriptors = Region::ALL
                .iter()
                .map(|region| ColumnFamilyDescriptor::new(region.name(), Self::cf_options(*region)))
                .collect::<Vec<_>>();

            let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

            tracing::info!(
                path = ?path,
                column_families = Region::ALL.len(),
                "Opened RocksDB stream store"
            );

            Ok(Self { db })
        }

        fn cf_options(region: Region) -> Options {
            let mut opts = Options::default();
            match region {
                // Point lookups dominate
                Region::StreamRecord | Region::Flow => {
                    opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                    let mut block_opts = rocksdb::BlockBasedOptions::default();
                    block_opts.set_bloom_filter(10.0, false);
                    opts.set_block_based_table_factory(&block_opts);
                }
                Region::OutFlow | Region::AutoSettle => {
                    opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                }
                Region::Price => {
                    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
                }
            }
            opts
        }

        fn cf_handle(&self, region: Region) -> Result<&ColumnFamily> {
            self.db
                .cf_handle(region.name())
                .ok_or_else(|| Error::Storage(format!("Column family {} not found", region.name())))
        }
    }

    impl KvStore for RocksStore {
        fn get(&self, region: Region, key: &[u8]) -> Result<Option<Vec<u8>>> {
            let cf = self.cf_handle(region)?;
            Ok(self.db.get_cf(cf, key)?)
        }

        fn set(&mut self, region: Region, key: &[u8], value: &[u8]) -> Result<()> {
            let cf = self.cf_handle(region)?;
            self.db.put_cf(cf, key, value)?;
            Ok(())
        }

        fn delete(&mut self, region: Region, key: &[u8]) -> Result<()> {
            let cf = self.cf_handle(region)?;
            self.db.delete_cf(cf, key)?;
            Ok(())
        }

        fn scan(
            &self,
            region: Region,
            range: &KeyRange,
            order: ScanOrder,
            limit: Option<usize>,
        ) -> Result<Vec<KvPair>> {
            let cf = self.cf_handle(region)?;
            if range.is_empty() {
                return Ok(Vec::new());
            }
            let limit = limit.unwrap_or(usize::MAX);

            let mode = match (order, &range.start, &range.end) {
                (ScanOrder::Ascending, Some(start), _) => IteratorMode::From(start, Direction::Forward),
                (ScanOrder::Ascending, None, _) => IteratorMode::Start,
                (ScanOrder::Descending, _, Some(end)) => IteratorMode::From(end, Direction::Reverse),
                (ScanOrder::Descending, _, None) => IteratorMode::End,
            };

            let mut pairs = Vec::new();
            for item in self.db.iterator_cf(cf, mode) {
                if pairs.len() >= limit {
                    break;
                }
                let (key, value) = item?;
                let in_range = range.contains(&key);
                match order {
                    ScanOrder::Ascending if !in_range => break,
                    // Reverse seek lands on the exclusive end key itself when present
                    ScanOrder::Descending if range.end.as_deref() == Some(&*key) => continue,
                    ScanOrder::Descending if !in_range => break,
                    _ => pairs.push((key.to_vec(), value.to_vec())),
                }
            }
            Ok(pairs)
        }

        fn write_batch(&mut self, ops: Vec<WriteOp>) -> Result<()> {
            let mut batch = WriteBatch::default();
            for op in ops {
                match op {
                    WriteOp::Put { region, key, value } => {
                        batch.put_cf(self.cf_handle(region)?, key, value)
                    }
                    WriteOp::Delete { region, key } => batch.delete_cf(self.cf_handle(region)?, key),
                }
            }

            // Atomic commit
            self.db.write(batch)?;
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use tempfile::TempDir;

        fn test_store() -> (RocksStore, TempDir) {
            let temp_dir = TempDir::new().unwrap();
            let mut config = Config::default();
            config.data_dir = temp_dir.path().to_path_buf();
            (RocksStore::open(&config).unwrap(), temp_dir)
        }

        #[test]
        fn test_reverse_scan_skips_exclusive_end() {
            let (mut store, _temp) = test_store();
            for k in [1u8, 2, 3] {
                store.set(Region::Price, &[k], &[k]).unwrap();
            }

            let pairs = store
                .scan(Region::Price, &KeyRange::below(vec![3]), ScanOrder::Descending, Some(1))
                .unwrap();
            assert_eq!(pairs, vec![(vec![2], vec![2])]);
        }

        #[test]
        fn test_write_batch_is_applied() {
            let (mut store, _temp) = test_store();
            store
                .write_batch(vec![
                    WriteOp::Put { region: Region::Flow, key: vec![1], value: vec![9] },
                    WriteOp::Put { region: Region::Flow, key: vec![2], value: vec![9] },
                    WriteOp::Delete { region: Region::Flow, key: vec![1] },
                ])
                .unwrap();

            assert_eq!(store.get(Region::Flow, &[1]).unwrap(), None);
            assert_eq!(store.get(Region::Flow, &[2]).unwrap(), Some(vec![9]));
        }
    }
}
