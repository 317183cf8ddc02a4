//! Stream Ledger
//!
//! Leaf stores of the payment stream module: per-account stream records,
//! the `(from, to)` flow graph, its payer-scoped out-flow mirror, the
//! time-ordered auto-settle index and the price oracle series.
//!
//! # Architecture
//!
//! - **One store, many regions**: every store is a region of a single
//!   [`KvStore`] (in-memory or RocksDB column families)
//! - **Transactional overlay**: [`CacheStore`] buffers writes and commits them
//!   as one atomic batch
//! - **Ordered keys**: big-endian timestamps make range scans follow time
//!
//! # Invariants
//!
//! - A flow exists iff its merged rate is nonzero; rates never go negative
//! - Price points are immutable once submitted
//! - Lookups by time never look forward

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod auto_settle;
pub mod cache;
pub mod config;
pub mod error;
pub mod flows;
pub mod keys;
pub mod out_flows;
pub mod prices;
pub mod storage;
pub mod stream_records;
pub mod types;

// Re-exports
pub use cache::CacheStore;
pub use config::Config;
pub use error::{Error, Result};
#[cfg(feature = "rocksdb")]
pub use storage::RocksStore;
pub use storage::{KeyRange, KvStore, MemStore, Region, ScanOrder, WriteOp};
pub use types::{
    Address, AutoSettleRecord, Flow, OutFlow, OutFlowInUsd, OutFlowStatus, Price, PricePoint,
    StreamAccountStatus, StreamRecord, StreamRecordChange, PRICE_PRECISION,
};
