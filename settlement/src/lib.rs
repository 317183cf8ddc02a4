//! Stream Settlement
//!
//! Settlement engine for continuous payment streams. Accounts pay each other
//! at per-second rates; the keeper keeps every payer's committed outflow
//! backed by a reserve and force-settles accounts about to run dry.
//!
//! # Architecture
//!
//! The keeper runs inside block execution:
//!
//! 1. **Transactions**: deposits, withdrawals, flow and USD fee changes, each
//!    run through [`Keeper::execute`] and committed all-or-nothing
//! 2. **Settlement core**: every balance change goes through
//!    [`Keeper::update_stream_record`]
//! 3. **End of block**: [`Keeper::end_block`] sweeps due auto-settle entries,
//!    bounded by `max_auto_force_settle_num`
//!
//! # Example
//!
//! ```no_run
//! use rust_decimal::Decimal;
//! use settlement::{mock::{MockAccounts, MockBank}, BlockContext, Config, Keeper};
//! use stream_ledger::{Address, MemStore, OutFlow};
//!
//! fn main() -> settlement::Result<()> {
//!     let (alice, bob) = (Address::new([1; 20]), Address::new([2; 20]));
//!     let mut bank = MockBank::new();
//!     bank.mint(&alice, "BNB", Decimal::from(10_000_000_000i64));
//!
//!     let mut keeper = Keeper::new(&Config::default(), bank, MockAccounts::with([alice]))?;
//!     let mut store = MemStore::new();
//!
//!     let (_, events) = keeper.execute(&mut store, BlockContext::new(1, 0), |k, ctx| {
//!         k.deposit(ctx, &alice, &alice, Decimal::from(1_000_000))?;
//!         k.apply_flow_changes(ctx, &alice, &[OutFlow::active(bob, Decimal::from(100))])
//!     })?;
//!     println!("{} events", events.len());
//!
//!     let (report, _) = keeper.end_block(&mut store, BlockContext::new(2, 6))?;
//!     println!("re-checked {} accounts", report.processed);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod bank;
pub mod config;
pub mod context;
pub mod error;
pub mod flow;
pub mod keeper;
pub mod metrics;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod pricing;
pub mod stream;
pub mod sweep;
pub mod types;
pub mod usd;

// Re-exports
pub use bank::{AccountKeeper, BankError, BankKeeper};
pub use config::{Config, Params};
pub use context::Context;
pub use error::{Error, Result};
pub use keeper::Keeper;
pub use metrics::Metrics;
pub use pricing::{PriceQuoter, StorePrice};
pub use types::*;
