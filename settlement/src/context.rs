//! Per-transaction execution context

use stream_ledger::{CacheStore, KvStore};

use crate::bank::BankJournal;
use crate::types::{BlockContext, PaymentEvent};

/// Everything a transaction touches before it commits
///
/// Store writes, bank transfers and events all live here until
/// [`Keeper::execute`](crate::Keeper::execute) commits them together.
#[derive(Debug)]
pub struct Context<'a, S: KvStore + ?Sized> {
    /// Buffered ledger store
    pub store: CacheStore<'a, S>,

    /// Block being executed
    pub block: BlockContext,

    /// Journaled bank transfers
    pub bank: BankJournal,

    events: Vec<PaymentEvent>,
}

impl<'a, S: KvStore + ?Sized> Context<'a, S> {
    /// Open a context over `store`
    pub fn new(store: &'a mut S, block: BlockContext) -> Self {
        Self {
            store: CacheStore::new(store),
            block,
            bank: BankJournal::new(),
            events: Vec::new(),
        }
    }

    /// Block time
    pub fn now(&self) -> i64 {
        self.block.time
    }

    /// Queue an event
    pub fn emit(&mut self, event: PaymentEvent) {
        self.events.push(event);
    }

    /// Events queued so far
    pub fn events(&self) -> &[PaymentEvent] {
        &self.events
    }

    /// Split into buffered store, bank journal and events
    pub fn into_parts(self) -> (CacheStore<'a, S>, BankJournal, Vec<PaymentEvent>) {
        (self.store, self.bank, self.events)
    }
}
