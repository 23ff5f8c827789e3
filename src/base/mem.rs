use std::sync::{Arc, RwLock};

use crate::base::behavior::ModuleBehaviors;
use crate::mem::request::Completer;
use crate::sim::log::Logger;

/// Timing-only memory interface shared by the cache, scratchpads and DRAM.
///
/// Every request carries a [`Completer`]; the store fires it exactly once, on
/// the tick the access finishes. Nothing is ever dropped: a store that cannot
/// accept more work queues it internally.
pub trait BackingStore: ModuleBehaviors + Send + Sync {
    fn read(&mut self, addr: u64, done: Completer, sequential: bool);

    fn write(&mut self, addr: u64, done: Completer, sequential: bool);

    fn alloc(&mut self, addr: u64, done: Completer);

    fn prefetch(&mut self, addr: u64, done: Completer);

    fn print_stats(&self, logger: &Logger);

    /// Number of accesses still in flight inside this store.
    fn outstanding(&self) -> usize;
}

pub type SharedMem = Arc<RwLock<dyn BackingStore>>;
