use std::collections::{HashMap, VecDeque};

use smallvec::SmallVec;

use crate::mem::request::{Completer, MemHandle};

#[derive(Debug)]
pub struct MshrEntry {
    pub line_addr: u64,
    /// Still only a prefetch; cleared once a demand access merges in.
    pub prefetch: bool,
    /// A sequential write merged in: install the line dirty.
    pub dirty_on_fill: bool,
    fill: MemHandle,
    pub waiters: SmallVec<[Completer; 4]>,
}

impl MshrEntry {
    pub fn fill_done(&self) -> bool {
        self.fill.is_done()
    }
}

/// Outstanding line fills, keyed by line address. `order` keeps allocation
/// order so the drain picks the oldest completed fill first.
#[derive(Debug, Default)]
pub struct MshrTable {
    entries: HashMap<u64, MshrEntry>,
    order: VecDeque<u64>,
}

impl MshrTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_entry(&self, line_addr: u64) -> bool {
        self.entries.contains_key(&line_addr)
    }

    pub fn get_mut(&mut self, line_addr: u64) -> Option<&mut MshrEntry> {
        self.entries.get_mut(&line_addr)
    }

    /// Returns false if an entry for the line already exists; the caller
    /// should merge instead.
    pub fn allocate(&mut self, line_addr: u64, fill: MemHandle, prefetch: bool) -> bool {
        if self.has_entry(line_addr) {
            return false;
        }
        self.entries.insert(
            line_addr,
            MshrEntry {
                line_addr,
                prefetch,
                dirty_on_fill: false,
                fill,
                waiters: SmallVec::new(),
            },
        );
        self.order.push_back(line_addr);
        true
    }

    /// Attach a waiter to an outstanding fill. Hands the completer back if
    /// there is no entry for the line.
    pub fn merge(&mut self, line_addr: u64, waiter: Completer, demand: bool) -> Result<(), Completer> {
        match self.entries.get_mut(&line_addr) {
            Some(entry) => {
                if demand {
                    entry.prefetch = false;
                }
                entry.waiters.push(waiter);
                Ok(())
            }
            None => Err(waiter),
        }
    }

    /// Remove the oldest entry whose backing-store fill has finished.
    pub fn take_ready(&mut self) -> Option<MshrEntry> {
        let pos = self.order.iter().position(|line| {
            self.entries
                .get(line)
                .map_or(false, |entry| entry.fill_done())
        })?;
        let line = self.order.remove(pos)?;
        self.entries.remove(&line)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::request::completion;

    #[test]
    fn duplicate_allocation_is_refused() {
        let mut mshr = MshrTable::new();
        let (fill, _done) = completion();
        assert!(mshr.allocate(4, fill.clone(), false));
        assert!(!mshr.allocate(4, fill, false));
        assert_eq!(1, mshr.len());
    }

    #[test]
    fn merge_without_entry_returns_waiter() {
        let mut mshr = MshrTable::new();
        let (_, waiter) = completion();
        assert!(mshr.merge(9, waiter, true).is_err());
    }

    #[test]
    fn demand_merge_converts_prefetch() {
        let mut mshr = MshrTable::new();
        let (fill, _done) = completion();
        mshr.allocate(1, fill, true);
        let (_, waiter) = completion();
        mshr.merge(1, waiter, true).unwrap();
        assert!(!mshr.get_mut(1).unwrap().prefetch);
    }

    #[test]
    fn oldest_completed_fill_drains_first() {
        let mut mshr = MshrTable::new();
        let (fill_a, done_a) = completion();
        let (fill_b, done_b) = completion();
        let (fill_c, _done_c) = completion();
        mshr.allocate(10, fill_a, false);
        mshr.allocate(20, fill_b, false);
        mshr.allocate(30, fill_c, false);
        assert!(mshr.take_ready().is_none());

        done_b.complete(5);
        done_a.complete(6);
        assert_eq!(10, mshr.take_ready().unwrap().line_addr);
        assert_eq!(20, mshr.take_ready().unwrap().line_addr);
        assert!(mshr.take_ready().is_none());
        assert_eq!(1, mshr.len());
    }
}
