use std::sync::Arc;

use anyhow::ensure;
use log::trace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::base::behavior::*;
use crate::base::mem::{BackingStore, SharedMem};
use crate::base::module::{module, IsModule, ModuleBase};
use crate::mem::mshr::MshrTable;
use crate::mem::request::{completion, Completer, MemHandle};
use crate::mem::stats::CacheStats;
use crate::sim::config::Config;
use crate::sim::log::Logger;
use crate::timeq::Cycle;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Replacement {
    #[default]
    Lru,
    Random,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub line_bytes: u64,
    pub num_lines: u64,
    pub ways: u64,
    pub replacement: Replacement,
    /// Seed for the random replacement policy.
    pub seed: u64,
}

impl Config for CacheConfig {}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            line_bytes: 64,
            num_lines: 1024,
            ways: 8,
            replacement: Replacement::Lru,
            seed: 0,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.line_bytes > 0 && self.num_lines > 0 && self.ways > 0,
            "cache geometry must be non-zero (line_bytes={}, num_lines={}, ways={})",
            self.line_bytes,
            self.num_lines,
            self.ways
        );
        ensure!(
            self.line_bytes.is_power_of_two(),
            "cache line_bytes {} is not a power of two",
            self.line_bytes
        );
        ensure!(self.ways.is_power_of_two(), "cache ways {} is not a power of two", self.ways);
        ensure!(
            self.num_lines % self.ways == 0,
            "cache ways {} do not divide num_lines {}",
            self.ways,
            self.num_lines
        );
        Ok(())
    }

    pub fn num_sets(&self) -> u64 {
        self.num_lines / self.ways
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CacheLine {
    line_addr: u64,
    valid: bool,
    dirty: bool,
    prefetched: bool,
    last_access: Cycle,
}

#[derive(Debug)]
struct TagArray {
    sets: usize,
    lines: Vec<Vec<CacheLine>>,
}

impl TagArray {
    fn new(sets: usize, ways: usize) -> Self {
        let sets = sets.max(1);
        let ways = ways.max(1);
        Self {
            sets,
            lines: vec![vec![CacheLine::default(); ways]; sets],
        }
    }

    fn set_of(&self, line_addr: u64) -> usize {
        (line_addr % self.sets as u64) as usize
    }

    fn lookup(&mut self, line_addr: u64) -> Option<&mut CacheLine> {
        let set = self.set_of(line_addr);
        self.lines[set]
            .iter_mut()
            .find(|line| line.valid && line.line_addr == line_addr)
    }

    fn peek(&self, line_addr: u64) -> Option<&CacheLine> {
        let set = self.set_of(line_addr);
        self.lines[set]
            .iter()
            .find(|line| line.valid && line.line_addr == line_addr)
    }

    /// Invalid ways first, then lines not touched this cycle. `None` when
    /// every way was filled or accessed at `now`.
    fn victim(&self, set: usize, now: Cycle, policy: Replacement, rng: &mut StdRng) -> Option<usize> {
        let ways = &self.lines[set];
        if let Some(way) = ways.iter().position(|line| !line.valid) {
            return Some(way);
        }
        let candidates: Vec<usize> = (0..ways.len())
            .filter(|&way| ways[way].last_access < now)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        match policy {
            Replacement::Lru => candidates
                .into_iter()
                .min_by_key(|&way| ways[way].last_access),
            Replacement::Random => Some(candidates[rng.gen_range(0..candidates.len())]),
        }
    }

    /// Returns the valid line displaced from `way`, if any.
    fn install(&mut self, set: usize, way: usize, line: CacheLine) -> Option<CacheLine> {
        let old = std::mem::replace(&mut self.lines[set][way], line);
        old.valid.then_some(old)
    }

    fn invalidate_all(&mut self) {
        for set in self.lines.iter_mut() {
            for line in set.iter_mut() {
                *line = CacheLine::default();
            }
        }
    }
}

pub struct CacheState {
    tags: TagArray,
    mshr: MshrTable,
    writebacks: Vec<MemHandle>,
    pending_acks: Vec<Completer>,
    stats: CacheStats,
    rng: StdRng,
    line_shift: u32,
}

/// Set-associative write-back cache in front of a shared backing store.
///
/// Sequential accesses allocate; random accesses bypass on a miss. Misses are
/// tracked in an address-indexed MSHR and at most one completed fill is
/// installed per cycle.
pub struct Cache {
    base: ModuleBase<CacheState, CacheConfig>,
    next: SharedMem,
}

module!(Cache, CacheState, CacheConfig,);

impl Cache {
    pub fn new(name: &str, config: Arc<CacheConfig>, next: SharedMem) -> anyhow::Result<Self> {
        config.validate()?;
        let state = CacheState {
            tags: TagArray::new(config.num_sets() as usize, config.ways as usize),
            mshr: MshrTable::new(),
            writebacks: Vec::new(),
            pending_acks: Vec::new(),
            stats: CacheStats::default(),
            rng: StdRng::seed_from_u64(config.seed),
            line_shift: config.line_bytes.trailing_zeros(),
        };
        let mut cache = Cache {
            base: ModuleBase::named(name, state),
            next,
        };
        cache.init_conf(config);
        Ok(cache)
    }

    pub fn stats(&self) -> CacheStats {
        self.state().stats
    }

    pub fn line_addr(&self, addr: u64) -> u64 {
        addr >> self.state().line_shift
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.state().tags.peek(self.line_addr(addr)).is_some()
    }

    pub fn is_dirty(&self, addr: u64) -> bool {
        self.state()
            .tags
            .peek(self.line_addr(addr))
            .map_or(false, |line| line.dirty)
    }

    pub fn is_prefetched(&self, addr: u64) -> bool {
        self.state()
            .tags
            .peek(self.line_addr(addr))
            .map_or(false, |line| line.prefetched)
    }

    pub fn mshr_len(&self) -> usize {
        self.state().mshr.len()
    }

    /// Drop every line without writing back. Only the scratchpad uses this,
    /// its contents are discarded between iterations.
    pub fn invalidate_all(&mut self) {
        self.base.state.tags.invalidate_all();
    }

    fn touch(&mut self, line_addr: u64, demand: bool) -> bool {
        let now = self.base.cycle;
        match self.base.state.tags.lookup(line_addr) {
            Some(line) => {
                line.last_access = now;
                if demand {
                    line.prefetched = false;
                }
                true
            }
            None => false,
        }
    }

    fn issue_fill(&mut self, line_addr: u64, prefetch: bool, waiter: Completer) {
        let (fill, done) = completion();
        let addr = line_addr << self.base.state.line_shift;
        self.base.state.mshr.allocate(line_addr, fill, prefetch);
        if self.base.state.mshr.merge(line_addr, waiter, !prefetch).is_err() {
            self.base
                .internal_error(Some(addr), format_args!("mshr entry vanished after allocation"));
        }
        trace!("{} fill line {:#x} (prefetch={})", self.base.name, addr, prefetch);
        self.next.write().expect("lock poisoned").read(addr, done, true);
    }

    fn write_back(&mut self, line_addr: u64) {
        let (handle, done) = completion();
        let addr = line_addr << self.base.state.line_shift;
        self.base.state.stats.record_writeback();
        self.base.state.writebacks.push(handle);
        self.next.write().expect("lock poisoned").write(addr, done, true);
    }

    /// Place `line_addr` into its set, writing back a dirty victim. Returns
    /// false when no way may be replaced this cycle.
    fn allocate_line(&mut self, line_addr: u64, dirty: bool, prefetched: bool) -> bool {
        let now = self.base.cycle;
        let policy = self.conf().replacement;
        let state = &mut self.base.state;
        let set = state.tags.set_of(line_addr);
        let Some(way) = state.tags.victim(set, now, policy, &mut state.rng) else {
            return false;
        };
        let line = CacheLine {
            line_addr,
            valid: true,
            dirty,
            prefetched,
            last_access: now,
        };
        if let Some(evicted) = state.tags.install(set, way, line) {
            trace!("{} evict line {:#x} (dirty={})", self.base.name, evicted.line_addr, evicted.dirty);
            if evicted.dirty {
                self.write_back(evicted.line_addr);
            }
        }
        true
    }

    fn drain_one_fill(&mut self) {
        let Some(entry) = self.base.state.mshr.take_ready() else {
            return;
        };
        let now = self.base.cycle;
        let line_addr = entry.line_addr;
        if let Some(line) = self.base.state.tags.lookup(line_addr) {
            line.last_access = now;
            line.dirty |= entry.dirty_on_fill;
        } else if !self.allocate_line(line_addr, entry.dirty_on_fill, entry.prefetch) {
            let addr = line_addr << self.base.state.line_shift;
            self.base.internal_error(
                Some(addr),
                format_args!("every way in the set was filled or touched this tick"),
            );
        }
        for waiter in entry.waiters {
            waiter.complete(now);
        }
    }
}

impl ModuleBehaviors for Cache {
    fn tick_one(&mut self) {
        self.base.cycle += 1;
        let now = self.base.cycle;
        for ack in std::mem::take(&mut self.base.state.pending_acks) {
            ack.complete(now);
        }
        self.base.state.writebacks.retain(|handle| !handle.is_done());
        self.drain_one_fill();
    }

    fn reset(&mut self) {
        self.base.state.stats = CacheStats::default();
    }
}

impl BackingStore for Cache {
    fn read(&mut self, addr: u64, done: Completer, sequential: bool) {
        self.base.state.stats.record_access(false, sequential);
        let line_addr = self.line_addr(addr);
        if self.touch(line_addr, true) {
            self.base.state.stats.record_hit();
            done.complete(self.base.cycle);
            return;
        }
        self.base.state.stats.record_miss();
        let done = match self.base.state.mshr.merge(line_addr, done, true) {
            Ok(()) => return,
            Err(done) => done,
        };
        if sequential {
            self.issue_fill(line_addr, false, done);
        } else {
            self.next.write().expect("lock poisoned").read(addr, done, false);
        }
    }

    fn write(&mut self, addr: u64, done: Completer, sequential: bool) {
        self.base.state.stats.record_access(true, sequential);
        let line_addr = self.line_addr(addr);
        if self.touch(line_addr, true) {
            self.base.state.stats.record_hit();
            if sequential {
                if let Some(line) = self.base.state.tags.lookup(line_addr) {
                    line.dirty = true;
                }
            } else {
                self.write_back(line_addr);
            }
            self.base.state.pending_acks.push(done);
            return;
        }
        self.base.state.stats.record_miss();
        if !sequential {
            self.next.write().expect("lock poisoned").write(addr, done, false);
            return;
        }
        if let Some(entry) = self.base.state.mshr.get_mut(line_addr) {
            entry.dirty_on_fill = true;
            entry.prefetch = false;
            entry.waiters.push(done);
            return;
        }
        if self.allocate_line(line_addr, true, false) {
            self.base.state.pending_acks.push(done);
        } else {
            self.next.write().expect("lock poisoned").write(addr, done, true);
        }
    }

    fn alloc(&mut self, addr: u64, done: Completer) {
        self.base.state.stats.record_allocate();
        let line_addr = self.line_addr(addr);
        if self.touch(line_addr, true) {
            self.base.state.pending_acks.push(done);
            return;
        }
        let done = match self.base.state.mshr.merge(line_addr, done, true) {
            Ok(()) => return,
            Err(done) => done,
        };
        // a full set this tick leaves the line unallocated; the next access misses
        self.allocate_line(line_addr, false, false);
        self.base.state.pending_acks.push(done);
    }

    fn prefetch(&mut self, addr: u64, done: Completer) {
        self.base.state.stats.record_prefetch();
        let line_addr = self.line_addr(addr);
        if self.touch(line_addr, false) {
            done.complete(self.base.cycle);
            return;
        }
        let done = match self.base.state.mshr.merge(line_addr, done, false) {
            Ok(()) => return,
            Err(done) => done,
        };
        self.issue_fill(line_addr, true, done);
    }

    fn print_stats(&self, logger: &Logger) {
        self.state().stats.print(self.name(), logger);
    }

    fn outstanding(&self) -> usize {
        let state = self.state();
        state.mshr.len() + state.writebacks.len() + state.pending_acks.len()
    }
}
