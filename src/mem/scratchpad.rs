use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::ensure;
use serde::Deserialize;

use crate::base::behavior::*;
use crate::base::mem::{BackingStore, SharedMem};
use crate::base::module::{module, IsModule, ModuleBase};
use crate::info;
use crate::mem::cache::{Cache, CacheConfig, Replacement};
use crate::mem::request::{completion, Completer, MemOp, MemRequest, MemStatus};
use crate::mem::stats::CacheStats;
use crate::sim::config::Config;
use crate::sim::log::Logger;
use crate::timeq::Cycle;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScratchpadConfig {
    pub line_bytes: u64,
    pub num_lines: u64,
    pub ways: u64,
    pub read_latency: Cycle,
    pub write_latency: Cycle,
    pub num_simultaneous_requests: usize,
}

impl Config for ScratchpadConfig {}

impl Default for ScratchpadConfig {
    fn default() -> Self {
        Self {
            line_bytes: 64,
            num_lines: 16384,
            ways: 8,
            read_latency: 1,
            write_latency: 1,
            num_simultaneous_requests: 4,
        }
    }
}

impl ScratchpadConfig {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            line_bytes: self.line_bytes,
            num_lines: self.num_lines,
            ways: self.ways,
            replacement: Replacement::Lru,
            seed: 0,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.num_simultaneous_requests > 0,
            "scratchpad.num_simultaneous_requests must be > 0"
        );
        self.cache_config().validate()
    }
}

pub struct ScratchpadState {
    slots: Vec<Option<MemRequest>>,
    overflow: VecDeque<MemRequest>,
    cache: Cache,
}

/// Per-lane scratch storage: a fixed number of request slots, each holding an
/// access for its port latency before it reaches the private cache.
pub struct Scratchpad {
    base: ModuleBase<ScratchpadState, ScratchpadConfig>,
}

module!(Scratchpad, ScratchpadState, ScratchpadConfig,);

impl Scratchpad {
    pub fn new(name: &str, config: Arc<ScratchpadConfig>, next: SharedMem) -> anyhow::Result<Self> {
        config.validate()?;
        let cache = Cache::new(&format!("{name}.cache"), Arc::new(config.cache_config()), next)?;
        let state = ScratchpadState {
            slots: (0..config.num_simultaneous_requests).map(|_| None).collect(),
            overflow: VecDeque::new(),
            cache,
        };
        let mut pad = Scratchpad {
            base: ModuleBase::named(name, state),
        };
        pad.init_conf(config);
        Ok(pad)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.state().cache.stats()
    }

    pub fn busy_slots(&self) -> usize {
        self.state().slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Discard all scratch contents. Requests still in a slot are a bug;
    /// writebacks already issued to the backing store may still drain.
    pub fn clear(&mut self) {
        let pending = self.busy_slots() + self.state().overflow.len();
        if pending != 0 {
            self.base
                .internal_error(None, format_args!("clear with {} requests in flight", pending));
        }
        self.base.state.cache.invalidate_all();
    }

    fn submit(&mut self, addr: u64, op: MemOp, done: Completer) {
        let latency = match op {
            MemOp::Write => self.conf().write_latency,
            _ => self.conf().read_latency,
        };
        let request = MemRequest::new(addr, op, latency, done);
        let now = self.base.cycle;
        let state = &mut self.base.state;
        match state.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => *slot = Some(admit(request, now)),
            None => state.overflow.push_back(request),
        }
    }
}

fn admit(mut request: MemRequest, now: Cycle) -> MemRequest {
    request.start = now;
    request.status = MemStatus::Active;
    request
}

impl ModuleBehaviors for Scratchpad {
    fn tick_one(&mut self) {
        self.base.cycle += 1;
        let now = self.base.cycle;
        let state = &mut self.base.state;
        state.cache.tick_one();

        for slot in state.slots.iter_mut() {
            let Some(request) = slot.as_mut() else {
                continue;
            };
            if request.status == MemStatus::Active && now >= request.finish_tick() {
                let (inner, done) = completion();
                match request.op {
                    MemOp::Read => state.cache.read(request.addr, done, true),
                    MemOp::Write => state.cache.write(request.addr, done, true),
                    MemOp::Alloc => state.cache.alloc(request.addr, done),
                    MemOp::Prefetch => state.cache.prefetch(request.addr, done),
                }
                request.inner = Some(inner);
                request.status = MemStatus::Processing;
            }
            if request.status == MemStatus::Processing
                && request.inner.as_ref().map_or(false, |inner| inner.is_done())
            {
                if let Some(done) = request.done.take() {
                    done.complete(now);
                }
                *slot = None;
            }
        }

        for slot in state.slots.iter_mut().filter(|slot| slot.is_none()) {
            match state.overflow.pop_front() {
                Some(request) => *slot = Some(admit(request, now)),
                None => break,
            }
        }
    }

    fn reset(&mut self) {
        self.base.state.cache.reset();
    }
}

impl BackingStore for Scratchpad {
    fn read(&mut self, addr: u64, done: Completer, _sequential: bool) {
        self.submit(addr, MemOp::Read, done);
    }

    fn write(&mut self, addr: u64, done: Completer, _sequential: bool) {
        self.submit(addr, MemOp::Write, done);
    }

    fn alloc(&mut self, addr: u64, done: Completer) {
        self.submit(addr, MemOp::Alloc, done);
    }

    fn prefetch(&mut self, addr: u64, done: Completer) {
        self.submit(addr, MemOp::Prefetch, done);
    }

    fn print_stats(&self, logger: &Logger) {
        info!(logger, "{}: busy_slots={} overflow={}", self.name(), self.busy_slots(), self.state().overflow.len());
        self.state().cache.print_stats(logger);
    }

    fn outstanding(&self) -> usize {
        let state = self.state();
        self.busy_slots() + state.overflow.len() + state.cache.outstanding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::dram::{DramConfig, TimedDram};
    use crate::timeq::ServerConfig;
    use std::sync::RwLock;

    fn shared_dram() -> SharedMem {
        let server = ServerConfig {
            base_latency: 4,
            bytes_per_cycle: 64,
            queue_capacity: 8,
        };
        let config = DramConfig {
            read: server,
            write: server,
            line_bytes: 64,
        };
        Arc::new(RwLock::new(TimedDram::new(Arc::new(config)).unwrap()))
    }

    fn pad(slots: usize) -> Scratchpad {
        let config = ScratchpadConfig {
            num_lines: 16,
            ways: 2,
            num_simultaneous_requests: slots,
            ..ScratchpadConfig::default()
        };
        Scratchpad::new("scratch", Arc::new(config), shared_dram()).unwrap()
    }

    #[test]
    fn write_then_read_hits_private_cache() {
        let mut pad = pad(2);
        let (written, done) = completion();
        pad.write(0x80, done, true);
        for _ in 0..3 {
            pad.tick_one();
        }
        assert!(written.is_done());

        let (read, done) = completion();
        pad.read(0x80, done, true);
        pad.tick_one();
        assert_eq!(Some(4), read.done_at());
        assert_eq!(1, pad.cache_stats().hit);
    }

    #[test]
    fn excess_requests_wait_for_a_slot() {
        let mut pad = pad(1);
        let (first, done_a) = completion();
        let (second, done_b) = completion();
        pad.write(0x0, done_a, true);
        pad.write(0x40, done_b, true);
        assert_eq!(1, pad.busy_slots());
        assert_eq!(2, pad.outstanding());
        for _ in 0..8 {
            pad.tick_one();
        }
        assert!(first.is_done());
        assert!(second.is_done());
        assert!(first.done_at() < second.done_at());
        assert_eq!(0, pad.outstanding());
    }

    #[test]
    fn clear_drops_contents() {
        let mut pad = pad(1);
        let (written, done) = completion();
        pad.write(0x100, done, true);
        for _ in 0..3 {
            pad.tick_one();
        }
        assert!(written.is_done());
        pad.clear();
        assert!(!pad.state().cache.contains(0x100));
    }

    #[test]
    fn zero_slots_rejected() {
        let config = ScratchpadConfig {
            num_simultaneous_requests: 0,
            ..ScratchpadConfig::default()
        };
        assert!(Scratchpad::new("scratch", Arc::new(config), shared_dram()).is_err());
    }
}
