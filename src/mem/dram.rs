use std::collections::VecDeque;
use std::ops::AddAssign;
use std::sync::Arc;

use anyhow::ensure;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::base::behavior::*;
use crate::base::mem::BackingStore;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::info;
use crate::mem::request::{Completer, MemOp};
use crate::sim::config::Config;
use crate::sim::log::Logger;
use crate::timeq::{ServerConfig, ServiceRequest, TimedServer};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DramConfig {
    pub read: ServerConfig,
    pub write: ServerConfig,
    /// Transfer size of one access.
    pub line_bytes: u32,
}

impl Config for DramConfig {}

impl Default for DramConfig {
    fn default() -> Self {
        let server = ServerConfig {
            base_latency: 100,
            bytes_per_cycle: 64,
            queue_capacity: 64,
        };
        Self {
            read: server,
            write: server,
            line_bytes: 64,
        }
    }
}

impl DramConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (which, server) in [("read", &self.read), ("write", &self.write)] {
            ensure!(server.bytes_per_cycle > 0, "dram.{which}.bytes_per_cycle must be > 0");
            ensure!(server.queue_capacity > 0, "dram.{which}.queue_capacity must be > 0");
        }
        ensure!(self.line_bytes > 0, "dram.line_bytes must be > 0");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DramStats {
    pub reads: u64,
    pub writes: u64,
    pub prefetches: u64,
    pub allocs: u64,
    pub deferred: u64,
    pub completed: u64,
    pub bytes: u64,
    pub max_pending: u64,
}

impl AddAssign for DramStats {
    fn add_assign(&mut self, rhs: Self) {
        self.reads = self.reads.saturating_add(rhs.reads);
        self.writes = self.writes.saturating_add(rhs.writes);
        self.prefetches = self.prefetches.saturating_add(rhs.prefetches);
        self.allocs = self.allocs.saturating_add(rhs.allocs);
        self.deferred = self.deferred.saturating_add(rhs.deferred);
        self.completed = self.completed.saturating_add(rhs.completed);
        self.bytes = self.bytes.saturating_add(rhs.bytes);
        self.max_pending = self.max_pending.max(rhs.max_pending);
    }
}

#[derive(Debug)]
struct Deferred {
    op: MemOp,
    addr: u64,
    done: Completer,
}

pub struct DramState {
    read_q: TimedServer<Completer>,
    write_q: TimedServer<Completer>,
    pending: VecDeque<Deferred>,
    stats: DramStats,
}

/// Pipelined fixed-latency memory with separate read and write servers.
/// Requests refused by a full server wait in an unbounded pending queue and
/// are retried each cycle in arrival order.
pub struct TimedDram {
    base: ModuleBase<DramState, DramConfig>,
}

module!(TimedDram, DramState, DramConfig,);

impl TimedDram {
    pub fn new(config: Arc<DramConfig>) -> anyhow::Result<Self> {
        config.validate()?;
        let state = DramState {
            read_q: TimedServer::new(config.read),
            write_q: TimedServer::new(config.write),
            pending: VecDeque::new(),
            stats: DramStats::default(),
        };
        let mut dram = TimedDram {
            base: ModuleBase::named("dram", state),
        };
        dram.init_conf(config);
        Ok(dram)
    }

    pub fn stats(&self) -> DramStats {
        self.state().stats
    }

    /// Try the matching server; on backpressure the request is handed back.
    fn try_issue(&mut self, request: Deferred) -> Result<(), Deferred> {
        let now = self.base.cycle;
        let size = self.conf().line_bytes;
        let state = &mut self.base.state;
        let server = match request.op {
            MemOp::Write => &mut state.write_q,
            _ => &mut state.read_q,
        };
        let Deferred { op, addr, done } = request;
        match server.try_enqueue(now, ServiceRequest::new(done, size)) {
            Ok(ticket) => {
                trace!("dram {:?} {:#x} ready at {}", op, addr, ticket.ready_at());
                state.stats.bytes = state.stats.bytes.saturating_add(size as u64);
                Ok(())
            }
            Err(rejected) => Err(Deferred {
                op,
                addr,
                done: rejected.into_request().payload,
            }),
        }
    }

    fn submit(&mut self, op: MemOp, addr: u64, done: Completer) {
        let request = Deferred { op, addr, done };
        // keep arrival order: nothing bypasses an older deferred request
        if !self.base.state.pending.is_empty() {
            self.defer(request);
            return;
        }
        if let Err(request) = self.try_issue(request) {
            self.defer(request);
        }
    }

    fn defer(&mut self, request: Deferred) {
        let state = &mut self.base.state;
        state.stats.deferred = state.stats.deferred.saturating_add(1);
        state.pending.push_back(request);
        state.stats.max_pending = state.stats.max_pending.max(state.pending.len() as u64);
    }

    fn retry_pending(&mut self) {
        while let Some(request) = self.base.state.pending.pop_front() {
            if let Err(request) = self.try_issue(request) {
                self.base.state.pending.push_front(request);
                break;
            }
        }
    }
}

impl ModuleBehaviors for TimedDram {
    fn tick_one(&mut self) {
        self.base.cycle += 1;
        let now = self.base.cycle;
        let state = &mut self.base.state;
        let mut completed = 0u64;
        state.read_q.service_ready(now, |result| {
            result.payload.complete(now);
            completed += 1;
        });
        state.write_q.service_ready(now, |result| {
            result.payload.complete(now);
            completed += 1;
        });
        state.stats.completed = state.stats.completed.saturating_add(completed);
        self.retry_pending();
    }

    fn reset(&mut self) {
        self.base.state.stats = DramStats::default();
    }
}

impl BackingStore for TimedDram {
    fn read(&mut self, addr: u64, done: Completer, _sequential: bool) {
        self.base.state.stats.reads += 1;
        self.submit(MemOp::Read, addr, done);
    }

    fn write(&mut self, addr: u64, done: Completer, _sequential: bool) {
        self.base.state.stats.writes += 1;
        self.submit(MemOp::Write, addr, done);
    }

    fn alloc(&mut self, _addr: u64, done: Completer) {
        // no data moves on allocation
        self.base.state.stats.allocs += 1;
        done.complete(self.base.cycle);
    }

    fn prefetch(&mut self, addr: u64, done: Completer) {
        self.base.state.stats.prefetches += 1;
        self.submit(MemOp::Prefetch, addr, done);
    }

    fn print_stats(&self, logger: &Logger) {
        let stats = &self.state().stats;
        info!(
            logger,
            "{}: reads={} writes={} prefetches={} allocs={} deferred={} completed={} bytes={} max_pending={}",
            self.name(),
            stats.reads,
            stats.writes,
            stats.prefetches,
            stats.allocs,
            stats.deferred,
            stats.completed,
            stats.bytes,
            stats.max_pending
        );
    }

    fn outstanding(&self) -> usize {
        let state = self.state();
        state.read_q.outstanding() + state.write_q.outstanding() + state.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::request::completion;

    fn dram(latency: u64, capacity: usize) -> TimedDram {
        let server = ServerConfig {
            base_latency: latency,
            bytes_per_cycle: 64,
            queue_capacity: capacity,
        };
        TimedDram::new(Arc::new(DramConfig {
            read: server,
            write: server,
            line_bytes: 64,
        }))
        .unwrap()
    }

    #[test]
    fn read_completes_after_slot_and_latency() {
        let mut mem = dram(3, 4);
        let (handle, done) = completion();
        mem.read(0x40, done, true);
        for _ in 0..3 {
            mem.tick_one();
            assert!(!handle.is_done());
        }
        mem.tick_one();
        assert_eq!(Some(4), handle.done_at());
        assert_eq!(0, mem.outstanding());
    }

    #[test]
    fn full_queue_defers_without_dropping() {
        let mut mem = dram(1, 1);
        let (first, done_a) = completion();
        let (second, done_b) = completion();
        mem.read(0, done_a, true);
        mem.read(64, done_b, true);
        assert_eq!(1, mem.stats().deferred);
        assert_eq!(2, mem.outstanding());
        for _ in 0..8 {
            mem.tick_one();
        }
        assert!(first.is_done());
        assert!(second.is_done());
        assert!(first.done_at() < second.done_at());
    }

    #[test]
    fn alloc_is_immediate() {
        let mut mem = dram(10, 1);
        let (handle, done) = completion();
        mem.alloc(0, done);
        assert!(handle.is_done());
    }

    #[test]
    fn zero_bandwidth_refuses_construction() {
        let mut config = DramConfig::default();
        config.write.bytes_per_cycle = 0;
        assert!(TimedDram::new(Arc::new(config)).is_err());
    }
}
