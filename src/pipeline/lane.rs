use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use log::debug;
use smallvec::SmallVec;

use crate::base::behavior::*;
use crate::base::mem::{BackingStore, SharedMem};
use crate::graph::{AddressLayout, Graph, GraphApp, Property, VertexId};
use crate::info;
use crate::mem::request::{completion, MemHandle};
use crate::mem::scratchpad::{Scratchpad, ScratchpadConfig};
use crate::mem::stats::CacheStats;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::crossbar::{Crossbar, Packet};
use crate::pipeline::hazard::{ControlAtomicUpdate, HazardStats, HazardTracker};
use crate::pipeline::stage::{Chain, DelayStage, LaneCtx, MemoryStage, StageStats, Stall, WorkItem};
use crate::pipeline::stages::*;
use crate::sim::log::Logger;
use crate::timeq::Cycle;

/// Per-prefetch-vertex completion handles, one per edge-list cache line.
pub type PrefetchSignals = SmallVec<[MemHandle; 2]>;

/// Simulation-wide state a lane reads or updates during one tick.
pub struct LaneEnv<'a> {
    pub now: Cycle,
    pub app: &'a dyn GraphApp,
    pub graph: &'a mut Graph,
    pub layout: &'a AddressLayout,
    pub process: &'a mut VecDeque<VertexId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Process,
    Apply,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Process => "process",
            Phase::Apply => "apply",
        })
    }
}

/// One hardware lane: a Process front end feeding the crossbar, a Process
/// back end receiving updates for the vertices this lane owns, and an Apply
/// path over its own apply queue.
pub struct Lane {
    id: usize,
    cache: SharedMem,
    line_bytes: u64,
    scratchpad: Scratchpad,
    scratch: HashMap<VertexId, Property>,
    hazards: HazardTracker,
    apply: VecDeque<VertexId>,
    front: Chain,
    back: Chain,
    apply_path: Chain,
    armed: Option<Phase>,
    changed: u64,
    logger: Arc<Logger>,
}

impl Lane {
    pub fn new(
        id: usize,
        config: &PipelineConfig,
        scratchpad: Arc<ScratchpadConfig>,
        cache: SharedMem,
        backing: SharedMem,
        line_bytes: u64,
        logger: Arc<Logger>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let name = |stage: &str| format!("lane{id}.{stage}");

        let front = Chain::new(vec![
            Box::new(MemoryStage::new(name("read_src_property"), ReadSrcProperty)),
            Box::new(ReadSrcEdges::new(name("read_src_edges"), line_bytes)),
        ]);
        let back = Chain::new(vec![
            Box::new(ReadDstProperty::new(name("read_dst_property"), config.num_dst_readers)),
            Box::new(DelayStage::new(name("process_edge"), config.process_edge_latency, ProcessEdge)),
            Box::new(ControlAtomicUpdate::new(name("control_atomic_update"))),
            Box::new(MemoryStage::new(name("read_temp_dst_property"), ReadTempDstProperty)),
            Box::new(DelayStage::new(name("reduce"), config.reduce_latency, Reduce)),
            Box::new(MemoryStage::new(name("write_temp_dst_property"), WriteTempDstProperty)),
        ]);
        let apply_path = Chain::new(vec![
            Box::new(MemoryStage::new(name("read_vertex_property"), ReadVertexProperty)),
            Box::new(MemoryStage::new(name("read_temp_vertex_property"), ReadTempVertexProperty)),
            Box::new(DelayStage::new(name("apply"), config.apply_latency, Apply)),
            Box::new(MemoryStage::new(name("write_vertex_property"), WriteVertexProperty)),
        ]);

        Ok(Self {
            id,
            cache,
            line_bytes: line_bytes.max(1),
            scratchpad: Scratchpad::new(&name("scratchpad"), scratchpad, backing)?,
            scratch: HashMap::new(),
            hazards: HazardTracker::new(config.hazard_bound),
            apply: VecDeque::new(),
            front,
            back,
            apply_path,
            armed: None,
            changed: 0,
            logger,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn process_ready(&mut self) {
        debug!("lane{} armed for process", self.id);
        self.armed = Some(Phase::Process);
    }

    pub fn apply_ready(&mut self) {
        self.armed = Some(Phase::Apply);
    }

    pub fn tick_process(&mut self, env: &mut LaneEnv<'_>, crossbar: &mut Crossbar) {
        self.scratchpad.tick_one();
        let now = env.now;
        let Lane {
            id,
            cache,
            scratchpad,
            scratch,
            hazards,
            apply,
            front,
            back,
            armed,
            changed,
            ..
        } = self;
        let mut ctx = LaneCtx {
            now,
            lane: *id,
            app: env.app,
            graph: &mut *env.graph,
            layout: env.layout,
            cache: &*cache,
            scratchpad,
            scratch,
            hazards,
            apply,
            process: &mut *env.process,
            changed,
        };

        // edges leaving the front end go to the lane owning the destination
        let head = front.output().peek().copied();
        if let Some(item) = head {
            let packet = Packet {
                src: *id,
                dst: crossbar.lane_for(item.dst(now)),
                payload: item,
            };
            if crossbar.try_send(packet).is_ok() {
                front.output().take();
            }
        }

        if *armed == Some(Phase::Process) && front.input().is_empty() && front.first_stall() == Stall::CanAccept {
            if let Some(v) = ctx.process.pop_front() {
                front.input().push(WorkItem::for_vertex(v));
            }
        }
        front.tick(&mut ctx, Stall::CanAccept);

        if back.input().is_empty() && back.first_stall() == Stall::CanAccept {
            if let Some(packet) = crossbar.receive(*id) {
                back.input().push(packet.payload);
            }
        }
        back.tick(&mut ctx, Stall::CanAccept);
        back.output().take();

        front.commit(now);
        back.commit(now);
    }

    pub fn tick_apply(&mut self, env: &mut LaneEnv<'_>) {
        self.scratchpad.tick_one();
        let now = env.now;
        let Lane {
            id,
            cache,
            scratchpad,
            scratch,
            hazards,
            apply,
            apply_path,
            armed,
            changed,
            ..
        } = self;
        let mut ctx = LaneCtx {
            now,
            lane: *id,
            app: env.app,
            graph: &mut *env.graph,
            layout: env.layout,
            cache: &*cache,
            scratchpad,
            scratch,
            hazards,
            apply,
            process: &mut *env.process,
            changed,
        };

        if *armed == Some(Phase::Apply)
            && apply_path.input().is_empty()
            && apply_path.first_stall() == Stall::CanAccept
        {
            if let Some(v) = ctx.apply.pop_front() {
                apply_path.input().push(WorkItem::for_vertex(v));
            }
        }
        apply_path.tick(&mut ctx, Stall::CanAccept);
        apply_path.output().take();
        apply_path.commit(now);
    }

    pub fn process_complete(&self) -> bool {
        self.front.is_idle() && self.back.is_idle() && self.hazards.outstanding() == 0
    }

    pub fn apply_complete(&self) -> bool {
        self.apply.is_empty() && self.apply_path.is_idle()
    }

    pub fn apply_size(&self) -> usize {
        self.apply.len()
    }

    /// Collapse duplicate apply entries into one per vertex, in id order.
    pub fn make_apply_unique(&mut self) {
        let mut ids: Vec<VertexId> = self.apply.drain(..).collect();
        ids.sort_unstable();
        ids.dedup();
        self.apply = ids.into();
    }

    pub fn clear_scratchpad(&mut self) {
        self.scratch.clear();
        self.scratchpad.clear();
    }

    /// Prefetch the edge-list lines of `[v_start, v_end)` into the shared
    /// cache. Vertex `v` gets its handles at `signals[offset + (v - v_start)]`.
    pub fn prefetch_edges(
        &mut self,
        graph: &Graph,
        layout: &AddressLayout,
        v_start: VertexId,
        v_end: VertexId,
        signals: &mut [PrefetchSignals],
        offset: usize,
    ) {
        let mut cache = self.cache.write().expect("lock poisoned");
        for v in v_start..v_end {
            let slot = &mut signals[offset + (v - v_start) as usize];
            let range = graph.edge_range(v);
            if range.is_empty() {
                continue;
            }
            let first = layout.edge_addr(range.start as u64) / self.line_bytes;
            let last = layout.edge_addr(range.end as u64 - 1) / self.line_bytes;
            for line in first..=last {
                let (handle, done) = completion();
                cache.prefetch(line * self.line_bytes, done);
                slot.push(handle);
            }
        }
    }

    /// Scratch accumulator for `v`, if an update reached it this iteration.
    pub fn scratch_value(&self, v: VertexId) -> Option<Property> {
        self.scratch.get(&v).copied()
    }

    pub fn changed(&self) -> u64 {
        self.changed
    }

    pub fn edges_processed(&self) -> u64 {
        self.back
            .stage_stats(&format!("lane{}.process_edge", self.id))
            .map_or(0, |stats| stats.items)
    }

    pub fn hazard_stats(&self) -> HazardStats {
        self.hazards.stats()
    }

    pub fn scratchpad_stats(&self) -> CacheStats {
        self.scratchpad.cache_stats()
    }

    pub fn stage_stats(&self) -> Vec<(String, StageStats)> {
        let mut stats = self.front.stats();
        stats.extend(self.back.stats());
        stats.extend(self.apply_path.stats());
        stats
    }

    pub fn clear_stats(&mut self) {
        self.front.clear_stats();
        self.back.clear_stats();
        self.apply_path.clear_stats();
        self.hazards.clear_stats();
        self.scratchpad.reset();
        self.changed = 0;
    }

    pub fn print_stats(&self) {
        let logger = &self.logger;
        for (name, stats) in self.stage_stats() {
            info!(
                logger,
                "{}: items={} idle={} processing={} mem={} output={}",
                name,
                stats.items,
                stats.idle_cycles,
                stats.processing_cycles,
                stats.mem_cycles,
                stats.output_cycles
            );
        }
        let hazards = self.hazard_stats();
        info!(
            logger,
            "lane{}.hazard: passed={} stalled={} stall_cycles={} peak={}",
            self.id,
            hazards.items_directly_passed,
            hazards.items_stalled,
            hazards.stall_cycles,
            hazards.peak_outstanding
        );
        self.scratchpad_stats().print(&format!("lane{}.scratchpad", self.id), logger);
    }
}
