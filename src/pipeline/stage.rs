use std::collections::{HashMap, VecDeque};
use std::ops::AddAssign;

use log::trace;
use serde::Serialize;

use crate::base::mem::{BackingStore, SharedMem};
use crate::base::module::internal_error;
use crate::graph::{AddressLayout, EdgeRecord, Graph, GraphApp, Property, VertexId, VertexRecord};
use crate::mem::request::{completion, Completer, MemHandle, MemOp};
use crate::mem::scratchpad::Scratchpad;
use crate::pipeline::hazard::HazardTracker;
use crate::timeq::Cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Stall {
    #[default]
    CanAccept,
    Processing,
    Mem,
    Output,
}

/// Data carried between stages. Process-path items describe one edge;
/// apply-path items describe one vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkItem {
    pub vertex_id: VertexId,
    pub vertex: VertexRecord,
    pub edge: Option<EdgeRecord>,
    pub dst: Option<VertexRecord>,
    pub update: Option<Property>,
    /// Scratch accumulator as read before the reduce.
    pub scratch: Option<Property>,
    pub reduced: Option<Property>,
    pub changed: bool,
}

impl WorkItem {
    pub fn for_vertex(vertex_id: VertexId) -> Self {
        Self {
            vertex_id,
            vertex: VertexRecord {
                edge_list_offset: 0,
                degree: 0,
                prop: Property::default(),
            },
            edge: None,
            dst: None,
            update: None,
            scratch: None,
            reduced: None,
            changed: false,
        }
    }

    pub fn dst(&self, now: Cycle) -> VertexId {
        match self.edge {
            Some(edge) => edge.dst,
            None => internal_error(
                "pipeline",
                now,
                None,
                format_args!("edge update for vertex {} carries no edge", self.vertex_id),
            ),
        }
    }
}

/// One-entry pipeline register. A push lands in `staged` and becomes
/// visible in `ready` only after the lane commits at the end of the cycle.
/// A latch accepts a push only when both slots are empty, and the producer
/// ticks before its consumer drains `ready`, so one latch carries at most one
/// item every other cycle.
#[derive(Debug, Default)]
pub struct Latch {
    staged: Option<WorkItem>,
    ready: Option<WorkItem>,
}

impl Latch {
    pub fn is_empty(&self) -> bool {
        self.staged.is_none() && self.ready.is_none()
    }

    pub fn push(&mut self, item: WorkItem) {
        debug_assert!(self.staged.is_none(), "latch pushed twice in one cycle");
        self.staged = Some(item);
    }

    pub fn peek(&self) -> Option<&WorkItem> {
        self.ready.as_ref()
    }

    pub fn take(&mut self) -> Option<WorkItem> {
        self.ready.take()
    }

    pub fn commit(&mut self, now: Cycle) {
        let Some(item) = self.staged.take() else {
            return;
        };
        if self.ready.is_some() {
            internal_error("latch", now, None, format_args!("overwrote an unconsumed item"));
        }
        self.ready = Some(item);
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StageStats {
    pub items: u64,
    pub idle_cycles: u64,
    pub processing_cycles: u64,
    pub mem_cycles: u64,
    pub output_cycles: u64,
}

impl StageStats {
    fn record(&mut self, stall: Stall) {
        let counter = match stall {
            Stall::CanAccept => &mut self.idle_cycles,
            Stall::Processing => &mut self.processing_cycles,
            Stall::Mem => &mut self.mem_cycles,
            Stall::Output => &mut self.output_cycles,
        };
        *counter = counter.saturating_add(1);
    }
}

impl AddAssign for StageStats {
    fn add_assign(&mut self, rhs: Self) {
        self.items = self.items.saturating_add(rhs.items);
        self.idle_cycles = self.idle_cycles.saturating_add(rhs.idle_cycles);
        self.processing_cycles = self.processing_cycles.saturating_add(rhs.processing_cycles);
        self.mem_cycles = self.mem_cycles.saturating_add(rhs.mem_cycles);
        self.output_cycles = self.output_cycles.saturating_add(rhs.output_cycles);
    }
}

/// Where a stage sends its memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    Cache,
    Scratchpad,
}

#[derive(Debug, Clone, Copy)]
pub struct MemTarget {
    pub store: Store,
    pub op: MemOp,
    pub addr: u64,
    pub sequential: bool,
}

/// Everything a stage may touch during one lane tick.
pub struct LaneCtx<'a> {
    pub now: Cycle,
    pub lane: usize,
    pub app: &'a dyn GraphApp,
    pub graph: &'a mut Graph,
    pub layout: &'a AddressLayout,
    pub cache: &'a SharedMem,
    pub scratchpad: &'a mut Scratchpad,
    pub scratch: &'a mut HashMap<VertexId, Property>,
    pub hazards: &'a mut HazardTracker,
    pub apply: &'a mut VecDeque<VertexId>,
    pub process: &'a mut VecDeque<VertexId>,
    pub changed: &'a mut u64,
}

pub fn dispatch(mem: &mut dyn BackingStore, target: MemTarget, done: Completer) {
    match target.op {
        MemOp::Read => mem.read(target.addr, done, target.sequential),
        MemOp::Write => mem.write(target.addr, done, target.sequential),
        MemOp::Alloc => mem.alloc(target.addr, done),
        MemOp::Prefetch => mem.prefetch(target.addr, done),
    }
}

impl LaneCtx<'_> {
    pub fn issue(&mut self, target: MemTarget) -> MemHandle {
        let (handle, done) = completion();
        match target.store {
            Store::Cache => {
                let mut cache = self.cache.write().expect("lock poisoned");
                dispatch(&mut *cache, target, done);
            }
            Store::Scratchpad => dispatch(&mut *self.scratchpad, target, done),
        }
        handle
    }
}

/// State every stage carries: its published stall signal, statistics and
/// the single outstanding memory request.
#[derive(Debug)]
pub struct StageCore {
    pub name: String,
    pub stall: Stall,
    pub stats: StageStats,
    pending: Option<MemHandle>,
}

impl StageCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stall: Stall::CanAccept,
            stats: StageStats::default(),
            pending: None,
        }
    }

    pub fn has_request(&self) -> bool {
        self.pending.is_some()
    }

    pub fn issue(&mut self, now: Cycle, handle: MemHandle) {
        if self.pending.is_some() {
            internal_error(&self.name, now, None, format_args!("second outstanding memory request"));
        }
        self.pending = Some(handle);
    }

    pub fn mem_done(&self) -> bool {
        self.pending.as_ref().map_or(false, MemHandle::is_done)
    }

    pub fn retire(&mut self, now: Cycle) {
        match self.pending.take() {
            Some(handle) if handle.is_done() => {}
            Some(_) => internal_error(&self.name, now, None, format_args!("retired an unfinished request")),
            None => internal_error(&self.name, now, None, format_args!("completion with no request registered")),
        }
    }

    pub fn can_push(output: &Latch, downstream: Stall) -> bool {
        output.is_empty() && downstream == Stall::CanAccept
    }

    /// Hand `item` downstream, or publish an output stall and give it back.
    pub fn try_push(&mut self, item: WorkItem, output: &mut Latch, downstream: Stall) -> Result<(), WorkItem> {
        if Self::can_push(output, downstream) {
            output.push(item);
            self.stats.items += 1;
            self.stall = Stall::CanAccept;
            Ok(())
        } else {
            self.stall = Stall::Output;
            Err(item)
        }
    }

    /// The item ends its journey in this stage.
    pub fn consume(&mut self) {
        self.stats.items += 1;
        self.stall = Stall::CanAccept;
    }

    pub fn end_tick(&mut self) {
        self.stats.record(self.stall);
    }
}

pub trait Stage {
    fn core(&self) -> &StageCore;

    fn core_mut(&mut self) -> &mut StageCore;

    fn tick(&mut self, ctx: &mut LaneCtx<'_>, input: &mut Latch, output: &mut Latch, downstream: Stall);

    /// Holds no item and no outstanding request.
    fn is_idle(&self) -> bool;

    fn stall(&self) -> Stall {
        self.core().stall
    }

    fn name(&self) -> &str {
        &self.core().name
    }
}

/// Memory side of a generic memory stage.
pub trait MemAccess {
    /// The access for `item`, or `None` to pass it through without memory.
    fn request(&self, ctx: &LaneCtx<'_>, item: &WorkItem) -> Option<MemTarget>;

    /// Effects of the finished access. Returning false consumes the item.
    fn complete(&mut self, ctx: &mut LaneCtx<'_>, item: &mut WorkItem) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemPhase {
    Wait,
    MemWait,
    Output,
}

pub struct MemoryStage<A> {
    core: StageCore,
    access: A,
    phase: MemPhase,
    item: Option<WorkItem>,
}

impl<A: MemAccess> MemoryStage<A> {
    pub fn new(name: impl Into<String>, access: A) -> Self {
        Self {
            core: StageCore::new(name),
            access,
            phase: MemPhase::Wait,
            item: None,
        }
    }

    fn finish(&mut self, ctx: &mut LaneCtx<'_>, mut item: WorkItem) {
        if self.access.complete(ctx, &mut item) {
            self.item = Some(item);
            self.phase = MemPhase::Output;
        } else {
            self.core.consume();
            self.phase = MemPhase::Wait;
        }
    }
}

impl<A: MemAccess> Stage for MemoryStage<A> {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn tick(&mut self, ctx: &mut LaneCtx<'_>, input: &mut Latch, output: &mut Latch, downstream: Stall) {
        let before = self.phase;
        match self.phase {
            MemPhase::Wait => match input.take() {
                Some(item) => match self.access.request(ctx, &item) {
                    Some(target) => {
                        let handle = ctx.issue(target);
                        self.core.issue(ctx.now, handle);
                        self.item = Some(item);
                        self.phase = MemPhase::MemWait;
                        self.core.stall = Stall::Mem;
                    }
                    None => self.finish(ctx, item),
                },
                None => self.core.stall = Stall::CanAccept,
            },
            MemPhase::MemWait => {
                if self.core.mem_done() {
                    self.core.retire(ctx.now);
                    match self.item.take() {
                        Some(item) => self.finish(ctx, item),
                        None => internal_error(&self.core.name, ctx.now, None, format_args!("memory completion without an item")),
                    }
                } else {
                    self.core.stall = Stall::Mem;
                }
            }
            MemPhase::Output => {}
        }

        if self.phase == MemPhase::Output {
            if let Some(item) = self.item.take() {
                match self.core.try_push(item, output, downstream) {
                    Ok(()) => self.phase = MemPhase::Wait,
                    Err(item) => self.item = Some(item),
                }
            }
        }
        if before != self.phase {
            trace!("[{}] tick {} {:?} -> {:?}", self.core.name, ctx.now, before, self.phase);
        }
        self.core.end_tick();
    }

    fn is_idle(&self) -> bool {
        self.phase == MemPhase::Wait && self.item.is_none() && !self.core.has_request()
    }
}

/// Computational side of a generic fixed-delay stage.
pub trait Compute {
    /// Runs when the item is accepted. Returning false drops the item once
    /// the delay has elapsed.
    fn compute(&mut self, ctx: &mut LaneCtx<'_>, item: &mut WorkItem) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DelayPhase {
    Wait,
    Count,
    Output,
}

pub struct DelayStage<C> {
    core: StageCore,
    compute: C,
    latency: Cycle,
    counter: Cycle,
    keep: bool,
    phase: DelayPhase,
    item: Option<WorkItem>,
}

impl<C: Compute> DelayStage<C> {
    pub fn new(name: impl Into<String>, latency: Cycle, compute: C) -> Self {
        Self {
            core: StageCore::new(name),
            compute,
            latency,
            counter: 0,
            keep: true,
            phase: DelayPhase::Wait,
            item: None,
        }
    }
}

impl<C: Compute> Stage for DelayStage<C> {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn tick(&mut self, ctx: &mut LaneCtx<'_>, input: &mut Latch, output: &mut Latch, downstream: Stall) {
        let before = self.phase;
        match self.phase {
            DelayPhase::Wait => match input.take() {
                Some(mut item) => {
                    self.keep = self.compute.compute(ctx, &mut item);
                    self.item = Some(item);
                    self.counter = self.latency;
                    self.phase = DelayPhase::Count;
                    self.core.stall = Stall::Processing;
                }
                None => self.core.stall = Stall::CanAccept,
            },
            DelayPhase::Count => self.counter = self.counter.saturating_sub(1),
            DelayPhase::Output => {}
        }

        if self.phase == DelayPhase::Count && self.counter == 0 {
            if self.keep {
                self.phase = DelayPhase::Output;
            } else {
                self.item = None;
                self.core.consume();
                self.phase = DelayPhase::Wait;
            }
        }
        if self.phase == DelayPhase::Output {
            if let Some(item) = self.item.take() {
                match self.core.try_push(item, output, downstream) {
                    Ok(()) => self.phase = DelayPhase::Wait,
                    Err(item) => self.item = Some(item),
                }
            }
        }
        if before != self.phase {
            trace!("[{}] tick {} {:?} -> {:?}", self.core.name, ctx.now, before, self.phase);
        }
        self.core.end_tick();
    }

    fn is_idle(&self) -> bool {
        self.phase == DelayPhase::Wait && self.item.is_none()
    }
}

/// A linear run of stages joined by latches; `latches[0]` is the chain input
/// and the last latch its output.
pub struct Chain {
    stages: Vec<Box<dyn Stage>>,
    latches: Vec<Latch>,
}

impl Chain {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        let latches = (0..=stages.len()).map(|_| Latch::default()).collect();
        Self { stages, latches }
    }

    pub fn input(&mut self) -> &mut Latch {
        &mut self.latches[0]
    }

    pub fn output(&mut self) -> &mut Latch {
        let last = self.latches.len() - 1;
        &mut self.latches[last]
    }

    pub fn first_stall(&self) -> Stall {
        self.stages.first().map_or(Stall::CanAccept, |stage| stage.stall())
    }

    /// Tick stages upstream to downstream. Each sees its neighbour's stall
    /// as published at the end of the previous cycle; a latch drained this
    /// cycle is refilled on the next one.
    pub fn tick(&mut self, ctx: &mut LaneCtx<'_>, sink: Stall) {
        let n = self.stages.len();
        for i in 0..n {
            let downstream = if i + 1 < n { self.stages[i + 1].stall() } else { sink };
            let (head, tail) = self.latches.split_at_mut(i + 1);
            self.stages[i].tick(ctx, &mut head[i], &mut tail[0], downstream);
        }
    }

    pub fn commit(&mut self, now: Cycle) {
        for latch in self.latches.iter_mut() {
            latch.commit(now);
        }
    }

    pub fn is_idle(&self) -> bool {
        self.stages.iter().all(|stage| stage.is_idle()) && self.latches.iter().all(Latch::is_empty)
    }

    pub fn stats(&self) -> Vec<(String, StageStats)> {
        self.stages
            .iter()
            .map(|stage| (stage.name().to_string(), stage.core().stats))
            .collect()
    }

    pub fn stage_stats(&self, name: &str) -> Option<StageStats> {
        self.stages
            .iter()
            .find(|stage| stage.name() == name)
            .map(|stage| stage.core().stats)
    }

    pub fn clear_stats(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.core_mut().stats = StageStats::default();
        }
    }
}
