use log::trace;

use crate::base::module::internal_error;
use crate::mem::request::{MemHandle, MemOp};
use crate::pipeline::arbiter::RoundRobin;
use crate::pipeline::stage::{Compute, LaneCtx, Latch, MemAccess, MemTarget, Stage, StageCore, Stall, Store, WorkItem};

/// Fetches the source vertex record from the shared cache.
pub struct ReadSrcProperty;

impl MemAccess for ReadSrcProperty {
    fn request(&self, ctx: &LaneCtx<'_>, item: &WorkItem) -> Option<MemTarget> {
        Some(MemTarget {
            store: Store::Cache,
            op: MemOp::Read,
            addr: ctx.layout.vertex_addr(item.vertex_id),
            sequential: true,
        })
    }

    fn complete(&mut self, ctx: &mut LaneCtx<'_>, item: &mut WorkItem) -> bool {
        item.vertex = ctx.graph.vertices[item.vertex_id as usize];
        true
    }
}

/// Streams a vertex's out-edges, one per cycle, fetching each cache line of
/// the edge list before emitting the edges it holds.
pub struct ReadSrcEdges {
    core: StageCore,
    src: Option<WorkItem>,
    next_edge: usize,
    end_edge: usize,
    line_bytes: u64,
    fetched_line: Option<u64>,
}

impl ReadSrcEdges {
    pub fn new(name: impl Into<String>, line_bytes: u64) -> Self {
        Self {
            core: StageCore::new(name),
            src: None,
            next_edge: 0,
            end_edge: 0,
            line_bytes: line_bytes.max(1),
            fetched_line: None,
        }
    }

    fn line_of(&self, ctx: &LaneCtx<'_>, edge: usize) -> u64 {
        ctx.layout.edge_addr(edge as u64) / self.line_bytes
    }
}

impl Stage for ReadSrcEdges {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn tick(&mut self, ctx: &mut LaneCtx<'_>, input: &mut Latch, output: &mut Latch, downstream: Stall) {
        if self.src.is_none() {
            match input.take() {
                Some(item) => {
                    let range = ctx.graph.edge_range(item.vertex_id);
                    trace!("[{}] tick {} vertex {} edges {:?}", self.core.name, ctx.now, item.vertex_id, range);
                    self.next_edge = range.start;
                    self.end_edge = range.end;
                    self.fetched_line = None;
                    self.src = Some(item);
                }
                None => {
                    self.core.stall = Stall::CanAccept;
                    self.core.end_tick();
                    return;
                }
            }
        }

        if self.core.has_request() {
            if !self.core.mem_done() {
                self.core.stall = Stall::Mem;
                self.core.end_tick();
                return;
            }
            self.core.retire(ctx.now);
        }

        if let Some(src) = self.src {
            if self.next_edge < self.end_edge {
                let line = self.line_of(ctx, self.next_edge);
                if self.fetched_line != Some(line) {
                    let handle = ctx.issue(MemTarget {
                        store: Store::Cache,
                        op: MemOp::Read,
                        addr: line * self.line_bytes,
                        sequential: true,
                    });
                    self.core.issue(ctx.now, handle);
                    self.fetched_line = Some(line);
                    self.core.stall = Stall::Mem;
                    self.core.end_tick();
                    return;
                }
                let mut item = src;
                item.edge = Some(ctx.graph.edges[self.next_edge]);
                if self.core.try_push(item, output, downstream).is_ok() {
                    self.next_edge += 1;
                }
            }
            if self.next_edge >= self.end_edge {
                self.src = None;
                if self.core.stall != Stall::Output {
                    self.core.stall = Stall::CanAccept;
                }
            } else if self.core.stall != Stall::Output {
                self.core.stall = Stall::Processing;
            }
        }
        self.core.end_tick();
    }

    fn is_idle(&self) -> bool {
        self.src.is_none() && !self.core.has_request()
    }
}

#[derive(Debug, Default)]
struct ReaderSlot {
    item: Option<WorkItem>,
    request: Option<MemHandle>,
}

impl ReaderSlot {
    fn ready(&self) -> bool {
        self.item.is_some() && self.request.as_ref().map_or(true, MemHandle::is_done)
    }
}

/// Several destination-vertex readers behind one port. Incoming edges are
/// allocated to readers round-robin; completed reads leave in allocation
/// order, so edge order is preserved.
pub struct ReadDstProperty {
    core: StageCore,
    readers: Vec<ReaderSlot>,
    allocator: RoundRobin,
    next_out: usize,
}

impl ReadDstProperty {
    pub fn new(name: impl Into<String>, num_readers: usize) -> Self {
        Self {
            core: StageCore::new(name),
            readers: (0..num_readers.max(1)).map(|_| ReaderSlot::default()).collect(),
            allocator: RoundRobin::new(),
            next_out: 0,
        }
    }

    fn busy_readers(&self) -> usize {
        self.readers.iter().filter(|slot| slot.item.is_some()).count()
    }
}

impl Stage for ReadDstProperty {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn tick(&mut self, ctx: &mut LaneCtx<'_>, input: &mut Latch, output: &mut Latch, downstream: Stall) {
        // arbiter: oldest allocation leaves first
        let mut blocked = false;
        let head = &mut self.readers[self.next_out];
        if head.ready() {
            if let Some(mut item) = head.item.take() {
                head.request = None;
                let dst = item.dst(ctx.now);
                if ctx.app.reads_dst_property() {
                    item.dst = Some(ctx.graph.vertices[dst as usize]);
                }
                match self.core.try_push(item, output, downstream) {
                    Ok(()) => self.next_out = (self.next_out + 1) % self.readers.len(),
                    Err(item) => {
                        self.readers[self.next_out].item = Some(item);
                        blocked = true;
                    }
                }
            }
        }

        // allocator: the next reader in rotation takes the incoming edge
        let free: Vec<bool> = self.readers.iter().map(|slot| slot.item.is_none()).collect();
        let cursor = self.allocator.cursor() % self.readers.len();
        if free[cursor] {
            if let Some(item) = input.take() {
                self.allocator.pick(&free);
                let slot = &mut self.readers[cursor];
                if ctx.app.reads_dst_property() {
                    let addr = ctx.layout.vertex_addr(item.dst(ctx.now));
                    slot.request = Some(ctx.issue(MemTarget {
                        store: Store::Cache,
                        op: MemOp::Read,
                        addr,
                        sequential: false,
                    }));
                }
                slot.item = Some(item);
            }
        }

        if self.readers[self.next_out].item.is_none() && self.busy_readers() != 0 {
            internal_error(&self.core.name, ctx.now, None, format_args!("arbiter lost allocation order"));
        }
        self.core.stall = if blocked {
            Stall::Output
        } else if self.readers[self.allocator.cursor() % self.readers.len()].item.is_some() {
            Stall::Mem
        } else {
            Stall::CanAccept
        };
        self.core.end_tick();
    }

    fn is_idle(&self) -> bool {
        self.busy_readers() == 0
    }
}

/// Applies the algorithm's edge function; dropped edges end here.
pub struct ProcessEdge;

impl Compute for ProcessEdge {
    fn compute(&mut self, ctx: &mut LaneCtx<'_>, item: &mut WorkItem) -> bool {
        let Some(edge) = item.edge else {
            internal_error("process_edge", ctx.now, None, format_args!("vertex {} arrived without an edge", item.vertex_id));
        };
        item.update = ctx.app.process_edge(&item.vertex, &edge, item.dst.as_ref());
        item.update.is_some()
    }
}
