use crate::graph::Requeue;
use crate::mem::request::MemOp;
use crate::pipeline::stage::{Compute, LaneCtx, MemAccess, MemTarget, Store, WorkItem};

pub struct ReadVertexProperty;

impl MemAccess for ReadVertexProperty {
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

pub struct ReadTempVertexProperty;

impl MemAccess for ReadTempVertexProperty {
    fn request(&self, ctx: &LaneCtx<'_>, item: &WorkItem) -> Option<MemTarget> {
        Some(MemTarget {
            store: Store::Scratchpad,
            op: MemOp::Read,
            addr: ctx.layout.scratch_addr(item.vertex_id),
            sequential: true,
        })
    }

    fn complete(&mut self, ctx: &mut LaneCtx<'_>, item: &mut WorkItem) -> bool {
        item.scratch = ctx.scratch.get(&item.vertex_id).copied();
        true
    }
}

pub struct Apply;

impl Compute for Apply {
    fn compute(&mut self, ctx: &mut LaneCtx<'_>, item: &mut WorkItem) -> bool {
        item.changed = match item.scratch {
            Some(acc) => ctx.app.apply(&mut item.vertex, acc),
            None => false,
        };
        true
    }
}

/// Writes the applied vertex back and requeues it when it changed.
pub struct WriteVertexProperty;

impl MemAccess for WriteVertexProperty {
    fn request(&self, ctx: &LaneCtx<'_>, item: &WorkItem) -> Option<MemTarget> {
        Some(MemTarget {
            store: Store::Cache,
            op: MemOp::Write,
            addr: ctx.layout.vertex_addr(item.vertex_id),
            sequential: true,
        })
    }

    fn complete(&mut self, ctx: &mut LaneCtx<'_>, item: &mut WorkItem) -> bool {
        ctx.graph.vertices[item.vertex_id as usize] = item.vertex;
        if item.changed {
            *ctx.changed += 1;
            if ctx.app.requeue() == Requeue::Changed {
                ctx.process.push_back(item.vertex_id);
            }
        }
        false
    }
}
