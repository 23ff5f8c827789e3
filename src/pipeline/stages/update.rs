use log::trace;

use crate::base::module::internal_error;
use crate::mem::request::MemOp;
use crate::pipeline::stage::{Compute, LaneCtx, MemAccess, MemTarget, Store, WorkItem};

/// Reads the destination's scratch accumulator, if one exists yet.
pub struct ReadTempDstProperty;

impl MemAccess for ReadTempDstProperty {
    fn request(&self, ctx: &LaneCtx<'_>, item: &WorkItem) -> Option<MemTarget> {
        Some(MemTarget {
            store: Store::Scratchpad,
            op: MemOp::Read,
            addr: ctx.layout.scratch_addr(item.dst(ctx.now)),
            sequential: true,
        })
    }

    fn complete(&mut self, ctx: &mut LaneCtx<'_>, item: &mut WorkItem) -> bool {
        item.scratch = ctx.scratch.get(&item.dst(ctx.now)).copied();
        true
    }
}

pub struct Reduce;

impl Compute for Reduce {
    fn compute(&mut self, ctx: &mut LaneCtx<'_>, item: &mut WorkItem) -> bool {
        let Some(update) = item.update else {
            internal_error("reduce", ctx.now, None, format_args!("edge to {} has no update", item.dst(ctx.now)));
        };
        item.reduced = Some(match item.scratch {
            Some(acc) => ctx.app.reduce(acc, update),
            None => update,
        });
        true
    }
}

/// Stores the reduced value, releases the hazard on the destination and
/// queues it for the Apply phase. With a hazard bound above one, an earlier
/// update to the same destination may have landed since the scratch read; the
/// update is then folded into the current accumulator instead.
pub struct WriteTempDstProperty;

impl MemAccess for WriteTempDstProperty {
    fn request(&self, ctx: &LaneCtx<'_>, item: &WorkItem) -> Option<MemTarget> {
        Some(MemTarget {
            store: Store::Scratchpad,
            op: MemOp::Write,
            addr: ctx.layout.scratch_addr(item.dst(ctx.now)),
            sequential: true,
        })
    }

    fn complete(&mut self, ctx: &mut LaneCtx<'_>, item: &mut WorkItem) -> bool {
        let dst = item.dst(ctx.now);
        let (Some(update), Some(reduced)) = (item.update, item.reduced) else {
            internal_error("write_temp_dst", ctx.now, None, format_args!("edge to {} was not reduced", dst));
        };
        let current = ctx.scratch.get(&dst).copied();
        let acc = match current {
            Some(acc) if current != item.scratch => {
                trace!("[lane{}.write_temp_dst] tick {} merging late update into vertex {}", ctx.lane, ctx.now, dst);
                ctx.app.reduce(acc, update)
            }
            _ => reduced,
        };
        ctx.scratch.insert(dst, acc);
        ctx.hazards.signal(dst, ctx.now);
        ctx.apply.push_back(dst);
        false
    }
}
