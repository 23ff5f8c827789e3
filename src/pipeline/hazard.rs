use std::collections::HashMap;
use std::ops::AddAssign;

use log::trace;
use serde::Serialize;

use crate::base::module::internal_error;
use crate::graph::VertexId;
use crate::pipeline::stage::{LaneCtx, Latch, Stage, StageCore, Stall, WorkItem};
use crate::timeq::Cycle;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HazardStats {
    pub items_directly_passed: u64,
    pub items_stalled: u64,
    pub stall_cycles: u64,
    pub peak_outstanding: u32,
}

impl AddAssign for HazardStats {
    fn add_assign(&mut self, rhs: Self) {
        self.items_directly_passed = self.items_directly_passed.saturating_add(rhs.items_directly_passed);
        self.items_stalled = self.items_stalled.saturating_add(rhs.items_stalled);
        self.stall_cycles = self.stall_cycles.saturating_add(rhs.stall_cycles);
        self.peak_outstanding = self.peak_outstanding.max(rhs.peak_outstanding);
    }
}

/// Outstanding scratch updates per destination vertex. Only destinations
/// with an update in flight are tracked.
#[derive(Debug)]
pub struct HazardTracker {
    bound: u32,
    inflight: HashMap<VertexId, u32>,
    stats: HazardStats,
}

impl HazardTracker {
    /// `bound` must be at least one; `PipelineConfig::validate` rejects zero.
    pub fn new(bound: u32) -> Self {
        Self {
            bound,
            inflight: HashMap::new(),
            stats: HazardStats::default(),
        }
    }

    pub fn bound(&self) -> u32 {
        self.bound
    }

    pub fn outstanding_for(&self, dst: VertexId) -> u32 {
        self.inflight.get(&dst).copied().unwrap_or(0)
    }

    pub fn dependency(&self, dst: VertexId) -> bool {
        self.outstanding_for(dst) >= self.bound
    }

    pub fn acquire(&mut self, dst: VertexId, now: Cycle) {
        let count = self.inflight.entry(dst).or_insert(0);
        *count += 1;
        if *count > self.bound {
            internal_error("hazard", now, None, format_args!("vertex {} exceeded bound {}", dst, self.bound));
        }
        self.stats.peak_outstanding = self.stats.peak_outstanding.max(*count);
    }

    pub fn signal(&mut self, dst: VertexId, now: Cycle) {
        match self.inflight.get_mut(&dst) {
            Some(count) => {
                *count -= 1;
                if *count == 0 {
                    self.inflight.remove(&dst);
                }
            }
            None => internal_error(
                "hazard",
                now,
                None,
                format_args!("signal for vertex {} with no outstanding update", dst),
            ),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.inflight.values().map(|&count| count as usize).sum()
    }

    pub fn tracked(&self) -> usize {
        self.inflight.len()
    }

    pub fn stats(&self) -> HazardStats {
        self.stats
    }

    pub fn clear_stats(&mut self) {
        self.stats = HazardStats::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CauPhase {
    Wait,
    Stall,
    Output,
}

/// Holds an edge update until its destination has room under the hazard
/// bound, then records it as in flight. The write-back stage signals the
/// release.
pub struct ControlAtomicUpdate {
    core: StageCore,
    phase: CauPhase,
    item: Option<WorkItem>,
}

impl ControlAtomicUpdate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: StageCore::new(name),
            phase: CauPhase::Wait,
            item: None,
        }
    }
}

impl Stage for ControlAtomicUpdate {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn tick(&mut self, ctx: &mut LaneCtx<'_>, input: &mut Latch, output: &mut Latch, downstream: Stall) {
        let before = self.phase;
        match self.phase {
            CauPhase::Wait => match input.take() {
                Some(item) => {
                    let dst = item.dst(ctx.now);
                    self.item = Some(item);
                    if ctx.hazards.dependency(dst) {
                        ctx.hazards.stats.items_stalled += 1;
                        self.phase = CauPhase::Stall;
                        self.core.stall = Stall::Processing;
                    } else {
                        ctx.hazards.stats.items_directly_passed += 1;
                        ctx.hazards.acquire(dst, ctx.now);
                        self.phase = CauPhase::Output;
                    }
                }
                None => self.core.stall = Stall::CanAccept,
            },
            CauPhase::Stall => {
                let dst = match &self.item {
                    Some(item) => item.dst(ctx.now),
                    None => internal_error(&self.core.name, ctx.now, None, format_args!("stalled without an item")),
                };
                if ctx.hazards.dependency(dst) {
                    ctx.hazards.stats.stall_cycles += 1;
                } else {
                    ctx.hazards.acquire(dst, ctx.now);
                    self.phase = CauPhase::Output;
                }
            }
            CauPhase::Output => {}
        }

        if self.phase == CauPhase::Output {
            if let Some(item) = self.item.take() {
                match self.core.try_push(item, output, downstream) {
                    Ok(()) => self.phase = CauPhase::Wait,
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
        self.phase == CauPhase::Wait && self.item.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_one_blocks_second_update() {
        let mut tracker = HazardTracker::new(1);
        assert!(!tracker.dependency(5));
        tracker.acquire(5, 0);
        assert!(tracker.dependency(5));
        assert!(!tracker.dependency(6));
        tracker.signal(5, 1);
        assert!(!tracker.dependency(5));
        assert_eq!(0, tracker.tracked());
    }

    #[test]
    fn higher_bound_admits_several() {
        let mut tracker = HazardTracker::new(2);
        tracker.acquire(1, 0);
        assert!(!tracker.dependency(1));
        tracker.acquire(1, 0);
        assert!(tracker.dependency(1));
        assert_eq!(2, tracker.outstanding());
        assert_eq!(2, tracker.stats().peak_outstanding);
    }

    #[test]
    #[should_panic(expected = "no outstanding update")]
    fn signal_without_update_is_fatal() {
        let mut tracker = HazardTracker::new(1);
        tracker.signal(3, 7);
    }
}
