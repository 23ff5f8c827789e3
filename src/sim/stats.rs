use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use crate::info;
use crate::mem::dram::DramStats;
use crate::mem::stats::CacheStats;
use crate::pipeline::crossbar::CrossbarStats;
use crate::pipeline::hazard::HazardStats;
use crate::sim::log::Logger;
use crate::timeq::Cycle;

#[derive(Debug, Clone, Default, Serialize)]
pub struct IterationSummary {
    pub iteration: u64,
    pub process_cycles: Cycle,
    pub apply_cycles: Cycle,
    pub edges_processed: u64,
    pub vertices_applied: u64,
    pub vertices_changed: u64,
    pub hazard: HazardStats,
    pub crossbar: CrossbarStats,
    pub cache: CacheStats,
    pub scratchpad: CacheStats,
}

impl IterationSummary {
    pub fn print(&self, logger: &Logger) {
        info!(
            logger,
            "iteration {}: process_cycles={} apply_cycles={} edges={} applied={} changed={}",
            self.iteration,
            self.process_cycles,
            self.apply_cycles,
            self.edges_processed,
            self.vertices_applied,
            self.vertices_changed
        );
        self.cache.print("cache", logger);
    }
}

/// Whole-run counters, also written as JSON when `sim.stats_json` is set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub app: String,
    pub num_vertices: usize,
    pub num_edges: usize,
    pub num_lanes: usize,
    pub total_ticks: Cycle,
    pub process_cycles: Cycle,
    pub apply_cycles: Cycle,
    pub edges_processed: u64,
    pub prefetch_batches: u64,
    pub cache: CacheStats,
    pub scratchpad: CacheStats,
    pub dram: DramStats,
    pub hazard: HazardStats,
    pub crossbar: CrossbarStats,
    pub iterations: Vec<IterationSummary>,
}

impl RunSummary {
    pub fn num_iterations(&self) -> usize {
        self.iterations.len()
    }

    /// Edges processed per cycle over the whole run.
    pub fn throughput(&self) -> f64 {
        if self.total_ticks == 0 {
            return 0.0;
        }
        self.edges_processed as f64 / self.total_ticks as f64
    }

    pub fn record(&mut self, iteration: IterationSummary) {
        self.process_cycles += iteration.process_cycles;
        self.apply_cycles += iteration.apply_cycles;
        self.edges_processed += iteration.edges_processed;
        self.cache += iteration.cache;
        self.scratchpad += iteration.scratchpad;
        self.hazard += iteration.hazard;
        self.crossbar.packets_routed += iteration.crossbar.packets_routed;
        self.crossbar.contention_cycles += iteration.crossbar.contention_cycles;
        self.crossbar.rejected_sends += iteration.crossbar.rejected_sends;
        self.iterations.push(iteration);
    }

    pub fn print(&self, logger: &Logger) {
        info!(logger, "---------- {} finished ----------", self.app);
        info!(
            logger,
            "vertices={} edges={} lanes={} iterations={}",
            self.num_vertices,
            self.num_edges,
            self.num_lanes,
            self.num_iterations()
        );
        info!(
            logger,
            "total_ticks={} process_cycles={} apply_cycles={}",
            self.total_ticks,
            self.process_cycles,
            self.apply_cycles
        );
        info!(
            logger,
            "edges_processed={} throughput={:.4} edges/cycle",
            self.edges_processed,
            self.throughput()
        );
        self.cache.print("cache", logger);
        self.scratchpad.print("scratchpad", logger);
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path)
            .with_context(|| format!("cannot create stats file {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("cannot write stats to {}", path.display()))?;
        Ok(())
    }
}
