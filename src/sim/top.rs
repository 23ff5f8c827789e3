use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use anyhow::{bail, ensure};
use log::debug;
use toml::Table;

use crate::base::behavior::*;
use crate::base::mem::{BackingStore, SharedMem};
use crate::graph::import::dump_vertex_properties;
use crate::graph::{make_app, AddressLayout, Graph, GraphApp, Requeue, VertexId};
use crate::info;
use crate::mem::cache::{Cache, CacheConfig};
use crate::mem::dram::{DramConfig, TimedDram};
use crate::mem::scratchpad::ScratchpadConfig;
use crate::mem::stats::CacheStats;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::crossbar::{Crossbar, CrossbarConfig};
use crate::pipeline::hazard::HazardStats;
use crate::pipeline::lane::{Lane, LaneEnv, Phase};
use crate::sim::config::{AppKind, Config, SimConfig};
use crate::sim::log::{LogLevel, Logger};
use crate::sim::prefetch::{EdgePrefetcher, PrefetchConfig};
use crate::sim::stats::{IterationSummary, RunSummary};
use crate::timeq::Cycle;

/// Every configuration section of one simulation.
#[derive(Debug, Clone, Default)]
pub struct MachineConfig {
    pub sim: SimConfig,
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
    pub scratchpad: ScratchpadConfig,
    pub dram: DramConfig,
    pub crossbar: CrossbarConfig,
    pub prefetch: PrefetchConfig,
}

impl MachineConfig {
    pub fn from_table(table: &Table) -> anyhow::Result<Self> {
        Ok(Self {
            sim: SimConfig::from_section(table.get("sim"))?,
            pipeline: PipelineConfig::from_section(table.get("pipeline"))?,
            cache: CacheConfig::from_section(table.get("cache"))?,
            scratchpad: ScratchpadConfig::from_section(table.get("scratchpad"))?,
            dram: DramConfig::from_section(table.get("dram"))?,
            crossbar: CrossbarConfig::from_section(table.get("crossbar"))?,
            prefetch: PrefetchConfig::from_section(table.get("prefetch"))?,
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.sim.validate()?;
        self.pipeline.validate()?;
        self.cache.validate()?;
        self.scratchpad.validate()?;
        self.dram.validate()?;
        self.crossbar.validate()?;
        self.prefetch.validate()?;
        ensure!(
            u64::from(self.dram.line_bytes) == self.cache.line_bytes,
            "dram.line_bytes ({}) must match cache.line_bytes ({})",
            self.dram.line_bytes,
            self.cache.line_bytes
        );
        Ok(())
    }
}

/// Top of the accelerator model. Owns the shared cache, DRAM and crossbar;
/// lanes reach the memories through cloned handles.
pub struct Sim {
    config: MachineConfig,
    logger: Arc<Logger>,
    app: Arc<dyn GraphApp>,
    graph: Graph,
    layout: AddressLayout,
    dram: Arc<RwLock<TimedDram>>,
    cache: Arc<RwLock<Cache>>,
    crossbar: Crossbar,
    lanes: Vec<Lane>,
    process: VecDeque<VertexId>,
    prefetcher: EdgePrefetcher,
    tick: Cycle,
    summary: RunSummary,
}

impl Sim {
    pub fn new(config: MachineConfig, graph: Graph, logger: Arc<Logger>) -> anyhow::Result<Self> {
        config.validate()?;
        ensure!(graph.num_vertices() > 0, "graph has no vertices");
        if matches!(config.sim.app, AppKind::Bfs | AppKind::Sssp) {
            ensure!(
                (config.sim.source as usize) < graph.num_vertices(),
                "source vertex {} out of range for {} vertices",
                config.sim.source,
                graph.num_vertices()
            );
        }

        let app = make_app(config.sim.app, config.sim.source);
        let line_bytes = config.cache.line_bytes;
        let layout = AddressLayout::new(&graph, app.vertex_size(), app.edge_size(), line_bytes);

        let dram = Arc::new(RwLock::new(TimedDram::new(Arc::new(config.dram.clone()))?));
        let dram_mem: SharedMem = dram.clone();
        let cache = Arc::new(RwLock::new(Cache::new(
            "cache",
            Arc::new(config.cache.clone()),
            Arc::clone(&dram_mem),
        )?));
        let cache_mem: SharedMem = cache.clone();

        let num_lanes = config.pipeline.num_lanes;
        let crossbar = Crossbar::new(Arc::new(config.crossbar.clone()), num_lanes, graph.num_vertices())?;
        let scratchpad = Arc::new(config.scratchpad.clone());
        let lanes = (0..num_lanes)
            .map(|id| {
                Lane::new(
                    id,
                    &config.pipeline,
                    Arc::clone(&scratchpad),
                    Arc::clone(&cache_mem),
                    Arc::clone(&dram_mem),
                    line_bytes,
                    Arc::clone(&logger),
                )
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let summary = RunSummary {
            app: app.name().to_string(),
            num_vertices: graph.num_vertices(),
            num_edges: graph.num_edges(),
            num_lanes,
            ..RunSummary::default()
        };

        Ok(Sim {
            prefetcher: EdgePrefetcher::new(config.prefetch.clone()),
            config,
            logger,
            app,
            graph,
            layout,
            dram,
            cache,
            crossbar,
            lanes,
            process: VecDeque::new(),
            tick: 0,
            summary,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn now(&self) -> Cycle {
        self.tick
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Shared-cache counters since the start of the current iteration.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.read().expect("lock poisoned").stats()
    }

    /// Run iterations until the process queue drains or the iteration cap
    /// is hit, then report.
    pub fn simulate(&mut self) -> anyhow::Result<RunSummary> {
        let app = Arc::clone(&self.app);
        app.initialize(&mut self.graph, &mut self.process);
        info!(
            self.logger,
            "{}: {} vertices, {} edges, {} lanes",
            app.name(),
            self.graph.num_vertices(),
            self.graph.num_edges(),
            self.lanes.len()
        );

        for iteration in 0..self.config.sim.max_iterations {
            app.do_every_iteration(&mut self.graph, &mut self.process);
            if self.process.is_empty() {
                break;
            }
            let record = self.run_iteration(iteration)?;
            record.print(&self.logger);
            if self.logger.enabled(LogLevel::DEBUG) {
                self.lanes.iter().for_each(Lane::print_stats);
                self.crossbar.print_stats(&self.logger);
            }
            self.summary.record(record);
        }

        self.finish()?;
        Ok(self.summary.clone())
    }

    fn run_iteration(&mut self, iteration: u64) -> anyhow::Result<IterationSummary> {
        for lane in self.lanes.iter_mut() {
            lane.clear_stats();
            lane.clear_scratchpad();
        }
        self.crossbar.clear_stats();
        self.cache.write().expect("lock poisoned").reset();
        debug!("iteration {} starts with {} queued vertices", iteration, self.process.len());

        let process_cycles = self.process_phase(iteration)?;
        let edges_processed: u64 = self.lanes.iter().map(Lane::edges_processed).sum();
        if self.app.unique_apply() {
            self.lanes.iter_mut().for_each(Lane::make_apply_unique);
        }
        let vertices_applied: u64 = self.lanes.iter().map(|lane| lane.apply_size() as u64).sum();

        let apply_cycles = self.apply_phase(iteration)?;
        let vertices_changed: u64 = self.lanes.iter().map(Lane::changed).sum();
        if self.app.requeue() == Requeue::AllOnChange && vertices_changed > 0 {
            self.process.clear();
            self.process.extend(0..self.graph.num_vertices() as VertexId);
        }

        let mut hazard = HazardStats::default();
        let mut scratchpad = CacheStats::default();
        for lane in &self.lanes {
            hazard += lane.hazard_stats();
            scratchpad += lane.scratchpad_stats();
        }
        Ok(IterationSummary {
            iteration,
            process_cycles,
            apply_cycles,
            edges_processed,
            vertices_applied,
            vertices_changed,
            hazard,
            crossbar: self.crossbar.stats(),
            cache: self.cache.read().expect("lock poisoned").stats(),
            scratchpad,
        })
    }

    fn process_phase(&mut self, iteration: u64) -> anyhow::Result<Cycle> {
        let start = self.tick;
        self.prefetcher.begin_iteration(&mut self.lanes, &self.graph, &self.layout);
        let mut armed = false;
        loop {
            if !armed && self.prefetcher.batch_done() {
                self.lanes.iter_mut().for_each(Lane::process_ready);
                armed = true;
            }
            if armed && self.process_done() {
                break;
            }
            self.watchdog(Phase::Process, iteration, start)?;
            self.tick_process();
        }
        Ok(self.tick - start)
    }

    fn apply_phase(&mut self, iteration: u64) -> anyhow::Result<Cycle> {
        let start = self.tick;
        self.lanes.iter_mut().for_each(Lane::apply_ready);
        while !self.apply_done() {
            self.watchdog(Phase::Apply, iteration, start)?;
            self.tick_apply();
        }
        Ok(self.tick - start)
    }

    fn process_done(&self) -> bool {
        self.process.is_empty() && !self.crossbar.busy() && self.lanes.iter().all(Lane::process_complete)
    }

    fn apply_done(&self) -> bool {
        self.lanes.iter().all(Lane::apply_complete) && self.lanes.iter().map(Lane::apply_size).sum::<usize>() == 0
    }

    fn watchdog(&self, phase: Phase, iteration: u64, start: Cycle) -> anyhow::Result<()> {
        if self.tick - start > self.config.sim.timeout {
            bail!(
                "{} phase of iteration {} did not finish within {} cycles (tick {})",
                phase,
                iteration,
                self.config.sim.timeout,
                self.tick
            );
        }
        Ok(())
    }

    fn tick_process(&mut self) {
        self.tick += 1;
        self.crossbar.tick_one();
        self.dram.write().expect("lock poisoned").tick_one();
        self.cache.write().expect("lock poisoned").tick_one();
        self.prefetcher.tick(&mut self.lanes, &self.graph, &self.layout);

        let mut env = LaneEnv {
            now: self.tick,
            app: &*self.app,
            graph: &mut self.graph,
            layout: &self.layout,
            process: &mut self.process,
        };
        for lane in self.lanes.iter_mut() {
            lane.tick_process(&mut env, &mut self.crossbar);
        }
    }

    fn tick_apply(&mut self) {
        self.tick += 1;
        self.dram.write().expect("lock poisoned").tick_one();
        self.cache.write().expect("lock poisoned").tick_one();

        let mut env = LaneEnv {
            now: self.tick,
            app: &*self.app,
            graph: &mut self.graph,
            layout: &self.layout,
            process: &mut self.process,
        };
        for lane in self.lanes.iter_mut() {
            lane.tick_apply(&mut env);
        }
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.summary.total_ticks = self.tick;
        self.summary.prefetch_batches = self.prefetcher.batches();
        self.summary.dram = self.dram.read().expect("lock poisoned").stats();
        self.summary.print(&self.logger);
        self.dram.read().expect("lock poisoned").print_stats(&self.logger);

        if let Some(path) = &self.config.sim.result {
            dump_vertex_properties(&self.graph, path)?;
            info!(self.logger, "vertex properties written to {}", path.display());
        }
        if let Some(path) = &self.config.sim.stats_json {
            self.summary.write_json(path)?;
        }
        self.logger.flush();
        Ok(())
    }
}
