use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use crate::base::behavior::*;
use crate::base::mem::SharedMem;
use crate::graph::bfs::Bfs;
use crate::graph::cc::ConnectedComponents;
use crate::graph::pr::PageRank;
use crate::graph::{AddressLayout, Graph, GraphApp, Property, VertexId};
use crate::mem::cache::{Cache, CacheConfig};
use crate::mem::dram::{DramConfig, TimedDram};
use crate::mem::scratchpad::ScratchpadConfig;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::crossbar::{Crossbar, CrossbarConfig};
use crate::pipeline::lane::{Lane, LaneEnv, PrefetchSignals};
use crate::sim::log::Logger;
use crate::timeq::{Cycle, ServerConfig};

const LIMIT: Cycle = 5_000;

struct Harness {
    app: Arc<dyn GraphApp>,
    graph: Graph,
    layout: AddressLayout,
    dram: Arc<RwLock<TimedDram>>,
    cache: Arc<RwLock<Cache>>,
    crossbar: Crossbar,
    lane: Lane,
    process: VecDeque<VertexId>,
    now: Cycle,
}

impl Harness {
    fn new(app: Arc<dyn GraphApp>, graph: Graph, hazard_bound: u32) -> Self {
        let pipeline = PipelineConfig {
            hazard_bound,
            ..PipelineConfig::default()
        };
        Self::with_pipeline(app, graph, pipeline)
    }

    fn with_pipeline(app: Arc<dyn GraphApp>, mut graph: Graph, pipeline: PipelineConfig) -> Self {
        let server = ServerConfig {
            base_latency: 10,
            bytes_per_cycle: 64,
            queue_capacity: 16,
        };
        let dram_config = DramConfig {
            read: server,
            write: server,
            line_bytes: 64,
        };
        let dram = Arc::new(RwLock::new(TimedDram::new(Arc::new(dram_config)).unwrap()));
        let dram_mem: SharedMem = dram.clone();
        let cache_config = CacheConfig {
            num_lines: 64,
            ways: 4,
            ..CacheConfig::default()
        };
        let cache = Arc::new(RwLock::new(
            Cache::new("cache", Arc::new(cache_config), Arc::clone(&dram_mem)).unwrap(),
        ));
        let cache_mem: SharedMem = cache.clone();
        let scratchpad = ScratchpadConfig {
            num_lines: 64,
            ways: 2,
            ..ScratchpadConfig::default()
        };
        let lane = Lane::new(
            0,
            &pipeline,
            Arc::new(scratchpad),
            cache_mem,
            dram_mem,
            64,
            Arc::new(Logger::silent()),
        )
        .unwrap();
        let crossbar = Crossbar::new(Arc::new(CrossbarConfig::default()), 1, graph.num_vertices()).unwrap();

        let mut process = VecDeque::new();
        app.initialize(&mut graph, &mut process);
        let layout = AddressLayout::new(&graph, app.vertex_size(), app.edge_size(), 64);
        Self {
            app,
            graph,
            layout,
            dram,
            cache,
            crossbar,
            lane,
            process,
            now: 0,
        }
    }

    fn tick_memories(&mut self) {
        self.now += 1;
        self.dram.write().unwrap().tick_one();
        self.cache.write().unwrap().tick_one();
    }

    fn run_process(&mut self) {
        self.lane.process_ready();
        while !(self.process.is_empty() && !self.crossbar.busy() && self.lane.process_complete()) {
            assert!(self.now < LIMIT, "process phase did not drain");
            self.crossbar.tick_one();
            self.tick_memories();
            let mut env = LaneEnv {
                now: self.now,
                app: &*self.app,
                graph: &mut self.graph,
                layout: &self.layout,
                process: &mut self.process,
            };
            self.lane.tick_process(&mut env, &mut self.crossbar);
        }
    }

    fn run_apply(&mut self) {
        self.lane.apply_ready();
        while !self.lane.apply_complete() {
            assert!(self.now < LIMIT, "apply phase did not drain");
            self.tick_memories();
            let mut env = LaneEnv {
                now: self.now,
                app: &*self.app,
                graph: &mut self.graph,
                layout: &self.layout,
                process: &mut self.process,
            };
            self.lane.tick_apply(&mut env);
        }
    }
}

/// Vertices 1..=5 all point at vertex 0.
fn star() -> Graph {
    let edges: Vec<(VertexId, VertexId, f64)> = (1..=5).map(|v| (v, 0, 1.0)).collect();
    Graph::from_edges(6, &edges).unwrap()
}

#[test]
fn updates_to_one_vertex_never_exceed_the_bound() {
    let mut h = Harness::new(Arc::new(ConnectedComponents), star(), 1);
    h.run_process();
    let hazards = h.lane.hazard_stats();
    assert_eq!(1, hazards.peak_outstanding);
    assert!(hazards.items_stalled > 0);
    assert_eq!(5, hazards.items_directly_passed + hazards.items_stalled);
    assert_eq!(5, h.lane.edges_processed());
    assert_eq!(5, h.lane.apply_size());
}

#[test]
fn wider_bound_admits_overlapping_updates() {
    let mut h = Harness::new(Arc::new(ConnectedComponents), star(), 2);
    h.run_process();
    assert!(h.lane.hazard_stats().peak_outstanding <= 2);
    assert_eq!(5, h.lane.apply_size());
    assert_eq!(Some(Property::Component(1)), h.lane.scratch_value(0));
}

fn rank_sum_into_hub(hazard_bound: u32) -> (Option<Property>, u32) {
    // eight degree-1 sources each contribute rank 1.0 to vertex 0
    let edges: Vec<(VertexId, VertexId, f64)> = (1..=8).map(|v| (v, 0, 1.0)).collect();
    let graph = Graph::from_edges(9, &edges).unwrap();
    let pipeline = PipelineConfig {
        hazard_bound,
        reduce_latency: 6,
        ..PipelineConfig::default()
    };
    let mut h = Harness::with_pipeline(Arc::new(PageRank::default()), graph, pipeline);
    h.run_process();
    (h.lane.scratch_value(0), h.lane.hazard_stats().peak_outstanding)
}

#[test]
fn overlapping_updates_to_one_vertex_all_reduce() {
    let (serial, serial_peak) = rank_sum_into_hub(1);
    let (overlapped, overlapped_peak) = rank_sum_into_hub(2);
    assert_eq!(1, serial_peak);
    assert_eq!(2, overlapped_peak);
    assert_eq!(Some(Property::Rank(8.0)), serial);
    assert_eq!(Some(Property::Rank(8.0)), overlapped);
}

#[test]
fn make_apply_unique_is_idempotent() {
    let mut h = Harness::new(Arc::new(ConnectedComponents), star(), 1);
    h.run_process();
    h.lane.make_apply_unique();
    assert_eq!(1, h.lane.apply_size());
    h.lane.make_apply_unique();
    assert_eq!(1, h.lane.apply_size());
}

#[test]
fn apply_writes_back_and_requeues_changed_vertices() {
    let graph = Graph::from_edges(3, &[(0, 1, 1.0), (1, 2, 1.0)]).unwrap();
    let mut h = Harness::new(Arc::new(Bfs::new(0)), graph, 1);
    h.run_process();
    assert!(h.process.is_empty());
    assert_eq!(1, h.lane.apply_size());

    h.run_apply();
    assert_eq!(Property::Visited(true), h.graph.vertices[1].prop);
    assert_eq!(Property::Visited(false), h.graph.vertices[2].prop);
    assert_eq!(1, h.lane.changed());
    assert_eq!(vec![1], h.process.iter().copied().collect::<Vec<_>>());
}

#[test]
fn prefetch_covers_every_edge_line() {
    // 20 edges out of vertex 0 span three 64-byte lines
    let edges: Vec<(VertexId, VertexId, f64)> = (1..=20).map(|v| (0, v, 1.0)).collect();
    let graph = Graph::from_edges(21, &edges).unwrap();
    let mut h = Harness::new(Arc::new(Bfs::new(0)), graph, 1);
    let mut signals = vec![PrefetchSignals::new(); 4];
    h.lane.prefetch_edges(&h.graph, &h.layout, 0, 2, &mut signals, 2);
    assert!(signals[0].is_empty() && signals[1].is_empty());
    assert_eq!(3, signals[2].len());
    assert!(signals[3].is_empty());

    for _ in 0..40 {
        h.tick_memories();
    }
    assert!(signals.iter().flatten().all(|handle| handle.is_done()));
    let cache = h.cache.read().unwrap();
    assert!(cache.is_prefetched(h.layout.edge_addr(0)));
    assert!(cache.is_prefetched(h.layout.edge_addr(19)));
}
