use std::sync::Arc;

use crate::graph::{Graph, Property, VertexId};
use crate::sim::config::AppKind;
use crate::sim::log::Logger;
use crate::sim::top::{MachineConfig, Sim};

fn machine(app: AppKind, num_lanes: usize) -> MachineConfig {
    let mut config = MachineConfig::default();
    config.sim.app = app;
    config.pipeline.num_lanes = num_lanes;
    config.scratchpad.num_lines = 256;
    config.dram.read.base_latency = 20;
    config.dram.write.base_latency = 20;
    config
}

fn sim(config: MachineConfig, graph: Graph) -> Sim {
    Sim::new(config, graph, Arc::new(Logger::silent())).unwrap()
}

fn symmetric(num_vertices: usize, pairs: &[(VertexId, VertexId)]) -> Graph {
    let edges: Vec<(VertexId, VertexId, f64)> = pairs
        .iter()
        .flat_map(|&(a, b)| [(a, b, 1.0), (b, a, 1.0)])
        .collect();
    Graph::from_edges(num_vertices, &edges).unwrap()
}

#[test]
fn bfs_visits_reachable_vertices_in_two_iterations() {
    let graph = Graph::from_edges(4, &[(0, 1, 1.0), (0, 2, 1.0), (1, 2, 1.0)]).unwrap();
    let mut sim = sim(machine(AppKind::Bfs, 1), graph);
    let summary = sim.simulate().unwrap();

    let props: Vec<Property> = sim.graph().vertices.iter().map(|v| v.prop).collect();
    assert_eq!(
        vec![
            Property::Visited(true),
            Property::Visited(true),
            Property::Visited(true),
            Property::Visited(false)
        ],
        props
    );
    assert_eq!(2, summary.num_iterations());
    assert_eq!(2, summary.iterations[0].edges_processed);
    assert_eq!(2, summary.iterations[0].vertices_changed);
    assert_eq!(1, summary.iterations[1].edges_processed);
    assert_eq!(0, summary.iterations[1].vertices_changed);
    assert_eq!(sim.now(), summary.total_ticks);
    assert_eq!(summary.total_ticks, summary.process_cycles + summary.apply_cycles);
}

#[test]
fn shared_cache_accounting_balances_after_a_run() {
    let graph = Graph::from_edges(4, &[(0, 1, 1.0), (0, 2, 1.0), (1, 2, 1.0), (2, 3, 1.0)]).unwrap();
    let mut sim = sim(machine(AppKind::Bfs, 1), graph);
    let summary = sim.simulate().unwrap();
    assert!(summary.cache.is_balanced());
    assert!(summary.scratchpad.is_balanced());
    assert!(summary.cache.accesses() > 0);
}

#[test]
fn connected_components_across_lanes() {
    let graph = symmetric(5, &[(0, 1), (1, 2), (3, 4)]);
    let mut sim = sim(machine(AppKind::Cc, 2), graph);
    let summary = sim.simulate().unwrap();

    let labels: Vec<Property> = sim.graph().vertices.iter().map(|v| v.prop).collect();
    let expected: Vec<Property> = [0, 0, 0, 3, 3].into_iter().map(Property::Component).collect();
    assert_eq!(expected, labels);
    assert!(summary.crossbar.packets_routed > 0);
    assert!(summary.hazard.peak_outstanding <= 1);
    assert_eq!(2, sim.lanes().len());
}

#[test]
fn sssp_finds_shortest_distances() {
    let graph = Graph::from_edges(4, &[(0, 1, 4.0), (0, 2, 1.0), (2, 1, 1.0), (1, 3, 1.0)]).unwrap();
    let mut sim = sim(machine(AppKind::Sssp, 2), graph);
    sim.simulate().unwrap();

    let dist: Vec<Property> = sim.graph().vertices.iter().map(|v| v.prop).collect();
    let expected: Vec<Property> = [0.0, 2.0, 1.0, 3.0].into_iter().map(Property::Distance).collect();
    assert_eq!(expected, dist);
}

#[test]
fn pagerank_on_a_cycle_is_already_converged() {
    let graph = Graph::from_edges(3, &[(0, 1, 1.0), (1, 2, 1.0), (2, 0, 1.0)]).unwrap();
    let mut sim = sim(machine(AppKind::Pr, 1), graph);
    let summary = sim.simulate().unwrap();

    assert_eq!(1, summary.num_iterations());
    assert_eq!(3, summary.iterations[0].vertices_applied);
    for vertex in &sim.graph().vertices {
        match vertex.prop {
            Property::Rank(rank) => assert!((rank - 1.0).abs() < 1e-9),
            other => panic!("unexpected property {other:?}"),
        }
    }
}

#[test]
fn iteration_cap_stops_the_run() {
    let graph = Graph::from_edges(4, &[(0, 1, 1.0), (1, 2, 1.0), (2, 3, 1.0)]).unwrap();
    let mut config = machine(AppKind::Bfs, 1);
    config.sim.max_iterations = 1;
    let mut sim = sim(config, graph);
    let summary = sim.simulate().unwrap();
    assert_eq!(1, summary.num_iterations());
    assert_eq!(Property::Visited(false), sim.graph().vertices[2].prop);
}

#[test]
fn prefetching_streams_batches_without_changing_results() {
    let graph = Graph::from_edges(4, &[(0, 1, 1.0), (0, 2, 1.0), (1, 2, 1.0)]).unwrap();
    let mut config = machine(AppKind::Bfs, 1);
    config.prefetch.enabled = true;
    config.prefetch.batch_size = 2;
    let mut sim = sim(config, graph);
    let summary = sim.simulate().unwrap();

    assert_eq!(2, summary.num_iterations());
    assert_eq!(4, summary.prefetch_batches);
    assert!(summary.cache.prefetch > 0);
    assert_eq!(Property::Visited(true), sim.graph().vertices[2].prop);
}

#[test]
fn watchdog_aborts_a_stuck_phase() {
    let graph = Graph::from_edges(2, &[(0, 1, 1.0)]).unwrap();
    let mut config = machine(AppKind::Bfs, 1);
    config.sim.timeout = 5;
    let mut sim = sim(config, graph);
    let err = sim.simulate().unwrap_err().to_string();
    assert!(err.contains("process phase of iteration 0"), "{err}");
}

#[test]
fn out_of_range_source_is_rejected() {
    let graph = Graph::from_edges(2, &[(0, 1, 1.0)]).unwrap();
    let mut config = machine(AppKind::Bfs, 1);
    config.sim.source = 7;
    assert!(Sim::new(config, graph, Arc::new(Logger::silent())).is_err());
}

#[test]
fn stats_and_result_files_are_written() {
    let dir = std::env::temp_dir().join(format!("gsim-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let graph = Graph::from_edges(3, &[(0, 1, 1.0), (1, 2, 1.0)]).unwrap();
    let mut config = machine(AppKind::Bfs, 1);
    config.sim.result = Some(dir.join("result.txt"));
    config.sim.stats_json = Some(dir.join("stats.json"));
    let mut sim = sim(config, graph);
    sim.simulate().unwrap();

    let result = std::fs::read_to_string(dir.join("result.txt")).unwrap();
    assert_eq!(vec!["0 1", "1 1", "2 1"], result.lines().collect::<Vec<_>>());
    let stats: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("stats.json")).unwrap()).unwrap();
    assert_eq!("bfs", stats["app"]);
    assert_eq!(3, stats["iterations"].as_array().unwrap().len());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn cache_counters_restart_every_iteration() {
    let graph = Graph::from_edges(4, &[(0, 1, 1.0), (1, 2, 1.0), (2, 3, 1.0)]).unwrap();
    let mut sim = sim(machine(AppKind::Bfs, 1), graph);
    let summary = sim.simulate().unwrap();

    assert!(summary.num_iterations() >= 3);
    for iteration in &summary.iterations {
        assert!(iteration.cache.accesses() > 0);
        assert!(iteration.cache.is_balanced());
    }
    let total: u64 = summary.iterations.iter().map(|i| i.cache.accesses()).sum();
    assert_eq!(total, summary.cache.accesses());
    assert!(summary.iterations[0].cache.accesses() < summary.cache.accesses());

    let last = summary.iterations.last().unwrap();
    assert_eq!(last.cache, sim.cache_stats());
}
