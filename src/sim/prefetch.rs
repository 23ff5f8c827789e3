use anyhow::ensure;
use log::debug;
use serde::Deserialize;

use crate::graph::{AddressLayout, Graph};
use crate::pipeline::lane::{Lane, PrefetchSignals};
use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PrefetchConfig {
    pub enabled: bool,
    /// Vertices whose edge lists are prefetched per batch.
    pub batch_size: u64,
}

impl Config for PrefetchConfig {}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: 1024,
        }
    }
}

impl PrefetchConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.batch_size > 0, "prefetch.batch_size must be > 0");
        Ok(())
    }
}

/// Streams edge lists into the shared cache ahead of the Process phase, one
/// batch of vertices at a time. A batch is split evenly over the lanes and
/// the next one starts once every line of the current batch has arrived.
pub struct EdgePrefetcher {
    config: PrefetchConfig,
    next_vertex: u64,
    signals: Vec<PrefetchSignals>,
    batches: u64,
}

impl EdgePrefetcher {
    pub fn new(config: PrefetchConfig) -> Self {
        Self {
            config,
            next_vertex: 0,
            signals: Vec::new(),
            batches: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Restart from vertex 0 and issue the first batch.
    pub fn begin_iteration(&mut self, lanes: &mut [Lane], graph: &Graph, layout: &AddressLayout) {
        self.next_vertex = 0;
        self.signals.clear();
        if self.enabled() {
            self.issue_batch(lanes, graph, layout);
        }
    }

    /// Every line of the batch in flight has been filled.
    pub fn batch_done(&self) -> bool {
        self.signals.iter().flatten().all(|handle| handle.is_done())
    }

    pub fn tick(&mut self, lanes: &mut [Lane], graph: &Graph, layout: &AddressLayout) {
        if self.enabled() && self.batch_done() && self.next_vertex < graph.num_vertices() as u64 {
            self.issue_batch(lanes, graph, layout);
        }
    }

    fn issue_batch(&mut self, lanes: &mut [Lane], graph: &Graph, layout: &AddressLayout) {
        let start = self.next_vertex;
        let end = (start + self.config.batch_size).min(graph.num_vertices() as u64);
        self.signals.clear();
        self.signals.resize((end - start) as usize, PrefetchSignals::new());
        if start == end || lanes.is_empty() {
            self.next_vertex = end;
            return;
        }

        let chunk = (end - start).div_ceil(lanes.len() as u64);
        let mut v = start;
        for lane in lanes.iter_mut() {
            let stop = (v + chunk).min(end);
            if v >= stop {
                break;
            }
            lane.prefetch_edges(graph, layout, v, stop, &mut self.signals, (v - start) as usize);
            v = stop;
        }
        debug!("prefetch batch {} vertices [{}, {})", self.batches, start, end);
        self.batches += 1;
        self.next_vertex = end;
    }
}
