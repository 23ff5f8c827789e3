use anyhow::ensure;
use serde::Deserialize;

use crate::sim::config::Config;
use crate::timeq::Cycle;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub num_lanes: usize,
    pub num_dst_readers: usize,
    pub process_edge_latency: Cycle,
    pub reduce_latency: Cycle,
    pub apply_latency: Cycle,
    /// Updates allowed in flight per destination vertex.
    pub hazard_bound: u32,
}

impl Config for PipelineConfig {}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_lanes: 1,
            num_dst_readers: 4,
            process_edge_latency: 1,
            reduce_latency: 1,
            apply_latency: 1,
            hazard_bound: 1,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.num_lanes > 0, "pipeline.num_lanes must be > 0");
        ensure!(self.num_dst_readers > 0, "pipeline.num_dst_readers must be > 0");
        ensure!(self.hazard_bound > 0, "pipeline.hazard_bound must be > 0");
        Ok(())
    }
}
