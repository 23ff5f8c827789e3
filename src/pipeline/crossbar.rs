use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::ensure;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::base::behavior::*;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::graph::VertexId;
use crate::info;
use crate::pipeline::arbiter::RoundRobin;
use crate::pipeline::stage::WorkItem;
use crate::sim::config::Config;
use crate::sim::log::Logger;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CrossbarConfig {
    /// Packets each source lane may buffer before sends are refused.
    pub ingress_depth: usize,
    /// Packets each destination port may buffer before routing stops.
    pub port_capacity: usize,
    /// Packets moved into one destination port per cycle.
    pub port_bandwidth: usize,
}

impl Config for CrossbarConfig {}

impl Default for CrossbarConfig {
    fn default() -> Self {
        Self {
            ingress_depth: 4,
            port_capacity: 4,
            port_bandwidth: 1,
        }
    }
}

impl CrossbarConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.ingress_depth > 0, "crossbar.ingress_depth must be > 0");
        ensure!(self.port_capacity > 0, "crossbar.port_capacity must be > 0");
        ensure!(self.port_bandwidth > 0, "crossbar.port_bandwidth must be > 0");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Packet {
    pub src: usize,
    pub dst: usize,
    pub payload: WorkItem,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CrossbarStats {
    pub packets_routed: u64,
    pub contention_cycles: u64,
    pub rejected_sends: u64,
}

pub struct CrossbarState {
    ingress: Vec<VecDeque<Packet>>,
    egress: Vec<VecDeque<Packet>>,
    arbiters: Vec<RoundRobin>,
    partition: u64,
    stats: CrossbarStats,
}

/// Lane-to-lane network for edge updates. Every vertex belongs to the lane
/// owning its contiguous id range; updates travel to that lane.
pub struct Crossbar {
    base: ModuleBase<CrossbarState, CrossbarConfig>,
}

module!(Crossbar, CrossbarState, CrossbarConfig,);

impl Crossbar {
    pub fn new(config: Arc<CrossbarConfig>, num_lanes: usize, num_vertices: usize) -> anyhow::Result<Self> {
        config.validate()?;
        ensure!(num_lanes > 0, "crossbar needs at least one lane");
        let partition = (num_vertices as u64).div_ceil(num_lanes as u64).max(1);
        let state = CrossbarState {
            ingress: (0..num_lanes).map(|_| VecDeque::new()).collect(),
            egress: (0..num_lanes).map(|_| VecDeque::new()).collect(),
            arbiters: (0..num_lanes).map(|_| RoundRobin::new()).collect(),
            partition,
            stats: CrossbarStats::default(),
        };
        let mut crossbar = Crossbar {
            base: ModuleBase::named("crossbar", state),
        };
        crossbar.init_conf(config);
        Ok(crossbar)
    }

    pub fn num_lanes(&self) -> usize {
        self.state().ingress.len()
    }

    pub fn lane_for(&self, vertex: VertexId) -> usize {
        ((vertex / self.state().partition) as usize).min(self.num_lanes() - 1)
    }

    /// Queue a packet at its source lane, or hand it back when the ingress
    /// queue is full.
    pub fn try_send(&mut self, packet: Packet) -> Result<(), Packet> {
        let depth = self.conf().ingress_depth;
        let state = &mut self.base.state;
        let queue = &mut state.ingress[packet.src];
        if queue.len() >= depth {
            state.stats.rejected_sends += 1;
            return Err(packet);
        }
        queue.push_back(packet);
        Ok(())
    }

    pub fn receive(&mut self, lane: usize) -> Option<Packet> {
        self.base.state.egress[lane].pop_front()
    }

    pub fn busy(&self) -> bool {
        let state = self.state();
        state.ingress.iter().any(|q| !q.is_empty()) || state.egress.iter().any(|q| !q.is_empty())
    }

    pub fn stats(&self) -> CrossbarStats {
        self.state().stats
    }

    pub fn clear_stats(&mut self) {
        self.base.state.stats = CrossbarStats::default();
    }

    pub fn print_stats(&self, logger: &Logger) {
        let stats = self.stats();
        info!(
            logger,
            "crossbar: packets_routed={} contention_cycles={} rejected_sends={}",
            stats.packets_routed,
            stats.contention_cycles,
            stats.rejected_sends
        );
    }
}

impl ModuleBehaviors for Crossbar {
    fn tick_one(&mut self) {
        self.base.cycle += 1;
        let bandwidth = self.conf().port_bandwidth;
        let capacity = self.conf().port_capacity;
        let now = self.base.cycle;
        let state = &mut self.base.state;
        let lanes = state.ingress.len();
        // one packet leaves each ingress queue per cycle
        let mut sent = vec![false; lanes];

        for port in 0..lanes {
            let eligible: Vec<bool> = (0..lanes)
                .map(|src| !sent[src] && state.ingress[src].front().map_or(false, |p| p.dst == port))
                .collect();
            let requests = eligible.iter().filter(|&&e| e).count();
            if requests == 0 {
                continue;
            }
            let room = capacity.saturating_sub(state.egress[port].len());
            let width = bandwidth.min(room);
            if requests > width {
                state.stats.contention_cycles += 1;
            }
            let grants = state.arbiters[port].select(&eligible, width);
            for src in (0..lanes).filter(|&src| grants[src]) {
                if let Some(packet) = state.ingress[src].pop_front() {
                    trace!("crossbar tick {} route {} -> {}", now, src, port);
                    state.egress[port].push_back(packet);
                    state.stats.packets_routed += 1;
                    sent[src] = true;
                }
            }
        }
    }

    fn reset(&mut self) {
        self.clear_stats();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeRecord;

    fn packet(src: usize, dst: usize) -> Packet {
        let mut payload = WorkItem::for_vertex(src as u64);
        payload.edge = Some(EdgeRecord { dst: dst as u64, weight: 1.0 });
        Packet { src, dst, payload }
    }

    fn crossbar(lanes: usize, ingress_depth: usize) -> Crossbar {
        let config = CrossbarConfig {
            ingress_depth,
            ..CrossbarConfig::default()
        };
        Crossbar::new(Arc::new(config), lanes, 8).unwrap()
    }

    #[test]
    fn contiguous_partition_routing() {
        let xbar = crossbar(3, 4);
        assert_eq!(0, xbar.lane_for(0));
        assert_eq!(0, xbar.lane_for(2));
        assert_eq!(1, xbar.lane_for(3));
        assert_eq!(2, xbar.lane_for(7));
    }

    #[test]
    fn full_ingress_rejects() {
        let mut xbar = crossbar(2, 1);
        xbar.try_send(packet(0, 1)).unwrap();
        assert!(xbar.try_send(packet(0, 1)).is_err());
        assert_eq!(1, xbar.stats().rejected_sends);
        assert!(xbar.busy());
    }

    #[test]
    fn packet_arrives_after_one_tick() {
        let mut xbar = crossbar(2, 4);
        xbar.try_send(packet(1, 0)).unwrap();
        assert!(xbar.receive(0).is_none());
        xbar.tick_one();
        let got = xbar.receive(0).unwrap();
        assert_eq!(1, got.src);
        assert!(!xbar.busy());
    }
}
