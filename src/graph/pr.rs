use std::collections::VecDeque;

use crate::graph::app::{GraphApp, Property, Requeue};
use crate::graph::{EdgeRecord, Graph, VertexId, VertexRecord};

pub const ALPHA: f64 = 0.85;
pub const TOLERANCE: f64 = 1.0e-3;

/// PageRank. All vertices stay active while any rank moves by more than the
/// tolerance.
#[derive(Debug, Clone)]
pub struct PageRank {
    pub alpha: f64,
    pub tolerance: f64,
}

impl Default for PageRank {
    fn default() -> Self {
        Self {
            alpha: ALPHA,
            tolerance: TOLERANCE,
        }
    }
}

fn rank(prop: Property) -> f64 {
    match prop {
        Property::Rank(r) => r,
        _ => 0.0,
    }
}

impl GraphApp for PageRank {
    fn name(&self) -> &'static str {
        "pr"
    }

    fn vertex_size(&self) -> u64 {
        16
    }

    fn edge_size(&self) -> u64 {
        4
    }

    fn initialize(&self, graph: &mut Graph, process: &mut VecDeque<VertexId>) {
        for (id, vertex) in graph.vertices.iter_mut().enumerate() {
            vertex.prop = Property::Rank(1.0);
            process.push_back(id as VertexId);
        }
    }

    fn process_edge(&self, src: &VertexRecord, _edge: &EdgeRecord, _dst: Option<&VertexRecord>) -> Option<Property> {
        // only reached through an out-edge, so degree is never zero here
        Some(Property::Rank(rank(src.prop) / src.degree.max(1) as f64))
    }

    fn reduce(&self, acc: Property, update: Property) -> Property {
        Property::Rank(rank(acc) + rank(update))
    }

    fn apply(&self, vertex: &mut VertexRecord, acc: Property) -> bool {
        let old = rank(vertex.prop);
        let new = (1.0 - self.alpha) + self.alpha * rank(acc);
        vertex.prop = Property::Rank(new);
        (new - old).abs() > self.tolerance
    }

    fn requeue(&self) -> Requeue {
        Requeue::AllOnChange
    }

    fn unique_apply(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_splits_rank_over_out_degree() {
        let pr = PageRank::default();
        let src = VertexRecord {
            edge_list_offset: 0,
            degree: 4,
            prop: Property::Rank(1.0),
        };
        let edge = EdgeRecord { dst: 0, weight: 0.0 };
        assert_eq!(Some(Property::Rank(0.25)), pr.process_edge(&src, &edge, None));
        assert_eq!(Property::Rank(0.75), pr.reduce(Property::Rank(0.5), Property::Rank(0.25)));
    }

    #[test]
    fn apply_reports_change_beyond_tolerance() {
        let pr = PageRank::default();
        let mut vertex = VertexRecord {
            edge_list_offset: 0,
            degree: 1,
            prop: Property::Rank(1.0),
        };
        assert!(pr.apply(&mut vertex, Property::Rank(0.0)));
        assert!((rank(vertex.prop) - 0.15).abs() < 1e-12);
        assert!(!pr.apply(&mut vertex, Property::Rank(0.0)));
    }
}
