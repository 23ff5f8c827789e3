use std::collections::VecDeque;

use crate::graph::app::{GraphApp, Property};
use crate::graph::{EdgeRecord, Graph, VertexId, VertexRecord};

/// Bellman-Ford style single-source shortest paths over edge weights.
#[derive(Debug, Clone)]
pub struct Sssp {
    source: VertexId,
}

impl Sssp {
    pub fn new(source: VertexId) -> Self {
        Self { source }
    }
}

fn distance(prop: Property) -> f64 {
    match prop {
        Property::Distance(d) => d,
        _ => f64::INFINITY,
    }
}

impl GraphApp for Sssp {
    fn name(&self) -> &'static str {
        "sssp"
    }

    fn vertex_size(&self) -> u64 {
        16
    }

    fn initialize(&self, graph: &mut Graph, process: &mut VecDeque<VertexId>) {
        for vertex in graph.vertices.iter_mut() {
            vertex.prop = Property::Distance(f64::INFINITY);
        }
        if let Some(root) = graph.vertices.get_mut(self.source as usize) {
            root.prop = Property::Distance(0.0);
            process.push_back(self.source);
        }
    }

    fn process_edge(&self, src: &VertexRecord, edge: &EdgeRecord, dst: Option<&VertexRecord>) -> Option<Property> {
        let candidate = distance(src.prop) + edge.weight;
        match dst {
            Some(dst) if candidate >= distance(dst.prop) => None,
            _ => Some(Property::Distance(candidate)),
        }
    }

    fn reduce(&self, acc: Property, update: Property) -> Property {
        Property::Distance(distance(acc).min(distance(update)))
    }

    fn apply(&self, vertex: &mut VertexRecord, acc: Property) -> bool {
        let candidate = distance(acc);
        if candidate >= distance(vertex.prop) {
            return false;
        }
        vertex.prop = Property::Distance(candidate);
        true
    }

    fn reads_dst_property(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(dist: f64) -> VertexRecord {
        VertexRecord {
            edge_list_offset: 0,
            degree: 1,
            prop: Property::Distance(dist),
        }
    }

    #[test]
    fn relaxation_only_on_improvement() {
        let sssp = Sssp::new(0);
        let edge = EdgeRecord { dst: 1, weight: 2.5 };
        assert_eq!(
            Some(Property::Distance(3.5)),
            sssp.process_edge(&vertex(1.0), &edge, Some(&vertex(f64::INFINITY)))
        );
        assert_eq!(None, sssp.process_edge(&vertex(1.0), &edge, Some(&vertex(3.0))));
        let mut dst = vertex(10.0);
        assert!(sssp.apply(&mut dst, Property::Distance(4.0)));
        assert!(!sssp.apply(&mut dst, Property::Distance(4.0)));
    }
}
