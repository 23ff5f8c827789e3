use std::collections::VecDeque;

use crate::graph::app::{GraphApp, Property};
use crate::graph::{EdgeRecord, Graph, VertexId, VertexRecord};

/// Reachability from a root. Edges into already visited vertices are dropped
/// at ProcessEdge.
#[derive(Debug, Clone)]
pub struct Bfs {
    source: VertexId,
}

impl Bfs {
    pub fn new(source: VertexId) -> Self {
        Self { source }
    }
}

fn visited(vertex: &VertexRecord) -> bool {
    matches!(vertex.prop, Property::Visited(true))
}

impl GraphApp for Bfs {
    fn name(&self) -> &'static str {
        "bfs"
    }

    fn vertex_size(&self) -> u64 {
        8
    }

    fn initialize(&self, graph: &mut Graph, process: &mut VecDeque<VertexId>) {
        for vertex in graph.vertices.iter_mut() {
            vertex.prop = Property::Visited(false);
        }
        if let Some(root) = graph.vertices.get_mut(self.source as usize) {
            root.prop = Property::Visited(true);
            process.push_back(self.source);
        }
    }

    fn process_edge(&self, _src: &VertexRecord, _edge: &EdgeRecord, dst: Option<&VertexRecord>) -> Option<Property> {
        match dst {
            Some(dst) if visited(dst) => None,
            _ => Some(Property::Visited(true)),
        }
    }

    fn reduce(&self, acc: Property, update: Property) -> Property {
        match (acc, update) {
            (Property::Visited(a), Property::Visited(b)) => Property::Visited(a || b),
            _ => update,
        }
    }

    fn apply(&self, vertex: &mut VertexRecord, acc: Property) -> bool {
        if visited(vertex) || acc != Property::Visited(true) {
            return false;
        }
        vertex.prop = Property::Visited(true);
        true
    }

    fn reads_dst_property(&self) -> bool {
        true
    }
}
