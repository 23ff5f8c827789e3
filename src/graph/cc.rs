use std::collections::VecDeque;

use crate::graph::app::{GraphApp, Property};
use crate::graph::{EdgeRecord, Graph, VertexId, VertexRecord};

/// Label propagation: every vertex converges to the smallest id that reaches it.
#[derive(Debug, Clone, Default)]
pub struct ConnectedComponents;

fn component(prop: Property) -> u32 {
    match prop {
        Property::Component(c) => c,
        _ => u32::MAX,
    }
}

impl GraphApp for ConnectedComponents {
    fn name(&self) -> &'static str {
        "cc"
    }

    fn vertex_size(&self) -> u64 {
        8
    }

    fn initialize(&self, graph: &mut Graph, process: &mut VecDeque<VertexId>) {
        for (id, vertex) in graph.vertices.iter_mut().enumerate() {
            vertex.prop = Property::Component(id as u32);
            process.push_back(id as VertexId);
        }
    }

    fn process_edge(&self, src: &VertexRecord, _edge: &EdgeRecord, _dst: Option<&VertexRecord>) -> Option<Property> {
        Some(src.prop)
    }

    fn reduce(&self, acc: Property, update: Property) -> Property {
        Property::Component(component(acc).min(component(update)))
    }

    fn apply(&self, vertex: &mut VertexRecord, acc: Property) -> bool {
        let label = component(acc);
        if label >= component(vertex.prop) {
            return false;
        }
        vertex.prop = Property::Component(label);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_vertex_starts_in_its_own_component() {
        let mut graph = Graph::from_edges(3, &[]).unwrap();
        let mut queue = VecDeque::new();
        ConnectedComponents.initialize(&mut graph, &mut queue);
        assert_eq!(3, queue.len());
        assert_eq!(Property::Component(2), graph.vertices[2].prop);
    }

    #[test]
    fn smaller_label_wins() {
        let cc = ConnectedComponents;
        assert_eq!(
            Property::Component(1),
            cc.reduce(Property::Component(4), Property::Component(1))
        );
        let mut vertex = VertexRecord {
            edge_list_offset: 0,
            degree: 0,
            prop: Property::Component(3),
        };
        assert!(!cc.apply(&mut vertex, Property::Component(3)));
        assert!(cc.apply(&mut vertex, Property::Component(0)));
        assert_eq!(Property::Component(0), vertex.prop);
    }
}
