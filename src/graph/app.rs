use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;

use crate::graph::{EdgeRecord, Graph, VertexId, VertexRecord};

/// Algorithm-specific vertex field, also used for edge updates and scratch
/// accumulators.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub enum Property {
    Visited(bool),
    Component(u32),
    Distance(f64),
    Rank(f64),
}

impl Default for Property {
    fn default() -> Self {
        Property::Visited(false)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Visited(v) => write!(f, "{}", *v as u8),
            Property::Component(c) => write!(f, "{}", c),
            Property::Distance(d) if d.is_infinite() => f.write_str("inf"),
            Property::Distance(d) => write!(f, "{}", d),
            Property::Rank(r) => write!(f, "{:.6}", r),
        }
    }
}

/// Which vertices enter the next iteration's process queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Every vertex whose apply reported a change.
    Changed,
    /// All vertices, if any vertex changed.
    AllOnChange,
}

pub trait GraphApp: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bytes per vertex record; drives vertex and scratch addresses.
    fn vertex_size(&self) -> u64;

    fn edge_size(&self) -> u64 {
        8
    }

    /// Set initial properties and seed the process queue.
    fn initialize(&self, graph: &mut Graph, process: &mut VecDeque<VertexId>);

    fn do_every_iteration(&self, _graph: &mut Graph, _process: &mut VecDeque<VertexId>) {}

    /// Update carried along `edge`. `dst` is present only when
    /// `reads_dst_property` is set; returning `None` drops the edge.
    fn process_edge(&self, src: &VertexRecord, edge: &EdgeRecord, dst: Option<&VertexRecord>) -> Option<Property>;

    fn reduce(&self, acc: Property, update: Property) -> Property;

    /// Fold the accumulated update into the vertex. Returns whether it changed.
    fn apply(&self, vertex: &mut VertexRecord, acc: Property) -> bool;

    fn requeue(&self) -> Requeue {
        Requeue::Changed
    }

    /// Deduplicate apply queues before the Apply phase.
    fn unique_apply(&self) -> bool {
        false
    }

    fn reads_dst_property(&self) -> bool {
        false
    }
}
