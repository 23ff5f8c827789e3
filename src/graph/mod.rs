pub mod app;
pub mod bfs;
pub mod cc;
pub mod import;
pub mod pr;
pub mod sssp;

use std::ops::Range;
use std::sync::Arc;

use crate::sim::config::AppKind;

pub use app::{GraphApp, Property, Requeue};

pub type VertexId = u64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexRecord {
    pub edge_list_offset: u64,
    pub degree: u32,
    pub prop: Property,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeRecord {
    pub dst: VertexId,
    pub weight: f64,
}

/// Compressed sparse row graph: each vertex's out-edges are contiguous,
/// starting at `edge_list_offset`.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub vertices: Vec<VertexRecord>,
    pub edges: Vec<EdgeRecord>,
}

impl Graph {
    /// Build CSR from `(src, dst, weight)` triples. Edge order within a
    /// source follows input order.
    pub fn from_edges(num_vertices: usize, edges: &[(VertexId, VertexId, f64)]) -> anyhow::Result<Self> {
        let mut degree = vec![0u32; num_vertices];
        for &(src, dst, _) in edges {
            anyhow::ensure!(
                (src as usize) < num_vertices && (dst as usize) < num_vertices,
                "edge {} -> {} out of range for {} vertices",
                src,
                dst,
                num_vertices
            );
            degree[src as usize] += 1;
        }

        let mut vertices = Vec::with_capacity(num_vertices);
        let mut offset = 0u64;
        for &deg in &degree {
            vertices.push(VertexRecord {
                edge_list_offset: offset,
                degree: deg,
                prop: Property::default(),
            });
            offset += deg as u64;
        }

        let mut cursor: Vec<u64> = vertices.iter().map(|v| v.edge_list_offset).collect();
        let mut csr = vec![EdgeRecord { dst: 0, weight: 0.0 }; edges.len()];
        for &(src, dst, weight) in edges {
            let slot = &mut cursor[src as usize];
            csr[*slot as usize] = EdgeRecord { dst, weight };
            *slot += 1;
        }

        Ok(Self {
            vertices,
            edges: csr,
        })
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_range(&self, v: VertexId) -> Range<usize> {
        let vertex = &self.vertices[v as usize];
        let start = vertex.edge_list_offset as usize;
        start..start + vertex.degree as usize
    }

    pub fn out_edges(&self, v: VertexId) -> &[EdgeRecord] {
        &self.edges[self.edge_range(v)]
    }
}

/// Byte addresses of graph data as seen by the memory hierarchy. Vertex
/// records come first, edge records follow on the next line boundary.
/// Scratch entries live in the lane scratchpad's own address space.
#[derive(Debug, Clone, Copy)]
pub struct AddressLayout {
    pub vertex_size: u64,
    pub edge_size: u64,
    pub edge_base: u64,
}

impl AddressLayout {
    pub fn new(graph: &Graph, vertex_size: u64, edge_size: u64, line_bytes: u64) -> Self {
        let vertex_bytes = graph.num_vertices() as u64 * vertex_size;
        let edge_base = vertex_bytes.div_ceil(line_bytes.max(1)) * line_bytes.max(1);
        Self {
            vertex_size,
            edge_size,
            edge_base,
        }
    }

    pub fn vertex_addr(&self, v: VertexId) -> u64 {
        v * self.vertex_size
    }

    pub fn edge_addr(&self, index: u64) -> u64 {
        self.edge_base + index * self.edge_size
    }

    pub fn scratch_addr(&self, v: VertexId) -> u64 {
        v * self.vertex_size
    }
}

pub fn make_app(kind: AppKind, source: VertexId) -> Arc<dyn GraphApp> {
    match kind {
        AppKind::Bfs => Arc::new(bfs::Bfs::new(source)),
        AppKind::Cc => Arc::new(cc::ConnectedComponents),
        AppKind::Sssp => Arc::new(sssp::Sssp::new(source)),
        AppKind::Pr => Arc::new(pr::PageRank::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csr_groups_edges_by_source() {
        let graph = Graph::from_edges(4, &[(2, 0, 1.0), (0, 1, 1.0), (0, 2, 3.0), (1, 2, 1.0)]).unwrap();
        assert_eq!(4, graph.num_edges());
        assert_eq!(0..2, graph.edge_range(0));
        assert_eq!(2, graph.out_edges(0)[1].dst);
        assert_eq!(3.0, graph.out_edges(0)[1].weight);
        assert_eq!(0, graph.out_edges(2)[0].dst);
        assert!(graph.out_edges(3).is_empty());
        assert_eq!(4, graph.vertices[3].edge_list_offset);
    }

    #[test]
    fn out_of_range_edge_rejected() {
        assert!(Graph::from_edges(2, &[(0, 5, 1.0)]).is_err());
    }

    #[test]
    fn edges_start_on_a_line_boundary() {
        let graph = Graph::from_edges(5, &[]).unwrap();
        let layout = AddressLayout::new(&graph, 8, 4, 64);
        assert_eq!(64, layout.edge_base);
        assert_eq!(72, layout.edge_addr(2));
        assert_eq!(32, layout.vertex_addr(4));
    }
}
