use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{bail, ensure, Context};
use log::debug;

use crate::graph::{Graph, VertexId};

/// Parse a Matrix Market coordinate file. Entry `i j [w]` is the edge
/// `i-1 -> j-1` with weight `w` (1.0 when absent). `symmetric` matrices
/// produce both directions.
pub fn parse_matrix_market(text: &str) -> anyhow::Result<Graph> {
    let mut lines = text.lines().enumerate();
    let mut symmetric = false;

    let (num_vertices, nnz) = loop {
        let Some((lineno, line)) = lines.next() else {
            bail!("matrix market input has no size line");
        };
        let line = line.trim();
        if let Some(banner) = line.strip_prefix("%%MatrixMarket") {
            let banner = banner.to_ascii_lowercase();
            ensure!(
                banner.contains("coordinate"),
                "line {}: only coordinate matrices are supported",
                lineno + 1
            );
            symmetric = banner.contains("symmetric");
            continue;
        }
        if line.is_empty() || line.starts_with('%') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        ensure!(fields.len() == 3, "line {}: expected 'rows cols nnz'", lineno + 1);
        let rows: usize = fields[0].parse().with_context(|| format!("line {}: bad row count", lineno + 1))?;
        let cols: usize = fields[1].parse().with_context(|| format!("line {}: bad column count", lineno + 1))?;
        let nnz: usize = fields[2].parse().with_context(|| format!("line {}: bad entry count", lineno + 1))?;
        break (rows.max(cols), nnz);
    };

    let mut edges: Vec<(VertexId, VertexId, f64)> = Vec::with_capacity(if symmetric { nnz * 2 } else { nnz });
    let mut entries = 0usize;
    for (lineno, line) in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('%') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        ensure!(fields.len() >= 2, "line {}: expected 'src dst [weight]'", lineno + 1);
        let src: u64 = fields[0].parse().with_context(|| format!("line {}: bad source id", lineno + 1))?;
        let dst: u64 = fields[1].parse().with_context(|| format!("line {}: bad destination id", lineno + 1))?;
        ensure!(src >= 1 && dst >= 1, "line {}: vertex ids are 1-based", lineno + 1);
        let weight: f64 = match fields.get(2) {
            Some(w) => w.parse().with_context(|| format!("line {}: bad weight", lineno + 1))?,
            None => 1.0,
        };
        edges.push((src - 1, dst - 1, weight));
        if symmetric && src != dst {
            edges.push((dst - 1, src - 1, weight));
        }
        entries += 1;
    }
    ensure!(entries == nnz, "header declares {} entries, found {}", nnz, entries);

    debug!("matrix market: {} vertices, {} edges", num_vertices, edges.len());
    Graph::from_edges(num_vertices, &edges)
}

pub fn load_graph(path: &Path) -> anyhow::Result<Graph> {
    let text = fs::read_to_string(path).with_context(|| format!("cannot read graph {}", path.display()))?;
    parse_matrix_market(&text).with_context(|| format!("cannot parse graph {}", path.display()))
}

/// Write `"<id> <value>"` per vertex.
pub fn write_vertex_properties(graph: &Graph, out: &mut impl Write) -> anyhow::Result<()> {
    for (id, vertex) in graph.vertices.iter().enumerate() {
        writeln!(out, "{} {}", id, vertex.prop)?;
    }
    Ok(())
}

pub fn dump_vertex_properties(graph: &Graph, path: &Path) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("cannot create result file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_vertex_properties(graph, &mut out)?;
    out.flush()?;
    Ok(())
}
