//! Read-only directed-graph views consumed by the SCC engine.
//!
//! The engine never mutates a graph and never assumes an edge layout; it
//! only needs to enumerate vertex IDs and, per vertex, successor IDs.
//! [`AdjacencyGraph`] is the bundled dense implementation used by the
//! tests and benchmarks; callers with their own representation implement
//! [`DirectedGraph`] directly.

use crate::Vid;

/// A directed graph exposed as a read-only neighbor-list view.
///
/// Implementations must be consistent for the duration of a computation:
/// the vertex set and every neighbor slice are read concurrently from
/// multiple threads and must not change underneath the engine.
pub trait DirectedGraph {
    /// Number of vertices.
    fn vertex_count(&self) -> usize;

    /// All vertex IDs, each appearing exactly once.
    fn vertices(&self) -> &[Vid];

    /// Successors of `v` (possibly empty, possibly containing `v` itself
    /// for a self-loop).
    fn neighbors(&self, v: Vid) -> &[Vid];
}

/// A dense adjacency-list graph over the vertex set `0..n`.
#[derive(Debug, Clone, Default)]
pub struct AdjacencyGraph {
    vertices: Vec<Vid>,
    adjacency: Vec<Vec<Vid>>,
}

impl AdjacencyGraph {
    /// Creates a graph with `n` vertices (IDs `0..n`) and no edges.
    ///
    /// # Panics
    /// Panics if `n` exceeds `u32::MAX`.
    pub fn new(n: usize) -> Self {
        assert!(u32::try_from(n).is_ok(), "vertex count must fit in a u32");
        Self {
            vertices: (0..n as Vid).collect(),
            adjacency: vec![Vec::new(); n],
        }
    }

    /// Creates a graph with `n` vertices and the given directed edges.
    ///
    /// # Panics
    /// Panics if any endpoint is out of range.
    pub fn from_edges(n: usize, edges: &[(Vid, Vid)]) -> Self {
        let mut graph = Self::new(n);
        for &(from, to) in edges {
            graph.add_edge(from, to);
        }
        graph
    }

    /// Adds the directed edge `from -> to`. Parallel edges are kept; the
    /// engine tolerates them (duplicate frontier entries are skipped once
    /// the target completes).
    ///
    /// # Panics
    /// Panics if either endpoint is out of range.
    pub fn add_edge(&mut self, from: Vid, to: Vid) {
        let n = self.adjacency.len();
        assert!((from as usize) < n && (to as usize) < n, "edge endpoint out of range");
        self.adjacency[from as usize].push(to);
    }

    /// Total number of directed edges.
    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum()
    }
}

impl DirectedGraph for AdjacencyGraph {
    fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    fn vertices(&self) -> &[Vid] {
        &self.vertices
    }

    fn neighbors(&self, v: Vid) -> &[Vid] {
        &self.adjacency[v as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_edges_builds_expected_lists() {
        let g = AdjacencyGraph::from_edges(3, &[(0, 1), (0, 2), (2, 0)]);
        assert_eq!(g.vertex_count(), 3);
        assert_eq!(g.neighbors(0), &[1, 2]);
        assert_eq!(g.neighbors(1), &[] as &[Vid]);
        assert_eq!(g.neighbors(2), &[0]);
        assert_eq!(g.edge_count(), 3);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_edge_panics() {
        AdjacencyGraph::from_edges(2, &[(0, 2)]);
    }
}
