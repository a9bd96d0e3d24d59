//! # `tangle` - Parallel strongly connected components
//!
//! Computes the SCCs of a directed graph with multiple cooperating
//! depth-first searches that explore the graph concurrently and
//! coordinate when their frontiers collide.
//!
//! ## How it works
//!
//! - Every worker thread drives its own Tarjan-style DFS ("search"),
//!   claiming vertices through a lock-free compare-and-swap protocol.
//! - A search that reaches a vertex owned by another search suspends on
//!   it and is resumed once that vertex's component is emitted.
//! - Two or more searches exploring the same component eventually block
//!   on each other in a cycle; the cycle is detected at suspension time
//!   and resolved by transferring the component's stack regions to a
//!   single search, which then makes progress alone.
//! - Vertex records are reference-counted and recycled through
//!   per-worker pools; weak references carry an age snapshot, so a
//!   recycled record is never mistaken for its previous life.
//!
//! ## Example
//!
//! ```rust
//! use tangle::{compute_sccs, graph::AdjacencyGraph};
//!
//! // 0 -> 1 -> 2 -> 0 is one component, 3 <-> 4 another.
//! let graph = AdjacencyGraph::from_edges(
//!     5,
//!     &[(0, 1), (1, 2), (2, 0), (2, 3), (3, 4), (4, 3)],
//! );
//!
//! let mut sccs = compute_sccs(&graph, 2);
//! for scc in &mut sccs {
//!     scc.sort_unstable();
//! }
//! sccs.sort();
//! assert_eq!(sccs, vec![vec![0, 1, 2], vec![3, 4]]);
//! ```
//!
//! The partition returned is identical (as a multiset of vertex sets) for
//! every thread count, and matches [`serial::tarjan_scc`].

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]

pub mod graph;
pub mod serial;

mod engine;
mod trace;

pub use engine::coordinator::{compute_sccs, compute_sccs_with, Config};

/// Identifier for vertices in a graph.
pub type Vid = u32;
