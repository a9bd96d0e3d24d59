//! Property tests: the parallel engine against the serial reference, the
//! serial reference against petgraph, and the SCC laws themselves.

use proptest::prelude::*;
use tangle::{
    compute_sccs,
    graph::{AdjacencyGraph, DirectedGraph},
    serial, Vid,
};

fn normalized(mut sccs: Vec<Vec<Vid>>) -> Vec<Vec<Vid>> {
    for scc in &mut sccs {
        scc.sort_unstable();
    }
    sccs.sort();
    sccs
}

fn arb_graph(max_vertices: usize, edge_factor: usize) -> impl Strategy<Value = AdjacencyGraph> {
    (1..max_vertices).prop_flat_map(move |n| {
        proptest::collection::vec((0..n as Vid, 0..n as Vid), 0..=n * edge_factor)
            .prop_map(move |edges| AdjacencyGraph::from_edges(n, &edges))
    })
}

/// All-pairs reachability by simple DFS; fine at property-test sizes.
fn reachability(graph: &AdjacencyGraph) -> Vec<Vec<bool>> {
    let n = graph.vertex_count();
    let mut reach = vec![vec![false; n]; n];
    for start in 0..n {
        let mut stack = vec![start as Vid];
        while let Some(v) = stack.pop() {
            if reach[start][v as usize] {
                continue;
            }
            reach[start][v as usize] = true;
            stack.extend_from_slice(graph.neighbors(v));
        }
    }
    reach
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn parallel_matches_serial(graph in arb_graph(40, 3), threads in 1usize..=8) {
        let expected = normalized(serial::tarjan_scc(&graph));
        let got = normalized(compute_sccs(&graph, threads));
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn partition_covers_every_vertex_exactly_once(
        graph in arb_graph(40, 3),
        threads in 1usize..=4,
    ) {
        let sccs = compute_sccs(&graph, threads);
        let mut seen = vec![0usize; graph.vertex_count()];
        for scc in &sccs {
            prop_assert!(!scc.is_empty());
            for &v in scc {
                seen[v as usize] += 1;
            }
        }
        prop_assert!(seen.iter().all(|&count| count == 1));
    }

    /// Same component if and only if mutually reachable.
    #[test]
    fn components_are_maximal_mutually_reachable_sets(
        graph in arb_graph(25, 2),
        threads in 1usize..=4,
    ) {
        let n = graph.vertex_count();
        let sccs = compute_sccs(&graph, threads);

        let mut component = vec![usize::MAX; n];
        for (id, scc) in sccs.iter().enumerate() {
            for &v in scc {
                component[v as usize] = id;
            }
        }

        let reach = reachability(&graph);
        for u in 0..n {
            for v in 0..n {
                let together = component[u] == component[v];
                let mutual = reach[u][v] && reach[v][u];
                prop_assert_eq!(
                    together, mutual,
                    "vertices {} and {}: same component = {}, mutually reachable = {}",
                    u, v, together, mutual
                );
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// The validation baseline itself is validated against petgraph.
    #[test]
    fn serial_reference_matches_petgraph(graph in arb_graph(60, 3)) {
        let n = graph.vertex_count();
        let mut pg = petgraph::graph::DiGraph::<(), ()>::new();
        let nodes: Vec<_> = (0..n).map(|_| pg.add_node(())).collect();
        for v in 0..n {
            for &succ in graph.neighbors(v as Vid) {
                pg.add_edge(nodes[v], nodes[succ as usize], ());
            }
        }

        let expected = normalized(
            petgraph::algo::tarjan_scc(&pg)
                .into_iter()
                .map(|scc| scc.into_iter().map(|ix| ix.index() as Vid).collect())
                .collect(),
        );
        prop_assert_eq!(normalized(serial::tarjan_scc(&graph)), expected);
    }
}
