//! End-to-end scenarios for the parallel SCC engine, validated against
//! the single-threaded reference at several thread counts.

use tangle::{compute_sccs, graph::AdjacencyGraph, serial, Vid};

const THREAD_COUNTS: &[usize] = &[1, 2, 4, 8];

fn normalized(mut sccs: Vec<Vec<Vid>>) -> Vec<Vec<Vid>> {
    for scc in &mut sccs {
        scc.sort_unstable();
    }
    sccs.sort();
    sccs
}

/// Runs the graph through the serial reference and the parallel engine at
/// every thread count, asserting they all agree on `expected`.
fn check(graph: &AdjacencyGraph, expected: &[Vec<Vid>]) {
    assert_eq!(
        normalized(serial::tarjan_scc(graph)),
        expected,
        "serial reference disagrees with expected partition"
    );
    for &threads in THREAD_COUNTS {
        assert_eq!(
            normalized(compute_sccs(graph, threads)),
            expected,
            "parallel result diverged with {threads} threads"
        );
    }
}

#[test]
fn empty_graph_returns_no_sccs() {
    let graph = AdjacencyGraph::new(0);
    for &threads in THREAD_COUNTS {
        assert!(compute_sccs(&graph, threads).is_empty());
    }
}

#[test]
fn self_loop_singleton() {
    let graph = AdjacencyGraph::from_edges(1, &[(0, 0)]);
    check(&graph, &[vec![0]]);
}

#[test]
fn two_cycle() {
    let graph = AdjacencyGraph::from_edges(2, &[(0, 1), (1, 0)]);
    check(&graph, &[vec![0, 1]]);
}

#[test]
fn nested_components() {
    let graph =
        AdjacencyGraph::from_edges(5, &[(0, 1), (1, 2), (2, 0), (2, 3), (3, 4), (4, 3)]);
    check(&graph, &[vec![0, 1, 2], vec![3, 4]]);
}

#[test]
fn dag_is_all_singletons() {
    let graph = AdjacencyGraph::from_edges(3, &[(0, 1), (1, 2), (0, 2)]);
    check(&graph, &[vec![0], vec![1], vec![2]]);
}

/// Two interleaved cycles sharing vertex 3: racing workers starting from
/// different roots must block on each other, and the shared vertex welds
/// everything into one component.
#[test]
fn interleaved_cycles_merge_into_one_component() {
    let graph = AdjacencyGraph::from_edges(
        9,
        &[
            (0, 1),
            (1, 2),
            (2, 3),
            (3, 4),
            (4, 5),
            (5, 0),
            (3, 6),
            (6, 7),
            (7, 8),
            (8, 3),
        ],
    );
    check(&graph, &[(0..9).collect()]);
}

/// One giant cycle with chords: every worker's root lands inside the same
/// component, so blocking cycles and stack transfers are unavoidable.
/// Repeated to give the races many chances to misfire.
#[test]
fn single_giant_component_under_contention() {
    const N: Vid = 512;
    let mut graph = AdjacencyGraph::new(N as usize);
    for v in 0..N {
        graph.add_edge(v, (v + 1) % N);
        graph.add_edge(v, (v + 37) % N);
    }
    let expected = vec![(0..N).collect::<Vec<_>>()];

    for _ in 0..20 {
        assert_eq!(normalized(compute_sccs(&graph, 8)), expected);
    }
}

/// 100 clusters of 100 vertices with dense intra-cluster edges and
/// forward-only inter-cluster edges: exactly one SCC per cluster.
#[test]
fn clustered_graph_has_one_component_per_cluster() {
    const CLUSTERS: u32 = 100;
    const SIZE: u32 = 100;

    let mut graph = AdjacencyGraph::new((CLUSTERS * SIZE) as usize);
    for cluster in 0..CLUSTERS {
        let base = cluster * SIZE;
        for i in 0..SIZE {
            graph.add_edge(base + i, base + (i + 1) % SIZE);
            graph.add_edge(base + i, base + (i + 7) % SIZE);
            graph.add_edge(base + i, base + (i + 41) % SIZE);
        }
        if cluster + 1 < CLUSTERS {
            graph.add_edge(base, (cluster + 1) * SIZE);
        }
    }

    let expected: Vec<Vec<Vid>> = (0..CLUSTERS)
        .map(|cluster| (cluster * SIZE..(cluster + 1) * SIZE).collect())
        .collect();

    assert_eq!(normalized(serial::tarjan_scc(&graph)), expected);
    for &threads in &[2, 4, 8] {
        assert_eq!(normalized(compute_sccs(&graph, threads)), expected);
    }
}

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: u32) -> u32 {
        (self.next() % u64::from(bound)) as u32
    }
}

/// Random graphs large enough to keep all workers busy; the serial
/// reference is ground truth.
#[test]
fn random_graphs_match_serial_reference() {
    let mut rng = XorShift(0x5eed_1234_dead_beef);

    for round in 0..8 {
        let n = 500 + round * 250;
        let mut graph = AdjacencyGraph::new(n as usize);
        for from in 0..n {
            for _ in 0..3 {
                graph.add_edge(from, rng.below(n));
            }
        }

        let expected = normalized(serial::tarjan_scc(&graph));
        for &threads in &[2, 8] {
            assert_eq!(
                normalized(compute_sccs(&graph, threads)),
                expected,
                "round {round} diverged with {threads} threads"
            );
        }
    }
}
