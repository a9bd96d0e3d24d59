use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tangle::{compute_sccs, graph::AdjacencyGraph, serial, Vid};

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

/// Uniform random digraph; at this density a giant SCC dominates.
fn random_graph(n: u32, edges_per_vertex: u32, seed: u64) -> AdjacencyGraph {
    let mut rng = XorShift(seed);
    let mut graph = AdjacencyGraph::new(n as usize);
    for from in 0..n {
        for _ in 0..edges_per_vertex {
            graph.add_edge(from, rng.below(n));
        }
    }
    graph
}

/// Many mid-sized components chained by forward edges.
fn clustered_graph(clusters: u32, size: u32) -> AdjacencyGraph {
    let mut graph = AdjacencyGraph::new((clusters * size) as usize);
    for cluster in 0..clusters {
        let base = cluster * size;
        for i in 0..size {
            graph.add_edge(base + i, base + (i + 1) % size);
            graph.add_edge(base + i, base + (i + 7) % size);
        }
        if cluster + 1 < clusters {
            graph.add_edge(base, (cluster + 1) * size);
        }
    }
    graph
}

fn bench_random(c: &mut Criterion) {
    let graph = random_graph(20_000, 4, 0x5eed);
    let mut group = c.benchmark_group("random_20k");

    group.bench_function("serial", |b| {
        b.iter(|| serial::tarjan_scc(black_box(&graph)));
    });
    for threads in [1, 2, 4, 8] {
        group.bench_function(format!("parallel_t{threads}"), |b| {
            b.iter(|| compute_sccs(black_box(&graph), threads));
        });
    }
    group.finish();
}

fn bench_clustered(c: &mut Criterion) {
    let graph = clustered_graph(200, 100);
    let mut group = c.benchmark_group("clustered_200x100");

    group.bench_function("serial", |b| {
        b.iter(|| serial::tarjan_scc(black_box(&graph)));
    });
    for threads in [2, 4, 8] {
        group.bench_function(format!("parallel_t{threads}"), |b| {
            b.iter(|| compute_sccs(black_box(&graph), threads));
        });
    }
    group.finish();
}

fn sanity(c: &mut Criterion) {
    // Cheap agreement check so a broken build fails loudly here too.
    let graph = random_graph(2_000, 3, 0xfeed);
    let count = |mut sccs: Vec<Vec<Vid>>| {
        sccs.iter_mut().for_each(|scc| scc.sort_unstable());
        sccs.sort();
        sccs
    };
    assert_eq!(count(serial::tarjan_scc(&graph)), count(compute_sccs(&graph, 4)));

    c.bench_function("noop_sanity", |b| b.iter(|| black_box(1)));
}

criterion_group!(benches, sanity, bench_random, bench_clustered);
criterion_main!(benches);
