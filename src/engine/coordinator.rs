//! Run orchestration: owns the shared state, spawns the workers, and
//! aggregates the per-worker SCC lists.

use core::sync::atomic::AtomicU64;

use crossbeam_utils::CachePadded;

use crate::engine::arena::{CellArena, SearchArena};
use crate::engine::queues::{PendingQueue, RootQueue};
use crate::engine::vertex_map::VertexMap;
use crate::engine::worker::Worker;
use crate::graph::DirectedGraph;
use crate::trace::trace_event;
use crate::Vid;

/// The termination mask is a single `u64`, one bit per worker.
const MAX_THREADS: usize = 64;
const DEFAULT_MAP_SHARDS: usize = 1 << 12;

/// Tuning knobs for a parallel SCC run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of worker threads (`1..=64`).
    pub num_threads: usize,
    /// Shard count of the concurrent vertex map; must be a power of two.
    pub map_shards: usize,
}

impl Default for Config {
    /// One worker per available core (capped at 64) and 2^12 map shards.
    fn default() -> Self {
        let num_threads =
            std::thread::available_parallelism().map_or(1, |n| n.get().min(MAX_THREADS));
        Self {
            num_threads,
            map_shards: DEFAULT_MAP_SHARDS,
        }
    }
}

/// Shared state of one run, borrowed by every worker.
pub(crate) struct RunCtx<'run, G> {
    pub(crate) graph: &'run G,
    pub(crate) map: VertexMap<'run>,
    pub(crate) pending: PendingQueue<'run>,
    pub(crate) roots: RootQueue,
    /// Termination-detection bitmask, one bit per worker.
    pub(crate) flags: CachePadded<AtomicU64>,
    /// Value of `flags` at which every worker is out of work.
    pub(crate) all_flags: u64,
}

/// Computes the strongly connected components of `graph` using
/// `num_threads` cooperating workers.
///
/// Each SCC is a list of vertex IDs; ordering between SCCs and within an
/// SCC is unspecified. For every thread count the returned partition is
/// the same (as a multiset of vertex sets) as the single-threaded
/// [`serial::tarjan_scc`](crate::serial::tarjan_scc).
///
/// # Panics
/// Panics if `num_threads` is zero or greater than 64.
pub fn compute_sccs<G: DirectedGraph + Sync>(graph: &G, num_threads: usize) -> Vec<Vec<Vid>> {
    compute_sccs_with(
        graph,
        Config {
            num_threads,
            ..Config::default()
        },
    )
}

/// [`compute_sccs`] with explicit tuning knobs.
///
/// # Panics
/// Panics if `config.num_threads` is zero or greater than 64, or if
/// `config.map_shards` is not a power of two.
pub fn compute_sccs_with<G: DirectedGraph + Sync>(graph: &G, config: Config) -> Vec<Vec<Vid>> {
    assert!(config.num_threads >= 1, "num_threads must be at least 1");
    assert!(
        config.num_threads <= MAX_THREADS,
        "at most {MAX_THREADS} worker threads are supported"
    );

    let vertices: Box<[Vid]> = graph.vertices().into();
    if vertices.is_empty() {
        return Vec::new();
    }

    let num_threads = config.num_threads;
    trace_event!(
        "computing sccs over {} vertices with {} workers",
        vertices.len(),
        num_threads
    );

    let all_flags = if num_threads == MAX_THREADS {
        u64::MAX
    } else {
        (1u64 << num_threads) - 1
    };

    // Arenas and shared state must outlive the worker scope: cells and
    // searches are referenced across threads until every worker joins.
    let cell_arenas: Vec<CellArena<'_>> = (0..num_threads).map(|_| CellArena::new()).collect();
    let search_arenas: Vec<SearchArena<'_>> =
        (0..num_threads).map(|_| SearchArena::new()).collect();
    let ctx = RunCtx {
        graph,
        map: VertexMap::new(config.map_shards),
        pending: PendingQueue::new(),
        roots: RootQueue::new(vertices),
        flags: CachePadded::new(AtomicU64::new(0)),
        all_flags,
    };

    let mut sccs: Vec<Vec<Vid>> = Vec::new();
    std::thread::scope(|scope| {
        let ctx = &ctx;
        let handles: Vec<_> = (0..num_threads)
            .map(|id| {
                let cell_arena = &cell_arenas[id];
                let search_arena = &search_arenas[id];
                scope.spawn(move || {
                    let mut worker = Worker::new(id, ctx, cell_arena, search_arena);
                    worker.run();
                    worker.into_sccs()
                })
            })
            .collect();
        for handle in handles {
            sccs.extend(handle.join().expect("scc worker thread panicked"));
        }
    });

    trace_event!("found {} sccs", sccs.len());
    sccs
}
