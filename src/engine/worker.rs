//! Worker thread: fetches a search (pending first, then a fresh root),
//! drives its DFS until it suspends or finishes, and emits SCCs.

use core::ptr;
use core::sync::atomic::Ordering;
use std::time::Duration;

use crate::engine::arena::{CellArena, ScratchCell, SearchArena};
use crate::engine::cell::{CellRef, ClaimOutcome};
use crate::engine::coordinator::RunCtx;
use crate::engine::search::SearchRef;
use crate::engine::suspend::{bulk_unsuspend, suspend, CyclePath, SuspendOutcome};
use crate::graph::DirectedGraph;
use crate::trace::trace_event;
use crate::Vid;

/// Idle workers sleep this long between termination-detection retries.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// Outcome of one DFS iteration.
enum DfsStep {
    /// Made progress; keep stepping.
    Stepped,
    /// The search suspended; another worker resumes it later.
    Suspended,
    /// The control stack emptied; the search is finished.
    Done,
}

/// Thread-local engine state for one worker.
pub(crate) struct Worker<'env, 'run, G> {
    mask: u64,
    ctx: &'env RunCtx<'run, G>,
    scratch: ScratchCell<'run>,
    spare_search: SearchRef<'run>,
    search_arena: &'run SearchArena<'run>,
    /// Pool of reusable search objects (reclaimed by this worker, not
    /// necessarily allocated by it).
    pub(crate) free_searches: Vec<SearchRef<'run>>,
    /// Reusable buffers for the cycle-detection walk.
    pub(crate) cycle_path: CyclePath<'run>,
    resume_buf: Vec<SearchRef<'run>>,
    sccs: Vec<Vec<Vid>>,
}

impl<'env, 'run, G: DirectedGraph> Worker<'env, 'run, G> {
    pub(crate) fn new(
        id: usize,
        ctx: &'env RunCtx<'run, G>,
        cell_arena: &'run CellArena<'run>,
        search_arena: &'run SearchArena<'run>,
    ) -> Self {
        Self {
            mask: 1u64 << id,
            ctx,
            scratch: ScratchCell::new(cell_arena),
            spare_search: search_arena.alloc(),
            search_arena,
            free_searches: Vec::new(),
            cycle_path: CyclePath::default(),
            resume_buf: Vec::new(),
            sccs: Vec::new(),
        }
    }

    /// Main loop: runs until termination detection says all workers are
    /// out of work.
    pub(crate) fn run(&mut self) {
        while let Some(search) = self.next_search() {
            self.execute(search);
        }
        trace_event!("worker {} exiting", self.mask.trailing_zeros());
    }

    pub(crate) fn into_sccs(self) -> Vec<Vec<Vid>> {
        self.sccs
    }

    /// Fetches the next search to drive: a pending resumption if any,
    /// otherwise a fresh search on an unexplored root. Returns `None`
    /// only when every worker has simultaneously run out of work.
    fn next_search(&mut self) -> Option<SearchRef<'run>> {
        let ctx = self.ctx;
        // Entering the fetch loop is itself evidence of recent progress
        // (an SCC emitted, a suspension, a fresh worker): restart the
        // termination vote.
        ctx.flags.store(0, Ordering::Release);
        let mut update_flags_asap = true;

        loop {
            if let Some(search) = ctx.pending.try_pop() {
                return Some(search);
            }

            if let Some(root) = ctx.roots.next(&ctx.map, &mut self.scratch) {
                // Pin the candidate's life before claiming so a racing
                // recycle cannot hand the claim to the wrong vertex.
                if let Some(guard) = root.upgrade() {
                    let cell = guard.cell();
                    if cell.claim_or_fail(self.spare_search) {
                        let search = self.spare_search;
                        // SAFETY: the claim just succeeded, so `search`
                        // owns `cell` and this thread executes `search`.
                        unsafe {
                            self.init_frontier(cell);
                            search.set_root(cell);
                        }
                        self.allocate_spare_search();
                        return Some(search);
                    }
                }
                // Lost the root to a faster claimer; fall through to the
                // idle bookkeeping and retry.
            }

            if update_flags_asap {
                ctx.flags.fetch_or(self.mask, Ordering::AcqRel);
            }
            // Re-assert our bit next iteration if somebody cleared it.
            update_flags_asap =
                !update_flags_asap && ctx.flags.load(Ordering::Acquire) & self.mask == 0;

            if ctx.flags.load(Ordering::Acquire) == ctx.all_flags
                && ctx.pending.approximately_empty()
            {
                return None;
            }
            std::thread::sleep(IDLE_BACKOFF);
        }
    }

    /// Drives `search` until it suspends or finishes.
    fn execute(&mut self, search: SearchRef<'run>) {
        loop {
            match self.step(search) {
                DfsStep::Stepped => {}
                DfsStep::Suspended => return,
                DfsStep::Done => {
                    // SAFETY: the search ran to completion on this
                    // thread; both stacks are empty.
                    unsafe { self.reclaim_search(search) };
                    return;
                }
            }
        }
    }

    /// One DFS iteration on the current control-stack top.
    fn step(&mut self, search: SearchRef<'run>) -> DfsStep {
        // SAFETY (for the owner-exclusive accesses throughout): this
        // thread is the one executing `search`, and every cell touched
        // through the owner-only accessors is owned by `search` at the
        // time of the access.
        unsafe {
            if search.control_is_empty() {
                return DfsStep::Done;
            }
            let curr = search.control_top();

            if curr.frontier_is_empty() {
                // All successors explored: close the frame.
                debug_assert!(curr.rank() <= curr.index());
                search.control_pop();
                if !search.control_is_empty() {
                    search.control_top().promote(curr.rank());
                }
                if curr.index() == curr.rank() {
                    if ptr::eq(curr, search.tarjan_top()) {
                        self.emit_singleton(search, curr);
                    } else {
                        self.emit_scc(search, curr);
                    }
                }
                return DfsStep::Stepped;
            }

            let succ = curr.best_neighbor();
            let Some(guard) = succ.upgrade() else {
                // Expired: that life of the cell completed long ago.
                return DfsStep::Stepped;
            };
            let child = guard.cell();
            if child.is_complete() {
                return DfsStep::Stepped;
            }

            if child.on_stack_of(search) {
                // Back edge within our own stacks: fold in the lowlink.
                curr.promote(child.index());
                return DfsStep::Stepped;
            }

            match child.claim(search) {
                ClaimOutcome::Claimed => {
                    search.push_to_stacks(child);
                    self.init_frontier(child);
                }
                ClaimOutcome::Complete => {}
                ClaimOutcome::Occupied => {
                    if suspend(self, search, child) == SuspendOutcome::Suspend {
                        return DfsStep::Suspended;
                    }
                    // Resume: the conflict cell is ours now (or completed
                    // while we were suspending); just keep stepping.
                }
            }
            DfsStep::Stepped
        }
    }

    /// Materializes `cell`'s neighbor frontier, creating cells for
    /// never-seen successors through the scratch cell.
    ///
    /// # Safety
    /// Caller must own `cell` on the search this thread is executing (or
    /// have just claimed it as a root).
    unsafe fn init_frontier(&mut self, cell: CellRef<'run>) {
        let ctx = self.ctx;
        let vertex = cell.vertex();
        for &succ in ctx.graph.neighbors(vertex) {
            let stored = self.scratch.resolve(&ctx.map, succ);
            // A neighbor that already completed needs no visit at all.
            if !stored.cell.is_complete_for(stored.age) {
                cell.frontier_push(stored);
            }
        }
    }

    /// # Safety
    /// Caller must be executing `search`; `cell` must be the top of both
    /// stacks with an empty frontier.
    unsafe fn emit_singleton(&mut self, search: SearchRef<'run>, cell: CellRef<'run>) {
        search.tarjan_pop();
        let vertex = cell.vertex();
        cell.mark_complete();
        self.resume_all_blocked_on(cell);
        cell.permit_recycling();
        self.sccs.push(vec![vertex]);
    }

    /// Emits the SCC rooted at `head`: everything from `head` to the top
    /// of the Tarjan stack.
    ///
    /// # Safety
    /// Caller must be executing `search`; `head` must be on its Tarjan
    /// stack with `index == rank`.
    unsafe fn emit_scc(&mut self, search: SearchRef<'run>, head: CellRef<'run>) {
        let stack = search.tarjan_stack_mut();

        // Mark the whole component complete before waking anyone, so a
        // resumed search cannot observe a half-retired component.
        let mut start = stack.len() - 1;
        stack[start].mark_complete();
        while !ptr::eq(stack[start], head) {
            start -= 1;
            stack[start].mark_complete();
        }

        let mut scc = Vec::with_capacity(stack.len() - start);
        for &cell in &stack[start..] {
            // The vertex must be read before the artificial reference is
            // released: afterwards the cell can be recycled and restamped
            // by its home worker at any moment.
            scc.push(cell.vertex());
            self.resume_all_blocked_on(cell);
            cell.permit_recycling();
        }
        stack.truncate(start);
        self.sccs.push(scc);
    }

    /// Pushes every search genuinely blocked on `cell` to pending.
    fn resume_all_blocked_on(&mut self, cell: CellRef<'run>) {
        if cell.blocked().len() == 0 {
            return;
        }
        self.resume_buf.clear();
        bulk_unsuspend(cell, &mut self.resume_buf);
        for &search in &self.resume_buf {
            self.ctx.pending.push(search);
        }
    }

    /// Returns a finished search to this worker's pool.
    ///
    /// # Safety
    /// The search must be finished (both stacks empty) and not reachable
    /// by any other thread for execution.
    pub(crate) unsafe fn reclaim_search(&mut self, search: SearchRef<'run>) {
        search.reset();
        self.free_searches.push(search);
    }

    fn allocate_spare_search(&mut self) {
        self.spare_search = match self.free_searches.pop() {
            Some(search) => search,
            None => self.search_arena.alloc(),
        };
    }
}
