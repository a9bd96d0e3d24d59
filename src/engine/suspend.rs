//! Suspension: what happens when a search runs into a cell owned by
//! another search.
//!
//! The suspending search is appended to the cell's blocked list and
//! marked blocked. If that suspension closed a cycle in the blocking
//! graph (search -> cell it waits on -> owning search -> ...), the cycle
//! is resolved immediately by transferring every participant's
//! SCC-candidate stack suffix to the suspending search, which then owns
//! the whole conflict region and can make progress.
//!
//! Cycle detection is a two-pass walk:
//!
//! 1. Follow `blocked_on` edges from the suspending search. Record each
//!    visited (search, cell) pair together with the ages both objects had
//!    at visit time. Stop on a non-suspended search (no cycle), on a
//!    search whose age is odd (someone else is resolving an overlapping
//!    cycle — safe to just stay suspended), or on arriving back at the
//!    suspending search (candidate cycle).
//! 2. Re-walk the recorded path and verify nothing moved: same blocked
//!    cells, same owners, same ages. A search cannot suspend on the same
//!    cell twice in one life, so an unchanged path proves the cycle was
//!    stable the whole time. Age reads are ordered carefully: a cell's
//!    age is read *before* re-reading the field that reached it, so a
//!    recycle between the reads shows up as a mismatch and aborts the
//!    resolution rather than validating a stale path.
//!
//! A confirmed cycle still needs a consensus step, because several
//! threads may confirm the same cycle concurrently: the age of the
//! participant with the numerically smallest address is CAS-bumped to an
//! odd value, and only the winner runs the transfers.

use core::ptr;

use crate::engine::cell::CellRef;
use crate::engine::search::{search_from_addr, transfer_cells, SearchRef};
use crate::engine::worker::Worker;
use crate::trace::trace_event;

/// Outcome of [`suspend`]: does the worker drop the search (another
/// worker will resume it later) or keep executing it?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SuspendOutcome {
    Suspend,
    Resume,
}

/// Recorded blocking path, reused across calls to avoid reallocating on
/// every suspension.
#[derive(Default)]
pub(crate) struct CyclePath<'run> {
    /// `searches[i]` owns `cells[i]`; the previous participant waits on it.
    searches: Vec<SearchRef<'run>>,
    cells: Vec<CellRef<'run>>,
    /// Ages of the searches at first-pass visit time.
    search_ages: Vec<u32>,
    /// Ages of the cells at first-pass visit time.
    cell_ages: Vec<u32>,
}

impl<'run> CyclePath<'run> {
    fn clear(&mut self) {
        self.searches.clear();
        self.cells.clear();
        self.search_ages.clear();
        self.cell_ages.clear();
    }

    fn push(&mut self, search: SearchRef<'run>, cell: CellRef<'run>, search_age: u32, cell_age: u32) {
        self.searches.push(search);
        self.cells.push(cell);
        self.search_ages.push(search_age);
        self.cell_ages.push(cell_age);
    }
}

/// Suspends `sn` on `conflict`, resolving a blocking cycle if this
/// suspension created one.
///
/// Returns [`SuspendOutcome::Resume`] when `sn` may keep executing: either
/// `conflict` completed while we were suspending, or a cycle was detected
/// and resolved, in which case the conflict cell has been transferred to
/// `sn`'s own stacks.
pub(crate) fn suspend<'env, 'run, G>(
    worker: &mut Worker<'env, 'run, G>,
    sn: SearchRef<'run>,
    conflict: CellRef<'run>,
) -> SuspendOutcome {
    let sn_age = sn.age();

    conflict.block_search(sn);
    sn.suspend_on(conflict);

    // The cell may have completed before we landed on its blocked list,
    // in which case its resumption sweep may have already run and missed
    // us. Do its work ourselves: whoever wins the CAS owns the wake-up.
    if conflict.is_complete() {
        return if sn.unblock_from(conflict) {
            SuspendOutcome::Resume
        } else {
            // Lost the race: a sweeper has already pushed us to pending.
            SuspendOutcome::Suspend
        };
    }

    /* First pass: walk the blocking chain. */

    let path = &mut worker.cycle_path;
    path.clear();

    let mut current = sn;
    loop {
        let Some(cell) = current.blocked_cell() else {
            return SuspendOutcome::Suspend;
        };
        // Record the cell's age, then confirm `current` is still blocked
        // on it; reading in the other order could pair a recycled cell
        // with a fresh age and miss the reuse.
        let cell_age = cell.age();
        if current.blocked_on_raw() != cell.addr() {
            return SuspendOutcome::Suspend;
        }

        let Some(owner) = cell.owner() else {
            return SuspendOutcome::Suspend;
        };
        let owner_age = owner.age();
        // Odd age: that search is inside another thread's resolution.
        if owner_age & 1 == 1 {
            return SuspendOutcome::Suspend;
        }

        path.push(owner, cell, owner_age, cell_age);
        current = owner;
        if ptr::eq(current, sn) {
            break;
        }
    }

    /* Second pass: verify the path is unchanged. */

    let len = path.searches.len();
    let mut min_ptr = 0;
    let mut current = sn;
    for i in 0..len {
        let blocked_raw = current.blocked_on_raw();
        // The age check pins `current` to the life observed in the first
        // pass (the age recorded one step earlier on the path).
        if current.age() != path.search_ages[(i + len - 1) % len] {
            return SuspendOutcome::Suspend;
        }
        if blocked_raw != path.cells[i].addr() {
            return SuspendOutcome::Suspend;
        }
        let cell = path.cells[i];
        let Some(owner) = cell.owner() else {
            return SuspendOutcome::Suspend;
        };
        if !ptr::eq(owner, path.searches[i]) {
            return SuspendOutcome::Suspend;
        }
        // Completeness was checked first (via `owner`), so an unchanged
        // age here really does mean the same life of the cell.
        if cell.age() != path.cell_ages[i] {
            return SuspendOutcome::Suspend;
        }
        if path.searches[i].addr() < path.searches[min_ptr].addr() {
            min_ptr = i;
        }
        current = owner;
    }

    // If sn moved on to a different cell, or finished and was recycled,
    // whichever thread suspends it next can deal with any cycle.
    if sn.blocked_on_raw() != conflict.addr() || sn_age != path.search_ages[len - 1] {
        return SuspendOutcome::Suspend;
    }

    /* Consensus: only one thread may resolve this cycle. */

    if !path.searches[min_ptr].claim_resolution(path.search_ages[min_ptr]) {
        return SuspendOutcome::Suspend;
    }

    // Clear sn's blocked mark before touching stacks so the intermediate
    // states cannot be mistaken for a new cycle by concurrent walkers.
    sn.clear_blocked_on();

    // SAFETY: the consensus token grants exclusive access to the stacks
    // of every search on the path; all of them are suspended (verified
    // above) and cannot be resumed while their cells are incomplete.
    unsafe {
        for i in 0..len - 1 {
            transfer_cells(path.searches[i], sn, path.cells[i]);
        }
        // The absorbed cells all share the SCC of the conflict chain;
        // fold that evidence into the current frame's lowlink.
        sn.control_top().promote(path.cells[len - 1].index());
    }

    path.searches[min_ptr].finish_resolution();

    trace_event!("resolved blocking cycle of {len} searches");

    // Searches left with nothing on their stacks are finished; recycle
    // them. (`sn` still holds the conflict region, so it is never among
    // them.)
    for i in 0..len {
        let search = path.searches[i];
        // SAFETY: a drained search is unreachable for execution: it is
        // not blocked, not pending, and owns no cells, so this thread
        // has the only access.
        unsafe {
            if search.done() {
                search.reset();
                worker.free_searches.push(search);
            }
        }
    }

    SuspendOutcome::Resume
}

/// Wakes every search that is genuinely still blocked on `cell`, pushing
/// the winners into `out`.
///
/// Blocked lists never shrink, so entries may be stale (the search moved
/// on, was transferred, or was recycled); the CAS on `blocked_on` is the
/// arbiter — exactly one waker wins per suspended search.
pub(crate) fn bulk_unsuspend<'run>(cell: CellRef<'run>, out: &mut Vec<SearchRef<'run>>) {
    cell.blocked().for_each(|addr| {
        // SAFETY: blocked-list entries are addresses of arena-allocated
        // searches, valid for 'run.
        let search = unsafe { search_from_addr(addr) };
        if search.unblock_from(cell) {
            out.push(search);
        }
    });
}
