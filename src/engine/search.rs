//! One DFS in flight: the Tarjan stack, the explicit control stack, and
//! the transfer protocol that moves an SCC-candidate suffix between
//! searches to resolve a blocking cycle.
//!
//! Invariants (holding while the owner is quiescent):
//! - Tarjan-stack cells are in strictly increasing `index`, and
//!   `rank <= index` for each of them.
//! - The control stack is a subsequence of the Tarjan stack in order,
//!   containing exactly the cells with open DFS frames.
//! - A search owns exactly the cells whose status carries its address.
//! - `blocked_on` is non-null iff the search is suspended; `age` parity
//!   is odd exactly while the search anchors a cycle resolution.

use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::engine::cell::{CellRef, VertexCell};
use crate::Vid;

/// Shared reference to a search; arena-owned, lives for the whole run.
pub(crate) type SearchRef<'run> = &'run Search<'run>;

/// # Safety
/// `addr` must have been obtained from [`Search::addr`] on a search that
/// was arena-allocated within the current run.
pub(crate) unsafe fn search_from_addr<'run>(addr: usize) -> SearchRef<'run> {
    &*(addr as *const Search<'run>)
}

/// One in-flight depth-first search.
pub(crate) struct Search<'run> {
    /// Owned cells in discovery order, not yet assigned to an SCC.
    tarjan: UnsafeCell<Vec<CellRef<'run>>>,
    /// Cells with open DFS frames; replaces the recursion stack.
    control: UnsafeCell<Vec<CellRef<'run>>>,
    /// Next discovery index to assign.
    cell_count: UnsafeCell<Vid>,
    /// Cell this search is suspended on (address, zero when running).
    blocked_on: AtomicUsize,
    /// Even while normal; odd while anchoring a cycle resolution; bumped
    /// by two when the search is reset for reuse.
    age: AtomicU32,
}

// SAFETY: stacks and `cell_count` are owner-exclusive (the executing
// worker, or the holder of the consensus token); `blocked_on` and `age`
// are atomics.
unsafe impl Sync for Search<'_> {}

impl<'run> Search<'run> {
    pub(crate) fn new() -> Self {
        Self {
            tarjan: UnsafeCell::new(Vec::new()),
            control: UnsafeCell::new(Vec::new()),
            cell_count: UnsafeCell::new(0),
            blocked_on: AtomicUsize::new(0),
            age: AtomicU32::new(0),
        }
    }

    pub(crate) fn addr(&self) -> usize {
        self as *const Self as usize
    }

    /* ----------------------------- age ------------------------------- */

    pub(crate) fn age(&self) -> u32 {
        self.age.load(Ordering::Acquire)
    }

    /// Claims the right to resolve a cycle by making the age odd.
    pub(crate) fn claim_resolution(&self, expected_age: u32) -> bool {
        self.age
            .compare_exchange(expected_age, expected_age + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Restores even parity after a resolution.
    pub(crate) fn finish_resolution(&self) {
        self.age.fetch_add(1, Ordering::AcqRel);
    }

    /* --------------------------- blocking ----------------------------- */

    /// Marks the search suspended on `cell`.
    pub(crate) fn suspend_on(&self, cell: CellRef<'run>) {
        self.blocked_on.store(cell.addr(), Ordering::Release);
    }

    /// Raw `blocked_on` word (a cell address, or zero when running).
    pub(crate) fn blocked_on_raw(&self) -> usize {
        self.blocked_on.load(Ordering::Acquire)
    }

    /// The cell this search is suspended on, if any.
    pub(crate) fn blocked_cell(&self) -> Option<CellRef<'run>> {
        let addr = self.blocked_on_raw();
        if addr == 0 {
            None
        } else {
            // SAFETY: non-zero `blocked_on` words are addresses of
            // arena-allocated cells, valid for 'run.
            Some(unsafe { &*(addr as *const VertexCell<'run>) })
        }
    }

    /// Atomically un-suspends the search, but only if it is still blocked
    /// on `cell`; used where a racing resumption may have won already.
    pub(crate) fn unblock_from(&self, cell: CellRef<'run>) -> bool {
        self.blocked_on
            .compare_exchange(cell.addr(), 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Un-suspends unconditionally; only for paths with no racing waker.
    pub(crate) fn clear_blocked_on(&self) {
        self.blocked_on.store(0, Ordering::Release);
    }

    /* ----------------------- owner-exclusive -------------------------- */

    /// # Safety
    /// Caller must be the executing worker or hold the consensus token.
    pub(crate) unsafe fn cell_count(&self) -> Vid {
        *self.cell_count.get()
    }

    /// Pushes an owned cell onto both stacks and assigns its index.
    ///
    /// # Safety
    /// Caller must be the executing worker and own `cell`.
    pub(crate) unsafe fn push_to_stacks(&self, cell: CellRef<'run>) {
        (*self.tarjan.get()).push(cell);
        (*self.control.get()).push(cell);
        let count = self.cell_count.get();
        cell.init_index(*count);
        *count += 1;
    }

    /// # Safety
    /// Caller must be the executing worker.
    pub(crate) unsafe fn set_root(&self, root: CellRef<'run>) {
        self.push_to_stacks(root);
    }

    /// # Safety
    /// Caller must be the executing worker or hold the consensus token.
    pub(crate) unsafe fn control_is_empty(&self) -> bool {
        (*self.control.get()).is_empty()
    }

    /// # Safety
    /// Caller must be the executing worker or hold the consensus token;
    /// the control stack must be non-empty.
    pub(crate) unsafe fn control_top(&self) -> CellRef<'run> {
        *(*self.control.get()).last().expect("control stack is empty")
    }

    /// # Safety
    /// As for [`control_top`](Self::control_top).
    pub(crate) unsafe fn control_pop(&self) {
        (*self.control.get()).pop();
    }

    /// # Safety
    /// Caller must be the executing worker; the Tarjan stack must be
    /// non-empty.
    pub(crate) unsafe fn tarjan_top(&self) -> CellRef<'run> {
        *(*self.tarjan.get()).last().expect("tarjan stack is empty")
    }

    /// # Safety
    /// As for [`tarjan_top`](Self::tarjan_top).
    pub(crate) unsafe fn tarjan_pop(&self) {
        (*self.tarjan.get()).pop();
    }

    /// # Safety
    /// Caller must be the executing worker; the returned borrow must not
    /// outlive the caller's exclusive access.
    pub(crate) unsafe fn tarjan_stack_mut(&self) -> &mut Vec<CellRef<'run>> {
        &mut *self.tarjan.get()
    }

    /// Finished means the control stack has emptied (run to completion or
    /// fully absorbed by transfers).
    ///
    /// # Safety
    /// Caller must be the executing worker or hold the consensus token.
    pub(crate) unsafe fn done(&self) -> bool {
        self.control_is_empty()
    }

    /// Re-derives `cell_count` after cells were moved in or out.
    ///
    /// # Safety
    /// Caller must hold exclusive access; the Tarjan stack must be
    /// non-empty.
    pub(crate) unsafe fn refresh_cell_count(&self) {
        let top = *(*self.tarjan.get()).last().expect("tarjan stack is empty");
        *self.cell_count.get() = top.index().wrapping_add(1);
    }

    /// Prepares the search object for reuse; the age bump by two keeps
    /// parity even and expires any stale references to the old life.
    ///
    /// # Safety
    /// Caller must hold exclusive access and both stacks must be empty.
    pub(crate) unsafe fn reset(&self) {
        debug_assert!((*self.tarjan.get()).is_empty());
        debug_assert!((*self.control.get()).is_empty());
        *self.cell_count.get() = 0;
        self.age.fetch_add(2, Ordering::AcqRel);
    }
}

/// Moves the SCC-candidate suffix of `src`'s stacks to `dest`.
///
/// Walking `src`'s Tarjan stack from the top, the transferred region ends
/// at the first cell that (a) is at or below `conflict` and (b) has an
/// index no greater than the minimum rank seen so far. By the stack
/// invariants that region is exactly the suffix containing every cell
/// known to share `conflict`'s SCC; transferring less would let `src` and
/// `dest` collide again on the same component.
///
/// Afterwards `src`, if it still owns cells, is suspended on the deepest
/// transferred cell (`last`), which now belongs to `dest`.
///
/// # Safety
/// Caller must hold the consensus token for the cycle containing `src`
/// and `dest`, giving it exclusive access to both searches' stacks.
///
/// # Panics
/// Panics if the deepest transferred cell is missing from `src`'s control
/// stack, which would mean the stack invariants are broken.
pub(crate) unsafe fn transfer_cells<'run>(
    src: SearchRef<'run>,
    dest: SearchRef<'run>,
    conflict: CellRef<'run>,
) {
    let src_tarjan = &mut *src.tarjan.get();
    let src_control = &mut *src.control.get();

    let mut pos = src_tarjan.len() - 1;
    let mut next = src_tarjan[pos];
    let mut min_rank = next.rank();
    let mut reached_conflict = ptr::eq(next, conflict);

    while !reached_conflict || next.index() > min_rank {
        pos -= 1;
        next = src_tarjan[pos];
        min_rank = min_rank.min(next.rank());
        if ptr::eq(next, conflict) {
            reached_conflict = true;
        }
    }
    let last = next;

    let delta = dest.cell_count().wrapping_sub(last.index());

    let dest_tarjan = &mut *dest.tarjan.get();
    for &cell in &src_tarjan[pos..] {
        cell.transfer(delta, dest);
        dest_tarjan.push(cell);
    }
    src_tarjan.truncate(pos);

    // `last` must be on src's control stack: within the transferred
    // region its index equals its rank (or it is the conflict cell), so
    // its frame is still open.
    let split = src_control
        .iter()
        .rposition(|&cell| ptr::eq(cell, last))
        .expect("stack transfer: deepest transferred cell missing from source control stack");
    (*dest.control.get()).extend_from_slice(&src_control[split..]);
    src_control.truncate(split);

    if src_tarjan.is_empty() {
        src.clear_blocked_on();
    } else {
        // Src keeps waiting, now on the deepest cell it gave away.
        src.suspend_on(last);
        last.block_search(src);
        src.refresh_cell_count();
    }
    dest.refresh_cell_count();
}
