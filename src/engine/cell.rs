//! Per-vertex state: the claim protocol, the neighbor frontier, and the
//! age/refcount scheme that makes recycling safe while weak references
//! dangle.
//!
//! Concurrency model (see also the crate-level notes):
//! - `status`, `age`, `refs` and the blocked list are multi-writer
//!   atomics.
//! - `vertex`, `index`, `rank` and the frontier are owner-exclusive:
//!   they are only touched by the thread currently executing the owning
//!   search (or holding the cycle-resolution consensus token), which is
//!   why they live in plain `UnsafeCell`s.
//! - A cell is recycled only when it is COMPLETE and its refcount is
//!   zero; the age bump at recycling expires every outstanding weak
//!   reference to the previous life.

use core::cell::UnsafeCell;
use core::sync::atomic::{self, AtomicU32, AtomicUsize, Ordering};

use crate::engine::arena::FreeStack;
use crate::engine::blocked_list::BlockedList;
use crate::engine::search::{search_from_addr, Search, SearchRef};
use crate::Vid;

/// Shared reference to a cell; the backing storage is arena-owned and
/// lives for the whole run.
pub(crate) type CellRef<'run> = &'run VertexCell<'run>;

/// `status` word: unclaimed, never visited.
pub(crate) const STATUS_NEW: usize = 0;
/// `status` word: assigned to an SCC; terminal for this life of the cell.
pub(crate) const STATUS_COMPLETE: usize = 1;
// Any other status value is the address of the owning `Search`, which is
// aligned and therefore never collides with the two sentinels.

/// Result of [`VertexCell::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaimOutcome {
    /// The CAS won; the cell is now owned by the claiming search.
    Claimed,
    /// The cell is on another search's stacks.
    Occupied,
    /// The cell is already assigned to an SCC.
    Complete,
}

/// Algorithmic record for one graph vertex during SCC computation.
pub(crate) struct VertexCell<'run> {
    /// Vertex this cell currently represents. Written by the allocating
    /// worker before the cell is published through the vertex map.
    vertex: UnsafeCell<Vid>,
    /// Discovery index; meaningful only while on a search's stacks.
    index: UnsafeCell<Vid>,
    /// Lowlink; meaningful only while on a search's stacks.
    rank: UnsafeCell<Vid>,
    status: AtomicUsize,
    /// Neighbors the owning search has not visited yet.
    frontier: UnsafeCell<Vec<CellWeak<'run>>>,
    blocked: BlockedList,
    /// Which life of the cell this is; bumped at each recycling.
    age: AtomicU32,
    /// Live strong references, including the artificial one held from
    /// initialization until `mark_complete`.
    refs: AtomicU32,
    /// Intrusive link for the home free stack.
    pub(crate) free_next: AtomicUsize,
    /// Free stack of the allocating worker; the cell returns there when
    /// its refcount hits zero.
    home: &'run FreeStack<'run>,
}

// SAFETY: all multi-writer fields are atomics; the `UnsafeCell` fields
// are governed by the owner-exclusive writer discipline documented on
// each accessor. Shared references are handed across threads, mutation
// is not.
unsafe impl Sync for VertexCell<'_> {}

impl<'run> VertexCell<'run> {
    pub(crate) fn new(home: &'run FreeStack<'run>) -> Self {
        Self {
            vertex: UnsafeCell::new(0),
            index: UnsafeCell::new(0),
            rank: UnsafeCell::new(0),
            status: AtomicUsize::new(STATUS_NEW),
            frontier: UnsafeCell::new(Vec::new()),
            blocked: BlockedList::new(),
            age: AtomicU32::new(0),
            refs: AtomicU32::new(0),
            free_next: AtomicUsize::new(0),
            home,
        }
    }

    pub(crate) fn addr(&self) -> usize {
        self as *const Self as usize
    }

    pub(crate) fn age(&self) -> Vid {
        self.age.load(Ordering::Acquire)
    }

    /// Begins a life: the cell is NEW and holds the artificial reference
    /// that delays recycling until it completes. Called by the allocating
    /// worker before the cell can be published.
    pub(crate) fn init_cell(&self) {
        self.status.store(STATUS_NEW, Ordering::Release);
        self.refs.store(1, Ordering::Release);
    }

    /// Weak reference to the current life of this cell.
    pub(crate) fn weak(&'run self) -> CellWeak<'run> {
        CellWeak { cell: self, age: self.age() }
    }

    /* ------------------------- status machine ------------------------ */

    fn status_word(&self) -> usize {
        self.status.load(Ordering::Acquire)
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.status_word() == STATUS_COMPLETE
    }

    /// Complete *for a given life*: an age mismatch means the life the
    /// caller knew has finished, so there is nothing left to visit.
    pub(crate) fn is_complete_for(&self, expected_age: Vid) -> bool {
        self.status_word() == STATUS_COMPLETE || self.age() != expected_age
    }

    pub(crate) fn is_new_for(&self, expected_age: Vid) -> bool {
        self.status_word() == STATUS_NEW && self.age() == expected_age
    }

    /// Is the cell on the stacks of `search`?
    pub(crate) fn on_stack_of(&self, search: SearchRef<'run>) -> bool {
        self.status_word() == search.addr()
    }

    /// The owning search, or `None` for NEW and COMPLETE cells.
    pub(crate) fn owner(&self) -> Option<SearchRef<'run>> {
        let status = self.status_word();
        if status == STATUS_NEW || status == STATUS_COMPLETE {
            None
        } else {
            // SAFETY: a non-sentinel status word is the address of a
            // search stored by `claim`/`transfer`; searches are
            // arena-allocated and live for `'run`.
            Some(unsafe { search_from_addr(status) })
        }
    }

    /// Attempts the NEW -> OWNED(search) transition.
    pub(crate) fn claim(&self, search: SearchRef<'run>) -> ClaimOutcome {
        if self.status.load(Ordering::Relaxed) == STATUS_NEW
            && self
                .status
                .compare_exchange(STATUS_NEW, search.addr(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return ClaimOutcome::Claimed;
        }
        if self.status_word() == STATUS_COMPLETE {
            return ClaimOutcome::Complete;
        }
        ClaimOutcome::Occupied
    }

    /// Same CAS as [`claim`](Self::claim), but the caller only learns
    /// whether it won; used when starting a search from a root candidate.
    pub(crate) fn claim_or_fail(&self, search: SearchRef<'run>) -> bool {
        self.status.load(Ordering::Relaxed) == STATUS_NEW
            && self
                .status
                .compare_exchange(STATUS_NEW, search.addr(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Retires the cell.
    ///
    /// # Safety
    /// The caller must own the cell and its frontier must be empty.
    pub(crate) unsafe fn mark_complete(&self) {
        self.status.store(STATUS_COMPLETE, Ordering::Release);
    }

    /// Hands the cell to `new_owner`, shifting `index`/`rank` by `delta`
    /// (mod 2^32) to fit the destination stacks.
    ///
    /// # Safety
    /// The caller must hold exclusive logical ownership of the cell (the
    /// cycle-resolution consensus token). Non-owners never read
    /// `index`/`rank`, so the plain stores cannot race.
    pub(crate) unsafe fn transfer(&self, delta: Vid, new_owner: SearchRef<'run>) {
        let index = self.index.get();
        *index = (*index).wrapping_add(delta);
        let rank = self.rank.get();
        *rank = (*rank).wrapping_add(delta);
        self.status.store(new_owner.addr(), Ordering::Release);
    }

    /* --------------------- owner-exclusive fields --------------------- */

    /// # Safety
    /// Caller must be the allocating worker (unpublished cell) or own the
    /// cell.
    pub(crate) unsafe fn vertex(&self) -> Vid {
        *self.vertex.get()
    }

    /// # Safety
    /// Caller must be the allocating worker and the cell must not yet be
    /// published through the vertex map.
    pub(crate) unsafe fn set_vertex(&self, vertex: Vid) {
        *self.vertex.get() = vertex;
    }

    /// # Safety
    /// Caller must own the cell.
    pub(crate) unsafe fn index(&self) -> Vid {
        *self.index.get()
    }

    /// # Safety
    /// Caller must own the cell.
    pub(crate) unsafe fn rank(&self) -> Vid {
        *self.rank.get()
    }

    /// Assigns the discovery index (lowlink starts equal).
    ///
    /// # Safety
    /// Caller must own the cell.
    pub(crate) unsafe fn init_index(&self, index: Vid) {
        *self.index.get() = index;
        *self.rank.get() = index;
    }

    /// Lowers the lowlink to `min(rank, update)`.
    ///
    /// # Safety
    /// Caller must own the cell.
    pub(crate) unsafe fn promote(&self, update: Vid) {
        let rank = self.rank.get();
        *rank = (*rank).min(update);
    }

    /// # Safety
    /// Caller must own the cell.
    pub(crate) unsafe fn frontier_is_empty(&self) -> bool {
        (*self.frontier.get()).is_empty()
    }

    /// # Safety
    /// Caller must own the cell.
    pub(crate) unsafe fn frontier_push(&self, neighbor: CellWeak<'run>) {
        (*self.frontier.get()).push(neighbor);
    }

    /// Removes and returns a neighbor to explore, preferring one that is
    /// not currently on another search's stacks.
    ///
    /// Starts at the back of the frontier; if the back candidate is
    /// unclaimed or on our own stacks it is taken directly. Otherwise the
    /// frontier is scanned from the front for the first such candidate.
    /// If every neighbor is occupied the back element is taken anyway —
    /// the choice is a collision-avoidance heuristic, not a guarantee,
    /// and is deliberately unsynchronized.
    ///
    /// # Safety
    /// Caller must own the cell, and the frontier must be non-empty.
    pub(crate) unsafe fn best_neighbor(&self) -> CellWeak<'run> {
        let owner = self.status.load(Ordering::Relaxed);
        let frontier = &mut *self.frontier.get();

        let candidate = *frontier.last().expect("best_neighbor on empty frontier");
        if candidate.is_unclaimed() || candidate.cell.status_word() == owner {
            frontier.pop();
            return candidate;
        }

        for i in 0..frontier.len() {
            let candidate = frontier[i];
            if candidate.is_unclaimed() || candidate.cell.status_word() == owner {
                frontier.remove(i);
                return candidate;
            }
        }

        frontier.pop().expect("best_neighbor on empty frontier")
    }

    /* --------------------------- blocking ---------------------------- */

    pub(crate) fn blocked(&self) -> &BlockedList {
        &self.blocked
    }

    /// Records that `search` is waiting for this cell to complete.
    pub(crate) fn block_search(&self, search: SearchRef<'run>) {
        self.blocked.push(search.addr());
    }

    /* --------------------------- refcount ----------------------------- */

    /// Releases the artificial reference taken at `init_cell`, allowing
    /// the cell to be recycled once every other reference is gone.
    pub(crate) fn permit_recycling(&self) {
        self.release_ref();
    }

    pub(crate) fn release_ref(&self) {
        if self.refs.fetch_sub(1, Ordering::Release) == 1 {
            atomic::fence(Ordering::Acquire);
            self.recycle();
        }
    }

    /// Ends this life of the cell and returns it to its home free stack.
    /// Runs on whichever thread dropped the last reference.
    fn recycle(&self) {
        debug_assert!(self.is_complete(), "recycling a cell that is not complete");
        // The age bump must precede the free-stack push: once the cell is
        // reachable through the free list, stale weak references have to
        // observe the expired age.
        self.age.fetch_add(1, Ordering::Release);
        if self.blocked.len() != 0 {
            self.blocked.reset();
        }
        self.home.push(self);
    }
}

/// Weak reference: a cell handle plus the age it had when the reference
/// was created. Expired iff the cell has since been recycled.
#[derive(Clone, Copy)]
pub(crate) struct CellWeak<'run> {
    pub(crate) cell: CellRef<'run>,
    pub(crate) age: Vid,
}

impl<'run> CellWeak<'run> {
    /// Not on any search's stacks, as far as an unsynchronized glance can
    /// tell: NEW, COMPLETE, or from an already-finished life.
    pub(crate) fn is_unclaimed(&self) -> bool {
        let status = self.cell.status_word();
        status == STATUS_NEW || status == STATUS_COMPLETE || self.cell.age() != self.age
    }

    /// Promotes to a strong reference if this life of the cell is still
    /// current.
    ///
    /// The age is re-checked after the refcount increment: a successful
    /// increment with a matching age proves the increment landed on the
    /// referenced life, whose refcount our reference now holds above
    /// zero.
    pub(crate) fn upgrade(self) -> Option<CellGuard<'run>> {
        let cell = self.cell;
        let mut refs = cell.refs.load(Ordering::Acquire);
        loop {
            if refs == 0 {
                // Zero references: this life is over (or not yet begun).
                return None;
            }
            match cell
                .refs
                .compare_exchange_weak(refs, refs + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(current) => refs = current,
            }
        }
        if cell.age.load(Ordering::Acquire) == self.age {
            Some(CellGuard { cell })
        } else {
            cell.release_ref();
            None
        }
    }
}

/// Counted strong reference; keeps the cell from being recycled while the
/// guard is alive.
pub(crate) struct CellGuard<'run> {
    cell: CellRef<'run>,
}

impl<'run> CellGuard<'run> {
    pub(crate) fn cell(&self) -> CellRef<'run> {
        self.cell
    }
}

impl Drop for CellGuard<'_> {
    fn drop(&mut self) {
        self.cell.release_ref();
    }
}

// The status sentinels must never alias a real search address; searches
// are word-aligned, so both sentinels sit below the smallest possible
// address.
const _: () = {
    assert!(STATUS_NEW != STATUS_COMPLETE);
    assert!(STATUS_COMPLETE < core::mem::align_of::<Search<'static>>());
};
