//! Per-worker storage for cells and searches.
//!
//! Both object kinds are allocated in fixed-capacity chunks whose heap
//! buffers never move, so a `&'run` reference handed out once stays valid
//! for the entire run; "freeing" an object means putting it on a free
//! list and bumping its age, never deallocating. This is what makes the
//! weak-reference-with-age scheme ABA-free: a stale pointer always lands
//! on a live object whose age exposes the reuse.
//!
//! - Cells return to the *allocating* worker's [`FreeStack`]: the last
//!   strong reference can be dropped by any thread, so the push side is
//!   a lock-free multi-producer stack; only the owning worker pops.
//! - Searches are only reclaimed by the worker currently driving them,
//!   so their pool is a plain vector owned by that worker.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::engine::cell::{CellRef, CellWeak, VertexCell};
use crate::engine::search::{Search, SearchRef};
use crate::engine::vertex_map::VertexMap;
use crate::Vid;

/// Cells per arena chunk.
const CELL_CHUNK: usize = 256;
/// Searches per arena chunk.
const SEARCH_CHUNK: usize = 32;

/// Intrusive lock-free stack of recycled cells (Treiber push, owner-only
/// pop). Links are the cells' own `free_next` fields; entries are stored
/// as addresses, with zero as the empty marker.
pub(crate) struct FreeStack<'run> {
    head: CachePadded<AtomicUsize>,
    _marker: PhantomData<CellRef<'run>>,
}

impl<'run> FreeStack<'run> {
    pub(crate) fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            _marker: PhantomData,
        }
    }

    /// Pushes a recycled cell. Callable from any thread.
    pub(crate) fn push(&self, cell: &VertexCell<'run>) {
        let addr = cell.addr();
        loop {
            let head = self.head.load(Ordering::Acquire);
            cell.free_next.store(head, Ordering::Relaxed);
            if self
                .head
                .compare_exchange(head, addr, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Pops a recycled cell.
    ///
    /// Only the owning worker pops, so there is no concurrent-pop ABA:
    /// the head can only change underneath us by growing.
    pub(crate) fn pop(&self) -> Option<CellRef<'run>> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head == 0 {
                return None;
            }
            // SAFETY: non-zero entries are addresses of arena-allocated
            // cells, valid for 'run.
            let cell = unsafe { &*(head as *const VertexCell<'run>) };
            let next = cell.free_next.load(Ordering::Relaxed);
            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(cell);
            }
        }
    }
}

/// Chunked cell storage owned by one worker.
pub(crate) struct CellArena<'run> {
    chunks: UnsafeCell<Vec<Vec<VertexCell<'run>>>>,
    free: FreeStack<'run>,
}

// SAFETY: `free` is lock-free; `chunks` is only touched by the owning
// worker thread (allocation), while other threads merely hold shared
// references into the chunk buffers, which never move or shrink.
unsafe impl Sync for CellArena<'_> {}

impl<'run> CellArena<'run> {
    pub(crate) fn new() -> Self {
        Self {
            chunks: UnsafeCell::new(Vec::new()),
            free: FreeStack::new(),
        }
    }

    /// Hands out an initialized NEW cell, reusing a recycled one when
    /// available.
    ///
    /// Must only be called by the owning worker.
    pub(crate) fn take(&'run self) -> CellRef<'run> {
        let cell = match self.free.pop() {
            Some(cell) => cell,
            None => self.alloc(),
        };
        cell.init_cell();
        cell
    }

    fn alloc(&'run self) -> CellRef<'run> {
        // SAFETY: only the owning worker allocates, so no aliasing
        // mutable access exists. Chunk buffers are pre-sized and never
        // reallocated, so references into them are stable for 'run.
        unsafe {
            let chunks = &mut *self.chunks.get();
            if chunks.last().map_or(true, |chunk| chunk.len() == chunk.capacity()) {
                chunks.push(Vec::with_capacity(CELL_CHUNK));
            }
            let chunk = chunks.last_mut().expect("chunk just pushed");
            debug_assert!(chunk.len() < chunk.capacity());
            chunk.push(VertexCell::new(&self.free));
            &*(chunk.last().expect("cell just pushed") as *const VertexCell<'run>)
        }
    }
}

/// Chunked search storage owned by one worker. Reuse goes through the
/// worker's own pool vector, so the arena itself only ever grows.
pub(crate) struct SearchArena<'run> {
    chunks: UnsafeCell<Vec<Vec<Search<'run>>>>,
}

// SAFETY: only the owning worker allocates; other threads hold shared
// references into stable chunk buffers.
unsafe impl Sync for SearchArena<'_> {}

impl<'run> SearchArena<'run> {
    pub(crate) fn new() -> Self {
        Self { chunks: UnsafeCell::new(Vec::new()) }
    }

    /// Allocates a fresh search.
    ///
    /// Must only be called by the owning worker.
    pub(crate) fn alloc(&'run self) -> SearchRef<'run> {
        // SAFETY: as in `CellArena::alloc`.
        unsafe {
            let chunks = &mut *self.chunks.get();
            if chunks.last().map_or(true, |chunk| chunk.len() == chunk.capacity()) {
                chunks.push(Vec::with_capacity(SEARCH_CHUNK));
            }
            let chunk = chunks.last_mut().expect("chunk just pushed");
            debug_assert!(chunk.len() < chunk.capacity());
            chunk.push(Search::new());
            &*(chunk.last().expect("search just pushed") as *const Search<'run>)
        }
    }
}

/// The worker's spare pre-allocated cell, used to make map insertion
/// allocation-free on the contended path: the vertex is written into the
/// spare before `put_if_absent`, and only a winning insert consumes it.
pub(crate) struct ScratchCell<'run> {
    arena: &'run CellArena<'run>,
    cell: CellRef<'run>,
}

impl<'run> ScratchCell<'run> {
    pub(crate) fn new(arena: &'run CellArena<'run>) -> Self {
        Self { arena, cell: arena.take() }
    }

    /// Stamps the spare with `vertex` and returns the weak reference to
    /// publish. The spare is unpublished, so the plain write cannot race.
    pub(crate) fn weak_for(&mut self, vertex: Vid) -> CellWeak<'run> {
        // SAFETY: the spare cell is owned by this worker and has not been
        // published through the map.
        unsafe { self.cell.set_vertex(vertex) };
        self.cell.weak()
    }

    /// The spare was inserted into the map; replace it.
    pub(crate) fn consume(&mut self) {
        self.cell = self.arena.take();
    }

    /// Inserts `vertex` through the spare, replacing the spare if the
    /// insert won. Returns the canonical weak reference for the vertex.
    pub(crate) fn resolve(&mut self, map: &VertexMap<'run>, vertex: Vid) -> CellWeak<'run> {
        let weak = self.weak_for(vertex);
        let (stored, inserted) = map.put_if_absent(vertex, weak);
        if inserted {
            self.consume();
        }
        stored
    }
}
