//! Work distribution: the root queue feeding unexplored vertices to idle
//! workers, and the pending queue of searches ready to resume.

use core::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;
use crossbeam_utils::CachePadded;

use crate::engine::arena::ScratchCell;
use crate::engine::cell::CellWeak;
use crate::engine::search::SearchRef;
use crate::engine::vertex_map::VertexMap;
use crate::Vid;

/// Feeds root candidates to workers that have no pending search to
/// resume. A single fetch-add cursor over the vertex array hands each
/// vertex to exactly one worker; vertices whose cell is no longer NEW by
/// the time they are pulled are skipped, since some search has already
/// visited them.
pub(crate) struct RootQueue {
    vertices: Box<[Vid]>,
    cursor: CachePadded<AtomicUsize>,
}

impl RootQueue {
    pub(crate) fn new(vertices: Box<[Vid]>) -> Self {
        Self {
            vertices,
            cursor: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the canonical weak reference of the next vertex that is
    /// still NEW, materializing cells through `scratch` as needed, or
    /// `None` once the vertex array is exhausted.
    pub(crate) fn next<'run>(
        &self,
        map: &VertexMap<'run>,
        scratch: &mut ScratchCell<'run>,
    ) -> Option<CellWeak<'run>> {
        loop {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed);
            let &vertex = self.vertices.get(index)?;
            let stored = scratch.resolve(map, vertex);
            if stored.cell.is_new_for(stored.age) {
                return Some(stored);
            }
        }
    }
}

/// Lock-free MPMC queue of searches ready to resume. Workers drain this
/// before starting new roots, so suspended work is picked back up as soon
/// as the cell it waited for completes.
pub(crate) struct PendingQueue<'run> {
    inner: SegQueue<SearchRef<'run>>,
}

impl<'run> PendingQueue<'run> {
    pub(crate) fn new() -> Self {
        Self { inner: SegQueue::new() }
    }

    pub(crate) fn push(&self, search: SearchRef<'run>) {
        self.inner.push(search);
    }

    pub(crate) fn try_pop(&self) -> Option<SearchRef<'run>> {
        self.inner.pop()
    }

    /// Best-effort emptiness check for termination detection; a racing
    /// push may be missed, which only delays the next check.
    pub(crate) fn approximately_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
