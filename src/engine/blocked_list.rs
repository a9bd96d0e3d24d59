//! Lock-free append-only list of searches blocked on a cell.
//!
//! The list is tuned for the common case: a cell almost never has more
//! than a few searches suspended on it, so the first bucket of `BASE`
//! slots is embedded directly in the cell and costs no allocation. On
//! overflow, auxiliary buckets of geometrically growing capacity are
//! published with a double-checked CAS and never moved, so readers can
//! walk the structure while writers append.
//!
//! Invariants:
//! - `head` is bumped with fetch-add; each writer owns exactly one slot.
//! - Entries are never deleted. Readers tolerate stale and not-yet-stored
//!   (zero) entries; the resumption path re-validates every candidate
//!   with a CAS on the search's `blocked_on` field.
//! - `reset` may only run while no other thread references the cell
//!   (refcount zero, during recycling).

use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// log2 of the inline bucket capacity.
const P: usize = 3;
/// Capacity of the inline bucket.
const BASE: usize = 1 << P;
/// Maximum number of buckets (inline bucket included).
const N_BUFS: usize = 8;

const fn bucket_tables() -> ([usize; N_BUFS], [usize; N_BUFS]) {
    let mut powers = [0usize; N_BUFS];
    let mut sums = [0usize; N_BUFS];
    powers[0] = BASE;
    sums[0] = BASE;
    let mut i = 1;
    while i < N_BUFS {
        powers[i] = powers[i - 1] << P;
        sums[i] = sums[i - 1] + powers[i];
        i += 1;
    }
    (powers, sums)
}

const TABLES: ([usize; N_BUFS], [usize; N_BUFS]) = bucket_tables();
/// `POWERS[i]` is the capacity of bucket `i`.
const POWERS: [usize; N_BUFS] = TABLES.0;
/// `SUMS[i]` is the total capacity of buckets `0..=i`.
const SUMS: [usize; N_BUFS] = TABLES.1;
/// Total capacity across all buckets; exceeding it is a fatal error.
pub(crate) const CAPACITY: usize = SUMS[N_BUFS - 1];

/// Returns the bucket holding global slot `idx` (`idx < CAPACITY`).
fn find_bucket(idx: usize) -> usize {
    let mut bucket = 0;
    while idx >= SUMS[bucket] {
        bucket += 1;
    }
    bucket
}

/// Append-only multi-writer list of non-zero words (search addresses).
pub(crate) struct BlockedList {
    head: AtomicUsize,
    first: [AtomicUsize; BASE],
    /// Auxiliary buckets `1..N_BUFS`, allocated on first need.
    bufs: [AtomicPtr<AtomicUsize>; N_BUFS - 1],
}

impl BlockedList {
    pub(crate) const fn new() -> Self {
        const ZERO: AtomicUsize = AtomicUsize::new(0);
        const NULL: AtomicPtr<AtomicUsize> = AtomicPtr::new(ptr::null_mut());
        Self {
            head: AtomicUsize::new(0),
            first: [ZERO; BASE],
            bufs: [NULL; N_BUFS - 1],
        }
    }

    /// Number of slots handed out so far. An upper bound on the number of
    /// visible entries: a writer may still be storing into its slot.
    pub(crate) fn len(&self) -> usize {
        self.head.load(Ordering::Acquire)
    }

    /// Appends `item` (must be non-zero; zero is the empty-slot marker).
    ///
    /// # Panics
    /// Panics if the list has run out of buckets. With the default
    /// parameters that is ~19M entries on one cell, which no legal
    /// schedule produces.
    pub(crate) fn push(&self, item: usize) {
        debug_assert!(item != 0, "zero is reserved for empty slots");
        let idx = self.head.fetch_add(1, Ordering::AcqRel);

        if idx < BASE {
            self.first[idx].store(item, Ordering::Release);
            return;
        }

        assert!(
            idx < CAPACITY,
            "blocked list overflow: slot {idx} exceeds total capacity {CAPACITY}"
        );
        let bucket = find_bucket(idx);
        let pos = idx - SUMS[bucket - 1];
        let buf = self.bucket_ptr(bucket);
        // SAFETY: `buf` points to a live allocation of POWERS[bucket]
        // slots (published below and never freed before drop), and
        // `pos < POWERS[bucket]` by the bucket arithmetic.
        unsafe { (*buf.add(pos)).store(item, Ordering::Release) };
    }

    /// Returns bucket `bucket` (1-based), allocating and publishing it
    /// with a double-checked CAS if this writer is first.
    fn bucket_ptr(&self, bucket: usize) -> *mut AtomicUsize {
        let slot = &self.bufs[bucket - 1];
        let existing = slot.load(Ordering::Acquire);
        if !existing.is_null() {
            return existing;
        }

        let fresh: Box<[AtomicUsize]> = (0..POWERS[bucket]).map(|_| AtomicUsize::new(0)).collect();
        let fresh = Box::into_raw(fresh).cast::<AtomicUsize>();
        match slot.compare_exchange(ptr::null_mut(), fresh, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => fresh,
            Err(winner) => {
                // Another writer published first; ours was never shared.
                // SAFETY: `fresh` came from Box::into_raw above with this
                // exact length and has not been exposed to other threads.
                unsafe {
                    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                        fresh,
                        POWERS[bucket],
                    )));
                }
                winner
            }
        }
    }

    /// Visits every visible non-zero entry in insertion order.
    ///
    /// When `head <= BASE` this touches only the inline bucket. Slots
    /// whose store has not landed yet read as zero and are skipped; a
    /// bucket that is not yet published ends the walk (its entries are
    /// not visible either).
    pub(crate) fn for_each(&self, mut visit: impl FnMut(usize)) {
        let len = self.len().min(CAPACITY);
        let inline = len.min(BASE);
        for slot in &self.first[..inline] {
            let item = slot.load(Ordering::Acquire);
            if item != 0 {
                visit(item);
            }
        }

        let mut consumed = BASE;
        for bucket in 1..N_BUFS {
            if consumed >= len {
                break;
            }
            let buf = self.bufs[bucket - 1].load(Ordering::Acquire);
            if buf.is_null() {
                break;
            }
            let take = (len - consumed).min(POWERS[bucket]);
            for pos in 0..take {
                // SAFETY: bucket is published and pos < POWERS[bucket].
                let item = unsafe { (*buf.add(pos)).load(Ordering::Acquire) };
                if item != 0 {
                    visit(item);
                }
            }
            consumed += take;
        }
    }

    /// Clears all occupied slots and rewinds `head`.
    ///
    /// Must only be called while no other thread can reach the owning
    /// cell (refcount zero during recycling); entries from the cell's
    /// previous life must not leak into the next one.
    pub(crate) fn reset(&self) {
        if self.head.load(Ordering::Acquire) == 0 {
            return;
        }
        for slot in &self.first {
            slot.store(0, Ordering::Relaxed);
        }
        for bucket in 1..N_BUFS {
            let buf = self.bufs[bucket - 1].load(Ordering::Acquire);
            if buf.is_null() {
                continue;
            }
            for pos in 0..POWERS[bucket] {
                // SAFETY: bucket is published and pos < POWERS[bucket].
                unsafe { (*buf.add(pos)).store(0, Ordering::Relaxed) };
            }
        }
        self.head.store(0, Ordering::Release);
    }
}

impl Drop for BlockedList {
    fn drop(&mut self) {
        for bucket in 1..N_BUFS {
            let buf = *self.bufs[bucket - 1].get_mut();
            if !buf.is_null() {
                // SAFETY: published buckets were created by Box::into_raw
                // with exactly POWERS[bucket] slots.
                unsafe {
                    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                        buf,
                        POWERS[bucket],
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_tables_are_geometric() {
        assert_eq!(POWERS[0], 8);
        assert_eq!(POWERS[1], 64);
        assert_eq!(POWERS[2], 512);
        assert_eq!(SUMS[0], 8);
        assert_eq!(SUMS[1], 72);
        assert_eq!(SUMS[2], 584);
        assert_eq!(find_bucket(0), 0);
        assert_eq!(find_bucket(7), 0);
        assert_eq!(find_bucket(8), 1);
        assert_eq!(find_bucket(71), 1);
        assert_eq!(find_bucket(72), 2);
    }

    #[test]
    fn inline_bucket_roundtrip() {
        let list = BlockedList::new();
        for item in 1..=5usize {
            list.push(item);
        }
        assert_eq!(list.len(), 5);
        let mut seen = Vec::new();
        list.for_each(|item| seen.push(item));
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn growth_past_inline_bucket() {
        let list = BlockedList::new();
        for item in 1..=600usize {
            list.push(item);
        }
        let mut seen = Vec::new();
        list.for_each(|item| seen.push(item));
        assert_eq!(seen.len(), 600);
        assert_eq!(seen, (1..=600).collect::<Vec<_>>());
    }

    #[test]
    fn reset_clears_all_buckets() {
        let list = BlockedList::new();
        for item in 1..=100usize {
            list.push(item);
        }
        list.reset();
        assert_eq!(list.len(), 0);
        let mut seen = Vec::new();
        list.for_each(|item| seen.push(item));
        assert!(seen.is_empty());

        // The list is reusable after a reset.
        list.push(7);
        list.for_each(|item| seen.push(item));
        assert_eq!(seen, vec![7]);
    }

    #[test]
    fn concurrent_appends_all_land() {
        const WRITERS: usize = 4;
        const PER_WRITER: usize = 250;

        let list = BlockedList::new();
        std::thread::scope(|scope| {
            for w in 0..WRITERS {
                let list = &list;
                scope.spawn(move || {
                    for i in 0..PER_WRITER {
                        list.push(w * PER_WRITER + i + 1);
                    }
                });
            }
        });

        assert_eq!(list.len(), WRITERS * PER_WRITER);
        let mut seen = Vec::new();
        list.for_each(|item| seen.push(item));
        seen.sort_unstable();
        assert_eq!(seen, (1..=WRITERS * PER_WRITER).collect::<Vec<_>>());
    }
}
