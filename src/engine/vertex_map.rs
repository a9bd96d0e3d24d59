//! Sharded concurrent map from vertex ID to the canonical weak cell
//! reference, with insert-or-get (`put_if_absent`) semantics.
//!
//! Layout: a power-of-two number of shards (default 2^12), each a small
//! open-addressed linear-probe table guarded by a spin lock. A
//! multiplicative (Fibonacci) mix spreads adversarial key patterns across
//! shards; with 2^12 shards and one-word critical sections, contention on
//! any single lock is negligible and `put_if_absent` stays dominated by
//! the probe itself. Tables resize under their shard lock at load factor
//! 1/2, which bounds writer blocking to one shard (the original design
//! gated resizing on an informal quiescence counter instead, which can
//! starve under sustained insertion).

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::engine::cell::{CellRef, CellWeak};
use crate::Vid;

/// Knuth's multiplicative constant (2^32 / phi).
const FIB_MIX: u32 = 0x9E37_79B9;

const INITIAL_SHARD_CAPACITY: usize = 8;

#[derive(Clone, Copy)]
struct Entry<'run> {
    key: Vid,
    age: Vid,
    cell: Option<CellRef<'run>>,
}

impl Entry<'_> {
    fn empty() -> Self {
        Entry { key: 0, age: 0, cell: None }
    }
}

struct Table<'run> {
    entries: Box<[Entry<'run>]>,
    len: usize,
}

impl<'run> Table<'run> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: vec![Entry::empty(); capacity].into_boxed_slice(),
            len: 0,
        }
    }
}

/// One spin-locked shard.
struct Shard<'run> {
    lock: AtomicBool,
    table: UnsafeCell<Table<'run>>,
}

// SAFETY: the table is only accessed while the shard spin lock is held;
// the lock's acquire/release pair orders those accesses across threads.
unsafe impl Sync for Shard<'_> {}

impl<'run> Shard<'run> {
    fn new() -> Self {
        Self {
            lock: AtomicBool::new(false),
            table: UnsafeCell::new(Table::with_capacity(INITIAL_SHARD_CAPACITY)),
        }
    }

    fn lock(&self) {
        loop {
            while self.lock.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
            if self
                .lock
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    fn unlock(&self) {
        self.lock.store(false, Ordering::Release);
    }
}

/// Concurrent vertex -> weak-cell map.
pub(crate) struct VertexMap<'run> {
    shards: Box<[Shard<'run>]>,
    shard_bits: u32,
}

impl<'run> VertexMap<'run> {
    /// Creates a map with `shards` shards (must be a power of two).
    pub(crate) fn new(shards: usize) -> Self {
        assert!(shards.is_power_of_two(), "map shard count must be a power of two");
        Self {
            shards: (0..shards).map(|_| Shard::new()).collect(),
            shard_bits: shards.trailing_zeros(),
        }
    }

    fn shard_for(&self, mix: u32) -> &Shard<'run> {
        // Top bits pick the shard, low bits pick the slot: the two stay
        // independent even for sequential keys.
        let index = if self.shard_bits == 0 {
            0
        } else {
            (mix >> (32 - self.shard_bits)) as usize
        };
        &self.shards[index]
    }

    /// Inserts `weak` for `key` unless an entry already exists.
    ///
    /// Returns the canonical weak reference for `key` and whether the
    /// supplied one was installed. The caller's cell must already carry
    /// the vertex `key`: once this call returns `(_, true)`, other
    /// threads may read the cell through the map.
    pub(crate) fn put_if_absent(
        &self,
        key: Vid,
        weak: CellWeak<'run>,
    ) -> (CellWeak<'run>, bool) {
        let mix = key.wrapping_mul(FIB_MIX);
        let shard = self.shard_for(mix);

        shard.lock();
        // SAFETY: lock held.
        let table = unsafe { &mut *shard.table.get() };

        if (table.len + 1) * 2 > table.entries.len() {
            Self::grow(table);
        }

        let mask = table.entries.len() - 1;
        let mut slot = mix as usize & mask;
        let result = loop {
            match table.entries[slot].cell {
                Some(cell) => {
                    if table.entries[slot].key == key {
                        break (CellWeak { cell, age: table.entries[slot].age }, false);
                    }
                    slot = (slot + 1) & mask;
                }
                None => {
                    table.entries[slot] = Entry { key, age: weak.age, cell: Some(weak.cell) };
                    table.len += 1;
                    break (weak, true);
                }
            }
        };
        shard.unlock();
        result
    }

    fn grow(table: &mut Table<'run>) {
        let new_capacity = table.entries.len() * 2;
        let mut grown = Table::with_capacity(new_capacity);
        grown.len = table.len;
        let mask = new_capacity - 1;
        for entry in table.entries.iter() {
            if entry.cell.is_some() {
                let mut slot = entry.key.wrapping_mul(FIB_MIX) as usize & mask;
                while grown.entries[slot].cell.is_some() {
                    slot = (slot + 1) & mask;
                }
                grown.entries[slot] = *entry;
            }
        }
        *table = grown;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::arena::CellArena;

    #[test]
    fn insert_then_get_returns_first_entry() {
        let arena = CellArena::new();
        let map = VertexMap::new(8);

        let first = arena.take();
        // SAFETY: unpublished cell owned by this thread.
        unsafe { first.set_vertex(42) };
        let (stored, inserted) = map.put_if_absent(42, first.weak());
        assert!(inserted);
        assert!(core::ptr::eq(stored.cell, first));

        let second = arena.take();
        unsafe { second.set_vertex(42) };
        let (stored, inserted) = map.put_if_absent(42, second.weak());
        assert!(!inserted);
        assert!(core::ptr::eq(stored.cell, first));
    }

    #[test]
    fn many_keys_force_resize() {
        let arena = CellArena::new();
        let map = VertexMap::new(1);

        let mut cells = Vec::new();
        for key in 0..500u32 {
            let cell = arena.take();
            unsafe { cell.set_vertex(key) };
            let (_, inserted) = map.put_if_absent(key, cell.weak());
            assert!(inserted);
            cells.push(cell);
        }
        for (key, &cell) in cells.iter().enumerate() {
            let probe = arena.take();
            let (stored, inserted) = map.put_if_absent(key as u32, probe.weak());
            assert!(!inserted, "key {key} should already be present");
            assert!(core::ptr::eq(stored.cell, cell));
        }
    }

    #[test]
    fn concurrent_inserts_pick_one_winner_per_key() {
        const THREADS: usize = 4;
        const KEYS: u32 = 300;

        let arenas: Vec<CellArena> = (0..THREADS).map(|_| CellArena::new()).collect();
        let map = VertexMap::new(64);

        let insert_wins: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = arenas
                .iter()
                .map(|arena| {
                    let map = &map;
                    scope.spawn(move || {
                        let mut wins = 0;
                        let mut spare = arena.take();
                        for key in 0..KEYS {
                            unsafe { spare.set_vertex(key) };
                            let (_, inserted) = map.put_if_absent(key, spare.weak());
                            if inserted {
                                wins += 1;
                                spare = arena.take();
                            }
                        }
                        wins
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(insert_wins, KEYS as usize);
    }
}
