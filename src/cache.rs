//! Bounded LRU cache of fixed-capacity tile buffers with per-entry locking and
//! at-most-one-concurrent-fill semantics (C1).
//!
//! Structured after `TileCache` in `cache.rs`'s prior form (`parking_lot::Mutex` +
//! `AtomicU64` hit/miss counters + `VecDeque`-based LRU order), generalized from a flat
//! `(level,col,row)` key to an arbitrary-rank `Index`, and from a lock-free `DashMap`
//! lookup to slots that are pre-allocated once and individually lockable so a caller may
//! hold one across a fill (the prior cache never held a lock across I/O — it deduped
//! fills through a side `in_flight` set instead, see `scheduler.rs`).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{LoaderError, LoaderResult};
use crate::geometry::{index_in_bounds, volume, Index, Shape};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Empty,
    Filled,
}

/// One cache slot: a fixed-capacity buffer plus its fill status and resident index.
/// Recycled in place; never reallocated after cache construction.
pub struct SlotState<T> {
    pub status: Status,
    pub index: Option<Index>,
    pub buffer: Vec<T>,
}

struct MasterState {
    by_index: HashMap<Index, usize>,
    lru: VecDeque<usize>,
    free: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// A cache entry handed to the caller with its per-entry lock held. Dropping it (or
/// calling `Cache::release`) releases the lock without touching LRU order.
pub struct LockedEntry<'a, T> {
    guard: MutexGuard<'a, SlotState<T>>,
    slot: usize,
}

impl<'a, T> LockedEntry<'a, T> {
    pub fn status(&self) -> Status {
        self.guard.status
    }

    pub fn index(&self) -> Option<&Index> {
        self.guard.index.as_ref()
    }

    pub fn buffer(&self) -> &[T] {
        &self.guard.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [T] {
        &mut self.guard.buffer
    }

    pub fn mark_filled(&mut self) {
        self.guard.status = Status::Filled;
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

pub struct Cache<T> {
    slots: Vec<Mutex<SlotState<T>>>,
    master: Mutex<MasterState>,
    dims: Shape,
    tile_shape: Shape,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Default + Clone> Cache<T> {
    /// `capacity = 0` is interpreted as `min(18, grid volume)`.
    pub fn new(user_capacity: usize, dims: Shape, tile_shape: Shape) -> LoaderResult<Self> {
        let grid_volume = volume(&dims) as usize;
        if grid_volume == 0 {
            return Err(LoaderError::InvalidConfiguration(
                "tile grid has a zero-sized dimension".into(),
            ));
        }
        let requested = if user_capacity == 0 {
            18.min(grid_volume)
        } else {
            user_capacity
        };
        let capacity = requested.min(grid_volume).max(1);
        let tile_volume = volume(&tile_shape) as usize;
        if tile_volume == 0 {
            return Err(LoaderError::InvalidConfiguration(
                "tile_shape has a zero-sized dimension".into(),
            ));
        }

        let slots = (0..capacity)
            .map(|_| {
                Mutex::new(SlotState {
                    status: Status::Empty,
                    index: None,
                    buffer: vec![T::default(); tile_volume],
                })
            })
            .collect();

        Ok(Self {
            slots,
            master: Mutex::new(MasterState {
                by_index: HashMap::new(),
                lru: VecDeque::new(),
                free: (0..capacity).collect(),
            }),
            dims,
            tile_shape,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn tile_shape(&self) -> &Shape {
        &self.tile_shape
    }

    pub fn is_evicting(&self) -> bool {
        volume(&self.dims) as usize > self.capacity()
    }

    /// Returns the entry for `index`, with its per-entry lock held by the caller.
    pub fn acquire(&self, index: &Index) -> LoaderResult<LockedEntry<'_, T>> {
        if !index_in_bounds(index, &self.dims) {
            return Err(LoaderError::InvalidIndex {
                index: index.clone(),
                level: 0,
                reason: "index exceeds tile grid dimensions".into(),
            });
        }

        let mut master = self.master.lock();
        if let Some(&slot) = master.by_index.get(index) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            move_to_front(&mut master.lru, slot);
            drop(master);
            let guard = self.slots[slot].lock();
            return Ok(LockedEntry { guard, slot });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let slot = if let Some(slot) = master.free.pop() {
            slot
        } else {
            self.evict_one(&mut master)?
        };
        master.by_index.insert(index.clone(), slot);
        master.lru.push_front(slot);
        drop(master);

        let mut guard = self.slots[slot].lock();
        guard.status = Status::Empty;
        guard.index = Some(index.clone());
        Ok(LockedEntry { guard, slot })
    }

    pub fn release(&self, entry: LockedEntry<'_, T>) {
        drop(entry);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Picks an eviction target from the LRU tail, skipping any slot whose per-entry
    /// lock is currently held. Falls back to blocking on the absolute tail if every
    /// resident entry is locked.
    fn evict_one(&self, master: &mut MasterState) -> LoaderResult<usize> {
        if master.lru.is_empty() {
            return Err(LoaderError::InternalInvariantViolation(
                "cache has no free slot and nothing to evict".into(),
            ));
        }

        let mut skipped = Vec::new();
        let chosen = loop {
            match master.lru.pop_back() {
                Some(candidate) => {
                    if let Some(guard) = self.slots[candidate].try_lock() {
                        drop(guard);
                        break candidate;
                    }
                    skipped.push(candidate);
                }
                None => {
                    // Every resident entry is locked; block on the last one we saw.
                    let fallback = *skipped.last().expect("skipped is non-empty here");
                    let _ = self.slots[fallback].lock();
                    skipped.pop();
                    break fallback;
                }
            }
        };
        for s in skipped.into_iter().rev() {
            master.lru.push_back(s);
        }

        if let Some(old_index) = self.slots[chosen].lock().index.take() {
            master.by_index.remove(&old_index);
        }
        Ok(chosen)
    }
}

fn move_to_front(lru: &mut VecDeque<usize>, slot: usize) {
    if let Some(pos) = lru.iter().position(|&s| s == slot) {
        lru.remove(pos);
    }
    lru.push_front(slot);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_miss_then_hit() {
        let cache: Cache<i64> = Cache::new(2, vec![3], vec![2]).unwrap();
        {
            let mut e = cache.acquire(&vec![0]).unwrap();
            assert_eq!(e.status(), Status::Empty);
            e.buffer_mut()[0] = 42;
            e.mark_filled();
            cache.release(e);
        }
        let e = cache.acquire(&vec![0]).unwrap();
        assert_eq!(e.status(), Status::Filled);
        assert_eq!(e.buffer()[0], 42);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn rejects_out_of_range_index() {
        let cache: Cache<i64> = Cache::new(2, vec![3], vec![2]).unwrap();
        assert!(cache.acquire(&vec![3]).is_err());
    }

    #[test]
    fn evicts_lru_tail_when_full() {
        let cache: Cache<i64> = Cache::new(2, vec![4], vec![1]).unwrap();
        cache.release(cache.acquire(&vec![0]).unwrap());
        cache.release(cache.acquire(&vec![1]).unwrap());
        // Touch index 0 again so it is now most-recently-used; index 1 becomes LRU tail.
        cache.release(cache.acquire(&vec![0]).unwrap());
        cache.release(cache.acquire(&vec![2]).unwrap());

        assert_eq!(cache.stats().misses, 3);
        let e0 = cache.acquire(&vec![0]).unwrap();
        assert_eq!(e0.status(), Status::Filled);
        drop(e0);
        let e1 = cache.acquire(&vec![1]).unwrap();
        assert_eq!(e1.status(), Status::Empty, "index 1 should have been evicted");
    }

    #[test]
    fn zero_capacity_falls_back_to_default() {
        let cache: Cache<i64> = Cache::new(0, vec![100], vec![1]).unwrap();
        assert_eq!(cache.capacity(), 18);
    }

    #[test]
    fn capacity_never_exceeds_grid_volume() {
        let cache: Cache<i64> = Cache::new(100, vec![4], vec![1]).unwrap();
        assert_eq!(cache.capacity(), 4);
        assert!(!cache.is_evicting());
    }

    #[test]
    fn concurrent_acquire_same_index_serializes() {
        use std::sync::Arc;
        use std::thread;

        let cache: Arc<Cache<i64>> = Arc::new(Cache::new(1, vec![1], vec![1]).unwrap());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                let mut e = cache.acquire(&vec![0]).unwrap();
                let before = e.buffer()[0];
                e.buffer_mut()[0] = before + 1;
                cache.release(e);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let e = cache.acquire(&vec![0]).unwrap();
        assert_eq!(e.buffer()[0], 8);
    }
}
