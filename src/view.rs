//! View descriptor and the static view buffer pool (C3).
//!
//! Structured after `SlidePool`'s pooled-resource idiom: its
//! `Arc<RwLock<HashMap<..>>>` lazy-cache pattern for the bookkeeping side, extended with
//! a `parking_lot::Condvar` (the same blocking-coordination primitive `bulk_preload.rs`'s
//! cancellation flag and `scheduler.rs`'s generation counters lean on) to implement the
//! pool's backpressure: acquiring a view blocks while the pool is empty.

use parking_lot::{Condvar, Mutex};

use crate::error::LoaderResult;
use crate::geometry::{volume, Index, Shape};

/// A view buffer and its geometry, recycled by the pool.
pub struct View<T> {
    pub level: u32,
    pub index: Index,
    pub tile_shape: Shape,
    pub full_shape: Shape,
    pub radii: Vec<u64>,
    pub view_shape: Shape,
    pub data: Vec<T>,
    pub release_target: u32,
    pub release_count: u32,
    pub nb_outstanding_copies: usize,
    /// Index into the owning `ViewPool`'s slot vector this buffer was taken from;
    /// `recycle` returns it there directly rather than guessing from slot state.
    pub(crate) slot: usize,
}

impl<T> View<T> {
    pub fn volume(&self) -> u64 {
        volume(&self.view_shape)
    }
}

struct Slot<T> {
    data: Vec<T>,
    in_use: bool,
}

/// Static pool of pre-allocated view buffers, one pool per pyramid level.
pub struct ViewPool<T> {
    slots: Mutex<Vec<Slot<T>>>,
    available: Condvar,
    max_view_shape: Shape,
}

impl<T: Default + Clone> ViewPool<T> {
    pub fn new(count: usize, max_view_volume: u64, max_view_shape: Shape) -> Self {
        let slots = (0..count.max(1))
            .map(|_| Slot {
                data: vec![T::default(); max_view_volume as usize],
                in_use: false,
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
            available: Condvar::new(),
            max_view_shape,
        }
    }

    /// Blocks until a free buffer is available, then stamps it with the requested
    /// geometry: every field is re-initialized on each acquisition.
    pub fn acquire(
        &self,
        level: u32,
        index: Index,
        tile_shape: Shape,
        full_shape: Shape,
        radii: Vec<u64>,
        release_target: u32,
    ) -> LoaderResult<View<T>> {
        let view_shape: Shape = tile_shape
            .iter()
            .zip(radii.iter())
            .map(|(&t, &r)| t + 2 * r)
            .collect();
        let needed = volume(&view_shape);

        let mut slots = self.slots.lock();
        let slot_idx = loop {
            if let Some(pos) = slots.iter().position(|s| !s.in_use) {
                break pos;
            }
            self.available.wait(&mut slots);
        };
        slots[slot_idx].in_use = true;
        let mut data = std::mem::take(&mut slots[slot_idx].data);
        drop(slots);

        data.resize(needed as usize, T::default());
        for v in data.iter_mut() {
            *v = T::default();
        }

        Ok(View {
            level,
            index,
            tile_shape,
            full_shape,
            radii,
            view_shape,
            data,
            release_target: release_target.max(1),
            release_count: 0,
            nb_outstanding_copies: 0,
            slot: slot_idx,
        })
    }

    /// Returns the buffer to the pool once the caller has driven `release_count` to
    /// `release_target` (the caller is expected to call `ViewLoader::release`, which
    /// performs that bookkeeping and only calls this once the target is reached).
    ///
    /// Returns the buffer to the exact slot it was taken from in `acquire` — `view.slot`
    /// — rather than searching for a plausible-looking free slot: with more than one view
    /// outstanding, every other slot also looks "free enough" once its own buffer has been
    /// `mem::take`n, so any heuristic search can return a different view's recycle to the
    /// wrong slot and strand the rightful one as permanently in-use.
    pub fn recycle(&self, view: View<T>) {
        let mut slots = self.slots.lock();
        slots[view.slot].data = view.data;
        slots[view.slot].in_use = false;
        drop(slots);
        self.available.notify_one();
    }

    pub fn max_view_shape(&self) -> &Shape {
        &self.max_view_shape
    }
}
