//! Adaptive remapper: serves views whose logical tile geometry differs from the
//! file's physical tile geometry via an intermediate per-level logical-tile cache.
//!
//! The logical-tile cache reuses `Cache<T>` verbatim, dimensioned by the logical
//! grid instead of the physical one, and the logical-to-view and physical-to-logical
//! copy plans both reuse the plan generator: a logical tile is
//! simply a view with `radii = 0` whose "file" is addressed with `logical_tile_shape`,
//! and the view itself is planned against `logical_tile_shape` exactly as it would be
//! against the physical `tile_shape` in non-adaptive mode.
//!
//! This implementation resolves the decomposition synchronously while holding the
//! logical entry's lock: sibling physical-tile fetches for one logical tile run one at a
//! time rather than as independently-scheduled messages converging on an atomic counter.
//! Observable behavior is identical (the entry's lock already serializes every other
//! reader against this fill) and it avoids needing unsafe, split-borrow access into one
//! buffer from several worker threads at once; parallelism across *different* logical
//! tiles and different views is unaffected, since each acquires its own entry lock.

use crate::cache::{Cache, LockedEntry, Status};
use crate::copy::execute_copy;
use crate::error::LoaderResult;
use crate::geometry::{Index, Interval, Shape};
use crate::plan::{generate_plan, generate_plan_for_region, Plan};
use crate::reader::ReaderAdapter;

pub struct AdaptiveRemapper<T> {
    logical_cache: Cache<T>,
    logical_tile_shape: Shape,
}

impl<T: Default + Clone + Copy + Send + Sync> AdaptiveRemapper<T> {
    pub fn new(
        logical_capacity: usize,
        logical_grid_dims: Shape,
        logical_tile_shape: Shape,
    ) -> LoaderResult<Self> {
        Ok(Self {
            logical_cache: Cache::new(logical_capacity, logical_grid_dims, logical_tile_shape.clone())?,
            logical_tile_shape,
        })
    }

    pub fn logical_tile_shape(&self) -> &Shape {
        &self.logical_tile_shape
    }

    /// The copy records taking the view from logical tiles; the count of these is the
    /// view's published `nb_outstanding_copies` in adaptive mode — logical copies, not
    /// the physical fetches each one may internally decompose into.
    pub fn plan_for_view(&self, view_index: &Index, radii: &[u64], full_shape: &[u64]) -> LoaderResult<Plan> {
        generate_plan(view_index, radii, &self.logical_tile_shape, full_shape)
    }

    /// Ensures the logical tile at `logical_index` is filled, decomposing it into
    /// physical-tile fetches through `physical_cache`/`reader` if necessary. Returns the
    /// entry still locked so the caller can copy out of it before releasing.
    pub fn ensure_logical_tile_filled(
        &self,
        logical_index: &Index,
        physical_tile_shape: &[u64],
        physical_cache: &Cache<T>,
        reader: &ReaderAdapter<T>,
        full_shape: &[u64],
        level: u32,
    ) -> LoaderResult<LockedEntry<'_, T>> {
        let mut entry = self.logical_cache.acquire(logical_index)?;
        if entry.status() == Status::Filled {
            return Ok(entry);
        }

        // The logical tile's own region in global coordinates — sized by
        // `logical_tile_shape`, not `physical_tile_shape` — is what must be decomposed
        // into physical-tile fetches, so this goes through `generate_plan_for_region`
        // directly rather than `generate_plan` (which would derive the region from
        // `logical_index * physical_tile_shape`, wrong whenever the two shapes differ).
        let region: Vec<Interval> = (0..full_shape.len())
            .map(|axis| {
                let lo = logical_index[axis] as i64 * self.logical_tile_shape[axis] as i64;
                Interval {
                    lo,
                    hi: lo + self.logical_tile_shape[axis] as i64,
                }
            })
            .collect();
        let inner_plan = generate_plan_for_region(&region, physical_tile_shape, full_shape)?;

        for record in &inner_plan.records {
            let mut phys_entry = physical_cache.acquire(&record.source_tile_index)?;
            if phys_entry.status() == Status::Empty {
                reader.fill(phys_entry.buffer_mut(), &record.source_tile_index, level)?;
                phys_entry.mark_filled();
            }
            execute_copy(
                record,
                physical_tile_shape,
                phys_entry.buffer(),
                &self.logical_tile_shape,
                entry.buffer_mut(),
            );
            physical_cache.release(phys_entry);
        }

        entry.mark_filled();
        Ok(entry)
    }

    pub fn stats(&self) -> crate::cache::CacheStats {
        self.logical_cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ReaderAdapter;
    use crate::test_support::PatternReader;

    #[test]
    fn logical_tile_matches_direct_physical_read_when_shapes_equal() {
        // logical_tile_shape == physical tile_shape means the adaptive path reproduces
        // a plain tile read.
        let full_shape = vec![5u64, 5, 5];
        let physical_tile_shape = vec![2u64, 2, 2];
        let reader = ReaderAdapter::new(Box::new(PatternReader::new(
            full_shape.clone(),
            physical_tile_shape.clone(),
        )));
        let physical_cache: Cache<i64> =
            Cache::new(4, crate::geometry::tile_grid_dims(&full_shape, &physical_tile_shape).unwrap(), physical_tile_shape.clone())
                .unwrap();
        let logical_grid = crate::geometry::tile_grid_dims(&full_shape, &physical_tile_shape).unwrap();
        let remapper: AdaptiveRemapper<i64> =
            AdaptiveRemapper::new(4, logical_grid, physical_tile_shape.clone()).unwrap();

        let entry = remapper
            .ensure_logical_tile_filled(&vec![1, 0, 1], &physical_tile_shape, &physical_cache, &reader, &full_shape, 0)
            .unwrap();

        let mut direct = vec![0i64; 8];
        reader.fill(&mut direct, &vec![1, 0, 1], 0).unwrap();
        assert_eq!(entry.buffer(), direct.as_slice());
    }

    #[test]
    fn logical_tile_larger_than_physical_decomposes_into_every_covering_physical_tile() {
        // logical_tile_shape (2x2) spans 4 distinct physical tiles (1x1 each); the
        // logical tile's own region, not `logical_index * physical_tile_shape`, must be
        // what gets decomposed.
        let full_shape = vec![5u64, 5];
        let physical_tile_shape = vec![1u64, 1];
        let logical_tile_shape = vec![2u64, 2];
        let reader = ReaderAdapter::new(Box::new(PatternReader::new(
            full_shape.clone(),
            physical_tile_shape.clone(),
        )));
        let physical_cache: Cache<i64> = Cache::new(
            16,
            crate::geometry::tile_grid_dims(&full_shape, &physical_tile_shape).unwrap(),
            physical_tile_shape.clone(),
        )
        .unwrap();
        let logical_grid = crate::geometry::tile_grid_dims(&full_shape, &logical_tile_shape).unwrap();
        let remapper: AdaptiveRemapper<i64> =
            AdaptiveRemapper::new(9, logical_grid, logical_tile_shape).unwrap();

        // Logical tile index (1,1) covers global rows/cols [2,4)x[2,4).
        let entry = remapper
            .ensure_logical_tile_filled(&vec![1, 1], &physical_tile_shape, &physical_cache, &reader, &full_shape, 0)
            .unwrap();
        assert_eq!(entry.buffer(), &[33, 34, 43, 44]);
    }

    #[test]
    fn second_acquire_is_cache_hit() {
        let full_shape = vec![4u64, 4];
        let physical_tile_shape = vec![2u64, 2];
        let reader = ReaderAdapter::new(Box::new(PatternReader::new(
            full_shape.clone(),
            physical_tile_shape.clone(),
        )));
        let physical_cache: Cache<i64> =
            Cache::new(4, vec![2, 2], physical_tile_shape.clone()).unwrap();
        let remapper: AdaptiveRemapper<i64> =
            AdaptiveRemapper::new(4, vec![2, 2], physical_tile_shape.clone()).unwrap();

        let e1 = remapper
            .ensure_logical_tile_filled(&vec![0, 0], &physical_tile_shape, &physical_cache, &reader, &full_shape, 0)
            .unwrap();
        drop(e1);
        assert_eq!(remapper.stats().misses, 1);
        let e2 = remapper
            .ensure_logical_tile_filled(&vec![0, 0], &physical_tile_shape, &physical_cache, &reader, &full_shape, 0)
            .unwrap();
        drop(e2);
        assert_eq!(remapper.stats().hits, 1);
    }
}
