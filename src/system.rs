//! Top-level public API (external interface, §6): wires one `LevelPipeline` per
//! pyramid level to a shared output sink and outstanding-work counter, and exposes the
//! request/consume/release surface a caller drives the loader through.
//!
//! Construction follows `SlidePool`'s lazy-metadata-then-resource-pool idiom: per-level
//! geometry (`tile_shape`, `full_shape`) is read once from the `TileReader` up front and
//! used to size every level's cache, view pool and dedicated worker pool before any
//! request is accepted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::adaptive::AdaptiveRemapper;
use crate::cache::{Cache, CacheStats};
use crate::config::Config;
use crate::error::{LoaderError, LoaderResult, RequestOutcome};
use crate::geometry::{index_in_bounds, tile_grid_dims, volume, Index};
use crate::pipeline::{LevelPipeline, Outstanding, OutputSink};
use crate::reader::{ReaderAdapter, TileReader};
use crate::traversal::{NaiveTraversal, TraversalPolicy};
use crate::view::{View, ViewPool};

/// The concurrent, cache-aware tiled-array loader. One `System` serves every level of a
/// single reader's pyramid; `T` is the element type (e.g. `f32`, `u16`).
pub struct System<T> {
    levels: Vec<LevelPipeline<T>>,
    output: Arc<OutputSink<T>>,
    outstanding: Arc<Outstanding>,
    finalized: AtomicBool,
    traversal_policy: Box<dyn TraversalPolicy>,
    tile_shapes: Vec<Vec<u64>>,
    full_shapes: Vec<Vec<u64>>,
}

impl<T: Default + Clone + Copy + Send + Sync + crate::halo::FromHaloConstant + 'static> System<T> {
    /// Builds every level's cache, optional adaptive remapper, view pool and dedicated
    /// worker pool from `config`, then spawns each level's driver thread. Requests may
    /// be submitted as soon as this returns.
    pub fn new(reader: Box<dyn TileReader<T>>, config: Config) -> LoaderResult<Self> {
        let reader = Arc::new(ReaderAdapter::new(reader));
        let nb_levels = reader.reader().nb_levels() as usize;
        let nb_dims = reader.reader().nb_dims();
        config.validate(nb_levels, nb_dims)?;

        let output: Arc<OutputSink<T>> = Arc::new(OutputSink::default());
        let outstanding = Arc::new(Outstanding::default());

        let mut levels = Vec::with_capacity(nb_levels);
        let mut tile_shapes = Vec::with_capacity(nb_levels);
        let mut full_shapes = Vec::with_capacity(nb_levels);

        for level in 0..nb_levels as u32 {
            let physical_tile_shape = reader.reader().tile_shape(level);
            let full_shape = reader.reader().full_shape(level);
            let grid_dims = tile_grid_dims(&full_shape, &physical_tile_shape)?;
            let cache = Cache::new(
                config.cache_capacity_per_level[level as usize],
                grid_dims,
                physical_tile_shape.clone(),
            )?;

            let adaptive = match &config.adaptive {
                Some(a) => {
                    let logical_tile_shape = a.logical_tile_shape_per_level[level as usize].clone();
                    let logical_grid = tile_grid_dims(&full_shape, &logical_tile_shape)?;
                    Some(AdaptiveRemapper::new(
                        a.logical_cache_capacity_per_level[level as usize],
                        logical_grid,
                        logical_tile_shape,
                    )?)
                }
                None => None,
            };

            let view_tile_shape = adaptive
                .as_ref()
                .map(|a| a.logical_tile_shape().clone())
                .unwrap_or_else(|| physical_tile_shape.clone());

            let view_shape: Vec<u64> = view_tile_shape
                .iter()
                .zip(config.radii.iter())
                .map(|(&t, &r)| t + 2 * r)
                .collect();
            let view_volume = volume(&view_shape);

            let nb_copy_threads = config.adaptive.as_ref().map(|a| a.nb_copy_threads).unwrap_or(2);
            let pool: ViewPool<T> = ViewPool::new(
                config.view_available_per_level[level as usize],
                view_volume,
                view_shape.clone(),
            );

            let pipeline = LevelPipeline::new(
                level,
                cache,
                adaptive,
                pool,
                Arc::clone(&reader),
                config.halo_policy.clone(),
                view_tile_shape.clone(),
                physical_tile_shape,
                full_shape.clone(),
                config.radii.clone(),
                config.release_count_per_level[level as usize],
                config.ordered_output,
                nb_copy_threads,
                Arc::clone(&output),
                Arc::clone(&outstanding),
            )?;

            levels.push(pipeline);
            tile_shapes.push(view_tile_shape);
            full_shapes.push(full_shape);
        }

        Ok(Self {
            levels,
            output,
            outstanding,
            finalized: AtomicBool::new(false),
            traversal_policy: Box::new(NaiveTraversal),
            tile_shapes,
            full_shapes,
        })
    }

    /// Swaps in a non-default traversal policy used by `request_all_views`. Must be
    /// called before any `request_all_views` call if a custom order is desired.
    pub fn set_traversal_policy(&mut self, policy: Box<dyn TraversalPolicy>) {
        self.traversal_policy = policy;
    }

    /// Submits one view request for asynchronous processing. Non-blocking: the
    /// possibly-blocking view-pool acquisition happens on that level's driver thread.
    ///
    /// `index` is validated against the level's tile grid before anything is accepted
    /// (§6/§7: `InvalidIndex` is raised synchronously here), so an out-of-range index
    /// never reaches `dispatch` — which has no way to tell "genuinely empty plan" apart
    /// from "index doesn't exist" and would otherwise hand back a spurious all-halo view.
    pub fn request_view(&self, level: u32, index: Index) -> LoaderResult<()> {
        if self.finalized.load(Ordering::Acquire) {
            return Err(LoaderError::InvalidConfiguration(
                "request_view called after finish_requesting".into(),
            ));
        }
        let tile_shape = self.tile_shapes.get(level as usize).ok_or_else(|| LoaderError::InvalidIndex {
            index: index.clone(),
            level,
            reason: "level out of range".into(),
        })?;
        let full_shape = &self.full_shapes[level as usize];
        let grid_dims = tile_grid_dims(full_shape, tile_shape)?;
        if !index_in_bounds(&index, &grid_dims) {
            return Err(LoaderError::InvalidIndex {
                index,
                level,
                reason: "index exceeds tile grid dimensions".into(),
            });
        }
        self.level(level)?.request_view(index)
    }

    /// Submits every index of `level`'s tile grid, in the configured traversal order.
    pub fn request_all_views(&self, level: u32, full_shape: &[u64]) -> LoaderResult<()> {
        let tile_shape = self.tile_shapes.get(level as usize).ok_or_else(|| {
            LoaderError::InvalidIndex {
                index: Vec::new(),
                level,
                reason: "level out of range".into(),
            }
        })?;
        let dims = tile_grid_dims(full_shape, tile_shape)?;
        for index in self.traversal_policy.traverse(&dims) {
            self.request_view(level, index)?;
        }
        Ok(())
    }

    /// Marks requesting as finished: no further `request_view` calls are accepted, and
    /// every level's driver thread is drained and joined. Outstanding work already
    /// submitted always runs to completion and is published to `next_view` — requests
    /// are never silently abandoned once accepted.
    pub fn finish_requesting(&self) {
        self.finalized.store(true, Ordering::Release);
        for level in &self.levels {
            level.finish();
        }
    }

    /// Pops the next finished request, blocking until one is available or every level
    /// has finished and no outcome remains queued.
    pub fn next_view(&self) -> Option<RequestOutcome<View<T>>> {
        self.output
            .pop_blocking(|| self.finalized.load(Ordering::Acquire))
    }

    /// Non-blocking variant of `next_view`.
    pub fn try_next_view(&self) -> Option<RequestOutcome<View<T>>> {
        self.output.try_pop()
    }

    /// Blocks until every view that has ever left a pool has round-tripped back into
    /// one, i.e. every in-flight request has been either released by the consumer to
    /// its `release_target` or abandoned due to a reader error.
    pub fn wait_for_termination(&self) {
        self.outstanding.wait_for_zero();
    }

    /// Records one consumer-side release of `view`. Returns the view back to the caller
    /// until `release_count` reaches the level's configured `release_target`, at which
    /// point the buffer is recycled into its pool and `None` is returned.
    pub fn release(&self, mut view: View<T>) -> Option<View<T>> {
        view.release_count += 1;
        if view.release_count < view.release_target {
            return Some(view);
        }
        let level = view.level;
        if let Some(pipeline) = self.levels.get(level as usize) {
            pipeline.recycle(view);
        }
        self.outstanding.decrement();
        None
    }

    /// Aggregate cache hit/miss counters for `level`.
    pub fn cache_stats(&self, level: u32) -> LoaderResult<CacheStats> {
        Ok(self.level(level)?.cache_stats())
    }

    /// Upper bound on resident memory across every cache, view pool and adaptive
    /// logical-tile cache, in megabytes, assuming every slot is full-sized. Useful for
    /// capacity planning before construction commits to a `Config`.
    pub fn estimated_max_memory_mb(config: &Config, reader: &dyn TileReader<T>) -> LoaderResult<f64> {
        let nb_levels = reader.nb_levels() as usize;
        let elem_size = std::mem::size_of::<T>() as f64;
        let mut total_bytes = 0f64;

        for level in 0..nb_levels as u32 {
            let tile_shape = reader.tile_shape(level);
            let full_shape = reader.full_shape(level);
            let grid_dims = tile_grid_dims(&full_shape, &tile_shape)?;
            let grid_volume = volume(&grid_dims) as usize;
            let physical_capacity = if config.cache_capacity_per_level[level as usize] == 0 {
                18.min(grid_volume)
            } else {
                config.cache_capacity_per_level[level as usize].min(grid_volume)
            }
            .max(1);
            total_bytes += physical_capacity as f64 * volume(&tile_shape) as f64 * elem_size;

            let view_tile_shape = match &config.adaptive {
                Some(a) => {
                    let logical_tile_shape = &a.logical_tile_shape_per_level[level as usize];
                    let logical_grid = tile_grid_dims(&full_shape, logical_tile_shape)?;
                    let logical_grid_volume = volume(&logical_grid) as usize;
                    let logical_capacity = a.logical_cache_capacity_per_level[level as usize]
                        .min(logical_grid_volume.max(1))
                        .max(1);
                    total_bytes += logical_capacity as f64 * volume(logical_tile_shape) as f64 * elem_size;
                    logical_tile_shape.clone()
                }
                None => tile_shape,
            };

            let view_shape: Vec<u64> = view_tile_shape
                .iter()
                .zip(config.radii.iter())
                .map(|(&t, &r)| t + 2 * r)
                .collect();
            total_bytes +=
                config.view_available_per_level[level as usize] as f64 * volume(&view_shape) as f64 * elem_size;
        }

        Ok(total_bytes / (1024.0 * 1024.0))
    }

    fn level(&self, level: u32) -> LoaderResult<&LevelPipeline<T>> {
        self.levels.get(level as usize).ok_or_else(|| LoaderError::InvalidIndex {
            index: Vec::new(),
            level,
            reason: "level out of range".into(),
        })
    }
}
