//! Level pipeline and ordering front-end (C9): one instance per pyramid level, owning
//! that level's cache, optional adaptive remapper, view pool and dedicated worker pool,
//! plus the FIFO/out-of-order bookkeeping `ViewLoader::next_view` drains.
//!
//! Grounded on `BulkPreloader`'s split between a single dedicated driver thread (here:
//! the thread that blocks on `ViewPool::acquire`, named after the level, mirroring
//! `bulk-preload-main`) and a dedicated named `rayon::ThreadPool` that the driver thread
//! spawns per-group copy work onto (mirroring `bulk-preload-{idx}` and the
//! `rayon_pool.install(|| tile_work.par_iter().for_each(...))` fan-out). The driver
//! thread never touches reader I/O itself; it only ever blocks on pool backpressure and
//! hands finished requests to the rayon pool, so a slow reader never stalls new
//! `request_view` submissions from being accepted onto the channel.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::adaptive::AdaptiveRemapper;
use crate::assembler::{InFlightView, ViewOutcome};
use crate::cache::{Cache, Status};
use crate::config::HaloPolicyConfig;
use crate::copy::execute_copy;
use crate::error::{LoaderError, LoaderResult, RequestOutcome};
use crate::geometry::Index;
use crate::halo::{HaloPolicy, HaloSynthesizer};
use crate::plan::{generate_plan, merge_records, CopyGroup, CopyRecord};
use crate::reader::ReaderAdapter;
use crate::view::{View, ViewPool};

/// Counts views that have left a pool and have not yet round-tripped back into it,
/// across every level. `ViewLoader::wait_for_termination` blocks on this reaching zero.
#[derive(Default)]
pub struct Outstanding {
    count: Mutex<u64>,
    zero: Condvar,
}

impl Outstanding {
    pub fn increment(&self) {
        *self.count.lock() += 1;
    }

    pub fn decrement(&self) {
        let mut count = self.count.lock();
        debug_assert!(*count > 0);
        *count -= 1;
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    pub fn wait_for_zero(&self) {
        let mut count = self.count.lock();
        while *count != 0 {
            self.zero.wait(&mut count);
        }
    }
}

/// Per-level FIFO/out-of-order reordering state, draining into a shared output sink.
/// `next_expected` and the sequence numbers handed out in `dispatch` are both assigned
/// on the single driver thread, in the same order requests arrive on the channel, so no
/// separate submission ledger is needed to recover that order.
struct OrderingState<T> {
    ordered: bool,
    next_expected: u64,
    waiting: HashMap<u64, RequestOutcome<View<T>>>,
}

impl<T> OrderingState<T> {
    fn new(ordered: bool) -> Self {
        Self {
            ordered,
            next_expected: 0,
            waiting: HashMap::new(),
        }
    }
}

/// Shared FIFO queue `next_view` drains; every level pushes its finished requests here
/// in the order their ordering policy releases them.
pub struct OutputSink<T> {
    queue: Mutex<VecDeque<RequestOutcome<View<T>>>>,
    available: Condvar,
}

impl<T> Default for OutputSink<T> {
    fn default() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }
}

impl<T> OutputSink<T> {
    fn push(&self, outcome: RequestOutcome<View<T>>) {
        self.queue.lock().push_back(outcome);
        self.available.notify_one();
    }

    /// Blocks until an outcome is available or `is_quiescent` (checked under the lock on
    /// every wake) reports no more work can ever arrive.
    pub fn pop_blocking(&self, is_quiescent: impl Fn() -> bool) -> Option<RequestOutcome<View<T>>> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(outcome) = queue.pop_front() {
                return Some(outcome);
            }
            if is_quiescent() {
                return None;
            }
            self.available.wait(&mut queue);
        }
    }

    pub fn try_pop(&self) -> Option<RequestOutcome<View<T>>> {
        self.queue.lock().pop_front()
    }
}

struct RequestTask {
    index: Index,
}

/// State shared between a level's driver thread and its rayon worker pool.
struct LevelShared<T> {
    level: u32,
    cache: Cache<T>,
    adaptive: Option<AdaptiveRemapper<T>>,
    pool: ViewPool<T>,
    reader: Arc<ReaderAdapter<T>>,
    halo_policy_config: HaloPolicyConfig,
    /// The tile shape views are planned and stamped against: the logical tile shape in
    /// adaptive mode, the reader's physical tile shape otherwise.
    tile_shape: Vec<u64>,
    /// The reader's actual on-disk tile shape, always physical. Equal to `tile_shape`
    /// outside adaptive mode; only consulted by `run_group`'s adaptive branch, which
    /// needs both shapes at once to decompose a logical tile into physical fetches.
    physical_tile_shape: Vec<u64>,
    full_shape: Vec<u64>,
    radii: Vec<u64>,
    release_target: u32,
    ordering: Mutex<OrderingState<T>>,
    output: Arc<OutputSink<T>>,
    outstanding: Arc<Outstanding>,
    dispatched: AtomicU64,
}

/// One pyramid level's driver thread, dedicated rayon pool, and request channel.
pub struct LevelPipeline<T> {
    shared: Arc<LevelShared<T>>,
    sender: Mutex<Option<mpsc::Sender<RequestTask>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Default + Clone + Copy + Send + Sync + crate::halo::FromHaloConstant + 'static> LevelPipeline<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        level: u32,
        cache: Cache<T>,
        adaptive: Option<AdaptiveRemapper<T>>,
        pool: ViewPool<T>,
        reader: Arc<ReaderAdapter<T>>,
        halo_policy_config: HaloPolicyConfig,
        tile_shape: Vec<u64>,
        physical_tile_shape: Vec<u64>,
        full_shape: Vec<u64>,
        radii: Vec<u64>,
        release_target: u32,
        ordered_output: bool,
        nb_worker_threads: usize,
        output: Arc<OutputSink<T>>,
        outstanding: Arc<Outstanding>,
    ) -> LoaderResult<Self> {
        let shared = Arc::new(LevelShared {
            level,
            cache,
            adaptive,
            pool,
            reader,
            halo_policy_config,
            tile_shape,
            physical_tile_shape,
            full_shape,
            radii,
            release_target,
            ordering: Mutex::new(OrderingState::new(ordered_output)),
            output,
            outstanding,
            dispatched: AtomicU64::new(0),
        });

        let rayon_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nb_worker_threads.max(1))
            .thread_name(move |idx| format!("ndview-level{level}-{idx}"))
            .build()
            .map_err(|e| {
                LoaderError::InternalInvariantViolation(format!("failed to build level {level} worker pool: {e}"))
            })?;

        let (sender, receiver) = mpsc::channel::<RequestTask>();

        let driver_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(format!("ndview-level{level}-driver"))
            .spawn(move || {
                for task in receiver {
                    dispatch(&driver_shared, &rayon_pool, task.index);
                }
            })
            .map_err(|e| {
                LoaderError::InternalInvariantViolation(format!("failed to spawn level {level} driver thread: {e}"))
            })?;

        Ok(Self {
            shared,
            sender: Mutex::new(Some(sender)),
            driver: Mutex::new(Some(handle)),
        })
    }

    /// Submits a request without blocking the caller; the driver thread performs the
    /// (possibly blocking) view-pool acquisition off the caller's thread.
    pub fn request_view(&self, index: Index) -> LoaderResult<()> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or_else(|| {
            LoaderError::InvalidConfiguration("requests are no longer accepted after finish_requesting".into())
        })?;
        self.shared.outstanding.increment();
        sender.send(RequestTask { index }).map_err(|_| {
            LoaderError::InternalInvariantViolation("level driver thread has already shut down".into())
        })
    }

    /// Closes the request channel so the driver thread exits once it has drained every
    /// already-submitted task, then joins it. Safe to call more than once.
    pub fn finish(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.driver.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.shared.cache.stats()
    }

    /// Returns a consumer-released buffer to this level's pool.
    pub fn recycle(&self, view: View<T>) {
        self.shared.pool.recycle(view);
    }
}

/// Runs on the level's driver thread: builds the copy plan, blocks on the view pool,
/// then fans the resulting groups out onto the rayon pool.
fn dispatch<T: Default + Clone + Copy + Send + Sync + crate::halo::FromHaloConstant + 'static>(
    shared: &Arc<LevelShared<T>>,
    rayon_pool: &rayon::ThreadPool,
    index: Index,
) {
    let seq = shared.dispatched.fetch_add(1, Ordering::Relaxed);

    let plan = match shared.adaptive.as_ref() {
        Some(remapper) => remapper.plan_for_view(&index, &shared.radii, &shared.full_shape),
        None => generate_plan(&index, &shared.radii, &shared.tile_shape, &shared.full_shape),
    };
    let plan = match plan {
        Ok(p) => p,
        Err(e) => {
            finish_request(shared, seq, index, Err(e));
            return;
        }
    };

    let halo_policy: HaloPolicy<T> = shared.halo_policy_config.to_policy();

    let view = match shared.pool.acquire(
        shared.level,
        index.clone(),
        shared.tile_shape.clone(),
        shared.full_shape.clone(),
        shared.radii.clone(),
        shared.release_target,
    ) {
        Ok(v) => v,
        Err(e) => {
            finish_request(shared, seq, index, Err(e));
            return;
        }
    };

    let halo_records = halo_policy.tile_requests_for_halo(&view, &shared.full_shape);
    let groups = merge_records(plan.records, halo_records);

    if groups.is_empty() {
        // A fully out-of-range view requests no copies at all; still run the halo
        // pass (every cell is a halo cell) and publish immediately.
        let mut view = view;
        halo_policy.fill_existing(&mut view, &shared.full_shape);
        publish_ready(shared, seq, index, view);
        return;
    }

    let mut view = view;
    view.nb_outstanding_copies = groups.len();
    let inflight = Arc::new(InFlightView::new(view, groups.len()));

    for group in groups {
        let shared = Arc::clone(shared);
        let inflight = Arc::clone(&inflight);
        let index = index.clone();
        rayon_pool.spawn(move || {
            run_group(&shared, &inflight, group);
            let halo_policy: HaloPolicy<T> = shared.halo_policy_config.to_policy();
            if let Some(outcome) = inflight.finish_one(&halo_policy, &shared.full_shape) {
                match outcome {
                    ViewOutcome::Ready(view) => publish_ready(&shared, seq, index, view),
                    ViewOutcome::Failed(view, err) => publish_failed(&shared, seq, index, view, err),
                }
            }
        });
    }
}

/// Executes one copy group: acquires the (logical or physical) cache entry, filling it
/// via the reader on a miss, then copies every one of its windows into the in-flight
/// view. Any error is recorded on `inflight` rather than propagated, so sibling groups
/// for the same view still run to completion.
fn run_group<T: Default + Clone + Copy + Send + Sync + crate::halo::FromHaloConstant + 'static>(
    shared: &Arc<LevelShared<T>>,
    inflight: &Arc<InFlightView<T>>,
    group: CopyGroup,
) {
    let result: LoaderResult<(Vec<u64>, Vec<T>)> = (|| {
        if let Some(remapper) = shared.adaptive.as_ref() {
            let entry = remapper.ensure_logical_tile_filled(
                &group.source_tile_index,
                &shared.physical_tile_shape,
                &shared.cache,
                &shared.reader,
                &shared.full_shape,
                shared.level,
            )?;
            Ok((remapper.logical_tile_shape().clone(), entry.buffer().to_vec()))
        } else {
            let mut entry = shared.cache.acquire(&group.source_tile_index)?;
            if entry.status() == Status::Empty {
                shared.reader.fill(entry.buffer_mut(), &group.source_tile_index, shared.level)?;
                entry.mark_filled();
            }
            let buffer = entry.buffer().to_vec();
            shared.cache.release(entry);
            Ok((shared.tile_shape.clone(), buffer))
        }
    })();

    let (tile_shape_for_copy, buffer) = match result {
        Ok(v) => v,
        Err(e) => {
            inflight.note_error(e);
            return;
        }
    };

    let mut guard = inflight.view_mut();
    let view = guard
        .as_mut()
        .expect("view present while this group has not finished");
    let view_shape = view.view_shape.clone();
    for window in &group.windows {
        let record = CopyRecord {
            source_tile_index: group.source_tile_index.clone(),
            window: window.clone(),
        };
        execute_copy(&record, &tile_shape_for_copy, &buffer, &view_shape, &mut view.data);
    }
}

fn publish_ready<T>(shared: &Arc<LevelShared<T>>, seq: u64, index: Index, view: View<T>) {
    publish(
        shared,
        seq,
        RequestOutcome {
            level: shared.level,
            index,
            result: Ok(view),
        },
    );
}

fn publish_failed<T>(shared: &Arc<LevelShared<T>>, seq: u64, index: Index, view: View<T>, err: LoaderError) {
    // The buffer still round-trips to the pool even on failure; only the consumer-facing
    // outcome carries the error, so a failed view is never released a second time.
    shared.pool.recycle(view);
    shared.outstanding.decrement();
    publish(
        shared,
        seq,
        RequestOutcome {
            level: shared.level,
            index,
            result: Err(err),
        },
    );
}

fn finish_request<T>(shared: &Arc<LevelShared<T>>, seq: u64, index: Index, result: LoaderResult<View<T>>) {
    shared.outstanding.decrement();
    publish(
        shared,
        seq,
        RequestOutcome {
            level: shared.level,
            index,
            result,
        },
    );
}

/// Releases `outcome` into the level's ordering state, pushing it (and any now-eligible
/// successors waiting behind it) onward into the shared output sink.
fn publish<T>(shared: &Arc<LevelShared<T>>, seq: u64, outcome: RequestOutcome<View<T>>) {
    let mut ordering = shared.ordering.lock();
    if !ordering.ordered {
        drop(ordering);
        shared.output.push(outcome);
        return;
    }

    ordering.waiting.insert(seq, outcome);
    while let Some(next_outcome) = ordering.waiting.remove(&ordering.next_expected) {
        ordering.next_expected += 1;
        shared.output.push(next_outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ReaderAdapter;
    use crate::test_support::PatternReader;

    fn make_pipeline(
        ordered: bool,
        radii: Vec<u64>,
    ) -> LevelPipeline<i64> {
        let full_shape = vec![6u64, 6];
        let tile_shape = vec![2u64, 2];
        let grid = crate::geometry::tile_grid_dims(&full_shape, &tile_shape).unwrap();
        let cache: Cache<i64> = Cache::new(4, grid, tile_shape.clone()).unwrap();
        let pool: ViewPool<i64> = ViewPool::new(2, 16, vec![4, 4]);
        let reader = Arc::new(ReaderAdapter::new(Box::new(PatternReader::new(
            full_shape.clone(),
            tile_shape.clone(),
        ))));
        let output: Arc<OutputSink<i64>> = Arc::new(OutputSink::default());
        let outstanding = Arc::new(Outstanding::default());

        LevelPipeline::new(
            0,
            cache,
            None,
            pool,
            reader,
            HaloPolicyConfig::Constant { value: -1.0 },
            tile_shape.clone(),
            tile_shape,
            full_shape,
            radii,
            1,
            ordered,
            2,
            output,
            outstanding,
        )
        .unwrap()
    }

    #[test]
    fn single_request_round_trips_through_output_sink() {
        let pipeline = make_pipeline(false, vec![0, 0]);
        pipeline.request_view(vec![0, 0]).unwrap();
        let outcome = pipeline
            .shared
            .output
            .pop_blocking(|| false)
            .expect("outcome expected");
        let view = outcome.result.unwrap();
        assert_eq!(view.data, vec![11, 12, 21, 22]);
        pipeline.finish();
    }

    #[test]
    fn ordered_output_reorders_fast_completions_behind_slow_ones() {
        let pipeline = make_pipeline(true, vec![0, 0]);
        for idx in [vec![2, 2], vec![0, 0], vec![1, 1]] {
            pipeline.request_view(idx).unwrap();
        }
        let mut got = Vec::new();
        for _ in 0..3 {
            let outcome = pipeline.shared.output.pop_blocking(|| false).unwrap();
            got.push(outcome.index);
        }
        assert_eq!(got, vec![vec![2, 2], vec![0, 0], vec![1, 1]]);
        pipeline.finish();
    }

    #[test]
    fn halo_radius_spanning_two_tiles_assembles_from_both_groups() {
        let pipeline = make_pipeline(false, vec![1, 0]);
        pipeline.request_view(vec![1, 0]).unwrap();
        let outcome = pipeline.shared.output.pop_blocking(|| false).unwrap();
        let view = outcome.result.unwrap();
        // view_shape = [2+2*1, 2] = [4,2]; rows come from tiles (0,0), (1,0) and (2,0).
        assert_eq!(view.view_shape, vec![4, 2]);
        assert_eq!(view.data, vec![21, 22, 31, 32, 41, 42, 51, 52]);
        pipeline.finish();
    }
}
