//! The tile reader adapter (C2): wraps the user-supplied fill callback.
//!
//! The concrete file format is an external collaborator; this module only defines the
//! contract a reader must honor and the thin adapter the cache-filling path invokes it
//! through. A deterministic in-memory reader used across the test suite lives in
//! `test_support`.

use std::time::Instant;

use crate::error::LoaderResult;
use crate::geometry::{Index, Shape};

/// User-supplied collaborator: fills one tile's worth of data at a time.
///
/// Exactly one `fill` call is made per cache miss per `(index, level)`, always while the
/// caller holds the target cache entry's per-entry lock. Implementations may be invoked
/// from multiple threads concurrently for *different* tiles.
pub trait TileReader<T>: Send + Sync {
    /// Writes the tile's payload into `out`, which has length ≥ `volume(tile_shape(level))`.
    /// Cells beyond the file's true extent (border tiles) may be left untouched; the core
    /// never reads them.
    fn fill(&self, out: &mut [T], index: &Index, level: u32) -> LoaderResult<()>;

    fn tile_shape(&self, level: u32) -> Shape;
    fn full_shape(&self, level: u32) -> Shape;
    fn nb_levels(&self) -> u32;
    fn nb_dims(&self) -> usize;

    fn dim_names(&self) -> Vec<String> {
        (0..self.nb_dims()).map(|d| format!("dim{d}")).collect()
    }

    fn down_scale_factor(&self, _level: u32) -> f64 {
        1.0
    }

    fn metadata(&self) -> std::collections::HashMap<String, String> {
        std::collections::HashMap::new()
    }
}

/// Adapter around a `TileReader` that records fill timing for diagnostics, following the
/// `tile_timing_enabled` environment-gated instrumentation pattern in `scheduler.rs`.
pub struct ReaderAdapter<T> {
    reader: Box<dyn TileReader<T>>,
    timing_enabled: bool,
}

impl<T> ReaderAdapter<T> {
    pub fn new(reader: Box<dyn TileReader<T>>) -> Self {
        let timing_enabled = std::env::var("NDVIEW_TILE_TIMING")
            .is_ok_and(|v| v == "1" || v == "true");
        Self {
            reader,
            timing_enabled,
        }
    }

    pub fn reader(&self) -> &dyn TileReader<T> {
        self.reader.as_ref()
    }

    /// Invokes the reader's fill, optionally reporting elapsed time to stderr.
    pub fn fill(&self, out: &mut [T], index: &Index, level: u32) -> LoaderResult<()> {
        if self.timing_enabled {
            let start = Instant::now();
            let result = self.reader.fill(out, index, level);
            eprintln!(
                "[ndview] fill index={index:?} level={level} took={:?}",
                start.elapsed()
            );
            result
        } else {
            self.reader.fill(out, index, level)
        }
    }
}
