//! ndview - concurrent, cache-aware N-dimensional tiled-array loader.
//!
//! Wraps a user-supplied [`reader::TileReader`] (one tile fetch callback per pyramid
//! level) with a bounded per-level tile [`cache::Cache`], an optional
//! [`adaptive::AdaptiveRemapper`] for serving views on a different tile geometry than
//! the file's physical tiling, a halo-synthesizing [`view`] assembly path, and a
//! [`pipeline::LevelPipeline`]/[`system::System`] front-end that accepts view requests
//! asynchronously and publishes finished views (in FIFO or best-effort order) to a
//! single blocking `next_view` call.
//!
//! ```ignore
//! let system = System::new(Box::new(my_reader), config)?;
//! system.request_view(0, vec![2, 3])?;
//! system.finish_requesting();
//! while let Some(outcome) = system.next_view() {
//!     let view = outcome.result?;
//!     // ... consume view.data ...
//!     system.release(view);
//! }
//! system.wait_for_termination();
//! ```

mod adaptive;
mod assembler;
mod cache;
mod config;
mod copy;
mod error;
mod geometry;
mod halo;
mod pipeline;
mod plan;
mod reader;
mod system;
#[cfg(test)]
pub(crate) mod test_support;
mod traversal;
mod view;

pub use adaptive::AdaptiveRemapper;
pub use cache::{Cache, CacheStats};
pub use config::{AdaptiveConfig, Config, HaloPolicyConfig, TraversalKind};
pub use error::{LoaderError, LoaderResult, RequestOutcome};
pub use geometry::{Index, Shape};
pub use halo::{FromHaloConstant, HaloPolicy, HaloSynthesizer};
pub use reader::{ReaderAdapter, TileReader};
pub use system::System;
pub use traversal::{NaiveTraversal, TraversalPolicy};
pub use view::{View, ViewPool};
