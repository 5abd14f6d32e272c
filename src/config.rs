//! Configuration surface (ambient addition §A2): a `serde`-(de)serializable `Config`
//! so a loader can be built from a JSON file as well as programmatically, following
//! `fastpath_core::format::SlideMetadata`'s `serde_json` loading idiom.

use serde::{Deserialize, Serialize};

use crate::error::{LoaderError, LoaderResult};
use crate::geometry::Shape;

/// Per-policy descriptor for `HaloPolicy`. `Constant`'s fill value is carried as `f64`
/// and converted at materialization time via `T: FromHaloConstant`; `Custom` strategies have no
/// serializable form (they are supplied programmatically, same as the teacher's
/// `Box<dyn HaloSynthesizer<T>>` cannot round-trip through JSON either) and are rejected
/// by `HaloPolicyConfig` deserialization — build those loaders with the builder instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum HaloPolicyConfig {
    Constant { value: f64 },
    Replicate,
    Reflect,
    Reflect101,
    Wrap,
}

impl Default for HaloPolicyConfig {
    fn default() -> Self {
        HaloPolicyConfig::Constant { value: 0.0 }
    }
}

impl HaloPolicyConfig {
    pub fn to_policy<T: crate::halo::FromHaloConstant>(&self) -> crate::halo::HaloPolicy<T> {
        match self {
            HaloPolicyConfig::Constant { value } => {
                crate::halo::HaloPolicy::Constant(T::from_halo_constant(*value))
            }
            HaloPolicyConfig::Replicate => crate::halo::HaloPolicy::Replicate,
            HaloPolicyConfig::Reflect => crate::halo::HaloPolicy::Reflect,
            HaloPolicyConfig::Reflect101 => crate::halo::HaloPolicy::Reflect101,
            HaloPolicyConfig::Wrap => crate::halo::HaloPolicy::Wrap,
        }
    }
}

/// Traversal selection for "load all views at this level". `Custom` is a tag only: the
/// actual strategy is supplied programmatically through `SystemBuilder::traversal_policy`,
/// mirroring how `HaloPolicyConfig` treats `Custom`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TraversalKind {
    #[default]
    Naive,
    Custom,
}

/// Per-level adaptive-mode settings. Absent means non-adaptive: views are planned
/// directly against the file's physical tile geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    pub logical_tile_shape_per_level: Vec<Shape>,
    pub logical_cache_capacity_per_level: Vec<usize>,
    #[serde(default = "default_copy_threads")]
    pub nb_copy_threads: usize,
}

fn default_copy_threads() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Per-dimension halo radii, shared across all levels.
    pub radii: Vec<u64>,
    pub view_available_per_level: Vec<usize>,
    pub release_count_per_level: Vec<u32>,
    pub cache_capacity_per_level: Vec<usize>,
    #[serde(default)]
    pub halo_policy: HaloPolicyConfig,
    #[serde(default)]
    pub traversal_policy: TraversalKind,
    #[serde(default)]
    pub ordered_output: bool,
    #[serde(default)]
    pub adaptive: Option<AdaptiveConfig>,
}

impl Config {
    /// Builds a `radii` vector with the same halo size on every one of `nb_dims`
    /// dimensions (the "all-same convenience form" named in the external interface).
    pub fn uniform_radii(nb_dims: usize, radius: u64) -> Vec<u64> {
        vec![radius; nb_dims]
    }

    /// Parses a `Config` from a JSON document, the way `SlideMetadata::from_json` does.
    pub fn from_json(text: &str) -> LoaderResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| LoaderError::InvalidConfiguration(format!("invalid config JSON: {e}")))
    }

    pub fn to_json(&self) -> LoaderResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LoaderError::InvalidConfiguration(format!("failed to serialize config: {e}")))
    }

    /// Validates cross-field invariants not expressible in the type alone.
    pub fn validate(&self, nb_levels: usize, nb_dims: usize) -> LoaderResult<()> {
        if self.radii.len() != nb_dims {
            return Err(LoaderError::InvalidConfiguration(format!(
                "radii has {} dims but reader reports {}",
                self.radii.len(),
                nb_dims
            )));
        }
        for (name, len) in [
            ("view_available_per_level", self.view_available_per_level.len()),
            ("release_count_per_level", self.release_count_per_level.len()),
            ("cache_capacity_per_level", self.cache_capacity_per_level.len()),
        ] {
            if len != nb_levels {
                return Err(LoaderError::InvalidConfiguration(format!(
                    "{name} has {len} entries but nb_levels is {nb_levels}"
                )));
            }
        }
        if self.view_available_per_level.iter().any(|&v| v == 0) {
            return Err(LoaderError::InvalidConfiguration(
                "view_available_per_level entries must be > 0".into(),
            ));
        }
        if self.release_count_per_level.iter().any(|&v| v == 0) {
            return Err(LoaderError::InvalidConfiguration(
                "release_count_per_level entries must be > 0".into(),
            ));
        }
        if let Some(adaptive) = &self.adaptive {
            for (name, len) in [
                (
                    "logical_tile_shape_per_level",
                    adaptive.logical_tile_shape_per_level.len(),
                ),
                (
                    "logical_cache_capacity_per_level",
                    adaptive.logical_cache_capacity_per_level.len(),
                ),
            ] {
                if len != nb_levels {
                    return Err(LoaderError::InvalidConfiguration(format!(
                        "{name} has {len} entries but nb_levels is {nb_levels}"
                    )));
                }
            }
            if adaptive.nb_copy_threads == 0 {
                return Err(LoaderError::InvalidConfiguration(
                    "nb_copy_threads must be > 0".into(),
                ));
            }
        }
        Ok(())
    }
}
