//! Halo synthesizer (C5): fills ghost-region cells that lie outside the file's extent.
//!
//! Reflect, Reflect101 and Wrap are all implemented as in-view duplication passes:
//! each out-of-bounds cell is mapped to an already-resident view cell by mirroring or
//! wrapping its coordinate, rather than issuing another cross-tile fetch.
//!
//! A cell is considered a halo cell needing synthesis iff its global coordinate falls
//! outside `[0, full_shape_d)` along some axis *whose configured radius is nonzero*; this
//! is what makes `radii_d = 0` mean "no halo on this axis" while a nonzero radius still
//! synthesizes cells that happen to coincide with a partial-tile boundary.

use crate::geometry::row_major_strides;
use crate::plan::CopyRecord;
use crate::view::View;

/// Converts a `HaloPolicy::Constant` fill value — carried as `f64` in `Config` so the
/// halo policy stays (de)serializable independent of the view's element type — into
/// that element type at materialization time. `std::convert::From<f64>` cannot serve
/// this role: it only covers lossless widening conversions, so common view element
/// types (`i64`, `u16`, `u8`) don't implement it.
pub trait FromHaloConstant {
    fn from_halo_constant(value: f64) -> Self;
}

macro_rules! impl_from_halo_constant {
    ($($t:ty),*) => {
        $(impl FromHaloConstant for $t {
            fn from_halo_constant(value: f64) -> Self {
                value as $t
            }
        })*
    };
}

impl_from_halo_constant!(f32, f64, i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

pub trait HaloSynthesizer<T>: Send + Sync {
    /// Additional per-tile fetches the policy needs beyond the plan generator's own
    /// output. The built-in policies never need this (they work purely from already
    /// in-view data); a custom strategy may.
    fn tile_requests_for_halo(&self, _view: &View<T>, _full_shape: &[u64]) -> Vec<CopyRecord> {
        Vec::new()
    }

    /// Runs after every planned copy record has completed; fills remaining halo cells
    /// from already-resident view data.
    fn fill_existing(&self, view: &mut View<T>, full_shape: &[u64]);
}

pub enum HaloPolicy<T> {
    Constant(T),
    Replicate,
    Reflect,
    Reflect101,
    Wrap,
    Custom(Box<dyn HaloSynthesizer<T>>),
}

impl<T: Copy + Send + Sync> HaloSynthesizer<T> for HaloPolicy<T> {
    fn tile_requests_for_halo(&self, view: &View<T>, full_shape: &[u64]) -> Vec<CopyRecord> {
        match self {
            HaloPolicy::Custom(inner) => inner.tile_requests_for_halo(view, full_shape),
            _ => Vec::new(),
        }
    }

    fn fill_existing(&self, view: &mut View<T>, full_shape: &[u64]) {
        if let HaloPolicy::Custom(inner) = self {
            return inner.fill_existing(view, full_shape);
        }

        let d = view.view_shape.len();
        let strides = row_major_strides(&view.view_shape);
        let origin: Vec<i64> = (0..d)
            .map(|axis| {
                view.index[axis] as i64 * view.tile_shape[axis] as i64 - view.radii[axis] as i64
            })
            .collect();
        let total = view.data.len();

        for lin in 0..total {
            let mut rem = lin as u64;
            let mut local = vec![0u64; d];
            for (axis, &s) in strides.iter().enumerate() {
                local[axis] = rem / s;
                rem %= s;
            }
            let global: Vec<i64> = (0..d).map(|axis| origin[axis] + local[axis] as i64).collect();

            let mut qualifies = false;
            for axis in 0..d {
                let oob = global[axis] < 0 || global[axis] as u64 >= full_shape[axis];
                if oob && view.radii[axis] > 0 {
                    qualifies = true;
                }
            }
            if !qualifies {
                continue;
            }

            match self {
                HaloPolicy::Constant(value) => {
                    view.data[lin] = *value;
                }
                HaloPolicy::Replicate | HaloPolicy::Reflect | HaloPolicy::Reflect101 | HaloPolicy::Wrap => {
                    let reference = reference_global(self, &global, full_shape);
                    let ref_local: Vec<i64> = (0..d)
                        .map(|axis| reference[axis] - origin[axis])
                        .collect();
                    if ref_local.iter().all(|&l| l >= 0) {
                        let ref_lin: u64 = ref_local
                            .iter()
                            .zip(strides.iter())
                            .map(|(&l, &s)| l as u64 * s)
                            .sum();
                        if (ref_lin as usize) < view.data.len() {
                            view.data[lin] = view.data[ref_lin as usize];
                        }
                    }
                }
                HaloPolicy::Custom(_) => unreachable!(),
            }
        }
    }
}

fn reference_global<T>(policy: &HaloPolicy<T>, global: &[i64], full_shape: &[u64]) -> Vec<i64> {
    global
        .iter()
        .zip(full_shape.iter())
        .map(|(&g, &full)| {
            let full = full as i64;
            let oob = g < 0 || g >= full;
            if !oob {
                return g;
            }
            match policy {
                HaloPolicy::Replicate => g.clamp(0, full - 1),
                HaloPolicy::Reflect => {
                    if g < 0 {
                        (-g - 1).min(full - 1)
                    } else {
                        (2 * full - g - 1).max(0)
                    }
                }
                HaloPolicy::Reflect101 => {
                    if full <= 1 {
                        0
                    } else if g < 0 {
                        (-g).min(full - 1)
                    } else {
                        (2 * (full - 1) - g).max(0)
                    }
                }
                HaloPolicy::Wrap => g.rem_euclid(full),
                _ => g.clamp(0, full - 1),
            }
        })
        .collect()
}
