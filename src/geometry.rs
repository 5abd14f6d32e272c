//! N-dimensional shape, index and window arithmetic shared by every component.

use crate::error::{LoaderError, LoaderResult};

/// Ordered vector of per-dimension sizes. Length is the geometry's dimensionality `D`.
pub type Shape = Vec<u64>;

/// Ordered vector of non-negative per-dimension coordinates, same length as the `Shape`
/// it indexes into. Compared lexicographically where an ordering is required (traversal).
pub type Index = Vec<u64>;

/// Half-open interval `[lo, hi)` along one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub lo: i64,
    pub hi: i64,
}

impl Interval {
    pub fn len(&self) -> u64 {
        (self.hi - self.lo).max(0) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.hi <= self.lo
    }

    pub fn intersect(&self, other: &Interval) -> Interval {
        Interval {
            lo: self.lo.max(other.lo),
            hi: self.hi.min(other.hi),
        }
    }
}

/// Per-dimension source offset, destination offset, length and reverse flag for one
/// axis of a copy record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisWindow {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub len: u64,
    pub reverse: bool,
}

/// Full N-D window: one `AxisWindow` per dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub axes: Vec<AxisWindow>,
}

impl Window {
    pub fn dims(&self) -> usize {
        self.axes.len()
    }

    pub fn volume(&self) -> u64 {
        self.axes.iter().map(|a| a.len).product()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.iter().any(|a| a.len == 0)
    }

    pub fn any_reverse(&self) -> bool {
        self.axes.iter().any(|a| a.reverse)
    }
}

/// Row-major strides for a shape (last dimension fastest / contiguous).
pub fn row_major_strides(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

pub fn volume(shape: &[u64]) -> u64 {
    shape.iter().product()
}

/// `ceil(full_shape_d / tile_shape_d)` per dimension: the tile-grid dimensions.
pub fn tile_grid_dims(full_shape: &[u64], tile_shape: &[u64]) -> LoaderResult<Shape> {
    if full_shape.len() != tile_shape.len() {
        return Err(LoaderError::InvalidConfiguration(format!(
            "full_shape has {} dims but tile_shape has {}",
            full_shape.len(),
            tile_shape.len()
        )));
    }
    full_shape
        .iter()
        .zip(tile_shape.iter())
        .map(|(&f, &t)| {
            if t == 0 {
                return Err(LoaderError::InvalidConfiguration(
                    "tile_shape dimension must be > 0".into(),
                ));
            }
            Ok((f + t - 1) / t)
        })
        .collect()
}

/// Checks `index_d < dims_d` for every dimension.
pub fn index_in_bounds(index: &[u64], dims: &[u64]) -> bool {
    index.len() == dims.len() && index.iter().zip(dims.iter()).all(|(&i, &d)| i < d)
}

/// Flattens a multi-dimensional index into a linear offset using the given strides.
pub fn flatten(index: &[u64], strides: &[u64]) -> u64 {
    index.iter().zip(strides.iter()).map(|(&i, &s)| i * s).sum()
}

/// Enumerates every index in `[0, dims)` in increasing lexicographic order (naive traversal).
pub fn lexicographic_indices(dims: &[u64]) -> Vec<Index> {
    if dims.is_empty() || dims.iter().any(|&d| d == 0) {
        return Vec::new();
    }
    let total: u64 = volume(dims);
    let mut out = Vec::with_capacity(total as usize);
    let mut cur = vec![0u64; dims.len()];
    for _ in 0..total {
        out.push(cur.clone());
        for d in (0..dims.len()).rev() {
            cur[d] += 1;
            if cur[d] < dims[d] {
                break;
            }
            cur[d] = 0;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_row_major() {
        assert_eq!(row_major_strides(&[5, 5, 5]), vec![25, 5, 1]);
        assert_eq!(row_major_strides(&[5]), vec![1]);
    }

    #[test]
    fn grid_dims_round_up() {
        let dims = tile_grid_dims(&[5], &[2]).unwrap();
        assert_eq!(dims, vec![3]);
    }

    #[test]
    fn grid_dims_rejects_mismatched_rank() {
        assert!(tile_grid_dims(&[5, 5], &[2]).is_err());
    }

    #[test]
    fn lexicographic_order_2d() {
        let idx = lexicographic_indices(&[2, 3]);
        assert_eq!(
            idx,
            vec![
                vec![0, 0],
                vec![0, 1],
                vec![0, 2],
                vec![1, 0],
                vec![1, 1],
                vec![1, 2],
            ]
        );
    }

    #[test]
    fn interval_intersection() {
        let a = Interval { lo: 0, hi: 4 };
        let b = Interval { lo: 2, hi: 6 };
        let i = a.intersect(&b);
        assert_eq!(i, Interval { lo: 2, hi: 4 });
        assert_eq!(i.len(), 2);
    }
}
