//! Deterministic in-memory `TileReader` test doubles.
//!
//! In the spirit of `decoder.rs`'s byte-literal JPEG fixture and `bulk_preload.rs`'s
//! `create_test_jpeg_file`, but generating values arithmetically: a reader that
//! synthesizes deterministic values from coordinates instead of touching disk, mirroring
//! the virtual-file tile loader test double used for coordinate-arithmetic checks.

use std::collections::HashMap;

use crate::error::LoaderResult;
use crate::geometry::{volume, Index, Shape};
use crate::reader::TileReader;

/// Fills every cell of tile `index` at `level` with
/// `value = Σ_d (global_coord_d + 1) · 10^(D-1-d)` — e.g. for a 3-D array,
/// `F[l,r,c] = 100(l+1)+10(r+1)+(c+1)` — and, trivially for D=1, the `[1,2,3,4,5]`
/// pattern used by the 1-D tests below.
///
/// Each level halves the previous level's `full_shape` (floor, minimum 1), matching the
/// usual pyramid convention; `tile_shape` is constant across levels.
pub struct PatternReader {
    full_shape0: Shape,
    tile_shape: Shape,
    nb_levels: u32,
}

impl PatternReader {
    pub fn new(full_shape0: Shape, tile_shape: Shape) -> Self {
        Self {
            full_shape0,
            tile_shape,
            nb_levels: 1,
        }
    }

    pub fn with_levels(full_shape0: Shape, tile_shape: Shape, nb_levels: u32) -> Self {
        Self {
            full_shape0,
            tile_shape,
            nb_levels,
        }
    }

    fn level_full_shape(&self, level: u32) -> Shape {
        self.full_shape0
            .iter()
            .map(|&s| (s >> level).max(1))
            .collect()
    }
}

fn pattern_value(global: &[u64]) -> i64 {
    let d = global.len();
    global
        .iter()
        .enumerate()
        .map(|(i, &c)| (c as i64 + 1) * 10i64.pow((d - 1 - i) as u32))
        .sum()
}

impl TileReader<i64> for PatternReader {
    fn fill(&self, out: &mut [i64], index: &Index, level: u32) -> LoaderResult<()> {
        let full = self.level_full_shape(level);
        let tile = &self.tile_shape;
        let d = tile.len();
        let origin: Vec<u64> = index.iter().zip(tile.iter()).map(|(&i, &t)| i * t).collect();
        let extent: Vec<u64> = (0..d)
            .map(|axis| tile[axis].min(full[axis].saturating_sub(origin[axis])))
            .collect();
        let strides = crate::geometry::row_major_strides(tile);
        let total = volume(tile);
        for lin in 0..total {
            let mut rem = lin;
            let mut coord = vec![0u64; d];
            for (axis, &s) in strides.iter().enumerate() {
                coord[axis] = rem / s;
                rem %= s;
            }
            if coord.iter().zip(extent.iter()).all(|(&c, &e)| c < e) {
                let global: Vec<u64> = coord
                    .iter()
                    .zip(origin.iter())
                    .map(|(&c, &o)| c + o)
                    .collect();
                out[lin as usize] = pattern_value(&global);
            }
        }
        Ok(())
    }

    fn tile_shape(&self, _level: u32) -> Shape {
        self.tile_shape.clone()
    }

    fn full_shape(&self, level: u32) -> Shape {
        self.level_full_shape(level)
    }

    fn nb_levels(&self) -> u32 {
        self.nb_levels
    }

    fn nb_dims(&self) -> usize {
        self.full_shape0.len()
    }

    fn metadata(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_d_pattern_matches_expected_values() {
        let reader = PatternReader::new(vec![5], vec![2]);
        let mut buf = vec![0i64; 2];
        reader.fill(&mut buf, &vec![0], 0).unwrap();
        assert_eq!(buf, vec![1, 2]);
        reader.fill(&mut buf, &vec![2], 0).unwrap();
        assert_eq!(buf[0], 5);
    }

    #[test]
    fn three_d_pattern_matches_expected_value() {
        let reader = PatternReader::new(vec![5, 5, 5], vec![1, 1, 1]);
        let mut buf = vec![0i64; 1];
        reader.fill(&mut buf, &vec![2, 1, 4], 0).unwrap();
        assert_eq!(buf[0], 100 * 3 + 10 * 2 + 5);
    }

    #[test]
    fn pyramid_level_halves_shape() {
        let reader = PatternReader::with_levels(vec![8, 8], vec![2, 2], 3);
        assert_eq!(reader.full_shape(0), vec![8, 8]);
        assert_eq!(reader.full_shape(1), vec![4, 4]);
        assert_eq!(reader.full_shape(2), vec![2, 2]);
    }
}
