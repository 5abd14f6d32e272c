//! Plan generator (C4): from a view index, computes the copy records that cover the
//! central tile extended by the configured halo radii, clipped to the file's extent.
//!
//! Grounded on `fastpath_core::tile_reader::decode_region_bytes`'s intersection-and-offset
//! math (tile vs. requested-rectangle overlap, `src_x`/`src_y`/`dst_x`/`dst_y`), generalized
//! from a hardcoded 2-D, 3-bytes-per-pixel region read into N-D copy records that are
//! planned up front rather than recomputed inline during the copy.

use crate::error::{LoaderError, LoaderResult};
use crate::geometry::{tile_grid_dims, AxisWindow, Index, Interval, Window};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRecord {
    pub source_tile_index: Index,
    pub window: Window,
}

/// The view's extended window in global coordinates, both before (`unclipped`) and after
/// (`clipped`) intersecting with `[0, full_shape)`. The destination origin for every copy
/// record is relative to `unclipped.lo`, so halo cells naturally land in the leading
/// rows/cols/layers.
pub struct Plan {
    pub records: Vec<CopyRecord>,
    pub unclipped: Vec<Interval>,
    pub clipped: Vec<Interval>,
}

pub fn generate_plan(
    view_index: &[u64],
    radii: &[u64],
    tile_shape: &[u64],
    full_shape: &[u64],
) -> LoaderResult<Plan> {
    let d = tile_shape.len();
    if view_index.len() != d || radii.len() != d || full_shape.len() != d {
        return Err(LoaderError::InvalidConfiguration(
            "view_index/radii/tile_shape/full_shape rank mismatch".into(),
        ));
    }

    let mut unclipped = Vec::with_capacity(d);
    for axis in 0..d {
        let central_lo = view_index[axis] as i64 * tile_shape[axis] as i64;
        let central_hi = central_lo + tile_shape[axis] as i64;
        unclipped.push(Interval {
            lo: central_lo - radii[axis] as i64,
            hi: central_hi + radii[axis] as i64,
        });
    }

    generate_plan_for_region(&unclipped, tile_shape, full_shape)
}

/// Lower-level primitive behind `generate_plan`: given an already-computed unclipped
/// destination region (in global coordinates), clips it to `full_shape` and emits one
/// copy record per source tile (of `source_tile_shape`) it intersects.
///
/// `generate_plan` derives `unclipped` from `view_index * tile_shape ± radii`, which
/// only holds when the region being filled is tiled the same way as its source. The
/// adaptive remapper's inner decomposition breaks that assumption — a logical tile's
/// region (sized `logical_tile_shape`) is sourced from the file's distinct
/// `physical_tile_shape` grid — so it calls this directly with the logical tile's own
/// region and the physical grid, rather than going through `generate_plan`.
pub fn generate_plan_for_region(
    unclipped: &[Interval],
    source_tile_shape: &[u64],
    full_shape: &[u64],
) -> LoaderResult<Plan> {
    let d = source_tile_shape.len();
    if unclipped.len() != d || full_shape.len() != d {
        return Err(LoaderError::InvalidConfiguration(
            "region/tile_shape/full_shape rank mismatch".into(),
        ));
    }

    let unclipped = unclipped.to_vec();
    let mut clipped = Vec::with_capacity(d);
    for axis in 0..d {
        clipped.push(unclipped[axis].intersect(&Interval {
            lo: 0,
            hi: full_shape[axis] as i64,
        }));
    }

    let grid_dims = tile_grid_dims(full_shape, source_tile_shape)?;
    let tile_shape = source_tile_shape;

    let mut tile_lo = vec![0i64; d];
    let mut tile_hi = vec![0i64; d];
    for axis in 0..d {
        if clipped[axis].is_empty() {
            return Ok(Plan {
                records: Vec::new(),
                unclipped,
                clipped,
            });
        }
        tile_lo[axis] = clipped[axis].lo.div_euclid(tile_shape[axis] as i64);
        tile_hi[axis] = (clipped[axis].hi - 1).div_euclid(tile_shape[axis] as i64) + 1;
    }

    let mut records = Vec::new();
    let mut cursor = tile_lo.clone();
    loop {
        let mut tile_index = Vec::with_capacity(d);
        let mut axes = Vec::with_capacity(d);
        let mut empty = false;
        for axis in 0..d {
            let t = cursor[axis];
            tile_index.push(t as u64);
            let tile_lo_global = t * tile_shape[axis] as i64;
            let tile_hi_global = (tile_lo_global + tile_shape[axis] as i64)
                .min(full_shape[axis] as i64);
            let coverage = Interval {
                lo: tile_lo_global,
                hi: tile_hi_global,
            };
            let isect = coverage.intersect(&clipped[axis]);
            if isect.is_empty() {
                empty = true;
            }
            axes.push(AxisWindow {
                src_offset: (isect.lo - tile_lo_global).max(0) as u64,
                dst_offset: (isect.lo - unclipped[axis].lo).max(0) as u64,
                len: isect.len(),
                reverse: false,
            });
        }
        if !empty {
            debug_assert!(
                tile_index
                    .iter()
                    .zip(grid_dims.iter())
                    .all(|(&i, &g)| i < g)
            );
            records.push(CopyRecord {
                source_tile_index: tile_index,
                window: Window { axes },
            });
        }

        if !advance(&mut cursor, &tile_lo, &tile_hi) {
            break;
        }
    }

    Ok(Plan {
        records,
        unclipped,
        clipped,
    })
}

/// A tile fetched once and copied through one or more windows. Grouping by
/// `source_tile_index` is how the plan generator's step 5 "two records targeting the
/// same tile have their window lists concatenated" is realized: a single cache
/// acquire (and at most one reader fill) serves every window in the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyGroup {
    pub source_tile_index: Index,
    pub windows: Vec<Window>,
}

/// Merges the plan generator's own copy records with the halo synthesizer's extra
/// tile requests (§4.4 step 5): records sharing a `source_tile_index` are folded into
/// one group, and exact-duplicate windows within a group are dropped.
pub fn merge_records(records: Vec<CopyRecord>, halo_records: Vec<CopyRecord>) -> Vec<CopyGroup> {
    let mut groups: Vec<CopyGroup> = Vec::new();
    let mut by_index: std::collections::HashMap<Index, usize> = std::collections::HashMap::new();

    for record in records.into_iter().chain(halo_records) {
        if record.window.is_empty() {
            continue;
        }
        if let Some(&pos) = by_index.get(&record.source_tile_index) {
            if !groups[pos].windows.contains(&record.window) {
                groups[pos].windows.push(record.window);
            }
        } else {
            by_index.insert(record.source_tile_index.clone(), groups.len());
            groups.push(CopyGroup {
                source_tile_index: record.source_tile_index,
                windows: vec![record.window],
            });
        }
    }
    groups
}

fn advance(cursor: &mut [i64], lo: &[i64], hi: &[i64]) -> bool {
    for axis in (0..cursor.len()).rev() {
        cursor[axis] += 1;
        if cursor[axis] < hi[axis] {
            return true;
        }
        cursor[axis] = lo[axis];
    }
    false
}
