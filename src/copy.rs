//! Copy engine (C6): executes one N-D strided, optionally reversed copy record from a
//! tile buffer into a view buffer.
//!
//! Grounded on `fastpath_core::tile_reader::decode_region_bytes`'s row-major copy loop
//! (`for row in 0..copy_h { copy_from_slice(...) }`), generalized from one hardcoded
//! 2-D row loop over 3-byte pixels to arbitrary rank with per-axis reversal.

use crate::geometry::row_major_strides;
use crate::plan::CopyRecord;

pub fn execute_copy<T: Copy>(
    record: &CopyRecord,
    tile_shape: &[u64],
    src: &[T],
    view_shape: &[u64],
    dst: &mut [T],
) {
    let d = record.window.axes.len();
    if d == 0 || record.window.is_empty() {
        return;
    }

    let src_strides = row_major_strides(tile_shape);
    let dst_strides = row_major_strides(view_shape);

    if !record.window.any_reverse()
        && tile_shape == view_shape
        && record
            .window
            .axes
            .iter()
            .all(|a| a.src_offset == 0 && a.dst_offset == 0)
        && record
            .window
            .axes
            .iter()
            .zip(tile_shape.iter())
            .all(|(a, &t)| a.len == t)
    {
        let vol = record.window.volume() as usize;
        dst[..vol].copy_from_slice(&src[..vol]);
        return;
    }

    copy_axis(0, d, record, &src_strides, &dst_strides, 0, 0, src, dst);
}

fn copy_axis<T: Copy>(
    axis: usize,
    d: usize,
    record: &CopyRecord,
    src_strides: &[u64],
    dst_strides: &[u64],
    src_acc: u64,
    dst_acc: u64,
    src: &[T],
    dst: &mut [T],
) {
    let aw = &record.window.axes[axis];
    if axis == d - 1 {
        let src_base = src_acc + aw.src_offset * src_strides[axis];
        if !aw.reverse {
            let dst_base = (dst_acc + aw.dst_offset * dst_strides[axis]) as usize;
            let s = src_base as usize;
            let len = aw.len as usize;
            dst[dst_base..dst_base + len].copy_from_slice(&src[s..s + len]);
        } else {
            for p in 0..aw.len {
                let s = (src_base + p * src_strides[axis]) as usize;
                let dpos = aw.len - 1 - p;
                let dbase = (dst_acc + (aw.dst_offset + dpos) * dst_strides[axis]) as usize;
                dst[dbase] = src[s];
            }
        }
        return;
    }

    for p in 0..aw.len {
        let dpos = if aw.reverse { aw.len - 1 - p } else { p };
        let new_src_acc = src_acc + (aw.src_offset + p) * src_strides[axis];
        let new_dst_acc = dst_acc + (aw.dst_offset + dpos) * dst_strides[axis];
        copy_axis(
            axis + 1,
            d,
            record,
            src_strides,
            dst_strides,
            new_src_acc,
            new_dst_acc,
            src,
            dst,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::AxisWindow;
    use crate::plan::CopyRecord;

    fn record(axes: Vec<AxisWindow>) -> CopyRecord {
        CopyRecord {
            source_tile_index: vec![0; axes.len()],
            window: crate::geometry::Window { axes },
        }
    }

    #[test]
    fn full_tile_shortcut() {
        let src = vec![1, 2, 3, 4];
        let mut dst = vec![0; 4];
        let r = record(vec![
            AxisWindow { src_offset: 0, dst_offset: 0, len: 2, reverse: false },
            AxisWindow { src_offset: 0, dst_offset: 0, len: 2, reverse: false },
        ]);
        execute_copy(&r, &[2, 2], &src, &[2, 2], &mut dst);
        assert_eq!(dst, vec![1, 2, 3, 4]);
    }

    #[test]
    fn offset_subregion_copy() {
        // 3x3 source tile, copy its bottom-right 2x2 block into a 4x4 view at offset (1,1).
        let src: Vec<i32> = (0..9).collect(); // row-major 3x3: [0,1,2,3,4,5,6,7,8]
        let mut dst = vec![-1; 16];
        let r = record(vec![
            AxisWindow { src_offset: 1, dst_offset: 1, len: 2, reverse: false },
            AxisWindow { src_offset: 1, dst_offset: 1, len: 2, reverse: false },
        ]);
        execute_copy(&r, &[3, 3], &src, &[4, 4], &mut dst);
        // src rows 1,2 cols 1,2 = [[4,5],[7,8]]; dst rows 1,2 cols 1,2.
        assert_eq!(dst[1 * 4 + 1], 4);
        assert_eq!(dst[1 * 4 + 2], 5);
        assert_eq!(dst[2 * 4 + 1], 7);
        assert_eq!(dst[2 * 4 + 2], 8);
    }

    #[test]
    fn reverse_flag_mirrors_destination() {
        let src = vec![1, 2, 3];
        let mut dst = vec![0; 3];
        let r = record(vec![AxisWindow {
            src_offset: 0,
            dst_offset: 0,
            len: 3,
            reverse: true,
        }]);
        execute_copy(&r, &[3], &src, &[3], &mut dst);
        assert_eq!(dst, vec![3, 2, 1]);
    }

    #[test]
    fn one_d_basic() {
        let src = vec![10, 20, 30, 40, 50];
        let mut dst = vec![0; 2];
        let r = record(vec![AxisWindow {
            src_offset: 2,
            dst_offset: 0,
            len: 2,
            reverse: false,
        }]);
        execute_copy(&r, &[5], &src, &[2], &mut dst);
        assert_eq!(dst, vec![30, 40]);
    }
}
