//! Merging of surface fragments
//!
//! Automatic extraction yields many fragments of the same physical surface.
//! `verify_merge` classifies a pair of surfaces by spatial proximity and
//! depth agreement; `overlap_merge` and `adjacent_merge` combine them; and
//! `merge_list` drives pairwise merging to a fixed point.

use crate::error::Result;
use crate::surface::{Surface, FILL_VALUE};
use ndarray::Array2;

/// Outcome of comparing two surfaces for mergeability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MergeStatus {
    /// Common cells exist but their depths disagree beyond the threshold:
    /// different surfaces that happen to cross
    Separated = 0,
    /// Bounding boxes further apart than the adjacency margin
    Distant = 1,
    /// Touching fragments with no common cells
    Adjacent = 2,
    /// Common cells with agreeing depths
    Overlap = 3,
}

impl MergeStatus {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Thresholds steering merge decisions
#[derive(Debug, Clone, Copy)]
pub struct MergeParams {
    /// Bounding-box margin, in cells, within which fragments count as close
    pub adjacency: usize,
    /// Largest tolerated mean depth disagreement, in samples
    pub depth_threshold: i32,
    /// Fragments smaller than this are dropped by `merge_list`
    pub minsize: usize,
}

impl Default for MergeParams {
    fn default() -> Self {
        Self {
            adjacency: 3,
            depth_threshold: 3,
            minsize: 50,
        }
    }
}

fn spans_close(a_start: usize, a_len: usize, b_start: usize, b_len: usize, margin: usize) -> bool {
    let a_end = (a_start + a_len - 1) as i64;
    let b_end = (b_start + b_len - 1) as i64;
    a_start as i64 <= b_end + margin as i64 && b_start as i64 <= a_end + margin as i64
}

/// Classify a pair of surfaces
pub fn verify_merge(a: &mut Surface, b: &mut Surface, params: &MergeParams) -> MergeStatus {
    let [a_i, a_x] = a.origin();
    let [a_il, a_xl] = a.extent();
    let [b_i, b_x] = b.origin();
    let [b_il, b_xl] = b.extent();

    if !spans_close(a_i, a_il, b_i, b_il, params.adjacency)
        || !spans_close(a_x, a_xl, b_x, b_xl, params.adjacency)
    {
        return MergeStatus::Distant;
    }

    // Common cells inside the strict bbox intersection
    let i_lo = a_i.max(b_i);
    let i_hi = (a_i + a_il).min(b_i + b_il);
    let x_lo = a_x.max(b_x);
    let x_hi = (a_x + a_xl).min(b_x + b_xl);

    let mut common = 0usize;
    let mut total_diff = 0i64;
    for i in i_lo..i_hi {
        for x in x_lo..x_hi {
            if let (Some(ha), Some(hb)) = (a.depth_at(i, x), b.depth_at(i, x)) {
                common += 1;
                total_diff += (ha - hb).abs() as i64;
            }
        }
    }

    if common == 0 {
        return MergeStatus::Adjacent;
    }
    // Compare the untruncated sum so a fractional mean above the
    // threshold still counts as disagreement
    if total_diff > params.depth_threshold as i64 * common as i64 {
        return MergeStatus::Separated;
    }
    MergeStatus::Overlap
}

fn combined_frame(a: &Surface, b: &Surface) -> ([usize; 2], [usize; 2]) {
    let [a_i, a_x] = a.origin();
    let [a_il, a_xl] = a.extent();
    let [b_i, b_x] = b.origin();
    let [b_il, b_xl] = b.extent();

    let i_min = a_i.min(b_i);
    let x_min = a_x.min(b_x);
    let i_len = (a_i + a_il).max(b_i + b_il) - i_min;
    let x_len = (a_x + a_xl).max(b_x + b_xl) - x_min;
    ([i_min, x_min], [i_len, x_len])
}

fn place(target: &mut Array2<i32>, origin: [usize; 2], surface: &mut Surface) {
    let [s_i, s_x] = surface.origin();
    for ((r, c), &h) in surface.matrix().indexed_iter() {
        if h == FILL_VALUE {
            continue;
        }
        let cell = &mut target[[s_i + r - origin[0], s_x + c - origin[1]]];
        if *cell == FILL_VALUE {
            *cell = h;
        } else {
            // Both fragments cover the cell: truncating integer average
            *cell = (*cell + h) / 2;
        }
    }
}

/// Grey dilation of a depth matrix: every cell takes the maximum over its
/// 3x3 neighborhood, absent cells never contribute
fn dilate_depths(matrix: &Array2<i32>, iterations: usize) -> Array2<i32> {
    let (rows, cols) = matrix.dim();
    let mut current = matrix.clone();
    for _ in 0..iterations {
        let mut next = current.clone();
        for i in 0..rows {
            for j in 0..cols {
                let mut best = current[[i, j]];
                for ni in i.saturating_sub(1)..=(i + 1).min(rows - 1) {
                    for nj in j.saturating_sub(1)..=(j + 1).min(cols - 1) {
                        let value = current[[ni, nj]];
                        if value != FILL_VALUE && (best == FILL_VALUE || value > best) {
                            best = value;
                        }
                    }
                }
                next[[i, j]] = best;
            }
        }
        current = next;
    }
    current
}

/// Merge two fragments that share cells. At every common cell the merged
/// depth is the truncating integer average of the two.
pub fn overlap_merge(a: &mut Surface, b: &mut Surface) -> Result<Surface> {
    let (origin, extent) = combined_frame(a, b);
    let mut matrix = Array2::from_elem((extent[0], extent[1]), FILL_VALUE);
    place(&mut matrix, origin, a);
    place(&mut matrix, origin, b);
    let name = a.name.clone();
    Surface::from_matrix(a.grid, &name, matrix, origin[0], origin[1])
}

/// Merge two fragments that touch without sharing cells.
///
/// `b`'s depth matrix is dilated by the adjacency margin; where the dilated
/// footprint reaches `a`, depths must agree within the threshold on
/// average. Returns `None` when the fragments do not actually border each
/// other or disagree in depth.
pub fn adjacent_merge(
    a: &mut Surface,
    b: &mut Surface,
    params: &MergeParams,
) -> Result<Option<Surface>> {
    let (a_lo, a_hi) = a.depth_range();
    let (b_lo, b_hi) = b.depth_range();
    if a_lo > b_hi + params.depth_threshold || b_lo > a_hi + params.depth_threshold {
        return Ok(None);
    }

    let (origin, extent) = combined_frame(a, b);
    let mut b_depths = Array2::from_elem((extent[0], extent[1]), FILL_VALUE);
    let [b_i, b_x] = b.origin();
    for ((r, c), &h) in b.matrix().indexed_iter() {
        if h != FILL_VALUE {
            b_depths[[b_i + r - origin[0], b_x + c - origin[1]]] = h;
        }
    }
    let grown = dilate_depths(&b_depths, params.adjacency);

    let [a_i, a_x] = a.origin();
    let mut reached = 0usize;
    let mut total_diff = 0i64;
    for ((r, c), &h) in a.matrix().indexed_iter() {
        if h == FILL_VALUE {
            continue;
        }
        let nearby = grown[[a_i + r - origin[0], a_x + c - origin[1]]];
        if nearby != FILL_VALUE {
            reached += 1;
            total_diff += (h - nearby).abs() as i64;
        }
    }
    if reached == 0 || total_diff > params.depth_threshold as i64 * reached as i64 {
        return Ok(None);
    }

    overlap_merge(a, b).map(Some)
}

/// Drop fragments smaller than `minsize`, then merge the rest pairwise to
/// a fixed point. Every surviving surface is pairwise unmergeable with
/// the others.
pub fn merge_list(mut surfaces: Vec<Surface>, params: &MergeParams) -> Result<Vec<Surface>> {
    surfaces.retain(|s| s.len() >= params.minsize);

    loop {
        let mut merged: Option<(usize, usize, Surface)> = None;

        'scan: for i in 0..surfaces.len() {
            for j in (i + 1)..surfaces.len() {
                let (left, right) = surfaces.split_at_mut(j);
                let a = &mut left[i];
                let b = &mut right[0];

                let candidate = match verify_merge(a, b, params) {
                    MergeStatus::Overlap => Some(overlap_merge(a, b)?),
                    MergeStatus::Adjacent => adjacent_merge(a, b, params)?,
                    _ => None,
                };
                if let Some(surface) = candidate {
                    merged = Some((i, j, surface));
                    break 'scan;
                }
            }
        }

        match merged {
            Some((i, j, surface)) => {
                log::debug!("merged fragment {} into {}: {} points", j, i, surface.len());
                surfaces.swap_remove(j);
                surfaces[i] = surface;
            }
            None => break,
        }
    }
    Ok(surfaces)
}
