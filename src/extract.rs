//! Surface extraction from probability masks
//!
//! Segmentation models emit a 3D mask of surface probabilities. Extraction
//! thresholds the mask, labels connected voxel components with full
//! 26-neighbor connectivity, collapses each component to one depth per
//! spatial column and wraps the results as surfaces in cube-local
//! coordinates.

use crate::error::Result;
use crate::surface::Surface;
use crate::types::GridGeometry;
use ndarray::Array3;
use std::collections::BTreeMap;

/// How a component's voxel column collapses to a single depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupByMode {
    /// Rounded mean depth of the column
    Mean,
    /// Shallowest voxel of the column
    Min,
    /// Deepest voxel of the column
    Max,
}

/// Extraction parameters
#[derive(Debug, Clone, Copy)]
pub struct ExtractParams {
    /// Mask values strictly above this count as surface
    pub threshold: f32,
    pub mode: GroupByMode,
    /// Components with fewer voxels, or with a smaller bounding-box
    /// volume, are discarded
    pub minsize: usize,
}

impl Default for ExtractParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            mode: GroupByMode::Mean,
            minsize: 50,
        }
    }
}

/// Label connected components of the thresholded mask. Voxels touching by
/// faces, edges or corners share a label.
fn label_components(mask: &Array3<f32>, threshold: f32) -> (Array3<u32>, u32) {
    let (ni, nx, nh) = mask.dim();
    let mut labels = Array3::<u32>::zeros((ni, nx, nh));
    let mut next_label = 0u32;
    let mut stack: Vec<[usize; 3]> = Vec::new();

    for i in 0..ni {
        for x in 0..nx {
            for h in 0..nh {
                if mask[[i, x, h]] <= threshold || labels[[i, x, h]] != 0 {
                    continue;
                }
                next_label += 1;
                labels[[i, x, h]] = next_label;
                stack.push([i, x, h]);

                while let Some([ci, cx, ch]) = stack.pop() {
                    for di in -1i64..=1 {
                        for dx in -1i64..=1 {
                            for dh in -1i64..=1 {
                                let n = [
                                    ci as i64 + di,
                                    cx as i64 + dx,
                                    ch as i64 + dh,
                                ];
                                if n[0] < 0
                                    || n[1] < 0
                                    || n[2] < 0
                                    || n[0] >= ni as i64
                                    || n[1] >= nx as i64
                                    || n[2] >= nh as i64
                                {
                                    continue;
                                }
                                let n = [n[0] as usize, n[1] as usize, n[2] as usize];
                                if mask[n] > threshold && labels[n] == 0 {
                                    labels[n] = next_label;
                                    stack.push(n);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    (labels, next_label)
}

/// Extract surfaces from a mask crop cut at `origin` of the cube grid.
///
/// Components are filtered by size, collapsed to one depth per spatial
/// column, shifted by the crop origin and returned sorted by point count
/// ascending.
pub fn surfaces_from_mask(
    mask: &Array3<f32>,
    origin: [usize; 3],
    grid: GridGeometry,
    params: &ExtractParams,
) -> Result<Vec<Surface>> {
    let (labels, n_components) = label_components(mask, params.threshold);
    log::debug!("mask of {:?} yields {} raw components", mask.dim(), n_components);

    // Voxels per component, grouped by spatial column
    let mut columns: Vec<BTreeMap<(usize, usize), Vec<usize>>> =
        vec![BTreeMap::new(); n_components as usize];
    for ((i, x, h), &label) in labels.indexed_iter() {
        if label != 0 {
            columns[(label - 1) as usize]
                .entry((i, x))
                .or_default()
                .push(h);
        }
    }

    let mut surfaces = Vec::new();
    for (index, component) in columns.into_iter().enumerate() {
        let voxels: usize = component.values().map(Vec::len).sum();
        if voxels < params.minsize {
            continue;
        }

        let (mut i_lo, mut i_hi, mut x_lo, mut x_hi) = (usize::MAX, 0, usize::MAX, 0);
        let (mut h_lo, mut h_hi) = (usize::MAX, 0usize);
        for (&(i, x), depths) in &component {
            i_lo = i_lo.min(i);
            i_hi = i_hi.max(i);
            x_lo = x_lo.min(x);
            x_hi = x_hi.max(x);
            for &h in depths {
                h_lo = h_lo.min(h);
                h_hi = h_hi.max(h);
            }
        }
        let bbox_volume = (i_hi - i_lo + 1) * (x_hi - x_lo + 1) * (h_hi - h_lo + 1);
        if bbox_volume < params.minsize {
            continue;
        }

        let points: Vec<[i32; 3]> = component
            .into_iter()
            .map(|((i, x), depths)| {
                let depth = match params.mode {
                    GroupByMode::Mean => {
                        let total: usize = depths.iter().sum();
                        (total as f64 / depths.len() as f64).round() as usize
                    }
                    GroupByMode::Min => depths.iter().copied().fold(usize::MAX, usize::min),
                    GroupByMode::Max => depths.iter().copied().fold(0, usize::max),
                };
                [
                    (i + origin[0]) as i32,
                    (x + origin[1]) as i32,
                    (depth + origin[2]) as i32,
                ]
            })
            .collect();

        let name = format!("surface_{}", index);
        surfaces.push(Surface::from_points(grid, &name, points)?);
    }

    surfaces.sort_by_key(Surface::len);
    Ok(surfaces)
}
