//! Labeled surfaces inside a cube
//!
//! A surface assigns at most one depth to every spatial cell of a cube. Two
//! interchangeable storages back it: a point cloud of `(inline, crossline,
//! depth)` triples in cube-local indices, and a dense depth matrix over the
//! surface's bounding box with `FILL_VALUE` marking absent cells. Either
//! storage is derived from the other on demand; mutating one invalidates
//! the other along with the cached depth range.

use crate::charisma;
use crate::cube::Cube;
use crate::error::{CubeError, Result};
use crate::types::GridGeometry;
use crate::utils::gaussian_kernel;
use ndarray::{Array2, Array3};
use std::path::Path;

/// Sentinel for absent cells in depth matrices
pub const FILL_VALUE: i32 = -999_999;

/// One surface, tied to a cube grid by a value-copied descriptor
#[derive(Debug, Clone)]
pub struct Surface {
    pub name: String,
    pub grid: GridGeometry,
    points: Option<Array2<i32>>,
    matrix: Option<Array2<i32>>,
    i_min: usize,
    x_min: usize,
    i_len: usize,
    x_len: usize,
    h_min: i32,
    h_max: i32,
    h_mean: f64,
    h_std: f64,
    len: usize,
}

impl Surface {
    /// Build from cube-local point triples. Points outside the grid are
    /// dropped silently; an input with no remaining points is an error.
    pub fn from_points(
        grid: GridGeometry,
        name: &str,
        points: Vec<[i32; 3]>,
    ) -> Result<Self> {
        let total = points.len();
        let kept: Vec<[i32; 3]> = points.into_iter().filter(|p| grid.contains(p)).collect();
        if kept.len() < total {
            log::debug!(
                "surface `{}`: dropped {} points outside the grid",
                name,
                total - kept.len()
            );
        }
        Self::from_kept_points(grid, name.to_string(), kept)
    }

    fn from_kept_points(grid: GridGeometry, name: String, mut kept: Vec<[i32; 3]>) -> Result<Self> {
        // At most one depth per spatial cell
        kept.sort_unstable();
        kept.dedup_by_key(|p| [p[0], p[1]]);
        if kept.is_empty() {
            return Err(CubeError::InvalidDimensions(format!(
                "surface `{}` holds no points inside the grid",
                name
            )));
        }

        let mut i_min = i32::MAX;
        let mut i_max = i32::MIN;
        let mut x_min = i32::MAX;
        let mut x_max = i32::MIN;
        let mut h_min = i32::MAX;
        let mut h_max = i32::MIN;
        for p in &kept {
            i_min = i_min.min(p[0]);
            i_max = i_max.max(p[0]);
            x_min = x_min.min(p[1]);
            x_max = x_max.max(p[1]);
            h_min = h_min.min(p[2]);
            h_max = h_max.max(p[2]);
        }

        let len = kept.len();
        let mut sum = 0.0f64;
        let mut sumsq = 0.0f64;
        for p in &kept {
            let h = p[2] as f64;
            sum += h;
            sumsq += h * h;
        }
        let h_mean = sum / len as f64;
        let h_std = (sumsq / len as f64 - h_mean * h_mean).max(0.0).sqrt();

        let flat: Vec<i32> = kept.into_iter().flatten().collect();
        let points = Array2::from_shape_vec((len, 3), flat)
            .map_err(|e| CubeError::InvalidDimensions(e.to_string()))?;

        Ok(Self {
            name,
            grid,
            points: Some(points),
            matrix: None,
            i_min: i_min as usize,
            x_min: x_min as usize,
            i_len: (i_max - i_min + 1) as usize,
            x_len: (x_max - x_min + 1) as usize,
            h_min,
            h_max,
            h_mean,
            h_std,
            len,
        })
    }

    /// Build from a mapping of spatial cells to depths
    pub fn from_map<I>(grid: GridGeometry, name: &str, map: I) -> Result<Self>
    where
        I: IntoIterator<Item = ([i32; 2], i32)>,
    {
        let points = map.into_iter().map(|([i, x], h)| [i, x, h]).collect();
        Self::from_points(grid, name, points)
    }

    /// Build from a bounding-box depth matrix with its cube-local origin
    pub fn from_matrix(
        grid: GridGeometry,
        name: &str,
        matrix: Array2<i32>,
        i_min: usize,
        x_min: usize,
    ) -> Result<Self> {
        let (rows, cols) = matrix.dim();
        if i_min + rows > grid.shape[0] || x_min + cols > grid.shape[1] {
            return Err(CubeError::OutOfBounds(format!(
                "matrix {}x{} at ({}, {}) exceeds grid {:?}",
                rows, cols, i_min, x_min, grid.shape
            )));
        }

        let mut surface = Self {
            name: name.to_string(),
            grid,
            points: None,
            matrix: Some(matrix),
            i_min,
            x_min,
            i_len: rows,
            x_len: cols,
            h_min: 0,
            h_max: 0,
            h_mean: 0.0,
            h_std: 0.0,
            len: 0,
        };
        surface.recompute_from_matrix()?;
        Ok(surface)
    }

    /// Build from a matrix covering the whole spatial grid
    pub fn from_full_matrix(grid: GridGeometry, name: &str, matrix: Array2<i32>) -> Result<Self> {
        if matrix.dim() != (grid.shape[0], grid.shape[1]) {
            return Err(CubeError::InvalidDimensions(format!(
                "full matrix {:?} does not cover grid {:?}",
                matrix.dim(),
                grid.shape
            )));
        }
        Self::from_matrix(grid, name, matrix, 0, 0)
    }

    /// Read a surface from a Charisma interchange file, converting line
    /// coordinates to cube-local indices. The surface name is the file stem.
    pub fn from_file(path: &Path, grid: GridGeometry) -> Result<Self> {
        let line_points = charisma::read_points(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("surface")
            .to_string();
        let cubic: Vec<[i32; 3]> = line_points
            .into_iter()
            .map(|p| grid.lines_to_cubic(p))
            .collect();
        Self::from_points(grid, &name, cubic)
    }

    /// Write the surface to a Charisma interchange file in line
    /// coordinates, sorted by inline then crossline.
    pub fn dump(&mut self, path: &Path) -> Result<()> {
        let grid = self.grid;
        let mut rows: Vec<[i32; 3]> = self
            .points()
            .rows()
            .into_iter()
            .map(|r| [r[0], r[1], r[2]])
            .collect();
        rows.sort_unstable();
        let line_points: Vec<[f32; 3]> = rows.into_iter().map(|p| grid.cubic_to_lines(p)).collect();
        charisma::write_points(path, &line_points)
    }

    /// Number of cells carrying a depth
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bounding box origin along the two spatial axes
    pub fn origin(&self) -> [usize; 2] {
        [self.i_min, self.x_min]
    }

    /// Bounding box extent along the two spatial axes
    pub fn extent(&self) -> [usize; 2] {
        [self.i_len, self.x_len]
    }

    /// Smallest and largest depth carried by the surface
    pub fn depth_range(&self) -> (i32, i32) {
        (self.h_min, self.h_max)
    }

    /// Mean depth over all points, cached alongside the depth range
    pub fn depth_mean(&self) -> f64 {
        self.h_mean
    }

    /// Standard deviation of depth over all points, cached alongside the
    /// depth range
    pub fn depth_std(&self) -> f64 {
        self.h_std
    }

    fn ensure_points(&mut self) {
        if self.points.is_some() {
            return;
        }
        let mut rows: Vec<[i32; 3]> = Vec::with_capacity(self.len);
        if let Some(matrix) = &self.matrix {
            for ((r, c), &h) in matrix.indexed_iter() {
                if h != FILL_VALUE {
                    rows.push([(self.i_min + r) as i32, (self.x_min + c) as i32, h]);
                }
            }
        }
        let n = rows.len();
        let flat: Vec<i32> = rows.into_iter().flatten().collect();
        self.points = Some(
            Array2::from_shape_vec((n, 3), flat).unwrap_or_else(|_| Array2::zeros((0, 3))),
        );
    }

    fn ensure_matrix(&mut self) {
        if self.matrix.is_some() {
            return;
        }
        let mut matrix = Array2::from_elem((self.i_len, self.x_len), FILL_VALUE);
        if let Some(points) = &self.points {
            for row in points.rows() {
                let r = row[0] as usize - self.i_min;
                let c = row[1] as usize - self.x_min;
                matrix[[r, c]] = row[2];
            }
        }
        self.matrix = Some(matrix);
    }

    /// Point-cloud storage, `(len, 3)` in cube-local indices
    pub fn points(&mut self) -> &Array2<i32> {
        self.ensure_points();
        self.points.get_or_insert_with(|| Array2::zeros((0, 3)))
    }

    /// Bounding-box depth matrix storage
    pub fn matrix(&mut self) -> &Array2<i32> {
        self.ensure_matrix();
        self.matrix
            .get_or_insert_with(|| Array2::from_elem((self.i_len, self.x_len), FILL_VALUE))
    }

    /// Depth matrix covering the whole spatial grid
    pub fn full_matrix(&mut self) -> Array2<i32> {
        let [gi, gx] = [self.grid.shape[0], self.grid.shape[1]];
        let (i_min, x_min) = (self.i_min, self.x_min);
        let mut full = Array2::from_elem((gi, gx), FILL_VALUE);
        for ((r, c), &h) in self.matrix().indexed_iter() {
            if h != FILL_VALUE {
                full[[i_min + r, x_min + c]] = h;
            }
        }
        full
    }

    /// Depth at a cube-local spatial cell, if the surface covers it
    pub fn depth_at(&mut self, i: usize, x: usize) -> Option<i32> {
        if i < self.i_min || x < self.x_min {
            return None;
        }
        let (r, c) = (i - self.i_min, x - self.x_min);
        if r >= self.i_len || c >= self.x_len {
            return None;
        }
        match self.matrix()[[r, c]] {
            FILL_VALUE => None,
            depth => Some(depth),
        }
    }

    fn recompute_from_matrix(&mut self) -> Result<()> {
        let (mut h_min, mut h_max) = (i32::MAX, i32::MIN);
        let mut len = 0;
        let mut sum = 0.0f64;
        let mut sumsq = 0.0f64;
        if let Some(matrix) = &self.matrix {
            for &h in matrix.iter() {
                if h != FILL_VALUE {
                    h_min = h_min.min(h);
                    h_max = h_max.max(h);
                    len += 1;
                    sum += h as f64;
                    sumsq += (h as f64) * (h as f64);
                }
            }
        }
        if len == 0 {
            return Err(CubeError::InvalidDimensions(format!(
                "surface `{}` lost all of its points",
                self.name
            )));
        }
        if h_min < 0 || h_max as usize >= self.grid.shape[2] {
            return Err(CubeError::OutOfBounds(format!(
                "surface `{}` depths {}..{} exceed grid depth {}",
                self.name, h_min, h_max, self.grid.shape[2]
            )));
        }
        self.h_min = h_min;
        self.h_max = h_max;
        self.h_mean = sum / len as f64;
        self.h_std = (sumsq / len as f64 - self.h_mean * self.h_mean)
            .max(0.0)
            .sqrt();
        self.len = len;
        Ok(())
    }

    /// Transform the matrix storage by value. The point storage and cached
    /// depth range are rebuilt from the result; the bounding box frame is
    /// kept, so the transform must preserve the matrix shape.
    pub fn apply_to_matrix<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(Array2<i32>) -> Array2<i32>,
    {
        self.ensure_matrix();
        let matrix = match self.matrix.take() {
            Some(m) => m,
            None => Array2::from_elem((self.i_len, self.x_len), FILL_VALUE),
        };
        let shape = matrix.dim();
        let transformed = f(matrix);
        if transformed.dim() != shape {
            return Err(CubeError::InvalidDimensions(format!(
                "matrix transform changed shape {:?} to {:?}",
                shape,
                transformed.dim()
            )));
        }
        self.matrix = Some(transformed);
        self.points = None;
        self.recompute_from_matrix()
    }

    /// Transform the point storage by value. The matrix storage, bounding
    /// box and cached depth range are rebuilt from the result.
    pub fn apply_to_points<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(Array2<i32>) -> Array2<i32>,
    {
        self.ensure_points();
        let points = match self.points.take() {
            Some(p) => p,
            None => Array2::zeros((0, 3)),
        };
        let transformed = f(points);
        let rows: Vec<[i32; 3]> = transformed
            .rows()
            .into_iter()
            .map(|r| [r[0], r[1], r[2]])
            .collect();
        let kept: Vec<[i32; 3]> = rows.into_iter().filter(|p| self.grid.contains(p)).collect();
        let rebuilt = Self::from_kept_points(self.grid, self.name.clone(), kept)?;
        *self = rebuilt;
        Ok(())
    }

    /// Drop points at cells marked nonzero in a full-grid filtering matrix,
    /// typically the zero-trace matrix of the host cube.
    pub fn filter(&mut self, filtering: &Array2<u8>) -> Result<()> {
        if filtering.dim() != (self.grid.shape[0], self.grid.shape[1]) {
            return Err(CubeError::InvalidDimensions(format!(
                "filtering matrix {:?} does not cover grid {:?}",
                filtering.dim(),
                self.grid.shape
            )));
        }
        self.apply_to_points(|points| {
            let rows: Vec<[i32; 3]> = points
                .rows()
                .into_iter()
                .map(|r| [r[0], r[1], r[2]])
                .filter(|p| filtering[[p[0] as usize, p[1] as usize]] == 0)
                .collect();
            let n = rows.len();
            let flat: Vec<i32> = rows.into_iter().flatten().collect();
            Array2::from_shape_vec((n, 3), flat).unwrap_or_else(|_| Array2::zeros((0, 3)))
        })
    }

    /// Gaussian smoothing of the depth matrix. Absent cells never
    /// contribute; kernel weights over present neighbors are renormalized
    /// per cell. With `preserve_borders` absent cells also stay absent,
    /// otherwise smoothing labels absent cells that have present
    /// neighbors inside the kernel footprint.
    pub fn smooth(&mut self, kernel_size: usize, sigma: f64, preserve_borders: bool) -> Result<()> {
        let kernel_size = if kernel_size % 2 == 0 {
            kernel_size + 1
        } else {
            kernel_size
        };
        let kernel = gaussian_kernel(kernel_size, sigma);
        let half = (kernel_size / 2) as isize;

        self.apply_to_matrix(|matrix| {
            let (rows, cols) = matrix.dim();
            let mut smoothed = matrix.clone();
            for i in 0..rows {
                for j in 0..cols {
                    if preserve_borders && matrix[[i, j]] == FILL_VALUE {
                        continue;
                    }
                    let mut acc = 0.0f64;
                    let mut weight = 0.0f64;
                    for ki in -half..=half {
                        for kj in -half..=half {
                            let ni = i as isize + ki;
                            let nj = j as isize + kj;
                            if ni < 0 || nj < 0 || ni >= rows as isize || nj >= cols as isize {
                                continue;
                            }
                            let value = matrix[[ni as usize, nj as usize]];
                            if value == FILL_VALUE {
                                continue;
                            }
                            let w = kernel[[(ki + half) as usize, (kj + half) as usize]];
                            acc += value as f64 * w;
                            weight += w;
                        }
                    }
                    if weight > 0.0 {
                        smoothed[[i, j]] = (acc / weight).round() as i32;
                    }
                }
            }
            smoothed
        })
    }

    /// Cut amplitude values from the host cube in a depth window centered
    /// on the surface. The result spans the bounding box, shaped
    /// `(i_len, x_len, window)`; absent cells and window samples falling
    /// outside the cube depth are NaN.
    pub fn cube_values(&mut self, cube: &mut Cube, window: usize) -> Result<Array3<f32>> {
        if cube.shape() != self.grid.shape {
            return Err(CubeError::InvalidDimensions(format!(
                "cube shape {:?} does not match surface grid {:?}",
                cube.shape(),
                self.grid.shape
            )));
        }
        if window == 0 {
            return Err(CubeError::InvalidDimensions(
                "depth window must be positive".to_string(),
            ));
        }

        let depth = self.grid.shape[2];
        let low = (window / 2) as i32;
        // One read over the bounding box and the clipped depth span of
        // every window
        let h_lo = (self.h_min - low).max(0) as usize;
        let h_hi = (self.h_max - low + window as i32).min(depth as i32) as usize;
        let sub = cube.load_subvolume(&[
            self.i_min..self.i_min + self.i_len,
            self.x_min..self.x_min + self.x_len,
            h_lo..h_hi,
        ])?;

        let mut values = Array3::from_elem((self.i_len, self.x_len, window), f32::NAN);
        for ((r, c), &h) in self.matrix().indexed_iter() {
            if h == FILL_VALUE {
                continue;
            }
            for k in 0..window {
                let sample = h - low + k as i32;
                if sample < 0 || sample as usize >= depth {
                    continue;
                }
                values[[r, c, k]] = sub[[r, c, sample as usize - h_lo]];
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_grid() -> GridGeometry {
        GridGeometry {
            shape: [20, 30, 100],
            iline_offset: 100,
            xline_offset: 500,
            delay: 0.0,
            sample_interval: 2.0,
        }
    }

    fn flat_surface() -> Surface {
        // 5x5 patch at (2, 3), constant depth 40
        let mut points = Vec::new();
        for i in 2..7 {
            for x in 3..8 {
                points.push([i, x, 40]);
            }
        }
        Surface::from_points(test_grid(), "flat", points).unwrap()
    }

    #[test]
    fn test_from_points_drops_outsiders() {
        let points = vec![[1, 1, 10], [5, 5, 20], [-1, 0, 10], [0, 0, 500]];
        let surface = Surface::from_points(test_grid(), "test", points).unwrap();
        assert_eq!(surface.len(), 2);
        assert_eq!(surface.depth_range(), (10, 20));
    }

    #[test]
    fn test_empty_surface_is_error() {
        assert!(Surface::from_points(test_grid(), "none", vec![[-1, 0, 0]]).is_err());
    }

    #[test]
    fn test_points_matrix_roundtrip() {
        let mut surface = flat_surface();
        assert_eq!(surface.origin(), [2, 3]);
        assert_eq!(surface.extent(), [5, 5]);

        let matrix = surface.matrix().clone();
        let rebuilt =
            Surface::from_matrix(test_grid(), "rebuilt", matrix, 2, 3).unwrap();
        let mut rebuilt = rebuilt;
        assert_eq!(rebuilt.len(), surface.len());

        let mut a: Vec<[i32; 3]> = surface
            .points()
            .rows()
            .into_iter()
            .map(|r| [r[0], r[1], r[2]])
            .collect();
        let mut b: Vec<[i32; 3]> = rebuilt
            .points()
            .rows()
            .into_iter()
            .map(|r| [r[0], r[1], r[2]])
            .collect();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
    }

    #[test]
    fn test_from_map_and_depth_scalars() {
        let map = vec![([0, 0], 10), ([0, 1], 20), ([1, 0], 30)];
        let surface = Surface::from_map(test_grid(), "mapped", map).unwrap();
        assert_eq!(surface.len(), 3);
        assert_eq!(surface.depth_mean(), 20.0);
        assert!((surface.depth_std() - (200.0f64 / 3.0).sqrt()).abs() < 1e-12);

        let flat = flat_surface();
        assert_eq!(flat.depth_mean(), 40.0);
        assert_eq!(flat.depth_std(), 0.0);
    }

    #[test]
    fn test_depth_at() {
        let mut surface = flat_surface();
        assert_eq!(surface.depth_at(4, 5), Some(40));
        assert_eq!(surface.depth_at(0, 0), None);
        assert_eq!(surface.depth_at(19, 29), None);
    }

    #[test]
    fn test_full_matrix_places_bbox() {
        let mut surface = flat_surface();
        let full = surface.full_matrix();
        assert_eq!(full.dim(), (20, 30));
        assert_eq!(full[[2, 3]], 40);
        assert_eq!(full[[0, 0]], FILL_VALUE);
    }

    #[test]
    fn test_apply_to_matrix_invalidates_points() {
        let mut surface = flat_surface();
        surface.points();

        surface
            .apply_to_matrix(|mut m| {
                m.mapv_inplace(|h| if h == FILL_VALUE { h } else { h + 5 });
                m
            })
            .unwrap();
        assert_eq!(surface.depth_range(), (45, 45));
        assert_eq!(surface.depth_mean(), 45.0);
        assert_eq!(surface.depth_std(), 0.0);
        assert!(surface.points().rows().into_iter().all(|r| r[2] == 45));
    }

    #[test]
    fn test_apply_to_points_rebuilds_bbox() {
        let mut surface = flat_surface();
        surface
            .apply_to_points(|mut points| {
                for mut row in points.rows_mut() {
                    row[0] += 10;
                    row[1] += 10;
                }
                points
            })
            .unwrap();
        assert_eq!(surface.origin(), [12, 13]);
        assert_eq!(surface.len(), 25);
    }

    #[test]
    fn test_filter_against_dead_traces() {
        let mut surface = flat_surface();
        let mut dead = Array2::<u8>::zeros((20, 30));
        dead[[2, 3]] = 1;
        dead[[4, 5]] = 1;
        surface.filter(&dead).unwrap();
        assert_eq!(surface.len(), 23);
        assert_eq!(surface.depth_at(2, 3), None);
    }

    #[test]
    fn test_smooth_preserves_support() {
        let mut points = Vec::new();
        for i in 0..10 {
            for x in 0..10 {
                // Step surface: depth jumps in the middle
                let h = if i < 5 { 30 } else { 50 };
                points.push([i, x, h]);
            }
        }
        let mut surface = Surface::from_points(test_grid(), "step", points).unwrap();
        let len_before = surface.len();
        surface.smooth(3, 0.8, true).unwrap();
        assert_eq!(surface.len(), len_before);

        // Depths near the jump moved toward each other
        let (h_min, h_max) = surface.depth_range();
        assert_eq!(h_min, 30);
        assert_eq!(h_max, 50);
        let near_jump = surface.depth_at(4, 5).unwrap();
        assert!(near_jump > 30 && near_jump < 50);
    }

    #[test]
    fn test_smooth_can_grow_into_holes() {
        let mut points = Vec::new();
        for i in 0..6 {
            for x in 0..6 {
                if (i, x) != (3, 3) {
                    points.push([i, x, 40]);
                }
            }
        }

        // Preserving borders keeps the hole absent
        let mut kept = Surface::from_points(test_grid(), "kept", points.clone()).unwrap();
        kept.smooth(3, 0.8, true).unwrap();
        assert_eq!(kept.len(), 35);
        assert_eq!(kept.depth_at(3, 3), None);

        // Without preservation the hole takes the neighborhood depth
        let mut grown = Surface::from_points(test_grid(), "grown", points).unwrap();
        grown.smooth(3, 0.8, false).unwrap();
        assert_eq!(grown.len(), 36);
        assert_eq!(grown.depth_at(3, 3), Some(40));
    }

    #[test]
    fn test_line_coordinate_dump_roundtrip() {
        use tempfile::TempDir;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flat.char");

        let mut surface = flat_surface();
        surface.dump(&path).unwrap();

        let mut loaded = Surface::from_file(&path, test_grid()).unwrap();
        assert_eq!(loaded.name, "flat");
        assert_eq!(loaded.len(), surface.len());
        assert_eq!(loaded.depth_at(4, 5), Some(40));
    }
}
