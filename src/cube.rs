//! Polymorphic cube handle
//!
//! `Cube::open` inspects the path extension, attaches the matching format
//! backend and returns one handle type regardless of the on-disk layout.
//! The handle owns a slice cache, lazily collected statistics and the
//! sidecar store; every read goes through the uniform
//! slice/sub-volume/trace API.

use crate::cache::{SliceCache, SliceKey};
use crate::compression::CompressionMethod;
use crate::dense::{DenseCube, DenseMeta, DenseWriter};
use crate::error::{CubeError, Result};
use crate::flat::FlatCube;
use crate::segy::{write_columnar, ColumnarCube, ColumnarSpec};
use crate::sidecar::{SidecarStore, PRESERVED};
use crate::stats::{self, StatisticsSummary, StatsConfig};
use crate::types::{Axis, CubeFormat, GridGeometry, ScaleMode};
use ndarray::{Array2, Array3};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Sub-volumes thinner than this along a spatial axis are assembled by
/// stacking cached full slices instead of direct trace reads.
const SLICE_STACK_THRESHOLD: usize = 15;
/// Depth-thin sub-volumes covering more than this share of the spatial
/// grid are assembled from depth slices.
const DEPTH_SLIDE_RATIO: f64 = 0.1;

enum Backend {
    Columnar(ColumnarCube),
    Dense(DenseCube),
    Flat(FlatCube),
}

impl Backend {
    fn shape(&self) -> [usize; 3] {
        match self {
            Backend::Columnar(c) => c.shape(),
            Backend::Dense(d) => d.shape(),
            Backend::Flat(f) => f.shape,
        }
    }

    fn load_slice(&mut self, loc: usize, axis: Axis, stable: bool) -> Result<Array2<f32>> {
        match self {
            Backend::Columnar(c) => c.load_slice(loc, axis.to_index(), stable),
            Backend::Dense(d) => d.load_slice(loc, axis),
            Backend::Flat(f) => f.load_slice(loc, axis.to_index()),
        }
    }

    fn load_subvolume(&mut self, ranges: &[Range<usize>; 3]) -> Result<Array3<f32>> {
        match self {
            Backend::Columnar(c) => c.load_subvolume(ranges),
            Backend::Dense(d) => d.load_subvolume(ranges),
            Backend::Flat(f) => f.load_subvolume(ranges),
        }
    }

    fn load_trace(&mut self, i: usize, x: usize) -> Result<Vec<f32>> {
        match self {
            Backend::Columnar(c) => c.load_trace(i, x),
            Backend::Dense(d) => d.load_trace(i, x),
            Backend::Flat(f) => f.load_trace(i, x),
        }
    }

    fn ilines(&self) -> &[i32] {
        match self {
            Backend::Columnar(c) => &c.ilines,
            Backend::Dense(d) => &d.meta.ilines,
            Backend::Flat(f) => &f.ilines,
        }
    }

    fn xlines(&self) -> &[i32] {
        match self {
            Backend::Columnar(c) => &c.xlines,
            Backend::Dense(d) => &d.meta.xlines,
            Backend::Flat(f) => &f.xlines,
        }
    }

    fn delay(&self) -> f32 {
        match self {
            Backend::Columnar(c) => c.delay,
            Backend::Dense(d) => d.meta.delay,
            Backend::Flat(f) => f.delay,
        }
    }

    fn sample_interval(&self) -> f32 {
        match self {
            Backend::Columnar(c) => c.sample_interval,
            Backend::Dense(d) => d.meta.sample_interval,
            Backend::Flat(f) => f.sample_interval,
        }
    }
}

/// One opened cube, any format
pub struct Cube {
    path: PathBuf,
    format: CubeFormat,
    backend: Backend,
    cache: SliceCache,
    sidecar: SidecarStore,
    stats: Option<StatisticsSummary>,
}

impl Cube {
    /// Open a cube, picking the format backend from the path extension.
    ///
    /// `sgy`/`segy`/`seg` open as columnar, `vol` as a dense container
    /// directory, `flat` as a flat archive.
    pub fn open(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let (format, backend) = match extension.as_str() {
            "sgy" | "segy" | "seg" => (
                CubeFormat::Columnar,
                Backend::Columnar(ColumnarCube::open(path)?),
            ),
            "vol" => (CubeFormat::Dense, Backend::Dense(DenseCube::open(path)?)),
            "flat" => (CubeFormat::Flat, Backend::Flat(FlatCube::open(path)?)),
            other => {
                return Err(CubeError::UnsupportedFormat(format!(
                    "{}: extension `{}`",
                    path.display(),
                    other
                )))
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            format,
            backend,
            cache: SliceCache::default(),
            sidecar: SidecarStore::open(path),
            stats: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> CubeFormat {
        self.format
    }

    pub fn shape(&self) -> [usize; 3] {
        self.backend.shape()
    }

    /// Sorted unique inline numbers
    pub fn ilines(&self) -> &[i32] {
        self.backend.ilines()
    }

    /// Sorted unique crossline numbers
    pub fn xlines(&self) -> &[i32] {
        self.backend.xlines()
    }

    /// Names of the two spatial index headers, in axis order
    pub fn index_headers(&self) -> [String; 2] {
        [Axis::Inline.to_string(), Axis::Crossline.to_string()]
    }

    /// Smallest and largest line number per spatial axis
    pub fn spatial_bounds(&self) -> [(i32, i32); 2] {
        let bounds = |lines: &[i32]| {
            (
                lines.first().copied().unwrap_or(0),
                lines.last().copied().unwrap_or(0),
            )
        };
        [bounds(self.ilines()), bounds(self.xlines())]
    }

    pub fn delay(&self) -> f32 {
        self.backend.delay()
    }

    pub fn sample_interval(&self) -> f32 {
        self.backend.sample_interval()
    }

    /// Value-copied grid descriptor, handed to surfaces
    pub fn grid(&self) -> GridGeometry {
        GridGeometry {
            shape: self.shape(),
            iline_offset: self.ilines().first().copied().unwrap_or(0),
            xline_offset: self.xlines().first().copied().unwrap_or(0),
            delay: self.delay(),
            sample_interval: self.sample_interval(),
        }
    }

    /// Load a 2D slice through the cache. With `stable`, columnar traces
    /// are fetched in physical record order.
    pub fn load_slice(&mut self, loc: usize, axis: Axis, stable: bool) -> Result<Arc<Array2<f32>>> {
        let key = SliceKey { loc, axis, stable };
        if let Some(slice) = self.cache.get(&key) {
            return Ok(slice);
        }
        let slice = Arc::new(self.backend.load_slice(loc, axis, stable)?);
        self.cache.insert(key, slice.clone());
        Ok(slice)
    }

    /// Load a 3D sub-volume, picking the read strategy from the requested
    /// extents: thin spatial crops stack cached slices, depth-thin crops
    /// covering much of the grid stack depth slices, everything else reads
    /// traces directly.
    pub fn load_subvolume(&mut self, ranges: &[Range<usize>; 3]) -> Result<Array3<f32>> {
        let shape = self.shape();
        for (axis, range) in ranges.iter().enumerate() {
            if range.end > shape[axis] || range.start >= range.end {
                return Err(CubeError::OutOfBounds(format!(
                    "range {}..{} along axis {} of {}",
                    range.start, range.end, axis, shape[axis]
                )));
            }
        }

        let lens = [ranges[0].len(), ranges[1].len(), ranges[2].len()];
        let mut thin_axis = 0;
        for axis in 1..3 {
            if lens[axis] < lens[thin_axis] {
                thin_axis = axis;
            }
        }

        if thin_axis < 2 {
            if lens[thin_axis] < SLICE_STACK_THRESHOLD {
                return self.stack_slices(ranges, Axis::from_index(thin_axis)?);
            }
        } else {
            let covered = (lens[0] * lens[1]) as f64 / (shape[0] * shape[1]) as f64;
            if covered > DEPTH_SLIDE_RATIO {
                return self.stack_slices(ranges, Axis::Depth);
            }
        }
        self.backend.load_subvolume(ranges)
    }

    /// Assemble a sub-volume from full cached slices along one axis
    fn stack_slices(&mut self, ranges: &[Range<usize>; 3], axis: Axis) -> Result<Array3<f32>> {
        let dims = [ranges[0].len(), ranges[1].len(), ranges[2].len()];
        let mut volume = Array3::<f32>::zeros(dims);

        for (offset, loc) in ranges[axis.to_index()].clone().enumerate() {
            let slice = self.load_slice(loc, axis, true)?;
            match axis {
                Axis::Inline => {
                    // slice rows are crosslines, columns depth
                    for (bx, x) in ranges[1].clone().enumerate() {
                        for (bh, h) in ranges[2].clone().enumerate() {
                            volume[[offset, bx, bh]] = slice[[x, h]];
                        }
                    }
                }
                Axis::Crossline => {
                    for (bi, i) in ranges[0].clone().enumerate() {
                        for (bh, h) in ranges[2].clone().enumerate() {
                            volume[[bi, offset, bh]] = slice[[i, h]];
                        }
                    }
                }
                Axis::Depth => {
                    for (bi, i) in ranges[0].clone().enumerate() {
                        for (bx, x) in ranges[1].clone().enumerate() {
                            volume[[bi, bx, offset]] = slice[[i, x]];
                        }
                    }
                }
            }
        }
        Ok(volume)
    }

    /// Load a single trace along depth
    pub fn load_trace(&mut self, i: usize, x: usize) -> Result<Vec<f32>> {
        self.backend.load_trace(i, x)
    }

    /// Drop every cached slice
    pub fn reset_cache(&mut self) {
        self.cache.reset();
    }

    /// Bound the slice cache by entry count. Shrinking evicts the oldest
    /// cached slices immediately.
    pub fn set_cache_capacity(&mut self, capacity: usize) {
        self.cache.set_capacity(capacity);
    }

    /// Number of bytes currently held by the slice cache
    pub fn cache_nbytes(&self) -> usize {
        self.cache.nbytes()
    }

    /// Amplitude statistics, computed once and persisted. A sidecar left by
    /// a previous session is reused instead of rescanning the file; asking
    /// for `spatial` matrices upgrades a global-only summary in place.
    pub fn stats(&mut self, spatial: bool) -> Result<&StatisticsSummary> {
        let usable = match &self.stats {
            Some(summary) => !spatial || summary.spatial.is_some(),
            None => false,
        };
        if !usable {
            let shape = self.shape();
            let lens = [shape[0], shape[1]];

            let restored = stats::restore_statistics(&self.sidecar, lens)
                .filter(|summary| !spatial || summary.spatial.is_some());
            let summary = match restored {
                Some(summary) => {
                    log::debug!("restored statistics for {} from sidecar", self.path.display());
                    summary
                }
                None => {
                    let backend = &mut self.backend;
                    let summary = stats::collect(
                        lens,
                        |i, x| backend.load_trace(i, x),
                        spatial,
                        &StatsConfig::default(),
                    )?;
                    self.sidecar.set("cube_shape", &shape)?;
                    self.sidecar.set("delay", &self.backend.delay())?;
                    self.sidecar
                        .set("sample_interval", &self.backend.sample_interval())?;
                    stats::store_statistics(&mut self.sidecar, &summary)?;
                    summary
                }
            };
            self.stats = Some(summary);
        }
        self.stats.as_ref().ok_or_else(|| {
            CubeError::MissingStatistics("statistics collection yielded nothing".to_string())
        })
    }

    /// Matrix marking traces with no signal, from the spatial statistics
    pub fn zero_traces(&mut self) -> Result<Array2<u8>> {
        let summary = self.stats(true)?;
        summary
            .spatial
            .as_ref()
            .map(|s| s.zero_traces.clone())
            .ok_or_else(|| CubeError::MissingStatistics("zero trace matrix".to_string()))
    }

    /// Normalize a crop cut from this cube, consuming and returning it
    pub fn normalize(&mut self, mut data: Array3<f32>, mode: ScaleMode) -> Result<Array3<f32>> {
        let summary = self.stats(false)?;
        match mode {
            ScaleMode::MinMax => {
                let min = summary.value_min;
                let span = summary.value_max - summary.value_min;
                if span <= 0.0 {
                    return Err(CubeError::MissingStatistics(
                        "degenerate value range".to_string(),
                    ));
                }
                data.mapv_inplace(|v| (v - min) / span);
            }
            ScaleMode::Quantile => {
                let scale = summary.q01.abs().max(summary.q99.abs());
                if scale <= 0.0 {
                    return Err(CubeError::MissingStatistics(
                        "degenerate quantile range".to_string(),
                    ));
                }
                data.mapv_inplace(|v| v / scale);
            }
            ScaleMode::QuantileClip => {
                let (low, high) = (summary.q01, summary.q99);
                let scale = low.abs().max(high.abs());
                if scale <= 0.0 {
                    return Err(CubeError::MissingStatistics(
                        "degenerate quantile range".to_string(),
                    ));
                }
                data.mapv_inplace(|v| v.clamp(low, high) / scale);
            }
        }
        Ok(data)
    }

    /// Load the full cube into memory
    pub fn to_array(&mut self) -> Result<Array3<f32>> {
        let [i_len, x_len, depth] = self.shape();
        self.backend.load_subvolume(&[0..i_len, 0..x_len, 0..depth])
    }

    /// Convert to a multi-projection dense container at `dir`, streaming
    /// one projection at a time. Preserved sidecar entries move along.
    pub fn convert_to_dense(&mut self, dir: &Path, compression: CompressionMethod) -> Result<()> {
        let shape = self.shape();
        let meta = DenseMeta {
            shape,
            ilines: self.ilines().to_vec(),
            xlines: self.xlines().to_vec(),
            delay: self.delay(),
            sample_interval: self.sample_interval(),
            compression,
        };
        let mut writer = DenseWriter::create(dir, meta)?;

        for axis in [Axis::Inline, Axis::Crossline, Axis::Depth] {
            log::info!("writing {} projection of {}", axis, dir.display());
            let backend = &mut self.backend;
            let slices = (0..shape[axis.to_index()])
                .map(|loc| backend.load_slice(loc, axis, true));
            writer.write_projection(axis, slices)?;
        }

        let mut target = SidecarStore::open(dir);
        for &key in PRESERVED {
            if let Some(value) = self.sidecar.get::<serde_json::Value>(key) {
                target.set(key, &value)?;
            }
        }
        target.save()
    }

    /// Convert to a columnar file. The whole cube is materialized, so this
    /// is meant for moderately sized volumes.
    pub fn convert_to_columnar(&mut self, path: &Path) -> Result<()> {
        let data = self.to_array()?;
        let spec = ColumnarSpec {
            ilines: self.ilines().to_vec(),
            xlines: self.xlines().to_vec(),
            sample_interval: self.sample_interval(),
            delay: self.delay() as i16,
        };
        write_columnar(path, &data, &spec)
    }
}

impl fmt::Display for Cube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [i_len, x_len, depth] = self.shape();
        write!(
            f,
            "<{} cube at {}: {}x{}x{}, dt={}ms, delay={}>",
            self.format,
            self.path.display(),
            i_len,
            x_len,
            depth,
            self.sample_interval(),
            self.delay()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segy::write_columnar;
    use tempfile::TempDir;

    fn test_volume() -> Array3<f32> {
        Array3::from_shape_fn((6, 5, 20), |(i, x, h)| {
            (i as f32) * 100.0 + (x as f32) * 10.0 + h as f32
        })
    }

    fn write_cube(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("cube.sgy");
        let spec = ColumnarSpec {
            ilines: (100..106).collect(),
            xlines: (500..505).collect(),
            sample_interval: 2.0,
            delay: 0,
        };
        write_columnar(&path, &test_volume(), &spec).unwrap();
        path
    }

    #[test]
    fn test_open_by_extension() {
        let dir = TempDir::new().unwrap();
        let path = write_cube(&dir);
        let cube = Cube::open(&path).unwrap();
        assert_eq!(cube.format(), CubeFormat::Columnar);
        assert_eq!(cube.shape(), [6, 5, 20]);
        assert_eq!(cube.spatial_bounds(), [(100, 105), (500, 504)]);
        assert_eq!(cube.index_headers()[0], "INLINE_3D");

        let bad = dir.path().join("cube.wat");
        std::fs::write(&bad, b"junk").unwrap();
        assert!(matches!(
            Cube::open(&bad),
            Err(CubeError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_slice_cache_serves_repeats() {
        let dir = TempDir::new().unwrap();
        let mut cube = Cube::open(&write_cube(&dir)).unwrap();

        let first = cube.load_slice(2, Axis::Inline, true).unwrap();
        let second = cube.load_slice(2, Axis::Inline, true).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cube.cache_nbytes() > 0);

        cube.reset_cache();
        assert_eq!(cube.cache_nbytes(), 0);
    }

    #[test]
    fn test_cache_capacity_bounds_retention() {
        let dir = TempDir::new().unwrap();
        let mut cube = Cube::open(&write_cube(&dir)).unwrap();
        cube.set_cache_capacity(1);

        let first = cube.load_slice(0, Axis::Inline, true).unwrap();
        cube.load_slice(1, Axis::Inline, true).unwrap();

        // Slice 0 was evicted, so the repeat read hits the backend again
        let reread = cube.load_slice(0, Axis::Inline, true).unwrap();
        assert!(!Arc::ptr_eq(&first, &reread));
        assert_eq!(*first, *reread);
    }

    #[test]
    fn test_thin_subvolume_matches_slice() {
        let dir = TempDir::new().unwrap();
        let mut cube = Cube::open(&write_cube(&dir)).unwrap();
        let [_, x_len, depth] = cube.shape();

        // 1-thick crop along inline equals the inline slice elementwise
        let sub = cube.load_subvolume(&[3..4, 0..x_len, 0..depth]).unwrap();
        let slice = cube.load_slice(3, Axis::Inline, true).unwrap();
        for x in 0..x_len {
            for h in 0..depth {
                assert_eq!(sub[[0, x, h]], slice[[x, h]]);
            }
        }
    }

    #[test]
    fn test_depth_thin_subvolume() {
        let dir = TempDir::new().unwrap();
        let mut cube = Cube::open(&write_cube(&dir)).unwrap();
        let data = test_volume();

        let sub = cube.load_subvolume(&[0..6, 0..5, 7..9]).unwrap();
        assert_eq!(sub.dim(), (6, 5, 2));
        assert_eq!(sub[[4, 3, 1]], data[[4, 3, 8]]);
    }

    #[test]
    fn test_stats_persist_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = write_cube(&dir);

        let mut cube = Cube::open(&path).unwrap();
        let min = cube.stats(false).unwrap().value_min;
        let max = cube.stats(false).unwrap().value_max;
        assert_eq!(min, 0.0);
        assert_eq!(max, 559.0);
        drop(cube);

        // Reopen: the sidecar now answers without a rescan
        let mut cube = Cube::open(&path).unwrap();
        assert!(SidecarStore::path_for(&path).exists());
        assert_eq!(cube.stats(false).unwrap().value_min, min);
    }

    #[test]
    fn test_minmax_normalization_endpoints() {
        let dir = TempDir::new().unwrap();
        let mut cube = Cube::open(&write_cube(&dir)).unwrap();

        let data = cube.to_array().unwrap();
        let scaled = cube.normalize(data, ScaleMode::MinMax).unwrap();
        let mut lo = f32::INFINITY;
        let mut hi = f32::NEG_INFINITY;
        for &v in scaled.iter() {
            lo = lo.min(v);
            hi = hi.max(v);
        }
        assert_eq!(lo, 0.0);
        assert_eq!(hi, 1.0);
    }

    #[test]
    fn test_quantile_clip_bounds() {
        let dir = TempDir::new().unwrap();
        let mut cube = Cube::open(&write_cube(&dir)).unwrap();

        let data = cube.to_array().unwrap();
        let scaled = cube.normalize(data, ScaleMode::QuantileClip).unwrap();
        for &v in scaled.iter() {
            assert!((-1.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_convert_to_dense_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut cube = Cube::open(&write_cube(&dir)).unwrap();
        cube.stats(false).unwrap();

        let container = dir.path().join("cube.vol");
        cube.convert_to_dense(&container, CompressionMethod::Zstd)
            .unwrap();

        let mut dense = Cube::open(&container).unwrap();
        assert_eq!(dense.format(), CubeFormat::Dense);
        assert_eq!(dense.shape(), cube.shape());

        let original = cube.load_slice(4, Axis::Crossline, true).unwrap();
        let converted = dense.load_slice(4, Axis::Crossline, true).unwrap();
        assert_eq!(*original, *converted);

        // Statistics moved along with the data
        assert_eq!(
            dense.stats(false).unwrap().value_min,
            cube.stats(false).unwrap().value_min
        );
    }

    #[test]
    fn test_convert_to_columnar_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut cube = Cube::open(&write_cube(&dir)).unwrap();

        let copy_path = dir.path().join("copy.sgy");
        cube.convert_to_columnar(&copy_path).unwrap();

        let mut copy = Cube::open(&copy_path).unwrap();
        assert_eq!(copy.shape(), cube.shape());
        assert_eq!(copy.ilines(), cube.ilines());
        assert_eq!(
            copy.load_trace(3, 2).unwrap(),
            cube.load_trace(3, 2).unwrap()
        );
    }

    #[test]
    fn test_display_summary() {
        let dir = TempDir::new().unwrap();
        let cube = Cube::open(&write_cube(&dir)).unwrap();
        let text = format!("{}", cube);
        assert!(text.contains("columnar"));
        assert!(text.contains("6x5x20"));
    }
}
