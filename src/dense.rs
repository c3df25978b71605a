//! Multi-projection dense container format
//!
//! A container directory stores the same cube up to three times under
//! different axis orders, one projection per axis, so that reads along any
//! axis stay fast without an adaptive load strategy. Each projection is a
//! file of per-slice compressed records with an offset index in its footer;
//! a `meta.json` descriptor holds the shape, line tables and depth scaling.

use crate::compression::{compress, decompress, CompressionMethod};
use crate::error::{CubeError, Result};
use crate::types::Axis;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

const META_FILE: &str = "meta.json";

/// Container descriptor stored as `meta.json` inside the directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseMeta {
    pub shape: [usize; 3],
    pub ilines: Vec<i32>,
    pub xlines: Vec<i32>,
    pub delay: f32,
    pub sample_interval: f32,
    #[serde(default)]
    pub compression: CompressionMethod,
}

fn projection_file_name(axis: Axis) -> &'static str {
    match axis {
        Axis::Inline => "proj_i.bin",
        Axis::Crossline => "proj_x.bin",
        Axis::Depth => "proj_h.bin",
    }
}

/// Shape of one stored record for a projection of a cube of `shape`
fn record_shape(axis: Axis, shape: [usize; 3]) -> (usize, usize) {
    let [i_len, x_len, depth] = shape;
    match axis {
        // (i, x, h) order: record is an inline slice
        Axis::Inline => (x_len, depth),
        // (x, h, i) order: record is a transposed crossline slice
        Axis::Crossline => (depth, i_len),
        // (h, i, x) order: record is a depth slice
        Axis::Depth => (i_len, x_len),
    }
}

struct ProjectionReader {
    file: File,
    /// Byte offsets of each record, plus the end offset
    offsets: Vec<u64>,
    record_shape: (usize, usize),
}

impl ProjectionReader {
    fn open(path: &Path, axis: Axis, shape: [usize; 3]) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < 8 {
            return Err(CubeError::Format(format!(
                "{}: missing projection footer",
                path.display()
            )));
        }

        file.seek(SeekFrom::End(-8))?;
        let mut buf = [0u8; 8];
        file.read_exact(&mut buf)?;
        let n_records = u64::from_le_bytes(buf) as usize;

        let expected = shape[axis.to_index()];
        if n_records != expected {
            return Err(CubeError::Format(format!(
                "{}: {} records, cube shape requires {}",
                path.display(),
                n_records,
                expected
            )));
        }

        let index_bytes = (n_records as u64 + 1) * 8;
        if file_len < 8 + index_bytes {
            return Err(CubeError::Format(format!(
                "{}: truncated offset index",
                path.display()
            )));
        }
        file.seek(SeekFrom::End(-8 - index_bytes as i64))?;
        let mut raw = vec![0u8; index_bytes as usize];
        file.read_exact(&mut raw)?;
        let offsets: Vec<u64> = raw
            .chunks_exact(8)
            .map(|chunk| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(chunk);
                u64::from_le_bytes(bytes)
            })
            .collect();

        Ok(Self {
            file,
            offsets,
            record_shape: record_shape(axis, shape),
        })
    }

    fn load_record(&mut self, index: usize, method: CompressionMethod) -> Result<Array2<f32>> {
        let start = self.offsets[index];
        let end = self.offsets[index + 1];
        self.file.seek(SeekFrom::Start(start))?;
        let mut packed = vec![0u8; (end - start) as usize];
        self.file.read_exact(&mut packed)?;

        let (rows, cols) = self.record_shape;
        let raw = decompress(method, &packed, rows * cols * 4)?;
        let values: Vec<f32> = raw
            .chunks_exact(4)
            .map(|chunk| {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(chunk);
                f32::from_le_bytes(bytes)
            })
            .collect();
        Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| CubeError::Format(format!("projection record shape: {}", e)))
    }
}

/// Handle over one opened multi-projection container
pub struct DenseCube {
    path: PathBuf,
    pub meta: DenseMeta,
    projections: [Option<ProjectionReader>; 3],
}

impl DenseCube {
    /// Open a container directory, attaching every projection present
    pub fn open(path: &Path) -> Result<Self> {
        let meta_bytes = fs::read(path.join(META_FILE)).map_err(|e| {
            CubeError::Format(format!("{}: no container descriptor: {}", path.display(), e))
        })?;
        let meta: DenseMeta = serde_json::from_slice(&meta_bytes)
            .map_err(|e| CubeError::Metadata(e.to_string()))?;

        let mut projections: [Option<ProjectionReader>; 3] = [None, None, None];
        for axis in [Axis::Inline, Axis::Crossline, Axis::Depth] {
            let file_path = path.join(projection_file_name(axis));
            if file_path.exists() {
                projections[axis.to_index()] =
                    Some(ProjectionReader::open(&file_path, axis, meta.shape)?);
            }
        }
        if projections.iter().all(Option::is_none) {
            return Err(CubeError::Format(format!(
                "{}: container holds no projections",
                path.display()
            )));
        }

        log::debug!(
            "opened dense container {}: shape {:?}, projections {}",
            path.display(),
            meta.shape,
            projections.iter().filter(|p| p.is_some()).count()
        );

        Ok(Self {
            path: path.to_path_buf(),
            meta,
            projections,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shape(&self) -> [usize; 3] {
        self.meta.shape
    }

    fn check_loc(&self, loc: usize, axis: Axis) -> Result<()> {
        let len = self.meta.shape[axis.to_index()];
        if loc >= len {
            return Err(CubeError::OutOfBounds(format!(
                "slice {} along {} of {}",
                loc, axis, len
            )));
        }
        Ok(())
    }

    /// Load one 2D slice from the projection dedicated to `axis`, falling
    /// back to a 1-thick sub-volume read when that projection is absent.
    pub fn load_slice(&mut self, loc: usize, axis: Axis) -> Result<Array2<f32>> {
        self.check_loc(loc, axis)?;
        let method = self.meta.compression;
        if let Some(reader) = self.projections[axis.to_index()].as_mut() {
            let record = reader.load_record(loc, method)?;
            // Crossline records are stored transposed
            return Ok(match axis {
                Axis::Crossline => record.t().to_owned(),
                _ => record,
            });
        }

        let [i_len, x_len, depth] = self.meta.shape;
        let ranges = match axis {
            Axis::Inline => [loc..loc + 1, 0..x_len, 0..depth],
            Axis::Crossline => [0..i_len, loc..loc + 1, 0..depth],
            Axis::Depth => [0..i_len, 0..x_len, loc..loc + 1],
        };
        let volume = self.load_subvolume(&ranges)?;
        let dims = volume.dim();
        let flat: Vec<f32> = volume.iter().copied().collect();
        let shape_2d = match axis {
            Axis::Inline => (dims.1, dims.2),
            Axis::Crossline => (dims.0, dims.2),
            Axis::Depth => (dims.0, dims.1),
        };
        Array2::from_shape_vec(shape_2d, flat)
            .map_err(|e| CubeError::Format(format!("slice reshape: {}", e)))
    }

    /// Load a 3D sub-volume through whichever available projection needs
    /// the fewest record reads.
    pub fn load_subvolume(&mut self, ranges: &[Range<usize>; 3]) -> Result<Array3<f32>> {
        let shape = self.meta.shape;
        for (axis, range) in ranges.iter().enumerate() {
            if range.end > shape[axis] || range.start >= range.end {
                return Err(CubeError::OutOfBounds(format!(
                    "range {}..{} along axis {} of {}",
                    range.start, range.end, axis, shape[axis]
                )));
            }
        }

        let best = [Axis::Inline, Axis::Crossline, Axis::Depth]
            .into_iter()
            .filter(|axis| self.projections[axis.to_index()].is_some())
            .min_by_key(|axis| ranges[axis.to_index()].len())
            .ok_or_else(|| CubeError::Format("container holds no projections".to_string()))?;

        let method = self.meta.compression;
        let dims = [ranges[0].len(), ranges[1].len(), ranges[2].len()];
        let mut volume = Array3::<f32>::zeros(dims);
        let reader = self.projections[best.to_index()]
            .as_mut()
            .ok_or_else(|| CubeError::NotFound("projection".to_string()))?;

        match best {
            Axis::Inline => {
                for (bi, i) in ranges[0].clone().enumerate() {
                    let record = reader.load_record(i, method)?;
                    for (bx, x) in ranges[1].clone().enumerate() {
                        for (bh, h) in ranges[2].clone().enumerate() {
                            volume[[bi, bx, bh]] = record[[x, h]];
                        }
                    }
                }
            }
            Axis::Crossline => {
                for (bx, x) in ranges[1].clone().enumerate() {
                    let record = reader.load_record(x, method)?;
                    for (bi, i) in ranges[0].clone().enumerate() {
                        for (bh, h) in ranges[2].clone().enumerate() {
                            volume[[bi, bx, bh]] = record[[h, i]];
                        }
                    }
                }
            }
            Axis::Depth => {
                for (bh, h) in ranges[2].clone().enumerate() {
                    let record = reader.load_record(h, method)?;
                    for (bi, i) in ranges[0].clone().enumerate() {
                        for (bx, x) in ranges[1].clone().enumerate() {
                            volume[[bi, bx, bh]] = record[[i, x]];
                        }
                    }
                }
            }
        }
        Ok(volume)
    }

    /// Load a single trace. Dense containers carry every cell, so there is
    /// no locator: absent source traces were stored as zero vectors.
    pub fn load_trace(&mut self, i: usize, x: usize) -> Result<Vec<f32>> {
        let depth = self.meta.shape[2];
        let volume = self.load_subvolume(&[i..i + 1, x..x + 1, 0..depth])?;
        Ok(volume.iter().copied().collect())
    }
}

/// Writer building a container directory projection by projection
pub struct DenseWriter {
    dir: PathBuf,
    meta: DenseMeta,
}

impl DenseWriter {
    /// Create the container directory and its descriptor
    pub fn create(dir: &Path, meta: DenseMeta) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let bytes = serde_json::to_vec_pretty(&meta)?;
        fs::write(dir.join(META_FILE), bytes)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            meta,
        })
    }

    /// Write one full projection from an iterator of slices in axis order.
    ///
    /// Expected slice shapes are the uniform API ones: `(x_len, depth)` for
    /// inline, `(i_len, depth)` for crossline (stored transposed), and
    /// `(i_len, x_len)` for depth.
    pub fn write_projection<I>(&mut self, axis: Axis, slices: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<Array2<f32>>>,
    {
        let path = self.dir.join(projection_file_name(axis));
        let mut writer = BufWriter::new(File::create(&path)?);
        let stored_shape = record_shape(axis, self.meta.shape);
        let expected = self.meta.shape[axis.to_index()];

        let mut offsets: Vec<u64> = vec![0];
        let mut cursor = 0u64;
        let mut count = 0usize;
        for slice in slices {
            let slice = slice?;
            let stored = match axis {
                Axis::Crossline => slice.t().to_owned(),
                _ => slice,
            };
            if stored.dim() != stored_shape {
                return Err(CubeError::InvalidDimensions(format!(
                    "projection record {:?} does not match {:?}",
                    stored.dim(),
                    stored_shape
                )));
            }
            let mut raw = Vec::with_capacity(stored.len() * 4);
            for &value in stored.iter() {
                raw.extend_from_slice(&value.to_le_bytes());
            }
            let packed = compress(self.meta.compression, &raw)?;
            writer.write_all(&packed)?;
            cursor += packed.len() as u64;
            offsets.push(cursor);
            count += 1;
        }

        if count != expected {
            return Err(CubeError::InvalidDimensions(format!(
                "projection along {} got {} slices, cube shape requires {}",
                axis, count, expected
            )));
        }

        for offset in &offsets {
            writer.write_all(&offset.to_le_bytes())?;
        }
        writer.write_all(&(count as u64).to_le_bytes())?;
        writer.flush()?;
        Ok(())
    }
}
