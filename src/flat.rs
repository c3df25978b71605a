//! Flat archive format: named dense arrays loaded wholesale
//!
//! Multiple named arrays share one shape inside a single bincode-serialized
//! file. Everything lives in memory after open, so no trace indexing or
//! caching is needed; this is the format of choice for derived attribute
//! volumes and small synthetic cubes.

use crate::error::{CubeError, Result};
use ndarray::{Array2, Array3, Axis as NdAxis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct FlatFile {
    shape: [usize; 3],
    ilines: Vec<i32>,
    xlines: Vec<i32>,
    delay: f32,
    sample_interval: f32,
    arrays: Vec<(String, Vec<f32>)>,
}

/// Handle over one opened flat archive
pub struct FlatCube {
    path: PathBuf,
    pub shape: [usize; 3],
    pub ilines: Vec<i32>,
    pub xlines: Vec<i32>,
    pub delay: f32,
    pub sample_interval: f32,
    names: Vec<String>,
    data: Vec<Array3<f32>>,
}

impl FlatCube {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let file: FlatFile = bincode::deserialize(&bytes)?;

        let [i_len, x_len, depth] = file.shape;
        let volume_len = i_len * x_len * depth;
        if file.arrays.is_empty() {
            return Err(CubeError::Format(format!(
                "{}: archive holds no arrays",
                path.display()
            )));
        }

        let mut names = Vec::with_capacity(file.arrays.len());
        let mut data = Vec::with_capacity(file.arrays.len());
        for (name, values) in file.arrays {
            if values.len() != volume_len {
                return Err(CubeError::InvalidDimensions(format!(
                    "array `{}` holds {} values, shape {:?} requires {}",
                    name,
                    values.len(),
                    file.shape,
                    volume_len
                )));
            }
            data.push(
                Array3::from_shape_vec((i_len, x_len, depth), values)
                    .map_err(|e| CubeError::Format(e.to_string()))?,
            );
            names.push(name);
        }

        log::debug!(
            "opened flat archive {}: shape {:?}, {} arrays",
            path.display(),
            file.shape,
            names.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            shape: file.shape,
            ilines: file.ilines,
            xlines: file.xlines,
            delay: file.delay,
            sample_interval: file.sample_interval,
            names,
            data,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of the stored arrays, in file order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The first stored array, used for all unnamed loads
    fn primary(&self) -> &Array3<f32> {
        &self.data[0]
    }

    /// Access a stored array by name
    pub fn array(&self, name: &str) -> Result<&Array3<f32>> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| &self.data[idx])
            .ok_or_else(|| CubeError::NotFound(format!("array `{}`", name)))
    }

    pub fn load_slice(&self, loc: usize, axis: usize) -> Result<Array2<f32>> {
        if axis > 2 {
            return Err(CubeError::InvalidAxis(axis));
        }
        if loc >= self.shape[axis] {
            return Err(CubeError::OutOfBounds(format!(
                "slice {} along axis {} of {}",
                loc, axis, self.shape[axis]
            )));
        }
        Ok(self.primary().index_axis(NdAxis(axis), loc).to_owned())
    }

    pub fn load_subvolume(&self, ranges: &[Range<usize>; 3]) -> Result<Array3<f32>> {
        for (axis, range) in ranges.iter().enumerate() {
            if range.end > self.shape[axis] || range.start >= range.end {
                return Err(CubeError::OutOfBounds(format!(
                    "range {}..{} along axis {} of {}",
                    range.start, range.end, axis, self.shape[axis]
                )));
            }
        }
        Ok(self
            .primary()
            .slice(ndarray::s![
                ranges[0].clone(),
                ranges[1].clone(),
                ranges[2].clone()
            ])
            .to_owned())
    }

    pub fn load_trace(&self, i: usize, x: usize) -> Result<Vec<f32>> {
        if i >= self.shape[0] || x >= self.shape[1] {
            return Err(CubeError::OutOfBounds(format!(
                "trace coordinate ({}, {}) outside {}x{}",
                i, x, self.shape[0], self.shape[1]
            )));
        }
        Ok(self
            .primary()
            .slice(ndarray::s![i, x, ..])
            .iter()
            .copied()
            .collect())
    }
}

/// Write named same-shape arrays as a flat archive
pub fn write_flat(
    path: &Path,
    arrays: &[(&str, &Array3<f32>)],
    ilines: &[i32],
    xlines: &[i32],
    delay: f32,
    sample_interval: f32,
) -> Result<()> {
    let first = arrays
        .first()
        .ok_or_else(|| CubeError::InvalidDimensions("no arrays to write".to_string()))?;
    let dims = first.1.dim();
    let shape = [dims.0, dims.1, dims.2];

    let mut stored = Vec::with_capacity(arrays.len());
    for (name, array) in arrays {
        if array.dim() != dims {
            return Err(CubeError::InvalidDimensions(format!(
                "array `{}` shape {:?} differs from {:?}",
                name,
                array.dim(),
                dims
            )));
        }
        stored.push((name.to_string(), array.iter().copied().collect::<Vec<f32>>()));
    }

    let file = FlatFile {
        shape,
        ilines: ilines.to_vec(),
        xlines: xlines.to_vec(),
        delay,
        sample_interval,
        arrays: stored,
    };
    fs::write(path, bincode::serialize(&file)?)?;
    Ok(())
}
