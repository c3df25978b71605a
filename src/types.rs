//! Core data types shared across the cube storage layer and surfaces

use crate::error::{CubeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// On-disk layout of an opened cube, resolved once at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CubeFormat {
    /// Columnar trace-oriented binary file (SEG-Y subset)
    Columnar,
    /// Multi-projection dense container directory
    Dense,
    /// Flat archive of named in-memory arrays
    Flat,
}

impl fmt::Display for CubeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CubeFormat::Columnar => "columnar",
            CubeFormat::Dense => "dense",
            CubeFormat::Flat => "flat",
        };
        write!(f, "{}", name)
    }
}

/// One of the three cube axes: two spatial line axes and depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Axis {
    /// First spatial axis (inline numbering for seismic)
    Inline = 0,
    /// Second spatial axis (crossline numbering for seismic)
    Crossline = 1,
    /// Depth/time axis
    Depth = 2,
}

impl Axis {
    /// Convert from a zero-based index
    pub fn from_index(index: usize) -> Result<Self> {
        match index {
            0 => Ok(Axis::Inline),
            1 => Ok(Axis::Crossline),
            2 => Ok(Axis::Depth),
            _ => Err(CubeError::InvalidAxis(index)),
        }
    }

    /// Convert to a zero-based index
    pub fn to_index(&self) -> usize {
        *self as usize
    }

    /// The other spatial axis; depth has no counterpart
    pub fn other_spatial(&self) -> Option<Axis> {
        match self {
            Axis::Inline => Some(Axis::Crossline),
            Axis::Crossline => Some(Axis::Inline),
            Axis::Depth => None,
        }
    }

    /// Whether this is one of the two spatial axes
    pub fn is_spatial(&self) -> bool {
        !matches!(self, Axis::Depth)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::Inline => "INLINE_3D",
            Axis::Crossline => "CROSSLINE_3D",
            Axis::Depth => "DEPTH",
        };
        write!(f, "{}", name)
    }
}

/// Value range of amplitudes in a cube
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f32,
    pub max: f32,
}

impl ValueRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }

    pub fn span(&self) -> f32 {
        self.max - self.min
    }
}

/// Normalization mode for amplitude crops cut from a cube
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    /// Scale to [0, 1] using the global value range
    MinMax,
    /// Divide by the maximum of absolute values of the 0.01/0.99 quantiles
    Quantile,
    /// Clip to the 0.01/0.99 quantiles, then divide as in `Quantile`
    QuantileClip,
}

/// Value-copied description of a cube's spatial grid.
///
/// Surfaces carry this descriptor instead of a reference to the handle:
/// one cube has many surfaces and surfaces outlive any single query, so
/// no ownership relation is wanted between the two.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    /// Extent along the two spatial axes and depth
    pub shape: [usize; 3],
    /// Smallest inline number present in the cube
    pub iline_offset: i32,
    /// Smallest crossline number present in the cube
    pub xline_offset: i32,
    /// Recording delay applied to the depth axis
    pub delay: f32,
    /// Sample interval along the depth axis
    pub sample_interval: f32,
}

impl GridGeometry {
    /// Whether a cube-local point lies inside the grid
    pub fn contains(&self, point: &[i32; 3]) -> bool {
        point.iter().zip(self.shape.iter()).all(|(&coord, &len)| {
            coord >= 0 && (coord as usize) < len
        })
    }

    /// Convert a cube-local point to line coordinates: inline and crossline
    /// numbers plus the physical depth value.
    pub fn cubic_to_lines(&self, point: [i32; 3]) -> [f32; 3] {
        [
            (point[0] + self.iline_offset) as f32,
            (point[1] + self.xline_offset) as f32,
            self.delay + point[2] as f32 * self.sample_interval,
        ]
    }

    /// Convert a line-coordinate point back to cube-local indices,
    /// rounding to the nearest grid node.
    pub fn lines_to_cubic(&self, point: [f32; 3]) -> [i32; 3] {
        [
            point[0].round() as i32 - self.iline_offset,
            point[1].round() as i32 - self.xline_offset,
            ((point[2] - self.delay) / self.sample_interval).round() as i32,
        ]
    }
}
