//! Seismic cube storage and surface handling
//!
//! The crate opens seismic amplitude cubes stored in three on-disk layouts
//! behind one handle type, collects and persists amplitude statistics, and
//! works with labeled surfaces inside a cube: loading and saving them,
//! merging fragments and extracting new surfaces from probability masks.
//!
//! # Example
//!
//! ```no_run
//! use seiscube::{Cube, Axis, ScaleMode};
//! use std::path::Path;
//!
//! # fn main() -> seiscube::Result<()> {
//! let mut cube = Cube::open(Path::new("field.sgy"))?;
//! println!("{}", cube);
//!
//! let slice = cube.load_slice(100, Axis::Inline, true)?;
//! let crop = cube.load_subvolume(&[100..101, 0..200, 0..500])?;
//! let scaled = cube.normalize(crop, ScaleMode::MinMax)?;
//! # let _ = (slice, scaled);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod charisma;
pub mod compression;
pub mod cube;
pub mod dense;
pub mod error;
pub mod extract;
pub mod flat;
pub mod merge;
pub mod segy;
pub mod sidecar;
pub mod stats;
pub mod surface;
pub mod types;
pub mod utils;

pub use cache::{SliceCache, SliceKey};
pub use compression::CompressionMethod;
pub use cube::Cube;
pub use error::{CubeError, Result};
pub use extract::{surfaces_from_mask, ExtractParams, GroupByMode};
pub use merge::{adjacent_merge, merge_list, overlap_merge, verify_merge, MergeParams, MergeStatus};
pub use stats::{StatisticsSummary, StatsConfig};
pub use surface::{Surface, FILL_VALUE};
pub use types::{Axis, CubeFormat, GridGeometry, ScaleMode, ValueRange};
