//! Columnar trace-oriented binary format (SEG-Y subset)
//!
//! Each physical record carries a 240-byte big-endian header followed by one
//! amplitude trace along depth. Two header fields (inline and crossline
//! numbers) serve as the unique spatial index. A dense lookup table mapping
//! `(inline, crossline)` to the physical record number is built once at open
//! from a single header scan; depth sample count, sample interval and
//! recording delay are read once and are constant across the file.

use crate::error::{CubeError, Result};
use ndarray::{Array2, Array3};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Size of the textual file header
pub const TEXT_HEADER_LEN: u64 = 3200;
/// Size of the binary file header
pub const BINARY_HEADER_LEN: u64 = 400;
/// Offset of the first trace record
pub const DATA_OFFSET: u64 = TEXT_HEADER_LEN + BINARY_HEADER_LEN;
/// Size of each trace header
pub const TRACE_HEADER_LEN: u64 = 240;

// Byte offsets inside the binary file header
const BIN_SAMPLE_INTERVAL: usize = 16;
const BIN_SAMPLE_COUNT: usize = 20;
const BIN_FORMAT_CODE: usize = 24;

// Byte offsets inside each trace header
const TRACE_DELAY: usize = 108;
const TRACE_SAMPLE_COUNT: usize = 114;
const TRACE_INLINE: usize = 188;
const TRACE_CROSSLINE: usize = 192;

/// Sample encoding of trace amplitudes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// 4-byte IBM floating point (format code 1)
    Ibm,
    /// 4-byte IEEE big-endian floating point (format code 5)
    Ieee,
}

impl SampleFormat {
    fn from_code(code: u16) -> Result<Self> {
        match code {
            1 => Ok(SampleFormat::Ibm),
            5 => Ok(SampleFormat::Ieee),
            other => Err(CubeError::Format(format!(
                "unsupported trace sample format code: {}",
                other
            ))),
        }
    }
}

/// Convert a 4-byte IBM hexadecimal float to IEEE f32
pub fn ibm_to_f32(bits: u32) -> f32 {
    if bits & 0x7fff_ffff == 0 {
        return 0.0;
    }
    let sign = if bits >> 31 == 1 { -1.0f64 } else { 1.0 };
    let exponent = ((bits >> 24) & 0x7f) as i32 - 64;
    let mantissa = (bits & 0x00ff_ffff) as f64 / (1u32 << 24) as f64;
    (sign * mantissa * 16f64.powi(exponent)) as f32
}

fn read_u16_be(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn read_i16_be(buf: &[u8], offset: usize) -> i16 {
    i16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn read_i32_be(buf: &[u8], offset: usize) -> i32 {
    i32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Handle over one opened columnar cube
#[derive(Debug)]
pub struct ColumnarCube {
    path: PathBuf,
    file: File,
    sample_format: SampleFormat,
    /// Depth sample count, constant across the file
    pub depth: usize,
    /// Sample interval along depth, in milliseconds
    pub sample_interval: f32,
    /// Recording delay from the first trace header
    pub delay: f32,
    /// Sorted unique inline numbers
    pub ilines: Vec<i32>,
    /// Sorted unique crossline numbers
    pub xlines: Vec<i32>,
    /// Dense map from (inline index, crossline index) to record number,
    /// -1 where the file has no trace
    pub locator: Array2<i64>,
    n_traces: usize,
}

impl ColumnarCube {
    /// Open a columnar cube and build the trace locator from a single
    /// header pass.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < DATA_OFFSET {
            return Err(CubeError::Format(format!(
                "{}: shorter than the {} byte file header",
                path.display(),
                DATA_OFFSET
            )));
        }

        let mut binary_header = [0u8; BINARY_HEADER_LEN as usize];
        file.seek(SeekFrom::Start(TEXT_HEADER_LEN))?;
        file.read_exact(&mut binary_header)?;

        let dt_micros = read_u16_be(&binary_header, BIN_SAMPLE_INTERVAL);
        let depth = read_u16_be(&binary_header, BIN_SAMPLE_COUNT) as usize;
        let sample_format = SampleFormat::from_code(read_u16_be(&binary_header, BIN_FORMAT_CODE))?;
        if depth == 0 {
            return Err(CubeError::Format("zero samples per trace".to_string()));
        }

        let trace_stride = TRACE_HEADER_LEN + (depth * 4) as u64;
        let payload = file_len - DATA_OFFSET;
        if payload % trace_stride != 0 {
            return Err(CubeError::Format(format!(
                "{}: trace records are not a whole multiple of {} bytes",
                path.display(),
                trace_stride
            )));
        }
        let n_traces = (payload / trace_stride) as usize;
        if n_traces == 0 {
            return Err(CubeError::Format("file holds no traces".to_string()));
        }

        // Single pass over trace headers: spatial index and delay
        let mut header = [0u8; TRACE_HEADER_LEN as usize];
        let mut keys = Vec::with_capacity(n_traces);
        let mut delay = 0.0f32;
        for record in 0..n_traces {
            file.seek(SeekFrom::Start(DATA_OFFSET + record as u64 * trace_stride))?;
            file.read_exact(&mut header)?;
            if record == 0 {
                delay = read_i16_be(&header, TRACE_DELAY) as f32;
                let trace_samples = read_u16_be(&header, TRACE_SAMPLE_COUNT) as usize;
                if trace_samples != 0 && trace_samples != depth {
                    return Err(CubeError::Format(format!(
                        "trace sample count {} disagrees with file header {}",
                        trace_samples, depth
                    )));
                }
            }
            keys.push((
                read_i32_be(&header, TRACE_INLINE),
                read_i32_be(&header, TRACE_CROSSLINE),
            ));
        }

        let mut ilines: Vec<i32> = keys.iter().map(|k| k.0).collect();
        ilines.sort_unstable();
        ilines.dedup();
        let mut xlines: Vec<i32> = keys.iter().map(|k| k.1).collect();
        xlines.sort_unstable();
        xlines.dedup();

        let mut locator = Array2::<i64>::from_elem((ilines.len(), xlines.len()), -1);
        for (record, (il, xl)) in keys.iter().enumerate() {
            // Unwraps cannot fail: every key contributed to the line tables
            let i = ilines.binary_search(il).unwrap_or(0);
            let x = xlines.binary_search(xl).unwrap_or(0);
            locator[[i, x]] = record as i64;
        }

        log::debug!(
            "opened columnar cube {}: {} traces, {}x{}x{}",
            path.display(),
            n_traces,
            ilines.len(),
            xlines.len(),
            depth
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            sample_format,
            depth,
            sample_interval: dt_micros as f32 / 1000.0,
            delay,
            ilines,
            xlines,
            locator,
            n_traces,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Spatial shape plus depth
    pub fn shape(&self) -> [usize; 3] {
        [self.ilines.len(), self.xlines.len(), self.depth]
    }

    /// Number of physical records in the file
    pub fn n_traces(&self) -> usize {
        self.n_traces
    }

    fn trace_stride(&self) -> u64 {
        TRACE_HEADER_LEN + (self.depth * 4) as u64
    }

    fn decode(&self, raw: &[u8], out: &mut [f32]) {
        for (value, chunk) in out.iter_mut().zip(raw.chunks_exact(4)) {
            let bits = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            *value = match self.sample_format {
                SampleFormat::Ieee => f32::from_bits(bits),
                SampleFormat::Ibm => ibm_to_f32(bits),
            };
        }
    }

    /// Load one trace by physical record number
    pub fn load_record(&mut self, record: usize) -> Result<Vec<f32>> {
        if record >= self.n_traces {
            return Err(CubeError::OutOfBounds(format!(
                "record {} of {}",
                record, self.n_traces
            )));
        }
        let offset = DATA_OFFSET + record as u64 * self.trace_stride() + TRACE_HEADER_LEN;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut raw = vec![0u8; self.depth * 4];
        self.file.read_exact(&mut raw)?;
        let mut trace = vec![0.0f32; self.depth];
        self.decode(&raw, &mut trace);
        Ok(trace)
    }

    /// Load the trace at a spatial coordinate. A coordinate with no stored
    /// trace yields an all-zero vector: header gaps are routine, not errors.
    pub fn load_trace(&mut self, i: usize, x: usize) -> Result<Vec<f32>> {
        if i >= self.ilines.len() || x >= self.xlines.len() {
            return Err(CubeError::OutOfBounds(format!(
                "trace coordinate ({}, {}) outside {}x{}",
                i,
                x,
                self.ilines.len(),
                self.xlines.len()
            )));
        }
        match self.locator[[i, x]] {
            -1 => Ok(vec![0.0f32; self.depth]),
            record => self.load_record(record as usize),
        }
    }

    /// Load one 2D slice.
    ///
    /// For the spatial axes the result has shape `(other_len, depth)`;
    /// for the depth axis, `(ilines_len, xlines_len)`. With `stable`, the
    /// traces are fetched in physical record order to keep reads
    /// sequential; the returned rows are line-indexed either way.
    pub fn load_slice(&mut self, loc: usize, axis: usize, stable: bool) -> Result<Array2<f32>> {
        let [i_len, x_len, depth] = self.shape();
        match axis {
            0 | 1 => {
                let (this_len, other_len) = if axis == 0 { (i_len, x_len) } else { (x_len, i_len) };
                if loc >= this_len {
                    return Err(CubeError::OutOfBounds(format!(
                        "slice {} along axis {} of {}",
                        loc, axis, this_len
                    )));
                }

                let mut wanted: Vec<(i64, usize)> = (0..other_len)
                    .filter_map(|other| {
                        let key = if axis == 0 { [loc, other] } else { [other, loc] };
                        match self.locator[[key[0], key[1]]] {
                            -1 => None,
                            record => Some((record, other)),
                        }
                    })
                    .collect();
                if stable {
                    wanted.sort_unstable_by_key(|&(record, _)| record);
                }

                let mut slice = Array2::<f32>::zeros((other_len, depth));
                for (record, row) in wanted {
                    let trace = self.load_record(record as usize)?;
                    for (dst, &src) in slice.row_mut(row).iter_mut().zip(&trace) {
                        *dst = src;
                    }
                }
                Ok(slice)
            }
            2 => {
                if loc >= depth {
                    return Err(CubeError::OutOfBounds(format!(
                        "depth slice {} of {}",
                        loc, depth
                    )));
                }
                let mut slice = Array2::<f32>::zeros((i_len, x_len));
                let stride = self.trace_stride();
                let mut raw = [0u8; 4];
                for i in 0..i_len {
                    for x in 0..x_len {
                        let record = self.locator[[i, x]];
                        if record < 0 {
                            continue;
                        }
                        let offset = DATA_OFFSET
                            + record as u64 * stride
                            + TRACE_HEADER_LEN
                            + (loc * 4) as u64;
                        self.file.seek(SeekFrom::Start(offset))?;
                        self.file.read_exact(&mut raw)?;
                        let bits = u32::from_be_bytes(raw);
                        slice[[i, x]] = match self.sample_format {
                            SampleFormat::Ieee => f32::from_bits(bits),
                            SampleFormat::Ibm => ibm_to_f32(bits),
                        };
                    }
                }
                Ok(slice)
            }
            other => Err(CubeError::InvalidAxis(other)),
        }
    }

    /// Direct sub-volume read: one trace seek per spatial cell, cropped
    /// along depth.
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

        let dims = [
            ranges[0].len(),
            ranges[1].len(),
            ranges[2].len(),
        ];
        let mut volume = Array3::<f32>::zeros(dims);
        for (bi, i) in ranges[0].clone().enumerate() {
            for (bx, x) in ranges[1].clone().enumerate() {
                let trace = self.load_trace(i, x)?;
                for (bh, h) in ranges[2].clone().enumerate() {
                    volume[[bi, bx, bh]] = trace[h];
                }
            }
        }
        Ok(volume)
    }
}

/// Specification for writing a columnar cube
#[derive(Debug, Clone)]
pub struct ColumnarSpec {
    pub ilines: Vec<i32>,
    pub xlines: Vec<i32>,
    /// Sample interval in milliseconds
    pub sample_interval: f32,
    pub delay: i16,
}

/// Write a dense 3D volume as a columnar file in inline-major trace order,
/// IEEE sample encoding. Used by format conversion and fixtures.
pub fn write_columnar(path: &Path, data: &Array3<f32>, spec: &ColumnarSpec) -> Result<()> {
    let (i_len, x_len, depth) = data.dim();
    if spec.ilines.len() != i_len || spec.xlines.len() != x_len {
        return Err(CubeError::InvalidDimensions(format!(
            "line tables {}x{} do not match volume {}x{}",
            spec.ilines.len(),
            spec.xlines.len(),
            i_len,
            x_len
        )));
    }
    if depth > u16::MAX as usize {
        return Err(CubeError::InvalidDimensions(format!(
            "depth {} exceeds the format limit",
            depth
        )));
    }

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&[0u8; TEXT_HEADER_LEN as usize])?;

    let mut binary_header = [0u8; BINARY_HEADER_LEN as usize];
    let dt_micros = (spec.sample_interval * 1000.0).round() as u16;
    binary_header[BIN_SAMPLE_INTERVAL..BIN_SAMPLE_INTERVAL + 2]
        .copy_from_slice(&dt_micros.to_be_bytes());
    binary_header[BIN_SAMPLE_COUNT..BIN_SAMPLE_COUNT + 2]
        .copy_from_slice(&(depth as u16).to_be_bytes());
    binary_header[BIN_FORMAT_CODE..BIN_FORMAT_CODE + 2].copy_from_slice(&5u16.to_be_bytes());
    writer.write_all(&binary_header)?;

    let mut header = [0u8; TRACE_HEADER_LEN as usize];
    for (i, &il) in spec.ilines.iter().enumerate() {
        for (x, &xl) in spec.xlines.iter().enumerate() {
            header[TRACE_DELAY..TRACE_DELAY + 2].copy_from_slice(&spec.delay.to_be_bytes());
            header[TRACE_SAMPLE_COUNT..TRACE_SAMPLE_COUNT + 2]
                .copy_from_slice(&(depth as u16).to_be_bytes());
            header[TRACE_INLINE..TRACE_INLINE + 4].copy_from_slice(&il.to_be_bytes());
            header[TRACE_CROSSLINE..TRACE_CROSSLINE + 4].copy_from_slice(&xl.to_be_bytes());
            writer.write_all(&header)?;

            for h in 0..depth {
                writer.write_all(&data[[i, x, h]].to_bits().to_be_bytes())?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_volume() -> Array3<f32> {
        let mut data = Array3::<f32>::zeros((4, 3, 8));
        for i in 0..4 {
            for x in 0..3 {
                for h in 0..8 {
                    data[[i, x, h]] = (i * 100 + x * 10 + h) as f32;
                }
            }
        }
        data
    }

    fn test_spec() -> ColumnarSpec {
        ColumnarSpec {
            ilines: vec![100, 101, 102, 103],
            xlines: vec![500, 502, 504],
            sample_interval: 2.0,
            delay: 50,
        }
    }

    #[test]
    fn test_ibm_to_f32() {
        assert_eq!(ibm_to_f32(0), 0.0);
        // -118.625 in IBM hexadecimal float
        assert!((ibm_to_f32(0xC276_A000) + 118.625).abs() < 1e-4);
        assert!((ibm_to_f32(0x4276_A000) - 118.625).abs() < 1e-4);
    }

    #[test]
    fn test_write_then_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cube.sgy");
        write_columnar(&path, &test_volume(), &test_spec()).unwrap();

        let cube = ColumnarCube::open(&path).unwrap();
        assert_eq!(cube.shape(), [4, 3, 8]);
        assert_eq!(cube.ilines, vec![100, 101, 102, 103]);
        assert_eq!(cube.xlines, vec![500, 502, 504]);
        assert_eq!(cube.sample_interval, 2.0);
        assert_eq!(cube.delay, 50.0);
        assert_eq!(cube.n_traces(), 12);
    }

    #[test]
    fn test_load_trace_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cube.sgy");
        let data = test_volume();
        write_columnar(&path, &data, &test_spec()).unwrap();

        let mut cube = ColumnarCube::open(&path).unwrap();
        let trace = cube.load_trace(2, 1).unwrap();
        for h in 0..8 {
            assert_eq!(trace[h], data[[2, 1, h]]);
        }
    }

    #[test]
    fn test_load_slice_axes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cube.sgy");
        let data = test_volume();
        write_columnar(&path, &data, &test_spec()).unwrap();

        let mut cube = ColumnarCube::open(&path).unwrap();

        let inline = cube.load_slice(1, 0, false).unwrap();
        assert_eq!(inline.dim(), (3, 8));
        assert_eq!(inline[[2, 5]], data[[1, 2, 5]]);

        let crossline = cube.load_slice(2, 1, true).unwrap();
        assert_eq!(crossline.dim(), (4, 8));
        assert_eq!(crossline[[3, 7]], data[[3, 2, 7]]);

        let depth = cube.load_slice(4, 2, false).unwrap();
        assert_eq!(depth.dim(), (4, 3));
        assert_eq!(depth[[0, 0]], data[[0, 0, 4]]);
    }

    #[test]
    fn test_subvolume_matches_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cube.sgy");
        let data = test_volume();
        write_columnar(&path, &data, &test_spec()).unwrap();

        let mut cube = ColumnarCube::open(&path).unwrap();
        let sub = cube.load_subvolume(&[1..3, 0..2, 2..6]).unwrap();
        assert_eq!(sub.dim(), (2, 2, 4));
        assert_eq!(sub[[1, 1, 3]], data[[2, 1, 5]]);
    }

    #[test]
    fn test_absent_trace_is_zero_vector() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gap.sgy");
        let data = Array3::<f32>::from_elem((2, 2, 8), 1.5);
        let spec = ColumnarSpec {
            ilines: vec![10, 11],
            xlines: vec![20, 21],
            sample_interval: 2.0,
            delay: 0,
        };
        write_columnar(&path, &data, &spec).unwrap();

        // Drop the last record to create a header gap at (1, 1)
        let stride = (TRACE_HEADER_LEN + 8 * 4) as usize;
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - stride);
        std::fs::write(&path, bytes).unwrap();

        let mut cube = ColumnarCube::open(&path).unwrap();
        assert_eq!(cube.load_trace(0, 0).unwrap(), vec![1.5f32; 8]);
        assert_eq!(cube.load_trace(1, 1).unwrap(), vec![0.0f32; 8]);
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.sgy");
        std::fs::write(&path, [0u8; 100]).unwrap();
        assert!(matches!(
            ColumnarCube::open(&path),
            Err(CubeError::Format(_))
        ));
    }
}
