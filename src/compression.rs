//! Compression of dense-projection slice records

use crate::error::{CubeError, Result};
use serde::{Deserialize, Serialize};

/// Compression applied to each stored slice record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionMethod {
    /// No compression
    None = 0,
    /// Zstandard compression
    Zstd = 1,
}

impl Default for CompressionMethod {
    fn default() -> Self {
        CompressionMethod::Zstd
    }
}

/// Compress one slice record
pub fn compress(method: CompressionMethod, data: &[u8]) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Zstd => zstd::bulk::compress(data, 3)
            .map_err(|e| CubeError::Serialization(format!("zstd compress: {}", e))),
    }
}

/// Decompress one slice record into exactly `expected_size` bytes
pub fn decompress(method: CompressionMethod, data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let raw = match method {
        CompressionMethod::None => data.to_vec(),
        CompressionMethod::Zstd => zstd::bulk::decompress(data, expected_size)
            .map_err(|e| CubeError::Decompression(format!("zstd decompress: {}", e)))?,
    };
    if raw.len() != expected_size {
        return Err(CubeError::Decompression(format!(
            "slice record size mismatch: expected {} bytes, got {}",
            expected_size,
            raw.len()
        )));
    }
    Ok(raw)
}
