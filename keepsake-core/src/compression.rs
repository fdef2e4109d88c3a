/*!
Compression adapters for save bodies.

The default implementation uses gzip. Compressors also expose a chunked
stream so large bodies can be compressed while they are written to disk
without holding a second full copy in memory.
*/

use crate::{KeepsakeError, Result};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

/// Byte-level compression abstraction
///
/// Implementations are shared between concurrent operations and must be
/// stateless or internally synchronized.
pub trait Compressor: Send + Sync {
    /// Algorithm name recorded in the save header (e.g. "gzip")
    fn name(&self) -> &str;

    /// Compress a whole buffer
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress a whole buffer
    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>>;

    /// Start a chunked compression stream producing the same format as `compress`
    fn begin_stream(&self) -> Box<dyn CompressStream>;
}

/// Incremental compressor; output is handed back as it becomes available.
pub trait CompressStream: Send {
    /// Feed one chunk, returning any compressed bytes produced so far
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>>;

    /// Flush the remaining compressed bytes and trailer
    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}

/// Gzip compression adapter
///
/// # Example
/// ```rust
/// use keepsake_core::{Compressor, GzipCompressor};
///
/// let compressor = GzipCompressor::new();
/// let data = b"some save data to compress";
/// let compressed = compressor.compress(data)?;
/// let decompressed = compressor.decompress(&compressed)?;
/// assert_eq!(data, &decompressed[..]);
/// # Ok::<(), keepsake_core::KeepsakeError>(())
/// ```
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    compression_level: Compression,
}

impl GzipCompressor {
    /// Create a new gzip compressor with default compression level (6)
    pub fn new() -> Self {
        Self {
            compression_level: Compression::default(),
        }
    }

    /// Create a new gzip compressor with the specified compression level (0-9)
    pub fn with_level(level: u32) -> Self {
        Self {
            compression_level: Compression::new(level),
        }
    }

    /// Create a compressor for fast compression (level 1)
    pub fn fast() -> Self {
        Self::with_level(1)
    }

    /// Create a compressor for maximum compression (level 9)
    pub fn max() -> Self {
        Self::with_level(9)
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for GzipCompressor {
    fn name(&self) -> &str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), self.compression_level);

        encoder.write_all(data).map_err(|e| {
            KeepsakeError::compression(format!("Failed to write data for compression: {e}"))
        })?;

        encoder
            .finish()
            .map_err(|e| KeepsakeError::compression(format!("Failed to finish compression: {e}")))
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(compressed_data);
        let mut decompressed = Vec::new();

        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| KeepsakeError::compression(format!("Failed to decompress data: {e}")))?;

        Ok(decompressed)
    }

    fn begin_stream(&self) -> Box<dyn CompressStream> {
        Box::new(GzipStream {
            encoder: GzEncoder::new(Vec::new(), self.compression_level),
        })
    }
}

struct GzipStream {
    encoder: GzEncoder<Vec<u8>>,
}

impl CompressStream for GzipStream {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        self.encoder.write_all(chunk).map_err(|e| {
            KeepsakeError::compression(format!("Failed to write data for compression: {e}"))
        })?;
        Ok(std::mem::take(self.encoder.get_mut()))
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        self.encoder
            .finish()
            .map_err(|e| KeepsakeError::compression(format!("Failed to finish compression: {e}")))
    }
}

/// Identity compressor, for tests or bodies that are already compressed
#[derive(Debug, Clone, Default)]
pub struct NoCompression;

impl NoCompression {
    pub fn new() -> Self {
        Self
    }
}

impl Compressor for NoCompression {
    fn name(&self) -> &str {
        "none"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        Ok(compressed_data.to_vec())
    }

    fn begin_stream(&self) -> Box<dyn CompressStream> {
        Box::new(PassThrough)
    }
}

struct PassThrough;

impl CompressStream for PassThrough {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        Ok(chunk.to_vec())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}
