//! Per-block compressors used by the IO buffer

use super::CompressionMethod;
use crate::iobuf::IoBufError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use minilzo_rs::LZO;
use std::io::{Read, Write};

/// Default zlib compression level
pub const DEFAULT_ZLIB_LEVEL: u32 = 6;

/// Compresses and decompresses single IO buffer blocks
#[derive(Debug, Clone, Copy)]
pub struct BlockCodec {
    method: CompressionMethod,
    zlib_level: u32,
}

impl BlockCodec {
    /// Create a codec for a concrete, available method
    pub fn new(method: CompressionMethod) -> Result<Self, IoBufError> {
        if !method.is_available() {
            return Err(IoBufError::BadCompressionMethod);
        }
        Ok(Self {
            method,
            zlib_level: DEFAULT_ZLIB_LEVEL,
        })
    }

    /// Pass-through codec for method "none"
    pub fn none() -> Self {
        Self {
            method: CompressionMethod::None,
            zlib_level: DEFAULT_ZLIB_LEVEL,
        }
    }

    /// Compression method
    pub fn method(&self) -> CompressionMethod {
        self.method
    }

    /// Set the zlib level (0-9); ignored by other methods
    pub fn set_zlib_level(&mut self, level: u32) -> Result<(), IoBufError> {
        if level > 9 {
            return Err(IoBufError::InvalidOption);
        }
        self.zlib_level = level;
        Ok(())
    }

    /// Whether blocks carry the 8-byte size prefix
    pub fn has_block_header(&self) -> bool {
        self.method != CompressionMethod::None
    }

    /// Worst-case compressed size of `n` input bytes
    pub fn bound(&self, n: usize) -> usize {
        match self.method {
            CompressionMethod::Zlib => n + n / 1000 + 12,
            CompressionMethod::Lzo1x => n + n / 16 + 64 + 3,
            CompressionMethod::Snappy => 32 + n + n / 6,
            _ => n,
        }
    }

    /// Compress `src`, appending the result to `dst`
    pub fn compress(&self, src: &[u8], dst: &mut Vec<u8>) -> Result<(), IoBufError> {
        match self.method {
            CompressionMethod::None => {
                dst.extend_from_slice(src);
                Ok(())
            }
            CompressionMethod::Zlib => {
                let out = std::mem::take(dst);
                let mut encoder = ZlibEncoder::new(out, Compression::new(self.zlib_level));
                encoder.write_all(src).map_err(|_| IoBufError::Compress)?;
                *dst = encoder.finish().map_err(|_| IoBufError::Compress)?;
                Ok(())
            }
            CompressionMethod::Lzo1x => {
                let mut lzo = LZO::init().map_err(|_| IoBufError::Compress)?;
                let packed = lzo.compress(src).map_err(|_| IoBufError::Compress)?;
                dst.extend_from_slice(&packed);
                Ok(())
            }
            CompressionMethod::Snappy => {
                let start = dst.len();
                dst.resize(start + snap::raw::max_compress_len(src.len()), 0);
                let written = snap::raw::Encoder::new()
                    .compress(src, &mut dst[start..])
                    .map_err(|_| IoBufError::Compress)?;
                dst.truncate(start + written);
                Ok(())
            }
            _ => Err(IoBufError::BadCompressionMethod),
        }
    }

    /// Decompress `src` into `dst`, which is cleared first.
    ///
    /// `expected` is the uncompressed length recorded in the block header;
    /// any other result is a decompression error.
    pub fn decompress(
        &self,
        src: &[u8],
        expected: usize,
        dst: &mut Vec<u8>,
    ) -> Result<(), IoBufError> {
        dst.clear();
        match self.method {
            CompressionMethod::None => dst.extend_from_slice(src),
            CompressionMethod::Zlib => {
                // one extra byte exposes output longer than the header claims
                let mut decoder = ZlibDecoder::new(src).take(expected as u64 + 1);
                decoder
                    .read_to_end(dst)
                    .map_err(|_| IoBufError::Uncompress)?;
            }
            CompressionMethod::Lzo1x => {
                let lzo = LZO::init().map_err(|_| IoBufError::Uncompress)?;
                *dst = lzo
                    .decompress_safe(src, expected)
                    .map_err(|_| IoBufError::Uncompress)?;
            }
            CompressionMethod::Snappy => {
                let len =
                    snap::raw::decompress_len(src).map_err(|_| IoBufError::Uncompress)?;
                if len != expected {
                    return Err(IoBufError::Uncompress);
                }
                dst.resize(len, 0);
                snap::raw::Decoder::new()
                    .decompress(src, dst)
                    .map_err(|_| IoBufError::Uncompress)?;
            }
            _ => return Err(IoBufError::BadCompressionMethod),
        }
        if dst.len() != expected {
            return Err(IoBufError::Uncompress);
        }
        Ok(())
    }
}
