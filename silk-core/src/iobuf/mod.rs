//! Block-compressed IO buffer
//!
//! An `IoBuf` moves bytes between a caller and a [`Descriptor`] in blocks.
//! For every method other than "none", each block on disk is
//!
//! ```text
//! [compressed_len: u32 BE][uncompressed_len: u32 BE][compressed payload]
//! ```
//!
//! A compressed length of zero at a block boundary marks end-of-stream, so
//! a compressed stream can be embedded in a larger envelope. Blocks always
//! hold whole records: the usable block size is the configured block size
//! rounded down to a multiple of the record size.

mod descriptor;
mod gzip;
mod reader;
mod writer;

pub use descriptor::{Descriptor, MemoryDescriptor, RawIo, ReadOnly, WriteOnly};
pub use gzip::GzipDescriptor;

use crate::compression::{BlockCodec, CompressionMethod, DEFAULT_ZLIB_LEVEL};
use crate::config::{DEFAULT_BLOCK_SIZE, DEFAULT_RECORD_SIZE, MAX_BLOCK_SIZE};
use std::io;
use thiserror::Error;

/// Size of the per-block length prefix
pub const BLOCK_HEADER_SIZE: usize = 8;

/// IO buffer error codes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IoBufError {
    #[error("Illegal compression or decompression option")]
    InvalidOption,
    #[error("Bad compression method")]
    BadCompressionMethod,
    #[error("Block size is too large")]
    BlockSize,
    #[error("Error during compression")]
    Compress,
    #[error("Compression initialization failed")]
    InitFailed,
    #[error("Out of memory")]
    Memory,
    #[error("File descriptor is not set")]
    NoDescriptor,
    #[error("Attempt to read from an IO buffer writer")]
    NoRead,
    #[error("Attempt to write to an IO buffer reader")]
    NoWrite,
    #[error("Could not read complete compressed block")]
    ShortRead,
    #[error("Could not write complete compressed block")]
    ShortWrite,
    #[error("Count is too large")]
    TooBig,
    #[error("Error during decompression")]
    Uncompress,
    #[error("Parameter set on IO buffer after buffer has been used")]
    Used,
    /// Failure reported by the descriptor, rendered with its `strerror`
    #[error("{message}")]
    Descriptor { kind: io::ErrorKind, message: String },
}

impl IoBufError {
    /// Check if the error points at damaged block data
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            IoBufError::ShortRead | IoBufError::Uncompress | IoBufError::BlockSize
        )
    }
}

/// Direction of an IO buffer or stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum IoMode {
    Read,
    Write,
    Append,
}

impl IoMode {
    /// Whether data flows from the caller to the descriptor
    pub fn is_writer(self) -> bool {
        self != IoMode::Read
    }
}

/// IO buffer tuning
#[derive(Debug, Clone, Copy)]
pub struct IoBufConfig {
    /// Uncompressed block size in bytes
    pub block_size: usize,
    /// Blocks hold a whole number of records of this size
    pub record_size: usize,
    /// zlib level used when the method is zlib
    pub zlib_level: u32,
}

impl Default for IoBufConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            record_size: DEFAULT_RECORD_SIZE,
            zlib_level: DEFAULT_ZLIB_LEVEL,
        }
    }
}

/// Per-block read behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockMode {
    /// Read and decompress the next block
    Normal,
    /// Move past the next block without decompressing it
    Skip,
    /// Decompress the block whose sizes were read by a skip
    Reread,
}

/// Block-compressed reader or writer over a [`Descriptor`]
pub struct IoBuf {
    mode: IoMode,
    desc: Option<Box<dyn Descriptor>>,
    codec: BlockCodec,
    zlib_level: u32,
    block_size: usize,
    record_size: usize,
    /// Usable bytes per block when writing
    capacity: usize,
    /// Valid bytes in the current block when reading
    block_len: usize,
    /// Compressed size of the current block on disk
    disk_block_size: usize,
    /// Descriptor offset of the current block's payload
    block_pos: u64,
    ubuf: Vec<u8>,
    cbuf: Vec<u8>,
    pos: usize,
    total: u64,
    used: bool,
    at_eof: bool,
    in_core: bool,
    is_uncompr: bool,
    no_seek: bool,
    error: Option<IoBufError>,
}

impl IoBuf {
    /// Create an unbound IO buffer with default settings
    pub fn new(mode: IoMode) -> Self {
        let mut buf = Self {
            mode,
            desc: None,
            codec: BlockCodec::none(),
            zlib_level: DEFAULT_ZLIB_LEVEL,
            block_size: DEFAULT_BLOCK_SIZE,
            record_size: DEFAULT_RECORD_SIZE,
            capacity: 0,
            block_len: 0,
            disk_block_size: 0,
            block_pos: 0,
            ubuf: Vec::new(),
            cbuf: Vec::new(),
            pos: 0,
            total: 0,
            used: false,
            at_eof: false,
            in_core: true,
            is_uncompr: false,
            no_seek: false,
            error: None,
        };
        buf.calculate_sizes();
        buf
    }

    /// Create an unbound IO buffer with explicit sizes
    pub fn with_config(mode: IoMode, config: IoBufConfig) -> Result<Self, IoBufError> {
        let mut buf = Self::new(mode);
        if config.record_size > buf.block_size {
            buf.set_block_size(config.block_size)?;
            buf.set_record_size(config.record_size)?;
        } else {
            buf.set_record_size(config.record_size)?;
            buf.set_block_size(config.block_size)?;
        }
        buf.set_zlib_level(config.zlib_level)?;
        Ok(buf)
    }

    /// Create a reader bound to `desc`
    pub fn reader(
        desc: Box<dyn Descriptor>,
        method: CompressionMethod,
    ) -> Result<Self, IoBufError> {
        let mut buf = Self::new(IoMode::Read);
        buf.bind(desc, method)?;
        Ok(buf)
    }

    /// Create a writer bound to `desc`
    pub fn writer(
        desc: Box<dyn Descriptor>,
        method: CompressionMethod,
    ) -> Result<Self, IoBufError> {
        let mut buf = Self::new(IoMode::Write);
        buf.bind(desc, method)?;
        Ok(buf)
    }

    /// Attach a descriptor and compression method.
    ///
    /// A writer that is already bound flushes its pending block to the old
    /// descriptor first. Counters and error state are reset.
    pub fn bind(
        &mut self,
        desc: Box<dyn Descriptor>,
        method: CompressionMethod,
    ) -> Result<(), IoBufError> {
        let mut codec = BlockCodec::new(method)?;
        codec.set_zlib_level(self.zlib_level)?;

        if self.desc.is_some() && self.mode.is_writer() {
            self.error = None;
            self.flush().map_err(|_| IoBufError::InitFailed)?;
        }
        if let Some(mut old) = self.desc.take() {
            if let Err(e) = old.close() {
                tracing::warn!("Closing replaced descriptor failed: {}", e);
            }
        }

        self.desc = Some(desc);
        self.codec = codec;
        self.total = 0;
        self.used = false;
        self.error = None;
        self.at_eof = false;
        self.is_uncompr = false;
        self.in_core = true;
        self.no_seek = false;
        self.calculate_sizes();
        Ok(())
    }

    /// Set the uncompressed block size; only before first use
    pub fn set_block_size(&mut self, size: usize) -> Result<(), IoBufError> {
        if self.used {
            return self.fail(IoBufError::Used);
        }
        if size > MAX_BLOCK_SIZE || size < self.record_size || size == 0 {
            return self.fail(IoBufError::BlockSize);
        }
        self.block_size = size;
        self.calculate_sizes();
        Ok(())
    }

    /// Set the record size blocks are aligned to; only before first use
    pub fn set_record_size(&mut self, size: usize) -> Result<(), IoBufError> {
        if self.used {
            return self.fail(IoBufError::Used);
        }
        if size == 0 {
            return self.fail(IoBufError::InvalidOption);
        }
        if size > self.block_size {
            return self.fail(IoBufError::BlockSize);
        }
        self.record_size = size;
        self.calculate_sizes();
        Ok(())
    }

    /// Set the zlib compression level (0-9); only before first use
    pub fn set_zlib_level(&mut self, level: u32) -> Result<(), IoBufError> {
        if self.used {
            return self.fail(IoBufError::Used);
        }
        if let Err(e) = self.codec.set_zlib_level(level) {
            return self.fail(e);
        }
        self.zlib_level = level;
        Ok(())
    }

    /// Direction of this buffer
    pub fn mode(&self) -> IoMode {
        self.mode
    }

    /// Compression method in use
    pub fn compression(&self) -> CompressionMethod {
        self.codec.method()
    }

    /// Configured block size
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Configured record size
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Bytes transferred through the descriptor so far
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Largest number of bytes a single block can occupy on disk
    pub fn upper_compressed_block_size(&self) -> usize {
        let mut total = self.codec.bound(self.capacity);
        if self.codec.has_block_header() {
            total += BLOCK_HEADER_SIZE;
        }
        total
    }

    /// Conservative projection of `total()` after a flush
    pub fn upper_bound_of_total(&mut self) -> Result<u64, IoBufError> {
        if !self.mode.is_writer() {
            return self.fail(IoBufError::NoWrite);
        }
        let mut total = self.total + self.pos as u64;
        if self.codec.has_block_header() {
            total += BLOCK_HEADER_SIZE as u64;
        }
        total += (self.codec.bound(self.capacity) - self.capacity) as u64;
        Ok(total)
    }

    /// Most recent error, if any
    pub fn last_error(&self) -> Option<&IoBufError> {
        self.error.as_ref()
    }

    /// Describe and clear the pending error.
    ///
    /// Until this is called, a failed buffer keeps returning its error.
    pub fn strerror(&mut self) -> String {
        match self.error.take() {
            Some(e) => e.to_string(),
            None => "No error".to_string(),
        }
    }

    /// Flush a writer and release the descriptor.
    ///
    /// Returns the final byte total for writers.
    pub fn close(mut self) -> Result<u64, IoBufError> {
        let total = if self.mode.is_writer() && self.desc.is_some() {
            self.flush()?
        } else {
            self.total
        };
        if let Some(mut desc) = self.desc.take() {
            if let Err(e) = desc.close() {
                return Err(IoBufError::Descriptor {
                    kind: e.kind(),
                    message: desc.strerror(&e),
                });
            }
        }
        Ok(total)
    }

    fn calculate_sizes(&mut self) {
        self.capacity = self.block_size - (self.block_size % self.record_size);
        self.ubuf = Vec::new();
        self.cbuf = Vec::new();
        if !self.mode.is_writer() {
            self.block_len = self.capacity;
            self.pos = self.capacity;
        } else {
            self.pos = 0;
        }
    }

    fn check_ready(&self) -> Result<(), IoBufError> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        if self.desc.is_none() {
            return Err(IoBufError::NoDescriptor);
        }
        Ok(())
    }

    fn fail<T>(&mut self, err: IoBufError) -> Result<T, IoBufError> {
        self.error = Some(err.clone());
        Err(err)
    }
}

/// Convert a descriptor failure using the descriptor's own wording
fn descriptor_error(desc: &dyn Descriptor, err: &io::Error) -> IoBufError {
    IoBufError::Descriptor {
        kind: err.kind(),
        message: desc.strerror(err),
    }
}

impl Drop for IoBuf {
    fn drop(&mut self) {
        if self.mode.is_writer() && self.desc.is_some() && self.error.is_none() {
            if let Err(e) = self.flush() {
                tracing::warn!("Flushing IO buffer on drop failed: {}", e);
            }
        }
        if let Some(mut desc) = self.desc.take() {
            if let Err(e) = desc.close() {
                tracing::warn!("Closing descriptor on drop failed: {}", e);
            }
        }
    }
}

/// Resize `buf` to `len`, reporting allocation failure
fn ensure_len(buf: &mut Vec<u8>, len: usize) -> Result<(), IoBufError> {
    if buf.len() < len {
        buf.try_reserve_exact(len - buf.len())
            .map_err(|_| IoBufError::Memory)?;
        buf.resize(len, 0);
    }
    Ok(())
}

/// Read until `buf` is full or the descriptor reports end of data
fn read_full(desc: &mut dyn Descriptor, buf: &mut [u8]) -> io::Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        match desc.read(&mut buf[done..]) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

/// Write all of `buf` unless the descriptor stops accepting bytes
fn write_full(desc: &mut dyn Descriptor, buf: &[u8]) -> io::Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        match desc.write(&buf[done..]) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}
