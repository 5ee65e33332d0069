//! Error types for the SiLK record-file substrate

use crate::iobuf::IoBufError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for SiLK operations
pub type Result<T> = std::result::Result<T, SilkError>;

/// SiLK error types
#[derive(Error, Debug)]
pub enum SilkError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Block-compressed buffer failure
    #[error("IO buffer error: {0}")]
    IoBuf(#[from] IoBufError),

    // Argument errors
    /// Caller passed a value the operation cannot use
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Key does not fit the bag's key width and conversion is disabled
    #[error("Key out of range for bag and auto-conversion disabled")]
    KeyRange,

    /// Field id exists but belongs to the other field class
    #[error("Field {0} is not of the requested class")]
    FieldClass(u16),

    /// AggBag key layout has not been defined
    #[error("Key fields have not been set")]
    UndefinedKey,

    /// AggBag counter layout has not been defined
    #[error("Counter fields have not been set")]
    UndefinedCounter,

    /// Two aggregates or bags use different key layouts
    #[error("Key fields differ between objects")]
    FieldsDifferKey,

    /// Two aggregates or bags use different counter layouts
    #[error("Counter fields differ between objects")]
    FieldsDifferCounter,

    /// Typed accessor does not match the field's semantic type
    #[error("Accessor type does not match field {0}")]
    AccessorMismatch(String),

    /// Field position is outside the layout
    #[error("Field index {0} is out of range")]
    BadIndex(usize),

    // I/O and format errors
    /// Fewer bytes were available than required
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// The destination accepted fewer bytes than were written
    #[error("Short write")]
    ShortWrite,

    /// Magic number does not identify a SiLK file
    #[error("Bad magic number 0x{0:08x}; not a SiLK file")]
    BadMagic(u32),

    /// Compression method id is not recognized
    #[error("Compression method {0} is not valid")]
    CompressionInvalid(u8),

    /// Compression method is known but not available in this build
    #[error("Compression method {0} is not available")]
    CompressionUnavailable(u8),

    /// File version or record version outside the supported range
    #[error("Unsupported version {version} for file format 0x{format:02x}")]
    UnsupportedVersion { format: u8, version: u16 },

    /// File format is not supported by the operation
    #[error("Unsupported file format 0x{0:02x}")]
    UnsupportedFormat(u8),

    /// File format has not been set before writing
    #[error("File format is not set")]
    FormatUnset,

    /// Refused to overwrite an existing file
    #[error("File exists: {0}")]
    FileExists(PathBuf),

    /// Binary data would be read from or written to a terminal
    #[error("Will not read or write binary data on a terminal")]
    IsTerminal,

    /// Mode is not valid for the bound path or content
    #[error("Unsupported IO mode: {0}")]
    UnsupportedIoMode(String),

    /// Operation does not apply to the stream's content type
    #[error("Operation not supported for this content type")]
    UnsupportedContent,

    /// Operation requires a stream of SiLK flow records
    #[error("Stream does not contain SiLK flow records")]
    RequireSilkFlow,

    /// File format cannot hold IPv6 records
    #[error("File format does not support IPv6 records")]
    UnsupportedIpv6,

    // Encoding errors
    /// A header entry could not be decoded
    #[error("Cannot unpack header entry {id}: {reason}")]
    EntryUnpack { id: u32, reason: String },

    /// Header entry id or length is malformed
    #[error("Header entry has invalid length {0}")]
    EntryLength(u32),

    /// Record length disagrees with the format's definition
    #[error("Record length mismatch: expected {expected}, found {actual}")]
    RecordLength { expected: usize, actual: usize },

    /// Container metadata in the file header is missing or inconsistent
    #[error("Invalid header: {0}")]
    Header(String),

    /// Invalid header entry id
    #[error("Header entry id {0} is not valid")]
    InvalidEntryId(u32),

    // State errors
    /// AggBag fields cannot change after records were added
    #[error("Fields are fixed once records exist")]
    FixedFields,

    /// Header lock forbids the change
    #[error("Header is locked")]
    HeaderLocked,

    /// Stream was closed
    #[error("Stream is closed")]
    Closed,

    /// Stream has not been opened
    #[error("Stream is not open")]
    NotOpen,

    /// Stream was already opened
    #[error("Stream is already open")]
    PrevOpen,

    /// Stream was already bound to a path
    #[error("Stream is already bound")]
    PrevBound,

    /// Stream has not been bound to a path
    #[error("Stream is not bound")]
    NotBound,

    /// Data already passed through the stream
    #[error("Cannot change setting after data was processed")]
    PrevData,

    /// End of file
    #[error("End of file")]
    Eof,

    /// Text line does not fit the caller's buffer
    #[error("Input line too long")]
    LongLine,

    // Numeric errors
    /// Subtraction would take a counter below zero
    #[error("Counter underflow")]
    Underflow,
}

impl SilkError {
    /// Check if error is end-of-file
    pub fn is_eof(&self) -> bool {
        matches!(self, SilkError::Eof)
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, SilkError::Io(_) | SilkError::LongLine)
    }

    /// Check if error indicates damaged or foreign data
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            SilkError::BadMagic(_)
                | SilkError::ShortRead { .. }
                | SilkError::EntryUnpack { .. }
                | SilkError::EntryLength(_)
                | SilkError::RecordLength { .. }
                | SilkError::Header(_)
        ) || matches!(self, SilkError::IoBuf(e) if e.is_corruption())
    }
}
