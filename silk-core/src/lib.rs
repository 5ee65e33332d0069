//! SiLK Core - Record-File Substrate for Network Flow Analysis
//!
//! A Rust implementation of the self-describing binary file family used by
//! the SiLK flow toolkit:
//! - Versioned container format with a chained, extensible header
//! - Block-compressed record streams (zlib, snappy)
//! - Bag (key to counter) and AggBag (composite key to composite counter)
//!   containers persisted through the same framing
//!
//! # Architecture
//!
//! Components, leaves first:
//!
//! - **IoBuf**: Block-oriented compressed byte pipeline over a descriptor
//! - **Header**: Start block plus ordered header entries with registered codecs
//! - **Stream**: Binds a path to an IoBuf and Header, dispatches record codecs
//! - **Bag / AggBag**: Analytic containers serialized through a Stream

pub mod aggbag;
pub mod bag;
pub mod cidr;
pub mod compression;
pub mod format;
pub mod header;
pub mod iobuf;
pub mod record;
pub mod stream;

mod error;
mod redblack;
mod runtime;

pub use error::{Result, SilkError};

/// SiLK core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Capture environment settings and register the built-in header entries.
///
/// Calling this is optional; every consumer initializes lazily. It is
/// idempotent.
pub fn initialize() {
    runtime::initialize();
    header::registry::initialize();
}

/// Drop the header-entry registry and the captured environment.
pub fn teardown() {
    header::registry::teardown();
    runtime::teardown();
}

/// Default configuration values
pub mod config {
    pub use crate::runtime::{runtime, RuntimeConfig};

    /// Default uncompressed block size for IO buffers (64KB)
    pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

    /// Largest block an IO buffer will produce or accept (1MB)
    pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;

    /// Default record size for IO buffers
    pub const DEFAULT_RECORD_SIZE: usize = 1;

    /// File version written by this library
    pub const FILE_VERSION: u8 = 16;

    /// Files with a lower version use the legacy header layout
    pub const EXPANDED_HEADER_VERSION: u8 = 16;

    /// Flow format written when a caller leaves the format unset
    pub const DEFAULT_FLOW_FORMAT: crate::format::FileFormat =
        crate::format::FileFormat::RWIPV6ROUTING;

    /// Largest fixed record length accepted anywhere
    pub const MAX_RECORD_SIZE: usize = 16384;

    /// Environment variable naming the default compression method
    pub const ENV_COMPRESSION_METHOD: &str = "SILK_COMPRESSION_METHOD";

    /// Environment variable controlling the ICMP port correction
    pub const ENV_ICMP_SPORT_HANDLER: &str = "SILK_ICMP_SPORT_HANDLER";

    /// Environment variable permitting overwrite of existing files
    pub const ENV_CLOBBER: &str = "SILK_CLOBBER";

    /// Environment variable suppressing the producer version in headers
    pub const ENV_HEADER_NOVERSION: &str = "SILK_HEADER_NOVERSION";
}
