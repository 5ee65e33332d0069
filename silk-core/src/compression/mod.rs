//! Compression methods for block-compressed SiLK streams
//!
//! Every SiLK file records the method used for its data section in the
//! start block. Two pseudo-methods, `Best` and `Default`, are only
//! meaningful when writing and resolve to a concrete method before any
//! block is produced.

mod block;

pub use block::{BlockCodec, DEFAULT_ZLIB_LEVEL};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compression method identifiers as stored in the file header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionMethod {
    /// Raw blocks without framing
    None = 0,
    /// zlib (deflate)
    Zlib = 1,
    /// LZO1X
    Lzo1x = 2,
    /// Snappy raw format
    Snappy = 3,
    /// Best available method; resolved at write time
    Best = 254,
    /// Configured default method; resolved at write time
    Default = 255,
}

/// Result of checking a raw compression id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompMethodStatus {
    /// Recognized and usable for reading and writing
    Available,
    /// Recognized but not compiled into this build
    Valid,
    /// Pseudo-method that is undecided until writing
    Known,
    /// Not a compression method
    Unknown,
}

const ALL_METHODS: [CompressionMethod; 6] = [
    CompressionMethod::None,
    CompressionMethod::Zlib,
    CompressionMethod::Lzo1x,
    CompressionMethod::Snappy,
    CompressionMethod::Best,
    CompressionMethod::Default,
];

impl CompressionMethod {
    /// Raw id stored on disk
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            CompressionMethod::None => "none",
            CompressionMethod::Zlib => "zlib",
            CompressionMethod::Lzo1x => "lzo1x",
            CompressionMethod::Snappy => "snappy",
            CompressionMethod::Best => "best",
            CompressionMethod::Default => "default",
        }
    }

    /// Look up a method by name, ignoring case
    pub fn from_name(name: &str) -> Option<Self> {
        ALL_METHODS
            .iter()
            .copied()
            .find(|m| m.name().eq_ignore_ascii_case(name))
    }

    /// Methods that can be named on a command line
    pub fn all() -> &'static [CompressionMethod] {
        &ALL_METHODS
    }

    /// Whether blocks can actually be produced and consumed with this method
    pub fn is_available(self) -> bool {
        self.is_concrete()
    }

    /// Whether this is a concrete method rather than `Best` or `Default`
    pub fn is_concrete(self) -> bool {
        !matches!(self, CompressionMethod::Best | CompressionMethod::Default)
    }

    /// Classify a raw id read from a file or supplied by a caller
    pub fn check(id: u8) -> CompMethodStatus {
        match CompressionMethod::try_from(id) {
            Ok(m) if m.is_available() => CompMethodStatus::Available,
            Ok(m) if m.is_concrete() => CompMethodStatus::Valid,
            Ok(_) => CompMethodStatus::Known,
            Err(_) => CompMethodStatus::Unknown,
        }
    }

    /// Preferred available method: lzo1x, then snappy, then zlib
    pub fn best() -> Self {
        [
            CompressionMethod::Lzo1x,
            CompressionMethod::Snappy,
            CompressionMethod::Zlib,
        ]
        .into_iter()
        .find(|m| m.is_available())
        .unwrap_or(CompressionMethod::None)
    }

    /// Method chosen when a writer asks for the default
    pub fn default_method() -> Self {
        crate::config::runtime().default_compression
    }

    /// Resolve `Best`/`Default` for a writer.
    ///
    /// Destinations that cannot seek never get compression from a
    /// pseudo-method.
    pub fn resolve(self, seekable: bool) -> Self {
        match self {
            CompressionMethod::Best | CompressionMethod::Default if !seekable => {
                CompressionMethod::None
            }
            CompressionMethod::Best => Self::best(),
            CompressionMethod::Default => Self::default_method(),
            m => m,
        }
    }
}

impl TryFrom<u8> for CompressionMethod {
    type Error = crate::SilkError;

    fn try_from(value: u8) -> crate::Result<Self> {
        match value {
            0 => Ok(CompressionMethod::None),
            1 => Ok(CompressionMethod::Zlib),
            2 => Ok(CompressionMethod::Lzo1x),
            3 => Ok(CompressionMethod::Snappy),
            254 => Ok(CompressionMethod::Best),
            255 => Ok(CompressionMethod::Default),
            _ => Err(crate::SilkError::CompressionInvalid(value)),
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_ids() {
        assert_eq!(CompressionMethod::check(0), CompMethodStatus::Available);
        assert_eq!(CompressionMethod::check(1), CompMethodStatus::Available);
        assert_eq!(CompressionMethod::check(2), CompMethodStatus::Available);
        assert_eq!(CompressionMethod::check(3), CompMethodStatus::Available);
        assert_eq!(CompressionMethod::check(254), CompMethodStatus::Known);
        assert_eq!(CompressionMethod::check(255), CompMethodStatus::Known);
        assert_eq!(CompressionMethod::check(4), CompMethodStatus::Unknown);
    }

    #[test]
    fn test_names() {
        assert_eq!(
            CompressionMethod::from_name("ZLIB"),
            Some(CompressionMethod::Zlib)
        );
        assert_eq!(CompressionMethod::from_name("lzo"), None);
        assert_eq!(CompressionMethod::Snappy.to_string(), "snappy");
    }

    #[test]
    fn test_resolve() {
        assert_eq!(CompressionMethod::best(), CompressionMethod::Lzo1x);
        assert_eq!(
            CompressionMethod::Best.resolve(true),
            CompressionMethod::Lzo1x
        );
        assert_eq!(
            CompressionMethod::Best.resolve(false),
            CompressionMethod::None
        );
        assert_eq!(
            CompressionMethod::Zlib.resolve(false),
            CompressionMethod::Zlib
        );
    }
}
