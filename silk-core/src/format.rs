//! SiLK file format identifiers and per-format record metadata
//!
//! The format id in the start block names what the data section holds. Flow
//! formats also fix a record length per record version; the tables here are
//! what the legacy header reader and the stream use to validate files.

use serde::Serialize;
use std::fmt;

/// File format id stored in the start block.
///
/// Ids outside the known table are preserved so foreign files can still
/// have their headers inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FileFormat(pub u8);

const FORMAT_NAMES: [&str; 0x26] = [
    "FT_TCPDUMP",
    "FT_GRAPH",
    "FT_ADDRESSES",
    "FT_PORTMAP",
    "FT_SERVICEMAP",
    "FT_NIDSMAP",
    "FT_EXPERIMENT1",
    "FT_EXPERIMENT2",
    "FT_TEMPFILE",
    "FT_AGGREGATEBAG",
    "FT_IPFIX",
    "FT_RWIPV6",
    "FT_RWIPV6ROUTING",
    "FT_RWAUGSNMPOUT",
    "FT_RWAUGROUTING",
    "FT_RESERVED_0F",
    "FT_RWROUTED",
    "FT_RWNOTROUTED",
    "FT_RWSPLIT",
    "FT_RWFILTER",
    "FT_RWAUGMENTED",
    "FT_RWAUGWEB",
    "FT_RWGENERIC",
    "FT_RESERVED_17",
    "FT_RWDAILY",
    "FT_RWSCAN",
    "FT_RWACL",
    "FT_RWCOUNT",
    "FT_FLOWCAP",
    "FT_IPSET",
    "FT_TAGTREE",
    "FT_RWWWW",
    "FT_SHUFFLE",
    "FT_RWBAG",
    "FT_BLOOM",
    "FT_RWPRINTSTATS",
    "FT_PDUFLOWCAP",
    "FT_PREFIXMAP",
];

impl FileFormat {
    pub const AGGREGATEBAG: FileFormat = FileFormat(0x09);
    pub const RWIPV6: FileFormat = FileFormat(0x0B);
    pub const RWIPV6ROUTING: FileFormat = FileFormat(0x0C);
    pub const RWAUGSNMPOUT: FileFormat = FileFormat(0x0D);
    pub const RWAUGROUTING: FileFormat = FileFormat(0x0E);
    pub const RWROUTED: FileFormat = FileFormat(0x10);
    pub const RWNOTROUTED: FileFormat = FileFormat(0x11);
    pub const RWSPLIT: FileFormat = FileFormat(0x12);
    pub const RWFILTER: FileFormat = FileFormat(0x13);
    pub const RWAUGMENTED: FileFormat = FileFormat(0x14);
    pub const RWAUGWEB: FileFormat = FileFormat(0x15);
    pub const RWGENERIC: FileFormat = FileFormat(0x16);
    pub const FLOWCAP: FileFormat = FileFormat(0x1C);
    pub const IPSET: FileFormat = FileFormat(0x1D);
    pub const RWWWW: FileFormat = FileFormat(0x1F);
    pub const SHUFFLE: FileFormat = FileFormat(0x20);
    pub const RWBAG: FileFormat = FileFormat(0x21);
    pub const PREFIXMAP: FileFormat = FileFormat(0x25);
    /// Format not yet chosen
    pub const UNSET: FileFormat = FileFormat(0xFF);

    /// Raw id
    pub fn id(self) -> u8 {
        self.0
    }

    /// Symbolic name, if the id is known
    pub fn name(self) -> Option<&'static str> {
        FORMAT_NAMES.get(self.0 as usize).copied()
    }

    /// Find a format by its symbolic name
    pub fn from_name(name: &str) -> Option<Self> {
        FORMAT_NAMES
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .map(|i| FileFormat(i as u8))
    }

    /// Whether the id names a known format
    pub fn is_known(self) -> bool {
        self.name().is_some()
    }

    /// Whether the data section holds flow records
    pub fn is_flow(self) -> bool {
        self.flow_info().is_some()
    }

    /// Whether flow records of this format can carry IPv6 addresses
    pub fn supports_ipv6(self) -> bool {
        matches!(self, FileFormat::RWIPV6 | FileFormat::RWIPV6ROUTING)
    }

    /// Record lengths by record version for flow formats
    pub fn flow_info(self) -> Option<&'static FlowFormatInfo> {
        FLOW_FORMATS.iter().find(|f| f.format == self)
    }

    /// Record length for `version`, if the format defines one
    pub fn record_length(self, version: u16) -> Option<usize> {
        match self {
            FileFormat::RWBAG => Some(if version == 1 { 8 } else { 12 }),
            _ => self.flow_info().and_then(|f| f.length_for(version)),
        }
    }

    /// Legacy header behavior for files older than the expanded header
    pub fn legacy(self) -> Option<&'static LegacyFormat> {
        LEGACY_FORMATS.iter().find(|l| l.format == self)
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:02x}", self.0),
        }
    }
}

/// Record lengths a flow format uses, per record version
#[derive(Debug)]
pub struct FlowFormatInfo {
    pub format: FileFormat,
    /// `(first_version, last_version, record_length)` ranges
    pub lengths: &'static [(u16, u16, usize)],
}

impl FlowFormatInfo {
    /// Length of one record written with `version`
    pub fn length_for(&self, version: u16) -> Option<usize> {
        self.lengths
            .iter()
            .find(|(lo, hi, _)| (*lo..=*hi).contains(&version))
            .map(|(_, _, len)| *len)
    }

    /// Highest record version the format defines
    pub fn max_version(&self) -> u16 {
        self.lengths.iter().map(|(_, hi, _)| *hi).max().unwrap_or(0)
    }
}

static FLOW_FORMATS: &[FlowFormatInfo] = &[
    FlowFormatInfo {
        format: FileFormat::RWAUGROUTING,
        lengths: &[(1, 4, 36), (5, 5, 40)],
    },
    FlowFormatInfo {
        format: FileFormat::RWAUGWEB,
        lengths: &[(1, 4, 26), (5, 5, 30)],
    },
    FlowFormatInfo {
        format: FileFormat::RWFILTER,
        lengths: &[(1, 2, 32), (3, 3, 40), (4, 5, 44)],
    },
    FlowFormatInfo {
        format: FileFormat::RWGENERIC,
        lengths: &[(0, 0, 40), (1, 1, 37), (2, 2, 48), (3, 4, 56), (5, 5, 52)],
    },
    FlowFormatInfo {
        format: FileFormat::RWIPV6,
        lengths: &[(1, 1, 68), (2, 2, 56)],
    },
    FlowFormatInfo {
        format: FileFormat::RWIPV6ROUTING,
        lengths: &[(1, 2, 88), (3, 3, 100)],
    },
    FlowFormatInfo {
        format: FileFormat::RWNOTROUTED,
        lengths: &[(1, 2, 23), (3, 5, 26)],
    },
    FlowFormatInfo {
        format: FileFormat::RWROUTED,
        lengths: &[(1, 2, 28), (3, 5, 32)],
    },
    FlowFormatInfo {
        format: FileFormat::RWSPLIT,
        lengths: &[(1, 2, 22), (3, 5, 24)],
    },
    FlowFormatInfo {
        format: FileFormat::RWWWW,
        lengths: &[(1, 2, 20), (3, 5, 22)],
    },
    FlowFormatInfo {
        format: FileFormat::FLOWCAP,
        lengths: &[(2, 2, 30), (3, 3, 36), (4, 4, 40), (5, 6, 38)],
    },
    FlowFormatInfo {
        format: FileFormat::RWAUGMENTED,
        lengths: &[],
    },
    FlowFormatInfo {
        format: FileFormat::RWAUGSNMPOUT,
        lengths: &[],
    },
];

/// What the legacy header reader pulls from the bytes after the start block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyReader {
    /// Start hour, giving a packedfile entry
    PackedFile,
    /// Command lines, giving invocation entries
    Invocation,
    /// Sensor and probe names, giving a probename entry
    ProbeName,
    /// Nothing beyond the start block
    None,
}

/// Legacy header layout of one format
#[derive(Debug)]
pub struct LegacyFormat {
    pub format: FileFormat,
    pub reader: LegacyReader,
    /// Whether the record length is defined by version
    pub has_record_length: bool,
    /// First file version that padded the header to a record; 0 = never
    pub vers_padding: u8,
    /// First file version that allowed compression
    pub vers_compress: u8,
}

static LEGACY_FORMATS: &[LegacyFormat] = &[
    legacy(FileFormat::RWAUGMENTED, LegacyReader::PackedFile, true, 2, 2),
    legacy(FileFormat::RWAUGROUTING, LegacyReader::PackedFile, true, 2, 2),
    legacy(FileFormat::RWAUGSNMPOUT, LegacyReader::PackedFile, true, 2, 2),
    legacy(FileFormat::RWAUGWEB, LegacyReader::PackedFile, true, 2, 2),
    legacy(FileFormat::RWNOTROUTED, LegacyReader::PackedFile, true, 2, 3),
    legacy(FileFormat::RWROUTED, LegacyReader::PackedFile, true, 2, 3),
    legacy(FileFormat::RWSPLIT, LegacyReader::PackedFile, true, 2, 3),
    legacy(FileFormat::RWWWW, LegacyReader::PackedFile, true, 2, 3),
    legacy(FileFormat::RWFILTER, LegacyReader::Invocation, true, 2, 4),
    legacy(FileFormat::RWGENERIC, LegacyReader::None, true, 2, 3),
    legacy(FileFormat::FLOWCAP, LegacyReader::ProbeName, true, 0, 1),
    legacy(FileFormat::IPSET, LegacyReader::None, false, 0, 1),
    legacy(FileFormat::RWBAG, LegacyReader::None, true, 0, 2),
    legacy(FileFormat::PREFIXMAP, LegacyReader::None, false, 0, 0),
    legacy(FileFormat::SHUFFLE, LegacyReader::None, false, 0, 0),
];

const fn legacy(
    format: FileFormat,
    reader: LegacyReader,
    has_record_length: bool,
    vers_padding: u8,
    vers_compress: u8,
) -> LegacyFormat {
    LegacyFormat {
        format,
        reader,
        has_record_length,
        vers_padding,
        vers_compress,
    }
}

impl LegacyFormat {
    /// Record length implied by `version`; 1 when the format has none
    pub fn record_length(&self, version: u16) -> usize {
        if !self.has_record_length {
            return 1;
        }
        self.format.record_length(version).unwrap_or(1)
    }
}
