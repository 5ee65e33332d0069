//! SiLK file header
//!
//! Every SiLK file starts with a 16-byte start block followed by a chain of
//! header entries terminated by an entry whose id is 0:
//!
//! ```text
//! ┌────────┬───────┬────────┬─────────┬──────┬──────────┬─────────┬──────────┐
//! │ Magic  │ Flags │ Format │ Version │ Comp │ SiLK ver │ Rec len │ Rec vers │
//! │ 4 bytes│ 1 byte│ 1 byte │ 1 byte  │1 byte│ 4 bytes  │ 2 bytes │ 2 bytes  │
//! └────────┴───────┴────────┴─────────┴──────┴──────────┴─────────┴──────────┘
//! [id:4][len:4][payload] ... [0:4][len:4][padding]
//! ```
//!
//! The terminator's length absorbs padding so the header ends on a multiple
//! of the record length (or the padding modulus).

pub mod entries;
pub mod entry;
mod legacy;
pub mod registry;

pub use entries::{Annotation, Invocation, PackedFile, PrefixMapEntry, ProbeName, Tombstone};
pub use entry::{
    HeaderEntry, RawEntry, AGGBAG_ID, ANNOTATION_ID, BAG_ID, ENTRY_SPEC_SIZE, INVOCATION_ID,
    IPSET_ID, PACKEDFILE_ID, PREFIXMAP_ID, PROBENAME_ID, SIDECAR_ID, TOMBSTONE_ID,
};
pub use legacy::{INVALID_FLOWTYPE, INVALID_SENSOR};

use crate::compression::{CompMethodStatus, CompressionMethod};
use crate::config::{EXPANDED_HEADER_VERSION, FILE_VERSION, MAX_RECORD_SIZE};
use crate::format::FileFormat;
use crate::{Result, SilkError};
use bytes::{BufMut, BytesMut};
use serde::Serialize;
use std::fmt;
use std::io::{self, Read, Write};
use std::ops::BitOr;
use std::path::Path;
use tracing::debug;

/// Magic number at offset 0 of every SiLK file
pub const MAGIC: u32 = 0xDEAD_BEEF;

/// Size of the start block in expanded headers
pub const START_BLOCK_SIZE: usize = 16;

/// Size of the start block shared by legacy and expanded headers
pub const LEGACY_START_SIZE: usize = 8;

/// Record version meaning "let the writer decide"
pub const RECORD_VERSION_ANY: u16 = 0xFF;

const FLAG_BIG_ENDIAN: u8 = 0x01;

/// Byte order of the data that follows the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    /// Byte order of this host
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    pub fn is_native(self) -> bool {
        self == Self::native()
    }

    pub fn name(self) -> &'static str {
        match self {
            ByteOrder::Big => "BigEndian",
            ByteOrder::Little => "littleEndian",
        }
    }
}

/// How much of a header may still change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum HeaderLock {
    /// Everything is mutable
    #[default]
    Unlocked,
    /// Start block is frozen; entries may still be added
    EntriesMutable,
    /// Nothing may change
    Fixed,
}

/// Selects the parts of a header [`Header::copy_from`] transfers.
///
/// The low eight bits select individual bits of the start-block flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyFlags(u32);

impl CopyFlags {
    /// Byte-order flag bit
    pub const ENDIAN: CopyFlags = CopyFlags(1 << 0);
    /// Every bit of the flags byte
    pub const FILE_FLAGS: CopyFlags = CopyFlags(0xFF);
    pub const FORMAT: CopyFlags = CopyFlags(1 << 8);
    pub const FILE_VERSION: CopyFlags = CopyFlags(1 << 9);
    pub const COMPRESSION: CopyFlags = CopyFlags(1 << 10);
    pub const RECORD_LENGTH: CopyFlags = CopyFlags(1 << 11);
    pub const RECORD_VERSION: CopyFlags = CopyFlags(1 << 12);
    /// Whole start block except the producer version
    pub const START: CopyFlags = CopyFlags(0x00FF_FFFF);
    /// Deep copies of every entry
    pub const ENTRIES: CopyFlags = CopyFlags(1 << 31);
    pub const ALL: CopyFlags = CopyFlags(0xFFFF_FFFF);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: CopyFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: CopyFlags) -> bool {
        self.0 & other.0 != 0
    }

    fn without(self, other: CopyFlags) -> CopyFlags {
        CopyFlags(self.0 & !other.0)
    }
}

impl BitOr for CopyFlags {
    type Output = CopyFlags;

    fn bitor(self, rhs: CopyFlags) -> CopyFlags {
        CopyFlags(self.0 | rhs.0)
    }
}

/// Producer version written into new headers
fn producer_version() -> u32 {
    if crate::config::runtime().header_no_version {
        return 0;
    }
    let part = |s: &str| s.parse::<u32>().unwrap_or(0);
    part(env!("CARGO_PKG_VERSION_MAJOR")) * 1_000_000
        + part(env!("CARGO_PKG_VERSION_MINOR")) * 1_000
        + part(env!("CARGO_PKG_VERSION_PATCH"))
}

/// Fill `buf` from `r`, stopping early only at end of input
pub(crate) fn read_fully<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        match r.read(&mut buf[done..]) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

/// In-memory SiLK file header
#[derive(Debug, Clone)]
pub struct Header {
    flags: u8,
    format: FileFormat,
    file_version: u8,
    compression: u8,
    silk_version: u32,
    record_length: u16,
    record_version: u16,
    padding_modulus: u32,
    lock: HeaderLock,
    header_length: usize,
    entries: Vec<Box<dyn HeaderEntry>>,
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

impl Header {
    /// Empty header: host byte order, unset format, default compression
    pub fn new() -> Self {
        let flags = match ByteOrder::native() {
            ByteOrder::Big => FLAG_BIG_ENDIAN,
            ByteOrder::Little => 0,
        };
        Self {
            flags,
            format: FileFormat::UNSET,
            file_version: FILE_VERSION,
            compression: CompressionMethod::Default.id(),
            silk_version: producer_version(),
            record_length: 0,
            record_version: RECORD_VERSION_ANY,
            padding_modulus: 0,
            lock: HeaderLock::Unlocked,
            header_length: 0,
            entries: Vec::new(),
        }
    }

    /// Read a complete header from `r`
    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        let mut hdr = Self::new();
        hdr.read(r)?;
        Ok(hdr)
    }

    // Start block accessors

    pub fn byte_order(&self) -> ByteOrder {
        if self.flags & FLAG_BIG_ENDIAN != 0 {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    pub fn is_native_byte_order(&self) -> bool {
        self.byte_order().is_native()
    }

    /// Raw compression id from the start block
    pub fn compression(&self) -> u8 {
        self.compression
    }

    /// Compression method, if the id names one
    pub fn compression_method(&self) -> Option<CompressionMethod> {
        CompressionMethod::try_from(self.compression).ok()
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn file_version(&self) -> u8 {
        self.file_version
    }

    /// Producer version; 0 for legacy files
    pub fn silk_version(&self) -> u32 {
        self.silk_version
    }

    pub fn record_length(&self) -> usize {
        self.record_length as usize
    }

    pub fn record_version(&self) -> u16 {
        self.record_version
    }

    pub fn padding_modulus(&self) -> u32 {
        self.padding_modulus
    }

    pub fn lock(&self) -> HeaderLock {
        self.lock
    }

    /// Bytes read or written for this header, padding included
    pub fn header_length(&self) -> usize {
        self.header_length
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.lock != HeaderLock::Unlocked {
            return Err(SilkError::HeaderLocked);
        }
        Ok(())
    }

    pub fn set_byte_order(&mut self, order: ByteOrder) -> Result<()> {
        self.ensure_unlocked()?;
        match order {
            ByteOrder::Big => self.flags |= FLAG_BIG_ENDIAN,
            ByteOrder::Little => self.flags &= !FLAG_BIG_ENDIAN,
        }
        Ok(())
    }

    /// Set the compression id; pseudo-methods are accepted for later resolution
    pub fn set_compression(&mut self, id: u8) -> Result<()> {
        self.ensure_unlocked()?;
        match CompressionMethod::check(id) {
            CompMethodStatus::Available | CompMethodStatus::Known => {
                self.compression = id;
                Ok(())
            }
            CompMethodStatus::Valid => Err(SilkError::CompressionUnavailable(id)),
            CompMethodStatus::Unknown => Err(SilkError::CompressionInvalid(id)),
        }
    }

    pub fn set_format(&mut self, format: FileFormat) -> Result<()> {
        self.ensure_unlocked()?;
        if !format.is_known() {
            return Err(SilkError::InvalidInput(format!(
                "unknown file format {}",
                format
            )));
        }
        self.format = format;
        Ok(())
    }

    /// Only the expanded header version can be written
    pub fn set_file_version(&mut self, version: u8) -> Result<()> {
        self.ensure_unlocked()?;
        if version != FILE_VERSION {
            return Err(SilkError::UnsupportedVersion {
                format: self.format.id(),
                version: version as u16,
            });
        }
        self.file_version = version;
        Ok(())
    }

    pub fn set_record_length(&mut self, length: usize) -> Result<()> {
        self.ensure_unlocked()?;
        if length > MAX_RECORD_SIZE {
            return Err(SilkError::InvalidInput(format!(
                "record length {} exceeds {}",
                length, MAX_RECORD_SIZE
            )));
        }
        self.record_length = length as u16;
        Ok(())
    }

    pub fn set_record_version(&mut self, version: u16) -> Result<()> {
        self.ensure_unlocked()?;
        self.record_version = version;
        Ok(())
    }

    /// Header size multiple; 0 means the record length
    pub fn set_padding_modulus(&mut self, modulus: u32) -> Result<()> {
        self.ensure_unlocked()?;
        self.padding_modulus = modulus;
        Ok(())
    }

    pub fn set_lock(&mut self, lock: HeaderLock) {
        self.lock = lock;
    }

    // Entries

    /// Append an entry; allowed until the header is fixed
    pub fn add_entry(&mut self, entry: Box<dyn HeaderEntry>) -> Result<()> {
        if self.lock == HeaderLock::Fixed {
            return Err(SilkError::HeaderLocked);
        }
        if entry.id() == 0 {
            return Err(SilkError::InvalidEntryId(0));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Remove every entry with `id`; returns how many were removed
    pub fn remove_all_matching(&mut self, id: u32) -> Result<usize> {
        if id == 0 {
            return Err(SilkError::InvalidEntryId(0));
        }
        self.ensure_unlocked()?;
        let before = self.entries.len();
        self.entries.retain(|e| e.id() != id);
        Ok(before - self.entries.len())
    }

    pub fn first_match(&self, id: u32) -> Option<&dyn HeaderEntry> {
        self.entries_with_id(id).next()
    }

    /// All entries in file order
    pub fn entries(&self) -> impl Iterator<Item = &dyn HeaderEntry> + '_ {
        self.entries.iter().map(|e| e.as_ref())
    }

    /// Entries with `id`, in file order
    pub fn entries_with_id(&self, id: u32) -> impl Iterator<Item = &dyn HeaderEntry> + '_ {
        self.entries().filter(move |e| e.id() == id)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn add_packedfile(&mut self, start_time: i64, flowtype: u32, sensor: u32) -> Result<()> {
        self.add_entry(Box::new(PackedFile::new(start_time, flowtype, sensor)))
    }

    pub fn add_invocation<S: AsRef<str>>(&mut self, strip_path: bool, args: &[S]) -> Result<()> {
        self.add_entry(Box::new(Invocation::new(strip_path, args)?))
    }

    pub fn add_annotation(&mut self, note: impl Into<String>) -> Result<()> {
        self.add_entry(Box::new(Annotation::new(note)))
    }

    pub fn add_annotation_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.add_entry(Box::new(Annotation::from_file(path)?))
    }

    pub fn add_probename(&mut self, name: impl Into<String>) -> Result<()> {
        self.add_entry(Box::new(ProbeName::new(name)?))
    }

    pub fn add_tombstone(&mut self, counter: u32) -> Result<()> {
        self.add_entry(Box::new(Tombstone::new(counter)))
    }

    /// Copy the parts of `src` selected by `flags` into this header
    pub fn copy_from(&mut self, src: &Header, flags: CopyFlags) -> Result<()> {
        match self.lock {
            HeaderLock::Fixed => return Err(SilkError::HeaderLocked),
            HeaderLock::EntriesMutable if flags != CopyFlags::ENTRIES => {
                return Err(SilkError::HeaderLocked)
            }
            _ => {}
        }

        let mut flags = flags;
        if src.file_version < EXPANDED_HEADER_VERSION {
            flags = flags.without(CopyFlags::FILE_VERSION);
        }

        if flags.contains(CopyFlags::START) {
            self.flags = src.flags;
            self.format = src.format;
            self.file_version = src.file_version;
            self.compression = src.compression;
            self.record_length = src.record_length;
            self.record_version = src.record_version;
        } else if flags.intersects(CopyFlags::START) {
            if flags.intersects(CopyFlags::FORMAT) {
                self.format = src.format;
                self.record_length = 0;
            }
            if flags.intersects(CopyFlags::FILE_VERSION) {
                self.file_version = src.file_version;
            }
            if flags.intersects(CopyFlags::COMPRESSION) {
                self.compression = src.compression;
            }
            if flags.intersects(CopyFlags::RECORD_LENGTH) {
                self.record_length = 0;
            }
            if flags.intersects(CopyFlags::RECORD_VERSION) {
                self.record_version = src.record_version;
            }
            let mask = (flags.bits() & CopyFlags::FILE_FLAGS.bits()) as u8;
            self.flags = (self.flags & !mask) | (src.flags & mask);
        }

        if flags.intersects(CopyFlags::ENTRIES) {
            for entry in &src.entries {
                self.add_entry(entry.clone_entry())?;
            }
        }
        Ok(())
    }

    /// Append copies of the entries in `src` whose id is `id`
    pub fn copy_entries(&mut self, src: &Header, id: u32) -> Result<()> {
        if self.lock == HeaderLock::Fixed {
            return Err(SilkError::HeaderLocked);
        }
        for entry in src.entries_with_id(id) {
            self.add_entry(entry.clone_entry())?;
        }
        Ok(())
    }

    // Serialization

    /// Read the start block.
    ///
    /// Legacy files stop after the first eight bytes; the remainder of
    /// their header is handled by [`read_entries`](Self::read_entries).
    pub fn read_start<R: Read + ?Sized>(&mut self, r: &mut R) -> Result<()> {
        if self.lock != HeaderLock::Unlocked {
            return Err(SilkError::HeaderLocked);
        }
        self.header_length = 0;

        let mut start = [0u8; LEGACY_START_SIZE];
        let got = read_fully(r, &mut start)?;
        self.header_length += got;
        if got < start.len() {
            return Err(SilkError::ShortRead {
                expected: start.len(),
                actual: got,
            });
        }
        let magic = u32::from_be_bytes([start[0], start[1], start[2], start[3]]);
        if magic != MAGIC {
            return Err(SilkError::BadMagic(magic));
        }
        self.flags = start[4];
        self.format = FileFormat(start[5]);
        self.file_version = start[6];
        self.compression = start[7];

        if self.file_version < EXPANDED_HEADER_VERSION {
            return Ok(());
        }
        if self.file_version > FILE_VERSION {
            return Err(SilkError::UnsupportedVersion {
                format: self.format.id(),
                version: self.file_version as u16,
            });
        }

        let mut rest = [0u8; START_BLOCK_SIZE - LEGACY_START_SIZE];
        let got = read_fully(r, &mut rest)?;
        self.header_length += got;
        if got < rest.len() {
            return Err(SilkError::ShortRead {
                expected: rest.len(),
                actual: got,
            });
        }
        self.silk_version = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
        self.record_length = u16::from_be_bytes([rest[4], rest[5]]);
        self.record_version = u16::from_be_bytes([rest[6], rest[7]]);
        Ok(())
    }

    /// Read the entry chain up to and including the terminator
    pub fn read_entries<R: Read + ?Sized>(&mut self, r: &mut R) -> Result<()> {
        if self.file_version < EXPANDED_HEADER_VERSION {
            return legacy::read_legacy(self, r);
        }

        loop {
            let mut prefix = [0u8; ENTRY_SPEC_SIZE];
            let got = read_fully(r, &mut prefix)?;
            self.header_length += got;
            if got < prefix.len() {
                return Err(SilkError::ShortRead {
                    expected: prefix.len(),
                    actual: got,
                });
            }
            let id = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
            let len = u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
            if (len as usize) < ENTRY_SPEC_SIZE {
                return Err(SilkError::EntryLength(len));
            }

            let want = len as usize - ENTRY_SPEC_SIZE;
            let mut payload = Vec::with_capacity(want.min(1 << 16));
            let got = Read::take(&mut *r, want as u64).read_to_end(&mut payload)?;
            self.header_length += got;
            if got < want {
                return Err(SilkError::ShortRead {
                    expected: want,
                    actual: got,
                });
            }

            if id == 0 {
                break;
            }
            let entry = registry::unpack(id, &payload)?;
            debug!("Read header entry {} ({} bytes)", registry::entry_name(id), len);
            self.entries.push(entry);
        }
        Ok(())
    }

    /// Read the start block and the entry chain
    pub fn read<R: Read + ?Sized>(&mut self, r: &mut R) -> Result<()> {
        self.read_start(r)?;
        self.read_entries(r)?;
        debug!(
            "Read header: format={} version={} compression={} length={}",
            self.format, self.file_version, self.compression, self.header_length
        );
        Ok(())
    }

    /// Pack the whole header, terminator and padding included
    pub fn pack(&mut self) -> Result<BytesMut> {
        if self.format == FileFormat::UNSET {
            return Err(SilkError::FormatUnset);
        }
        if !self.format.is_known() {
            return Err(SilkError::UnsupportedFormat(self.format.id()));
        }
        match CompressionMethod::check(self.compression) {
            CompMethodStatus::Available => {}
            CompMethodStatus::Valid => {
                return Err(SilkError::CompressionUnavailable(self.compression))
            }
            _ => return Err(SilkError::CompressionInvalid(self.compression)),
        }
        if self.file_version != FILE_VERSION {
            return Err(SilkError::UnsupportedVersion {
                format: self.format.id(),
                version: self.file_version as u16,
            });
        }
        if self.record_length == 0 {
            self.record_length = 1;
        }
        if self.padding_modulus == 0 {
            self.padding_modulus = self.record_length as u32;
        }

        let mut buf = BytesMut::with_capacity(256);

        // Start block
        buf.put_u32(MAGIC);
        buf.put_u8(self.flags);
        buf.put_u8(self.format.id());
        buf.put_u8(self.file_version);
        buf.put_u8(self.compression);
        buf.put_u32(self.silk_version);
        buf.put_u16(self.record_length);
        buf.put_u16(self.record_version);

        for entry in &self.entries {
            entry.pack(&mut buf)?;
        }

        // Terminator, stretched to the padding modulus
        let mut term_len = ENTRY_SPEC_SIZE;
        let modulus = self.padding_modulus as usize;
        if modulus > 1 {
            let pad = modulus - ((buf.len() + term_len) % modulus);
            if pad != modulus {
                term_len += pad;
            }
        }
        buf.put_u32(0);
        buf.put_u32(term_len as u32);
        buf.put_bytes(0, term_len - ENTRY_SPEC_SIZE);

        Ok(buf)
    }

    /// Write the header to `w`; returns the number of bytes written
    pub fn write<W: Write + ?Sized>(&mut self, w: &mut W) -> Result<usize> {
        let buf = self.pack()?;
        w.write_all(&buf)?;
        self.header_length = buf.len();
        debug!(
            "Wrote header: format={} entries={} length={}",
            self.format,
            self.entries.len(),
            self.header_length
        );
        Ok(self.header_length)
    }

    /// Dump the start block and every entry, one field per line
    pub fn print(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "  {:<20}{}(0x{:02x})", "format(id)", self.format, self.format.id())?;
        writeln!(out, "  {:<20}{}", "version", self.file_version)?;
        writeln!(out, "  {:<20}{}", "byte-order", self.byte_order().name())?;
        let comp_name = self.compression_method().map(|m| m.name()).unwrap_or("unknown");
        writeln!(out, "  {:<20}{}({})", "compression(id)", comp_name, self.compression)?;
        writeln!(out, "  {:<20}{}", "header-length", self.header_length)?;
        writeln!(out, "  {:<20}{}", "record-length", self.record_length)?;
        writeln!(out, "  {:<20}{}", "record-version", self.record_version)?;
        writeln!(out, "  {:<20}{}", "silk-version", format_silk_version(self.silk_version))?;
        for entry in &self.entries {
            let name = registry::entry_name(entry.id());
            write!(out, "  {:<20}", name)?;
            entry.print(out)?;
            writeln!(out)?;
        }
        Ok(())
    }

    /// Serializable view used by header dumps
    pub fn summary(&self) -> HeaderSummary {
        HeaderSummary {
            format: self.format.to_string(),
            format_id: self.format.id(),
            file_version: self.file_version,
            byte_order: self.byte_order(),
            compression: self
                .compression_method()
                .map(|m| m.name().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            compression_id: self.compression,
            header_length: self.header_length,
            record_length: self.record_length as usize,
            record_version: self.record_version,
            silk_version: format_silk_version(self.silk_version),
            entries: self
                .entries
                .iter()
                .map(|e| EntrySummary {
                    id: e.id(),
                    name: registry::entry_name(e.id()),
                    text: e.to_display_string(),
                })
                .collect(),
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.print(f)
    }
}

/// Render an encoded producer version as `major.minor.patch`
pub fn format_silk_version(version: u32) -> String {
    if version == 0 {
        return "0".to_string();
    }
    format!(
        "{}.{}.{}",
        version / 1_000_000,
        (version / 1_000) % 1_000,
        version % 1_000
    )
}

/// Header contents in a form `serde` can emit
#[derive(Debug, Clone, Serialize)]
pub struct HeaderSummary {
    pub format: String,
    pub format_id: u8,
    pub file_version: u8,
    pub byte_order: ByteOrder,
    pub compression: String,
    pub compression_id: u8,
    pub header_length: usize,
    pub record_length: usize,
    pub record_version: u16,
    pub silk_version: String,
    pub entries: Vec<EntrySummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub id: u32,
    pub name: &'static str,
    pub text: String,
}
