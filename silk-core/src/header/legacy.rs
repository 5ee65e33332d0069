//! Reader for headers of files older than the expanded header
//!
//! Old files carry only the 8-byte start block plus a format-specific tail.
//! The tail is turned into ordinary entries so callers see one header model.

use super::entries::{Invocation, PackedFile, ProbeName};
use super::{read_fully, ByteOrder, Header};
use crate::compression::CompressionMethod;
use crate::config::MAX_RECORD_SIZE;
use crate::format::LegacyReader;
use crate::{Result, SilkError};
use std::io::Read;
use tracing::debug;

/// Flowtype recorded when a legacy file cannot name one
pub const INVALID_FLOWTYPE: u32 = 0xFF;
/// Sensor recorded when a legacy file cannot name one
pub const INVALID_SENSOR: u32 = 0xFFFF;

const PROBE_FIELD_LEN: usize = 25;
/// Compression id old flowcap files used for LZO
const LEGACY_FLOWCAP_LZO: u8 = 6;

/// Complete `hdr` from the bytes after a legacy start block
pub(super) fn read_legacy<R: Read + ?Sized>(hdr: &mut Header, r: &mut R) -> Result<()> {
    let legacy = hdr
        .format
        .legacy()
        .ok_or_else(|| SilkError::Header(format!("no legacy layout for {}", hdr.format)))?;

    hdr.record_version = hdr.file_version as u16;
    hdr.silk_version = 0;

    if hdr.record_version < legacy.vers_compress as u16
        && hdr.compression != CompressionMethod::None.id()
    {
        return Err(SilkError::Header(format!(
            "compression {} not allowed in {} version {}",
            hdr.compression, hdr.format, hdr.file_version
        )));
    }

    hdr.record_length = legacy.record_length(hdr.record_version) as u16;
    debug!(
        "Legacy header: format={} version={} record_length={}",
        hdr.format, hdr.file_version, hdr.record_length
    );

    match legacy.reader {
        LegacyReader::PackedFile => read_packedfile(hdr, r)?,
        LegacyReader::Invocation => read_invocations(hdr, r)?,
        LegacyReader::ProbeName => read_probename(hdr, r)?,
        LegacyReader::None => {}
    }

    if legacy.vers_padding > 0 && hdr.record_version >= legacy.vers_padding as u16 {
        let rec_size = hdr.record_length as usize;
        if rec_size == 0 || rec_size >= MAX_RECORD_SIZE {
            return Err(SilkError::Header(format!("bad record length {}", rec_size)));
        }
        let pad = rec_size - (hdr.header_length % rec_size);
        if pad < rec_size {
            let mut padding = vec![0u8; pad];
            take_exact(hdr, r, &mut padding)?;
        }
    }
    Ok(())
}

fn take_exact<R: Read + ?Sized>(hdr: &mut Header, r: &mut R, buf: &mut [u8]) -> Result<()> {
    let got = read_fully(r, buf)?;
    hdr.header_length += got;
    if got < buf.len() {
        return Err(SilkError::ShortRead {
            expected: buf.len(),
            actual: got,
        });
    }
    Ok(())
}

fn read_u32<R: Read + ?Sized>(hdr: &mut Header, r: &mut R) -> Result<u32> {
    let mut word = [0u8; 4];
    take_exact(hdr, r, &mut word)?;
    Ok(match hdr.byte_order() {
        ByteOrder::Big => u32::from_be_bytes(word),
        ByteOrder::Little => u32::from_le_bytes(word),
    })
}

fn read_u16<R: Read + ?Sized>(hdr: &mut Header, r: &mut R) -> Result<u16> {
    let mut word = [0u8; 2];
    take_exact(hdr, r, &mut word)?;
    Ok(match hdr.byte_order() {
        ByteOrder::Big => u16::from_be_bytes(word),
        ByteOrder::Little => u16::from_le_bytes(word),
    })
}

fn read_packedfile<R: Read + ?Sized>(hdr: &mut Header, r: &mut R) -> Result<()> {
    let start_secs = read_u32(hdr, r)?;
    let entry = PackedFile::new(
        i64::from(start_secs) * 1000,
        INVALID_FLOWTYPE,
        INVALID_SENSOR,
    );
    hdr.entries.push(Box::new(entry));
    Ok(())
}

fn read_invocations<R: Read + ?Sized>(hdr: &mut Header, r: &mut R) -> Result<()> {
    let count = read_u32(hdr, r)?;
    for _ in 0..count {
        let len = read_u16(hdr, r)? as usize;
        if len == 0 {
            continue;
        }
        let mut raw = vec![0u8; len];
        take_exact(hdr, r, &mut raw)?;
        while raw.last() == Some(&0) {
            raw.pop();
        }
        // argv was stored NUL-separated
        for b in raw.iter_mut() {
            if *b == 0 {
                *b = b' ';
            }
        }
        let line = String::from_utf8_lossy(&raw).into_owned();
        hdr.entries.push(Box::new(Invocation::new(false, &[line])?));
    }
    Ok(())
}

fn read_probename<R: Read + ?Sized>(hdr: &mut Header, r: &mut R) -> Result<()> {
    if hdr.compression == LEGACY_FLOWCAP_LZO {
        hdr.compression = CompressionMethod::Lzo1x.id();
    }
    let mut fields = [0u8; 2 * PROBE_FIELD_LEN];
    take_exact(hdr, r, &mut fields)?;

    let sensor = super::entry::c_string(&fields[..PROBE_FIELD_LEN]);
    let probe = super::entry::c_string(&fields[PROBE_FIELD_LEN..2 * PROBE_FIELD_LEN - 1]);
    let name = if sensor == probe {
        sensor
    } else {
        format!("{}_{}", sensor, probe)
    };
    hdr.entries.push(Box::new(ProbeName::new(name)?));
    Ok(())
}
