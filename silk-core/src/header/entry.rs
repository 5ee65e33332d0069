//! Header entry trait and the byte-preserving fallback entry

use crate::{Result, SilkError};
use bytes::{BufMut, BytesMut};
use std::any::Any;
use std::fmt;

/// Size of the `[id:4][length:4]` prefix of every entry
pub const ENTRY_SPEC_SIZE: usize = 8;

pub const PACKEDFILE_ID: u32 = 1;
pub const INVOCATION_ID: u32 = 2;
pub const ANNOTATION_ID: u32 = 3;
pub const PROBENAME_ID: u32 = 4;
pub const PREFIXMAP_ID: u32 = 5;
pub const BAG_ID: u32 = 6;
pub const IPSET_ID: u32 = 7;
pub const AGGBAG_ID: u32 = 8;
pub const SIDECAR_ID: u32 = 9;
pub const TOMBSTONE_ID: u32 = 10;

/// One typed section of a file header.
///
/// Implementations produce only the payload; the id and total length are
/// framed by [`pack`](trait.HeaderEntry.html#method.pack).
pub trait HeaderEntry: fmt::Debug + Send + Sync {
    /// Entry type id; never 0
    fn id(&self) -> u32;

    /// Append the payload bytes that follow the 8-byte id and length
    fn pack_payload(&self, buf: &mut BytesMut) -> Result<()>;

    /// Human-readable rendering used by header dumps
    fn print(&self, out: &mut dyn fmt::Write) -> fmt::Result;

    /// Deep copy
    fn clone_entry(&self) -> Box<dyn HeaderEntry>;

    fn as_any(&self) -> &dyn Any;
}

impl<'a> dyn HeaderEntry + 'a {
    /// View the entry as its concrete type
    pub fn downcast_ref<T: HeaderEntry + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Append the framed entry; returns the number of bytes added
    pub fn pack(&self, buf: &mut BytesMut) -> Result<usize> {
        let start = buf.len();
        buf.put_u32(self.id());
        buf.put_u32(0);
        self.pack_payload(buf)?;

        let len = buf.len() - start;
        let len32 = u32::try_from(len).map_err(|_| SilkError::EntryLength(u32::MAX))?;
        buf[start + 4..start + 8].copy_from_slice(&len32.to_be_bytes());
        Ok(len)
    }

    /// Total on-disk length including the id and length
    pub fn packed_len(&self) -> usize {
        let mut buf = BytesMut::new();
        match self.pack(&mut buf) {
            Ok(len) => len,
            Err(_) => ENTRY_SPEC_SIZE,
        }
    }

    /// Rendering produced by [`HeaderEntry::print`]
    pub fn to_display_string(&self) -> String {
        let mut s = String::new();
        // writing into a String cannot fail
        let _ = self.print(&mut s);
        s
    }
}

impl Clone for Box<dyn HeaderEntry> {
    fn clone(&self) -> Self {
        self.clone_entry()
    }
}

/// Entry kept as raw payload bytes.
///
/// Used for ids without a registered codec and for metadata this library
/// carries without interpreting (ipset, sidecar).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    id: u32,
    payload: Vec<u8>,
}

impl RawEntry {
    pub fn new(id: u32, payload: Vec<u8>) -> Result<Self> {
        if id == 0 {
            return Err(SilkError::InvalidEntryId(0));
        }
        Ok(Self { id, payload })
    }

    /// Bytes after the id and length, exactly as read
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub(crate) fn unpack(id: u32, payload: &[u8]) -> Result<Box<dyn HeaderEntry>> {
        Ok(Box::new(Self::new(id, payload.to_vec())?))
    }
}

impl HeaderEntry for RawEntry {
    fn id(&self) -> u32 {
        self.id
    }

    fn pack_payload(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_slice(&self.payload);
        Ok(())
    }

    fn print(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "unknown; length {}", self.payload.len() + ENTRY_SPEC_SIZE)
    }

    fn clone_entry(&self) -> Box<dyn HeaderEntry> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Text up to the first NUL (or the whole slice), lossily decoded
pub(crate) fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Append `s` followed by a NUL
pub(crate) fn put_c_string(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

pub(crate) fn unpack_error(id: u32, reason: impl Into<String>) -> SilkError {
    SilkError::EntryUnpack {
        id,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_entry_framing() {
        let entry: Box<dyn HeaderEntry> = Box::new(RawEntry::new(77, vec![1, 2, 3]).unwrap());
        let mut buf = BytesMut::new();
        assert_eq!(entry.pack(&mut buf).unwrap(), 11);
        assert_eq!(&buf[..], &[0, 0, 0, 77, 0, 0, 0, 11, 1, 2, 3]);
        assert_eq!(entry.to_display_string(), "unknown; length 11");
        assert_eq!(entry.downcast_ref::<RawEntry>().unwrap().payload(), &[1, 2, 3]);
    }

    #[test]
    fn test_raw_entry_rejects_terminator_id() {
        assert!(matches!(
            RawEntry::new(0, Vec::new()),
            Err(SilkError::InvalidEntryId(0))
        ));
    }

    #[test]
    fn test_c_string() {
        assert_eq!(c_string(b"abc\0def"), "abc");
        assert_eq!(c_string(b"abc"), "abc");
    }
}
