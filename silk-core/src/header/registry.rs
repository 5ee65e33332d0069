//! Process-wide table of header entry decoders
//!
//! Every entry read from a file is decoded by the unpacker registered for
//! its id; ids without one keep their payload bytes through [`RawEntry`].
//! The table fills itself with the built-in entries on first use.

use super::entries::{Annotation, Invocation, PackedFile, PrefixMapEntry, ProbeName, Tombstone};
use super::entry::{
    HeaderEntry, RawEntry, AGGBAG_ID, ANNOTATION_ID, BAG_ID, INVOCATION_ID, IPSET_ID,
    PACKEDFILE_ID, PREFIXMAP_ID, PROBENAME_ID, SIDECAR_ID, TOMBSTONE_ID,
};
use crate::{Result, SilkError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;

/// Decode an entry payload (the bytes after the id and length)
pub type UnpackFn = fn(id: u32, payload: &[u8]) -> Result<Box<dyn HeaderEntry>>;

/// Registration record for one entry id
#[derive(Debug, Clone, Copy)]
pub struct EntryType {
    pub id: u32,
    pub name: &'static str,
    pub unpack: UnpackFn,
}

static REGISTRY: RwLock<Option<BTreeMap<u32, EntryType>>> = parking_lot::const_rwlock(None);

fn builtin() -> BTreeMap<u32, EntryType> {
    let types = [
        EntryType {
            id: PACKEDFILE_ID,
            name: "packedfile",
            unpack: PackedFile::unpack,
        },
        EntryType {
            id: INVOCATION_ID,
            name: "invocation",
            unpack: Invocation::unpack,
        },
        EntryType {
            id: ANNOTATION_ID,
            name: "annotation",
            unpack: Annotation::unpack,
        },
        EntryType {
            id: PROBENAME_ID,
            name: "probename",
            unpack: ProbeName::unpack,
        },
        EntryType {
            id: PREFIXMAP_ID,
            name: "prefixmap",
            unpack: PrefixMapEntry::unpack,
        },
        EntryType {
            id: BAG_ID,
            name: "bag",
            unpack: crate::bag::BagEntry::unpack,
        },
        EntryType {
            id: IPSET_ID,
            name: "ipset",
            unpack: RawEntry::unpack,
        },
        EntryType {
            id: AGGBAG_ID,
            name: "aggbag",
            unpack: crate::aggbag::AggBagEntry::unpack,
        },
        EntryType {
            id: SIDECAR_ID,
            name: "sidecar",
            unpack: RawEntry::unpack,
        },
        EntryType {
            id: TOMBSTONE_ID,
            name: "tombstone",
            unpack: Tombstone::unpack,
        },
    ];
    debug!("Registering {} built-in header entry types", types.len());
    types.into_iter().map(|t| (t.id, t)).collect()
}

/// Fill the table with the built-in entries; no-op when already filled
pub fn initialize() {
    let mut guard = REGISTRY.write();
    if guard.is_none() {
        *guard = Some(builtin());
    }
}

/// Drop every registration, built-in ones included
pub fn teardown() {
    *REGISTRY.write() = None;
}

/// Add a decoder for a new entry id.
///
/// Id 0 is the end-of-header marker and ids can be registered only once.
pub fn register(entry_type: EntryType) -> Result<()> {
    if entry_type.id == 0 {
        return Err(SilkError::InvalidEntryId(0));
    }
    let mut guard = REGISTRY.write();
    let table = guard.get_or_insert_with(builtin);
    if table.contains_key(&entry_type.id) {
        return Err(SilkError::InvalidEntryId(entry_type.id));
    }
    table.insert(entry_type.id, entry_type);
    Ok(())
}

/// Registration for `id`, if any
pub fn lookup(id: u32) -> Option<EntryType> {
    if let Some(table) = REGISTRY.read().as_ref() {
        return table.get(&id).copied();
    }
    let mut guard = REGISTRY.write();
    guard.get_or_insert_with(builtin).get(&id).copied()
}

/// Display name for an entry id
pub fn entry_name(id: u32) -> &'static str {
    lookup(id).map(|t| t.name).unwrap_or("unknown")
}

/// Decode a payload with the registered unpacker or keep it raw
pub(crate) fn unpack(id: u32, payload: &[u8]) -> Result<Box<dyn HeaderEntry>> {
    match lookup(id) {
        Some(t) => (t.unpack)(id, payload),
        None => RawEntry::unpack(id, payload),
    }
}
