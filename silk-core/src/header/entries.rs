//! Built-in header entries: packedfile, invocation, annotation, probename,
//! prefixmap and tombstone

use super::entry::{
    c_string, put_c_string, unpack_error, HeaderEntry, ANNOTATION_ID, ENTRY_SPEC_SIZE,
    INVOCATION_ID, PACKEDFILE_ID, PREFIXMAP_ID, PROBENAME_ID, TOMBSTONE_ID,
};
use crate::iobuf::IoMode;
use crate::stream::{ContentType, Stream};
use crate::{Result, SilkError};
use bytes::{Buf, BufMut, BytesMut};
use chrono::TimeZone;
use std::any::Any;
use std::fmt;
use std::path::Path;
use tracing::warn;

const MILLIS_PER_HOUR: i64 = 3_600_000;

macro_rules! entry_boilerplate {
    () => {
        fn clone_entry(&self) -> Box<dyn HeaderEntry> {
            Box::new(self.clone())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    };
}

/// Hour, flowtype and sensor of a file produced by the packer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedFile {
    start_time: i64,
    flowtype: u32,
    sensor: u32,
}

impl PackedFile {
    /// `start_time` is in epoch milliseconds and is truncated to the hour
    pub fn new(start_time: i64, flowtype: u32, sensor: u32) -> Self {
        Self {
            start_time: start_time - start_time.rem_euclid(MILLIS_PER_HOUR),
            flowtype,
            sensor,
        }
    }

    /// Start of the hour, epoch milliseconds
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn flowtype(&self) -> u32 {
        self.flowtype
    }

    pub fn sensor(&self) -> u32 {
        self.sensor
    }

    pub(crate) fn unpack(id: u32, payload: &[u8]) -> Result<Box<dyn HeaderEntry>> {
        if payload.len() != 16 {
            return Err(unpack_error(
                id,
                format!("packedfile payload is {} bytes, expected 16", payload.len()),
            ));
        }
        let mut cursor = payload;
        let start_time = cursor.get_i64();
        let flowtype = cursor.get_u32();
        let sensor = cursor.get_u32();
        Ok(Box::new(Self {
            start_time,
            flowtype,
            sensor,
        }))
    }
}

impl HeaderEntry for PackedFile {
    fn id(&self) -> u32 {
        PACKEDFILE_ID
    }

    fn pack_payload(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_i64(self.start_time);
        buf.put_u32(self.flowtype);
        buf.put_u32(self.sensor);
        Ok(())
    }

    fn print(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        match chrono::Utc.timestamp_millis_opt(self.start_time).single() {
            Some(t) => write!(out, "{}Z ", t.format("%Y/%m/%dT%H:%M:%S"))?,
            None => write!(out, "{}Z ", self.start_time)?,
        }
        write!(out, "{} {}", self.flowtype, self.sensor)
    }

    entry_boilerplate!();
}

/// Command line of the tool that wrote the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    command_line: String,
}

impl Invocation {
    /// Join `args` with single spaces.
    ///
    /// With `strip_path`, the application name loses its directory and a
    /// libtool `lt-` prefix.
    pub fn new<S: AsRef<str>>(strip_path: bool, args: &[S]) -> Result<Self> {
        let (first, rest) = args
            .split_first()
            .ok_or_else(|| SilkError::InvalidInput("empty command line".into()))?;
        let mut app = first.as_ref();
        if strip_path {
            if let Some(pos) = app.rfind('/') {
                app = &app[pos + 1..];
                if app.is_empty() {
                    return Err(SilkError::InvalidInput(
                        "application name ends with '/'".into(),
                    ));
                }
            }
            if app.len() > 3 && app.starts_with("lt-") {
                app = &app[3..];
            }
        }

        let mut command_line = app.to_string();
        for arg in rest {
            command_line.push(' ');
            command_line.push_str(arg.as_ref());
        }
        Ok(Self { command_line })
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub(crate) fn unpack(_id: u32, payload: &[u8]) -> Result<Box<dyn HeaderEntry>> {
        Ok(Box::new(Self {
            command_line: c_string(payload),
        }))
    }
}

impl HeaderEntry for Invocation {
    fn id(&self) -> u32 {
        INVOCATION_ID
    }

    fn pack_payload(&self, buf: &mut BytesMut) -> Result<()> {
        put_c_string(buf, &self.command_line);
        Ok(())
    }

    fn print(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        out.write_str(&self.command_line)
    }

    entry_boilerplate!();
}

/// Free-form note attached to a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    note: String,
}

impl Annotation {
    pub fn new(note: impl Into<String>) -> Self {
        Self { note: note.into() }
    }

    /// Use the whole content of a text file as the note
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(SilkError::InvalidInput("empty annotation path".into()));
        }
        let mut stream = Stream::create(IoMode::Read, ContentType::Text);
        stream.bind(path)?;
        stream.open()?;
        let content = stream.read_to_end_of_file()?;
        stream.close()?;
        Ok(Self {
            note: String::from_utf8_lossy(&content).into_owned(),
        })
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub(crate) fn unpack(_id: u32, payload: &[u8]) -> Result<Box<dyn HeaderEntry>> {
        Ok(Box::new(Self {
            note: c_string(payload),
        }))
    }
}

impl HeaderEntry for Annotation {
    fn id(&self) -> u32 {
        ANNOTATION_ID
    }

    fn pack_payload(&self, buf: &mut BytesMut) -> Result<()> {
        put_c_string(buf, &self.note);
        Ok(())
    }

    fn print(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        out.write_str(&self.note)
    }

    entry_boilerplate!();
}

/// Name of the collection probe that captured the flows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeName {
    name: String,
}

impl ProbeName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(SilkError::InvalidInput("empty probe name".into()));
        }
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn unpack(id: u32, payload: &[u8]) -> Result<Box<dyn HeaderEntry>> {
        let name = c_string(payload);
        if name.is_empty() {
            return Err(unpack_error(id, "empty probe name"));
        }
        Ok(Box::new(Self { name }))
    }
}

impl HeaderEntry for ProbeName {
    fn id(&self) -> u32 {
        PROBENAME_ID
    }

    fn pack_payload(&self, buf: &mut BytesMut) -> Result<()> {
        put_c_string(buf, &self.name);
        Ok(())
    }

    fn print(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        out.write_str(&self.name)
    }

    entry_boilerplate!();
}

/// Name of the map stored in a prefix-map file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixMapEntry {
    version: u32,
    map_name: String,
}

impl PrefixMapEntry {
    pub fn new(map_name: impl Into<String>) -> Result<Self> {
        let map_name = map_name.into();
        if map_name.is_empty() {
            return Err(SilkError::InvalidInput("empty prefix map name".into()));
        }
        Ok(Self {
            version: 1,
            map_name,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    pub(crate) fn unpack(id: u32, payload: &[u8]) -> Result<Box<dyn HeaderEntry>> {
        if payload.len() < 4 {
            return Err(unpack_error(id, "prefixmap payload too short"));
        }
        let mut cursor = payload;
        let version = cursor.get_u32();
        Ok(Box::new(Self {
            version,
            map_name: c_string(cursor),
        }))
    }
}

impl HeaderEntry for PrefixMapEntry {
    fn id(&self) -> u32 {
        PREFIXMAP_ID
    }

    fn pack_payload(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u32(self.version);
        put_c_string(buf, &self.map_name);
        Ok(())
    }

    fn print(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        write!(out, "v{}: {}", self.version, self.map_name)
    }

    entry_boilerplate!();
}

/// Marker left by a packer for files that carry no records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tombstone {
    version: u32,
    counter: u32,
}

impl Tombstone {
    pub fn new(counter: u32) -> Self {
        Self {
            version: 1,
            counter,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Counter value; `u32::MAX` for versions this library cannot decode
    pub fn counter(&self) -> u32 {
        if self.version != 1 {
            return u32::MAX;
        }
        self.counter
    }

    fn zero() -> Self {
        Self {
            version: 0,
            counter: 0,
        }
    }

    pub(crate) fn unpack(id: u32, payload: &[u8]) -> Result<Box<dyn HeaderEntry>> {
        if payload.len() < 4 {
            return Err(unpack_error(id, "tombstone payload too short"));
        }
        let mut cursor = payload;
        let version = cursor.get_u32();
        if version != 1 {
            warn!("Unsupported tombstone version {}; keeping a placeholder", version);
            return Ok(Box::new(Self::zero()));
        }
        if payload.len() != 8 {
            return Err(unpack_error(
                id,
                format!("tombstone v1 length {}", payload.len() + ENTRY_SPEC_SIZE),
            ));
        }
        Ok(Box::new(Self {
            version,
            counter: cursor.get_u32(),
        }))
    }
}

impl HeaderEntry for Tombstone {
    fn id(&self) -> u32 {
        TOMBSTONE_ID
    }

    fn pack_payload(&self, buf: &mut BytesMut) -> Result<()> {
        if self.version != 1 {
            buf.put_u64(0);
            return Ok(());
        }
        buf.put_u32(self.version);
        buf.put_u32(self.counter);
        Ok(())
    }

    fn print(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        if self.version == 1 {
            write!(out, "v1, id = {}", self.counter)
        } else {
            write!(out, "v{}, unsupported", self.version)
        }
    }

    entry_boilerplate!();
}
