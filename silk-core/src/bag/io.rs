//! Bag files: the bag header entry and the `key || counter` data rows

use super::{Bag, BagFieldType, BagKey, COUNTER_OCTETS, CUSTOM_OCTETS};
use crate::format::FileFormat;
use crate::header::entry::unpack_error;
use crate::header::{ByteOrder, HeaderEntry, BAG_ID};
use crate::iobuf::IoMode;
use crate::stream::{ContentType, Stream};
use crate::{Result, SilkError};
use bytes::{Buf, BufMut, BytesMut};
use std::any::Any;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::path::Path;
use tracing::debug;

/// Counters are 32 bits wide
const VERSION_COUNTER32: u16 = 1;
/// Last version that could not be compressed
const VERSION_NO_COMPR: u16 = 2;
/// Keys are always written as 32 bits
const VERSION_KEY_FIXED: u16 = 3;
/// Key width comes from the bag entry
const VERSION_KEY_VARIES: u16 = 4;

/// Key and counter description stored in a bag file's header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BagEntry {
    key_type: u16,
    key_length: u16,
    counter_type: u16,
    counter_length: u16,
}

impl BagEntry {
    pub fn new(key_type: u16, key_length: u16, counter_type: u16, counter_length: u16) -> Self {
        Self {
            key_type,
            key_length,
            counter_type,
            counter_length,
        }
    }

    pub fn key_type(&self) -> BagFieldType {
        BagFieldType(self.key_type)
    }

    pub fn key_length(&self) -> u16 {
        self.key_length
    }

    pub fn counter_type(&self) -> BagFieldType {
        BagFieldType(self.counter_type)
    }

    pub fn counter_length(&self) -> u16 {
        self.counter_length
    }

    pub(crate) fn unpack(id: u32, payload: &[u8]) -> Result<Box<dyn HeaderEntry>> {
        if payload.len() != 8 {
            return Err(unpack_error(
                id,
                format!("bag payload is {} bytes, expected 8", payload.len()),
            ));
        }
        let mut cursor = payload;
        Ok(Box::new(Self {
            key_type: cursor.get_u16(),
            key_length: cursor.get_u16(),
            counter_type: cursor.get_u16(),
            counter_length: cursor.get_u16(),
        }))
    }
}

fn print_field(out: &mut dyn fmt::Write, kind: &str, id: u16, len: u16) -> fmt::Result {
    match BagFieldType(id).name() {
        Some(name) => write!(out, "{}: {} @ {} octets", kind, name, len),
        None => write!(out, "{}: UNKNOWN[{}] @ {} octets", kind, id, len),
    }
}

impl HeaderEntry for BagEntry {
    fn id(&self) -> u32 {
        BAG_ID
    }

    fn pack_payload(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u16(self.key_type);
        buf.put_u16(self.key_length);
        buf.put_u16(self.counter_type);
        buf.put_u16(self.counter_length);
        Ok(())
    }

    fn print(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        print_field(out, "key", self.key_type, self.key_length)?;
        out.write_str("; ")?;
        print_field(out, "counter", self.counter_type, self.counter_length)
    }

    fn clone_entry(&self) -> Box<dyn HeaderEntry> {
        Box::new(*self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Shape of the rows in a bag file
#[derive(Debug, Clone, Copy)]
struct RowLayout {
    key_type: BagFieldType,
    counter_type: BagFieldType,
    key_octets: usize,
    key_read: usize,
    counter_read: usize,
    byte_order: ByteOrder,
}

fn check_width(what: &str, len: usize, max: usize) -> Result<()> {
    if len == 0 || len > max || !len.is_power_of_two() || (len == 8 && max == 16) {
        return Err(SilkError::Header(format!(
            "bag {} length {} is not supported",
            what, len
        )));
    }
    Ok(())
}

/// Read the header of a bag file and work out how its rows are laid out
fn read_layout(stream: &mut Stream) -> Result<RowLayout> {
    stream.check_silk_header(FileFormat::RWBAG, VERSION_COUNTER32, VERSION_KEY_VARIES)?;
    let header = stream.silk_header();
    let version = header.record_version();
    if version <= VERSION_NO_COMPR && header.compression() != 0 {
        return Err(SilkError::Header(format!(
            "bag version {} cannot be compressed",
            version
        )));
    }

    let mut key_read = 4usize;
    let mut counter_read = if version == VERSION_COUNTER32 { 4 } else { 8 };
    let entry = header
        .first_match(BAG_ID)
        .and_then(|e| e.downcast_ref::<BagEntry>())
        .copied();

    let (key_type, counter_type, key_octets) = match entry {
        None if version >= VERSION_KEY_VARIES => {
            return Err(SilkError::Header("bag file has no bag entry".into()))
        }
        None => (BagFieldType::CUSTOM, BagFieldType::CUSTOM, 4),
        Some(entry) => {
            if version >= VERSION_KEY_VARIES {
                key_read = entry.key_length as usize;
                counter_read = entry.counter_length as usize;
            }
            let entry_len = entry.key_length as usize;
            let key_octets = match entry.key_type().octets() {
                None | Some(CUSTOM_OCTETS) => entry_len,
                Some(natural) => natural.min(key_read),
            };
            let key_type = if entry.key_type().is_known() {
                entry.key_type()
            } else {
                BagFieldType::CUSTOM
            };
            let counter_type = if entry.counter_type().is_known() {
                entry.counter_type()
            } else {
                BagFieldType::CUSTOM
            };
            (key_type, counter_type, key_octets)
        }
    };

    check_width("key", key_read, 16)?;
    check_width("key", key_octets, 16)?;
    check_width("counter", counter_read, 8)?;

    Ok(RowLayout {
        key_type,
        counter_type,
        key_octets,
        key_read,
        counter_read,
        byte_order: header.byte_order(),
    })
}

fn read_uint(bytes: &[u8], order: ByteOrder) -> u64 {
    let mut value = 0u64;
    match order {
        ByteOrder::Big => {
            for b in bytes {
                value = (value << 8) | *b as u64;
            }
        }
        ByteOrder::Little => {
            for b in bytes.iter().rev() {
                value = (value << 8) | *b as u64;
            }
        }
    }
    value
}

/// Feed every row of `stream` to `bag` through `add`
fn process_rows(stream: &mut Stream, layout: &RowLayout, bag: &mut Bag) -> Result<u64> {
    let mut row = vec![0u8; layout.key_read + layout.counter_read];
    let mut rows = 0u64;
    let mut zeros = 0u64;
    loop {
        if stream.read_exact_record(&mut row)? == 0 {
            break;
        }
        let (key_bytes, counter_bytes) = row.split_at(layout.key_read);
        let counter = read_uint(counter_bytes, layout.byte_order);
        if counter == 0 {
            if zeros == 0 {
                debug!("Skipping zero counters in {}", stream.pathname());
            }
            zeros += 1;
            continue;
        }
        let key = if layout.key_read == 16 {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(key_bytes);
            BagKey::Ip(IpAddr::V6(Ipv6Addr::from(octets)))
        } else {
            BagKey::U32(read_uint(key_bytes, layout.byte_order) as u32)
        };
        bag.add(key, counter)?;
        rows += 1;
    }
    debug!(
        "Read {} bag rows from {} ({} zero counters skipped)",
        rows,
        stream.pathname(),
        zeros
    );
    Ok(rows)
}

fn open_input(path: &Path) -> Result<Stream> {
    let mut stream = Stream::create(IoMode::Read, ContentType::SilkBinary);
    stream.bind(path)?;
    stream.open()?;
    Ok(stream)
}

impl Bag {
    /// Bag holding the contents of an open bag stream
    pub fn read(stream: &mut Stream) -> Result<Bag> {
        let layout = read_layout(stream)?;
        let mut bag = Bag::create(
            BagFieldType::CUSTOM,
            Some(layout.key_octets),
            BagFieldType::CUSTOM,
        )?;
        bag.key_type = layout.key_type;
        bag.counter_type = layout.counter_type;
        process_rows(stream, &layout, &mut bag)?;
        Ok(bag)
    }

    /// Bag holding the contents of the bag file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Bag> {
        let mut stream = open_input(path.as_ref())?;
        let bag = Bag::read(&mut stream)?;
        stream.close()?;
        Ok(bag)
    }

    /// Add the counters of a bag stream to this bag; returns the rows read
    pub fn add_from_stream(&mut self, stream: &mut Stream) -> Result<u64> {
        let layout = read_layout(stream)?;
        process_rows(stream, &layout, self)
    }

    /// Write the bag to an output stream whose header has not been written.
    ///
    /// Compression and extra header entries may be set on the stream's
    /// header beforehand.
    pub fn write(&self, stream: &mut Stream) -> Result<()> {
        let (version, key_len) = if self.key_octets <= 4 {
            (VERSION_KEY_FIXED, 4usize)
        } else {
            (VERSION_KEY_VARIES, 16usize)
        };

        let header = stream.silk_header_mut();
        header.set_format(FileFormat::RWBAG)?;
        header.set_record_version(version)?;
        header.set_record_length(key_len + COUNTER_OCTETS)?;
        header.set_byte_order(ByteOrder::Big)?;
        header.add_entry(Box::new(BagEntry::new(
            self.key_type.0,
            key_len as u16,
            self.counter_type.0,
            COUNTER_OCTETS as u16,
        )))?;
        stream.write_silk_header()?;

        let mut row = BytesMut::with_capacity(key_len + COUNTER_OCTETS);
        let mut rows = 0u64;
        for (key, counter) in self.iter() {
            row.clear();
            if key_len == 16 {
                row.put_slice(&key.to_ipv6_bytes());
            } else {
                row.put_u32(key.as_u32().unwrap_or(0));
            }
            row.put_u64(counter);
            stream.write(&row)?;
            rows += 1;
        }
        stream.flush()?;
        debug!("Wrote {} bag rows to {}", rows, stream.pathname());
        Ok(())
    }

    /// Write the bag to a new file at `path`
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut stream = Stream::create(IoMode::Write, ContentType::SilkBinary);
        stream.bind(path.as_ref())?;
        stream.open()?;
        self.write(&mut stream)?;
        stream.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionMethod;
    use rand::Rng;
    use tempfile::TempDir;

    fn save_with(bag: &Bag, dir: &TempDir, name: &str, method: CompressionMethod) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut stream = Stream::create(IoMode::Write, ContentType::SilkBinary);
        stream.bind(&path).unwrap();
        stream.open().unwrap();
        stream
            .silk_header_mut()
            .set_compression(method as u8)
            .unwrap();
        bag.write(&mut stream).unwrap();
        stream.close().unwrap();
        path
    }

    #[test]
    fn test_entry_payload_and_print() {
        let entry = BagEntry::new(BagFieldType::SIPV4.0, 4, BagFieldType::RECORDS.0, 8);
        let mut buf = BytesMut::new();
        entry.pack_payload(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 4, 0, 28, 0, 8]);

        let back = BagEntry::unpack(BAG_ID, &buf).unwrap();
        let back = back.downcast_ref::<BagEntry>().unwrap();
        assert_eq!(*back, entry);
        assert_eq!(
            (back as &dyn HeaderEntry).to_display_string(),
            "key: sIPv4 @ 4 octets; counter: records @ 8 octets"
        );

        let odd = BagEntry::new(77, 2, 255, 8);
        assert_eq!(
            (&odd as &dyn HeaderEntry).to_display_string(),
            "key: UNKNOWN[77] @ 2 octets; counter: custom @ 8 octets"
        );
        assert!(BagEntry::unpack(BAG_ID, &[0; 6]).is_err());
    }

    #[test]
    fn test_round_trip_each_width_and_compression() {
        let dir = TempDir::new().unwrap();
        let mut rng = rand::thread_rng();
        let shapes = [
            (BagFieldType::PROTO, 1usize),
            (BagFieldType::DPORT, 2),
            (BagFieldType::SIPV4, 4),
            (BagFieldType::SIPV6, 16),
        ];
        let methods = [
            CompressionMethod::None,
            CompressionMethod::Zlib,
            CompressionMethod::Lzo1x,
            CompressionMethod::Snappy,
        ];
        for (i, (key_type, octets)) in shapes.into_iter().enumerate() {
            let mut bag = Bag::create(key_type, None, BagFieldType::SUM_BYTES).unwrap();
            assert_eq!(bag.key_octets(), octets);
            for _ in 0..500 {
                let key: u32 = rng.gen();
                let key = match octets {
                    1 => BagKey::U8(key as u8),
                    2 => BagKey::U16(key as u16),
                    4 => BagKey::U32(key),
                    _ => BagKey::Ip(IpAddr::V6(Ipv6Addr::from(rng.gen::<u128>()))),
                };
                bag.add(key, rng.gen_range(1..1_000_000)).unwrap();
            }
            for method in methods {
                let path = save_with(&bag, &dir, &format!("b{}-{}.bag", i, method as u8), method);
                let back = Bag::load(&path).unwrap();
                assert_eq!(back.key_type(), key_type);
                assert_eq!(back.counter_type(), BagFieldType::SUM_BYTES);
                assert_eq!(back.key_octets(), octets);
                let a: Vec<_> = bag.iter().collect();
                let b: Vec<_> = back.iter().collect();
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_header_describes_rows() {
        let dir = TempDir::new().unwrap();
        let mut bag = Bag::create(BagFieldType::SPORT, None, BagFieldType::RECORDS).unwrap();
        bag.set(80u16, 3).unwrap();
        let path = save_with(&bag, &dir, "ports.bag", CompressionMethod::None);

        let mut stream = open_input(&path).unwrap();
        let header = stream.read_silk_header().unwrap();
        assert_eq!(header.format(), FileFormat::RWBAG);
        assert_eq!(header.record_version(), VERSION_KEY_FIXED);
        assert_eq!(header.record_length(), 12);
        let entry = header
            .first_match(BAG_ID)
            .and_then(|e| e.downcast_ref::<BagEntry>())
            .copied()
            .unwrap();
        assert_eq!(entry.key_length(), 4);
        assert_eq!(entry.key_type(), BagFieldType::SPORT);

        assert_eq!(header.byte_order(), ByteOrder::Big);
        let data = stream.read_to_end_of_file().unwrap();
        assert_eq!(data, vec![0, 0, 0, 80, 0, 0, 0, 0, 0, 0, 0, 3]);
    }

    fn native_flag() -> u8 {
        match ByteOrder::native() {
            ByteOrder::Big => 1,
            ByteOrder::Little => 0,
        }
    }

    #[test]
    fn test_native_flag_rows_decode_in_host_order() {
        let dir = TempDir::new().unwrap();
        let mut bag = Bag::new();
        bag.set(0x0A000001u32, 3).unwrap();
        let path = save_with(&bag, &dir, "native.bag", CompressionMethod::None);

        let mut bytes = std::fs::read(&path).unwrap();
        let rows = bytes.len() - 12;
        bytes[rows..rows + 4].copy_from_slice(&0x0A000001u32.to_ne_bytes());
        bytes[rows + 4..].copy_from_slice(&3u64.to_ne_bytes());
        bytes[4] = native_flag();
        std::fs::write(&path, &bytes).unwrap();

        let mut stream = open_input(&path).unwrap();
        let layout = read_layout(&mut stream).unwrap();
        assert!(layout.byte_order.is_native());
        let back = Bag::load(&path).unwrap();
        let all: Vec<_> = back.iter().collect();
        assert_eq!(all, vec![(BagKey::U32(0x0A000001), 3)]);
    }

    #[test]
    fn test_foreign_flag_rows_are_swapped() {
        let dir = TempDir::new().unwrap();
        let mut bag = Bag::new();
        bag.set(0x0A000001u32, 3).unwrap();
        let path = save_with(&bag, &dir, "foreign.bag", CompressionMethod::None);

        let mut bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes[4] & 1, 1);
        bytes[4] ^= 1;
        std::fs::write(&path, &bytes).unwrap();

        let mut stream = open_input(&path).unwrap();
        assert_eq!(read_layout(&mut stream).unwrap().byte_order, ByteOrder::Little);
        let back = Bag::load(&path).unwrap();
        assert_eq!(back.get(0x0A000001u32), 0);
        assert_eq!(back.get(0x0100000Au32), 3u64.swap_bytes());
    }

    #[test]
    fn test_add_from_stream_accumulates() {
        let dir = TempDir::new().unwrap();
        let mut bag = Bag::new();
        bag.set(1u32, 2).unwrap();
        bag.set(9u32, 4).unwrap();
        let path = save_with(&bag, &dir, "acc.bag", CompressionMethod::Zlib);

        let mut total = Bag::new();
        total.set(1u32, 1).unwrap();
        for _ in 0..2 {
            let mut stream = open_input(&path).unwrap();
            assert_eq!(total.add_from_stream(&mut stream).unwrap(), 2);
        }
        assert_eq!(total.get(1u32), 5);
        assert_eq!(total.get(9u32), 8);
    }

    #[test]
    fn test_truncated_bag_is_short_read() {
        let dir = TempDir::new().unwrap();
        let mut bag = Bag::new();
        bag.set(1u32, 2).unwrap();
        bag.set(2u32, 2).unwrap();
        let path = save_with(&bag, &dir, "cut.bag", CompressionMethod::None);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();
        assert!(matches!(
            Bag::load(&path),
            Err(SilkError::ShortRead { .. })
        ));
    }

    #[test]
    fn test_non_bag_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flows.rw");
        let mut stream = Stream::create(IoMode::Write, ContentType::SilkFlow);
        stream.bind(&path).unwrap();
        stream.open().unwrap();
        stream.write_silk_header().unwrap();
        stream.close().unwrap();
        assert!(matches!(
            Bag::load(&path),
            Err(SilkError::UnsupportedFormat(_))
        ));
    }
}
