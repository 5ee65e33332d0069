//! AggBag files: the aggbag header entry and packed `key || counter` rows

use super::{AggBag, AggBagFieldType};
use crate::format::FileFormat;
use crate::header::entry::unpack_error;
use crate::header::{ByteOrder, HeaderEntry, AGGBAG_ID};
use crate::iobuf::IoMode;
use crate::stream::{ContentType, Stream};
use crate::{Result, SilkError};
use bytes::{Buf, BufMut, BytesMut};
use std::any::Any;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Only version of the aggbag header entry
const ENTRY_VERSION: u32 = 1;
/// Only record version of aggbag files
const RECORD_VERSION: u16 = 1;

/// Field list stored in an aggbag file's header: key fields first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggBagEntry {
    version: u32,
    key_count: u16,
    fields: Vec<u16>,
}

impl AggBagEntry {
    fn from_bag(bag: &AggBag) -> Self {
        let fields: Vec<u16> = bag
            .key_fields()
            .chain(bag.counter_fields())
            .map(|f| f.0)
            .collect();
        Self {
            version: ENTRY_VERSION,
            key_count: bag.key_fields().count() as u16,
            fields,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn key_fields(&self) -> impl Iterator<Item = AggBagFieldType> + '_ {
        self.fields[..self.key_count as usize]
            .iter()
            .map(|id| AggBagFieldType(*id))
    }

    pub fn counter_fields(&self) -> impl Iterator<Item = AggBagFieldType> + '_ {
        self.fields[self.key_count as usize..]
            .iter()
            .map(|id| AggBagFieldType(*id))
    }

    pub(crate) fn unpack(id: u32, payload: &[u8]) -> Result<Box<dyn HeaderEntry>> {
        let mut cursor = payload;
        if cursor.remaining() < 8 {
            return Err(unpack_error(id, "aggbag payload is too short"));
        }
        let version = cursor.get_u32();
        if version != ENTRY_VERSION {
            return Err(unpack_error(
                id,
                format!("aggbag entry version {} is not supported", version),
            ));
        }
        let field_count = cursor.get_u16();
        let key_count = cursor.get_u16();
        if field_count < 2 || key_count == 0 || key_count >= field_count {
            return Err(unpack_error(
                id,
                format!("{} key fields of {} is not valid", key_count, field_count),
            ));
        }
        if cursor.remaining() != 2 * field_count as usize {
            return Err(unpack_error(
                id,
                format!(
                    "{} bytes of field ids for {} fields",
                    cursor.remaining(),
                    field_count
                ),
            ));
        }
        let fields = (0..field_count).map(|_| cursor.get_u16()).collect();
        Ok(Box::new(Self {
            version,
            key_count,
            fields,
        }))
    }
}

fn print_fields(
    out: &mut dyn fmt::Write,
    fields: impl Iterator<Item = AggBagFieldType>,
) -> fmt::Result {
    let mut sep = ' ';
    for f in fields {
        write!(out, "{}{}", sep, f)?;
        sep = ',';
    }
    Ok(())
}

impl HeaderEntry for AggBagEntry {
    fn id(&self) -> u32 {
        AGGBAG_ID
    }

    fn pack_payload(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u32(self.version);
        buf.put_u16(self.fields.len() as u16);
        buf.put_u16(self.key_count);
        for id in &self.fields {
            buf.put_u16(*id);
        }
        Ok(())
    }

    fn print(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        out.write_str("key:")?;
        print_fields(out, self.key_fields())?;
        out.write_str("; counter:")?;
        print_fields(out, self.counter_fields())
    }

    fn clone_entry(&self) -> Box<dyn HeaderEntry> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Extra header entries written with an aggbag
#[derive(Debug, Clone, Default)]
pub struct AggBagOptions {
    /// Command line recorded as an invocation entry
    pub invocation: Vec<String>,
    /// Leave the invocation entry out
    pub invocation_strip: bool,
    /// Annotation entries
    pub notes: Vec<String>,
}

/// Swap every multi-octet field of `row` between byte orders
fn swap_fields(bag: &AggBag, row: &mut [u8]) {
    let key_octets = bag.key_layout.as_ref().map_or(0, |l| l.octets());
    let (key, counter) = row.split_at_mut(key_octets);
    let layouts = [(&bag.key_layout, key), (&bag.counter_layout, counter)];
    for (layout, bytes) in layouts {
        let Some(layout) = layout else { continue };
        for field in layout.fields() {
            if matches!(field.octets, 2 | 4 | 8) {
                bytes[field.offset..field.offset + field.octets].reverse();
            }
        }
    }
}

impl AggBag {
    /// Aggregate bag holding the contents of an open aggbag stream
    pub fn read(stream: &mut Stream) -> Result<AggBag> {
        stream.check_silk_header(FileFormat::AGGREGATEBAG, RECORD_VERSION, RECORD_VERSION)?;
        let header = stream.silk_header();
        let entry = header
            .first_match(AGGBAG_ID)
            .and_then(|e| e.downcast_ref::<AggBagEntry>())
            .ok_or_else(|| SilkError::Header("aggbag file has no aggbag entry".into()))?;
        let swap = !header.is_native_byte_order();
        let record_length = header.record_length();

        let keys: Vec<_> = entry.key_fields().collect();
        let counters: Vec<_> = entry.counter_fields().collect();
        let mut bag = AggBag::new();
        bag.set_key_fields(&keys)?;
        bag.set_counter_fields(&counters)?;
        let (key_layout, counter_layout) = bag.layouts()?;
        let key_octets = key_layout.octets();
        let row_length = key_octets + counter_layout.octets();
        if row_length != record_length {
            return Err(SilkError::RecordLength {
                expected: row_length,
                actual: record_length,
            });
        }
        bag.fix_fields();

        let mut row = vec![0u8; row_length];
        let mut rows = 0u64;
        while stream.read_exact_record(&mut row)? != 0 {
            if swap {
                swap_fields(&bag, &mut row);
            }
            let (key, counter) = row.split_at(key_octets);
            bag.insert_raw(key, counter);
            rows += 1;
        }
        debug!("Read {} aggbag rows from {}", rows, stream.pathname());
        Ok(bag)
    }

    /// Aggregate bag holding the contents of the file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<AggBag> {
        let mut stream = Stream::create(IoMode::Read, ContentType::SilkBinary);
        stream.bind(path.as_ref())?;
        stream.open()?;
        let bag = AggBag::read(&mut stream)?;
        stream.close()?;
        Ok(bag)
    }

    /// Write to an output stream whose header has not been written
    pub fn write(&self, stream: &mut Stream) -> Result<()> {
        self.write_with(stream, &AggBagOptions::default())
    }

    /// Write with extra header entries.
    ///
    /// Rows whose counter is all zero are left out. Rows are written as
    /// held in memory under a native byte order flag; a reader on a host
    /// of the other order swaps each multi-octet field.
    pub fn write_with(&self, stream: &mut Stream, options: &AggBagOptions) -> Result<()> {
        let (key_layout, counter_layout) = self.layouts()?;
        let key_octets = key_layout.octets();
        let row_length = key_octets + counter_layout.octets();

        let header = stream.silk_header_mut();
        header.set_byte_order(ByteOrder::native())?;
        header.set_format(FileFormat::AGGREGATEBAG)?;
        header.set_record_version(RECORD_VERSION)?;
        header.set_record_length(row_length)?;
        header.add_entry(Box::new(AggBagEntry::from_bag(self)))?;
        if !options.invocation_strip && !options.invocation.is_empty() {
            header.add_invocation(true, &options.invocation)?;
        }
        for note in &options.notes {
            header.add_annotation(note.as_str())?;
        }
        stream.write_silk_header()?;

        let mut row = Vec::with_capacity(row_length);
        let mut rows = 0u64;
        for (key, counter) in self.tree.iter() {
            if counter.iter().all(|b| *b == 0) {
                continue;
            }
            row.clear();
            row.extend_from_slice(key);
            row.extend_from_slice(counter);
            stream.write(&row)?;
            rows += 1;
        }
        stream.flush()?;
        debug!("Wrote {} aggbag rows to {}", rows, stream.pathname());
        Ok(())
    }

    /// Write to a new file at `path`
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
    use super::super::Aggregate;
    use super::*;
    use crate::compression::CompressionMethod;
    use crate::header::{ANNOTATION_ID, INVOCATION_ID};
    use std::net::IpAddr;
    use std::sync::Arc;
    use tempfile::TempDir;
    use AggBagFieldType as F;

    fn counter(bag: &AggBag, bytes: u64, records: u64) -> Aggregate {
        let layout = bag.counter_layout().unwrap();
        let mut c = bag.new_counter().unwrap();
        c.set_unsigned(layout.position(F::SUM_BYTES).unwrap(), bytes)
            .unwrap();
        c.set_unsigned(layout.position(F::RECORDS).unwrap(), records)
            .unwrap();
        c
    }

    fn key(bag: &AggBag, port: u64) -> Aggregate {
        let mut k = bag.new_key().unwrap();
        k.set_ipaddr(0, IpAddr::from([1, 2, 3, 4])).unwrap();
        k.set_unsigned(1, port).unwrap();
        k
    }

    fn output(path: &Path, method: CompressionMethod) -> Stream {
        let mut stream = Stream::create(IoMode::Write, ContentType::SilkBinary);
        stream.bind(path).unwrap();
        stream.open().unwrap();
        stream
            .silk_header_mut()
            .set_compression(method as u8)
            .unwrap();
        stream
    }

    #[test]
    fn test_write_then_read_rows() {
        let dir = TempDir::new().unwrap();
        let mut bag =
            AggBag::create(&[F::SIPV4, F::DPORT], &[F::SUM_BYTES, F::RECORDS]).unwrap();
        bag.add(&key(&bag, 80), &counter(&bag, 1000, 3)).unwrap();
        bag.add(&key(&bag, 443), &counter(&bag, 500, 1)).unwrap();
        bag.set(&key(&bag, 8080), &counter(&bag, 0, 0)).unwrap();

        let methods = [
            CompressionMethod::None,
            CompressionMethod::Zlib,
            CompressionMethod::Lzo1x,
            CompressionMethod::Snappy,
        ];
        for method in methods {
            let path = dir.path().join(format!("flows-{}.aggbag", method as u8));
            let mut stream = output(&path, method);
            bag.write(&mut stream).unwrap();
            stream.close().unwrap();

            let back = AggBag::load(&path).unwrap();
            assert!(Arc::ptr_eq(
                back.key_layout().unwrap(),
                bag.key_layout().unwrap()
            ));
            let ip = IpAddr::from([1, 2, 3, 4]);
            assert_eq!(rows(&back), vec![(ip, 80, 1000, 3), (ip, 443, 500, 1)]);
            assert!(back.has_fixed_fields());
        }
    }

    #[test]
    fn test_header_entry_and_options() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("opts.aggbag");
        let bag = AggBag::create(&[F::PROTO], &[F::RECORDS]).unwrap();
        let options = AggBagOptions {
            invocation: vec!["/usr/bin/rwaggbag".into(), "--key=protocol".into()],
            invocation_strip: false,
            notes: vec!["hourly rollup".into()],
        };
        let mut stream = output(&path, CompressionMethod::None);
        bag.write_with(&mut stream, &options).unwrap();
        stream.close().unwrap();

        let mut stream = Stream::create(IoMode::Read, ContentType::SilkBinary);
        stream.bind(&path).unwrap();
        stream.open().unwrap();
        let header = stream.read_silk_header().unwrap();
        assert_eq!(header.format(), FileFormat::AGGREGATEBAG);
        assert_eq!(header.record_length(), 9);
        let entry = header.first_match(AGGBAG_ID).unwrap();
        assert_eq!(entry.to_display_string(), "key: protocol; counter: records");
        assert_eq!(
            header
                .first_match(INVOCATION_ID)
                .unwrap()
                .to_display_string(),
            "rwaggbag --key=protocol"
        );
        assert!(header.first_match(ANNOTATION_ID).is_some());
    }

    #[test]
    fn test_entry_unpack_validation() {
        let bag = AggBag::create(&[F::SIPV4, F::DPORT], &[F::RECORDS]).unwrap();
        let entry = AggBagEntry::from_bag(&bag);
        let mut buf = BytesMut::new();
        entry.pack_payload(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 1, 0, 3, 0, 2, 0, 0, 0, 3, 0xC0, 0]);

        let back = AggBagEntry::unpack(AGGBAG_ID, &buf).unwrap();
        assert_eq!(back.downcast_ref::<AggBagEntry>(), Some(&entry));

        let mut bad_version = buf.to_vec();
        bad_version[3] = 2;
        assert!(AggBagEntry::unpack(AGGBAG_ID, &bad_version).is_err());
        let mut all_keys = buf.to_vec();
        all_keys[7] = 3;
        assert!(AggBagEntry::unpack(AGGBAG_ID, &all_keys).is_err());
        assert!(AggBagEntry::unpack(AGGBAG_ID, &buf[..buf.len() - 2]).is_err());
    }

    #[test]
    fn test_write_needs_both_layouts() {
        let dir = TempDir::new().unwrap();
        let mut bag = AggBag::new();
        bag.set_key_fields(&[F::SPORT]).unwrap();
        let mut stream = output(&dir.path().join("x"), CompressionMethod::None);
        assert!(matches!(
            bag.write(&mut stream),
            Err(SilkError::UndefinedCounter)
        ));
    }

    fn rows(bag: &AggBag) -> Vec<(IpAddr, u64, u64, u64)> {
        bag.iter()
            .map(|(k, c)| {
                let layout = c.layout();
                (
                    k.get_ipaddr(0).unwrap(),
                    k.get_unsigned(1).unwrap(),
                    c.get_unsigned(layout.position(F::SUM_BYTES).unwrap()).unwrap(),
                    c.get_unsigned(layout.position(F::RECORDS).unwrap()).unwrap(),
                )
            })
            .collect()
    }

    /// One-row aggbag file; returns its bytes
    fn single_row_file(path: &Path) -> Vec<u8> {
        let mut bag =
            AggBag::create(&[F::SIPV4, F::DPORT], &[F::SUM_BYTES, F::RECORDS]).unwrap();
        bag.add(&key(&bag, 80), &counter(&bag, 1000, 3)).unwrap();
        let mut stream = output(path, CompressionMethod::None);
        bag.write(&mut stream).unwrap();
        stream.close().unwrap();
        std::fs::read(path).unwrap()
    }

    #[test]
    fn test_native_flag_rows_read_verbatim() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("native.aggbag");
        let mut bytes = single_row_file(&path);
        let native_flag = match ByteOrder::native() {
            ByteOrder::Big => 1,
            ByteOrder::Little => 0,
        };
        assert_eq!(bytes[4] & 1, native_flag);

        bytes[4] = native_flag;
        std::fs::write(&path, &bytes).unwrap();
        let back = AggBag::load(&path).unwrap();
        let ip = IpAddr::from([1, 2, 3, 4]);
        assert_eq!(rows(&back), vec![(ip, 80, 1000, 3)]);
    }

    #[test]
    fn test_foreign_flag_rows_are_swapped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foreign.aggbag");
        let mut bytes = single_row_file(&path);
        bytes[4] ^= 1;
        std::fs::write(&path, &bytes).unwrap();

        let back = AggBag::load(&path).unwrap();
        let ip = IpAddr::from([4, 3, 2, 1]);
        assert_eq!(
            rows(&back),
            vec![(ip, 0x5000, 1000u64.swap_bytes(), 3u64.swap_bytes())]
        );
    }

    #[test]
    fn test_swap_fields_reverses_multi_octet_fields() {
        let bag = AggBag::create(&[F::SPORT, F::PROTO], &[F::RECORDS]).unwrap();
        let mut row = vec![0x50, 0x00, 6, 3, 0, 0, 0, 0, 0, 0, 0];
        swap_fields(&bag, &mut row);
        assert_eq!(row, vec![0x00, 0x50, 6, 0, 0, 0, 0, 0, 0, 0, 3]);
    }
}
