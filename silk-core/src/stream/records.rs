//! Flow records through a stream

use super::{ContentType, Stream};
use crate::config::runtime;
use crate::header::RECORD_VERSION_ANY;
use crate::iobuf::IoMode;
use crate::record::codec::{self, RecordCodec};
use crate::record::{correct_icmp_ports, FlowRecord, Ipv6Policy};
use crate::{Result, SilkError};
use std::borrow::Cow;
use tracing::debug;

impl Stream {
    /// Settle the record layout once the header's format is known.
    ///
    /// Writers pick a record version and length for flow formats. Readers
    /// check the stored length against the codec; a flow format without a
    /// codec can still be opened, but reading records from it fails.
    pub(super) fn prepare_records(&mut self) -> Result<()> {
        let format = self.header.format();
        if !format.is_flow() {
            self.record_length = self.header.record_length().max(1);
            return Ok(());
        }

        if self.mode == IoMode::Write {
            if self.header.record_version() == RECORD_VERSION_ANY {
                let version = codec::default_version(format)
                    .ok_or(SilkError::UnsupportedFormat(format.id()))?;
                self.header.set_record_version(version)?;
            }
            let codec = codec::lookup(format, self.header.record_version())?;
            self.header.set_record_length(codec.length)?;
            self.codec = Some(codec);
            self.record_length = codec.length;
            return Ok(());
        }

        match codec::lookup(format, self.header.record_version()) {
            Ok(codec) => {
                if self.header.record_length() != codec.length {
                    return Err(SilkError::RecordLength {
                        expected: codec.length,
                        actual: self.header.record_length(),
                    });
                }
                self.codec = Some(codec);
                self.record_length = codec.length;
            }
            Err(e) => {
                debug!("No record codec for {}: {}", self.pathname(), e);
                self.record_length = self.header.record_length().max(1);
            }
        }
        Ok(())
    }

    fn flow_codec(&self) -> Result<&'static RecordCodec> {
        if self.content != ContentType::SilkFlow {
            return Err(SilkError::RequireSilkFlow);
        }
        match self.codec {
            Some(codec) => Ok(codec),
            None => codec::lookup(self.header.format(), self.header.record_version()),
        }
    }

    /// Next record that passes the IPv6 policy, or `None` at end of file
    pub fn read_record(&mut self) -> Result<Option<FlowRecord>> {
        if self.mode != IoMode::Read {
            return Err(SilkError::UnsupportedIoMode("stream is not readable".into()));
        }
        self.ensure_data_ready()?;
        let codec = self.flow_codec()?;
        if self.is_eof {
            return Ok(None);
        }

        let byte_order = self.header.byte_order();
        let file_version = self.header.file_version();
        let format = self.header.format();
        let fix_icmp = runtime().icmp_port_fix;
        let mut buf = vec![0u8; codec.length];

        loop {
            let got = self.read_exact_record(&mut buf)?;
            if got == 0 {
                self.is_eof = true;
                return Ok(None);
            }

            let mut rec = (codec.unpack)(&buf, byte_order)?;
            if fix_icmp {
                correct_icmp_ports(&mut rec, file_version, format);
            }
            if let Some(copy) = self.copy_input.as_mut() {
                copy.write_record(&rec)?;
            }
            self.record_count += 1;

            match self.ipv6_policy {
                Ipv6Policy::Mix => {}
                Ipv6Policy::Ignore => {
                    if rec.is_ipv6() {
                        continue;
                    }
                }
                Ipv6Policy::AsV4 => {
                    if rec.is_ipv6() && !rec.convert_to_ipv4() {
                        continue;
                    }
                }
                Ipv6Policy::Force => {
                    if !rec.is_ipv6() {
                        rec.convert_to_ipv6();
                    }
                }
                Ipv6Policy::Only => {
                    if !rec.is_ipv6() {
                        continue;
                    }
                }
            }
            return Ok(Some(rec));
        }
    }

    /// Fill `buf` with one record; 0 at a clean end of file
    pub(crate) fn read_exact_record(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_data_ready()?;
        let iobuf = self.iobuf_mut()?;
        let mut got = 0;
        while got < buf.len() {
            let n = iobuf.read(&mut buf[got..])?;
            if n == 0 {
                break;
            }
            got += n;
        }
        if got != 0 && got != buf.len() {
            return Err(SilkError::ShortRead {
                expected: buf.len(),
                actual: got,
            });
        }
        Ok(got)
    }

    /// Write one record, applying the IPv6 policy.
    ///
    /// Records the policy drops are not an error.
    pub fn write_record(&mut self, rec: &FlowRecord) -> Result<()> {
        if !self.mode.is_writer() {
            return Err(SilkError::UnsupportedIoMode("stream is not writable".into()));
        }
        self.ensure_data_ready()?;
        let codec = self.flow_codec()?;
        let supports_ipv6 = self.supports_ipv6();

        let mut rec = Cow::Borrowed(rec);
        match self.ipv6_policy {
            Ipv6Policy::Ignore => {
                if rec.is_ipv6() {
                    return Ok(());
                }
            }
            Ipv6Policy::AsV4 => {
                if rec.is_ipv6() && !rec.to_mut().convert_to_ipv4() {
                    return Ok(());
                }
            }
            Ipv6Policy::Mix => {
                if rec.is_ipv6() && !supports_ipv6 {
                    return Err(SilkError::UnsupportedIpv6);
                }
            }
            Ipv6Policy::Force => {
                if !supports_ipv6 {
                    return Err(SilkError::UnsupportedIpv6);
                }
                if !rec.is_ipv6() {
                    rec.to_mut().convert_to_ipv6();
                }
            }
            Ipv6Policy::Only => {
                if !rec.is_ipv6() {
                    return Ok(());
                }
                if !supports_ipv6 {
                    return Err(SilkError::UnsupportedIpv6);
                }
            }
        }

        let mut buf = vec![0u8; codec.length];
        (codec.pack)(&rec, self.header.byte_order(), &mut buf)?;
        let n = self.iobuf_mut()?.write(&buf)?;
        if n != buf.len() {
            return Err(SilkError::ShortWrite);
        }
        self.record_count += 1;
        Ok(())
    }

    /// Pass over up to `count` records, returning how many were skipped
    pub fn skip_records(&mut self, count: u64) -> Result<u64> {
        if self.mode != IoMode::Read {
            return Err(SilkError::UnsupportedIoMode("stream is not readable".into()));
        }
        self.ensure_data_ready()?;
        let codec = self.flow_codec()?;

        if self.ipv6_policy != Ipv6Policy::Mix || self.copy_input.is_some() {
            let mut skipped = 0;
            while skipped < count && self.read_record()?.is_some() {
                skipped += 1;
            }
            return Ok(skipped);
        }

        let len = codec.length as u64;
        let bytes = self.iobuf_mut()?.skip(count.saturating_mul(len))?;
        if bytes % len != 0 {
            return Err(SilkError::ShortRead {
                expected: len as usize,
                actual: (bytes % len) as usize,
            });
        }
        let skipped = bytes / len;
        if skipped < count {
            self.is_eof = true;
        }
        self.record_count += skipped;
        Ok(skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::compression::CompressionMethod;
    use crate::format::FileFormat;
    use crate::iobuf::MemoryDescriptor;
    use crate::record::{FlowRecord, Ipv6Policy, IPPROTO_TCP};
    use std::net::IpAddr;
    use tempfile::TempDir;

    fn flow(i: u32, sip: &str) -> FlowRecord {
        FlowRecord {
            start_time: 1_300_000_000_000 + i as i64 * 1000,
            elapsed: 500 + i,
            sport: 1024 + i as u16,
            dport: 80,
            proto: IPPROTO_TCP,
            flags: 0x1B,
            packets: 10 + i,
            bytes: 1000 + i,
            sip: sip.parse().unwrap(),
            dip: "192.0.2.7".parse().unwrap(),
            nhip: "0.0.0.0".parse().unwrap(),
            sensor: 3,
            ..FlowRecord::default()
        }
    }

    fn write_flows(
        path: &Path,
        format: FileFormat,
        method: CompressionMethod,
        records: &[FlowRecord],
    ) {
        let mut out = Stream::create(IoMode::Write, ContentType::SilkFlow);
        out.bind(path).unwrap();
        out.open().unwrap();
        let hdr = out.silk_header_mut();
        hdr.set_format(format).unwrap();
        hdr.set_compression(method.id()).unwrap();
        hdr.add_invocation(false, &["rwcat", "--compression-method=zlib"])
            .unwrap();
        for rec in records {
            out.write_record(rec).unwrap();
        }
        assert_eq!(out.record_count(), records.len() as u64);
        out.close().unwrap();
    }

    fn read_flows(path: &Path, policy: Ipv6Policy) -> Vec<FlowRecord> {
        let mut input = Stream::create(IoMode::Read, ContentType::SilkFlow);
        input.bind(path).unwrap();
        input.open().unwrap();
        input.set_ipv6_policy(policy).unwrap();
        let mut out = Vec::new();
        while let Some(rec) = input.read_record().unwrap() {
            out.push(rec);
        }
        input.close().unwrap();
        out
    }

    #[test]
    fn test_flow_roundtrip_each_compression() {
        let dir = TempDir::new().unwrap();
        let records: Vec<_> = (0..5000).map(|i| flow(i, "10.1.2.3")).collect();

        for method in [
            CompressionMethod::None,
            CompressionMethod::Zlib,
            CompressionMethod::Lzo1x,
            CompressionMethod::Snappy,
        ] {
            for format in [FileFormat::RWGENERIC, FileFormat::RWIPV6ROUTING] {
                let path = dir.path().join(format!("{}-{}.rw", method, format.id()));
                write_flows(&path, format, method, &records);
                let back = read_flows(&path, Ipv6Policy::Mix);
                assert_eq!(back.len(), records.len());
                for (a, b) in records.iter().zip(&back) {
                    assert_eq!(a.sport, b.sport);
                    assert_eq!(a.bytes, b.bytes);
                    assert_eq!(a.start_time, b.start_time);
                    assert_eq!(a.sip, b.sip);
                }
            }
        }
    }

    #[test]
    fn test_default_format_is_ipv6routing() {
        let mem = MemoryDescriptor::new();
        let mut out = Stream::create(IoMode::Write, ContentType::SilkFlow);
        out.fdopen(Box::new(mem.clone())).unwrap();
        out.write_record(&flow(0, "2001:db8::1")).unwrap();
        assert_eq!(out.silk_header().format(), FileFormat::RWIPV6ROUTING);
        assert_eq!(out.record_length(), 100);
        out.close().unwrap();

        mem.rewind();
        let mut input = Stream::create(IoMode::Read, ContentType::SilkFlow);
        input.fdopen(Box::new(mem)).unwrap();
        let rec = input.read_record().unwrap().unwrap();
        assert_eq!(rec.sip, "2001:db8::1".parse::<IpAddr>().unwrap());
        assert!(input.read_record().unwrap().is_none());
        assert!(input.read_record().unwrap().is_none());
    }

    #[test]
    fn test_ipv6_policies_on_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mixed.rw");
        let records = vec![
            flow(0, "10.0.0.1"),
            flow(1, "2001:db8::2"),
            flow(2, "::ffff:10.0.0.3"),
        ];
        write_flows(
            &path,
            FileFormat::RWIPV6ROUTING,
            CompressionMethod::Zlib,
            &records,
        );

        assert_eq!(read_flows(&path, Ipv6Policy::Mix).len(), 3);

        let ignore = read_flows(&path, Ipv6Policy::Ignore);
        assert_eq!(ignore.len(), 1);
        assert_eq!(ignore[0].sport, 1024);

        let as_v4 = read_flows(&path, Ipv6Policy::AsV4);
        assert_eq!(as_v4.len(), 2);
        assert_eq!(as_v4[1].sip, "10.0.0.3".parse::<IpAddr>().unwrap());

        let only = read_flows(&path, Ipv6Policy::Only);
        assert_eq!(only.len(), 2);

        let force = read_flows(&path, Ipv6Policy::Force);
        assert!(force.iter().all(|r| r.is_ipv6()));
    }

    #[test]
    fn test_ipv6_policies_on_write() {
        let mem = MemoryDescriptor::new();
        let mut out = Stream::create(IoMode::Write, ContentType::SilkFlow);
        out.fdopen(Box::new(mem)).unwrap();
        out.silk_header_mut().set_format(FileFormat::RWGENERIC).unwrap();

        assert!(matches!(
            out.write_record(&flow(0, "2001:db8::1")),
            Err(SilkError::UnsupportedIpv6)
        ));

        out.set_ipv6_policy(Ipv6Policy::Ignore).unwrap();
        out.write_record(&flow(0, "2001:db8::1")).unwrap();
        out.write_record(&flow(1, "10.0.0.1")).unwrap();
        assert_eq!(out.record_count(), 1);

        out.set_ipv6_policy(Ipv6Policy::Force).unwrap();
        assert!(matches!(
            out.write_record(&flow(2, "10.0.0.1")),
            Err(SilkError::UnsupportedIpv6)
        ));
    }

    #[test]
    fn test_copy_input_receives_every_record() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.rw");
        let copy = dir.path().join("copy.rw");
        let records: Vec<_> = (0..10).map(|i| flow(i, "10.0.0.9")).collect();
        write_flows(&src, FileFormat::RWGENERIC, CompressionMethod::None, &records);

        let mut sink = Stream::create(IoMode::Write, ContentType::SilkFlow);
        sink.bind(&copy).unwrap();
        sink.open().unwrap();
        sink.silk_header_mut().set_format(FileFormat::RWGENERIC).unwrap();

        let mut input = Stream::create(IoMode::Read, ContentType::SilkFlow);
        input.bind(&src).unwrap();
        input.open().unwrap();
        input.set_copy_input(sink).unwrap();
        let mut n = 0;
        while input.read_record().unwrap().is_some() {
            n += 1;
        }
        assert_eq!(n, 10);
        let mut sink = input.take_copy_input().unwrap();
        assert_eq!(sink.record_count(), 10);
        sink.close().unwrap();
        input.close().unwrap();

        let copied = read_flows(&copy, Ipv6Policy::Mix);
        assert_eq!(copied.len(), 10);
        assert_eq!(copied[9].sport, records[9].sport);
        assert_eq!(copied[9].packets, records[9].packets);
    }

    #[test]
    fn test_copy_input_after_read_rejected() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.rw");
        write_flows(
            &src,
            FileFormat::RWGENERIC,
            CompressionMethod::None,
            &[flow(0, "10.0.0.1")],
        );
        let mut input = Stream::create(IoMode::Read, ContentType::SilkFlow);
        input.bind(&src).unwrap();
        input.open().unwrap();
        input.read_record().unwrap();

        let mut sink = Stream::create(IoMode::Write, ContentType::SilkFlow);
        sink.fdopen(Box::new(MemoryDescriptor::new())).unwrap();
        assert!(matches!(input.set_copy_input(sink), Err(SilkError::PrevData)));
    }

    #[test]
    fn test_skip_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("skip.rw");
        let records: Vec<_> = (0..100).map(|i| flow(i, "10.0.0.1")).collect();
        write_flows(&path, FileFormat::RWGENERIC, CompressionMethod::Zlib, &records);

        let mut input = Stream::create(IoMode::Read, ContentType::SilkFlow);
        input.bind(&path).unwrap();
        input.open().unwrap();
        assert_eq!(input.skip_records(40).unwrap(), 40);
        assert_eq!(input.read_record().unwrap().unwrap().sport, 1024 + 40);
        assert_eq!(input.skip_records(1000).unwrap(), 59);
        assert!(input.read_record().unwrap().is_none());
    }

    #[test]
    fn test_append_adds_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("append.rw");
        let first: Vec<_> = (0..3).map(|i| flow(i, "10.0.0.1")).collect();
        write_flows(&path, FileFormat::RWGENERIC, CompressionMethod::Zlib, &first);

        let mut app = Stream::create(IoMode::Append, ContentType::SilkFlow);
        app.bind(&path).unwrap();
        app.open().unwrap();
        app.read_silk_header().unwrap();
        app.write_record(&flow(3, "10.0.0.1")).unwrap();
        app.close().unwrap();

        let all = read_flows(&path, Ipv6Policy::Mix);
        assert_eq!(all.len(), 4);
        assert_eq!(all[3].sport, 1027);
    }

    #[test]
    fn test_truncated_record_is_short_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trunc.rw");
        write_flows(
            &path,
            FileFormat::RWGENERIC,
            CompressionMethod::None,
            &[flow(0, "10.0.0.1"), flow(1, "10.0.0.1")],
        );
        let len = std::fs::metadata(&path).unwrap().len();
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 10)
            .unwrap();

        let mut input = Stream::create(IoMode::Read, ContentType::SilkFlow);
        input.bind(&path).unwrap();
        input.open().unwrap();
        assert!(input.read_record().unwrap().is_some());
        assert!(matches!(
            input.read_record(),
            Err(SilkError::ShortRead { .. })
        ));
    }
}
