//! Fixed-length record layouts
//!
//! Integer fields follow the byte order named in the file header. The
//! 16-byte addresses of the IPv6 layouts are always in network order.

use super::{FlowRecord, TCPSTATE_IPV6};
use crate::format::FileFormat;
use crate::header::ByteOrder;
use crate::{Result, SilkError};
use bytes::{Buf, BufMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Decode one record from exactly `length` bytes
pub type UnpackRecordFn = fn(&[u8], ByteOrder) -> Result<FlowRecord>;
/// Encode one record into exactly `length` bytes
pub type PackRecordFn = fn(&FlowRecord, ByteOrder, &mut [u8]) -> Result<()>;

/// Packer and unpacker for one (format, record version) pair
#[derive(Debug)]
pub struct RecordCodec {
    pub format: FileFormat,
    pub version: u16,
    pub length: usize,
    pub unpack: UnpackRecordFn,
    pub pack: PackRecordFn,
}

static CODECS: &[RecordCodec] = &[
    RecordCodec {
        format: FileFormat::RWGENERIC,
        version: 5,
        length: GENERIC_V5_LEN,
        unpack: unpack_generic_v5,
        pack: pack_generic_v5,
    },
    RecordCodec {
        format: FileFormat::RWIPV6ROUTING,
        version: 3,
        length: IPV6ROUTING_V3_LEN,
        unpack: unpack_ipv6routing_v3,
        pack: pack_ipv6routing_v3,
    },
];

/// Codec for `format` at `version`
pub fn lookup(format: FileFormat, version: u16) -> Result<&'static RecordCodec> {
    if !format.is_flow() {
        return Err(SilkError::UnsupportedFormat(format.id()));
    }
    CODECS
        .iter()
        .find(|c| c.format == format && c.version == version)
        .ok_or(SilkError::UnsupportedVersion {
            format: format.id(),
            version,
        })
}

/// Highest record version implemented for `format`
pub fn default_version(format: FileFormat) -> Option<u16> {
    CODECS
        .iter()
        .filter(|c| c.format == format)
        .map(|c| c.version)
        .max()
}

fn check_len(buf: &[u8], expected: usize) -> Result<()> {
    if buf.len() != expected {
        return Err(SilkError::RecordLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Integer reads in the file's byte order
struct Fields<'a> {
    buf: &'a [u8],
    order: ByteOrder,
}

impl Fields<'_> {
    fn u8(&mut self) -> u8 {
        self.buf.get_u8()
    }

    fn u16(&mut self) -> u16 {
        match self.order {
            ByteOrder::Big => self.buf.get_u16(),
            ByteOrder::Little => self.buf.get_u16_le(),
        }
    }

    fn u32(&mut self) -> u32 {
        match self.order {
            ByteOrder::Big => self.buf.get_u32(),
            ByteOrder::Little => self.buf.get_u32_le(),
        }
    }

    fn u64(&mut self) -> u64 {
        match self.order {
            ByteOrder::Big => self.buf.get_u64(),
            ByteOrder::Little => self.buf.get_u64_le(),
        }
    }

    fn addr16(&mut self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        self.buf.copy_to_slice(&mut octets);
        Ipv6Addr::from(octets)
    }
}

/// Integer writes in the file's byte order
struct FieldsMut<'a> {
    buf: &'a mut [u8],
    order: ByteOrder,
}

impl FieldsMut<'_> {
    fn u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    fn u16(&mut self, v: u16) {
        match self.order {
            ByteOrder::Big => self.buf.put_u16(v),
            ByteOrder::Little => self.buf.put_u16_le(v),
        }
    }

    fn u32(&mut self, v: u32) {
        match self.order {
            ByteOrder::Big => self.buf.put_u32(v),
            ByteOrder::Little => self.buf.put_u32_le(v),
        }
    }

    fn u64(&mut self, v: u64) {
        match self.order {
            ByteOrder::Big => self.buf.put_u64(v),
            ByteOrder::Little => self.buf.put_u64_le(v),
        }
    }

    fn addr16(&mut self, v: Ipv6Addr) {
        self.buf.put_slice(&v.octets());
    }
}

/// Fields shared by both layouts, offsets 0..28
fn get_common(f: &mut Fields<'_>, rec: &mut FlowRecord) {
    rec.start_time = f.u64() as i64;
    rec.elapsed = f.u32();
    rec.sport = f.u16();
    rec.dport = f.u16();
    rec.proto = f.u8();
    rec.flowtype = f.u8();
    rec.sensor = f.u16();
    rec.flags = f.u8();
    rec.init_flags = f.u8();
    rec.rest_flags = f.u8();
    rec.tcp_state = f.u8();
    rec.application = f.u16();
    rec.memo = f.u16();
}

fn put_common(f: &mut FieldsMut<'_>, rec: &FlowRecord, tcp_state: u8) {
    f.u64(rec.start_time as u64);
    f.u32(rec.elapsed);
    f.u16(rec.sport);
    f.u16(rec.dport);
    f.u8(rec.proto);
    f.u8(rec.flowtype);
    f.u16(rec.sensor);
    f.u8(rec.flags);
    f.u8(rec.init_flags);
    f.u8(rec.rest_flags);
    f.u8(tcp_state);
    f.u16(rec.application);
    f.u16(rec.memo);
}

// FT_RWGENERIC v5
//
//   0- 7 sTime ms       8-11 elapsed       12-13 sPort   14-15 dPort
//  16    proto         17    flowtype      18-19 sensor
//  20    flags         21    init_flags    22    rest_flags  23 tcp_state
//  24-25 application   26-27 memo          28-29 input   30-31 output
//  32-35 packets       36-39 bytes
//  40-43 sIP           44-47 dIP           48-51 nhIP

const GENERIC_V5_LEN: usize = 52;

fn unpack_generic_v5(buf: &[u8], order: ByteOrder) -> Result<FlowRecord> {
    check_len(buf, GENERIC_V5_LEN)?;
    let mut f = Fields { buf, order };
    let mut rec = FlowRecord::default();
    get_common(&mut f, &mut rec);
    rec.input = f.u16();
    rec.output = f.u16();
    rec.packets = f.u32();
    rec.bytes = f.u32();
    rec.sip = IpAddr::V4(Ipv4Addr::from(f.u32()));
    rec.dip = IpAddr::V4(Ipv4Addr::from(f.u32()));
    rec.nhip = IpAddr::V4(Ipv4Addr::from(f.u32()));
    rec.clear_stale_tcp_state();
    Ok(rec)
}

fn pack_generic_v5(rec: &FlowRecord, order: ByteOrder, out: &mut [u8]) -> Result<()> {
    check_len(out, GENERIC_V5_LEN)?;
    let (Some(sip), Some(dip), Some(nhip)) = (
        super::to_ipv4(rec.sip),
        super::to_ipv4(rec.dip),
        super::to_ipv4(rec.nhip),
    ) else {
        return Err(SilkError::UnsupportedIpv6);
    };
    let mut f = FieldsMut { buf: out, order };
    put_common(&mut f, rec, rec.tcp_state & !TCPSTATE_IPV6);
    f.u16(rec.input);
    f.u16(rec.output);
    f.u32(rec.packets);
    f.u32(rec.bytes);
    f.u32(u32::from(sip));
    f.u32(u32::from(dip));
    f.u32(u32::from(nhip));
    Ok(())
}

// FT_RWIPV6ROUTING v3
//
//   0-27 as FT_RWGENERIC v5
//  28-31 input     32-39 packets    40-47 bytes
//  48-63 sIP       64-79 dIP        80-95 nhIP     96-99 output
//
// IPv4 records are stored v4-mapped; tcp_state bit 0x80 marks IPv6.

const IPV6ROUTING_V3_LEN: usize = 100;

fn unpack_ipv6routing_v3(buf: &[u8], order: ByteOrder) -> Result<FlowRecord> {
    check_len(buf, IPV6ROUTING_V3_LEN)?;
    let mut f = Fields { buf, order };
    let mut rec = FlowRecord::default();
    get_common(&mut f, &mut rec);
    rec.input = u16::try_from(f.u32()).unwrap_or(u16::MAX);
    rec.packets = u32::try_from(f.u64()).unwrap_or(u32::MAX);
    rec.bytes = u32::try_from(f.u64()).unwrap_or(u32::MAX);
    let sip = f.addr16();
    let dip = f.addr16();
    let nhip = f.addr16();
    rec.output = u16::try_from(f.u32()).unwrap_or(u16::MAX);

    if rec.tcp_state & TCPSTATE_IPV6 != 0 {
        rec.tcp_state &= !TCPSTATE_IPV6;
        rec.sip = IpAddr::V6(sip);
        rec.dip = IpAddr::V6(dip);
        rec.nhip = IpAddr::V6(nhip);
    } else {
        // only the low four octets are meaningful
        let low = |a: Ipv6Addr| {
            let o = a.octets();
            IpAddr::V4(Ipv4Addr::new(o[12], o[13], o[14], o[15]))
        };
        rec.sip = low(sip);
        rec.dip = low(dip);
        rec.nhip = low(nhip);
    }
    Ok(rec)
}

fn pack_ipv6routing_v3(rec: &FlowRecord, order: ByteOrder, out: &mut [u8]) -> Result<()> {
    check_len(out, IPV6ROUTING_V3_LEN)?;
    let mut tcp_state = rec.tcp_state & !TCPSTATE_IPV6;
    if rec.is_ipv6() {
        tcp_state |= TCPSTATE_IPV6;
    }
    let mut f = FieldsMut { buf: out, order };
    put_common(&mut f, rec, tcp_state);
    f.u32(u32::from(rec.input));
    f.u64(u64::from(rec.packets));
    f.u64(u64::from(rec.bytes));
    f.addr16(super::to_ipv6(rec.sip));
    f.addr16(super::to_ipv6(rec.dip));
    f.addr16(super::to_ipv6(rec.nhip));
    f.u32(u32::from(rec.output));
    Ok(())
}
