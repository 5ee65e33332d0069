//! Flow records and the on-disk record codecs
//!
//! A [`FlowRecord`] is the in-memory form of one flow. Each flow file
//! format stores it in a fixed-length layout chosen by the header's format
//! and record version; [`codec::lookup`] returns the packer for a pair.

pub mod codec;

pub use codec::{lookup, RecordCodec};

use crate::format::FileFormat;
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// IP protocol numbers the stream treats specially
pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_ICMPV6: u8 = 58;

/// TCP state bit: initial and session flags are present
pub const TCPSTATE_EXPANDED: u8 = 0x01;
/// TCP state bit used on disk to mark an IPv6 record
pub const TCPSTATE_IPV6: u8 = 0x80;

/// What a stream does with IPv4 and IPv6 records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Ipv6Policy {
    /// Pass both families unchanged
    #[default]
    Mix,
    /// Drop IPv6 records
    Ignore,
    /// Convert IPv6 records to IPv4 when possible, drop the rest
    AsV4,
    /// Convert IPv4 records to IPv6
    Force,
    /// Drop IPv4 records
    Only,
}

/// One network flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowRecord {
    /// Start time, epoch milliseconds
    pub start_time: i64,
    /// Duration, milliseconds
    pub elapsed: u32,
    pub sport: u16,
    pub dport: u16,
    pub proto: u8,
    pub flowtype: u8,
    pub sensor: u16,
    /// Union of the TCP flags of every packet
    pub flags: u8,
    pub init_flags: u8,
    pub rest_flags: u8,
    pub tcp_state: u8,
    pub application: u16,
    pub memo: u16,
    pub input: u16,
    pub output: u16,
    pub packets: u32,
    pub bytes: u32,
    pub sip: IpAddr,
    pub dip: IpAddr,
    pub nhip: IpAddr,
}

impl Default for FlowRecord {
    fn default() -> Self {
        let zero = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        Self {
            start_time: 0,
            elapsed: 0,
            sport: 0,
            dport: 0,
            proto: 0,
            flowtype: 0,
            sensor: 0,
            flags: 0,
            init_flags: 0,
            rest_flags: 0,
            tcp_state: 0,
            application: 0,
            memo: 0,
            input: 0,
            output: 0,
            packets: 0,
            bytes: 0,
            sip: zero,
            dip: zero,
            nhip: zero,
        }
    }
}

impl FlowRecord {
    pub fn is_ipv6(&self) -> bool {
        self.sip.is_ipv6()
    }

    pub fn is_icmp(&self) -> bool {
        self.proto == IPPROTO_ICMP || (self.is_ipv6() && self.proto == IPPROTO_ICMPV6)
    }

    /// Rewrite every address as IPv4.
    ///
    /// Fails, leaving the record untouched, unless all three addresses are
    /// IPv4-mapped.
    pub fn convert_to_ipv4(&mut self) -> bool {
        let (Some(s), Some(d), Some(n)) = (
            to_ipv4(self.sip),
            to_ipv4(self.dip),
            to_ipv4(self.nhip),
        ) else {
            return false;
        };
        self.sip = IpAddr::V4(s);
        self.dip = IpAddr::V4(d);
        self.nhip = IpAddr::V4(n);
        true
    }

    /// Rewrite every address as IPv6, IPv4 ones becoming `::ffff:a.b.c.d`
    pub fn convert_to_ipv6(&mut self) {
        self.sip = IpAddr::V6(to_ipv6(self.sip));
        self.dip = IpAddr::V6(to_ipv6(self.dip));
        self.nhip = IpAddr::V6(to_ipv6(self.nhip));
    }

    /// Clear the expanded-state bit on records that cannot carry it
    pub(crate) fn clear_stale_tcp_state(&mut self) {
        if self.tcp_state & TCPSTATE_EXPANDED != 0
            && (self.proto != IPPROTO_TCP || (self.init_flags == 0 && self.rest_flags == 0))
        {
            self.tcp_state &= !TCPSTATE_EXPANDED;
            self.init_flags = 0;
            self.rest_flags = 0;
        }
    }
}

/// IPv4 form of an address, if it has one
pub(crate) fn to_ipv4(addr: IpAddr) -> Option<Ipv4Addr> {
    match addr {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}

/// IPv6 form of an address; IPv4 addresses are mapped
pub(crate) fn to_ipv6(addr: IpAddr) -> Ipv6Addr {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

/// Move an ICMP type/code found in the source port into the destination port.
///
/// Older producers sometimes stored the value in sPort. Files written with
/// the expanded header are assumed to hold `(type << 8) | code`; older files
/// of the PDU-derived formats hold the bytes swapped. Returns whether the
/// record changed.
pub fn correct_icmp_ports(rec: &mut FlowRecord, file_version: u8, format: FileFormat) -> bool {
    if !rec.is_icmp() || rec.sport == 0 || rec.dport != 0 {
        return false;
    }
    let swapped = file_version < crate::config::EXPANDED_HEADER_VERSION
        && matches!(
            format,
            FileFormat::RWFILTER
                | FileFormat::RWNOTROUTED
                | FileFormat::RWROUTED
                | FileFormat::RWSPLIT
                | FileFormat::RWWWW
        );
    rec.dport = if swapped {
        rec.sport.swap_bytes()
    } else {
        rec.sport
    };
    rec.sport = 0;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn icmp_record() -> FlowRecord {
        FlowRecord {
            proto: IPPROTO_ICMP,
            sport: 0x0803,
            ..FlowRecord::default()
        }
    }

    #[test]
    fn test_icmp_fix_legacy_pdu_format_swaps_bytes() {
        let mut rec = icmp_record();
        assert!(correct_icmp_ports(&mut rec, 5, FileFormat::RWROUTED));
        assert_eq!(rec.sport, 0);
        assert_eq!(rec.dport, 0x0308);
    }

    #[test]
    fn test_icmp_fix_expanded_header_copies() {
        let mut rec = icmp_record();
        assert!(correct_icmp_ports(&mut rec, 16, FileFormat::RWGENERIC));
        assert_eq!(rec.sport, 0);
        assert_eq!(rec.dport, 0x0803);
    }

    #[test]
    fn test_icmp_fix_leaves_other_records() {
        let mut tcp = FlowRecord {
            proto: IPPROTO_TCP,
            sport: 80,
            ..FlowRecord::default()
        };
        assert!(!correct_icmp_ports(&mut tcp, 16, FileFormat::RWGENERIC));
        assert_eq!(tcp.sport, 80);

        let mut with_dport = icmp_record();
        with_dport.dport = 1;
        assert!(!correct_icmp_ports(&mut with_dport, 16, FileFormat::RWGENERIC));
    }

    #[test]
    fn test_family_conversion() {
        let mut rec = FlowRecord {
            sip: "10.0.0.1".parse().unwrap(),
            dip: "10.0.0.2".parse().unwrap(),
            ..FlowRecord::default()
        };
        rec.convert_to_ipv6();
        assert!(rec.is_ipv6());
        assert_eq!(rec.sip, "::ffff:10.0.0.1".parse::<IpAddr>().unwrap());
        assert!(rec.convert_to_ipv4());
        assert_eq!(rec.dip, "10.0.0.2".parse::<IpAddr>().unwrap());

        let mut v6 = FlowRecord {
            sip: "2001:db8::1".parse().unwrap(),
            ..FlowRecord::default()
        };
        v6.convert_to_ipv6();
        assert!(!v6.convert_to_ipv4());
        assert!(v6.is_ipv6());
    }

    #[test]
    fn test_stale_tcp_state_cleared() {
        let mut rec = FlowRecord {
            proto: 17,
            tcp_state: TCPSTATE_EXPANDED,
            init_flags: 2,
            ..FlowRecord::default()
        };
        rec.clear_stale_tcp_state();
        assert_eq!(rec.tcp_state, 0);
        assert_eq!(rec.init_flags, 0);
    }
}
