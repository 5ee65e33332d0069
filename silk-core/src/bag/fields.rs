//! Field types describing what a bag's keys and counters hold

use serde::Serialize;
use std::fmt;

/// Octet width reported for [`BagFieldType::CUSTOM`]
pub const CUSTOM_OCTETS: usize = usize::MAX - 1;

/// Identifier of a key or counter field type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BagFieldType(pub u16);

struct FieldInfo {
    name: &'static str,
    /// 0 marks an id that is reserved but not usable
    octets: usize,
}

const fn info(octets: usize, name: &'static str) -> FieldInfo {
    FieldInfo { name, octets }
}

static FIELDS: [FieldInfo; 46] = [
    info(4, "sIPv4"),
    info(4, "dIPv4"),
    info(2, "sPort"),
    info(2, "dPort"),
    info(1, "protocol"),
    info(4, "packets"),
    info(4, "bytes"),
    info(1, "flags"),
    info(4, "sTime"),
    info(4, "duration"),
    info(4, "eTime"),
    info(2, "sensor"),
    info(2, "input"),
    info(2, "output"),
    info(4, "nhIPv4"),
    info(1, "initialFlags"),
    info(1, "sessionFlags"),
    info(1, "attributes"),
    info(2, "application"),
    info(1, "class"),
    info(1, "type"),
    info(0, "starttime-msec"),
    info(0, "endtime-msec"),
    info(0, "elapsed-msec"),
    info(2, "icmpTypeCode"),
    info(16, "sIPv6"),
    info(16, "dIPv6"),
    info(16, "nhIPv6"),
    info(8, "records"),
    info(8, "sum-packets"),
    info(8, "sum-bytes"),
    info(8, "sum-duration"),
    info(4, "any-IPv4"),
    info(16, "any-IPv6"),
    info(2, "any-port"),
    info(2, "any-snmp"),
    info(4, "any-time"),
    info(2, "sip-country"),
    info(2, "dip-country"),
    info(2, "any-country"),
    info(4, "sip-pmap"),
    info(4, "dip-pmap"),
    info(4, "any-ip-pmap"),
    info(4, "sport-pmap"),
    info(4, "dport-pmap"),
    info(4, "any-port-pmap"),
];

static CUSTOM: FieldInfo = info(CUSTOM_OCTETS, "custom");

impl BagFieldType {
    pub const SIPV4: Self = Self(0);
    pub const DIPV4: Self = Self(1);
    pub const SPORT: Self = Self(2);
    pub const DPORT: Self = Self(3);
    pub const PROTO: Self = Self(4);
    pub const PACKETS: Self = Self(5);
    pub const BYTES: Self = Self(6);
    pub const FLAGS: Self = Self(7);
    pub const STARTTIME: Self = Self(8);
    pub const ELAPSED: Self = Self(9);
    pub const ENDTIME: Self = Self(10);
    pub const SID: Self = Self(11);
    pub const INPUT: Self = Self(12);
    pub const OUTPUT: Self = Self(13);
    pub const NHIPV4: Self = Self(14);
    pub const INIT_FLAGS: Self = Self(15);
    pub const REST_FLAGS: Self = Self(16);
    pub const TCP_STATE: Self = Self(17);
    pub const APPLICATION: Self = Self(18);
    pub const FTYPE_CLASS: Self = Self(19);
    pub const FTYPE_TYPE: Self = Self(20);
    pub const ICMP_TYPE_CODE: Self = Self(24);
    pub const SIPV6: Self = Self(25);
    pub const DIPV6: Self = Self(26);
    pub const NHIPV6: Self = Self(27);
    pub const RECORDS: Self = Self(28);
    pub const SUM_PACKETS: Self = Self(29);
    pub const SUM_BYTES: Self = Self(30);
    pub const SUM_ELAPSED: Self = Self(31);
    pub const ANY_IPV4: Self = Self(32);
    pub const ANY_IPV6: Self = Self(33);
    pub const ANY_PORT: Self = Self(34);
    pub const ANY_SNMP: Self = Self(35);
    pub const ANY_TIME: Self = Self(36);
    pub const SIP_COUNTRY: Self = Self(37);
    pub const DIP_COUNTRY: Self = Self(38);
    pub const ANY_COUNTRY: Self = Self(39);
    pub const SIP_PMAP: Self = Self(40);
    pub const DIP_PMAP: Self = Self(41);
    pub const ANY_IP_PMAP: Self = Self(42);
    pub const SPORT_PMAP: Self = Self(43);
    pub const DPORT_PMAP: Self = Self(44);
    pub const ANY_PORT_PMAP: Self = Self(45);
    pub const CUSTOM: Self = Self(255);

    fn info(self) -> Option<&'static FieldInfo> {
        if self == Self::CUSTOM {
            return Some(&CUSTOM);
        }
        FIELDS.get(self.0 as usize).filter(|f| f.octets > 0)
    }

    /// Whether the id names a usable field type
    pub fn is_known(self) -> bool {
        self.info().is_some()
    }

    pub fn name(self) -> Option<&'static str> {
        self.info().map(|f| f.name)
    }

    /// Natural width of the field; [`CUSTOM_OCTETS`] for custom
    pub fn octets(self) -> Option<usize> {
        self.info().map(|f| f.octets)
    }

    /// Case-insensitive lookup by name
    pub fn from_name(name: &str) -> Option<Self> {
        if CUSTOM.name.eq_ignore_ascii_case(name) {
            return Some(Self::CUSTOM);
        }
        FIELDS
            .iter()
            .position(|f| f.octets > 0 && f.name.eq_ignore_ascii_case(name))
            .map(|i| Self(i as u16))
    }

    /// Every usable field type in id order, custom last
    pub fn all() -> impl Iterator<Item = BagFieldType> {
        (0..FIELDS.len() as u16)
            .map(BagFieldType)
            .filter(|f| f.is_known())
            .chain(std::iter::once(Self::CUSTOM))
    }

    pub fn is_ipv4(self) -> bool {
        matches!(self, Self::SIPV4 | Self::DIPV4 | Self::NHIPV4 | Self::ANY_IPV4)
    }

    pub fn is_ipv6(self) -> bool {
        matches!(self, Self::SIPV6 | Self::DIPV6 | Self::NHIPV6 | Self::ANY_IPV6)
    }

    pub fn is_ip(self) -> bool {
        self.is_ipv4() || self.is_ipv6()
    }

    /// IPv6 counterpart of an IPv4 address type; other types are unchanged
    pub fn to_ipv6(self) -> Self {
        match self {
            Self::SIPV4 => Self::SIPV6,
            Self::DIPV4 => Self::DIPV6,
            Self::NHIPV4 => Self::NHIPV6,
            Self::ANY_IPV4 => Self::ANY_IPV6,
            other => other,
        }
    }
}

impl fmt::Display for BagFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "unknown({})", self.0),
        }
    }
}

/// Type describing the union of two fields, used when bags are combined.
///
/// Related fields merge to their `any-` form; unrelated ones give custom.
pub fn field_type_merge(a: BagFieldType, b: BagFieldType) -> BagFieldType {
    use BagFieldType as F;

    if a == b {
        return a;
    }
    let port = |f: F| matches!(f, F::SPORT | F::DPORT | F::ANY_PORT);
    let snmp = |f: F| matches!(f, F::INPUT | F::OUTPUT | F::ANY_SNMP);
    let packets = |f: F| matches!(f, F::PACKETS | F::SUM_PACKETS);
    let bytes = |f: F| matches!(f, F::BYTES | F::SUM_BYTES);
    let flags = |f: F| matches!(f, F::FLAGS | F::INIT_FLAGS | F::REST_FLAGS);
    let time = |f: F| matches!(f, F::STARTTIME | F::ENDTIME | F::ANY_TIME);
    let elapsed = |f: F| matches!(f, F::ELAPSED | F::SUM_ELAPSED);
    let country = |f: F| matches!(f, F::SIP_COUNTRY | F::DIP_COUNTRY | F::ANY_COUNTRY);
    let ip_pmap = |f: F| matches!(f, F::SIP_PMAP | F::DIP_PMAP | F::ANY_IP_PMAP);
    let port_pmap = |f: F| matches!(f, F::SPORT_PMAP | F::DPORT_PMAP | F::ANY_PORT_PMAP);

    if a.is_ip() && b.is_ip() {
        if a.is_ipv4() && b.is_ipv4() {
            F::ANY_IPV4
        } else {
            F::ANY_IPV6
        }
    } else if port(a) && port(b) {
        F::ANY_PORT
    } else if snmp(a) && snmp(b) {
        F::ANY_SNMP
    } else if packets(a) && packets(b) {
        F::SUM_PACKETS
    } else if bytes(a) && bytes(b) {
        F::SUM_BYTES
    } else if flags(a) && flags(b) {
        F::FLAGS
    } else if elapsed(a) && elapsed(b) {
        F::SUM_ELAPSED
    } else if (time(a) || elapsed(a)) && (time(b) || elapsed(b)) {
        F::ANY_TIME
    } else if country(a) && country(b) {
        F::ANY_COUNTRY
    } else if ip_pmap(a) && ip_pmap(b) {
        F::ANY_IP_PMAP
    } else if port_pmap(a) && port_pmap(b) {
        F::ANY_PORT_PMAP
    } else {
        F::CUSTOM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_lookup() {
        assert_eq!(BagFieldType::from_name("SIPV4"), Some(BagFieldType::SIPV4));
        assert_eq!(BagFieldType::from_name("sum-bytes"), Some(BagFieldType::SUM_BYTES));
        assert_eq!(BagFieldType::from_name("starttime-msec"), None);
        assert_eq!(BagFieldType::SIPV6.octets(), Some(16));
        assert_eq!(BagFieldType(21).octets(), None);
        assert_eq!(BagFieldType::CUSTOM.octets(), Some(CUSTOM_OCTETS));
        assert_eq!(BagFieldType(46).name(), None);

        let all: Vec<_> = BagFieldType::all().collect();
        assert_eq!(all.len(), 44);
        assert_eq!(*all.last().unwrap(), BagFieldType::CUSTOM);
    }

    #[test]
    fn test_merge() {
        use BagFieldType as F;
        assert_eq!(field_type_merge(F::SIPV4, F::SIPV4), F::SIPV4);
        assert_eq!(field_type_merge(F::SIPV4, F::DIPV4), F::ANY_IPV4);
        assert_eq!(field_type_merge(F::SIPV4, F::DIPV6), F::ANY_IPV6);
        assert_eq!(field_type_merge(F::SPORT, F::ANY_PORT), F::ANY_PORT);
        assert_eq!(field_type_merge(F::ELAPSED, F::SUM_ELAPSED), F::SUM_ELAPSED);
        assert_eq!(field_type_merge(F::ELAPSED, F::STARTTIME), F::ANY_TIME);
        assert_eq!(field_type_merge(F::STARTTIME, F::SUM_ELAPSED), F::ANY_TIME);
        assert_eq!(field_type_merge(F::PACKETS, F::BYTES), F::CUSTOM);
    }
}
