//! Field types an aggregate bag's keys and counters are built from

use serde::Serialize;
use std::fmt;

/// Whether a field may appear in a key, a counter, or neither
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldClass {
    Key,
    Counter,
}

/// How a field's bytes are interpreted by the typed accessors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldKind {
    Unsigned,
    Ipv4,
    Ipv6,
    /// Seconds since the epoch
    Datetime,
}

/// Identifier of an aggregate bag field
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AggBagFieldType(pub u16);

struct FieldInfo {
    name: &'static str,
    /// 0 marks an id that is reserved but not usable
    octets: usize,
}

const fn info(octets: usize, name: &'static str) -> FieldInfo {
    FieldInfo { name, octets }
}

static KEYS: [FieldInfo; 44] = [
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
    info(0, ""),
    info(0, ""),
    info(0, ""),
    info(1, "icmpType"),
    info(1, "icmpCode"),
    info(16, "sIPv6"),
    info(16, "dIPv6"),
    info(16, "nhIPv6"),
    info(4, "any-IPv4"),
    info(16, "any-IPv6"),
    info(2, "any-port"),
    info(2, "any-snmp"),
    info(4, "any-time"),
    info(8, "custom-key"),
    info(2, "scc"),
    info(2, "dcc"),
    info(2, "any-cc"),
    info(4, "sip-pmap"),
    info(4, "dip-pmap"),
    info(4, "any-ip-pmap"),
    info(4, "sport-pmap"),
    info(4, "dport-pmap"),
    info(4, "any-port-pmap"),
];

const COUNTER_BASE: u16 = 0xC000;

static COUNTERS: [FieldInfo; 5] = [
    info(8, "records"),
    info(8, "sum-packets"),
    info(8, "sum-bytes"),
    info(8, "sum-duration"),
    info(8, "custom-counter"),
];

impl AggBagFieldType {
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
    pub const ICMP_TYPE: Self = Self(24);
    pub const ICMP_CODE: Self = Self(25);
    pub const SIPV6: Self = Self(26);
    pub const DIPV6: Self = Self(27);
    pub const NHIPV6: Self = Self(28);
    pub const ANY_IPV4: Self = Self(29);
    pub const ANY_IPV6: Self = Self(30);
    pub const ANY_PORT: Self = Self(31);
    pub const ANY_SNMP: Self = Self(32);
    pub const ANY_TIME: Self = Self(33);
    pub const CUSTOM_KEY: Self = Self(34);
    pub const SIP_COUNTRY: Self = Self(35);
    pub const DIP_COUNTRY: Self = Self(36);
    pub const ANY_COUNTRY: Self = Self(37);
    pub const SIP_PMAP: Self = Self(38);
    pub const DIP_PMAP: Self = Self(39);
    pub const ANY_IP_PMAP: Self = Self(40);
    pub const SPORT_PMAP: Self = Self(41);
    pub const DPORT_PMAP: Self = Self(42);
    pub const ANY_PORT_PMAP: Self = Self(43);

    pub const RECORDS: Self = Self(COUNTER_BASE);
    pub const SUM_PACKETS: Self = Self(COUNTER_BASE + 1);
    pub const SUM_BYTES: Self = Self(COUNTER_BASE + 2);
    pub const SUM_ELAPSED: Self = Self(COUNTER_BASE + 3);
    pub const CUSTOM_COUNTER: Self = Self(COUNTER_BASE + 4);

    fn info(self) -> Option<(&'static FieldInfo, FieldClass)> {
        let found = if self.0 >= COUNTER_BASE {
            COUNTERS
                .get((self.0 - COUNTER_BASE) as usize)
                .map(|f| (f, FieldClass::Counter))
        } else {
            KEYS.get(self.0 as usize).map(|f| (f, FieldClass::Key))
        };
        found.filter(|(f, _)| f.octets > 0)
    }

    pub fn is_known(self) -> bool {
        self.info().is_some()
    }

    pub fn class(self) -> Option<FieldClass> {
        self.info().map(|(_, c)| c)
    }

    pub fn name(self) -> Option<&'static str> {
        self.info().map(|(f, _)| f.name)
    }

    pub fn octets(self) -> Option<usize> {
        self.info().map(|(f, _)| f.octets)
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Self::SIPV4 | Self::DIPV4 | Self::NHIPV4 | Self::ANY_IPV4 => FieldKind::Ipv4,
            Self::SIPV6 | Self::DIPV6 | Self::NHIPV6 | Self::ANY_IPV6 => FieldKind::Ipv6,
            Self::STARTTIME | Self::ENDTIME | Self::ANY_TIME => FieldKind::Datetime,
            _ => FieldKind::Unsigned,
        }
    }

    /// Case-insensitive lookup over key and counter names
    pub fn from_name(name: &str) -> Option<Self> {
        Self::keys()
            .chain(Self::counters())
            .find(|f| f.name().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }

    /// Every usable key field in id order
    pub fn keys() -> impl Iterator<Item = AggBagFieldType> {
        (0..KEYS.len() as u16)
            .map(AggBagFieldType)
            .filter(|f| f.is_known())
    }

    /// Every counter field in id order
    pub fn counters() -> impl Iterator<Item = AggBagFieldType> {
        (0..COUNTERS.len() as u16).map(|i| AggBagFieldType(COUNTER_BASE + i))
    }
}

impl fmt::Display for AggBagFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "UNKNOWN[{}]", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue() {
        assert_eq!(AggBagFieldType::keys().count(), 41);
        assert_eq!(AggBagFieldType::counters().count(), 5);
        assert_eq!(AggBagFieldType(22).name(), None);
        assert_eq!(AggBagFieldType(44).name(), None);
        assert_eq!(AggBagFieldType(0xC005).name(), None);
        assert_eq!(AggBagFieldType::SIPV6.octets(), Some(16));
        assert_eq!(AggBagFieldType::CUSTOM_KEY.octets(), Some(8));
        assert_eq!(
            AggBagFieldType::SUM_BYTES.class(),
            Some(FieldClass::Counter)
        );
        assert_eq!(AggBagFieldType::DPORT.class(), Some(FieldClass::Key));
    }

    #[test]
    fn test_lookup_by_name_and_kind() {
        assert_eq!(
            AggBagFieldType::from_name("SUM-BYTES"),
            Some(AggBagFieldType::SUM_BYTES)
        );
        assert_eq!(AggBagFieldType::from_name("dcc"), Some(AggBagFieldType::DIP_COUNTRY));
        assert_eq!(AggBagFieldType::from_name(""), None);
        assert_eq!(AggBagFieldType::ANY_TIME.kind(), FieldKind::Datetime);
        assert_eq!(AggBagFieldType::NHIPV6.kind(), FieldKind::Ipv6);
        assert_eq!(AggBagFieldType::RECORDS.kind(), FieldKind::Unsigned);
        assert_eq!(AggBagFieldType(21).to_string(), "UNKNOWN[21]");
    }
}
