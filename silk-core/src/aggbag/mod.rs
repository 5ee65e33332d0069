//! AggBag: composite keys mapped to composite counters
//!
//! Keys and counters are [`Aggregate`]s: packed big-endian rows described
//! by an interned [`Layout`]. Rows are kept in a red-black tree ordered by
//! the key bytes, which is the order they are iterated and written in.
//!
//! Layouts are fixed by the first insert, removal or merge; after that
//! [`AggBag::set_key_fields`] and [`AggBag::set_counter_fields`] fail.

mod fields;
mod io;
mod layout;

pub use fields::{AggBagFieldType, FieldClass, FieldKind};
pub use io::{AggBagEntry, AggBagOptions};
pub use layout::{intern as intern_layout, teardown as teardown_layouts, Layout, LayoutField};

use crate::redblack::{self, RbTree};
use crate::{Result, SilkError};
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// A key or counter value laid out per its [`Layout`]
#[derive(Clone, PartialEq, Eq)]
pub struct Aggregate {
    layout: Arc<Layout>,
    data: Box<[u8]>,
}

impl fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for field in self.layout.fields() {
            let bytes = &self.data[field.offset..field.offset + field.octets];
            list.entry(&format_args!("{}={:02x?}", field.field_type, bytes));
        }
        list.finish()
    }
}

fn mismatch(field: &LayoutField, wanted: &str) -> SilkError {
    SilkError::AccessorMismatch(format!(
        "{} field cannot be accessed as {}",
        field.field_type, wanted
    ))
}

impl Aggregate {
    /// All-zero value of `layout`
    pub fn new(layout: Arc<Layout>) -> Self {
        let data = vec![0u8; layout.octets()].into_boxed_slice();
        Self { layout, data }
    }

    fn from_bytes(layout: Arc<Layout>, bytes: &[u8]) -> Self {
        Self {
            layout,
            data: bytes.into(),
        }
    }

    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    /// Packed big-endian bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }

    fn slot(&self, pos: usize) -> Result<(LayoutField, &[u8])> {
        let field = *self.layout.field(pos)?;
        Ok((field, &self.data[field.offset..field.offset + field.octets]))
    }

    fn slot_mut(&mut self, pos: usize) -> Result<(LayoutField, &mut [u8])> {
        let field = *self.layout.field(pos)?;
        Ok((field, &mut self.data[field.offset..field.offset + field.octets]))
    }

    /// Integer value of the field at `pos`; IP fields are refused
    pub fn get_unsigned(&self, pos: usize) -> Result<u64> {
        let (field, bytes) = self.slot(pos)?;
        if matches!(field.field_type.kind(), FieldKind::Ipv4 | FieldKind::Ipv6) {
            return Err(mismatch(&field, "an unsigned value"));
        }
        Ok(bytes.iter().fold(0u64, |v, b| (v << 8) | *b as u64))
    }

    /// Store an integer; values wider than the field are an error
    pub fn set_unsigned(&mut self, pos: usize, value: u64) -> Result<()> {
        let (field, bytes) = self.slot_mut(pos)?;
        if matches!(field.field_type.kind(), FieldKind::Ipv4 | FieldKind::Ipv6) {
            return Err(mismatch(&field, "an unsigned value"));
        }
        if field.octets < 8 && value >> (8 * field.octets) != 0 {
            return Err(SilkError::InvalidInput(format!(
                "{} does not fit the {}-octet {} field",
                value, field.octets, field.field_type
            )));
        }
        let be = value.to_be_bytes();
        bytes.copy_from_slice(&be[8 - field.octets..]);
        Ok(())
    }

    pub fn get_ipaddr(&self, pos: usize) -> Result<IpAddr> {
        let (field, bytes) = self.slot(pos)?;
        match field.field_type.kind() {
            FieldKind::Ipv4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(bytes);
                Ok(IpAddr::V4(Ipv4Addr::from(octets)))
            }
            FieldKind::Ipv6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(bytes);
                Ok(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            _ => Err(mismatch(&field, "an IP address")),
        }
    }

    /// Store an address; IPv4 fields accept IPv4-mapped IPv6 addresses
    pub fn set_ipaddr(&mut self, pos: usize, addr: IpAddr) -> Result<()> {
        let (field, bytes) = self.slot_mut(pos)?;
        match (field.field_type.kind(), addr) {
            (FieldKind::Ipv4, IpAddr::V4(a)) => bytes.copy_from_slice(&a.octets()),
            (FieldKind::Ipv4, IpAddr::V6(a)) => match a.to_ipv4_mapped() {
                Some(v4) => bytes.copy_from_slice(&v4.octets()),
                None => return Err(mismatch(&field, "an IPv6 address")),
            },
            (FieldKind::Ipv6, IpAddr::V4(a)) => {
                bytes.copy_from_slice(&a.to_ipv6_mapped().octets())
            }
            (FieldKind::Ipv6, IpAddr::V6(a)) => bytes.copy_from_slice(&a.octets()),
            _ => return Err(mismatch(&field, "an IP address")),
        }
        Ok(())
    }

    pub fn get_datetime(&self, pos: usize) -> Result<DateTime<Utc>> {
        let (field, bytes) = self.slot(pos)?;
        if field.field_type.kind() != FieldKind::Datetime {
            return Err(mismatch(&field, "a datetime"));
        }
        let secs = bytes.iter().fold(0i64, |v, b| (v << 8) | *b as i64);
        Utc.timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| SilkError::InvalidInput(format!("bad timestamp {}", secs)))
    }

    /// Store a time; sub-second precision is dropped
    pub fn set_datetime(&mut self, pos: usize, time: DateTime<Utc>) -> Result<()> {
        let (field, bytes) = self.slot_mut(pos)?;
        if field.field_type.kind() != FieldKind::Datetime {
            return Err(mismatch(&field, "a datetime"));
        }
        let secs = u32::try_from(time.timestamp()).map_err(|_| {
            SilkError::InvalidInput(format!("{} is outside the 32-bit epoch range", time))
        })?;
        bytes.copy_from_slice(&secs.to_be_bytes());
        Ok(())
    }
}

/// Composite key to composite counter map
#[derive(Debug, Clone, Default)]
pub struct AggBag {
    key_layout: Option<Arc<Layout>>,
    counter_layout: Option<Arc<Layout>>,
    fixed_fields: bool,
    tree: RbTree<Box<[u8]>, Box<[u8]>>,
}

impl AggBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bag with both layouts set
    pub fn create(keys: &[AggBagFieldType], counters: &[AggBagFieldType]) -> Result<Self> {
        let mut bag = Self::new();
        bag.set_key_fields(keys)?;
        bag.set_counter_fields(counters)?;
        Ok(bag)
    }

    pub fn set_key_fields(&mut self, fields: &[AggBagFieldType]) -> Result<()> {
        if self.fixed_fields {
            return Err(SilkError::FixedFields);
        }
        self.key_layout = Some(layout::intern(FieldClass::Key, fields)?);
        Ok(())
    }

    pub fn set_counter_fields(&mut self, fields: &[AggBagFieldType]) -> Result<()> {
        if self.fixed_fields {
            return Err(SilkError::FixedFields);
        }
        self.counter_layout = Some(layout::intern(FieldClass::Counter, fields)?);
        Ok(())
    }

    pub fn key_layout(&self) -> Option<&Arc<Layout>> {
        self.key_layout.as_ref()
    }

    pub fn counter_layout(&self) -> Option<&Arc<Layout>> {
        self.counter_layout.as_ref()
    }

    /// Key fields in layout order; empty until the key layout is set
    pub fn key_fields(&self) -> impl Iterator<Item = AggBagFieldType> + '_ {
        self.key_layout
            .iter()
            .flat_map(|l| l.fields().iter().map(|f| f.field_type))
    }

    pub fn counter_fields(&self) -> impl Iterator<Item = AggBagFieldType> + '_ {
        self.counter_layout
            .iter()
            .flat_map(|l| l.fields().iter().map(|f| f.field_type))
    }

    pub fn has_fixed_fields(&self) -> bool {
        self.fixed_fields
    }

    fn layouts(&self) -> Result<(&Arc<Layout>, &Arc<Layout>)> {
        let key = self.key_layout.as_ref().ok_or(SilkError::UndefinedKey)?;
        let counter = self
            .counter_layout
            .as_ref()
            .ok_or(SilkError::UndefinedCounter)?;
        Ok((key, counter))
    }

    /// Zeroed key of this bag's key layout
    pub fn new_key(&self) -> Result<Aggregate> {
        let (key, _) = self.layouts()?;
        Ok(Aggregate::new(Arc::clone(key)))
    }

    /// Zeroed counter of this bag's counter layout
    pub fn new_counter(&self) -> Result<Aggregate> {
        let (_, counter) = self.layouts()?;
        Ok(Aggregate::new(Arc::clone(counter)))
    }

    fn check_key(&self, key: &Aggregate) -> Result<Arc<Layout>> {
        let (key_layout, counter_layout) = self.layouts()?;
        if !Arc::ptr_eq(key_layout, &key.layout) {
            return Err(SilkError::FieldsDifferKey);
        }
        Ok(Arc::clone(counter_layout))
    }

    fn check_pair(&self, key: &Aggregate, counter: &Aggregate) -> Result<Arc<Layout>> {
        let counter_layout = self.check_key(key)?;
        if !Arc::ptr_eq(&counter_layout, &counter.layout) {
            return Err(SilkError::FieldsDifferCounter);
        }
        Ok(counter_layout)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Counter stored for `key`; all zero when absent
    pub fn get(&self, key: &Aggregate) -> Result<Aggregate> {
        let layout = self.check_key(key)?;
        Ok(match self.tree.get(&key.data[..]) {
            Some(bytes) => Aggregate::from_bytes(layout, bytes),
            None => Aggregate::new(layout),
        })
    }

    /// Store `counter` for `key`, replacing any existing counter
    pub fn set(&mut self, key: &Aggregate, counter: &Aggregate) -> Result<()> {
        self.check_pair(key, counter)?;
        self.fixed_fields = true;
        self.tree.insert(key.data.clone(), counter.data.clone());
        Ok(())
    }

    /// Add `counter` field by field, saturating; returns the new counter
    pub fn add(&mut self, key: &Aggregate, counter: &Aggregate) -> Result<Aggregate> {
        let layout = self.check_pair(key, counter)?;
        self.fixed_fields = true;
        match self.tree.get_mut(&key.data[..]) {
            Some(stored) => {
                combine(&layout, stored, &counter.data, u64::saturating_add);
                Ok(Aggregate::from_bytes(layout, stored))
            }
            None => {
                self.tree.insert(key.data.clone(), counter.data.clone());
                Ok(counter.clone())
            }
        }
    }

    /// Subtract `counter` field by field, stopping at zero; returns the new
    /// counter. An absent key stays absent.
    pub fn subtract(&mut self, key: &Aggregate, counter: &Aggregate) -> Result<Aggregate> {
        let layout = self.check_pair(key, counter)?;
        self.fixed_fields = true;
        match self.tree.get_mut(&key.data[..]) {
            Some(stored) => {
                combine(&layout, stored, &counter.data, u64::saturating_sub);
                Ok(Aggregate::from_bytes(layout, stored))
            }
            None => Ok(Aggregate::new(layout)),
        }
    }

    pub fn remove(&mut self, key: &Aggregate) -> Result<()> {
        self.check_key(key)?;
        self.fixed_fields = true;
        self.tree.remove(&key.data[..]);
        Ok(())
    }

    /// Add every row of `other`; both bags must share their layouts
    pub fn add_aggbag(&mut self, other: &AggBag) -> Result<()> {
        self.merge(other, u64::saturating_add, true)
    }

    /// Subtract every row of `other`, clamping counters at zero
    pub fn subtract_aggbag(&mut self, other: &AggBag) -> Result<()> {
        self.merge(other, u64::saturating_sub, false)
    }

    /// Combine rows of `other` into matching rows; keys only in `other`
    /// are copied when `insert_missing` is set
    fn merge(&mut self, other: &AggBag, op: fn(u64, u64) -> u64, insert_missing: bool) -> Result<()> {
        let (key, counter) = self.layouts()?;
        let (key, counter) = (Arc::clone(key), Arc::clone(counter));
        if !other.key_layout.as_ref().is_some_and(|l| Arc::ptr_eq(l, &key)) {
            return Err(SilkError::FieldsDifferKey);
        }
        if !other
            .counter_layout
            .as_ref()
            .is_some_and(|l| Arc::ptr_eq(l, &counter))
        {
            return Err(SilkError::FieldsDifferCounter);
        }
        self.fixed_fields = true;

        for (k, c) in other.tree.iter() {
            match self.tree.get_mut(k) {
                Some(stored) => combine(&counter, stored, c, op),
                None if insert_missing => {
                    self.tree.insert(k.clone(), c.clone());
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Rows in ascending key order
    pub fn iter(&self) -> AggBagIter<'_> {
        AggBagIter {
            key_layout: self.key_layout.clone(),
            counter_layout: self.counter_layout.clone(),
            inner: self.tree.iter(),
        }
    }

    pub(crate) fn insert_raw(&mut self, key: &[u8], counter: &[u8]) {
        self.tree.insert(key.into(), counter.into());
    }

    pub(crate) fn fix_fields(&mut self) {
        self.fixed_fields = true;
    }
}

/// Apply `op` to each 8-octet counter field of `stored` and `operand`
fn combine(layout: &Layout, stored: &mut [u8], operand: &[u8], op: fn(u64, u64) -> u64) {
    for field in layout.fields() {
        let range = field.offset..field.offset + field.octets;
        let a = stored[range.clone()]
            .iter()
            .fold(0u64, |v, b| (v << 8) | *b as u64);
        let b = operand[range.clone()]
            .iter()
            .fold(0u64, |v, b| (v << 8) | *b as u64);
        let be = op(a, b).to_be_bytes();
        stored[range].copy_from_slice(&be[8 - field.octets..]);
    }
}

/// Iterator returned by [`AggBag::iter`]
pub struct AggBagIter<'a> {
    key_layout: Option<Arc<Layout>>,
    counter_layout: Option<Arc<Layout>>,
    inner: redblack::Iter<'a, Box<[u8]>, Box<[u8]>>,
}

impl Iterator for AggBagIter<'_> {
    type Item = (Aggregate, Aggregate);

    fn next(&mut self) -> Option<Self::Item> {
        let (k, c) = self.inner.next()?;
        let key = Aggregate::from_bytes(Arc::clone(self.key_layout.as_ref()?), k);
        let counter = Aggregate::from_bytes(Arc::clone(self.counter_layout.as_ref()?), c);
        Some((key, counter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AggBagFieldType as F;

    fn flow_bag() -> AggBag {
        AggBag::create(&[F::SIPV4, F::DPORT], &[F::SUM_BYTES, F::RECORDS]).unwrap()
    }

    fn key(bag: &AggBag, ip: [u8; 4], port: u64) -> Aggregate {
        let mut k = bag.new_key().unwrap();
        k.set_ipaddr(0, IpAddr::from(ip)).unwrap();
        k.set_unsigned(1, port).unwrap();
        k
    }

    fn counter(bag: &AggBag, bytes: u64, records: u64) -> Aggregate {
        let layout = bag.counter_layout().unwrap();
        let mut c = bag.new_counter().unwrap();
        c.set_unsigned(layout.position(F::SUM_BYTES).unwrap(), bytes)
            .unwrap();
        c.set_unsigned(layout.position(F::RECORDS).unwrap(), records)
            .unwrap();
        c
    }

    fn read_counter(c: &Aggregate) -> (u64, u64) {
        let layout = c.layout();
        (
            c.get_unsigned(layout.position(F::SUM_BYTES).unwrap()).unwrap(),
            c.get_unsigned(layout.position(F::RECORDS).unwrap()).unwrap(),
        )
    }

    #[test]
    fn test_undefined_layouts() {
        let mut bag = AggBag::new();
        assert!(matches!(bag.new_key(), Err(SilkError::UndefinedKey)));
        bag.set_key_fields(&[F::SPORT]).unwrap();
        assert!(matches!(bag.new_key(), Err(SilkError::UndefinedCounter)));
        assert!(matches!(
            bag.set_counter_fields(&[F::SPORT]),
            Err(SilkError::FieldClass(2))
        ));
    }

    #[test]
    fn test_fields_fixed_after_first_insert() {
        let mut bag = flow_bag();
        bag.set_key_fields(&[F::SIPV4, F::DPORT, F::PROTO]).unwrap();
        bag.set_key_fields(&[F::DPORT, F::SIPV4]).unwrap();
        let k = key(&bag, [1, 2, 3, 4], 80);
        let c = counter(&bag, 10, 1);
        bag.add(&k, &c).unwrap();
        assert!(matches!(
            bag.set_counter_fields(&[F::RECORDS]),
            Err(SilkError::FixedFields)
        ));
    }

    #[test]
    fn test_add_subtract_set_remove() {
        let mut bag = flow_bag();
        let k = key(&bag, [10, 0, 0, 1], 443);
        let out = bag.add(&k, &counter(&bag, 100, 1)).unwrap();
        assert_eq!(read_counter(&out), (100, 1));
        let out = bag.add(&k, &counter(&bag, u64::MAX, 2)).unwrap();
        assert_eq!(read_counter(&out), (u64::MAX, 3));

        let out = bag.subtract(&k, &counter(&bag, 5, 10)).unwrap();
        assert_eq!(read_counter(&out), (u64::MAX - 5, 0));

        bag.set(&k, &counter(&bag, 7, 7)).unwrap();
        assert_eq!(read_counter(&bag.get(&k).unwrap()), (7, 7));

        let missing = key(&bag, [10, 0, 0, 2], 443);
        let out = bag.subtract(&missing, &counter(&bag, 1, 1)).unwrap();
        assert!(out.is_zero());
        assert_eq!(bag.len(), 1);

        bag.remove(&k).unwrap();
        assert!(bag.get(&k).unwrap().is_zero());
        assert!(bag.is_empty());
    }

    #[test]
    fn test_iteration_is_key_ordered() {
        let mut bag = flow_bag();
        for (ip, port) in [([9, 9, 9, 9], 1u64), ([1, 2, 3, 4], 443), ([1, 2, 3, 4], 80)] {
            let k = key(&bag, ip, port);
            bag.add(&k, &counter(&bag, port, 1)).unwrap();
        }
        let rows: Vec<_> = bag
            .iter()
            .map(|(k, _)| (k.get_ipaddr(0).unwrap(), k.get_unsigned(1).unwrap()))
            .collect();
        let ip = |a: [u8; 4]| IpAddr::from(a);
        assert_eq!(
            rows,
            vec![(ip([1, 2, 3, 4]), 80), (ip([1, 2, 3, 4]), 443), (ip([9, 9, 9, 9]), 1)]
        );
    }

    #[test]
    fn test_accessor_typing() {
        let mut bag =
            AggBag::create(&[F::STARTTIME, F::SIPV6, F::PROTO], &[F::RECORDS]).unwrap();
        let mut k = bag.new_key().unwrap();
        let layout = Arc::clone(k.layout());
        let time = layout.position(F::STARTTIME).unwrap();
        let ip = layout.position(F::SIPV6).unwrap();
        let proto = layout.position(F::PROTO).unwrap();

        let when = Utc.with_ymd_and_hms(2020, 4, 14, 21, 57, 45).unwrap();
        k.set_datetime(time, when).unwrap();
        assert_eq!(k.get_datetime(time).unwrap(), when);
        assert_eq!(k.get_unsigned(time).unwrap(), when.timestamp() as u64);

        k.set_ipaddr(ip, IpAddr::from([192, 168, 1, 1])).unwrap();
        assert_eq!(
            k.get_ipaddr(ip).unwrap(),
            "::ffff:192.168.1.1".parse::<IpAddr>().unwrap()
        );
        assert!(matches!(k.get_unsigned(ip), Err(SilkError::AccessorMismatch(_))));
        assert!(matches!(k.get_datetime(proto), Err(SilkError::AccessorMismatch(_))));
        assert!(matches!(k.get_ipaddr(proto), Err(SilkError::AccessorMismatch(_))));
        assert!(k.set_unsigned(proto, 256).is_err());
        assert!(matches!(k.get_unsigned(9), Err(SilkError::BadIndex(9))));

        let mut c = bag.new_counter().unwrap();
        c.set_unsigned(0, 1).unwrap();
        bag.set(&k, &c).unwrap();
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn test_foreign_aggregates_are_rejected() {
        let mut bag = flow_bag();
        let other = AggBag::create(&[F::SIPV4], &[F::RECORDS]).unwrap();
        let k = other.new_key().unwrap();
        let c = bag.new_counter().unwrap();
        assert!(matches!(bag.add(&k, &c), Err(SilkError::FieldsDifferKey)));

        let k = bag.new_key().unwrap();
        let c = other.new_counter().unwrap();
        assert!(matches!(bag.set(&k, &c), Err(SilkError::FieldsDifferCounter)));
    }

    #[test]
    fn test_merge_bags() {
        let mut a = flow_bag();
        let mut b = flow_bag();
        let k1 = key(&a, [1, 1, 1, 1], 53);
        let k2 = key(&a, [2, 2, 2, 2], 53);
        a.add(&k1, &counter(&a, 10, 1)).unwrap();
        b.add(&k1, &counter(&b, 5, 2)).unwrap();
        b.add(&k2, &counter(&b, 7, 1)).unwrap();

        a.add_aggbag(&b).unwrap();
        assert_eq!(read_counter(&a.get(&k1).unwrap()), (15, 3));
        assert_eq!(read_counter(&a.get(&k2).unwrap()), (7, 1));

        a.subtract_aggbag(&b).unwrap();
        a.subtract_aggbag(&b).unwrap();
        assert_eq!(read_counter(&a.get(&k1).unwrap()), (5, 0));
        assert_eq!(read_counter(&a.get(&k2).unwrap()), (0, 0));

        let c = AggBag::create(&[F::SIPV4, F::DPORT], &[F::RECORDS]).unwrap();
        assert!(matches!(
            a.add_aggbag(&c),
            Err(SilkError::FieldsDifferCounter)
        ));
    }
}
