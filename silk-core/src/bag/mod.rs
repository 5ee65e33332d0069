//! Bag: a map from a 1, 2, 4 or 16 octet key to a 64-bit counter
//!
//! Keys of up to four octets live in a [`trie::BitTrie`]; 16-octet keys
//! (IPv6 addresses in network order) live in a red-black tree. A counter
//! of zero is the same as an absent key.
//!
//! A bag with 32-bit keys promotes itself to 16-octet keys when an IPv6
//! key arrives with a non-zero counter, unless auto-conversion is off.

mod fields;
mod io;
mod trie;

pub use fields::{field_type_merge, BagFieldType, CUSTOM_OCTETS};
pub use io::BagEntry;

use crate::redblack::{self, RbTree};
use crate::{Result, SilkError};
use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use trie::{BitTrie, TrieIter};

/// Octet width of every bag counter
pub const COUNTER_OCTETS: usize = 8;

/// A key handed to or returned from a bag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BagKey {
    U8(u8),
    U16(u16),
    U32(u32),
    Ip(IpAddr),
}

impl BagKey {
    /// Integer form; IPv6 keys have one only when IPv4-mapped
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            BagKey::U8(v) => Some(v as u32),
            BagKey::U16(v) => Some(v as u32),
            BagKey::U32(v) => Some(v),
            BagKey::Ip(IpAddr::V4(a)) => Some(u32::from(a)),
            BagKey::Ip(IpAddr::V6(a)) => a.to_ipv4_mapped().map(u32::from),
        }
    }

    /// 16-octet form; integers become IPv4-mapped addresses
    pub fn to_ipv6_bytes(&self) -> [u8; 16] {
        match *self {
            BagKey::Ip(IpAddr::V6(a)) => a.octets(),
            BagKey::Ip(IpAddr::V4(a)) => a.to_ipv6_mapped().octets(),
            other => {
                let v = other.as_u32().unwrap_or(0);
                Ipv4Addr::from(v).to_ipv6_mapped().octets()
            }
        }
    }

    fn is_ipv6(&self) -> bool {
        matches!(self, BagKey::Ip(IpAddr::V6(_)))
    }
}

impl From<u8> for BagKey {
    fn from(v: u8) -> Self {
        BagKey::U8(v)
    }
}

impl From<u16> for BagKey {
    fn from(v: u16) -> Self {
        BagKey::U16(v)
    }
}

impl From<u32> for BagKey {
    fn from(v: u32) -> Self {
        BagKey::U32(v)
    }
}

impl From<IpAddr> for BagKey {
    fn from(v: IpAddr) -> Self {
        BagKey::Ip(v)
    }
}

impl From<Ipv4Addr> for BagKey {
    fn from(v: Ipv4Addr) -> Self {
        BagKey::Ip(IpAddr::V4(v))
    }
}

impl From<Ipv6Addr> for BagKey {
    fn from(v: Ipv6Addr) -> Self {
        BagKey::Ip(IpAddr::V6(v))
    }
}

impl fmt::Display for BagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BagKey::U8(v) => write!(f, "{}", v),
            BagKey::U16(v) => write!(f, "{}", v),
            BagKey::U32(v) => write!(f, "{}", v),
            BagKey::Ip(a) => write!(f, "{}", a),
        }
    }
}

#[derive(Debug, Clone)]
enum Store {
    Trie(BitTrie),
    Tree(RbTree<[u8; 16], u64>),
}

impl Store {
    fn with_octets(octets: usize) -> Self {
        if octets == 16 {
            Store::Tree(RbTree::new())
        } else {
            Store::Trie(BitTrie::new(octets))
        }
    }
}

/// Where a key lands in the bag's storage
enum Slot {
    Int(u32),
    Wide([u8; 16]),
}

/// Memory used by a bag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BagStats {
    /// Interior trie nodes, or tree nodes for 16-octet keys
    pub nodes: u64,
    pub node_bytes: u64,
    /// Trie leaf blocks of 256 counters
    pub leaves: u64,
    pub leaf_bytes: u64,
    pub unique_keys: u64,
}

/// Key to counter map
#[derive(Debug, Clone)]
pub struct Bag {
    key_type: BagFieldType,
    counter_type: BagFieldType,
    key_octets: usize,
    autoconvert: bool,
    store: Store,
}

impl Default for Bag {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a key width; `None` picks the type's natural width
fn resolve_key_octets(key_type: BagFieldType, key_octets: Option<usize>) -> Result<usize> {
    let natural = key_type
        .octets()
        .ok_or_else(|| SilkError::InvalidInput(format!("unknown key type {}", key_type.0)))?;
    let octets = match key_octets {
        None if natural == CUSTOM_OCTETS => {
            return Err(SilkError::InvalidInput(
                "custom key type needs an explicit width".into(),
            ))
        }
        None if natural == 8 => 4,
        None => natural,
        Some(n) => n,
    };
    if !matches!(octets, 1 | 2 | 4 | 16) {
        return Err(SilkError::InvalidInput(format!(
            "key width {} is not 1, 2, 4 or 16",
            octets
        )));
    }
    Ok(octets)
}

impl Bag {
    /// Bag of custom 32-bit keys and custom counters
    pub fn new() -> Self {
        Self {
            key_type: BagFieldType::CUSTOM,
            counter_type: BagFieldType::CUSTOM,
            key_octets: 4,
            autoconvert: true,
            store: Store::with_octets(4),
        }
    }

    /// Bag whose keys and counters describe the given field types.
    ///
    /// `key_octets` of `None` uses the key type's width, with 8-octet types
    /// stored in 4 octets.
    pub fn create(
        key_type: BagFieldType,
        key_octets: Option<usize>,
        counter_type: BagFieldType,
    ) -> Result<Self> {
        let key_octets = resolve_key_octets(key_type, key_octets)?;
        if !counter_type.is_known() {
            return Err(SilkError::InvalidInput(format!(
                "unknown counter type {}",
                counter_type.0
            )));
        }
        Ok(Self {
            key_type,
            counter_type,
            key_octets,
            autoconvert: true,
            store: Store::with_octets(key_octets),
        })
    }

    pub fn key_type(&self) -> BagFieldType {
        self.key_type
    }

    pub fn counter_type(&self) -> BagFieldType {
        self.counter_type
    }

    pub fn key_octets(&self) -> usize {
        self.key_octets
    }

    pub fn counter_octets(&self) -> usize {
        COUNTER_OCTETS
    }

    pub fn autoconvert(&self) -> bool {
        self.autoconvert
    }

    pub fn set_autoconvert(&mut self, enabled: bool) {
        self.autoconvert = enabled;
    }

    /// Change the field types and, when `key_octets` differs, the width.
    ///
    /// Fails with [`SilkError::KeyRange`] when an existing key does not
    /// fit the new width; the bag is unchanged on error.
    pub fn modify(
        &mut self,
        key_type: BagFieldType,
        counter_type: BagFieldType,
        key_octets: Option<usize>,
    ) -> Result<()> {
        let octets = match key_octets {
            Some(n) => resolve_key_octets(key_type, Some(n))?,
            None => self.key_octets,
        };
        if !counter_type.is_known() {
            return Err(SilkError::InvalidInput(format!(
                "unknown counter type {}",
                counter_type.0
            )));
        }
        if octets != self.key_octets {
            self.store = self.rebuild(octets)?;
            self.key_octets = octets;
        }
        self.key_type = key_type;
        self.counter_type = counter_type;
        Ok(())
    }

    fn rebuild(&self, octets: usize) -> Result<Store> {
        let mut store = Store::with_octets(octets);
        match &mut store {
            Store::Tree(tree) => {
                for (key, counter) in self.iter() {
                    tree.insert(key.to_ipv6_bytes(), counter);
                }
            }
            Store::Trie(trie) => {
                for (key, counter) in self.iter() {
                    match key.as_u32() {
                        Some(k) if k <= trie.max_key() => trie.set(k, counter),
                        _ => return Err(SilkError::KeyRange),
                    }
                }
            }
        }
        Ok(store)
    }

    /// Map a key onto storage, widening the bag when needed.
    ///
    /// Returns `None` when the key cannot be stored and the counter is 0,
    /// which makes the operation a no-op.
    fn slot_for_insert(&mut self, key: &BagKey, counter: u64) -> Result<Option<Slot>> {
        if self.key_octets == 16 {
            return Ok(Some(Slot::Wide(key.to_ipv6_bytes())));
        }
        if key.is_ipv6() {
            if counter == 0 {
                return Ok(None);
            }
            if !self.autoconvert {
                return Err(SilkError::KeyRange);
            }
            self.modify(self.key_type.to_ipv6(), self.counter_type, Some(16))?;
            return Ok(Some(Slot::Wide(key.to_ipv6_bytes())));
        }

        let value = key.as_u32().unwrap_or(0);
        let max_key = match &self.store {
            Store::Trie(trie) => trie.max_key(),
            Store::Tree(_) => u32::MAX,
        };
        if value > max_key {
            if counter == 0 {
                return Ok(None);
            }
            if !self.autoconvert {
                return Err(SilkError::KeyRange);
            }
            self.modify(self.key_type, self.counter_type, Some(4))?;
        }
        Ok(Some(Slot::Int(value)))
    }

    /// Map a key onto storage without widening
    fn slot_for_lookup(&self, key: &BagKey) -> Option<Slot> {
        match &self.store {
            Store::Tree(_) => Some(Slot::Wide(key.to_ipv6_bytes())),
            Store::Trie(trie) => {
                if key.is_ipv6() {
                    return None;
                }
                key.as_u32()
                    .filter(|v| *v <= trie.max_key())
                    .map(Slot::Int)
            }
        }
    }

    /// Counter for `key`; 0 when absent
    pub fn get(&self, key: impl Into<BagKey>) -> u64 {
        let key = key.into();
        match (self.slot_for_lookup(&key), &self.store) {
            (Some(Slot::Int(k)), Store::Trie(trie)) => trie.get(k),
            (Some(Slot::Wide(k)), Store::Tree(tree)) => tree.get(&k).copied().unwrap_or(0),
            _ => 0,
        }
    }

    /// Replace the counter for `key`; 0 removes it
    pub fn set(&mut self, key: impl Into<BagKey>, counter: u64) -> Result<()> {
        let key = key.into();
        match (self.slot_for_insert(&key, counter)?, &mut self.store) {
            (Some(Slot::Int(k)), Store::Trie(trie)) => trie.set(k, counter),
            (Some(Slot::Wide(k)), Store::Tree(tree)) => {
                if counter == 0 {
                    tree.remove(&k);
                } else {
                    tree.insert(k, counter);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Add to the counter for `key`, saturating at `u64::MAX`.
    ///
    /// Returns the new counter.
    pub fn add(&mut self, key: impl Into<BagKey>, counter: u64) -> Result<u64> {
        let key = key.into();
        let result = match (self.slot_for_insert(&key, counter)?, &mut self.store) {
            (Some(Slot::Int(k)), Store::Trie(trie)) => trie.add(k, counter),
            (Some(Slot::Wide(k)), Store::Tree(tree)) => match tree.get_mut(&k) {
                Some(current) => {
                    *current = current.saturating_add(counter);
                    *current
                }
                None if counter == 0 => 0,
                None => {
                    tree.insert(k, counter);
                    counter
                }
            },
            _ => 0,
        };
        Ok(result)
    }

    /// Subtract from the counter for `key`.
    ///
    /// Going below zero is [`SilkError::Underflow`] and leaves the counter
    /// alone; subtracting 0 from an absent key is fine. Returns the new
    /// counter.
    pub fn subtract(&mut self, key: impl Into<BagKey>, counter: u64) -> Result<u64> {
        let key = key.into();
        let slot = self.slot_for_lookup(&key);
        match (slot, &mut self.store) {
            (Some(Slot::Int(k)), Store::Trie(trie)) => trie.subtract(k, counter),
            (Some(Slot::Wide(k)), Store::Tree(tree)) => {
                let current = tree.get(&k).copied().unwrap_or(0);
                let left = current.checked_sub(counter).ok_or(SilkError::Underflow)?;
                if left == 0 {
                    tree.remove(&k);
                } else if let Some(c) = tree.get_mut(&k) {
                    *c = left;
                }
                Ok(left)
            }
            _ if counter == 0 => Ok(0),
            _ => Err(SilkError::Underflow),
        }
    }

    /// Drop `key`
    pub fn remove(&mut self, key: impl Into<BagKey>) -> Result<()> {
        self.set(key, 0)
    }

    /// Entries with a non-zero counter in ascending key order.
    ///
    /// Trie-backed bags yield integer keys of the bag's width; 16-octet
    /// bags yield IPv6 addresses.
    pub fn iter(&self) -> BagIter<'_> {
        let inner = match &self.store {
            Store::Trie(trie) => IterInner::Trie(trie.iter(), trie.octets()),
            Store::Tree(tree) => IterInner::Tree(tree.iter()),
        };
        BagIter { inner }
    }

    /// Number of keys with a non-zero counter
    pub fn count_keys(&self) -> u64 {
        match &self.store {
            Store::Trie(trie) => trie.iter().count() as u64,
            Store::Tree(tree) => tree.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Sum of the counters for keys in `lo..=hi`, saturating
    pub fn counter_sum_range(&self, lo: impl Into<BagKey>, hi: impl Into<BagKey>) -> Result<u64> {
        let (lo, hi) = (lo.into(), hi.into());
        match &self.store {
            Store::Trie(trie) => {
                let (Some(lo), Some(hi)) = (lo.as_u32(), hi.as_u32()) else {
                    return Err(SilkError::KeyRange);
                };
                trie.sum_range(lo, hi)
            }
            Store::Tree(tree) => {
                let (lo, hi) = (lo.to_ipv6_bytes(), hi.to_ipv6_bytes());
                if lo > hi {
                    return Err(SilkError::InvalidInput("range start is above end".into()));
                }
                Ok(tree
                    .iter_from(&lo)
                    .take_while(|(k, _)| **k <= hi)
                    .fold(0u64, |sum, (_, c)| sum.saturating_add(*c)))
            }
        }
    }

    /// Add every entry of `src` to this bag, saturating on overflow
    pub fn add_bag(&mut self, src: &Bag) -> Result<()> {
        self.add_bag_with(src, |_, current, addend| Ok(current.saturating_add(addend)))
    }

    /// Add every entry of `src`; `on_overflow(key, current, addend)` picks
    /// the stored value when a sum would exceed `u64::MAX`
    pub fn add_bag_with<F>(&mut self, src: &Bag, mut on_overflow: F) -> Result<()>
    where
        F: FnMut(&BagKey, u64, u64) -> Result<u64>,
    {
        if !self.autoconvert && self.key_octets < src.key_octets {
            return Err(SilkError::KeyRange);
        }
        self.key_type = field_type_merge(self.key_type, src.key_type);
        self.counter_type = field_type_merge(self.counter_type, src.counter_type);

        for (key, counter) in src.iter() {
            let current = self.get(key);
            match current.checked_add(counter) {
                Some(_) => {
                    self.add(key, counter)?;
                }
                None => {
                    let value = on_overflow(&key, current, counter)?;
                    self.set(key, value)?;
                }
            }
        }
        Ok(())
    }

    pub fn tree_stats(&self) -> BagStats {
        match &self.store {
            Store::Trie(trie) => {
                let stats = trie.stats();
                BagStats {
                    nodes: stats.nodes,
                    node_bytes: stats.nodes * BitTrie::node_bytes(),
                    leaves: stats.leaves,
                    leaf_bytes: stats.leaves * BitTrie::leaf_bytes(),
                    unique_keys: stats.unique_keys,
                }
            }
            Store::Tree(tree) => {
                let nodes = tree.len() as u64;
                BagStats {
                    nodes,
                    node_bytes: nodes * (16 + COUNTER_OCTETS as u64),
                    leaves: 0,
                    leaf_bytes: 0,
                    unique_keys: nodes,
                }
            }
        }
    }

    /// Render [`Bag::tree_stats`] the way bag tools print it
    pub fn print_tree_stats(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let stats = self.tree_stats();
        let allocated = stats.nodes + stats.leaves;
        let bytes = stats.node_bytes + stats.leaf_bytes;
        writeln!(out, "{:>18}:  {} ({} bytes)", "nodes allocated", allocated, bytes)?;

        let slots = match &self.store {
            Store::Trie(_) => stats.leaves * 256,
            Store::Tree(_) => stats.nodes,
        };
        let density = if slots == 0 {
            0.0
        } else {
            100.0 * stats.unique_keys as f64 / slots as f64
        };
        writeln!(out, "{:>18}:  {:.02}%", "counter density", density)
    }
}

enum IterInner<'a> {
    Trie(TrieIter<'a>, usize),
    Tree(redblack::Iter<'a, [u8; 16], u64>),
}

/// Iterator returned by [`Bag::iter`]
pub struct BagIter<'a> {
    inner: IterInner<'a>,
}

impl Iterator for BagIter<'_> {
    type Item = (BagKey, u64);

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            IterInner::Trie(it, octets) => {
                let (k, c) = it.next()?;
                let key = match octets {
                    1 => BagKey::U8(k as u8),
                    2 => BagKey::U16(k as u16),
                    _ => BagKey::U32(k),
                };
                Some((key, c))
            }
            IterInner::Tree(it) => {
                let (k, c) = it.next()?;
                Some((BagKey::Ip(IpAddr::V6(Ipv6Addr::from(*k))), *c))
            }
        }
    }
}

impl<'a> IntoIterator for &'a Bag {
    type Item = (BagKey, u64);
    type IntoIter = BagIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn v6(s: &str) -> BagKey {
        BagKey::Ip(s.parse().unwrap())
    }

    #[test]
    fn test_absent_keys_read_zero() {
        let bag = Bag::new();
        assert_eq!(bag.get(42u32), 0);
        assert_eq!(bag.get(v6("2001:db8::1")), 0);
        assert!(bag.is_empty());
    }

    #[test]
    fn test_set_get_idempotent() {
        let mut bag = Bag::new();
        bag.set(7u32, 3).unwrap();
        bag.set(7u32, 3).unwrap();
        assert_eq!(bag.get(7u32), 3);
        assert_eq!(bag.count_keys(), 1);
        bag.remove(7u32).unwrap();
        assert_eq!(bag.count_keys(), 0);
    }

    #[test]
    fn test_add_saturates() {
        let mut bag = Bag::new();
        bag.set(1u32, u64::MAX - 1).unwrap();
        assert_eq!(bag.add(1u32, 2).unwrap(), u64::MAX);
        assert_eq!(bag.get(1u32), u64::MAX);
    }

    #[test]
    fn test_subtract_underflow() {
        let mut bag = Bag::new();
        bag.set(5u32, 3).unwrap();
        assert!(matches!(bag.subtract(5u32, 5), Err(SilkError::Underflow)));
        assert_eq!(bag.get(5u32), 3);
        assert_eq!(bag.subtract(5u32, 2).unwrap(), 1);
        assert_eq!(bag.subtract(99u32, 0).unwrap(), 0);
        assert!(bag.subtract(99u32, 1).is_err());
    }

    #[test]
    fn test_ipv4_bag_promotes_on_ipv6_key() {
        let mut bag = Bag::create(BagFieldType::SIPV4, None, BagFieldType::RECORDS).unwrap();
        assert_eq!(bag.key_octets(), 4);
        bag.set(0x01020304u32, 7).unwrap();
        bag.set(v6("::ffff:5.6.7.8"), 11).unwrap();

        assert_eq!(bag.key_octets(), 16);
        assert_eq!(bag.key_type(), BagFieldType::SIPV6);
        let entries: Vec<_> = bag.iter().collect();
        assert_eq!(entries[0], (v6("::ffff:1.2.3.4"), 7));
        assert_eq!(entries[1], (v6("::ffff:5.6.7.8"), 11));
        assert_eq!(bag.get(0x01020304u32), 7);
    }

    #[test]
    fn test_promotion_refused_without_autoconvert() {
        let mut bag = Bag::new();
        bag.set_autoconvert(false);
        assert!(matches!(
            bag.set(v6("2001:db8::1"), 1),
            Err(SilkError::KeyRange)
        ));
        bag.set(v6("2001:db8::1"), 0).unwrap();
        assert_eq!(bag.key_octets(), 4);

        let mut narrow = Bag::create(BagFieldType::SPORT, None, BagFieldType::RECORDS).unwrap();
        narrow.set_autoconvert(false);
        assert!(matches!(narrow.set(70_000u32, 1), Err(SilkError::KeyRange)));
        narrow.set_autoconvert(true);
        narrow.set(70_000u32, 1).unwrap();
        assert_eq!(narrow.key_octets(), 4);
    }

    #[test]
    fn test_create_widths() {
        let bag = Bag::create(BagFieldType::RECORDS, None, BagFieldType::RECORDS).unwrap();
        assert_eq!(bag.key_octets(), 4);
        assert!(Bag::create(BagFieldType::CUSTOM, None, BagFieldType::RECORDS).is_err());
        assert!(Bag::create(BagFieldType::CUSTOM, Some(8), BagFieldType::RECORDS).is_err());
        assert!(Bag::create(BagFieldType(21), None, BagFieldType::RECORDS).is_err());
        let proto = Bag::create(BagFieldType::PROTO, None, BagFieldType::SUM_BYTES).unwrap();
        assert_eq!(proto.key_octets(), 1);
    }

    #[test]
    fn test_random_keys_iterate_sorted() {
        let mut rng = rand::thread_rng();
        let mut bag = Bag::new();
        let mut keys = Vec::new();
        for _ in 0..10_000 {
            let key: u32 = rng.gen();
            bag.set(key, 1).unwrap();
            keys.push(key);
        }
        keys.sort_unstable();
        keys.dedup();

        let walked: Vec<u32> = bag.iter().filter_map(|(k, _)| k.as_u32()).collect();
        assert_eq!(walked, keys);
    }

    #[test]
    fn test_wide_bag_operations() {
        let mut bag = Bag::create(BagFieldType::SIPV6, None, BagFieldType::RECORDS).unwrap();
        bag.set(v6("2001:db8::2"), 4).unwrap();
        bag.add(v6("2001:db8::1"), 6).unwrap();
        bag.add(0x0A000001u32, 1).unwrap();
        assert_eq!(bag.subtract(v6("2001:db8::2"), 4).unwrap(), 0);
        assert_eq!(bag.count_keys(), 2);

        let keys: Vec<_> = bag.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![v6("::ffff:10.0.0.1"), v6("2001:db8::1")]);
        assert_eq!(
            bag.counter_sum_range(v6("::"), v6("2001:db8::ffff")).unwrap(),
            7
        );
    }

    #[test]
    fn test_counter_sum_range_narrow() {
        let mut bag = Bag::create(BagFieldType::DPORT, None, BagFieldType::RECORDS).unwrap();
        for port in [22u16, 80, 443, 8080] {
            bag.set(port, port as u64).unwrap();
        }
        assert_eq!(bag.counter_sum_range(0u16, 1023u16).unwrap(), 545);
        assert_eq!(bag.counter_sum_range(81u16, 442u16).unwrap(), 0);
        assert_eq!(bag.counter_sum_range(0u32, 0x1_0000u32).unwrap(), 8625);
    }

    #[test]
    fn test_add_bag_merges_types_and_counts() {
        let mut a = Bag::create(BagFieldType::SIPV4, None, BagFieldType::RECORDS).unwrap();
        a.set(1u32, 10).unwrap();
        a.set(2u32, u64::MAX).unwrap();
        let mut b = Bag::create(BagFieldType::DIPV4, None, BagFieldType::RECORDS).unwrap();
        b.set(1u32, 5).unwrap();
        b.set(2u32, 1).unwrap();
        b.set(3u32, 1).unwrap();

        let mut overflows = 0;
        a.add_bag_with(&b, |_, current, _| {
            overflows += 1;
            Ok(current)
        })
        .unwrap();
        assert_eq!(overflows, 1);
        assert_eq!(a.key_type(), BagFieldType::ANY_IPV4);
        assert_eq!(a.get(1u32), 15);
        assert_eq!(a.get(2u32), u64::MAX);
        assert_eq!(a.get(3u32), 1);

        let mut wide = Bag::create(BagFieldType::SIPV6, None, BagFieldType::RECORDS).unwrap();
        wide.set(v6("2001:db8::1"), 1).unwrap();
        a.set_autoconvert(false);
        assert!(matches!(a.add_bag(&wide), Err(SilkError::KeyRange)));
    }

    #[test]
    fn test_modify_narrows_only_when_keys_fit() {
        let mut bag = Bag::new();
        bag.set(300u32, 1).unwrap();
        assert!(matches!(
            bag.modify(BagFieldType::CUSTOM, BagFieldType::CUSTOM, Some(1)),
            Err(SilkError::KeyRange)
        ));
        assert_eq!(bag.get(300u32), 1);
        bag.modify(BagFieldType::CUSTOM, BagFieldType::CUSTOM, Some(2))
            .unwrap();
        assert_eq!(bag.key_octets(), 2);
        assert_eq!(bag.get(300u16), 1);
    }

    #[test]
    fn test_stats() {
        let mut bag = Bag::new();
        bag.set(0x0A000001u32, 1).unwrap();
        bag.set(0x0A000002u32, 1).unwrap();
        let stats = bag.tree_stats();
        assert_eq!(stats.nodes, 3);
        assert_eq!(stats.leaves, 1);
        assert_eq!(stats.unique_keys, 2);

        let mut out = String::new();
        bag.print_tree_stats(&mut out).unwrap();
        assert!(out.contains("nodes allocated:  4"));
        assert!(out.contains("counter density:  0.78%"));
    }
}
