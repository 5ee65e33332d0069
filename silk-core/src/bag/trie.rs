//! Fixed-depth 256-way trie for bag keys of up to four octets
//!
//! Each level consumes one octet of the key, most significant first.
//! Interior nodes and leaf blocks live in two arenas and are addressed by
//! index; a child slot holding 0 is empty, otherwise it holds index + 1.

use crate::cidr;
use crate::{Result, SilkError};

const FANOUT: usize = 256;

type Node = Box<[u32; FANOUT]>;
type Leaf = Box<[u64; FANOUT]>;

/// Arena sizes of a [`BitTrie`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TrieStats {
    pub nodes: u64,
    pub leaves: u64,
    pub unique_keys: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct BitTrie {
    levels: usize,
    /// Index + 1 of the root: a node, or a leaf when `levels == 1`
    root: u32,
    nodes: Vec<Node>,
    leaves: Vec<Leaf>,
}

impl BitTrie {
    /// Trie for keys of `octets` bytes (1, 2 or 4)
    pub fn new(octets: usize) -> Self {
        debug_assert!(matches!(octets, 1 | 2 | 4));
        Self {
            levels: octets,
            root: 0,
            nodes: Vec::new(),
            leaves: Vec::new(),
        }
    }

    pub fn octets(&self) -> usize {
        self.levels
    }

    /// Largest key the trie can hold
    pub fn max_key(&self) -> u32 {
        match self.levels {
            4 => u32::MAX,
            n => (1u32 << (8 * n)) - 1,
        }
    }

    fn byte_at(&self, key: u32, level: usize) -> usize {
        ((key >> (8 * (self.levels - 1 - level))) & 0xFF) as usize
    }

    fn is_leaf_level(&self, level: usize) -> bool {
        level == self.levels - 1
    }

    /// Leaf index and slot for `key`, without allocating
    fn find(&self, key: u32) -> Option<(usize, usize)> {
        let mut slot = self.root;
        for level in 0..self.levels - 1 {
            if slot == 0 {
                return None;
            }
            slot = self.nodes[slot as usize - 1][self.byte_at(key, level)];
        }
        if slot == 0 {
            return None;
        }
        Some((slot as usize - 1, self.byte_at(key, self.levels - 1)))
    }

    /// Leaf index and slot for `key`, allocating the path
    fn find_or_insert(&mut self, key: u32) -> (usize, usize) {
        if self.root == 0 {
            self.root = if self.levels == 1 {
                self.alloc_leaf()
            } else {
                self.alloc_node()
            };
        }
        let mut slot = self.root;
        for level in 0..self.levels - 1 {
            let node = slot as usize - 1;
            let byte = self.byte_at(key, level);
            let mut child = self.nodes[node][byte];
            if child == 0 {
                child = if self.is_leaf_level(level + 1) {
                    self.alloc_leaf()
                } else {
                    self.alloc_node()
                };
                self.nodes[node][byte] = child;
            }
            slot = child;
        }
        (slot as usize - 1, self.byte_at(key, self.levels - 1))
    }

    fn alloc_node(&mut self) -> u32 {
        self.nodes.push(Box::new([0; FANOUT]));
        self.nodes.len() as u32
    }

    fn alloc_leaf(&mut self) -> u32 {
        self.leaves.push(Box::new([0; FANOUT]));
        self.leaves.len() as u32
    }

    pub fn get(&self, key: u32) -> u64 {
        match self.find(key) {
            Some((leaf, slot)) => self.leaves[leaf][slot],
            None => 0,
        }
    }

    /// Store `value`; a zero value never allocates
    pub fn set(&mut self, key: u32, value: u64) {
        if value == 0 {
            if let Some((leaf, slot)) = self.find(key) {
                self.leaves[leaf][slot] = 0;
            }
            return;
        }
        let (leaf, slot) = self.find_or_insert(key);
        self.leaves[leaf][slot] = value;
    }

    /// Saturating add; returns the new counter
    pub fn add(&mut self, key: u32, value: u64) -> u64 {
        if value == 0 {
            return self.get(key);
        }
        let (leaf, slot) = self.find_or_insert(key);
        let counter = &mut self.leaves[leaf][slot];
        *counter = counter.saturating_add(value);
        *counter
    }

    /// Returns the new counter, or an underflow error leaving it unchanged
    pub fn subtract(&mut self, key: u32, value: u64) -> Result<u64> {
        match self.find(key) {
            Some((leaf, slot)) => {
                let counter = &mut self.leaves[leaf][slot];
                *counter = counter.checked_sub(value).ok_or(SilkError::Underflow)?;
                Ok(*counter)
            }
            None if value == 0 => Ok(0),
            None => Err(SilkError::Underflow),
        }
    }

    pub fn iter(&self) -> TrieIter<'_> {
        let mut stack = Vec::with_capacity(self.levels);
        if self.root != 0 {
            stack.push((self.root as usize - 1, 0));
        }
        TrieIter { trie: self, stack }
    }

    /// Saturating sum of the counters for keys in `lo..=hi`
    pub fn sum_range(&self, lo: u32, hi: u32) -> Result<u64> {
        if lo <= hi && lo > self.max_key() {
            return Ok(0);
        }
        let bits = (self.levels * 8) as u8;
        let blocks = cidr::range_to_blocks(lo as u128, hi.min(self.max_key()) as u128, bits)?;
        let mut total = 0u64;
        for block in blocks {
            if self.root != 0 {
                let sum = self.sum_block(self.root as usize - 1, 0, block.start as u32, block.prefix);
                total = total.saturating_add(sum);
            }
        }
        Ok(total)
    }

    /// Sum under arena entry `index` at `level` for keys matching the
    /// first `prefix` bits of `start`
    fn sum_block(&self, index: usize, level: usize, start: u32, prefix: u8) -> u64 {
        let fixed = (prefix as usize).saturating_sub(level * 8).min(8);
        let mask = 0xFFusize >> fixed;
        let first = self.byte_at(start, level) & !mask & 0xFF;
        let last = first | mask;

        let mut total = 0u64;
        if self.is_leaf_level(level) {
            for counter in &self.leaves[index][first..=last] {
                total = total.saturating_add(*counter);
            }
            return total;
        }
        for &child in &self.nodes[index][first..=last] {
            if child != 0 {
                let sum = self.sum_block(child as usize - 1, level + 1, start, prefix);
                total = total.saturating_add(sum);
            }
        }
        total
    }

    pub fn stats(&self) -> TrieStats {
        TrieStats {
            nodes: self.nodes.len() as u64,
            leaves: self.leaves.len() as u64,
            unique_keys: self.iter().count() as u64,
        }
    }

    pub fn node_bytes() -> u64 {
        std::mem::size_of::<[u32; FANOUT]>() as u64
    }

    pub fn leaf_bytes() -> u64 {
        std::mem::size_of::<[u64; FANOUT]>() as u64
    }
}

/// Ascending walk over the non-zero counters of a trie
pub(crate) struct TrieIter<'a> {
    trie: &'a BitTrie,
    /// Arena index and next slot to visit, one entry per level on the path
    stack: Vec<(usize, usize)>,
}

impl Iterator for TrieIter<'_> {
    type Item = (u32, u64);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let depth = self.stack.len();
            let (index, slot) = *self.stack.last()?;
            if slot == FANOUT {
                self.stack.pop();
                continue;
            }
            if let Some(top) = self.stack.last_mut() {
                top.1 += 1;
            }

            if self.trie.is_leaf_level(depth - 1) {
                let counter = self.trie.leaves[index][slot];
                if counter != 0 {
                    let key = self
                        .stack
                        .iter()
                        .fold(0u32, |key, &(_, next)| (key << 8) | (next as u32 - 1));
                    return Some((key, counter));
                }
            } else {
                let child = self.trie.nodes[index][slot];
                if child != 0 {
                    self.stack.push((child as usize - 1, 0));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::BTreeMap;

    #[test]
    fn test_get_set_each_width() {
        for octets in [1, 2, 4] {
            let mut trie = BitTrie::new(octets);
            let max = trie.max_key();
            trie.set(0, 5);
            trie.set(max, 9);
            assert_eq!(trie.get(0), 5);
            assert_eq!(trie.get(max), 9);
            assert_eq!(trie.get(1), 0);
            let all: Vec<_> = trie.iter().collect();
            assert_eq!(all, vec![(0, 5), (max, 9)]);
        }
    }

    #[test]
    fn test_zero_set_does_not_allocate() {
        let mut trie = BitTrie::new(4);
        trie.set(0x0A000001, 0);
        assert_eq!(trie.stats().nodes, 0);
        assert_eq!(trie.stats().leaves, 0);
        trie.set(0x0A000001, 1);
        assert_eq!(trie.stats().nodes, 3);
        assert_eq!(trie.stats().leaves, 1);
    }

    #[test]
    fn test_add_saturates_and_subtract_underflows() {
        let mut trie = BitTrie::new(2);
        trie.set(7, u64::MAX - 1);
        assert_eq!(trie.add(7, 2), u64::MAX);
        trie.set(8, 3);
        assert!(matches!(trie.subtract(8, 5), Err(SilkError::Underflow)));
        assert_eq!(trie.get(8), 3);
        assert_eq!(trie.subtract(8, 3).unwrap(), 0);
        assert_eq!(trie.subtract(9, 0).unwrap(), 0);
        assert!(trie.subtract(9, 1).is_err());
    }

    #[test]
    fn test_iteration_matches_sorted_keys() {
        let mut rng = rand::thread_rng();
        let mut trie = BitTrie::new(4);
        let mut model = BTreeMap::new();
        for _ in 0..10_000 {
            let key: u32 = rng.gen();
            let value = rng.gen_range(1..1000u64);
            trie.set(key, value);
            model.insert(key, value);
        }
        let walked: Vec<_> = trie.iter().collect();
        let expected: Vec<_> = model.into_iter().collect();
        assert_eq!(walked, expected);
    }

    #[test]
    fn test_sum_range() {
        let mut trie = BitTrie::new(4);
        let mut model = BTreeMap::new();
        let mut rng = rand::thread_rng();
        for _ in 0..2000 {
            let key = rng.gen_range(0x0A000000..0x0A0FFFFFu32);
            trie.set(key, 1 + (key & 0xF) as u64);
            model.insert(key, 1 + (key & 0xF) as u64);
        }
        for _ in 0..50 {
            let a = rng.gen_range(0x09FFFF00..0x0A100100u32);
            let b = rng.gen_range(0x09FFFF00..0x0A100100u32);
            let (lo, hi) = (a.min(b), a.max(b));
            let expected: u64 = model.range(lo..=hi).map(|(_, v)| v).sum();
            assert_eq!(trie.sum_range(lo, hi).unwrap(), expected);
        }
        assert_eq!(trie.sum_range(0, u32::MAX).unwrap(), model.values().sum::<u64>());
    }
}
