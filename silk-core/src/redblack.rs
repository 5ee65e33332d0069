//! Arena-backed red-black tree
//!
//! Nodes live in a vector and link to each other by index. Index 0 is the
//! shared black sentinel, so the fixup loops never test for a missing
//! child. Freed slots are recycled through a free list.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::mem;

const NIL: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    left: usize,
    right: usize,
    parent: usize,
    color: Color,
}

impl Link {
    const SENTINEL: Link = Link {
        left: NIL,
        right: NIL,
        parent: NIL,
        color: Color::Black,
    };
}

/// Ordered map kept balanced as a red-black tree
#[derive(Debug, Clone)]
pub(crate) struct RbTree<K, V> {
    links: Vec<Link>,
    slots: Vec<Option<(K, V)>>,
    free: Vec<usize>,
    root: usize,
    len: usize,
}

impl<K: Ord, V> Default for RbTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V> RbTree<K, V> {
    pub fn new() -> Self {
        Self {
            links: vec![Link::SENTINEL],
            slots: vec![None],
            free: Vec::new(),
            root: NIL,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Slots allocated, live or free; sentinel excluded
    pub fn capacity(&self) -> usize {
        self.links.len() - 1
    }

    fn entry(&self, x: usize) -> &(K, V) {
        match &self.slots[x] {
            Some(kv) => kv,
            None => panic!("red-black tree links to free slot {}", x),
        }
    }

    fn key(&self, x: usize) -> &K {
        &self.entry(x).0
    }

    fn left(&self, x: usize) -> usize {
        self.links[x].left
    }

    fn right(&self, x: usize) -> usize {
        self.links[x].right
    }

    fn parent(&self, x: usize) -> usize {
        self.links[x].parent
    }

    fn color(&self, x: usize) -> Color {
        self.links[x].color
    }

    fn set_color(&mut self, x: usize, color: Color) {
        self.links[x].color = color;
    }

    fn find<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut x = self.root;
        while x != NIL {
            match key.cmp(self.key(x).borrow()) {
                Ordering::Less => x = self.left(x),
                Ordering::Greater => x = self.right(x),
                Ordering::Equal => return x,
            }
        }
        NIL
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        match self.find(key) {
            NIL => None,
            x => Some(&self.entry(x).1),
        }
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        match self.find(key) {
            NIL => None,
            x => self.slots[x].as_mut().map(|(_, v)| v),
        }
    }

    /// Insert or replace; returns the previous value
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let mut y = NIL;
        let mut x = self.root;
        let mut went_left = false;
        while x != NIL {
            y = x;
            match key.cmp(self.key(x)) {
                Ordering::Less => {
                    went_left = true;
                    x = self.left(x);
                }
                Ordering::Greater => {
                    went_left = false;
                    x = self.right(x);
                }
                Ordering::Equal => {
                    return self.slots[x].as_mut().map(|(_, v)| mem::replace(v, value));
                }
            }
        }

        let z = self.alloc(key, value);
        self.links[z] = Link {
            left: NIL,
            right: NIL,
            parent: y,
            color: Color::Red,
        };
        if y == NIL {
            self.root = z;
        } else if went_left {
            self.links[y].left = z;
        } else {
            self.links[y].right = z;
        }
        self.len += 1;
        self.insert_fixup(z);
        None
    }

    /// Remove `key`, returning its entry
    pub fn remove<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let z = self.find(key);
        if z == NIL {
            return None;
        }
        self.delete(z);
        self.len -= 1;
        let kv = self.slots[z].take();
        self.links[z] = Link::SENTINEL;
        self.free.push(z);
        kv
    }

    fn alloc(&mut self, key: K, value: V) -> usize {
        match self.free.pop() {
            Some(i) => {
                self.slots[i] = Some((key, value));
                i
            }
            None => {
                self.links.push(Link::SENTINEL);
                self.slots.push(Some((key, value)));
                self.links.len() - 1
            }
        }
    }

    fn rotate_left(&mut self, x: usize) {
        let y = self.right(x);
        let y_left = self.left(y);
        self.links[x].right = y_left;
        if y_left != NIL {
            self.links[y_left].parent = x;
        }
        let xp = self.parent(x);
        self.links[y].parent = xp;
        if xp == NIL {
            self.root = y;
        } else if x == self.left(xp) {
            self.links[xp].left = y;
        } else {
            self.links[xp].right = y;
        }
        self.links[y].left = x;
        self.links[x].parent = y;
    }

    fn rotate_right(&mut self, x: usize) {
        let y = self.left(x);
        let y_right = self.right(y);
        self.links[x].left = y_right;
        if y_right != NIL {
            self.links[y_right].parent = x;
        }
        let xp = self.parent(x);
        self.links[y].parent = xp;
        if xp == NIL {
            self.root = y;
        } else if x == self.right(xp) {
            self.links[xp].right = y;
        } else {
            self.links[xp].left = y;
        }
        self.links[y].right = x;
        self.links[x].parent = y;
    }

    fn insert_fixup(&mut self, mut z: usize) {
        while self.color(self.parent(z)) == Color::Red {
            let zp = self.parent(z);
            let zpp = self.parent(zp);
            if zp == self.left(zpp) {
                let uncle = self.right(zpp);
                if self.color(uncle) == Color::Red {
                    self.set_color(zp, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(zpp, Color::Red);
                    z = zpp;
                } else {
                    if z == self.right(zp) {
                        z = zp;
                        self.rotate_left(z);
                    }
                    let zp = self.parent(z);
                    let zpp = self.parent(zp);
                    self.set_color(zp, Color::Black);
                    self.set_color(zpp, Color::Red);
                    self.rotate_right(zpp);
                }
            } else {
                let uncle = self.left(zpp);
                if self.color(uncle) == Color::Red {
                    self.set_color(zp, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(zpp, Color::Red);
                    z = zpp;
                } else {
                    if z == self.left(zp) {
                        z = zp;
                        self.rotate_right(z);
                    }
                    let zp = self.parent(z);
                    let zpp = self.parent(zp);
                    self.set_color(zp, Color::Black);
                    self.set_color(zpp, Color::Red);
                    self.rotate_left(zpp);
                }
            }
        }
        let root = self.root;
        self.set_color(root, Color::Black);
    }

    fn transplant(&mut self, u: usize, v: usize) {
        let up = self.parent(u);
        if up == NIL {
            self.root = v;
        } else if u == self.left(up) {
            self.links[up].left = v;
        } else {
            self.links[up].right = v;
        }
        // the sentinel's parent is written on purpose; delete_fixup reads it
        self.links[v].parent = up;
    }

    fn minimum(&self, mut x: usize) -> usize {
        while self.left(x) != NIL {
            x = self.left(x);
        }
        x
    }

    fn successor(&self, mut x: usize) -> usize {
        if self.right(x) != NIL {
            return self.minimum(self.right(x));
        }
        let mut y = self.parent(x);
        while y != NIL && x == self.right(y) {
            x = y;
            y = self.parent(y);
        }
        y
    }

    fn delete(&mut self, z: usize) {
        let mut y = z;
        let mut y_color = self.color(y);
        let x;
        if self.left(z) == NIL {
            x = self.right(z);
            self.transplant(z, x);
        } else if self.right(z) == NIL {
            x = self.left(z);
            self.transplant(z, x);
        } else {
            y = self.minimum(self.right(z));
            y_color = self.color(y);
            x = self.right(y);
            if self.parent(y) == z {
                self.links[x].parent = y;
            } else {
                let yr = self.right(y);
                self.transplant(y, yr);
                let zr = self.right(z);
                self.links[y].right = zr;
                self.links[zr].parent = y;
            }
            self.transplant(z, y);
            let zl = self.left(z);
            self.links[y].left = zl;
            self.links[zl].parent = y;
            let zc = self.color(z);
            self.set_color(y, zc);
        }
        if y_color == Color::Black {
            self.delete_fixup(x);
        }
        self.links[NIL] = Link::SENTINEL;
    }

    fn delete_fixup(&mut self, mut x: usize) {
        while x != self.root && self.color(x) == Color::Black {
            let xp = self.parent(x);
            if x == self.left(xp) {
                let mut w = self.right(xp);
                if self.color(w) == Color::Red {
                    self.set_color(w, Color::Black);
                    self.set_color(xp, Color::Red);
                    self.rotate_left(xp);
                    w = self.right(self.parent(x));
                }
                if self.color(self.left(w)) == Color::Black
                    && self.color(self.right(w)) == Color::Black
                {
                    self.set_color(w, Color::Red);
                    x = self.parent(x);
                } else {
                    if self.color(self.right(w)) == Color::Black {
                        let wl = self.left(w);
                        self.set_color(wl, Color::Black);
                        self.set_color(w, Color::Red);
                        self.rotate_right(w);
                        w = self.right(self.parent(x));
                    }
                    let xp = self.parent(x);
                    let pc = self.color(xp);
                    self.set_color(w, pc);
                    self.set_color(xp, Color::Black);
                    let wr = self.right(w);
                    self.set_color(wr, Color::Black);
                    self.rotate_left(xp);
                    x = self.root;
                }
            } else {
                let mut w = self.left(xp);
                if self.color(w) == Color::Red {
                    self.set_color(w, Color::Black);
                    self.set_color(xp, Color::Red);
                    self.rotate_right(xp);
                    w = self.left(self.parent(x));
                }
                if self.color(self.right(w)) == Color::Black
                    && self.color(self.left(w)) == Color::Black
                {
                    self.set_color(w, Color::Red);
                    x = self.parent(x);
                } else {
                    if self.color(self.left(w)) == Color::Black {
                        let wr = self.right(w);
                        self.set_color(wr, Color::Black);
                        self.set_color(w, Color::Red);
                        self.rotate_left(w);
                        w = self.left(self.parent(x));
                    }
                    let xp = self.parent(x);
                    let pc = self.color(xp);
                    self.set_color(w, pc);
                    self.set_color(xp, Color::Black);
                    let wl = self.left(w);
                    self.set_color(wl, Color::Black);
                    self.rotate_right(xp);
                    x = self.root;
                }
            }
        }
        self.set_color(x, Color::Black);
    }

    /// Entries in ascending key order
    pub fn iter(&self) -> Iter<'_, K, V> {
        let first = if self.root == NIL {
            NIL
        } else {
            self.minimum(self.root)
        };
        Iter {
            tree: self,
            next: first,
        }
    }

    /// Entries whose key is `>= key`, ascending
    pub fn iter_from<Q>(&self, key: &Q) -> Iter<'_, K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut candidate = NIL;
        let mut x = self.root;
        while x != NIL {
            if self.key(x).borrow() >= key {
                candidate = x;
                x = self.left(x);
            } else {
                x = self.right(x);
            }
        }
        Iter {
            tree: self,
            next: candidate,
        }
    }

    /// Number of black nodes on every root-to-leaf path.
    ///
    /// Panics if the red-black properties do not hold.
    #[cfg(test)]
    pub fn check_invariants(&self) -> usize {
        fn walk<K: Ord, V>(t: &RbTree<K, V>, x: usize) -> usize {
            if x == NIL {
                return 1;
            }
            let (l, r) = (t.left(x), t.right(x));
            if t.color(x) == Color::Red {
                assert_eq!(t.color(l), Color::Black, "red node with red child");
                assert_eq!(t.color(r), Color::Black, "red node with red child");
            }
            if l != NIL {
                assert!(t.key(l) < t.key(x));
                assert_eq!(t.parent(l), x);
            }
            if r != NIL {
                assert!(t.key(r) > t.key(x));
                assert_eq!(t.parent(r), x);
            }
            let lh = walk(t, l);
            assert_eq!(lh, walk(t, r), "unequal black height");
            lh + usize::from(t.color(x) == Color::Black)
        }
        assert_eq!(self.color(self.root), Color::Black);
        walk(self, self.root)
    }
}

/// In-order iterator over an [`RbTree`]
pub(crate) struct Iter<'a, K, V> {
    tree: &'a RbTree<K, V>,
    next: usize,
}

impl<'a, K: Ord, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NIL {
            return None;
        }
        let x = self.next;
        self.next = self.tree.successor(x);
        let (k, v) = self.tree.entry(x);
        Some((k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    #[test]
    fn test_insert_get_replace() {
        let mut tree = RbTree::new();
        assert!(tree.insert(5u32, "five").is_none());
        assert!(tree.insert(1, "one").is_none());
        assert_eq!(tree.insert(5, "FIVE"), Some("five"));
        assert_eq!(tree.get(&5), Some(&"FIVE"));
        assert_eq!(tree.get(&2), None);
        assert_eq!(tree.len(), 2);
        tree.check_invariants();
    }

    #[test]
    fn test_random_operations_match_btreemap() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);
        let mut tree = RbTree::new();
        let mut model = BTreeMap::new();

        for _ in 0..5_000 {
            let key: u16 = rng.gen_range(0..2_000);
            if rng.gen_bool(0.6) {
                let value: u64 = rng.gen();
                assert_eq!(tree.insert(key, value), model.insert(key, value));
            } else {
                assert_eq!(tree.remove(&key).map(|(_, v)| v), model.remove(&key));
            }
        }
        tree.check_invariants();
        assert_eq!(tree.len(), model.len());
        let ours: Vec<_> = tree.iter().map(|(k, v)| (*k, *v)).collect();
        let theirs: Vec<_> = model.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(ours, theirs);
    }

    #[test]
    fn test_remove_everything_recycles_slots() {
        let mut keys: Vec<u32> = (0..1_000).collect();
        keys.shuffle(&mut rand::thread_rng());
        let mut tree = RbTree::new();
        for &k in &keys {
            tree.insert(k, ());
        }
        keys.shuffle(&mut rand::thread_rng());
        for &k in &keys {
            assert!(tree.remove(&k).is_some());
        }
        assert!(tree.is_empty());
        assert!(tree.iter().next().is_none());

        for &k in &keys[..10] {
            tree.insert(k, ());
        }
        assert_eq!(tree.capacity(), 1_000);
        tree.check_invariants();
    }

    #[test]
    fn test_iter_from_lower_bound() {
        let mut tree = RbTree::new();
        for k in [10u8, 20, 30, 40] {
            tree.insert(k, ());
        }
        let from: Vec<u8> = tree.iter_from(&25).map(|(k, _)| *k).collect();
        assert_eq!(from, vec![30, 40]);
        assert_eq!(tree.iter_from(&41).count(), 0);
        assert_eq!(tree.iter_from(&0).count(), 4);
    }

    #[test]
    fn test_byte_slice_keys() {
        let mut tree: RbTree<Box<[u8]>, u64> = RbTree::new();
        tree.insert(vec![1, 2, 3].into_boxed_slice(), 7);
        tree.insert(vec![1, 2].into_boxed_slice(), 9);
        assert_eq!(tree.get(&[1u8, 2, 3][..]), Some(&7));
        let order: Vec<&[u8]> = tree.iter().map(|(k, _)| &k[..]).collect();
        assert_eq!(order, vec![&[1u8, 2][..], &[1, 2, 3][..]]);
    }
}
