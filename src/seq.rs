//! The sequential skip-list baseline.
//!
//! `SeqSkipList` shares the structural algorithm of the concurrent variants
//! but owns its nodes outright: each level is a chain of boxed nodes rooted
//! at that level's sentinel, and `down` links are plain pointers into boxes
//! owned by the level below. There is no synchronization of any kind; the
//! type is `Send` (the whole structure can move between threads) but any
//! concurrent use must be externally serialized, which is exactly what
//! [`LockedSkipList`](crate::LockedSkipList) does.

use std::ptr::NonNull;

use crate::error::TowerError;
use crate::DEFAULT_HEIGHT;

/// A node in one level's chain. Sentinels carry no key and no value and
/// compare below every real key.
struct Node<K, V> {
    key: Option<K>,
    value: Option<V>,
    /// Forward link within the same level. Owning: dropping a node would
    /// drop its whole suffix, so bulk release happens iteratively instead.
    next: Option<Box<Node<K, V>>>,
    /// Link to the same key's node one level below, or `None` on the
    /// bottom level.
    down: Option<NonNull<Node<K, V>>>,
}

impl<K, V> Node<K, V> {
    fn sentinel() -> Box<Self> {
        Box::new(Node {
            key: None,
            value: None,
            next: None,
            down: None,
        })
    }

    fn leaf(key: K, value: V, down: Option<NonNull<Node<K, V>>>) -> Box<Self> {
        Box::new(Node {
            key: Some(key),
            value: Some(value),
            next: None,
            down,
        })
    }
}

/// The sequential baseline: a fixed tower of sentinel-headed sorted lists.
///
/// `heads[0]` is the top level, `heads[height - 1]` the bottom level that
/// holds every key. Towers are built once and never resized.
pub struct SeqSkipList<K, V> {
    heads: Vec<Box<Node<K, V>>>,
    len: usize,
}

// SAFETY: every `NonNull` in the structure points into a box owned by the
// structure itself, so moving the whole list to another thread moves all
// of its pointees with it.
unsafe impl<K: Send, V: Send> Send for SeqSkipList<K, V> {}

impl<K: Ord + Clone, V: Clone> SeqSkipList<K, V> {
    /// Creates an empty list with the default tower height.
    pub fn new() -> Self {
        Self::build(DEFAULT_HEIGHT)
    }

    /// Creates an empty list with the given tower height.
    ///
    /// Returns [`TowerError::ZeroHeight`] for a height of zero; a height of
    /// one degenerates to a plain sorted linked list and is legal.
    pub fn with_height(height: usize) -> Result<Self, TowerError> {
        if height == 0 {
            return Err(TowerError::ZeroHeight);
        }
        Ok(Self::build(height))
    }

    fn build(height: usize) -> Self {
        let mut heads = Vec::with_capacity(height);
        for _ in 0..height {
            heads.push(Node::sentinel());
        }
        for level in 1..height {
            let below = NonNull::from(&mut *heads[level]);
            heads[level - 1].down = Some(below);
        }
        SeqSkipList { heads, len: 0 }
    }

    /// Inserts `key`, or overwrites its value if it is already present.
    ///
    /// Descends the tower collecting the rightmost node `<= key` on each
    /// level, then either rewrites the value on every level of an existing
    /// column, or splices a new bottom node and extends the column upward
    /// while a fair coin keeps coming up heads.
    pub fn upsert(&mut self, key: K, value: V) {
        let mut anchors: Vec<*mut Node<K, V>> = Vec::with_capacity(self.heads.len());
        let mut current: *mut Node<K, V> = &mut *self.heads[0];
        loop {
            // SAFETY: `current` points into a box owned by this structure,
            // and `&mut self` guarantees no other live reference into it.
            let anchor = unsafe { Self::level_search_raw(current, &key) };
            anchors.push(anchor);
            match unsafe { (*anchor).down } {
                Some(below) => current = below.as_ptr(),
                None => break,
            }
        }

        let mut updated = false;
        for &anchor in &anchors {
            // SAFETY: anchors live on distinct levels, so only one mutable
            // reference is ever derived from them at a time.
            let node = unsafe { &mut *anchor };
            if node.key.as_ref() == Some(&key) {
                node.value = Some(value.clone());
                updated = true;
            }
        }
        if updated {
            return;
        }

        // Insert at the bottom, then promote while the coin cooperates.
        let mut levels = anchors.into_iter().rev();
        let bottom = match levels.next() {
            Some(anchor) => anchor,
            None => return,
        };
        let leaf = Node::leaf(key.clone(), value.clone(), None);
        // SAFETY: splicing rewires anchor chains while `&mut self` holds
        // the only access to the list.
        let mut column = unsafe { Self::chain_node(bottom, leaf) };
        for anchor in levels {
            if !fastrand::bool() {
                break;
            }
            let node = Node::leaf(key.clone(), value.clone(), Some(column));
            column = unsafe { Self::chain_node(anchor, node) };
        }
        self.len += 1;
    }

    /// Looks up `key`, returning a copy of its value.
    ///
    /// Descends level by level and returns as soon as the key shows up;
    /// the column invariant guarantees the bottom holds the same cell.
    pub fn find(&self, key: &K) -> Option<V> {
        let mut current: &Node<K, V> = &self.heads[0];
        loop {
            let reached = Self::level_search(current, key);
            if reached.key.as_ref() == Some(key) {
                return reached.value.clone();
            }
            match reached.down {
                // SAFETY: `down` points into a box owned by this structure,
                // which stays borrowed for the duration of the search.
                Some(below) => current = unsafe { below.as_ref() },
                None => return None,
            }
        }
    }

    /// Walks one level: returns the rightmost node at or before `key`.
    fn level_search<'a>(start: &'a Node<K, V>, key: &K) -> &'a Node<K, V> {
        let mut current = start;
        while let Some(next) = current.next.as_deref() {
            match next.key.as_ref() {
                Some(k) if k <= key => current = next,
                _ => break,
            }
        }
        current
    }

    /// Raw-pointer twin of [`Self::level_search`], used while splice targets
    /// for every level must stay addressable at once.
    unsafe fn level_search_raw(start: *mut Node<K, V>, key: &K) -> *mut Node<K, V> {
        let mut current = start;
        loop {
            let next = match unsafe { (*current).next.as_deref_mut() } {
                Some(next) => next,
                None => return current,
            };
            match next.key.as_ref() {
                Some(k) if k <= key => current = next as *mut _,
                _ => return current,
            }
        }
    }

    /// Splices `node` in directly after `prev` and returns its address.
    unsafe fn chain_node(prev: *mut Node<K, V>, mut node: Box<Node<K, V>>) -> NonNull<Node<K, V>> {
        unsafe {
            node.next = (*prev).next.take();
            let raw = NonNull::from(&mut *node);
            (*prev).next = Some(node);
            raw
        }
    }
}

impl<K, V> SeqSkipList<K, V> {
    /// Returns the number of distinct keys in the list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the list holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the fixed tower height.
    pub fn height(&self) -> usize {
        self.heads.len()
    }

    /// Size in bytes of one node record, for capacity reporting.
    pub const fn node_size() -> usize {
        std::mem::size_of::<Node<K, V>>()
    }

    /// Releases every node, leaving an empty tower of the same height.
    pub fn clear(&mut self) {
        for head in &mut self.heads {
            // Unlink iteratively; letting the owned chain drop on its own
            // would recurse once per node.
            let mut chain = head.next.take();
            while let Some(mut node) = chain {
                chain = node.next.take();
            }
        }
        self.len = 0;
    }
}

impl<K, V> Drop for SeqSkipList<K, V> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<K: Ord + Clone, V: Clone> Default for SeqSkipList<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Walks the raw structure and checks the per-level order, column and
    /// tower-prefix invariants.
    fn check_invariants(list: &SeqSkipList<i64, i64>) {
        let height = list.heads.len();
        for (level, head) in list.heads.iter().enumerate() {
            let mut previous: Option<&i64> = None;
            let mut cursor = head.next.as_deref();
            while let Some(node) = cursor {
                let key = node.key.as_ref().expect("non-sentinel node without a key");
                if let Some(prev) = previous {
                    assert!(prev < key, "level {} out of order", level);
                }
                // Column integrity: the down chain carries the same key all
                // the way to the bottom level.
                let mut hops = 0;
                let mut down = node.down;
                while let Some(below) = down {
                    let below = unsafe { below.as_ref() };
                    assert_eq!(below.key.as_ref(), Some(key));
                    down = below.down;
                    hops += 1;
                }
                assert_eq!(hops, height - 1 - level, "column does not reach the bottom");
                previous = Some(key);
                cursor = node.next.as_deref();
            }
        }
    }

    #[test]
    fn builds_linked_sentinel_tower() {
        let list: SeqSkipList<i64, i64> = SeqSkipList::with_height(4).unwrap();
        assert_eq!(list.height(), 4);
        for level in 0..3 {
            let below = list.heads[level].down.expect("sentinel missing down link");
            assert_eq!(below.as_ptr() as *const _, &*list.heads[level + 1] as *const _);
        }
        assert!(list.heads[3].down.is_none());
        assert!(list.is_empty());
    }

    #[test]
    fn rejects_zero_height() {
        assert!(matches!(
            SeqSkipList::<i64, i64>::with_height(0),
            Err(TowerError::ZeroHeight)
        ));
    }

    #[test]
    fn invariants_hold_after_shuffled_inserts() {
        let mut list = SeqSkipList::with_height(6).unwrap();
        let mut keys: Vec<i64> = (0..500).collect();
        fastrand::seed(0x5eed);
        fastrand::shuffle(&mut keys);
        for &k in &keys {
            list.upsert(k, k * 10);
        }
        assert_eq!(list.len(), 500);
        check_invariants(&list);
    }

    #[test]
    fn update_rewrites_every_level_of_the_column() {
        let mut list = SeqSkipList::with_height(8).unwrap();
        for k in 0..64 {
            list.upsert(k, 0i64);
        }
        for k in 0..64 {
            list.upsert(k, k + 1);
        }
        assert_eq!(list.len(), 64);
        for head in &list.heads {
            let mut cursor = head.next.as_deref();
            while let Some(node) = cursor {
                let key = *node.key.as_ref().unwrap();
                assert_eq!(node.value, Some(key + 1));
                cursor = node.next.as_deref();
            }
        }
    }

    #[test]
    fn clear_empties_and_list_remains_usable() {
        let mut list = SeqSkipList::with_height(5).unwrap();
        for k in 0..100 {
            list.upsert(k, k);
        }
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.find(&17), None);
        list.upsert(17, 34);
        assert_eq!(list.find(&17), Some(34));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn drop_releases_long_chains_without_recursion() {
        let mut list = SeqSkipList::with_height(1).unwrap();
        for k in 0..50_000 {
            list.upsert(k, k);
        }
        drop(list);
    }

    #[test]
    fn node_size_is_reported() {
        assert!(SeqSkipList::<i64, i64>::node_size() >= std::mem::size_of::<usize>());
    }
}
