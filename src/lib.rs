#![doc = include_str!("../README.md")]
//! The core, single-writer / multi-reader lock-free skip list.
//!
//! This module holds `SkipList`, the variant the crate is built around.
//! The other two variants ([`SeqSkipList`] and [`LockedSkipList`]) share
//! its structural algorithm and relax or replace the ordering discipline.
//!
//! # Internals
//!
//! - **Tower:** a fixed stack of sentinel-headed sorted lists, one per
//!   level, joined by `down` pointers. `heads[0]` is the top level; the
//!   bottom level holds every key.
//!
//! ```text
//! level 0:  HEAD ────────────────────────► 30 ──────────────────► (null)
//!             │                             │
//! level 1:  HEAD ──────────► 10 ──────────► 30 ──────────────────► (null)
//!             │               │              │
//! level 2:  HEAD ──► 5 ─────► 10 ──► 20 ──► 30 ──────────► 40 ──► (null)
//! ```
//!
//! - **Publication:** a new node is fully initialized (key, value, `down`,
//!   `next`) while still private to the writer, then linked in with one
//!   release store of its predecessor's `next`. Readers traverse with
//!   acquire loads, so observing the link implies observing the whole
//!   node. A reader that races ahead of the link simply misses the node
//!   at that level and keeps descending.
//! - **Handles:** `with_height` yields the unique writer; [`Reader`]
//!   handles are cloned off it. `upsert` takes `&mut self`, so the
//!   single-writer precondition is checked by the compiler rather than
//!   promised in a comment.
//! - **Reclamation:** nothing is ever unlinked while the structure is
//!   live, so readers cannot observe freed memory and no epoch or hazard
//!   scheme is needed. All nodes are released when the last handle drops.

use std::ptr;
use std::sync::Arc;

use crossbeam_utils::atomic::AtomicCell;
use crossbeam_utils::CachePadded;
use log::debug;

#[cfg(loom)]
use loom::sync::atomic::{AtomicPtr, AtomicUsize};
#[cfg(not(loom))]
use std::sync::atomic::{AtomicPtr, AtomicUsize};

pub mod error;
pub mod locked;
mod ordering;
pub mod seq;


pub use error::TowerError;
pub use locked::LockedSkipList;
pub use seq::SeqSkipList;

use ordering::{INIT_ORD, LEN_ORD, LINK_ORD, SEARCH_ORD};

/// Tower height used by the `new()` constructors. Expected column height
/// is 2 regardless, so this caps far more keys than fit in memory.
pub const DEFAULT_HEIGHT: usize = 32;

/// A node in one level's chain.
///
/// `next` is the only field written after publication (and only by the
/// writer); `down` never changes once the node is reachable, so readers
/// may follow it with a plain load.
struct Node<K, V> {
    key: Option<K>,
    value: Option<AtomicCell<V>>,
    next: AtomicPtr<Node<K, V>>,
    down: *mut Node<K, V>,
}

impl<K, V> Node<K, V> {
    fn sentinel() -> Box<Self> {
        Box::new(Node {
            key: None,
            value: None,
            next: AtomicPtr::new(ptr::null_mut()),
            down: ptr::null_mut(),
        })
    }

    fn leaf(key: K, value: V, down: *mut Node<K, V>) -> Box<Self> {
        Box::new(Node {
            key: Some(key),
            value: Some(AtomicCell::new(value)),
            next: AtomicPtr::new(ptr::null_mut()),
            down,
        })
    }
}

/// Shared state behind the writer and all reader handles.
struct Tower<K, V> {
    /// Sentinel per level, top first. Padded: the head block is on every
    /// traversal's path while the writer churns allocator-adjacent memory.
    heads: CachePadded<Box<[*mut Node<K, V>]>>,
    len: CachePadded<AtomicUsize>,
}

// SAFETY: all node pointers are reachable only through the tower. Mutation
// is confined to the unique writer handle (`&mut SkipList`), readers issue
// acquire loads of pointers published by release stores, and no node is
// freed before `Tower::drop`, which runs after the last handle is gone.
unsafe impl<K: Send + Sync, V: Send + Sync> Send for Tower<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for Tower<K, V> {}

impl<K: Ord, V: Copy> Tower<K, V> {
    /// Top-down lookup with early return on the first level where the key
    /// shows up; the column invariant guarantees the levels below agree
    /// (modulo an in-flight update).
    fn find(&self, key: &K) -> Option<V> {
        let mut current = self.heads[0];
        loop {
            // SAFETY: sentinels live until drop, and any node reached
            // through an acquire load was fully initialized before its
            // publishing release store.
            let reached = unsafe { level_search(current, key) };
            let node = unsafe { &*reached };
            if node.key.as_ref() == Some(key) {
                if let Some(cell) = &node.value {
                    return Some(cell.load());
                }
            }
            if node.down.is_null() {
                return None;
            }
            current = node.down;
        }
    }
}

impl<K, V> Drop for Tower<K, V> {
    fn drop(&mut self) {
        // Each node appears in exactly one level's forward chain, so
        // walking every chain releases everything exactly once.
        for &head in self.heads.iter() {
            let mut current = head;
            while !current.is_null() {
                // SAFETY: `&mut self` means no handle is left; every
                // pointer in the chains came from `Box::into_raw`.
                let next = unsafe { (*current).next.load(SEARCH_ORD) };
                drop(unsafe { Box::from_raw(current) });
                current = next;
            }
        }
    }
}

/// Walks one level: returns the rightmost node that is `start` itself or
/// whose key is `<= key`, i.e. the node whose successor (if any) is the
/// first strictly greater key.
///
/// # Safety
///
/// `start` must point to a live node of a live tower.
unsafe fn level_search<K: Ord, V>(start: *mut Node<K, V>, key: &K) -> *mut Node<K, V> {
    let mut current = start;
    loop {
        // SAFETY: acquire pairs with the publishing release store, so a
        // non-null `next` points to a fully initialized node.
        let next = unsafe { (*current).next.load(SEARCH_ORD) };
        if next.is_null() {
            return current;
        }
        let candidate = unsafe { &*next };
        match candidate.key.as_ref() {
            Some(k) if k <= key => current = next,
            _ => return current,
        }
    }
}

/// Splices `node` in directly after `prev` and returns its address.
///
/// The forward pointer is copied into the still-private node first; the
/// release store of `prev.next` is the publication point, after which the
/// node (and everything written into it) is visible to acquire loads.
///
/// # Safety
///
/// `prev` must point to a live node, and the caller must be the unique
/// writer.
unsafe fn chain_node<K, V>(prev: *mut Node<K, V>, node: Box<Node<K, V>>) -> *mut Node<K, V> {
    let successor = unsafe { (*prev).next.load(SEARCH_ORD) };
    node.next.store(successor, INIT_ORD);
    let raw = Box::into_raw(node);
    unsafe { (*prev).next.store(raw, LINK_ORD) };
    raw
}

/// The single-writer / multi-reader lock-free skip list.
///
/// This value *is* the writer handle: `upsert` takes `&mut self`, so at
/// most one thread can be inserting at a time, while any number of
/// [`Reader`]s (and `&self` callers) run [`find`](Self::find) concurrently
/// without locks. Lookups are wait-free; the value type must be `Copy` so
/// each value cell can be read and written tearlessly — the cell itself is
/// lock-free whenever `V` fits a machine word
/// (`AtomicCell::<V>::is_lock_free()`).
pub struct SkipList<K, V> {
    tower: Arc<Tower<K, V>>,
}

/// A cloneable lookup handle for a [`SkipList`].
///
/// Readers never block and never observe a partially initialized node;
/// a read racing an update sees either the old or the new value.
pub struct Reader<K, V> {
    tower: Arc<Tower<K, V>>,
}

impl<K, V> Clone for Reader<K, V> {
    fn clone(&self) -> Self {
        Reader {
            tower: Arc::clone(&self.tower),
        }
    }
}

impl<K: Ord + Clone, V: Copy> SkipList<K, V> {
    /// Creates an empty list with the default tower height.
    pub fn new() -> Self {
        Self::build(DEFAULT_HEIGHT)
    }

    /// Creates an empty list with the given tower height.
    ///
    /// Returns [`TowerError::ZeroHeight`] for a height of zero.
    pub fn with_height(height: usize) -> Result<Self, TowerError> {
        if height == 0 {
            return Err(TowerError::ZeroHeight);
        }
        Ok(Self::build(height))
    }

    fn build(height: usize) -> Self {
        let mut heads = Vec::with_capacity(height);
        for _ in 0..height {
            heads.push(Box::into_raw(Node::<K, V>::sentinel()));
        }
        for level in 1..height {
            // SAFETY: the sentinels were just allocated and are not yet
            // shared with any reader.
            unsafe { (*heads[level - 1]).down = heads[level] };
        }
        debug!("built lock-free tower of height {height}");
        SkipList {
            tower: Arc::new(Tower {
                heads: CachePadded::new(heads.into_boxed_slice()),
                len: CachePadded::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Mints a new lookup handle sharing this list.
    pub fn reader(&self) -> Reader<K, V> {
        Reader {
            tower: Arc::clone(&self.tower),
        }
    }

    /// Inserts `key`, or overwrites its value if it is already present.
    ///
    /// Update case: stores the new value into every level of the existing
    /// column; concurrent readers see the old value or the new one, never
    /// a torn mix within one cell. Insert case: the bottom-level release
    /// store is the linearization point, after which the key is visible;
    /// coin-flip promotions follow and linearize at their own stores.
    pub fn upsert(&mut self, key: K, value: V) {
        let mut anchors: Vec<*mut Node<K, V>> = Vec::with_capacity(self.height());
        let mut current = self.tower.heads[0];
        loop {
            // SAFETY: only this writer mutates the structure, and nothing
            // it has published is ever unlinked.
            let anchor = unsafe { level_search(current, &key) };
            anchors.push(anchor);
            let below = unsafe { (*anchor).down };
            if below.is_null() {
                break;
            }
            current = below;
        }

        let mut updated = false;
        for &anchor in &anchors {
            // SAFETY: anchors point to published nodes that stay live.
            let node = unsafe { &*anchor };
            if node.key.as_ref() == Some(&key) {
                if let Some(cell) = &node.value {
                    cell.store(value);
                }
                updated = true;
            }
        }
        if updated {
            return;
        }

        // Insert at the bottom, then extend the column upward while a
        // fair coin keeps coming up heads. The tower height is a hard cap.
        let mut levels = anchors.into_iter().rev();
        let bottom = match levels.next() {
            Some(anchor) => anchor,
            None => return,
        };
        // SAFETY: `chain_node`'s contract — live anchors, unique writer.
        let mut column = unsafe { chain_node(bottom, Node::leaf(key.clone(), value, ptr::null_mut())) };
        for anchor in levels {
            if !fastrand::bool() {
                break;
            }
            column = unsafe { chain_node(anchor, Node::leaf(key.clone(), value, column)) };
        }
        self.tower.len.fetch_add(1, LEN_ORD);
    }

    /// Looks up `key`. The writer may read its own structure freely.
    pub fn find(&self, key: &K) -> Option<V> {
        self.tower.find(key)
    }

    /// Returns the number of distinct keys in the list.
    pub fn len(&self) -> usize {
        self.tower.len.load(LEN_ORD)
    }

    /// Returns `true` if the list holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the fixed tower height.
    pub fn height(&self) -> usize {
        self.tower.heads.len()
    }

    /// Size in bytes of one node record, for capacity reporting.
    pub const fn node_size() -> usize {
        std::mem::size_of::<Node<K, V>>()
    }
}

impl<K: Ord + Clone, V: Copy> Default for SkipList<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V: Copy> Reader<K, V> {
    /// Looks up `key` without taking any lock. Wait-free: at most one
    /// pass across each level of the tower.
    pub fn find(&self, key: &K) -> Option<V> {
        self.tower.find(key)
    }

    /// Returns the number of distinct keys in the list.
    pub fn len(&self) -> usize {
        self.tower.len.load(LEN_ORD)
    }

    /// Returns `true` if the list holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the fixed tower height.
    pub fn height(&self) -> usize {
        self.tower.heads.len()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    /// Walks the raw structure and checks the per-level order, column and
    /// tower-prefix invariants on a quiesced list.
    fn check_invariants(list: &SkipList<i64, i64>) {
        let height = list.height();
        for (level, &head) in list.tower.heads.iter().enumerate() {
            let mut previous: Option<i64> = None;
            let mut current = unsafe { (*head).next.load(SEARCH_ORD) };
            while !current.is_null() {
                let node = unsafe { &*current };
                let key = *node.key.as_ref().expect("non-sentinel node without a key");
                if let Some(prev) = previous {
                    assert!(prev < key, "level {} out of order", level);
                }
                let mut hops = 0;
                let mut down = node.down;
                while !down.is_null() {
                    let below = unsafe { &*down };
                    assert_eq!(below.key.as_ref(), Some(&key));
                    down = below.down;
                    hops += 1;
                }
                assert_eq!(hops, height - 1 - level, "column does not reach the bottom");
                previous = Some(key);
                current = node.next.load(SEARCH_ORD);
            }
        }
    }

    #[test]
    fn new_list_is_empty() {
        let list: SkipList<i64, i64> = SkipList::new();
        assert_eq!(list.height(), DEFAULT_HEIGHT);
        assert!(list.is_empty());
        assert_eq!(list.find(&1), None);
    }

    #[test]
    fn rejects_zero_height() {
        assert!(matches!(
            SkipList::<i64, i64>::with_height(0),
            Err(TowerError::ZeroHeight)
        ));
    }

    #[test]
    fn insert_and_find() {
        let mut list = SkipList::with_height(5).unwrap();
        list.upsert(1, 10);
        list.upsert(2, 20);
        list.upsert(3, 30);
        assert_eq!(list.find(&1), Some(10));
        assert_eq!(list.find(&2), Some(20));
        assert_eq!(list.find(&3), Some(30));
        assert_eq!(list.find(&4), None);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn reader_handle_observes_the_writer() {
        let mut list = SkipList::with_height(5).unwrap();
        let reader = list.reader();
        assert_eq!(reader.find(&7), None);
        list.upsert(7, 70);
        assert_eq!(reader.find(&7), Some(70));
        assert_eq!(reader.len(), 1);
        let second = reader.clone();
        assert_eq!(second.find(&7), Some(70));
    }

    #[test]
    fn update_rewrites_every_level_of_the_column() {
        let mut list = SkipList::with_height(8).unwrap();
        fastrand::seed(42);
        for k in 0..64i64 {
            list.upsert(k, 0);
        }
        for k in 0..64 {
            list.upsert(k, k + 1);
        }
        assert_eq!(list.len(), 64);
        for &head in list.tower.heads.iter() {
            let mut current = unsafe { (*head).next.load(SEARCH_ORD) };
            while !current.is_null() {
                let node = unsafe { &*current };
                let key = *node.key.as_ref().unwrap();
                let cell = node.value.as_ref().expect("real node without a value");
                assert_eq!(cell.load(), key + 1);
                current = node.next.load(SEARCH_ORD);
            }
        }
    }

    #[test]
    fn invariants_hold_after_shuffled_inserts() {
        let mut list = SkipList::with_height(6).unwrap();
        let mut keys: Vec<i64> = (0..500).collect();
        fastrand::seed(0x7007);
        fastrand::shuffle(&mut keys);
        for &k in &keys {
            list.upsert(k, k * 10);
        }
        assert_eq!(list.len(), 500);
        check_invariants(&list);
        for k in 0..500 {
            assert_eq!(list.find(&k), Some(k * 10));
        }
    }

    #[test]
    fn single_level_tower_degenerates_to_a_sorted_list() {
        let mut list = SkipList::with_height(1).unwrap();
        for k in [5i64, 1, 9, 3, 7] {
            list.upsert(k, k);
        }
        for k in [1i64, 3, 5, 7, 9] {
            assert_eq!(list.find(&k), Some(k));
        }
        assert_eq!(list.find(&4), None);
        check_invariants(&list);
    }

    #[test]
    fn value_cell_is_lock_free_for_word_sized_values() {
        assert!(AtomicCell::<i64>::is_lock_free());
        assert!(AtomicCell::<u32>::is_lock_free());
    }

    #[test]
    fn node_size_is_reported() {
        assert!(SkipList::<i64, i64>::node_size() >= std::mem::size_of::<usize>());
    }

    #[test]
    fn drop_with_outstanding_readers_reclaims_once() {
        let mut list = SkipList::with_height(4).unwrap();
        for k in 0..100i64 {
            list.upsert(k, k);
        }
        let reader = list.reader();
        drop(list);
        // The tower survives until the last handle goes away.
        assert_eq!(reader.find(&42), Some(42));
        drop(reader);
    }
}
