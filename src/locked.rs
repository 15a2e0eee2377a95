//! The multi-writer variant: the sequential algorithm behind one lock.

use parking_lot::Mutex;

use crate::error::TowerError;
use crate::seq::SeqSkipList;

/// A skip list serialized by a single coarse mutex.
///
/// Every operation takes the lock, so any number of threads may read and
/// write concurrently. The algorithms are identical to [`SeqSkipList`];
/// this shell trades the lock-free variant's reader latency for unrestricted
/// writer counts.
pub struct LockedSkipList<K, V> {
    inner: Mutex<SeqSkipList<K, V>>,
}

impl<K: Ord + Clone, V: Clone> LockedSkipList<K, V> {
    /// Creates an empty list with the default tower height.
    pub fn new() -> Self {
        LockedSkipList {
            inner: Mutex::new(SeqSkipList::new()),
        }
    }

    /// Creates an empty list with the given tower height.
    pub fn with_height(height: usize) -> Result<Self, TowerError> {
        Ok(LockedSkipList {
            inner: Mutex::new(SeqSkipList::with_height(height)?),
        })
    }

    /// Inserts `key`, or overwrites its value if it is already present.
    pub fn upsert(&self, key: K, value: V) {
        self.inner.lock().upsert(key, value);
    }

    /// Looks up `key`, returning a copy of its value.
    pub fn find(&self, key: &K) -> Option<V> {
        self.inner.lock().find(key)
    }

    /// Releases every node, leaving an empty tower of the same height.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Returns the number of distinct keys in the list.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if the list holds no keys.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Returns the fixed tower height.
    pub fn height(&self) -> usize {
        self.inner.lock().height()
    }

    /// Size in bytes of one node record, for capacity reporting.
    pub const fn node_size() -> usize {
        SeqSkipList::<K, V>::node_size()
    }
}

impl<K: Ord + Clone, V: Clone> Default for LockedSkipList<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn serializes_interleaved_writers() {
        let list = LockedSkipList::with_height(8).unwrap();
        thread::scope(|s| {
            for writer in 0..4i64 {
                let list = &list;
                s.spawn(move || {
                    let mut key = writer;
                    while key < 1_000 {
                        list.upsert(key, key * 2);
                        key += 4;
                    }
                });
            }
        });
        assert_eq!(list.len(), 1_000);
        for key in 0..1_000 {
            assert_eq!(list.find(&key), Some(key * 2));
        }
    }

    #[test]
    fn clear_under_shared_reference() {
        let list = LockedSkipList::with_height(4).unwrap();
        list.upsert("a", 1);
        list.upsert("b", 2);
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.find(&"a"), None);
    }
}
