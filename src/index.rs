//! The in-memory keydir: a concurrent map from key to the location of its
//! newest record.

use crate::id::SegmentId;
use crate::record::Flag;
use crossbeam_skiplist::SkipMap;
use std::sync::Arc;

/// Where the newest record for a key lives, and what it is.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexEntry {
    /// The segment that owns the record's bytes.
    pub segment_id: SegmentId,
    /// Byte offset of the record's header start within that segment.
    pub pos: u64,
    /// Total on-disk length of the record (header + key + value).
    pub len: u64,
    /// The record's creation timestamp; used to resolve last-writer-wins.
    pub tstamp: u64,
    pub flag: Flag,
}

/// Concurrent `key -> IndexEntry` map.
///
/// Wraps a [`SkipMap`] rather than exposing it directly: every entry is
/// stored behind an `Arc`, so replacing a key's entry (on overwrite, or
/// when merge relocates a record) is a single pointer swap — a concurrent
/// reader holding an `Arc` it already loaded keeps seeing a fully formed,
/// never-torn value, and a reader that loads again afterwards sees either
/// the old or the new value, never a mix of the two.
#[derive(Default)]
pub struct Index(SkipMap<Box<str>, Arc<IndexEntry>>);

impl Index {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the current entry for `key`.
    #[must_use]
    pub fn load(&self, key: &str) -> Option<Arc<IndexEntry>> {
        self.0.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Installs `entry` for `key`, overwriting whatever was there.
    pub fn store(&self, key: &str, entry: IndexEntry) {
        self.0.insert(Box::from(key), Arc::new(entry));
    }

    /// Removes `key` and returns its prior entry, if any.
    pub fn load_and_delete(&self, key: &str) -> Option<Arc<IndexEntry>> {
        self.0.remove(key).map(|e| Arc::clone(e.value()))
    }

    /// Snapshot of every key currently present. Order is unspecified and
    /// may reflect any point-in-time view consistent with concurrent
    /// writers.
    #[must_use]
    pub fn keys(&self) -> Vec<Box<str>> {
        self.0.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of every `(key, entry)` pair, for merge to scan without
    /// holding up concurrent writers.
    #[must_use]
    pub fn entries(&self) -> Vec<(Box<str>, Arc<IndexEntry>)> {
        self.0
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn entry(segment_id: u128, pos: u64) -> IndexEntry {
        IndexEntry {
            segment_id: segment_id.to_string().parse().unwrap(),
            pos,
            len: 10,
            tstamp: 1,
            flag: Flag::Put,
        }
    }

    #[test]
    fn store_then_load() {
        let index = Index::new();
        index.store("a", entry(1, 0));
        let loaded = index.load("a").expect("should be present");
        assert_eq!(loaded.pos, 0);
    }

    #[test]
    fn load_missing_is_none() {
        let index = Index::new();
        assert!(index.load("missing").is_none());
    }

    #[test]
    fn load_and_delete_removes_and_returns() {
        let index = Index::new();
        index.store("a", entry(1, 0));
        let removed = index.load_and_delete("a").expect("should be present");
        assert_eq!(removed.pos, 0);
        assert!(index.load("a").is_none());
    }

    #[test]
    fn store_overwrites_in_place() {
        let index = Index::new();
        index.store("a", entry(1, 0));
        index.store("a", entry(1, 100));
        assert_eq!(index.load("a").unwrap().pos, 100);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn keys_snapshot_is_unordered_but_complete() {
        let index = Index::new();
        index.store("a", entry(1, 0));
        index.store("b", entry(1, 10));
        let mut keys: Vec<String> = index.keys().iter().map(|k| k.to_string()).collect();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }
}
