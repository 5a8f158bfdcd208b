//! Shared per-key fold used both for full recovery (§4.4.1) and for
//! building an archive-only index ahead of compaction (§4.4.6). Both walk
//! a set of segments and resolve, per key, to the record with the
//! greatest timestamp, then drop anything that resolved to a tombstone.

use crate::error::Result;
use crate::id::SegmentId;
use crate::index::IndexEntry;
use crate::record::Flag;
use crate::segment::Segment;
use std::collections::HashMap;
use std::sync::Arc;

/// Scans every segment in `segments` and folds their entries into a
/// single `key -> IndexEntry` map using "greatest timestamp wins". Entries
/// that resolve to a [`Flag::Delete`] are removed from the result — they
/// exist in the map only transiently, to correctly shadow older PUTs
/// during the fold.
pub(crate) fn fold_index(segments: &[Arc<Segment>]) -> Result<HashMap<Box<str>, IndexEntry>> {
    let mut folded: HashMap<Box<str>, IndexEntry> = HashMap::new();

    for segment in segments {
        for scanned in segment.scan()? {
            let key = String::from_utf8_lossy(&scanned.key).into_owned().into_boxed_str();

            if let Some(existing) = folded.get(&key) {
                if existing.tstamp > scanned.tstamp {
                    continue;
                }
            }

            folded.insert(
                key,
                IndexEntry {
                    segment_id: segment.id(),
                    pos: scanned.pos,
                    len: scanned.len,
                    tstamp: scanned.tstamp,
                    flag: scanned.flag,
                },
            );
        }
    }

    folded.retain(|_, entry| entry.flag != Flag::Delete);

    Ok(folded)
}

/// Computes the id a merge's output segment should use: the greatest id
/// among the snapshotted archives, plus `stride`. `None` means the
/// snapshot was empty and merge has nothing to do.
pub(crate) fn merge_target_id(archive_ids: &[SegmentId], stride: u64) -> Option<SegmentId> {
    SegmentId::merge_target(archive_ids.iter().copied(), stride)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use test_log::test;

    fn segment_with(records: &[Record]) -> (tempfile::TempDir, Arc<Segment>) {
        let dir = tempfile::tempdir().unwrap();
        let id = SegmentId::generate();
        let path = dir.path().join(format!("{id}.db"));
        let segment = Segment::open(&path, id).unwrap();
        for record in records {
            segment.append(record).unwrap();
        }
        (dir, Arc::new(segment))
    }

    #[test]
    fn fold_keeps_latest_write_and_drops_deletes() {
        let (_d1, seg1) = segment_with(&[Record::put(b"a", b"1", 1), Record::put(b"b", b"2", 2)]);
        let (_d2, seg2) = segment_with(&[Record::put(b"a", b"99", 3), Record::delete(b"b", 4)]);

        let folded = fold_index(&[seg1, seg2]).unwrap();
        assert_eq!(folded.len(), 1);
        assert_eq!(folded.get("a").unwrap().tstamp, 3);
        assert!(!folded.contains_key("b"));
    }

    #[test]
    fn fold_is_order_independent_within_a_segment_pair() {
        let (_d1, seg_old) = segment_with(&[Record::put(b"a", b"old", 1)]);
        let (_d2, seg_new) = segment_with(&[Record::put(b"a", b"new", 5)]);

        let forward = fold_index(&[Arc::clone(&seg_old), Arc::clone(&seg_new)]).unwrap();
        let backward = fold_index(&[seg_new, seg_old]).unwrap();
        assert_eq!(forward.get("a").unwrap().tstamp, 5);
        assert_eq!(backward.get("a").unwrap().tstamp, 5);
    }

    #[test]
    fn merge_target_none_on_empty_snapshot() {
        assert!(merge_target_id(&[], 1024).is_none());
    }
}
