//! The engine: lifecycle (open/close), dispatch of Put/Get/Delete/List,
//! active segment rotation, and merge orchestration.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::file::{self, SegmentKind};
use crate::id::SegmentId;
use crate::index::{Index, IndexEntry};
use crate::merge;
use crate::record::Record;
use crate::segment::Segment;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// A Bitcask-style embedded key-value store.
///
/// Cheap to clone: internally an `Arc`, so every clone shares the same
/// open segments and index and can be handed to as many threads as the
/// caller likes.
#[derive(Clone)]
pub struct Engine(Arc<Inner>);

struct Inner {
    dir: PathBuf,
    config: Config,
    index: Index,

    /// The current active (writable) segment.
    active: RwLock<Arc<Segment>>,

    /// Immutable segments, keyed by id.
    archives: RwLock<HashMap<SegmentId, Arc<Segment>>>,

    /// Serializes `rotate()` and the archive-snapshot step of `merge()`
    /// against each other (spec §5: "a single engine mutex serializes
    /// rotation and merge-setup... these two must not interleave").
    rotation_lock: Mutex<()>,

    /// Serializes appends to the active segment, and makes "check offset,
    /// rotate if needed, then append" one atomic step per writer (spec
    /// §5: "the simplest correct implementation serializes Put operations
    /// against the active segment").
    write_lock: Mutex<()>,

    /// Merge is not designed to run concurrently with itself — only one
    /// compaction pass is ever in flight.
    merge_lock: Mutex<()>,

    /// Monotonic counter ensuring every record gets a strictly increasing
    /// timestamp even under a coarse system clock.
    last_tstamp: AtomicU64,
}

impl Engine {
    /// Opens (or creates) a store rooted at `dir` with default
    /// [`Config`]. See [`Engine::open_with_config`] for tuning the
    /// rotation threshold.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(dir, Config::default())
    }

    /// Opens (or creates) a store rooted at `dir`.
    ///
    /// 1. Ensures `dir` exists (0755).
    /// 2. Classifies every entry as active/archive/other; fails with
    ///    [`Error::File`] if more than one active candidate is found.
    /// 3. Opens every candidate as a segment.
    /// 4. Creates a fresh active segment if none existed.
    /// 5. Scans every segment (archives first, then active), folding
    ///    per-key on greatest timestamp, dropping tombstoned keys.
    /// 6. Seeds the in-memory index from the result.
    pub fn open_with_config(dir: impl AsRef<Path>, config: Config) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        log::debug!("Opening bitcask store at {dir:?}");
        ensure_dir(&dir)?;

        let mut active_candidate: Option<Arc<Segment>> = None;
        let mut archive_candidates: Vec<Arc<Segment>> = Vec::new();

        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };

            let Some((kind, id_str)) = file::classify(name) else {
                continue;
            };
            // Leftover `.merge` files from a crash mid-compaction are
            // ignored here, same as the Go original: their rename into a
            // plain archive never completed, so they hold no index-visible
            // state and are simply orphaned on disk until cleaned up by
            // hand.
            if kind == SegmentKind::Merge {
                continue;
            }

            let id: SegmentId = id_str.parse()?;
            let segment = Arc::new(Segment::open(&dir.join(name), id)?);

            match kind {
                SegmentKind::Active => {
                    if active_candidate.is_some() {
                        return Err(Error::File(
                            "more than one .db.active segment found".to_string(),
                        ));
                    }
                    active_candidate = Some(segment);
                }
                SegmentKind::Archive => archive_candidates.push(segment),
                SegmentKind::Merge => unreachable!("filtered above"),
            }
        }

        let active = match active_candidate {
            Some(segment) => segment,
            None => {
                let id = SegmentId::generate();
                Arc::new(Segment::open(&file::active_path(&dir, id), id)?)
            }
        };

        log::debug!(
            "Recovering {} archive(s) and 1 active segment in {dir:?}",
            archive_candidates.len()
        );
        let mut scan_order = archive_candidates.clone();
        scan_order.push(Arc::clone(&active));
        let folded = merge::fold_index(&scan_order)?;

        let index = Index::new();
        for (key, entry) in folded {
            index.store(&key, entry);
        }
        log::debug!("Recovery seeded {} key(s) into the index", index.len());

        let archives = archive_candidates
            .into_iter()
            .map(|segment| (segment.id(), segment))
            .collect();

        Ok(Self(Arc::new(Inner {
            dir,
            config,
            index,
            active: RwLock::new(active),
            archives: RwLock::new(archives),
            rotation_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
            merge_lock: Mutex::new(()),
            last_tstamp: AtomicU64::new(0),
        })))
    }

    /// Writes `value` under `key`. Readable by any subsequent `Get` in
    /// this process as soon as this returns; durability to disk requires
    /// a separate [`Engine::sync`].
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let _write_guard = self.0.write_lock.lock().expect("write lock poisoned");

        self.rotate_if_needed()?;

        let tstamp = self.next_tstamp();
        let record = Record::put(key.as_bytes(), value, tstamp);

        let active = self.0.active.read().expect("active lock poisoned").clone();
        let (pos, len) = active.append(&record)?;

        self.0.index.store(
            key,
            IndexEntry {
                segment_id: active.id(),
                pos,
                len,
                tstamp,
                flag: record.flag,
            },
        );

        Ok(())
    }

    /// Looks up `key`. Returns `None` if absent (including already
    /// deleted).
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.0.index.load(key) else {
            return Ok(None);
        };

        let active = self.0.active.read().expect("active lock poisoned");
        let record = if entry.segment_id == active.id() {
            active.read_at(entry.pos, entry.len)?
        } else {
            drop(active);
            let archives = self.0.archives.read().expect("archives lock poisoned");
            let segment = archives.get(&entry.segment_id).ok_or_else(|| {
                Error::Internal(format!(
                    "index entry for {key:?} points at unknown segment {}",
                    entry.segment_id
                ))
            })?;
            segment.read_at(entry.pos, entry.len)?
        };

        Ok(Some(record.value))
    }

    /// Deletes `key`, a no-op if it was already absent.
    ///
    /// Writes the tombstone to the active segment *before* removing the
    /// key from the index (write-then-delete), closing the crash window
    /// the naive delete-then-write order leaves open: if the process dies
    /// between the two steps, recovery still sees the freshest record on
    /// disk either way, but only write-then-delete guarantees that record
    /// is the tombstone rather than a resurrected older PUT.
    pub fn delete(&self, key: &str) -> Result<()> {
        if self.0.index.load(key).is_none() {
            return Ok(());
        }

        let _write_guard = self.0.write_lock.lock().expect("write lock poisoned");

        let tstamp = self.next_tstamp();
        let record = Record::delete(key.as_bytes(), tstamp);

        let active = self.0.active.read().expect("active lock poisoned").clone();
        active.append(&record)?;

        self.0.index.load_and_delete(key);

        Ok(())
    }

    /// Snapshot of every key currently present. Order is unspecified.
    #[must_use]
    pub fn list(&self) -> Vec<Box<str>> {
        self.0.index.keys()
    }

    /// Forces the active segment's OS buffers to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.0.active.read().expect("active lock poisoned").sync()
    }

    /// Closes the active segment. Archives close as the engine (and its
    /// clones) drop.
    pub fn close(&self) -> Result<()> {
        self.0.active.read().expect("active lock poisoned").close()
    }

    /// Reclaims space held by superseded and tombstoned records in
    /// archives. See spec §4.4.6 for the step-by-step contract; summary:
    ///
    /// 1. Snapshot the archive set under the rotation lock, then release it
    ///    — merge never touches the active segment.
    /// 2. Fold the snapshot into an archive-only index.
    /// 3. Pick the merge output id: `max(snapshotted ids) + merge_id_stride`.
    /// 4. Open `<id>.db.merge`, register it in the archive map immediately
    ///    so concurrent `Get`s can route to it once entries move.
    /// 5. For each key: skip if the live index entry is missing, newer, or
    ///    points elsewhere (a write raced ahead of the merge); otherwise
    ///    copy the record into the merge segment and atomically swap the
    ///    index entry to point at it.
    /// 6. Rename the merge file to a plain archive.
    /// 7. Close and unlink every archive from the *original snapshot*, by
    ///    its own id (not the active segment's — see DESIGN.md).
    pub fn merge(&self) -> Result<()> {
        let _merge_guard = self.0.merge_lock.lock().expect("merge lock poisoned");
        log::debug!("Starting merge in {:?}", self.0.dir);

        let (snapshot_ids, snapshot_segments) = {
            let _rotation_guard = self.0.rotation_lock.lock().expect("rotation lock poisoned");
            let archives = self.0.archives.read().expect("archives lock poisoned");
            let ids: Vec<SegmentId> = archives.keys().copied().collect();
            let segments: Vec<Arc<Segment>> = archives.values().cloned().collect();
            (ids, segments)
        };

        let Some(new_id) = merge::merge_target_id(&snapshot_ids, self.0.config.merge_id_stride)
        else {
            log::trace!("Merge found no archives to compact, skipping");
            return Ok(());
        };
        log::debug!(
            "Merging {} archive(s) into new segment {new_id}",
            snapshot_ids.len()
        );

        let archive_fold = merge::fold_index(&snapshot_segments)?;

        let merge_segment = Arc::new(Segment::open(&file::merge_path(&self.0.dir, new_id), new_id)?);
        self.0
            .archives
            .write()
            .expect("archives lock poisoned")
            .insert(new_id, Arc::clone(&merge_segment));

        for (key, archive_entry) in archive_fold {
            let Some(current) = self.0.index.load(&key) else {
                continue;
            };
            if current.tstamp > archive_entry.tstamp || current.segment_id != archive_entry.segment_id
            {
                continue;
            }

            let source = {
                let archives = self.0.archives.read().expect("archives lock poisoned");
                archives
                    .get(&current.segment_id)
                    .cloned()
                    .ok_or_else(|| {
                        Error::Internal(format!(
                            "merge source segment {} vanished mid-merge",
                            current.segment_id
                        ))
                    })?
            };
            let record = source.read_at(current.pos, current.len)?;

            let (new_pos, new_len) = merge_segment.append(&record)?;

            // Single pointer swap: concurrent readers see either the old
            // (source) location or this one, never a torn mix.
            self.0.index.store(
                &key,
                IndexEntry {
                    segment_id: new_id,
                    pos: new_pos,
                    len: new_len,
                    tstamp: current.tstamp,
                    flag: current.flag,
                },
            );
        }

        merge_segment.rename(&file::archive_path(&self.0.dir, new_id))?;
        file::fsync_directory(&self.0.dir)?;

        {
            let mut archives = self.0.archives.write().expect("archives lock poisoned");
            for id in &snapshot_ids {
                archives.remove(id);
            }
        }
        for segment in snapshot_segments {
            match Arc::try_unwrap(segment) {
                Ok(segment) => segment.remove()?,
                Err(segment) => {
                    // Still referenced by an in-flight reader; close is a
                    // no-op here, the fd is released once the last Arc
                    // drops. The file is still removed so no further Get
                    // routes to it, matching spec: archives are immutable
                    // except for renaming and deletion.
                    log::warn!(
                        "Archive {} still has live readers at merge cleanup, unlinking anyway",
                        segment.id()
                    );
                    std::fs::remove_file(segment.path())?;
                }
            }
        }

        log::debug!("Merge finished, new archive is {new_id}");
        Ok(())
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.0.dir
    }

    fn rotate_if_needed(&self) -> Result<()> {
        let needs_rotation = {
            let active = self.0.active.read().expect("active lock poisoned");
            active.offset() >= self.0.config.max_size
        };
        if needs_rotation {
            self.rotate()?;
        }
        Ok(())
    }

    /// Moves the active segment into the archive map and opens a fresh
    /// active segment. Held under the rotation lock so it can never
    /// interleave with a merge's archive snapshot.
    fn rotate(&self) -> Result<()> {
        let _rotation_guard = self.0.rotation_lock.lock().expect("rotation lock poisoned");

        let mut active = self.0.active.write().expect("active lock poisoned");
        log::debug!(
            "Rotating active segment {} ({} bytes)",
            active.id(),
            active.offset()
        );

        let old = active.clone();
        old.rename(&file::archive_path(&self.0.dir, old.id()))?;
        self.0
            .archives
            .write()
            .expect("archives lock poisoned")
            .insert(old.id(), Arc::clone(&old));

        let new_id = SegmentId::generate();
        let new_active = Arc::new(Segment::open(&file::active_path(&self.0.dir, new_id), new_id)?);
        *active = new_active;

        Ok(())
    }

    fn next_tstamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_nanos();
        let now = u64::try_from(now).unwrap_or(u64::MAX);

        let mut last = self.0.last_tstamp.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last + 1);
            match self.0.last_tstamp.compare_exchange_weak(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return candidate,
                Err(observed) => last = observed,
            }
        }
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(Error::from)
}
