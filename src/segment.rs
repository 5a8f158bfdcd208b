//! A single physical data file: an open handle, its append offset, and the
//! positioned read/write operations the engine builds everything else on.

use crate::error::{Error, Result};
use crate::id::SegmentId;
use crate::record::Record;
use byteorder::{BigEndian, ByteOrder};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[cfg(unix)]
use std::os::unix::fs::FileExt;

/// One segment file: either the active (writable) segment or an immutable
/// archive. Reads and writes go through positioned I/O (`pread`/`pwrite`
/// on Unix), so a reader never disturbs the shared file cursor and can run
/// concurrently with appends — it only ever targets byte ranges that were
/// already fully written and published to the index.
pub struct Segment {
    id: SegmentId,
    path: Mutex<PathBuf>,
    file: File,
    /// Current append offset, equal to the on-disk file size. `Ordering`
    /// here only needs to publish-after-write; the actual serialization of
    /// concurrent appends is the caller's job (the engine's per-segment
    /// write lock), not this struct's.
    offset: AtomicU64,
}

impl Segment {
    /// Opens (creating if missing) the file at `path` for read/write,
    /// without truncating, and seeks to its end.
    pub fn open(path: &Path, id: SegmentId) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let offset = file.metadata()?.len();
        log::trace!("Opened segment {id} at {path:?} ({offset} bytes)");

        Ok(Self {
            id,
            path: Mutex::new(path.to_path_buf()),
            file,
            offset: AtomicU64::new(offset),
        })
    }

    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.path.lock().expect("path lock poisoned").clone()
    }

    /// Current append offset == on-disk size (spec invariant 4).
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Appends `record` at the current offset as a single positioned
    /// write. Returns `(pos, len)` of the bytes just written so the caller
    /// can publish an index entry. Callers must serialize concurrent
    /// appends to the same segment (the engine does this with a
    /// per-segment write lock) — a torn write here is fatal, not
    /// recoverable, per spec.
    pub fn append(&self, record: &Record) -> Result<(u64, u64)> {
        let buf = record.encode();
        let pos = self.offset.load(Ordering::Acquire);

        self.write_at(&buf, pos)?;

        let len = buf.len() as u64;
        self.offset.store(pos + len, Ordering::Release);

        Ok((pos, len))
    }

    /// Reads exactly `len` bytes starting at `pos` and decodes them as one
    /// record. Safe to call concurrently with [`Segment::append`]: `pos +
    /// len` is always `<=` the segment's offset at the time the caller's
    /// index entry was published, so this never races the writer onto
    /// unwritten bytes.
    pub fn read_at(&self, pos: u64, len: u64) -> Result<Record> {
        let mut buf = vec![0_u8; len as usize];
        self.read_exact_at(&mut buf, pos)?;
        Record::decode(&buf)
    }

    /// Forces the OS buffers for this file to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Closing happens implicitly when the last `Segment` is dropped; this
    /// exists so callers can request it explicitly and surface any error
    /// (flushing buffers on some platforms can fail).
    pub fn close(&self) -> Result<()> {
        self.file.sync_all().map_err(Error::from)
    }

    /// Renames the underlying file, updating the path this segment
    /// reports via [`Segment::path`].
    pub fn rename(&self, new_path: &Path) -> Result<()> {
        let mut path = self.path.lock().expect("path lock poisoned");
        std::fs::rename(&*path, new_path)?;
        *path = new_path.to_path_buf();
        Ok(())
    }

    /// Closes and unlinks the file. Archives are retired this way during
    /// merge.
    pub fn remove(self) -> Result<()> {
        let path = self.path.lock().expect("path lock poisoned").clone();
        drop(self.file);
        std::fs::remove_file(&path)?;
        Ok(())
    }

    /// Scans the file from byte 0, yielding `(key, pos, len, tstamp,
    /// flag)` for every complete record found, in file order. Stops
    /// cleanly at a clean EOF or a truncated tail record (the common
    /// crash-recovery case); returns [`Error::CorruptSegment`] only for a
    /// record that looks structurally broken before the current file end
    /// (a header with an internally inconsistent declaration, not simply
    /// "ran out of bytes").
    pub fn scan(&self) -> Result<Vec<ScannedEntry>> {
        log::trace!("Scanning segment {} ({} bytes)", self.id, self.offset());
        let size = self.offset();
        let mut out = Vec::new();
        let mut pos = 0_u64;

        while pos < size {
            let remaining = size - pos;
            if remaining < crate::record::HEADER_LEN as u64 {
                log::debug!(
                    "Segment {}: {remaining} trailing byte(s) short of a header at {pos}, stopping scan cleanly",
                    self.id
                );
                break;
            }

            let mut header = [0_u8; crate::record::HEADER_LEN];
            self.read_exact_at(&mut header, pos)?;

            let ksz = BigEndian::read_u64(&header[14..22]);
            let vsz = BigEndian::read_u64(&header[22..30]);

            let record_len = (crate::record::HEADER_LEN as u64)
                .checked_add(ksz)
                .and_then(|n| n.checked_add(vsz))
                .ok_or_else(|| {
                    Error::CorruptSegment(format!(
                        "segment {}: record at {pos} declares an overflowing length",
                        self.id
                    ))
                })?;

            if pos + record_len > size {
                // The declared body runs past the current file end. Since
                // we scan strictly in order, this record is necessarily
                // the last one attempted — a crash mid-append, not
                // corruption buried in the middle of the file. Stop
                // cleanly, the same as a partial header.
                log::debug!(
                    "Segment {}: record at {pos} declares {record_len} bytes, {} available, stopping scan cleanly",
                    self.id,
                    size - pos
                );
                break;
            }

            let mut body = vec![0_u8; record_len as usize];
            self.read_exact_at(&mut body, pos)?;
            let record = Record::decode(&body)?;

            out.push(ScannedEntry {
                key: record.key,
                pos,
                len: record_len,
                tstamp: record.tstamp,
                flag: record.flag,
            });

            pos += record_len;
        }

        Ok(out)
    }

    #[cfg(unix)]
    fn write_at(&self, buf: &[u8], pos: u64) -> Result<()> {
        self.file.write_all_at(buf, pos).map_err(Error::from)
    }

    #[cfg(not(unix))]
    fn write_at(&self, buf: &[u8], pos: u64) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        static FALLBACK_LOCK: Mutex<()> = Mutex::new(());
        let _guard = FALLBACK_LOCK.lock().expect("fallback lock poisoned");
        let mut file = &self.file;
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(buf)?;
        Ok(())
    }

    #[cfg(unix)]
    fn read_exact_at(&self, buf: &mut [u8], pos: u64) -> Result<()> {
        self.file.read_exact_at(buf, pos).map_err(Error::from)
    }

    #[cfg(not(unix))]
    fn read_exact_at(&self, buf: &mut [u8], pos: u64) -> Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        static FALLBACK_LOCK: Mutex<()> = Mutex::new(());
        let _guard = FALLBACK_LOCK.lock().expect("fallback lock poisoned");
        let mut file = &self.file;
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(buf)?;
        Ok(())
    }
}

/// One record recovered while scanning a segment for its index.
pub struct ScannedEntry {
    pub key: Vec<u8>,
    pub pos: u64,
    pub len: u64,
    pub tstamp: u64,
    pub flag: crate::record::Flag,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn open_tmp() -> (tempfile::TempDir, Segment) {
        let dir = tempfile::tempdir().unwrap();
        let id = SegmentId::generate();
        let path = dir.path().join(format!("{id}.db"));
        let segment = Segment::open(&path, id).unwrap();
        (dir, segment)
    }

    #[test]
    fn append_then_read_at_round_trips() {
        let (_dir, segment) = open_tmp();
        let record = Record::put(b"a", b"1", 1);
        let (pos, len) = segment.append(&record).unwrap();
        assert_eq!(pos, 0);

        let read = segment.read_at(pos, len).unwrap();
        assert_eq!(read, record);
        assert_eq!(segment.offset(), len);
    }

    #[test]
    fn append_advances_offset_across_multiple_records() {
        let (_dir, segment) = open_tmp();
        let (_, len1) = segment.append(&Record::put(b"a", b"1", 1)).unwrap();
        let (pos2, len2) = segment.append(&Record::put(b"b", b"22", 2)).unwrap();

        assert_eq!(pos2, len1);
        assert_eq!(segment.offset(), len1 + len2);
    }

    #[test]
    fn scan_recovers_all_records_in_order() {
        let (_dir, segment) = open_tmp();
        segment.append(&Record::put(b"a", b"1", 1)).unwrap();
        segment.append(&Record::put(b"b", b"2", 2)).unwrap();
        segment.append(&Record::delete(b"a", 3)).unwrap();

        let entries = segment.scan().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].key, b"a");
        assert_eq!(entries[2].flag, crate::record::Flag::Delete);
    }

    #[test]
    fn scan_stops_cleanly_at_truncated_tail() {
        let (_dir, segment) = open_tmp();
        segment.append(&Record::put(b"a", b"1", 1)).unwrap();
        segment.append(&Record::put(b"b", b"2", 2)).unwrap();

        // Simulate a crash mid-write of the third record: truncate to a
        // partial header.
        let path = segment.path();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        let full_len = file.metadata().unwrap().len();
        file.set_len(full_len + 5).unwrap();

        let entries = segment.scan().unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn rename_updates_reported_path() {
        let (dir, segment) = open_tmp();
        let new_path = dir.path().join("renamed.db");
        segment.rename(&new_path).unwrap();
        assert_eq!(segment.path(), new_path);
        assert!(new_path.exists());
    }

    #[test]
    fn remove_deletes_file() {
        let (_dir, segment) = open_tmp();
        let path = segment.path();
        segment.remove().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn reopen_preserves_offset_as_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let id = SegmentId::generate();
        let path = dir.path().join(format!("{id}.db"));

        {
            let segment = Segment::open(&path, id).unwrap();
            segment.append(&Record::put(b"a", b"1", 1)).unwrap();
        }

        let reopened = Segment::open(&path, id).unwrap();
        assert_eq!(reopened.offset(), std::fs::metadata(&path).unwrap().len());
    }
}
