//! Segment filename conventions and directory-level helpers.

use crate::id::SegmentId;
use std::fs::File;
use std::path::{Path, PathBuf};

pub const DATA_FILE_SUFFIX: &str = ".db";
pub const ACTIVE_FILE_SUFFIX: &str = ".db.active";
pub const MERGE_FILE_SUFFIX: &str = ".db.merge";

/// What kind of segment file a directory entry names, if any.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SegmentKind {
    Active,
    Archive,
    Merge,
}

/// Classifies and extracts the id from a filename. Returns `None` for
/// names that don't carry one of the known suffixes (e.g. `favicon.ico`,
/// stray dotfiles) — those are ignored by the directory scan, not errors.
#[must_use]
pub fn classify(file_name: &str) -> Option<(SegmentKind, &str)> {
    if let Some(id) = file_name.strip_suffix(ACTIVE_FILE_SUFFIX) {
        Some((SegmentKind::Active, id))
    } else if let Some(id) = file_name.strip_suffix(MERGE_FILE_SUFFIX) {
        Some((SegmentKind::Merge, id))
    } else if let Some(id) = file_name.strip_suffix(DATA_FILE_SUFFIX) {
        Some((SegmentKind::Archive, id))
    } else {
        None
    }
}

#[must_use]
pub fn active_path(dir: &Path, id: SegmentId) -> PathBuf {
    dir.join(format!("{id}{ACTIVE_FILE_SUFFIX}"))
}

#[must_use]
pub fn archive_path(dir: &Path, id: SegmentId) -> PathBuf {
    dir.join(format!("{id}{DATA_FILE_SUFFIX}"))
}

#[must_use]
pub fn merge_path(dir: &Path, id: SegmentId) -> PathBuf {
    dir.join(format!("{id}{MERGE_FILE_SUFFIX}"))
}

/// Forces the directory entry itself (not its contents) to stable storage,
/// so a rename or unlink inside it survives a crash. No-op on platforms
/// that don't support fsync-ing a directory handle.
#[cfg(not(target_os = "windows"))]
pub fn fsync_directory<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    let dir = File::open(path)?;
    debug_assert!(dir.metadata()?.is_dir());
    dir.sync_all()
}

#[cfg(target_os = "windows")]
pub fn fsync_directory<P: AsRef<Path>>(_path: P) -> std::io::Result<()> {
    Ok(())
}
