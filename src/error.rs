use std::fmt;

/// Errors produced by the engine.
///
/// Mirrors the kinds spec'd for the store: a directory/layout precondition
/// violation, an underlying I/O failure, a record that cannot be decoded,
/// an index pointing at a segment the engine doesn't know about, and a
/// segment filename whose id can't be parsed.
#[derive(Debug)]
pub enum Error {
    /// A directory or on-disk layout precondition was violated, e.g. two
    /// `.db.active` files were found in the same directory.
    File(String),

    /// An underlying filesystem operation failed.
    Io(std::io::Error),

    /// An on-disk record could not be decoded: header fields were
    /// inconsistent, or the declared key/value sizes would read past the
    /// bytes available.
    CorruptRecord(String),

    /// A segment was truncated mid-record in a way that cannot be safely
    /// treated as a clean partial write at the tail.
    CorruptSegment(String),

    /// An index entry pointed at a segment id that is neither the active
    /// segment nor a known archive. Indicates a bug in merge/rotation
    /// bookkeeping, not a user error.
    Internal(String),

    /// A segment filename's id portion could not be parsed as a decimal
    /// integer.
    GetFileId(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(msg) => write!(f, "file error: {msg}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::CorruptRecord(msg) => write!(f, "corrupt record: {msg}"),
            Self::CorruptSegment(msg) => write!(f, "corrupt segment: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::GetFileId(msg) => write!(f, "get file id error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
