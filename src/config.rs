//! Tunables for opening an [`crate::Engine`].

/// Default active-segment rotation threshold: 100 MiB, per spec.
pub const DEFAULT_MAX_SIZE: u64 = 100 * 1024 * 1024;

/// Default stride added to the highest snapshotted archive id to name a
/// merge's output segment.
pub const DEFAULT_MERGE_ID_STRIDE: u64 = 1024;

/// Engine-wide settings, set once at [`crate::Engine::open`] time.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    pub(crate) max_size: u64,
    pub(crate) merge_id_stride: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            merge_id_stride: DEFAULT_MERGE_ID_STRIDE,
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the active segment's rotation threshold in bytes. Once the
    /// active segment's offset reaches this size, the next `Put` rotates
    /// it into an archive before writing.
    #[must_use]
    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }

    /// Sets the stride added to the highest id among the archives a merge
    /// considers, to name the merge's output segment.
    #[must_use]
    pub fn merge_id_stride(mut self, stride: u64) -> Self {
        self.merge_id_stride = stride;
        self
    }
}
