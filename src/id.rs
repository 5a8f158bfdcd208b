use crate::error::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A segment's identity: the decimal ASCII of a nanosecond timestamp,
/// doubling as the file's sort order and its name on disk.
///
/// Two segments created in the same process are guaranteed distinct ids
/// even if they'd otherwise land on the same nanosecond tick, because
/// [`SegmentId::generate`] bumps a monotonic counter alongside the clock.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct SegmentId(u128);

static LAST_GENERATED: AtomicU64 = AtomicU64::new(0);

impl SegmentId {
    /// Generates a fresh, process-unique id from the current time.
    ///
    /// Strictly greater than every id previously generated in this
    /// process, even when the clock doesn't advance between two calls.
    #[must_use]
    pub fn generate() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_nanos();
        let now = u64::try_from(now).unwrap_or(u64::MAX);

        let mut last = LAST_GENERATED.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last + 1);
            match LAST_GENERATED.compare_exchange_weak(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Self(u128::from(candidate)),
                Err(observed) => last = observed,
            }
        }
    }

    /// Computes the merge target id: the largest id among `ids`, plus
    /// `stride`. Returns `None` if `ids` is empty (nothing to merge).
    #[must_use]
    pub fn merge_target(ids: impl IntoIterator<Item = Self>, stride: u64) -> Option<Self> {
        ids.into_iter().max().map(|max| Self(max.0 + u128::from(stride)))
    }

    #[must_use]
    pub fn as_u128(self) -> u128 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SegmentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u128>()
            .map(Self)
            .map_err(|e| Error::GetFileId(format!("{s:?} is not a decimal segment id: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn generate_is_monotonic_and_unique() {
        let mut prev = SegmentId::generate();
        for _ in 0..1_000 {
            let next = SegmentId::generate();
            assert!(next > prev, "{next} should be greater than {prev}");
            prev = next;
        }
    }

    #[test]
    fn roundtrips_through_display_and_parse() {
        let id = SegmentId::generate();
        let parsed: SegmentId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn merge_target_is_max_plus_stride() {
        let ids = vec!["10".parse().unwrap(), "20".parse().unwrap(), "5".parse::<SegmentId>().unwrap()];
        let target = SegmentId::merge_target(ids, 1024).unwrap();
        assert_eq!(target, "1044".parse().unwrap());
    }

    #[test]
    fn merge_target_of_empty_is_none() {
        assert!(SegmentId::merge_target(std::iter::empty(), 1024).is_none());
    }

    #[test]
    fn parse_rejects_non_decimal() {
        assert!("not-a-number".parse::<SegmentId>().is_err());
    }
}
