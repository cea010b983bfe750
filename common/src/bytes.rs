//! Byte-range helpers for storage scans.

use std::ops::{Bound, RangeBounds};

use bytes::{BufMut, Bytes, BytesMut};

/// A range of storage keys, used to bound scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytesRange {
    start: Bound<Bytes>,
    end: Bound<Bytes>,
}

impl BytesRange {
    /// Creates a range from explicit bounds.
    pub fn new(start: Bound<Bytes>, end: Bound<Bytes>) -> Self {
        Self { start, end }
    }

    /// Creates a range covering every key.
    pub fn unbounded() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    /// Creates a range covering every key that starts with `prefix`.
    ///
    /// The upper bound is `prefix ++ 0xFF`, which is exact for keys whose
    /// suffix never contains `0xFF` (as produced by
    /// [`terminated_bytes`](crate::serde::terminated_bytes)).
    pub fn prefix(prefix: Bytes) -> Self {
        let mut end = BytesMut::with_capacity(prefix.len() + 1);
        end.put_slice(&prefix);
        end.put_u8(0xFF);
        Self::new(Bound::Included(prefix), Bound::Excluded(end.freeze()))
    }

    /// Returns true if `key` lies within the range.
    pub fn contains(&self, key: &[u8]) -> bool {
        let above_start = match &self.start {
            Bound::Included(s) => key >= s.as_ref(),
            Bound::Excluded(s) => key > s.as_ref(),
            Bound::Unbounded => true,
        };
        let below_end = match &self.end {
            Bound::Included(e) => key <= e.as_ref(),
            Bound::Excluded(e) => key < e.as_ref(),
            Bound::Unbounded => true,
        };
        above_start && below_end
    }
}

impl RangeBounds<Bytes> for BytesRange {
    fn start_bound(&self) -> Bound<&Bytes> {
        self.start.as_ref()
    }

    fn end_bound(&self) -> Bound<&Bytes> {
        self.end.as_ref()
    }
}
