//! Splits `[0, length)` into fixed-size half-open ranges.

use crate::models::ByteRange;

/// Deterministic sequence of ranges covering `[0, length)`.
///
/// Every range is `chunk_size` bytes long except possibly the last one,
/// which is clipped at `length`.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    length: u64,
    chunk_size: u64,
    next: u64,
}

impl ChunkPlan {
    /// Returns `None` when `chunk_size` is zero.
    pub fn new(length: u64, chunk_size: u64) -> Option<Self> {
        if chunk_size == 0 {
            return None;
        }
        Some(Self {
            length,
            chunk_size,
            next: 0,
        })
    }

    /// Total number of ranges in the plan, independent of iteration state.
    pub fn total(&self) -> u64 {
        self.length.div_ceil(self.chunk_size)
    }
}

impl Iterator for ChunkPlan {
    type Item = ByteRange;

    fn next(&mut self) -> Option<ByteRange> {
        if self.next >= self.length {
            return None;
        }
        let start = self.next;
        let end = start.saturating_add(self.chunk_size).min(self.length);
        self.next = end;
        Some(ByteRange::new(start, end))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.length - self.next.min(self.length)).div_ceil(self.chunk_size);
        let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

/// Plans the ranges for a resource of `length` bytes.
pub fn plan(length: u64, chunk_size: u64) -> Option<ChunkPlan> {
    ChunkPlan::new(length, chunk_size)
}
