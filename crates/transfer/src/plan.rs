//! Mapping of a file onto fixed-size chunk byte ranges.

use std::ops::Range;

/// Derived chunk layout of one file.
///
/// Ranges are contiguous, non-overlapping and cover `[0, total_bytes)`.
/// An empty file is planned as a single zero-length chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total_bytes: u64,
    chunk_size: u64,
    chunk_count: u32,
}

impl ChunkPlan {
    /// Plans `total_bytes` in chunks of `chunk_size` (0 is treated as 1).
    pub fn new(total_bytes: u64, chunk_size: u64) -> Self {
        let chunk_size = chunk_size.max(1);
        let count = total_bytes.div_ceil(chunk_size).max(1);
        Self {
            total_bytes,
            chunk_size,
            chunk_count: u32::try_from(count).unwrap_or(u32::MAX),
        }
    }

    /// Plans a download whose chunk count is declared by the server.
    ///
    /// The declared count wins when present; a zero declaration falls back
    /// to the computed count.
    pub fn from_declared(total_bytes: u64, chunk_size: u64, declared: u32) -> Self {
        let mut plan = Self::new(total_bytes, chunk_size);
        if declared > 0 {
            plan.chunk_count = declared;
        }
        plan
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Byte range of chunk `index`, clamped to the file size.
    pub fn range(&self, index: u32) -> Range<u64> {
        let start = (u64::from(index) * self.chunk_size).min(self.total_bytes);
        let end = (start + self.chunk_size).min(self.total_bytes);
        start..end
    }

    /// Iterates every chunk index with its byte range.
    pub fn ranges(&self) -> impl Iterator<Item = (u32, Range<u64>)> + '_ {
        (0..self.chunk_count).map(move |i| (i, self.range(i)))
    }

    /// Number of chunks to fetch given an optional preview cap.
    pub fn fetch_count(&self, limit: Option<u32>) -> u32 {
        match limit {
            Some(n) => n.clamp(1, self.chunk_count),
            None => self.chunk_count,
        }
    }

    /// Plaintext bytes covered by the first `fetch_count(limit)` chunks.
    pub fn bytes_for(&self, limit: Option<u32>) -> u64 {
        let n = self.fetch_count(limit);
        if n == 0 {
            return 0;
        }
        self.range(n - 1).end
    }
}
