//! Chunk planning over a byte length.
//!
//! A [`ChunkPlan`] partitions `[0, total_len)` into fixed-size ranges; only
//! the final range may be shorter. Planning is pure arithmetic so the engine
//! can re-plan from any offset after a reconcile without touching the file.

use crate::DEFAULT_CHUNK_SIZE;

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Fixed-size chunking of a known total length.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlan {
    total_len: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    /// Builds a plan; a zero `chunk_size` falls back to [`DEFAULT_CHUNK_SIZE`].
    pub fn new(total_len: u64, chunk_size: u64) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self {
            total_len,
            chunk_size,
        }
    }

    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Range of the chunk beginning at `offset`, or `None` once `offset`
    /// reaches the end. The offset does not need to sit on a chunk boundary;
    /// after a reconcile the next range simply starts where the server left
    /// off.
    pub fn range_at(&self, offset: u64) -> Option<ByteRange> {
        if offset >= self.total_len {
            return None;
        }
        let end = self.total_len.min(offset.saturating_add(self.chunk_size));
        Some(ByteRange { start: offset, end })
    }

    /// Iterates the remaining ranges from `offset` to the end of the file.
    pub fn ranges_from(self, offset: u64) -> impl Iterator<Item = ByteRange> {
        std::iter::successors(self.range_at(offset), move |prev| self.range_at(prev.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_partition_the_file() {
        let plan = ChunkPlan::new(10, 4);
        let ranges: Vec<ByteRange> = plan.ranges_from(0).collect();
        assert_eq!(
            ranges,
            vec![
                ByteRange { start: 0, end: 4 },
                ByteRange { start: 4, end: 8 },
                ByteRange { start: 8, end: 10 },
            ]
        );
        // Contiguous, non-overlapping, ending at the total length.
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(ranges.last().map(|r| r.end), Some(10));
    }

    #[test]
    fn exact_multiple_has_no_short_tail() {
        let plan = ChunkPlan::new(12, 4);
        let lens: Vec<u64> = plan.ranges_from(0).map(|r| r.len()).collect();
        assert_eq!(lens, vec![4, 4, 4]);
    }

    #[test]
    fn twelve_mib_under_default_chunking() {
        let mib = 1024 * 1024;
        let plan = ChunkPlan::new(12 * mib, DEFAULT_CHUNK_SIZE);
        let lens: Vec<u64> = plan.ranges_from(0).map(|r| r.len()).collect();
        assert_eq!(lens, vec![5 * mib, 5 * mib, 2 * mib]);
    }

    #[test]
    fn zero_total_yields_no_ranges() {
        let plan = ChunkPlan::new(0, 4);
        assert_eq!(plan.range_at(0), None);
        assert_eq!(plan.ranges_from(0).count(), 0);
    }

    #[test]
    fn zero_chunk_size_falls_back_to_default() {
        let plan = ChunkPlan::new(100, 0);
        assert_eq!(plan.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(plan.range_at(0), Some(ByteRange { start: 0, end: 100 }));
    }

    #[test]
    fn offset_past_end_yields_none() {
        let plan = ChunkPlan::new(10, 4);
        assert_eq!(plan.range_at(10), None);
        assert_eq!(plan.range_at(11), None);
    }

    #[test]
    fn unaligned_offset_resumes_mid_file() {
        let plan = ChunkPlan::new(10, 4);
        assert_eq!(plan.range_at(3), Some(ByteRange { start: 3, end: 7 }));
        let ranges: Vec<ByteRange> = plan.ranges_from(3).collect();
        assert_eq!(
            ranges,
            vec![
                ByteRange { start: 3, end: 7 },
                ByteRange { start: 7, end: 10 },
            ]
        );
    }

    #[test]
    fn file_smaller_than_chunk_is_one_range() {
        let plan = ChunkPlan::new(3, 4);
        let ranges: Vec<ByteRange> = plan.ranges_from(0).collect();
        assert_eq!(ranges, vec![ByteRange { start: 0, end: 3 }]);
        assert_eq!(ranges[0].len(), 3);
    }

    #[test]
    fn enormous_chunk_size_clamps_to_the_file_end() {
        let plan = ChunkPlan::new(10, u64::MAX - 2);
        assert_eq!(plan.range_at(0), Some(ByteRange { start: 0, end: 10 }));
        assert_eq!(plan.range_at(5), Some(ByteRange { start: 5, end: 10 }));
        let ranges: Vec<ByteRange> = plan.ranges_from(0).collect();
        assert_eq!(ranges, vec![ByteRange { start: 0, end: 10 }]);
    }
}
