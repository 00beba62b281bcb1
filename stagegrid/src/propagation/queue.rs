//! Multi-level bucket queue for level propagation.
//!
//! Levels are small bounded integers, so a bucket per level plus a cursor
//! to the first non-empty bucket replaces a binary heap. Within a bucket,
//! cells are served FIFO.

use crate::collections::LinkedMap;
use crate::coord::CellPos;

#[derive(Debug)]
pub struct LeveledQueue {
    buckets: Vec<LinkedMap<CellPos, ()>>,
    /// Index of the first bucket that may be non-empty; `len` when empty.
    first_queued: usize,
}

impl LeveledQueue {
    pub fn new(level_count: usize) -> Self {
        Self {
            buckets: (0..level_count).map(|_| LinkedMap::new()).collect(),
            first_queued: level_count,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.first_queued >= self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(LinkedMap::len).sum()
    }

    /// Lowest non-empty bucket, if any.
    pub fn first_level(&self) -> Option<usize> {
        (!self.is_empty()).then_some(self.first_queued)
    }

    pub fn enqueue(&mut self, pos: CellPos, level: usize) {
        let level = level.min(self.buckets.len() - 1);
        self.buckets[level].insert_if_absent(pos, ());
        if level < self.first_queued {
            self.first_queued = level;
        }
    }

    /// Removes `pos` from bucket `level`.
    pub fn dequeue(&mut self, pos: CellPos, level: usize) {
        let Some(bucket) = self.buckets.get_mut(level) else {
            return;
        };
        bucket.remove(&pos);
        if bucket.is_empty() && self.first_queued == level {
            self.advance_cursor();
        }
    }

    pub fn pop_first(&mut self) -> Option<CellPos> {
        let level = self.first_level()?;
        let bucket = &mut self.buckets[level];
        let (pos, ()) = bucket.pop_front()?;
        if bucket.is_empty() {
            self.advance_cursor();
        }
        Some(pos)
    }

    fn advance_cursor(&mut self) {
        let start = self.first_queued;
        self.first_queued = (start..self.buckets.len())
            .find(|&i| !self.buckets[i].is_empty())
            .unwrap_or(self.buckets.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: i32) -> CellPos {
        CellPos::new(x, 0)
    }

    #[test]
    fn test_pops_lowest_level_first() {
        let mut q = LeveledQueue::new(8);
        q.enqueue(p(1), 5);
        q.enqueue(p(2), 2);
        q.enqueue(p(3), 7);

        assert_eq!(q.pop_first(), Some(p(2)));
        assert_eq!(q.pop_first(), Some(p(1)));
        assert_eq!(q.pop_first(), Some(p(3)));
        assert!(q.is_empty());
    }

    #[test]
    fn test_fifo_within_level() {
        let mut q = LeveledQueue::new(4);
        q.enqueue(p(9), 1);
        q.enqueue(p(4), 1);

        assert_eq!(q.pop_first(), Some(p(9)));
        assert_eq!(q.pop_first(), Some(p(4)));
    }

    #[test]
    fn test_dequeue_moves_cursor() {
        let mut q = LeveledQueue::new(6);
        q.enqueue(p(1), 1);
        q.enqueue(p(2), 4);

        q.dequeue(p(1), 1);
        assert_eq!(q.first_level(), Some(4));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_level_clamped_to_last_bucket() {
        let mut q = LeveledQueue::new(3);
        q.enqueue(p(1), 100);
        assert_eq!(q.first_level(), Some(2));
    }
}
