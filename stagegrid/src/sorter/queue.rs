//! Per-processor priority queue keyed by cell.
//!
//! ```text
//!   bucket 0: [ (3,1): t t ]
//!   bucket 1: [ (0,0): t A ][ (5,2): t ]      t = task, A = acquire marker
//!   bucket 2:
//!      ...
//!   bucket N: [ (9,9): t ]                    N = absent level
//! ```
//!
//! [`CellTaskQueue::pop`] hands out the whole list of the first-inserted
//! cell in the lowest non-empty bucket. Acquire markers in that list count
//! against `max_in_flight` until the cell is released.

use crate::collections::LinkedMap;
use crate::coord::CellPos;
use std::collections::HashMap;
use std::fmt::Write;

#[derive(Debug)]
pub(crate) enum QueuedItem<T> {
    Task(T),
    Acquire,
}

impl<T> QueuedItem<T> {
    fn is_acquire(&self) -> bool {
        matches!(self, QueuedItem::Acquire)
    }
}

#[derive(Debug)]
pub struct CellTaskQueue<T> {
    buckets: Vec<LinkedMap<CellPos, Vec<QueuedItem<T>>>>,
    /// First possibly non-empty bucket; `buckets.len()` when empty.
    first: usize,
    acquired: HashMap<CellPos, usize>,
    in_flight: usize,
    max_in_flight: usize,
}

impl<T> CellTaskQueue<T> {
    pub fn new(level_count: usize, max_in_flight: usize) -> Self {
        Self {
            buckets: (0..level_count.max(1)).map(|_| LinkedMap::new()).collect(),
            first: level_count.max(1),
            acquired: HashMap::new(),
            in_flight: 0,
            max_in_flight,
        }
    }

    #[inline]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Number of outstanding acquisitions.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_acquired(&self, pos: CellPos) -> bool {
        self.acquired.contains_key(&pos)
    }

    pub fn has_work(&self) -> bool {
        self.first < self.buckets.len()
    }

    /// Queued items across all buckets, markers included.
    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .flat_map(|b| b.iter().map(|(_, items)| items.len()))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_work()
    }

    fn clamp(&self, level: u32) -> usize {
        (level as usize).min(self.buckets.len() - 1)
    }

    pub(crate) fn submit(&mut self, pos: CellPos, level: u32, item: QueuedItem<T>) {
        let level = self.clamp(level);
        self.buckets[level]
            .get_or_insert_with(pos, Vec::new)
            .push(item);
        self.first = self.first.min(level);
    }

    pub fn submit_task(&mut self, pos: CellPos, level: u32, task: T) {
        self.submit(pos, level, QueuedItem::Task(task));
    }

    pub fn submit_acquire(&mut self, pos: CellPos, level: u32) {
        self.submit(pos, level, QueuedItem::Acquire);
    }

    /// Moves everything queued for `pos` from bucket `from` to bucket `to`,
    /// keeping its relative order.
    pub fn resort(&mut self, pos: CellPos, from: u32, to: u32) {
        let (from, to) = (self.clamp(from), self.clamp(to));
        if from == to {
            return;
        }
        let Some(mut moved) = self.buckets[from].remove(&pos) else {
            return;
        };
        self.settle_cursor(from);

        let target = self.buckets[to].get_or_insert_with(pos, Vec::new);
        moved.append(target);
        *target = moved;
        self.first = self.first.min(to);
    }

    /// Frees one acquisition of `pos`. With `clear`, drops everything still
    /// queued for it; otherwise drops only its queued acquire markers.
    pub fn release(&mut self, pos: CellPos, clear: bool) {
        if let Some(count) = self.acquired.get_mut(&pos) {
            *count -= 1;
            self.in_flight -= 1;
            if *count == 0 {
                self.acquired.remove(&pos);
            }
        }

        for level in 0..self.buckets.len() {
            let bucket = &mut self.buckets[level];
            let Some(items) = bucket.get_mut(&pos) else {
                continue;
            };
            if !clear {
                items.retain(|item| !item.is_acquire());
            }
            if clear || items.is_empty() {
                bucket.remove(&pos);
                self.settle_cursor(level);
            }
        }
    }

    /// Next batch, or `None` when throttled or empty.
    pub fn pop(&mut self) -> Option<(CellPos, Vec<T>)> {
        if self.in_flight >= self.max_in_flight || !self.has_work() {
            return None;
        }
        let level = self.first;
        let (pos, items) = self.buckets[level].pop_front()?;
        self.settle_cursor(level);

        let mut tasks = Vec::with_capacity(items.len());
        for item in items {
            match item {
                QueuedItem::Task(task) => tasks.push(task),
                QueuedItem::Acquire => {
                    *self.acquired.entry(pos).or_insert(0) += 1;
                    self.in_flight += 1;
                }
            }
        }
        Some((pos, tasks))
    }

    fn settle_cursor(&mut self, emptied: usize) {
        if emptied != self.first || !self.buckets[emptied].is_empty() {
            return;
        }
        self.first = (emptied..self.buckets.len())
            .find(|&i| !self.buckets[i].is_empty())
            .unwrap_or(self.buckets.len());
    }

    /// One line per non-empty bucket.
    pub fn describe(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "  in_flight={}/{} acquired={}",
            self.in_flight,
            self.max_in_flight,
            self.acquired.len()
        );
        for (level, bucket) in self.buckets.iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            let cells: Vec<String> = bucket
                .iter()
                .map(|(pos, items)| format!("{}x{}", pos, items.len()))
                .collect();
            let _ = writeln!(out, "  level {:>2}: {}", level, cells.join(" "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: i32) -> CellPos {
        CellPos::new(x, 0)
    }

    fn drain(queue: &mut CellTaskQueue<u32>) -> Vec<(CellPos, Vec<u32>)> {
        std::iter::from_fn(|| queue.pop()).collect()
    }

    #[test]
    fn test_lowest_bucket_first_fifo_within() {
        let mut queue = CellTaskQueue::new(5, 10);
        queue.submit_task(p(1), 3, 10);
        queue.submit_task(p(2), 1, 20);
        queue.submit_task(p(3), 1, 30);
        queue.submit_task(p(2), 1, 21);

        let order = drain(&mut queue);
        assert_eq!(
            order,
            vec![(p(2), vec![20, 21]), (p(3), vec![30]), (p(1), vec![10])]
        );
    }

    #[test]
    fn test_resort_moves_pending_work() {
        let mut queue = CellTaskQueue::new(5, 10);
        queue.submit_task(p(1), 1, 10);
        queue.submit_task(p(2), 4, 20);
        queue.submit_task(p(2), 4, 21);

        queue.resort(p(2), 4, 0);
        let order = drain(&mut queue);
        assert_eq!(order, vec![(p(2), vec![20, 21]), (p(1), vec![10])]);
    }

    #[test]
    fn test_resort_keeps_relative_order_when_merging() {
        let mut queue = CellTaskQueue::new(5, 10);
        queue.submit_task(p(1), 3, 1);
        queue.submit_task(p(1), 1, 2);

        queue.resort(p(1), 3, 1);
        assert_eq!(drain(&mut queue), vec![(p(1), vec![1, 2])]);
    }

    #[test]
    fn test_acquire_throttles() {
        let mut queue = CellTaskQueue::new(3, 2);
        for x in 0..4 {
            queue.submit_task(p(x), 0, x as u32);
            queue.submit_acquire(p(x), 0);
        }

        assert!(queue.pop().is_some());
        assert!(queue.pop().is_some());
        assert_eq!(queue.in_flight(), 2);
        assert!(queue.pop().is_none());

        queue.release(p(0), false);
        assert_eq!(queue.pop().map(|(pos, _)| pos), Some(p(2)));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_release_with_clear_drops_queued_work() {
        let mut queue = CellTaskQueue::new(3, 2);
        queue.submit_task(p(0), 0, 1);
        queue.submit_acquire(p(0), 0);
        queue.pop();

        queue.submit_task(p(0), 1, 2);
        queue.submit_task(p(1), 2, 3);
        queue.release(p(0), true);

        assert!(!queue.is_acquired(p(0)));
        assert_eq!(drain(&mut queue), vec![(p(1), vec![3])]);
    }

    #[test]
    fn test_release_without_clear_drops_only_markers() {
        let mut queue = CellTaskQueue::new(3, 1);
        queue.submit_task(p(0), 0, 1);
        queue.submit_acquire(p(0), 0);
        queue.pop();

        queue.submit_task(p(0), 0, 2);
        queue.submit_acquire(p(0), 0);
        queue.release(p(0), false);

        assert_eq!(queue.pop(), Some((p(0), vec![2])));
        assert_eq!(queue.in_flight(), 0);
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let mut queue: CellTaskQueue<u32> = CellTaskQueue::new(3, 1);
        queue.release(p(7), false);
        assert_eq!(queue.in_flight(), 0);
    }

    #[test]
    fn test_levels_clamp_to_last_bucket() {
        let mut queue = CellTaskQueue::new(3, 1);
        queue.submit_task(p(0), 99, 1);
        queue.submit_task(p(1), 2, 2);
        assert_eq!(drain(&mut queue), vec![(p(0), vec![1]), (p(1), vec![2])]);
    }
}
