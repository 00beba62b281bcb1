//! Priority-aware multiplexer in front of single-threaded processors.
//!
//! ```text
//!                  ┌──────────── sorter mailbox ────────────┐
//!   submit ──────► │ queue[worldgen]   queue[secondary] ... │
//!   level change ► │   buckets by level, FIFO by cell       │
//!   release ─────► │   acquire throttle per processor       │
//!                  └──────┬───────────────────┬─────────────┘
//!                         │ batch             │ batch
//!                         ▼                   ▼
//!                 worldgen processor   secondary processor
//!                         │ done              │ done
//!                         └──── poll again ───┘
//! ```
//!
//! All sorter state lives inside one [`Mailbox`]; every operation is a post.
//! A processor gets its next batch only after it finished the previous one.

mod level;
mod queue;

pub use level::QueueLevel;
pub use queue::CellTaskQueue;

use crate::coord::CellPos;
use crate::mailbox::{Mailbox, WeakMailbox};
use std::fmt::Write;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::trace;

// =============================================================================
// Priorities
// =============================================================================

/// Sorter mailbox priority for level changes.
pub const PRIORITY_LEVEL_CHANGE: usize = 0;
/// Sorter mailbox priority for releases.
pub const PRIORITY_RELEASE: usize = 1;
/// Sorter mailbox priority for submissions.
pub const PRIORITY_SUBMIT: usize = 2;
/// Sorter mailbox priority for polls.
pub const PRIORITY_POLL: usize = 3;

const SORTER_PRIORITIES: usize = 4;

// =============================================================================
// Processors
// =============================================================================

/// Unit of work delivered to a processor.
pub type SorterTask = Box<dyn FnOnce() + Send + 'static>;

/// Index of a processor registered with the sorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessorId(pub usize);

impl std::fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "processor-{}", self.0)
    }
}

/// A single-threaded consumer of sorted batches.
pub trait Processor: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Runs `batch` in order, then calls `done`.
    fn execute(&self, batch: Vec<SorterTask>, done: SorterTask);
}

impl<S: Send + 'static> Processor for Mailbox<S> {
    fn name(&self) -> &str {
        Mailbox::name(self)
    }

    fn execute(&self, batch: Vec<SorterTask>, done: SorterTask) {
        let posted = self.tell(0, move |_| {
            for task in batch {
                task();
            }
            done();
        });
        if !posted {
            trace!(processor = %Mailbox::name(self), "Processor closed, batch dropped");
        }
    }
}

/// Registration of a processor with its admission cap.
pub struct ProcessorSpec {
    pub processor: Arc<dyn Processor>,
    pub max_in_flight: usize,
}

impl ProcessorSpec {
    pub fn new(processor: Arc<dyn Processor>, max_in_flight: usize) -> Self {
        Self {
            processor,
            max_in_flight,
        }
    }
}

// =============================================================================
// Sorter state
// =============================================================================

struct ProcessorSlot {
    processor: Arc<dyn Processor>,
    queue: CellTaskQueue<SorterTask>,
    busy: bool,
}

/// State owned by the sorter mailbox.
pub struct SorterState {
    this: WeakMailbox<SorterState>,
    slots: Vec<ProcessorSlot>,
}

impl SorterState {
    fn submit(
        &mut self,
        id: ProcessorId,
        pos: CellPos,
        level: &QueueLevel,
        task: Option<SorterTask>,
        flush: bool,
    ) {
        let Some(slot) = self.slots.get_mut(id.0) else {
            return;
        };
        let level = level.get();
        if let Some(task) = task {
            slot.queue.submit_task(pos, level, task);
        }
        if flush {
            slot.queue.submit_acquire(pos, level);
        }
        self.poll(id);
    }

    fn on_level_change(&mut self, pos: CellPos, queue_level: &QueueLevel, new_level: u32) {
        let old = queue_level.get();
        for slot in &mut self.slots {
            slot.queue.resort(pos, old, new_level);
        }
        queue_level.set(new_level);
    }

    fn release(&mut self, id: ProcessorId, pos: CellPos, clear: bool) {
        let Some(slot) = self.slots.get_mut(id.0) else {
            return;
        };
        slot.queue.release(pos, clear);
        self.poll(id);
    }

    fn finish_batch(&mut self, id: ProcessorId) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            slot.busy = false;
        }
        self.poll(id);
    }

    /// Hands the next batch to an idle processor. An idle processor with
    /// nothing to pop sleeps until the next submit or release.
    fn poll(&mut self, id: ProcessorId) {
        let Some(slot) = self.slots.get_mut(id.0) else {
            return;
        };
        if slot.busy {
            return;
        }
        let Some((pos, batch)) = slot.queue.pop() else {
            return;
        };
        slot.busy = true;
        trace!(processor = %slot.processor.name(), pos = %pos, tasks = batch.len(), "Batch delivered");

        let this = self.this.clone();
        let done: SorterTask = Box::new(move || {
            if let Some(sorter) = this.upgrade() {
                sorter.tell(PRIORITY_POLL, move |state: &mut SorterState| {
                    state.finish_batch(id);
                });
            }
        });
        slot.processor.execute(batch, done);
    }

    fn describe(&self) -> String {
        let mut out = String::new();
        for (index, slot) in self.slots.iter().enumerate() {
            let _ = writeln!(
                out,
                "{} ({}){}",
                ProcessorId(index),
                slot.processor.name(),
                if slot.busy { " busy" } else { "" }
            );
            slot.queue.describe(&mut out);
        }
        out
    }
}

// =============================================================================
// Task Sorter
// =============================================================================

/// Cloneable handle to the sorter mailbox.
#[derive(Clone)]
pub struct TaskSorter {
    mailbox: Mailbox<SorterState>,
    processors: usize,
}

impl TaskSorter {
    /// Starts the sorter with `level_count` buckets per processor queue.
    pub fn spawn(processors: Vec<ProcessorSpec>, level_count: usize) -> (Self, JoinHandle<SorterState>) {
        let count = processors.len();
        let (mailbox, worker) = Mailbox::spawn_with("sorter", SORTER_PRIORITIES, |this| {
            SorterState {
                this,
                slots: processors
                    .into_iter()
                    .map(|spec| ProcessorSlot {
                        processor: spec.processor,
                        queue: CellTaskQueue::new(level_count, spec.max_in_flight),
                        busy: false,
                    })
                    .collect(),
            }
        });
        (
            Self {
                mailbox,
                processors: count,
            },
            worker,
        )
    }

    #[inline]
    pub fn processor_count(&self) -> usize {
        self.processors
    }

    /// Queues `task` for `pos` on `processor`. With `flush`, also queues an
    /// acquire marker: the cell then holds an admission slot until released.
    ///
    /// The bucket is read from `level` inside the sorter.
    pub fn submit(
        &self,
        processor: ProcessorId,
        pos: CellPos,
        level: Arc<QueueLevel>,
        task: SorterTask,
        flush: bool,
    ) {
        self.mailbox.tell(PRIORITY_SUBMIT, move |state: &mut SorterState| {
            state.submit(processor, pos, &level, Some(task), flush);
        });
    }

    /// Queues only an acquire marker for `pos`.
    pub fn acquire(&self, processor: ProcessorId, pos: CellPos, level: Arc<QueueLevel>) {
        self.mailbox.tell(PRIORITY_SUBMIT, move |state: &mut SorterState| {
            state.submit(processor, pos, &level, None, true);
        });
    }

    /// Moves pending work for `pos` to `new_level` in every queue.
    pub fn on_level_change(&self, pos: CellPos, queue_level: Arc<QueueLevel>, new_level: u32) {
        self.mailbox
            .tell(PRIORITY_LEVEL_CHANGE, move |state: &mut SorterState| {
                state.on_level_change(pos, &queue_level, new_level);
            });
    }

    /// Frees the admission slot of `pos` on `processor`.
    pub fn release(&self, processor: ProcessorId, pos: CellPos, clear: bool) {
        self.mailbox.tell(PRIORITY_RELEASE, move |state: &mut SorterState| {
            state.release(processor, pos, clear);
        });
    }

    /// Outstanding acquisitions on `processor`.
    pub async fn in_flight(&self, processor: ProcessorId) -> Option<usize> {
        self.mailbox
            .ask(PRIORITY_POLL, move |state: &mut SorterState| {
                state.slots.get(processor.0).map(|s| s.queue.in_flight())
            })
            .await
            .ok()
            .flatten()
    }

    /// Plain-text summary of every queue.
    pub async fn debug_status(&self) -> String {
        self.mailbox
            .ask(PRIORITY_POLL, |state: &mut SorterState| state.describe())
            .await
            .unwrap_or_else(|_| String::from("sorter closed\n"))
    }

    pub fn close(&self) {
        self.mailbox.close();
    }
}

impl std::fmt::Debug for TaskSorter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSorter")
            .field("processors", &self.processors)
            .field("pending", &self.mailbox.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const WORKER: ProcessorId = ProcessorId(0);

    fn processor() -> (Arc<dyn Processor>, JoinHandle<()>) {
        let (mailbox, worker) = Mailbox::spawn("worker", (), 1);
        (Arc::new(mailbox), worker)
    }

    fn level(n: u32) -> Arc<QueueLevel> {
        Arc::new(QueueLevel::new(n))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submitted_work_runs_on_processor() {
        let (proc, _worker) = processor();
        let (sorter, _) = TaskSorter::spawn(vec![ProcessorSpec::new(proc, 4)], 8);
        let (tx, mut rx) = mpsc::unbounded_channel();

        for x in 0..3 {
            let tx = tx.clone();
            sorter.submit(WORKER, CellPos::new(x, 0), level(1), Box::new(move || {
                let _ = tx.send(x);
            }), false);
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap());
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_acquired_cells_never_exceed_cap() {
        let (proc, _worker) = processor();
        let (sorter, _) = TaskSorter::spawn(vec![ProcessorSpec::new(proc, 2)], 8);
        let running = Arc::new(Mutex::new((0usize, 0usize)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for x in 0..10 {
            let running = Arc::clone(&running);
            let tx = tx.clone();
            sorter.submit(WORKER, CellPos::new(x, 0), level(0), Box::new(move || {
                let mut guard = running.lock();
                guard.0 += 1;
                guard.1 = guard.1.max(guard.0);
                let _ = tx.send(x);
            }), true);
        }

        for _ in 0..10 {
            let x = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
            assert!(sorter.in_flight(WORKER).await.unwrap() <= 2);
            running.lock().0 -= 1;
            sorter.release(WORKER, CellPos::new(x, 0), false);
        }

        assert!(running.lock().1 <= 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sorter.in_flight(WORKER).await, Some(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_level_change_reorders_pending() {
        let (proc, _worker) = processor();
        let (sorter, _) = TaskSorter::spawn(vec![ProcessorSpec::new(proc, 1)], 8);
        let (tx, mut rx) = mpsc::unbounded_channel();

        // occupy the only slot so later work stays queued
        sorter.acquire(WORKER, CellPos::new(99, 99), level(0));

        let levels: Vec<_> = (0..3).map(|_| level(5)).collect();
        for (x, lvl) in levels.iter().enumerate() {
            let tx = tx.clone();
            sorter.submit(WORKER, CellPos::new(x as i32, 0), Arc::clone(lvl), Box::new(move || {
                let _ = tx.send(x);
            }), false);
        }
        // everything above is filed before the level change lands
        assert_eq!(sorter.in_flight(WORKER).await, Some(1));
        sorter.on_level_change(CellPos::new(2, 0), Arc::clone(&levels[2]), 1);
        sorter.release(WORKER, CellPos::new(99, 99), false);

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap());
        }
        assert_eq!(order, vec![2, 0, 1]);
        assert_eq!(levels[2].get(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_debug_status_lists_processors() {
        let (proc, _worker) = processor();
        let (sorter, _) = TaskSorter::spawn(vec![ProcessorSpec::new(proc, 3)], 4);
        let status = sorter.debug_status().await;
        assert!(status.contains("processor-0 (worker)"));
        assert!(status.contains("in_flight=0/3"));
    }
}
