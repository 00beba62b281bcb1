//! Per-cell lifecycle record.
//!
//! ```text
//!   slots:   [ s0 ][ s1 ][ s2 ][ s3 ][ s4 ]
//!              ✓     ✓     …     ·     ·      ✓ ready  … pending  · empty
//!                                ▲
//!   highest_allowed ─────────────┘  (from the ticket level)
//!   started_work ──────────▲        (highest stage some step has claimed)
//! ```
//!
//! A slot holds either nothing, a pending future, or a successful future.
//! Failed futures are cleared as part of failing them, so a later request
//! can install a fresh one. Every slot sits behind its own small lock, which
//! gives the same single-winner guarantee as a compare-and-swap array.

use super::future::{StageFuture, StageResult};
use crate::content::ContentHandle;
use crate::coord::CellPos;
use crate::generation::GenerationTask;
use crate::sorter::QueueLevel;
use crate::stage::StageId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

const NO_STAGE: u8 = u8::MAX;

#[inline]
fn encode(stage: Option<StageId>) -> u8 {
    stage.map_or(NO_STAGE, StageId::raw)
}

#[inline]
fn decode(raw: u8) -> Option<StageId> {
    (raw != NO_STAGE).then(|| StageId::from_raw(raw))
}

/// Lifecycle state of one live cell.
pub struct CellEntry {
    pos: CellPos,
    slots: Box<[Mutex<Option<StageFuture>>]>,
    highest_allowed: AtomicU8,
    started_work: AtomicU8,
    task: Mutex<Option<Arc<GenerationTask>>>,
    pins: AtomicUsize,
    running_steps: AtomicUsize,
    ticket_level: AtomicU32,
    queue_level: Arc<QueueLevel>,
}

impl CellEntry {
    /// Creates an entry with no allowed stage. The first ceiling update
    /// follows immediately from the scheduler.
    pub fn new(pos: CellPos, stage_count: usize, ticket_level: u32, absent_level: u32) -> Self {
        Self {
            pos,
            slots: (0..stage_count).map(|_| Mutex::new(None)).collect(),
            highest_allowed: AtomicU8::new(NO_STAGE),
            started_work: AtomicU8::new(NO_STAGE),
            task: Mutex::new(None),
            pins: AtomicUsize::new(0),
            running_steps: AtomicUsize::new(0),
            ticket_level: AtomicU32::new(ticket_level),
            queue_level: Arc::new(QueueLevel::new(absent_level)),
        }
    }

    #[inline]
    pub fn pos(&self) -> CellPos {
        self.pos
    }

    #[inline]
    pub fn stage_count(&self) -> usize {
        self.slots.len()
    }

    // -------------------------------------------------------------------------
    // Levels
    // -------------------------------------------------------------------------

    #[inline]
    pub fn ticket_level(&self) -> u32 {
        self.ticket_level.load(Ordering::Acquire)
    }

    pub(crate) fn set_ticket_level(&self, level: u32) {
        self.ticket_level.store(level, Ordering::Release);
    }

    /// Level at which the sorter currently files this cell's work.
    pub fn queue_level(&self) -> &Arc<QueueLevel> {
        &self.queue_level
    }

    #[inline]
    pub fn highest_allowed(&self) -> Option<StageId> {
        decode(self.highest_allowed.load(Ordering::Acquire))
    }

    /// Whether `stage` lies above the current ceiling.
    #[inline]
    pub fn is_stage_disallowed(&self, stage: StageId) -> bool {
        self.highest_allowed().is_none_or(|ceiling| stage > ceiling)
    }

    /// Highest stage some step has started on.
    #[inline]
    pub fn started_work(&self) -> Option<StageId> {
        decode(self.started_work.load(Ordering::Acquire))
    }

    // -------------------------------------------------------------------------
    // Future slots
    // -------------------------------------------------------------------------

    fn slot(&self, stage: StageId) -> &Mutex<Option<StageFuture>> {
        &self.slots[stage.index()]
    }

    /// Returns the future for `stage`, installing a pending one if the
    /// stage is allowed. Disallowed stages get an unloaded result and leave
    /// the slot untouched.
    pub fn get_or_create_future(&self, stage: StageId) -> StageFuture {
        if self.is_stage_disallowed(stage) {
            return StageFuture::unloaded();
        }

        let installed = {
            let mut slot = self.slot(stage).lock();
            if let Some(existing) = slot.as_ref() {
                return existing.clone();
            }
            let fresh = StageFuture::pending();
            *slot = Some(fresh.clone());
            fresh
        };

        // the ceiling may have dropped while installing
        if self.is_stage_disallowed(stage) {
            self.fail_and_clear(stage, &installed);
            return StageFuture::unloaded();
        }
        installed
    }

    /// Existing future for `stage`, if any.
    pub fn future(&self, stage: StageId) -> Option<StageFuture> {
        self.slot(stage).lock().clone()
    }

    /// Resolves `stage` with `content`.
    ///
    /// # Panics
    ///
    /// Panics if the stage was already resolved successfully.
    pub fn complete_stage(&self, stage: StageId, content: ContentHandle) {
        let mut slot = self.slot(stage).lock();
        match slot.as_ref() {
            None => *slot = Some(StageFuture::ready(StageResult::Ready(content))),
            Some(existing) => {
                if existing.complete(StageResult::Ready(content.clone())) {
                    return;
                }
                assert!(
                    !existing.is_success(),
                    "cell {} stage {} completed twice",
                    self.pos,
                    stage
                );
                *slot = Some(StageFuture::ready(StageResult::Ready(content)));
            }
        }
    }

    fn fail_and_clear(&self, stage: StageId, future: &StageFuture) {
        let mut slot = self.slot(stage).lock();
        let is_current = slot.as_ref().is_some_and(|f| StageFuture::ptr_eq(f, future));
        if is_current && future.complete(StageResult::Unloaded) {
            *slot = None;
        }
    }

    /// Fails every pending future above `from` (exclusive) up to `to`
    /// (inclusive). Successful futures are kept.
    pub fn fail_pending_between(&self, from: Option<StageId>, to: StageId) {
        let start = from.map_or(0, |s| s.index() + 1);
        for index in start..=to.index().min(self.slots.len().saturating_sub(1)) {
            let mut slot = self.slots[index].lock();
            if slot
                .as_ref()
                .is_some_and(|f| f.complete(StageResult::Unloaded))
            {
                *slot = None;
            }
        }
    }

    /// Applies a new ceiling. On a downgrade every pending future above the
    /// new ceiling is failed before this returns. Returns true on downgrade.
    pub fn update_highest_allowed(&self, ceiling: Option<StageId>) -> bool {
        let old = decode(self.highest_allowed.swap(encode(ceiling), Ordering::AcqRel));
        let Some(old) = old else {
            return false;
        };
        let downgrade = ceiling.is_none_or(|new| new < old);
        if downgrade {
            self.fail_pending_between(ceiling, old);
        }
        downgrade
    }

    /// Highest stage at or below `max` whose future is still unresolved.
    pub fn highest_pending_stage(&self, max: Option<StageId>) -> Option<StageId> {
        let mut stage = max?;
        loop {
            let pending = self
                .slot(stage)
                .lock()
                .as_ref()
                .is_some_and(|future| !future.is_done());
            if pending {
                return Some(stage);
            }
            stage = stage.parent()?;
        }
    }

    /// Claims the right to run the step to `stage`.
    ///
    /// Returns true when the caller must run it, false when it has already
    /// been claimed.
    ///
    /// # Panics
    ///
    /// Panics if the parent stage has not been started yet.
    pub fn acquire_stage_bump(&self, stage: StageId) -> bool {
        let parent = encode(stage.parent());
        match self.started_work.compare_exchange(
            parent,
            stage.raw(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(previous) => match decode(previous) {
                Some(previous) if stage <= previous => false,
                previous => panic!(
                    "cell {}: unexpected started stage {:?} while starting {}",
                    self.pos, previous, stage
                ),
            },
        }
    }

    /// Content of the most advanced successful stage.
    pub fn latest_content(&self) -> Option<ContentHandle> {
        self.slots.iter().rev().find_map(|slot| {
            slot.lock()
                .as_ref()
                .and_then(|f| f.result().and_then(|r| r.content().cloned()))
        })
    }

    /// Content at `stage`, if that stage completed successfully.
    pub fn content_at(&self, stage: StageId) -> Option<ContentHandle> {
        self.future(stage)
            .and_then(|f| f.result().and_then(|r| r.content().cloned()))
    }

    /// Stage recorded in the latest content, i.e. what storage holds.
    pub fn persisted_stage(&self) -> Option<StageId> {
        self.latest_content().map(|c| c.stage())
    }

    /// `(stage, state)` for every slot.
    pub fn future_states(&self) -> Vec<(StageId, &'static str)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let label = slot.lock().as_ref().map_or("empty", StageFuture::state_label);
                (StageId::new(i), label)
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Task, pins, running steps
    // -------------------------------------------------------------------------

    pub fn task(&self) -> Option<Arc<GenerationTask>> {
        self.task.lock().clone()
    }

    /// Installs `task`, returning the previous one.
    pub(crate) fn replace_task(&self, task: Arc<GenerationTask>) -> Option<Arc<GenerationTask>> {
        self.task.lock().replace(task)
    }

    /// Clears the task registration if it still points at `task`.
    pub(crate) fn clear_task(&self, task: &Arc<GenerationTask>) {
        let mut current = self.task.lock();
        if current.as_ref().is_some_and(|t| Arc::ptr_eq(t, task)) {
            *current = None;
        }
    }

    pub fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    /// # Panics
    ///
    /// Panics when called more often than [`CellEntry::pin`].
    pub fn unpin(&self) {
        let result = self
            .pins
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        assert!(result.is_ok(), "cell {} unpinned below zero", self.pos);
    }

    #[inline]
    pub fn pin_count(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }

    pub(crate) fn begin_step(&self) {
        self.running_steps.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn end_step(&self) {
        self.running_steps.fetch_sub(1, Ordering::AcqRel);
    }

    #[inline]
    pub fn running_steps(&self) -> usize {
        self.running_steps.load(Ordering::Acquire)
    }

    /// No pins, no running steps and no task: the entry can be dropped.
    pub fn is_quiescent(&self) -> bool {
        self.pin_count() == 0 && self.running_steps() == 0 && self.task.lock().is_none()
    }
}

impl std::fmt::Debug for CellEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellEntry")
            .field("pos", &self.pos)
            .field("ticket_level", &self.ticket_level())
            .field("highest_allowed", &self.highest_allowed())
            .field("started_work", &self.started_work())
            .field("pins", &self.pin_count())
            .finish_non_exhaustive()
    }
}
