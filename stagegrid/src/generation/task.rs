//! Layer-by-layer stage advancement.
//!
//! ```text
//!   target = 3, generation radii: stage0 → 3, stage1 → 2, stage2 → 1
//!
//!   layer 0        layer 1       layer 2      layer 3
//!   ■■■■■■■
//!   ■■■■■■■        ■■■■■
//!   ■■■■■■■        ■■■■■         ■■■
//!   ■■■■■■■   →    ■■■■■    →    ■■■    →     ■
//!   ■■■■■■■        ■■■■■         ■■■
//!   ■■■■■■■        ■■■■■
//!   ■■■■■■■
//! ```
//!
//! The base layer is first scheduled through the loading pyramid. If the
//! persisted stages around the center cannot satisfy the target by loading
//! alone, the task switches to the generation pyramid and schedules the base
//! layer again at the generation radius.
//!
//! A layer is scanned rows then columns and the scan stops at the first
//! unresolved future. The cells after it are scheduled only once it
//! settles, resuming from the stored scan index.

use crate::error::{FatalReport, SchedulerError};
use crate::lifecycle::{CellCache, CellEntry, CellStore, StageFuture};
use crate::coord::CellPos;
use crate::stage::{PyramidKind, StageId, StagePipeline, StageStep};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Applies pyramid steps on behalf of a task.
pub trait StepDispatcher {
    fn pipeline(&self) -> &StagePipeline;

    /// Starts (or joins) `step` on `entry` and returns the stage future.
    /// Disallowed stages resolve to unloaded immediately.
    fn apply_step(
        &self,
        entry: &Arc<CellEntry>,
        step: &Arc<StageStep>,
        cache: &Arc<CellCache>,
    ) -> StageFuture;
}

/// Outcome of one [`GenerationTask::advance`] call.
#[derive(Debug)]
pub enum Advance {
    /// Waiting on this future; call `advance` again once it resolves.
    Suspended(StageFuture),
    /// The task is over. `reached` is false when it was cancelled.
    Finished { reached: bool },
}

#[derive(Debug)]
struct TaskState {
    /// Last layer whose every cell settled.
    scheduled: Option<StageId>,
    needs_generation: bool,
    /// Layer being scanned and the scan index to resume from.
    scanning: Option<(StageId, usize)>,
    /// Future the scan stopped on.
    pending: Option<StageFuture>,
    finished: bool,
}

/// Drives one cell toward one target stage.
pub struct GenerationTask {
    entry: Arc<CellEntry>,
    target: StageId,
    cache: Arc<CellCache>,
    cancelled: AtomicBool,
    state: Mutex<TaskState>,
}

impl GenerationTask {
    /// Creates a task and pins every entry within the target's generation
    /// radius. A missing entry inside that radius is fatal.
    pub fn create(
        store: &CellStore,
        entry: &Arc<CellEntry>,
        target: StageId,
        pipeline: &StagePipeline,
    ) -> Result<Arc<Self>, SchedulerError> {
        let center = entry.pos();
        let radius = pipeline
            .generation()
            .step_to(target)
            .accumulated_radius_of(StageId::BASE);

        let cache = CellCache::build(center, radius, |pos| store.get(pos).cloned()).map_err(
            |missing| {
                let chain: Vec<_> = center
                    .square(radius)
                    .filter_map(|pos| store.get(pos))
                    .collect();
                SchedulerError::Fatal(Arc::new(
                    FatalReport::new(
                        center,
                        target,
                        format!("no lifecycle entry for dependency {missing}"),
                    )
                    .with_chain(chain),
                ))
            },
        )?;

        debug!(pos = %center, target = %target, radius, "Generation task created");
        Ok(Arc::new(Self {
            entry: Arc::clone(entry),
            target,
            cache: Arc::new(cache),
            cancelled: AtomicBool::new(false),
            state: Mutex::new(TaskState {
                scheduled: None,
                needs_generation: false,
                scanning: None,
                pending: None,
                finished: false,
            }),
        }))
    }

    #[inline]
    pub fn pos(&self) -> CellPos {
        self.entry.pos()
    }

    #[inline]
    pub fn target(&self) -> StageId {
        self.target
    }

    pub fn cache(&self) -> &Arc<CellCache> {
        &self.cache
    }

    /// Stops the task at its next `advance`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Whether the task switched to full generation.
    pub fn needs_generation(&self) -> bool {
        self.state.lock().needs_generation
    }

    /// Last layer whose every cell settled.
    pub fn scheduled_stage(&self) -> Option<StageId> {
        self.state.lock().scheduled
    }

    /// Makes as much progress as possible without blocking.
    pub fn advance(
        self: &Arc<Self>,
        dispatcher: &dyn StepDispatcher,
    ) -> Result<Advance, SchedulerError> {
        let mut state = self.state.lock();
        if state.finished {
            return Ok(Advance::Finished {
                reached: !self.is_cancelled(),
            });
        }

        loop {
            if self.is_cancelled() {
                state.pending = None;
                state.scanning = None;
            } else if let Some(pending) = self.settle_pending(&mut state) {
                return Ok(Advance::Suspended(pending));
            }

            if self.is_cancelled() || state.scheduled == Some(self.target) {
                self.finish(&mut state);
                return Ok(Advance::Finished {
                    reached: !self.is_cancelled(),
                });
            }

            let (stage, resume_at) = match state.scanning.take() {
                Some(resume) => resume,
                None => (self.next_layer(&mut state, dispatcher.pipeline()), 0),
            };
            self.schedule_layer(&mut state, stage, resume_at, dispatcher)?;
        }
    }

    /// Stage of the next layer to scan, switching to generation after the
    /// base layer when loading alone cannot reach the target.
    fn next_layer(&self, state: &mut TaskState, pipeline: &StagePipeline) -> StageId {
        match state.scheduled {
            None => StageId::BASE,
            Some(done) if done == StageId::BASE && !state.needs_generation => {
                if self.can_load_without_generation(pipeline) {
                    done.next()
                } else {
                    debug!(pos = %self.pos(), target = %self.target, "Switching to generation");
                    state.needs_generation = true;
                    StageId::BASE
                }
            }
            Some(done) => done.next(),
        }
    }

    /// Returns the future the scan stopped on while it is unresolved. A
    /// future that resolved unsuccessfully cancels the task.
    fn settle_pending(&self, state: &mut TaskState) -> Option<StageFuture> {
        let future = state.pending.take()?;
        match future.result() {
            None => {
                state.pending = Some(future.clone());
                Some(future)
            }
            Some(result) if !result.is_success() => {
                debug!(pos = %self.pos(), target = %self.target, "Dependency unloaded, cancelling");
                self.cancel();
                state.scanning = None;
                None
            }
            Some(_) => None,
        }
    }

    fn pyramid_kind(state: &TaskState) -> PyramidKind {
        if state.needs_generation {
            PyramidKind::Generation
        } else {
            PyramidKind::Loading
        }
    }

    /// True when every cell within the loading radius already holds the
    /// stage the target needs at its distance.
    fn can_load_without_generation(&self, pipeline: &StagePipeline) -> bool {
        let step = pipeline.loading().step_to(self.target);
        let accumulated = step.accumulated();
        let center = self.pos();

        center.square(accumulated.radius()).all(|pos| {
            let distance = center.distance(pos);
            let required = if distance == 0 {
                Some(self.target)
            } else {
                accumulated.get(distance)
            };
            let Some(required) = required else {
                return true;
            };
            self.cache
                .get(pos)
                .and_then(|entry| entry.persisted_stage())
                .is_some_and(|persisted| persisted >= required)
        })
    }

    /// Applies `stage` to the layer's cells from scan index `resume_at`
    /// until one of them is left unresolved.
    fn schedule_layer(
        &self,
        state: &mut TaskState,
        stage: StageId,
        resume_at: usize,
        dispatcher: &dyn StepDispatcher,
    ) -> Result<(), SchedulerError> {
        let pipeline = dispatcher.pipeline();
        let kind = Self::pyramid_kind(state);
        let radius = pipeline
            .pyramid(kind)
            .step_to(self.target)
            .accumulated_radius_of(stage);
        let center = self.pos();

        for (index, pos) in center.square(radius).enumerate().skip(resume_at) {
            let Some(entry) = self.cache.get(pos) else {
                return Err(self.fatal(stage, format!("dependency {pos} outside task cache")));
            };

            let must_generate = stage != StageId::BASE
                && entry.persisted_stage().is_none_or(|persisted| persisted < stage);
            if must_generate && !state.needs_generation {
                return Err(self.fatal(
                    stage,
                    format!("cell {pos} needs generation while loading"),
                ));
            }
            let step_kind = if must_generate {
                PyramidKind::Generation
            } else {
                PyramidKind::Loading
            };
            let step = pipeline.pyramid(step_kind).step_to(stage);

            let future = dispatcher.apply_step(entry, step, &self.cache);
            match future.result() {
                None => {
                    state.pending = Some(future);
                    state.scanning = Some((stage, index + 1));
                    return Ok(());
                }
                Some(result) if !result.is_success() => {
                    debug!(pos = %pos, stage = %stage, center = %center, "Dependency unloaded, cancelling");
                    self.cancel();
                    return Ok(());
                }
                Some(_) => {}
            }
        }

        state.scheduled = Some(stage);
        Ok(())
    }

    fn finish(self: &Arc<Self>, state: &mut TaskState) {
        state.finished = true;
        self.cache.release();
        self.entry.clear_task(self);
        debug!(
            pos = %self.pos(),
            target = %self.target,
            cancelled = self.is_cancelled(),
            "Generation task finished"
        );
    }

    fn fatal(&self, stage: StageId, message: String) -> SchedulerError {
        SchedulerError::Fatal(Arc::new(
            FatalReport::new(self.pos(), stage, message).with_chain(self.cache.entries()),
        ))
    }
}

impl std::fmt::Debug for GenerationTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationTask")
            .field("pos", &self.pos())
            .field("target", &self.target)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
