//! Step application: claims a stage, routes the work through the sorter and
//! runs it on the tokio pool.
//!
//! ```text
//!   apply_step ─► acquire_stage_bump ─► sorter[worldgen] ─► tokio::spawn(StepJob)
//!                                                             │
//!        release worldgen slot ◄──────────────────────────────┤
//!        complete stage future ◄──────────────────────────────┤
//!        sorter[secondary] on_stage_completed ◄───────────────┘
//! ```

use super::commands::Internal;
use crate::content::{self, CellContent, ContentHandle};
use crate::error::FatalReport;
use crate::generation::StepDispatcher;
use crate::lifecycle::{CellCache, CellEntry, StageFuture};
use crate::secondary::SecondaryPipeline;
use crate::sorter::{ProcessorId, TaskSorter};
use crate::stage::{PyramidKind, StagePipeline, StageStep, StepTask};
use crate::storage::CellStorage;
use crate::telemetry::{EventSink, SchedulerEvent};
use crate::transform::{NeighborView, StageTransform, StepContext, TransformError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Sorter processor running stage steps.
pub const WORLDGEN: ProcessorId = ProcessorId(0);
/// Sorter processor running secondary pipeline callbacks.
pub const SECONDARY: ProcessorId = ProcessorId(1);

/// Collaborators shared by every step job.
#[derive(Clone)]
pub(crate) struct StepServices {
    pub storage: Arc<dyn CellStorage>,
    pub transform: Arc<dyn StageTransform>,
    pub secondary: Arc<dyn SecondaryPipeline>,
    pub events: Arc<dyn EventSink>,
    pub sorter: TaskSorter,
    pub internal: mpsc::UnboundedSender<Internal>,
    pub stage_count: usize,
}

pub(crate) struct StepRunner {
    pipeline: Arc<StagePipeline>,
    services: StepServices,
}

impl StepRunner {
    pub fn new(pipeline: Arc<StagePipeline>, services: StepServices) -> Self {
        Self { pipeline, services }
    }

    fn schedule(&self, entry: &Arc<CellEntry>, step: &Arc<StageStep>, cache: &Arc<CellCache>) {
        entry.begin_step();
        let pos = entry.pos();
        debug!(pos = %pos, stage = %step.target(), kind = %step.kind(), "Step scheduled");

        let job = StepJob {
            entry: Arc::clone(entry),
            step: Arc::clone(step),
            cache: Arc::clone(cache),
            services: self.services.clone(),
        };
        self.services.sorter.submit(
            WORLDGEN,
            pos,
            Arc::clone(entry.queue_level()),
            Box::new(move || {
                tokio::spawn(job.run());
            }),
            true,
        );
    }
}

impl StepDispatcher for StepRunner {
    fn pipeline(&self) -> &StagePipeline {
        &self.pipeline
    }

    fn apply_step(
        &self,
        entry: &Arc<CellEntry>,
        step: &Arc<StageStep>,
        cache: &Arc<CellCache>,
    ) -> StageFuture {
        let stage = step.target();
        let future = entry.get_or_create_future(stage);
        if future.is_done() || !entry.acquire_stage_bump(stage) {
            return future;
        }
        self.schedule(entry, step, cache);
        future
    }
}

// =============================================================================
// Step job
// =============================================================================

struct StepJob {
    entry: Arc<CellEntry>,
    step: Arc<StageStep>,
    cache: Arc<CellCache>,
    services: StepServices,
}

impl StepJob {
    async fn run(self) {
        let pos = self.entry.pos();
        let stage = self.step.target();

        let outcome = match self.step.task() {
            StepTask::Load => Ok(self.load().await),
            StepTask::Transform => self.transform().await,
            StepTask::Passthrough => self.parent_content(),
        };

        let services = &self.services;
        services.sorter.release(WORLDGEN, pos, false);
        match outcome {
            Ok(content) => {
                self.entry.complete_stage(stage, content);
                services
                    .events
                    .emit(SchedulerEvent::StageCompleted { pos, stage });

                let secondary = Arc::clone(&services.secondary);
                services.sorter.submit(
                    SECONDARY,
                    pos,
                    Arc::clone(self.entry.queue_level()),
                    Box::new(move || secondary.on_stage_completed(pos, stage)),
                    false,
                );
            }
            Err(e) => {
                error!(pos = %pos, stage = %stage, error = %e, "Stage transform failed");
                let report = FatalReport::from_transform(pos, stage, &e)
                    .with_chain(self.cache.entries());
                let _ = services.internal.send(Internal::Fatal(Arc::new(report)));
            }
        }

        self.entry.end_step();
        let _ = services.internal.send(Internal::StepFinished(pos));
    }

    /// Reads the cell from storage. Failures and corrupt data start the
    /// cell empty.
    async fn load(&self) -> ContentHandle {
        let pos = self.entry.pos();
        let events = &self.services.events;

        let loaded = match self.services.storage.load(pos).await {
            Ok(Some(bytes)) => match content::decode(pos, bytes, self.services.stage_count) {
                Ok(content) => Some(content),
                Err(e) => {
                    warn!(pos = %pos, error = %e, "Corrupt cell data, starting empty");
                    events.emit(SchedulerEvent::CorruptCellData {
                        pos,
                        error: e.to_string(),
                    });
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(pos = %pos, error = %e, "Cell load failed, starting empty");
                events.emit(SchedulerEvent::StorageReadFailed {
                    pos,
                    error: e.to_string(),
                });
                None
            }
        };

        events.emit(SchedulerEvent::CellLoaded {
            pos,
            stage: loaded.as_ref().map(CellContent::stage),
        });
        Arc::new(loaded.unwrap_or_else(|| CellContent::empty(pos)))
    }

    fn parent_content(&self) -> Result<ContentHandle, TransformError> {
        let pos = self.entry.pos();
        self.step
            .target()
            .parent()
            .and_then(|parent| self.entry.content_at(parent))
            .ok_or(TransformError::NeighborMissing(pos))
    }

    async fn transform(&self) -> Result<ContentHandle, TransformError> {
        let stage = self.step.target();
        let content = self.parent_content()?;

        // Generation over content that storage already holds at this stage
        // reuses it as is.
        if self.step.kind() == PyramidKind::Generation && content.stage() >= stage {
            return Ok(content);
        }

        let pos = self.entry.pos();
        let ctx = StepContext {
            step: Arc::clone(&self.step),
            center: pos,
            view: NeighborView::new(pos, Arc::clone(&self.step), Arc::clone(&self.cache)),
            content,
        };
        let result = self.services.transform.apply(ctx).await?;
        result.mark_stage(stage);
        Ok(result)
    }
}
