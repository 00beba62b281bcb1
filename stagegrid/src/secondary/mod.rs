//! Secondary pipeline synchronized with cell priority.
//!
//! The secondary pipeline (lighting, for instance) is registered as the
//! sorter's second processor. Its callbacks run on that processor's mailbox,
//! one at a time, in the order the sorter delivers them; pending callbacks
//! move between priority buckets like any other sorted work.

use crate::coord::CellPos;
use crate::stage::StageId;

pub trait SecondaryPipeline: Send + Sync + 'static {
    /// `pos` completed `stage`.
    fn on_stage_completed(&self, pos: CellPos, stage: StageId);

    /// `pos` is about to be saved and dropped. Side effects for the cell
    /// must be finished when this returns.
    fn on_cell_unloading(&self, pos: CellPos);
}

/// Secondary pipeline that ignores every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSecondaryPipeline;

impl SecondaryPipeline for NullSecondaryPipeline {
    fn on_stage_completed(&self, _pos: CellPos, _stage: StageId) {}

    fn on_cell_unloading(&self, _pos: CellPos) {}
}
