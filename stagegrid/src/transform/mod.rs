//! Stage transform collaborator.
//!
//! A transform advances one cell's content by one stage. It may read
//! neighbor content within the step's transform radius and mutate neighbor
//! content within its write radius; both are enforced by [`NeighborView`].
//! The scheduler guarantees every neighbor inside the radius has reached the
//! required stage before [`StageTransform::apply`] runs.

use crate::content::ContentHandle;
use crate::coord::CellPos;
use crate::lifecycle::CellCache;
use crate::stage::{StageId, StageStep};
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Errors raised by a stage transform. Any of them stops the scheduler.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("cell {center} read {pos} outside transform radius {radius}")]
    ReadOutOfRange {
        center: CellPos,
        pos: CellPos,
        radius: u32,
    },

    #[error("cell {center} wrote {pos} outside write radius {radius}")]
    WriteOutOfRange {
        center: CellPos,
        pos: CellPos,
        radius: u32,
    },

    #[error("neighbor {0} has no content")]
    NeighborMissing(CellPos),

    #[error("transform failed: {0}")]
    Failed(String),
}

// =============================================================================
// Neighbor View
// =============================================================================

/// Radius-checked access to the cells around a step's center.
#[derive(Clone)]
pub struct NeighborView {
    center: CellPos,
    step: Arc<StageStep>,
    cache: Arc<CellCache>,
}

impl NeighborView {
    pub fn new(center: CellPos, step: Arc<StageStep>, cache: Arc<CellCache>) -> Self {
        Self {
            center,
            step,
            cache,
        }
    }

    #[inline]
    pub fn center(&self) -> CellPos {
        self.center
    }

    /// Rings readable through this view.
    #[inline]
    pub fn read_radius(&self) -> u32 {
        self.step.transform_radius()
    }

    /// Rings writable through this view; the center is always writable.
    #[inline]
    pub fn write_radius(&self) -> u32 {
        self.step.write_radius().unwrap_or(0)
    }

    /// Stage `pos` is guaranteed to have reached.
    pub fn required_stage(&self, pos: CellPos) -> Option<StageId> {
        self.step.direct().get(self.center.distance(pos))
    }

    fn content(&self, pos: CellPos) -> Result<ContentHandle, TransformError> {
        self.cache
            .get(pos)
            .and_then(|entry| entry.latest_content())
            .ok_or(TransformError::NeighborMissing(pos))
    }

    /// Content of the cell at `pos`.
    pub fn read(&self, pos: CellPos) -> Result<ContentHandle, TransformError> {
        let radius = self.read_radius();
        if self.center.distance(pos) > radius {
            return Err(TransformError::ReadOutOfRange {
                center: self.center,
                pos,
                radius,
            });
        }
        self.content(pos)
    }

    /// Mutates the payload of the cell at `pos`.
    pub fn write<R>(&self, pos: CellPos, f: impl FnOnce(&mut Vec<u8>) -> R) -> Result<R, TransformError> {
        let radius = self.write_radius();
        if self.center.distance(pos) > radius {
            warn!(
                center = %self.center,
                pos = %pos,
                stage = %self.step.target(),
                radius,
                "Write outside declared radius rejected"
            );
            return Err(TransformError::WriteOutOfRange {
                center: self.center,
                pos,
                radius,
            });
        }
        let content = self.content(pos)?;
        let mut data = content.write();
        Ok(f(&mut data))
    }
}

impl std::fmt::Debug for NeighborView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeighborView")
            .field("center", &self.center)
            .field("stage", &self.step.target())
            .field("read_radius", &self.read_radius())
            .field("write_radius", &self.write_radius())
            .finish()
    }
}

// =============================================================================
// Transform trait
// =============================================================================

/// Everything a transform gets for one step.
#[derive(Debug)]
pub struct StepContext {
    pub step: Arc<StageStep>,
    pub center: CellPos,
    pub view: NeighborView,
    /// The center's content at the parent stage.
    pub content: ContentHandle,
}

impl StepContext {
    #[inline]
    pub fn target(&self) -> StageId {
        self.step.target()
    }
}

/// Opaque content generation for one stage.
pub trait StageTransform: Send + Sync + 'static {
    /// Produces the center's content at `ctx.step.target()`.
    fn apply(&self, ctx: StepContext) -> BoxFuture<'_, Result<ContentHandle, TransformError>>;
}

/// Transform that returns the content unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl StageTransform for IdentityTransform {
    fn apply(&self, ctx: StepContext) -> BoxFuture<'_, Result<ContentHandle, TransformError>> {
        Box::pin(async move { Ok(ctx.content) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::CellContent;
    use crate::lifecycle::CellEntry;
    use crate::stage::{PyramidKind, StagePipeline};
    use std::collections::HashMap;

    fn pipeline() -> StagePipeline {
        StagePipeline::builder()
            .stage("base", |s| s)
            .stage("shape", |s| s.requires("base", 2).write_radius(1))
            .build()
            .unwrap()
    }

    fn view(center: CellPos, radius: u32) -> (NeighborView, Arc<CellCache>) {
        let pipeline = pipeline();
        let step = Arc::clone(
            pipeline
                .pyramid(PyramidKind::Generation)
                .step_to(StageId::new(1)),
        );
        let entries: HashMap<_, _> = center
            .square(radius)
            .map(|p| {
                let entry = Arc::new(CellEntry::new(p, 2, 0, 10));
                entry.update_highest_allowed(Some(StageId::new(1)));
                entry.complete_stage(StageId::BASE, Arc::new(CellContent::empty(p)));
                (p, entry)
            })
            .collect();
        let cache = Arc::new(CellCache::build(center, radius, |p| entries.get(&p).cloned()).unwrap());
        (NeighborView::new(center, step, Arc::clone(&cache)), cache)
    }

    #[test]
    fn test_read_within_radius() {
        let (view, cache) = view(CellPos::ORIGIN, 2);
        assert_eq!(view.read(CellPos::new(2, -2)).unwrap().pos(), CellPos::new(2, -2));
        assert!(matches!(
            view.read(CellPos::new(3, 0)),
            Err(TransformError::ReadOutOfRange { radius: 2, .. })
        ));
        cache.release();
    }

    #[test]
    fn test_write_rejected_outside_write_radius() {
        let (view, cache) = view(CellPos::ORIGIN, 2);

        view.write(CellPos::new(1, 1), |data| data.push(7)).unwrap();
        assert_eq!(view.read(CellPos::new(1, 1)).unwrap().read().as_slice(), &[7]);

        let err = view.write(CellPos::new(2, 0), |data| data.push(9)).unwrap_err();
        assert!(matches!(err, TransformError::WriteOutOfRange { radius: 1, .. }));
        assert!(view.read(CellPos::new(2, 0)).unwrap().read().is_empty());
        cache.release();
    }

    #[test]
    fn test_required_stage_by_distance() {
        let (view, cache) = view(CellPos::ORIGIN, 2);
        assert_eq!(view.required_stage(CellPos::ORIGIN), Some(StageId::BASE));
        assert_eq!(view.required_stage(CellPos::new(2, 2)), Some(StageId::BASE));
        assert_eq!(view.required_stage(CellPos::new(3, 2)), None);
        cache.release();
    }
}
