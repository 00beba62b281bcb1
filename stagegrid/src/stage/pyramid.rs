//! Stage pyramids: direct and accumulated dependency radii per step.
//!
//! A step records, for every distance from the center cell, the most
//! advanced stage a cell at that distance must have reached before the step
//! may run. Lower stages are implied.
//!
//! ```text
//! distance:        0     1     2     3     4
//! direct:       [ s2 ,  s2 ,  s1 ]                step to s3: s2 within 1, s1 within 2
//! acc(s2):      [ s1 ,  s1 ]                      step to s2 needs s1 within 1
//! acc(s1):      [ s0 ,  s0 ]                      step to s1 needs s0 within 1
//! accumulated:  [ s2 ,  s2 ,  s1 ,  s0 ,  s0 ]    acc(s1) shifted out by 2
//! ```
//!
//! A cell at distance `i` that must reach stage `s` drags in the
//! accumulated dependencies of `s` shifted out by `i`. The accumulated
//! value at each distance is the largest stage any such requirement asks
//! for there.

use super::types::{PyramidKind, StageId, StepTask};
use std::sync::Arc;

// =============================================================================
// Stage Dependencies
// =============================================================================

/// Stage required at each Chebyshev distance, non-increasing outward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageDependencies {
    by_distance: Vec<StageId>,
}

impl StageDependencies {
    /// Builds direct dependencies from `(stage, radius)` requirements.
    pub(crate) fn from_requirements(requirements: &[(StageId, u32)]) -> Self {
        let mut slots: Vec<Option<StageId>> = Vec::new();
        for &(stage, radius) in requirements {
            let radius = radius as usize;
            if slots.len() <= radius {
                slots.resize(radius + 1, None);
            }
            for slot in slots.iter_mut().take(radius + 1) {
                *slot = (*slot).max(Some(stage));
            }
        }
        Self {
            by_distance: slots.into_iter().flatten().collect(),
        }
    }

    /// Combines direct dependencies with the accumulated dependencies of
    /// every stage they require. `accumulated_of` yields them for stages
    /// below the step's target.
    pub(crate) fn accumulate<'a>(
        direct: &Self,
        accumulated_of: impl Fn(StageId) -> &'a StageDependencies,
    ) -> Self {
        let mut slots: Vec<Option<StageId>> =
            direct.by_distance.iter().copied().map(Some).collect();
        for (offset, &required) in direct.by_distance.iter().enumerate() {
            for (i, &stage) in accumulated_of(required).by_distance.iter().enumerate() {
                let distance = offset + i;
                if slots.len() <= distance {
                    slots.resize(distance + 1, None);
                }
                slots[distance] = slots[distance].max(Some(stage));
            }
        }

        // a stage needed further out is needed closer in too
        for i in (0..slots.len().saturating_sub(1)).rev() {
            slots[i] = slots[i].max(slots[i + 1]);
        }
        Self {
            by_distance: slots.into_iter().flatten().collect(),
        }
    }

    /// Stage required at `distance`, or `None` beyond the radius.
    #[inline]
    pub fn get(&self, distance: u32) -> Option<StageId> {
        self.by_distance.get(distance as usize).copied()
    }

    /// Largest distance with any requirement (0 when empty).
    #[inline]
    pub fn radius(&self) -> u32 {
        self.by_distance.len().saturating_sub(1) as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_distance.is_empty()
    }

    /// Largest distance at which `stage` (or a later stage) is required.
    pub fn radius_of(&self, stage: StageId) -> Option<u32> {
        self.by_distance
            .iter()
            .rposition(|&required| required >= stage)
            .map(|d| d as u32)
    }
}

// =============================================================================
// Stage Step
// =============================================================================

/// One step of a pyramid: how to reach `target` and what it needs.
#[derive(Debug, Clone)]
pub struct StageStep {
    target: StageId,
    kind: PyramidKind,
    task: StepTask,
    direct: StageDependencies,
    accumulated: StageDependencies,
    write_radius: Option<u32>,
}

impl StageStep {
    pub(crate) fn new(
        target: StageId,
        kind: PyramidKind,
        task: StepTask,
        direct: StageDependencies,
        accumulated: StageDependencies,
        write_radius: Option<u32>,
    ) -> Self {
        Self {
            target,
            kind,
            task,
            direct,
            accumulated,
            write_radius,
        }
    }

    #[inline]
    pub fn target(&self) -> StageId {
        self.target
    }

    #[inline]
    pub fn kind(&self) -> PyramidKind {
        self.kind
    }

    #[inline]
    pub fn task(&self) -> StepTask {
        self.task
    }

    pub fn direct(&self) -> &StageDependencies {
        &self.direct
    }

    pub fn accumulated(&self) -> &StageDependencies {
        &self.accumulated
    }

    /// Rings of neighbor content this step reads.
    #[inline]
    pub fn transform_radius(&self) -> u32 {
        self.direct.radius()
    }

    #[inline]
    pub fn write_radius(&self) -> Option<u32> {
        self.write_radius
    }

    /// Radius out to which `stage` must be complete before this step runs.
    /// The target itself is needed only at the center.
    pub fn accumulated_radius_of(&self, stage: StageId) -> u32 {
        if stage == self.target {
            0
        } else {
            self.accumulated.radius_of(stage).unwrap_or(0)
        }
    }
}

// =============================================================================
// Stage Pyramid
// =============================================================================

/// All steps of one pyramid, indexed by target stage.
#[derive(Debug, Clone)]
pub struct StagePyramid {
    kind: PyramidKind,
    steps: Vec<Arc<StageStep>>,
}

impl StagePyramid {
    pub(crate) fn new(kind: PyramidKind, steps: Vec<Arc<StageStep>>) -> Self {
        Self { kind, steps }
    }

    #[inline]
    pub fn kind(&self) -> PyramidKind {
        self.kind
    }

    /// Step to `stage`.
    ///
    /// # Panics
    ///
    /// Panics if the stage does not belong to the pipeline. Stage ids are
    /// validated at the public API boundary.
    #[inline]
    pub fn step_to(&self, stage: StageId) -> &Arc<StageStep> {
        &self.steps[stage.index()]
    }

    pub fn steps(&self) -> impl Iterator<Item = &Arc<StageStep>> {
        self.steps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(i: usize) -> StageId {
        StageId::new(i)
    }

    #[test]
    fn test_direct_requirements_take_max_per_distance() {
        let deps = StageDependencies::from_requirements(&[(s(2), 0), (s(1), 3)]);

        assert_eq!(deps.get(0), Some(s(2)));
        assert_eq!(deps.get(1), Some(s(1)));
        assert_eq!(deps.get(3), Some(s(1)));
        assert_eq!(deps.get(4), None);
        assert_eq!(deps.radius(), 3);
    }

    #[test]
    fn test_radius_of_finds_outermost_ring() {
        let deps = StageDependencies::from_requirements(&[(s(3), 1), (s(1), 4)]);

        assert_eq!(deps.radius_of(s(3)), Some(1));
        assert_eq!(deps.radius_of(s(2)), Some(1));
        assert_eq!(deps.radius_of(s(1)), Some(4));
        assert_eq!(deps.radius_of(s(0)), Some(4));
        assert_eq!(deps.radius_of(s(4)), None);
    }

    #[test]
    fn test_accumulate_shifts_parent_outward() {
        // step to 2 needs 1 within radius 1; step to 1 needs 0 within radius 2
        let base = StageDependencies::default();
        let one = StageDependencies::accumulate(
            &StageDependencies::from_requirements(&[(s(0), 2)]),
            |_| &base,
        );
        let direct = StageDependencies::from_requirements(&[(s(1), 1)]);

        let acc = StageDependencies::accumulate(&direct, |stage| {
            if stage == s(1) {
                &one
            } else {
                &base
            }
        });

        assert_eq!(acc.get(0), Some(s(1)));
        assert_eq!(acc.get(1), Some(s(1)));
        assert_eq!(acc.get(3), Some(s(0)));
        assert_eq!(acc.get(4), None);
        assert_eq!(acc.radius_of(s(0)), Some(3));
    }

    #[test]
    fn test_accumulate_follows_non_parent_requirements() {
        // s1 needs s0 within 2, s2 needs nothing, s3 needs s1 within 5
        let base = StageDependencies::default();
        let one = StageDependencies::accumulate(
            &StageDependencies::from_requirements(&[(s(0), 2)]),
            |_| &base,
        );
        let two = StageDependencies::accumulate(
            &StageDependencies::from_requirements(&[(s(1), 0)]),
            |_| &one,
        );
        let direct = StageDependencies::from_requirements(&[(s(2), 0), (s(1), 5)]);

        let acc = StageDependencies::accumulate(&direct, |stage| match stage.index() {
            2 => &two,
            1 => &one,
            _ => &base,
        });

        assert_eq!(acc.get(0), Some(s(2)));
        assert_eq!(acc.get(5), Some(s(1)));
        assert_eq!(acc.get(7), Some(s(0)));
        assert_eq!(acc.radius_of(s(1)), Some(5));
        assert_eq!(acc.radius_of(s(0)), Some(7));
    }

    #[test]
    fn test_accumulated_radius_of_target_is_zero() {
        let direct = StageDependencies::from_requirements(&[(s(1), 2)]);
        let step = StageStep::new(
            s(2),
            PyramidKind::Generation,
            StepTask::Transform,
            direct.clone(),
            direct,
            None,
        );

        assert_eq!(step.accumulated_radius_of(s(2)), 0);
        assert_eq!(step.accumulated_radius_of(s(1)), 2);
        assert_eq!(step.transform_radius(), 2);
    }
}
