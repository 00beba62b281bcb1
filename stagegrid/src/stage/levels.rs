//! Mapping between priority levels and stage ceilings.
//!
//! ```text
//! level:   0 ..= full      full+1   full+2   ...   full+R    full+R+1
//! ceiling: top stage       deps(1)  deps(2)  ...   deps(R)   (absent)
//! ```
//!
//! `deps` is the generation pyramid's accumulated dependency list for the
//! top stage and `R` its radius. A cell at level `full + d` is needed only so
//! that some cell `d` rings away can reach the top stage.

use super::pipeline::StagePipeline;
use super::pyramid::StageDependencies;
use super::types::StageId;

/// Default level at which every stage is allowed.
pub const DEFAULT_FULL_LEVEL: u32 = 33;

/// Level/ceiling conversion for one pipeline.
#[derive(Debug, Clone)]
pub struct StageLevels {
    full_level: u32,
    top: StageId,
    full_deps: StageDependencies,
}

impl StageLevels {
    pub fn new(pipeline: &StagePipeline, full_level: u32) -> Self {
        let top = pipeline.top();
        Self {
            full_level,
            top,
            full_deps: pipeline.generation().step_to(top).accumulated().clone(),
        }
    }

    #[inline]
    pub fn full_level(&self) -> u32 {
        self.full_level
    }

    /// Highest level that still keeps a cell loaded.
    #[inline]
    pub fn max_loaded_level(&self) -> u32 {
        self.full_level + self.full_deps.radius()
    }

    /// Sentinel level meaning "not required at all".
    #[inline]
    pub fn absent_level(&self) -> u32 {
        self.max_loaded_level() + 1
    }

    #[inline]
    pub fn is_loaded(&self, level: u32) -> bool {
        level <= self.max_loaded_level()
    }

    /// Highest stage a cell at `level` may progress to.
    pub fn ceiling_for_level(&self, level: u32) -> Option<StageId> {
        let Some(distance) = level.checked_sub(self.full_level) else {
            return Some(self.top);
        };
        if distance == 0 {
            return Some(self.top);
        }
        if distance > self.full_deps.radius() {
            return None;
        }
        self.full_deps.get(distance)
    }

    /// Highest level at which `stage` is still allowed.
    pub fn level_for_stage(&self, stage: StageId) -> u32 {
        if stage >= self.top {
            return self.full_level;
        }
        self.full_level + self.full_deps.radius_of(stage).unwrap_or(0)
    }
}
