//! Stage pipeline model.
//!
//! Stages form a total order. Each stage's transform may read neighbor
//! content, so reaching stage `k` on one cell requires earlier stages on the
//! cells around it. Two pyramids describe those requirements:
//!
//! - the **generation** pyramid assumes cells are generated from scratch
//! - the **loading** pyramid assumes cells are restored from storage and
//!   only re-runs stages marked for reload
//!
//! [`StageLevels`] maps priority levels to the highest stage a cell may
//! reach.

mod levels;
mod pipeline;
mod pyramid;
mod types;

pub use levels::{StageLevels, DEFAULT_FULL_LEVEL};
pub use pipeline::{PipelineError, StageBuilder, StagePipeline, StagePipelineBuilder};
pub use pyramid::{StageDependencies, StagePyramid, StageStep};
pub use types::{PyramidKind, StageDef, StageId, StepTask};
