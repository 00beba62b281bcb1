//! Per-cell lifecycle state.
//!
//! Every live cell has a [`CellEntry`] holding one future per stage, the
//! highest stage its priority allows, and pin/step counters that keep it
//! alive while neighbors read it. [`CellStore`] owns the entries.

mod cache;
mod entry;
mod future;
mod store;

pub use cache::CellCache;
pub use entry::CellEntry;
pub use future::{StageFuture, StageResult};
pub use store::{CellStore, VisibleCells};
