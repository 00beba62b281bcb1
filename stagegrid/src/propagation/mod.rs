//! Incremental priority-level propagation over the 8-neighbor grid.
//!
//! A single [`LevelPropagator`] engine is shared by every tracker. Trackers
//! supply sources through [`PropagationGraph`] and drain
//! [`LevelChange`]s after each run.
//!
//! ```text
//!   source (ticket level 0)
//!          │
//!          ▼
//!   ┌───┬───┬───┬───┐
//!   │ 2 │ 1 │ 1 │ 1 │      level(cell) = min(source(cell),
//!   ├───┼───┼───┼───┤                        1 + min(level(neighbor)))
//!   │ 2 │ 1 │ 0 │ 1 │
//!   ├───┼───┼───┼───┤      cells at the absent level are not stored
//!   │ 2 │ 1 │ 1 │ 1 │
//!   └───┴───┴───┴───┘
//! ```

mod engine;
mod queue;

pub use engine::{LevelChange, LevelPropagator, NodeRef, PropagationGraph};
pub use queue::LeveledQueue;
