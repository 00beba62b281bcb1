//! Stage advancement for one cell.
//!
//! A [`GenerationTask`] drives a single cell toward a single target stage.
//! It schedules one layer of steps at a time over the cells the target
//! depends on and suspends on the first unresolved stage future.

mod task;

pub use task::{Advance, GenerationTask, StepDispatcher};
