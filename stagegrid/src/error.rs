//! Scheduler errors and fatal diagnostics.

use crate::coord::CellPos;
use crate::lifecycle::CellEntry;
use crate::stage::StageId;
use crate::transform::TransformError;
use std::fmt::Write;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the scheduler driver and its handle.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler stopped on an unrecoverable condition.
    #[error("fatal scheduler error at cell {} stage {}: {}", .0.pos, .0.stage, .0.message)]
    Fatal(Arc<FatalReport>),

    /// The driver is no longer running.
    #[error("scheduler is not running")]
    Closed,

    #[error("stage {0} is not part of the pipeline")]
    UnknownStage(StageId),
}

/// Future states of one cell at the time of a fatal error.
#[derive(Debug, Clone)]
pub struct CellSnapshot {
    pub pos: CellPos,
    pub ticket_level: u32,
    pub highest_allowed: Option<StageId>,
    pub started_work: Option<StageId>,
    pub futures: Vec<(StageId, &'static str)>,
}

impl CellSnapshot {
    pub fn capture(entry: &CellEntry) -> Self {
        Self {
            pos: entry.pos(),
            ticket_level: entry.ticket_level(),
            highest_allowed: entry.highest_allowed(),
            started_work: entry.started_work(),
            futures: entry.future_states(),
        }
    }
}

/// Diagnostic report for a fatal error: the failing cell and stage plus the
/// state of every cell the failing task depended on.
#[derive(Debug, Clone)]
pub struct FatalReport {
    pub pos: CellPos,
    pub stage: StageId,
    pub message: String,
    pub chain: Vec<CellSnapshot>,
}

impl FatalReport {
    pub fn new(pos: CellPos, stage: StageId, message: impl Into<String>) -> Self {
        Self {
            pos,
            stage,
            message: message.into(),
            chain: Vec::new(),
        }
    }

    pub fn from_transform(pos: CellPos, stage: StageId, error: &TransformError) -> Self {
        Self::new(pos, stage, format!("stage transform failed: {error}"))
    }

    pub fn with_chain<'a>(mut self, entries: impl IntoIterator<Item = &'a Arc<CellEntry>>) -> Self {
        self.chain = entries
            .into_iter()
            .map(|entry| CellSnapshot::capture(entry))
            .collect();
        self
    }

    /// Multi-line rendering, one row per cell in the chain.
    pub fn render(&self) -> String {
        let mut out = format!("{} at {} stage {}\n", self.message, self.pos, self.stage);
        for cell in &self.chain {
            let states: Vec<String> = cell
                .futures
                .iter()
                .map(|(stage, state)| format!("{stage}={state}"))
                .collect();
            let _ = writeln!(
                out,
                "  {} level={} allowed={:?} started={:?} [{}]",
                cell.pos,
                cell.ticket_level,
                cell.highest_allowed,
                cell.started_work,
                states.join(" ")
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_display() {
        let report = FatalReport::new(CellPos::new(4, 5), StageId::new(2), "boom");
        let err = SchedulerError::Fatal(Arc::new(report));
        assert_eq!(err.to_string(), "fatal scheduler error at cell [4, 5] stage #2: boom");
    }

    #[test]
    fn test_report_renders_chain() {
        let entry = Arc::new(CellEntry::new(CellPos::new(1, 1), 3, 7, 10));
        entry.update_highest_allowed(Some(StageId::new(2)));
        entry.get_or_create_future(StageId::BASE);

        let report = FatalReport::new(CellPos::ORIGIN, StageId::new(1), "missing neighbor")
            .with_chain([&entry]);
        let text = report.render();

        assert!(text.starts_with("missing neighbor at [0, 0] stage #1"));
        assert!(text.contains("[1, 1] level=7"));
        assert!(text.contains("#0=pending #1=empty #2=empty"));
    }
}
