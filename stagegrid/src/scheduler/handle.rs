//! Public interface to a running scheduler.
//!
//! This module contains [`SchedulerHandle`]. Every mutating call is a
//! message to the driver; read-only cell inspection goes straight to the
//! shared map of live entries.

use super::commands::Command;
use crate::coord::CellPos;
use crate::error::SchedulerError;
use crate::lifecycle::{CellEntry, StageFuture, VisibleCells};
use crate::priority::{TicketKey, TicketType};
use crate::sorter::TaskSorter;
use crate::stage::{StageId, StageLevels, StagePipeline};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

// =============================================================================
// Debug rows
// =============================================================================

/// One ticket as reported by [`SchedulerHandle::dump_tickets`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRow {
    pub pos: CellPos,
    pub ticket_type: &'static str,
    pub level: u32,
    /// Level the sorter files the cell's work under.
    pub queue_level: u32,
}

impl fmt::Display for TicketRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.pos.x, self.pos.z, self.ticket_type, self.level, self.queue_level
        )
    }
}

/// Region tracker view of one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionStatus {
    pub level: u32,
    pub ticking: bool,
    pub forced: bool,
}

// =============================================================================
// Scheduler Handle
// =============================================================================

/// Handle for talking to the scheduler driver.
///
/// Cloneable and shareable across tasks. Calls fail with
/// [`SchedulerError::Closed`] once the driver has stopped.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<Command>,
    sorter: TaskSorter,
    visible: VisibleCells,
    pipeline: Arc<StagePipeline>,
    levels: StageLevels,
}

impl SchedulerHandle {
    pub(crate) fn new(
        sender: mpsc::Sender<Command>,
        sorter: TaskSorter,
        visible: VisibleCells,
        pipeline: Arc<StagePipeline>,
        levels: StageLevels,
    ) -> Self {
        Self {
            sender,
            sorter,
            visible,
            pipeline,
            levels,
        }
    }

    pub fn pipeline(&self) -> &Arc<StagePipeline> {
        &self.pipeline
    }

    pub fn levels(&self) -> &StageLevels {
        &self.levels
    }

    async fn send(&self, command: Command) -> Result<(), SchedulerError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| SchedulerError::Closed)
    }

    async fn ask<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, SchedulerError> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply)).await?;
        response.await.map_err(|_| SchedulerError::Closed)
    }

    fn check_stage(&self, stage: StageId) -> Result<(), SchedulerError> {
        if self.pipeline.contains(stage) {
            Ok(())
        } else {
            Err(SchedulerError::UnknownStage(stage))
        }
    }

    // -------------------------------------------------------------------------
    // Tickets
    // -------------------------------------------------------------------------

    pub async fn add_ticket(
        &self,
        ticket_type: TicketType,
        pos: CellPos,
        level: u32,
        key: impl Into<TicketKey>,
    ) -> Result<(), SchedulerError> {
        self.send(Command::AddTicket {
            ticket_type,
            pos,
            level,
            key: key.into(),
        })
        .await
    }

    pub async fn remove_ticket(
        &self,
        ticket_type: TicketType,
        pos: CellPos,
        level: u32,
        key: impl Into<TicketKey>,
    ) -> Result<(), SchedulerError> {
        self.send(Command::RemoveTicket {
            ticket_type,
            pos,
            level,
            key: key.into(),
        })
        .await
    }

    /// Adds a ticket keeping every cell within `radius` of `pos` fully
    /// allowed, and registers it with the region tracker.
    pub async fn add_region_ticket(
        &self,
        ticket_type: TicketType,
        pos: CellPos,
        radius: u32,
        key: impl Into<TicketKey>,
        force: bool,
    ) -> Result<(), SchedulerError> {
        self.send(Command::AddRegionTicket {
            ticket_type,
            pos,
            radius,
            key: key.into(),
            force,
        })
        .await
    }

    pub async fn remove_region_ticket(
        &self,
        ticket_type: TicketType,
        pos: CellPos,
        radius: u32,
        key: impl Into<TicketKey>,
    ) -> Result<(), SchedulerError> {
        self.send(Command::RemoveRegionTicket {
            ticket_type,
            pos,
            radius,
            key: key.into(),
        })
        .await
    }

    /// Runs one ticket expiry sweep.
    pub async fn tick(&self) -> Result<(), SchedulerError> {
        self.send(Command::Tick).await
    }

    // -------------------------------------------------------------------------
    // Stages
    // -------------------------------------------------------------------------

    /// Future for `stage` at `pos`, scheduling work toward it if needed.
    ///
    /// With `load`, a short-lived request ticket is added first so the
    /// stage is allowed. Without it, a cell that is not live (or whose
    /// priority does not allow `stage`) resolves to unloaded.
    pub async fn request_stage(
        &self,
        pos: CellPos,
        stage: StageId,
        load: bool,
    ) -> Result<StageFuture, SchedulerError> {
        self.check_stage(stage)?;
        self.ask(|reply| Command::RequestStage {
            pos,
            stage,
            load,
            reply,
        })
        .await
    }

    /// Live entry for `pos`, if any.
    pub fn cell(&self, pos: CellPos) -> Option<Arc<CellEntry>> {
        self.visible.get(&pos).map(|e| Arc::clone(e.value()))
    }

    /// Existing future for `stage` at `pos`, without scheduling anything.
    pub fn stage_future(&self, pos: CellPos, stage: StageId) -> Option<StageFuture> {
        self.cell(pos).and_then(|entry| entry.future(stage))
    }

    pub fn live_cells(&self) -> usize {
        self.visible.len()
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Propagated ticket level of `pos`.
    pub async fn cell_level(&self, pos: CellPos) -> Result<u32, SchedulerError> {
        self.ask(|reply| Command::CellLevel { pos, reply }).await
    }

    pub async fn region_status(&self, pos: CellPos) -> Result<RegionStatus, SchedulerError> {
        self.ask(|reply| Command::RegionStatus { pos, reply }).await
    }

    /// Every ticket with its cell's queue level, sorted by cell.
    pub async fn dump_tickets(&self) -> Result<Vec<TicketRow>, SchedulerError> {
        self.ask(|reply| Command::DumpTickets { reply }).await
    }

    /// Plain-text summary of the sorter queues.
    pub async fn sorter_status(&self) -> String {
        self.sorter.debug_status().await
    }

    /// Waits until every earlier command has been applied, including the
    /// level changes and task scheduling it caused.
    pub async fn sync(&self) -> Result<(), SchedulerError> {
        self.ask(|reply| Command::Sync { reply }).await
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("stages", &self.pipeline.len())
            .field("live_cells", &self.visible.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_row_display() {
        let row = TicketRow {
            pos: CellPos::new(-2, 7),
            ticket_type: "start",
            level: 22,
            queue_level: 23,
        };
        assert_eq!(row.to_string(), "-2\t7\tstart\t22\t23");
    }
}
