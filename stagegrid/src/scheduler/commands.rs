//! Messages consumed by the scheduler driver.

use super::handle::{RegionStatus, TicketRow};
use crate::coord::CellPos;
use crate::error::FatalReport;
use crate::generation::GenerationTask;
use crate::lifecycle::{CellEntry, StageFuture};
use crate::priority::{TicketKey, TicketType};
use crate::stage::StageId;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Requests from [`SchedulerHandle`](super::SchedulerHandle), processed
/// strictly in order.
#[derive(Debug)]
pub(crate) enum Command {
    AddTicket {
        ticket_type: TicketType,
        pos: CellPos,
        level: u32,
        key: TicketKey,
    },
    RemoveTicket {
        ticket_type: TicketType,
        pos: CellPos,
        level: u32,
        key: TicketKey,
    },
    AddRegionTicket {
        ticket_type: TicketType,
        pos: CellPos,
        radius: u32,
        key: TicketKey,
        force: bool,
    },
    RemoveRegionTicket {
        ticket_type: TicketType,
        pos: CellPos,
        radius: u32,
        key: TicketKey,
    },
    RequestStage {
        pos: CellPos,
        stage: StageId,
        load: bool,
        reply: oneshot::Sender<StageFuture>,
    },
    Tick,
    DumpTickets {
        reply: oneshot::Sender<Vec<TicketRow>>,
    },
    CellLevel {
        pos: CellPos,
        reply: oneshot::Sender<u32>,
    },
    RegionStatus {
        pos: CellPos,
        reply: oneshot::Sender<RegionStatus>,
    },
    /// Replies once every earlier command has been fully applied.
    Sync { reply: oneshot::Sender<()> },
}

/// Notifications from worker tasks and processors back to the driver.
pub(crate) enum Internal {
    /// A future the task was suspended on resolved.
    ResumeTask(Arc<GenerationTask>),
    /// A step job ended; running-step counts changed.
    StepFinished(CellPos),
    Fatal(Arc<FatalReport>),
    /// The secondary pipeline finished its unload callback for the cell.
    UnloadSynced(CellPos),
    SaveCompleted { entry: Arc<CellEntry>, unload: bool },
}
