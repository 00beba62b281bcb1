//! Scheduler telemetry.
//!
//! The scheduler emits structured [`SchedulerEvent`]s to an [`EventSink`]
//! and never decides how they are presented ("emit, don't present"). The
//! sink is also the error-reporting collaborator: storage failures, corrupt
//! data and fatal reports all go through it.
//!
//! # Example
//!
//! ```ignore
//! use stagegrid::telemetry::{EventSink, SchedulerEvent};
//!
//! struct CountingSink(std::sync::atomic::AtomicUsize);
//!
//! impl EventSink for CountingSink {
//!     fn emit(&self, _event: SchedulerEvent) {
//!         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!     }
//! }
//! ```

use crate::coord::CellPos;
use crate::error::FatalReport;
use crate::stage::StageId;
use std::sync::Arc;

// =============================================================================
// Events
// =============================================================================

/// Events emitted by the scheduler.
#[derive(Clone, Debug)]
pub enum SchedulerEvent {
    // -------------------------------------------------------------------------
    // Priority
    // -------------------------------------------------------------------------
    TicketAdded {
        pos: CellPos,
        ticket_type: &'static str,
        level: u32,
    },

    TicketRemoved {
        pos: CellPos,
        ticket_type: &'static str,
        level: u32,
    },

    /// The expiry sweep changed the source level of `cells` cells.
    TicketsExpired { cells: usize },

    LevelChanged { pos: CellPos, old: u32, new: u32 },

    // -------------------------------------------------------------------------
    // Stages
    // -------------------------------------------------------------------------
    StageCompleted { pos: CellPos, stage: StageId },

    /// The base stage was loaded; `stage` is what storage held, if anything.
    CellLoaded {
        pos: CellPos,
        stage: Option<StageId>,
    },

    /// A generation task gave up on its target.
    TaskCancelled { pos: CellPos, target: StageId },

    // -------------------------------------------------------------------------
    // Storage
    // -------------------------------------------------------------------------
    StorageReadFailed { pos: CellPos, error: String },

    StorageWriteFailed { pos: CellPos, error: String },

    CorruptCellData { pos: CellPos, error: String },

    CellSaved { pos: CellPos, stage: StageId },

    CellUnloaded { pos: CellPos },

    // -------------------------------------------------------------------------
    // Failure
    // -------------------------------------------------------------------------
    Fatal { report: Arc<FatalReport> },
}

impl SchedulerEvent {
    /// Cell the event is about, if any.
    pub fn pos(&self) -> Option<CellPos> {
        match self {
            Self::TicketAdded { pos, .. }
            | Self::TicketRemoved { pos, .. }
            | Self::LevelChanged { pos, .. }
            | Self::StageCompleted { pos, .. }
            | Self::CellLoaded { pos, .. }
            | Self::TaskCancelled { pos, .. }
            | Self::StorageReadFailed { pos, .. }
            | Self::StorageWriteFailed { pos, .. }
            | Self::CorruptCellData { pos, .. }
            | Self::CellSaved { pos, .. }
            | Self::CellUnloaded { pos } => Some(*pos),
            Self::Fatal { report } => Some(report.pos),
            Self::TicketsExpired { .. } => None,
        }
    }

    /// Short name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TicketAdded { .. } => "ticket_added",
            Self::TicketRemoved { .. } => "ticket_removed",
            Self::TicketsExpired { .. } => "tickets_expired",
            Self::LevelChanged { .. } => "level_changed",
            Self::StageCompleted { .. } => "stage_completed",
            Self::CellLoaded { .. } => "cell_loaded",
            Self::TaskCancelled { .. } => "task_cancelled",
            Self::StorageReadFailed { .. } => "storage_read_failed",
            Self::StorageWriteFailed { .. } => "storage_write_failed",
            Self::CorruptCellData { .. } => "corrupt_cell_data",
            Self::CellSaved { .. } => "cell_saved",
            Self::CellUnloaded { .. } => "cell_unloaded",
            Self::Fatal { .. } => "fatal",
        }
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Receiver of scheduler events.
///
/// Called from the driver and from worker tasks, so it must be cheap and
/// must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SchedulerEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: SchedulerEvent) {}
}

/// Sink that logs events with `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: SchedulerEvent) {
        match &event {
            SchedulerEvent::TicketAdded {
                pos,
                ticket_type,
                level,
            } => {
                tracing::trace!(pos = %pos, ticket_type, level, "Ticket added");
            }
            SchedulerEvent::TicketRemoved {
                pos,
                ticket_type,
                level,
            } => {
                tracing::trace!(pos = %pos, ticket_type, level, "Ticket removed");
            }
            SchedulerEvent::TicketsExpired { cells } => {
                tracing::debug!(cells, "Tickets expired");
            }
            SchedulerEvent::LevelChanged { pos, old, new } => {
                tracing::trace!(pos = %pos, old, new, "Level changed");
            }
            SchedulerEvent::StageCompleted { pos, stage } => {
                tracing::trace!(pos = %pos, stage = %stage, "Stage completed");
            }
            SchedulerEvent::CellLoaded { pos, stage } => {
                tracing::debug!(pos = %pos, stage = ?stage, "Cell loaded");
            }
            SchedulerEvent::TaskCancelled { pos, target } => {
                tracing::debug!(pos = %pos, target = %target, "Generation task cancelled");
            }
            SchedulerEvent::StorageReadFailed { pos, error } => {
                tracing::warn!(pos = %pos, error = %error, "Failed to read cell, starting empty");
            }
            SchedulerEvent::StorageWriteFailed { pos, error } => {
                tracing::warn!(pos = %pos, error = %error, "Failed to save cell");
            }
            SchedulerEvent::CorruptCellData { pos, error } => {
                tracing::warn!(pos = %pos, error = %error, "Corrupt cell data, treating as missing");
            }
            SchedulerEvent::CellSaved { pos, stage } => {
                tracing::trace!(pos = %pos, stage = %stage, "Cell saved");
            }
            SchedulerEvent::CellUnloaded { pos } => {
                tracing::trace!(pos = %pos, "Cell unloaded");
            }
            SchedulerEvent::Fatal { report } => {
                tracing::error!(
                    pos = %report.pos,
                    stage = %report.stage,
                    message = %report.message,
                    "Fatal scheduler error\n{}",
                    report.render()
                );
            }
        }
    }
}

/// Sink that forwards events to multiple sinks.
pub struct MultiplexEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl MultiplexEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for MultiplexEventSink {
    fn emit(&self, event: SchedulerEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

impl std::fmt::Debug for MultiplexEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexEventSink")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}
