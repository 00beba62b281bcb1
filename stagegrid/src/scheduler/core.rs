//! Scheduler driver - main struct and run loop.
//!
//! This module contains [`StageScheduler`], the single task that owns the
//! priority tracker and the lifecycle store. Everything that mutates them
//! happens here, in the order messages arrive:
//! - commands from [`SchedulerHandle`]s
//! - notifications from step jobs, waiters and processors
//! - expiry ticks

use super::commands::{Command, Internal};
use super::config::SchedulerConfig;
use super::handle::{RegionStatus, SchedulerHandle, TicketRow};
use super::steps::{StepRunner, StepServices, SECONDARY};
use crate::content;
use crate::coord::CellPos;
use crate::error::{FatalReport, SchedulerError};
use crate::generation::{Advance, GenerationTask};
use crate::lifecycle::{CellEntry, CellStore, StageFuture};
use crate::mailbox::Mailbox;
use crate::priority::{PriorityTracker, TicketType};
use crate::propagation::LevelChange;
use crate::secondary::{NullSecondaryPipeline, SecondaryPipeline};
use crate::sorter::{ProcessorSpec, TaskSorter};
use crate::stage::{StageId, StageLevels, StagePipeline};
use crate::storage::{CellStorage, MemoryStorage};
use crate::telemetry::{EventSink, NullEventSink, SchedulerEvent};
use crate::transform::{IdentityTransform, StageTransform};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Number of loop iterations between yield points (scheduler fairness).
pub(crate) const YIELD_EVERY_N_ITERATIONS: u64 = 50;

// =============================================================================
// Services
// =============================================================================

/// External collaborators of the scheduler.
#[derive(Clone)]
pub struct SchedulerServices {
    pub storage: Arc<dyn CellStorage>,
    pub transform: Arc<dyn StageTransform>,
    pub secondary: Arc<dyn SecondaryPipeline>,
    pub events: Arc<dyn EventSink>,
}

impl SchedulerServices {
    /// Services with no secondary pipeline and no event sink.
    pub fn new(storage: Arc<dyn CellStorage>, transform: Arc<dyn StageTransform>) -> Self {
        Self {
            storage,
            transform,
            secondary: Arc::new(NullSecondaryPipeline),
            events: Arc::new(NullEventSink),
        }
    }

    pub fn with_secondary(mut self, secondary: Arc<dyn SecondaryPipeline>) -> Self {
        self.secondary = secondary;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }
}

impl Default for SchedulerServices {
    /// In-memory storage with the identity transform.
    fn default() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), Arc::new(IdentityTransform))
    }
}

// =============================================================================
// Stage Scheduler
// =============================================================================

/// Drives cells through the stage pipeline.
///
/// The scheduler:
/// - Turns ticket changes into cell levels and stage ceilings
/// - Creates, cancels and resumes generation tasks
/// - Saves and drops cells whose level became absent
/// - Flushes every cell to storage on shutdown
pub struct StageScheduler {
    config: SchedulerConfig,
    pipeline: Arc<StagePipeline>,
    levels: StageLevels,
    tracker: PriorityTracker,
    store: CellStore,
    steps: StepRunner,
    sorter: TaskSorter,
    processors: Vec<Mailbox<()>>,
    storage: Arc<dyn CellStorage>,
    secondary: Arc<dyn SecondaryPipeline>,
    events: Arc<dyn EventSink>,
    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    /// Tasks to advance before the next message.
    ready: VecDeque<Arc<GenerationTask>>,
    /// Cells whose unload callback is queued on the secondary processor.
    unloading: HashSet<CellPos>,
    /// Request tickets kept alive until their future settles.
    held_requests: Vec<HeldRequest>,
    pending_saves: usize,
    fatal: Option<Arc<FatalReport>>,
    loop_count: u64,
}

impl StageScheduler {
    /// Creates a scheduler and its handle.
    ///
    /// Spawns the sorter and processor mailboxes, so it must be called from
    /// within a tokio runtime. Nothing else happens until [`run`](Self::run).
    pub fn new(
        config: SchedulerConfig,
        pipeline: StagePipeline,
        services: SchedulerServices,
    ) -> (Self, SchedulerHandle) {
        let pipeline = Arc::new(pipeline);
        let levels = StageLevels::new(&pipeline, config.full_level);
        let absent = levels.absent_level();

        let (worldgen, _) = Mailbox::spawn("worldgen", (), 1);
        let (secondary, _) = Mailbox::spawn("secondary", (), 1);
        let (sorter, _) = TaskSorter::spawn(
            vec![
                ProcessorSpec::new(Arc::new(worldgen.clone()), config.max_in_flight),
                ProcessorSpec::new(Arc::new(secondary.clone()), config.secondary_max_in_flight),
            ],
            absent as usize + 1,
        );

        let (command_tx, command_rx) = mpsc::channel(config.command_channel_capacity);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let store = CellStore::new(pipeline.len(), absent);
        let steps = StepRunner::new(
            Arc::clone(&pipeline),
            StepServices {
                storage: Arc::clone(&services.storage),
                transform: Arc::clone(&services.transform),
                secondary: Arc::clone(&services.secondary),
                events: Arc::clone(&services.events),
                sorter: sorter.clone(),
                internal: internal_tx.clone(),
                stage_count: pipeline.len(),
            },
        );

        let handle = SchedulerHandle::new(
            command_tx,
            sorter.clone(),
            store.visible(),
            Arc::clone(&pipeline),
            levels.clone(),
        );

        let scheduler = Self {
            tracker: PriorityTracker::new(levels.full_level(), absent),
            config,
            pipeline,
            levels,
            store,
            steps,
            sorter,
            processors: vec![worldgen, secondary],
            storage: services.storage,
            secondary: services.secondary,
            events: services.events,
            commands: command_rx,
            internal_tx,
            internal_rx,
            ready: VecDeque::new(),
            unloading: HashSet::new(),
            held_requests: Vec::new(),
            pending_saves: 0,
            fatal: None,
            loop_count: 0,
        };
        (scheduler, handle)
    }

    /// Runs the driver until shutdown is signalled or every handle is
    /// dropped, then saves all cells.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Fatal`] when a stage transform failed or a
    /// scheduling invariant was violated. Nothing is saved in that case.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), SchedulerError> {
        info!(
            stages = self.pipeline.len(),
            full_level = self.levels.full_level(),
            absent_level = self.levels.absent_level(),
            max_in_flight = self.config.max_in_flight,
            storage = self.storage.name(),
            "Stage scheduler started"
        );

        let mut ticker = self.config.tick_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                Some(internal) = self.internal_rx.recv() => {
                    self.handle_internal(internal);
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                _ = next_tick(&mut ticker) => self.tick(),
            }

            self.process();
            if let Some(report) = self.fatal.take() {
                return Err(self.fail(report));
            }
            self.maybe_yield().await;
        }

        self.shutdown().await;
        match self.fatal.take() {
            Some(report) => Err(self.fail(report)),
            None => Ok(()),
        }
    }

    /// Yields periodically for scheduler fairness.
    async fn maybe_yield(&mut self) {
        self.loop_count += 1;
        if self.loop_count.is_multiple_of(YIELD_EVERY_N_ITERATIONS) {
            tokio::task::yield_now().await;
        }
    }

    /// Work that follows every message: propagation, ready tasks, unloads.
    fn process(&mut self) {
        self.run_all_updates();
        self.drive_ready_tasks();
        self.process_unloads();
    }

    // -------------------------------------------------------------------------
    // Messages
    // -------------------------------------------------------------------------

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::AddTicket {
                ticket_type,
                pos,
                level,
                key,
            } => {
                self.tracker.add_ticket(ticket_type, pos, level, key);
                self.ticket_event(true, ticket_type, pos, level);
            }
            Command::RemoveTicket {
                ticket_type,
                pos,
                level,
                key,
            } => {
                self.tracker.remove_ticket(ticket_type, pos, level, key);
                self.ticket_event(false, ticket_type, pos, level);
            }
            Command::AddRegionTicket {
                ticket_type,
                pos,
                radius,
                key,
                force,
            } => {
                self.tracker
                    .add_region_ticket(ticket_type, pos, radius, key, force);
                let level = self.levels.full_level().saturating_sub(radius);
                self.ticket_event(true, ticket_type, pos, level);
            }
            Command::RemoveRegionTicket {
                ticket_type,
                pos,
                radius,
                key,
            } => {
                self.tracker
                    .remove_region_ticket(ticket_type, pos, radius, key);
                let level = self.levels.full_level().saturating_sub(radius);
                self.ticket_event(false, ticket_type, pos, level);
            }
            Command::RequestStage {
                pos,
                stage,
                load,
                reply,
            } => {
                let future = self.request_stage(pos, stage, load);
                let _ = reply.send(future);
            }
            Command::Tick => self.tick(),
            Command::DumpTickets { reply } => {
                self.run_all_updates();
                let _ = reply.send(self.dump_tickets());
            }
            Command::CellLevel { pos, reply } => {
                self.run_all_updates();
                let _ = reply.send(self.tracker.level(pos));
            }
            Command::RegionStatus { pos, reply } => {
                self.run_all_updates();
                let region = self.tracker.region();
                let _ = reply.send(RegionStatus {
                    level: region.level(pos),
                    ticking: region.is_ticking(pos),
                    forced: region.is_forced(pos),
                });
            }
            Command::Sync { reply } => {
                self.process();
                let _ = reply.send(());
            }
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::ResumeTask(task) => self.ready.push_back(task),
            Internal::StepFinished(pos) => trace!(pos = %pos, "Step finished"),
            Internal::Fatal(report) => self.raise(report),
            Internal::UnloadSynced(pos) => self.on_unload_synced(pos),
            Internal::SaveCompleted { entry, unload } => self.on_save_completed(entry, unload),
        }
    }

    fn ticket_event(&self, added: bool, ticket_type: TicketType, pos: CellPos, level: u32) {
        let ticket_type = ticket_type.name();
        self.events.emit(if added {
            SchedulerEvent::TicketAdded {
                pos,
                ticket_type,
                level,
            }
        } else {
            SchedulerEvent::TicketRemoved {
                pos,
                ticket_type,
                level,
            }
        });
    }

    /// Refreshes request tickets whose future is still unresolved, then
    /// purges expired tickets. A settled request's ticket starts its timeout
    /// from its last refresh.
    fn tick(&mut self) {
        self.held_requests.retain(|held| !held.future.is_done());
        for held in &self.held_requests {
            self.tracker
                .add_ticket(TicketType::REQUEST, held.pos, held.level, held.pos);
        }

        let cells = self.tracker.purge_expired();
        if cells > 0 {
            debug!(cells, "Expired tickets purged");
            self.events.emit(SchedulerEvent::TicketsExpired { cells });
        }
    }

    fn dump_tickets(&self) -> Vec<TicketRow> {
        let tickets = self.tracker.tickets();
        let absent = self.levels.absent_level();
        let mut rows = Vec::with_capacity(tickets.len());
        for pos in tickets.cells() {
            let queue_level = self
                .store
                .get(pos)
                .or_else(|| self.store.pending_unload(pos))
                .map_or(absent, |entry| entry.queue_level().get());
            for ticket in tickets.tickets_at(pos) {
                rows.push(TicketRow {
                    pos,
                    ticket_type: ticket.ticket_type.name(),
                    level: ticket.level,
                    queue_level,
                });
            }
        }
        rows
    }

    // -------------------------------------------------------------------------
    // Levels
    // -------------------------------------------------------------------------

    /// Runs propagation to completion and applies the resulting changes.
    fn run_all_updates(&mut self) {
        while self.tracker.has_pending_updates() {
            self.tracker.run_updates(self.config.update_budget);
        }
        for change in self.tracker.drain_level_changes() {
            self.apply_level_change(change);
        }
    }

    fn apply_level_change(&mut self, change: LevelChange) {
        let LevelChange { pos, old, new } = change;
        self.events
            .emit(SchedulerEvent::LevelChanged { pos, old, new });

        let entry = if self.levels.is_loaded(new) {
            if self.unloading.remove(&pos) {
                debug!(pos = %pos, "Cell revived during unload");
            }
            self.store.get_or_create(pos, new)
        } else {
            match self.store.get(pos) {
                Some(entry) => Arc::clone(entry),
                None => return,
            }
        };

        entry.set_ticket_level(new);
        self.update_futures(&entry);
        if !self.levels.is_loaded(new) {
            self.store.begin_unload(pos);
            debug!(pos = %pos, persisted = ?entry.persisted_stage(), "Cell unloading");
        }
        self.sorter
            .on_level_change(pos, Arc::clone(entry.queue_level()), new);
    }

    /// Applies the ceiling of the entry's level. On a downgrade, a task aiming
    /// above the new ceiling is cancelled and replaced by one toward the
    /// highest stage still requested.
    fn update_futures(&mut self, entry: &Arc<CellEntry>) {
        let ceiling = self.levels.ceiling_for_level(entry.ticket_level());
        if !entry.update_highest_allowed(ceiling) {
            return;
        }
        let Some(task) = entry.task() else {
            return;
        };
        if ceiling.is_some_and(|c| task.target() <= c) {
            return;
        }

        debug!(pos = %entry.pos(), target = %task.target(), ceiling = ?ceiling, "Ceiling dropped below task target");
        task.cancel();
        self.ready.push_back(task);
        if let Some(stage) = entry.highest_pending_stage(ceiling) {
            self.schedule(entry, stage);
        }
    }

    // -------------------------------------------------------------------------
    // Tasks
    // -------------------------------------------------------------------------

    fn request_stage(&mut self, pos: CellPos, stage: StageId, load: bool) -> StageFuture {
        let level = self.levels.level_for_stage(stage);
        if load {
            self.tracker.add_ticket(TicketType::REQUEST, pos, level, pos);
            self.ticket_event(true, TicketType::REQUEST, pos, level);
            self.run_all_updates();
        }

        let Some(entry) = self.store.get(pos).cloned() else {
            return StageFuture::unloaded();
        };
        let future = entry.get_or_create_future(stage);
        if !future.is_done() {
            self.schedule(&entry, stage);
            if load && !self.held_requests.iter().any(|held| held.holds(pos, level, &future)) {
                self.held_requests.push(HeldRequest {
                    pos,
                    level,
                    future: future.clone(),
                });
            }
        }
        future
    }

    /// Makes sure a live task aims at `target` or beyond.
    fn schedule(&mut self, entry: &Arc<CellEntry>, target: StageId) {
        if let Some(existing) = entry.task() {
            if !existing.is_cancelled() && existing.target() >= target {
                return;
            }
            existing.cancel();
            self.ready.push_back(existing);
        }

        match GenerationTask::create(&self.store, entry, target, &self.pipeline) {
            Ok(task) => {
                entry.replace_task(Arc::clone(&task));
                self.ready.push_back(task);
            }
            Err(SchedulerError::Fatal(report)) => self.raise(report),
            Err(e) => warn!(pos = %entry.pos(), target = %target, error = %e, "Task not created"),
        }
    }

    fn drive_ready_tasks(&mut self) {
        while let Some(task) = self.ready.pop_front() {
            self.advance_task(task);
            if self.fatal.is_some() {
                self.ready.clear();
                break;
            }
        }
    }

    fn advance_task(&mut self, task: Arc<GenerationTask>) {
        if task.is_finished() {
            return;
        }
        match task.advance(&self.steps) {
            Ok(Advance::Suspended(future)) => {
                let internal = self.internal_tx.clone();
                tokio::spawn(async move {
                    future.wait().await;
                    let _ = internal.send(Internal::ResumeTask(task));
                });
            }
            Ok(Advance::Finished { reached: true }) => {}
            Ok(Advance::Finished { reached: false }) => {
                self.events.emit(SchedulerEvent::TaskCancelled {
                    pos: task.pos(),
                    target: task.target(),
                });
            }
            Err(SchedulerError::Fatal(report)) => self.raise(report),
            Err(e) => warn!(pos = %task.pos(), error = %e, "Task advance failed"),
        }
    }

    // -------------------------------------------------------------------------
    // Unloading and saving
    // -------------------------------------------------------------------------

    /// Queues the secondary unload callback for every idle unloading cell.
    fn process_unloads(&mut self) {
        let idle: Vec<Arc<CellEntry>> = self
            .store
            .pending_unloads()
            .filter(|entry| entry.is_quiescent() && !self.unloading.contains(&entry.pos()))
            .cloned()
            .collect();

        for entry in idle {
            let pos = entry.pos();
            self.unloading.insert(pos);
            let secondary = Arc::clone(&self.secondary);
            let internal = self.internal_tx.clone();
            self.sorter.submit(
                SECONDARY,
                pos,
                Arc::clone(entry.queue_level()),
                Box::new(move || {
                    secondary.on_cell_unloading(pos);
                    let _ = internal.send(Internal::UnloadSynced(pos));
                }),
                true,
            );
        }
    }

    fn on_unload_synced(&mut self, pos: CellPos) {
        self.sorter.release(SECONDARY, pos, true);
        if !self.unloading.remove(&pos) {
            return;
        }
        let Some(entry) = self.store.pending_unload(pos).cloned() else {
            return;
        };
        if entry.is_quiescent() {
            self.spawn_save(entry, true);
        }
    }

    fn spawn_save(&mut self, entry: Arc<CellEntry>, unload: bool) {
        let pos = entry.pos();
        let Some(latest) = entry.latest_content() else {
            if unload {
                self.finish_unload(&entry);
            }
            return;
        };

        let stage = latest.stage();
        let data = match content::encode(&latest) {
            Ok(data) => data,
            Err(e) => {
                warn!(pos = %pos, stage = %stage, error = %e, "Cell not encodable, skipping save");
                self.events.emit(SchedulerEvent::StorageWriteFailed {
                    pos,
                    error: e.to_string(),
                });
                if unload {
                    self.finish_unload(&entry);
                }
                return;
            }
        };
        let storage = Arc::clone(&self.storage);
        let events = Arc::clone(&self.events);
        let internal = self.internal_tx.clone();
        self.pending_saves += 1;

        tokio::spawn(async move {
            match storage.save(pos, data).await {
                Ok(()) => events.emit(SchedulerEvent::CellSaved { pos, stage }),
                Err(e) => {
                    warn!(pos = %pos, error = %e, "Cell save failed");
                    events.emit(SchedulerEvent::StorageWriteFailed {
                        pos,
                        error: e.to_string(),
                    });
                }
            }
            let _ = internal.send(Internal::SaveCompleted { entry, unload });
        });
    }

    fn on_save_completed(&mut self, entry: Arc<CellEntry>, unload: bool) {
        self.pending_saves = self.pending_saves.saturating_sub(1);
        if unload {
            self.finish_unload(&entry);
        }
    }

    /// Drops `entry` unless it was revived while saving.
    fn finish_unload(&mut self, entry: &Arc<CellEntry>) {
        if self.store.finish_unload(entry) {
            debug!(pos = %entry.pos(), "Cell unloaded");
            self.events
                .emit(SchedulerEvent::CellUnloaded { pos: entry.pos() });
        }
    }

    // -------------------------------------------------------------------------
    // Shutdown and failure
    // -------------------------------------------------------------------------

    fn all_entries(&self) -> Vec<Arc<CellEntry>> {
        self.store
            .entries()
            .chain(self.store.pending_unloads())
            .cloned()
            .collect()
    }

    /// Pumps internal notifications until `done` holds.
    async fn drive_until(&mut self, done: impl Fn(&Self) -> bool) {
        while !done(self) {
            let Some(internal) = self.internal_rx.recv().await else {
                break;
            };
            self.handle_internal(internal);
            self.drive_ready_tasks();
        }
    }

    async fn shutdown(&mut self) {
        info!(cells = self.store.len(), "Stage scheduler shutting down");

        for entry in self.all_entries() {
            if let Some(task) = entry.task() {
                task.cancel();
                self.ready.push_back(task);
            }
        }
        self.drive_ready_tasks();
        self.drive_until(|s| s.all_entries().iter().all(|e| e.running_steps() == 0))
            .await;

        let entries = self.all_entries();
        let saved = entries.len();
        for entry in entries {
            self.spawn_save(entry, false);
        }
        self.drive_until(|s| s.pending_saves == 0).await;

        self.close_mailboxes();
        info!(saved, "Stage scheduler stopped");
    }

    fn raise(&mut self, report: Arc<FatalReport>) {
        error!(pos = %report.pos, stage = %report.stage, "{}", report.render());
        self.events.emit(SchedulerEvent::Fatal {
            report: Arc::clone(&report),
        });
        if self.fatal.is_none() {
            self.fatal = Some(report);
        }
    }

    fn fail(&mut self, report: Arc<FatalReport>) -> SchedulerError {
        self.close_mailboxes();
        SchedulerError::Fatal(report)
    }

    fn close_mailboxes(&self) {
        self.sorter.close();
        for processor in &self.processors {
            processor.close();
        }
    }
}

/// A request ticket and the future it waits for.
struct HeldRequest {
    pos: CellPos,
    level: u32,
    future: StageFuture,
}

impl HeldRequest {
    fn holds(&self, pos: CellPos, level: u32, future: &StageFuture) -> bool {
        self.pos == pos && self.level == level && StageFuture::ptr_eq(&self.future, future)
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for StageScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageScheduler")
            .field("cells", &self.store.len())
            .field("ready", &self.ready.len())
            .field("held_requests", &self.held_requests.len())
            .field("pending_saves", &self.pending_saves)
            .field("loop_count", &self.loop_count)
            .finish_non_exhaustive()
    }
}
