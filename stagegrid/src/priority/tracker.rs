//! Ticket-driven level trackers.
//!
//! [`PriorityTracker`] owns the ticket store and the cell-level propagator.
//! Region tickets are mirrored into a [`RegionTracker`], a second
//! propagator instance over its own tickets that answers ticking
//! eligibility.

use super::store::TicketStore;
use super::ticket::{Ticket, TicketKey, TicketType};
use crate::coord::CellPos;
use crate::propagation::{LevelChange, LevelPropagator};
use tracing::{trace, warn};

// =============================================================================
// Region Tracker
// =============================================================================

/// Tracks region tickets to decide which cells are actively ticking.
#[derive(Debug)]
pub struct RegionTracker {
    tickets: TicketStore,
    levels: LevelPropagator,
    full_level: u32,
}

impl RegionTracker {
    pub fn new(full_level: u32) -> Self {
        Self {
            tickets: TicketStore::new(full_level),
            levels: LevelPropagator::new(full_level + 1),
            full_level,
        }
    }

    fn add(&mut self, pos: CellPos, ticket: Ticket) {
        if let Some(level) = self.tickets.add(pos, ticket) {
            self.levels.update(&self.tickets, pos, level, true);
        }
    }

    fn remove(&mut self, pos: CellPos, ticket: &Ticket) {
        if let Some(level) = self.tickets.remove(pos, ticket) {
            self.levels.update(&self.tickets, pos, level, false);
        }
    }

    fn purge_expired(&mut self) {
        for (pos, level) in self.tickets.purge_expired() {
            self.levels.update(&self.tickets, pos, level, false);
        }
    }

    fn run_updates(&mut self, budget: usize) -> usize {
        let remaining = self.levels.run_updates(&self.tickets, budget);
        // ticking state is queried, not pushed
        self.levels.drain_changes();
        remaining
    }

    /// Region level of `pos`; `full_level` when out of every region.
    pub fn level(&self, pos: CellPos) -> u32 {
        self.levels.level(pos)
    }

    /// Whether `pos` lies inside some region.
    pub fn is_ticking(&self, pos: CellPos) -> bool {
        self.level(pos) < self.full_level
    }

    /// Whether a region ticket at `pos` forces ticking.
    pub fn is_forced(&self, pos: CellPos) -> bool {
        self.tickets.has_forced(pos)
    }

    pub fn has_pending_updates(&self) -> bool {
        self.levels.has_pending_updates()
    }
}

// =============================================================================
// Priority Tracker
// =============================================================================

/// Cell priority levels derived from tickets.
#[derive(Debug)]
pub struct PriorityTracker {
    tickets: TicketStore,
    levels: LevelPropagator,
    region: RegionTracker,
    full_level: u32,
}

impl PriorityTracker {
    /// Creates a tracker. Levels at or above `absent_level` mean "not
    /// required"; region tickets are placed relative to `full_level`.
    pub fn new(full_level: u32, absent_level: u32) -> Self {
        Self {
            tickets: TicketStore::new(absent_level),
            levels: LevelPropagator::new(absent_level + 1),
            region: RegionTracker::new(full_level),
            full_level,
        }
    }

    #[inline]
    pub fn absent_level(&self) -> u32 {
        self.levels.absent_level()
    }

    /// Current propagated level of `pos`.
    #[inline]
    pub fn level(&self, pos: CellPos) -> u32 {
        self.levels.level(pos)
    }

    pub fn tickets(&self) -> &TicketStore {
        &self.tickets
    }

    pub fn region(&self) -> &RegionTracker {
        &self.region
    }

    pub fn add_ticket(
        &mut self,
        ticket_type: TicketType,
        pos: CellPos,
        level: u32,
        key: impl Into<TicketKey>,
    ) {
        self.add(pos, Ticket::new(ticket_type, level, key));
    }

    pub fn remove_ticket(
        &mut self,
        ticket_type: TicketType,
        pos: CellPos,
        level: u32,
        key: impl Into<TicketKey>,
    ) {
        self.remove(pos, &Ticket::new(ticket_type, level, key));
    }

    /// Adds a ticket whose level keeps every cell within `radius` fully
    /// allowed, and registers it with the region tracker.
    pub fn add_region_ticket(
        &mut self,
        ticket_type: TicketType,
        pos: CellPos,
        radius: u32,
        key: impl Into<TicketKey>,
        force: bool,
    ) {
        let ticket =
            Ticket::new(ticket_type, self.region_level(radius), key).with_force_ticks(force);
        self.add(pos, ticket.clone());
        self.region.add(pos, ticket);
    }

    pub fn remove_region_ticket(
        &mut self,
        ticket_type: TicketType,
        pos: CellPos,
        radius: u32,
        key: impl Into<TicketKey>,
    ) {
        let ticket = Ticket::new(ticket_type, self.region_level(radius), key);
        self.remove(pos, &ticket);
        self.region.remove(pos, &ticket);
    }

    fn region_level(&self, radius: u32) -> u32 {
        if radius > self.full_level {
            warn!(
                radius,
                full_level = self.full_level,
                "Region radius exceeds full level, clamping"
            );
        }
        self.full_level.saturating_sub(radius)
    }

    fn add(&mut self, pos: CellPos, ticket: Ticket) {
        trace!(pos = %pos, ticket = %ticket, "Adding ticket");
        if let Some(level) = self.tickets.add(pos, ticket) {
            self.levels.update(&self.tickets, pos, level, true);
        }
    }

    fn remove(&mut self, pos: CellPos, ticket: &Ticket) {
        trace!(pos = %pos, ticket = %ticket, "Removing ticket");
        if let Some(level) = self.tickets.remove(pos, ticket) {
            self.levels.update(&self.tickets, pos, level, false);
        }
    }

    /// Advances the expiry tick and drops expired tickets. Returns the
    /// number of cells whose source level changed.
    pub fn purge_expired(&mut self) -> usize {
        let changed = self.tickets.purge_expired();
        for &(pos, level) in &changed {
            self.levels.update(&self.tickets, pos, level, false);
        }
        self.region.purge_expired();
        changed.len()
    }

    /// Runs queued propagation on both trackers. Returns the unused budget
    /// of the cell-level tracker.
    pub fn run_updates(&mut self, budget: usize) -> usize {
        self.region.run_updates(budget);
        self.levels.run_updates(&self.tickets, budget)
    }

    pub fn has_pending_updates(&self) -> bool {
        self.levels.has_pending_updates() || self.region.has_pending_updates()
    }

    /// Net cell-level changes since the previous drain.
    pub fn drain_level_changes(&mut self) -> Vec<LevelChange> {
        self.levels.drain_changes()
    }

    pub fn tracked_count(&self) -> usize {
        self.levels.tracked_count()
    }
}
