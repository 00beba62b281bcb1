//! Per-cell ticket sets with expiry bookkeeping.

use super::ticket::Ticket;
use crate::coord::CellPos;
use crate::propagation::PropagationGraph;
use std::collections::{BTreeSet, HashMap};

/// Active tickets, keyed by cell.
///
/// The store is a pure source of levels: it never propagates anything
/// itself. Every mutating operation reports the cell's new source level so
/// the owning tracker can feed its propagator.
#[derive(Debug)]
pub struct TicketStore {
    tickets: HashMap<CellPos, BTreeSet<Ticket>>,
    absent_level: u32,
    tick: u64,
}

impl TicketStore {
    pub fn new(absent_level: u32) -> Self {
        Self {
            tickets: HashMap::new(),
            absent_level,
            tick: 0,
        }
    }

    /// Current expiry tick.
    #[inline]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Lowest ticket level at `pos`, or the absent level.
    pub fn level_at(&self, pos: CellPos) -> u32 {
        self.tickets
            .get(&pos)
            .and_then(|set| set.first())
            .map(|t| t.level.min(self.absent_level))
            .unwrap_or(self.absent_level)
    }

    /// Adds (or refreshes) a ticket. Returns the new source level when the
    /// ticket lowered it.
    pub fn add(&mut self, pos: CellPos, mut ticket: Ticket) -> Option<u32> {
        let old = self.level_at(pos);
        ticket.created_at = self.tick;
        let level = ticket.level;
        self.tickets.entry(pos).or_default().replace(ticket);
        (level < old).then_some(level)
    }

    /// Removes a ticket. Returns the new source level when one was removed.
    pub fn remove(&mut self, pos: CellPos, ticket: &Ticket) -> Option<u32> {
        let set = self.tickets.get_mut(&pos)?;
        if !set.remove(ticket) {
            return None;
        }
        if set.is_empty() {
            self.tickets.remove(&pos);
        }
        Some(self.level_at(pos))
    }

    /// Advances the tick counter and drops every expired ticket. Returns the
    /// cells that lost tickets together with their new source level.
    pub fn purge_expired(&mut self) -> Vec<(CellPos, u32)> {
        self.tick += 1;
        let now = self.tick;

        let mut changed = Vec::new();
        self.tickets.retain(|pos, set| {
            let before = set.len();
            set.retain(|t| !t.timed_out(now));
            if set.len() != before {
                changed.push(*pos);
            }
            !set.is_empty()
        });

        changed.sort();
        changed
            .into_iter()
            .map(|pos| (pos, self.level_at(pos)))
            .collect()
    }

    pub fn tickets_at(&self, pos: CellPos) -> impl Iterator<Item = &Ticket> {
        self.tickets.get(&pos).into_iter().flatten()
    }

    /// Whether any ticket at `pos` carries the force flag.
    pub fn has_forced(&self, pos: CellPos) -> bool {
        self.tickets_at(pos).any(|t| t.force_ticks)
    }

    /// All cells with tickets, sorted for stable output.
    pub fn cells(&self) -> Vec<CellPos> {
        let mut cells: Vec<_> = self.tickets.keys().copied().collect();
        cells.sort();
        cells
    }

    pub fn len(&self) -> usize {
        self.tickets.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

impl PropagationGraph for TicketStore {
    fn source_level(&self, pos: CellPos) -> u32 {
        self.level_at(pos)
    }
}
