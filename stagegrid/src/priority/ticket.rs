//! Priority tickets.

use crate::coord::CellPos;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Ticket Type
// =============================================================================

/// Kind of interest a ticket expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketType {
    name: &'static str,
    /// Ticks after creation at which the ticket expires.
    timeout: Option<u64>,
}

impl TicketType {
    /// Permanent ticket keeping the world origin area alive.
    pub const START: TicketType = TicketType::new("start", None);
    /// Short-lived ticket added by a stage request.
    pub const REQUEST: TicketType = TicketType::new("request", Some(1));
    /// Ticket added on behalf of an observer.
    pub const OBSERVER: TicketType = TicketType::new("observer", None);
    /// Ticket pinned by an operator; forces ticking.
    pub const FORCED: TicketType = TicketType::new("forced", None);
    /// Ticket held by the secondary pipeline while it works on a cell.
    pub const LIGHT: TicketType = TicketType::new("light", None);
    /// Ticket kept briefly after a long-distance jump.
    pub const PORTAL: TicketType = TicketType::new("portal", Some(300));

    pub const fn new(name: &'static str, timeout: Option<u64>) -> Self {
        Self { name, timeout }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn timeout(&self) -> Option<u64> {
        self.timeout
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// =============================================================================
// Ticket Key
// =============================================================================

/// Distinguishes tickets of the same type and level at one cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TicketKey {
    Unit,
    Cell(CellPos),
    Id(u64),
    Name(Arc<str>),
}

impl fmt::Display for TicketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketKey::Unit => f.write_str("()"),
            TicketKey::Cell(pos) => write!(f, "{pos}"),
            TicketKey::Id(id) => write!(f, "{id}"),
            TicketKey::Name(name) => f.write_str(name),
        }
    }
}

impl From<CellPos> for TicketKey {
    fn from(pos: CellPos) -> Self {
        TicketKey::Cell(pos)
    }
}

impl From<u64> for TicketKey {
    fn from(id: u64) -> Self {
        TicketKey::Id(id)
    }
}

impl From<&str> for TicketKey {
    fn from(name: &str) -> Self {
        TicketKey::Name(Arc::from(name))
    }
}

// =============================================================================
// Ticket
// =============================================================================

/// A priority claim on one cell.
///
/// Equality and ordering use `(level, type, key)`; the creation tick and the
/// force flag do not participate, so re-adding an equal ticket refreshes it.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub ticket_type: TicketType,
    pub level: u32,
    pub key: TicketKey,
    pub force_ticks: bool,
    pub(crate) created_at: u64,
}

impl Ticket {
    pub fn new(ticket_type: TicketType, level: u32, key: impl Into<TicketKey>) -> Self {
        Self {
            ticket_type,
            level,
            key: key.into(),
            force_ticks: false,
            created_at: 0,
        }
    }

    pub fn with_force_ticks(mut self, force: bool) -> Self {
        self.force_ticks = force;
        self
    }

    /// Tick at which the ticket was (re-)added.
    #[inline]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Whether the ticket has outlived its type's timeout at tick `now`.
    pub fn timed_out(&self, now: u64) -> bool {
        self.ticket_type
            .timeout
            .is_some_and(|timeout| now.saturating_sub(self.created_at) > timeout)
    }
}

impl PartialEq for Ticket {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ticket {}

impl PartialOrd for Ticket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ticket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level
            .cmp(&other.level)
            .then_with(|| self.ticket_type.cmp(&other.ticket_type))
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ticket[{} {} ({})] at {}",
            self.ticket_type, self.level, self.key, self.created_at
        )
    }
}
