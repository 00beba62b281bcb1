//! Priority tickets and the trackers that turn them into cell levels.
//!
//! Level 0 is the highest priority. A cell's level is the minimum of its own
//! ticket levels and its neighbors' levels plus one; cells at the absent
//! level are not required and may be unloaded.

mod store;
mod ticket;
mod tracker;

pub use store::TicketStore;
pub use ticket::{Ticket, TicketKey, TicketType};
pub use tracker::{PriorityTracker, RegionTracker};
