//! stagegrid - priority-driven staged generation for 2D cell grids
//!
//! This library advances the cells of an unbounded grid through an ordered
//! pipeline of stages. Each stage may require neighboring cells to have
//! reached an earlier stage first; how far a cell may progress depends on
//! tickets placed by clients, whose levels spread across the grid.
//!
//! # High-Level API
//!
//! The [`scheduler`] module ties everything together:
//!
//! ```ignore
//! use stagegrid::scheduler::{SchedulerConfig, SchedulerServices, StageScheduler};
//! use stagegrid::priority::TicketType;
//!
//! let (scheduler, handle) = StageScheduler::new(config, pipeline, services);
//! tokio::spawn(scheduler.run(shutdown.clone()));
//!
//! handle.add_ticket(TicketType::START, pos, 22, "spawn").await?;
//! ```

pub mod collections;
pub mod config;
pub mod content;
pub mod coord;
pub mod error;
pub mod generation;
pub mod lifecycle;
pub mod logging;
pub mod mailbox;
pub mod priority;
pub mod propagation;
pub mod scheduler;
pub mod secondary;
pub mod sorter;
pub mod stage;
pub mod storage;
pub mod telemetry;
pub mod transform;

/// Version of the stagegrid library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
