//! Stage scheduler.
//!
//! The scheduler is a single driver task that owns the priority tracker and
//! the lifecycle store. Clients talk to it through a cloneable
//! [`SchedulerHandle`]; stage work runs on the tokio pool, admitted by the
//! task sorter in priority order.
//!
//! # Architecture
//!
//! ```text
//!  SchedulerHandle ──commands──► StageScheduler ◄──internal── step jobs,
//!                                 │  tracker            waiters, saves
//!                                 │  cell store
//!                                 ▼
//!                       TaskSorter ──► worldgen mailbox ──► tokio::spawn(step)
//!                                  └─► secondary mailbox ──► SecondaryPipeline
//! ```
//!
//! # Example
//!
//! ```ignore
//! use stagegrid::coord::CellPos;
//! use stagegrid::scheduler::{SchedulerConfig, SchedulerServices, StageScheduler};
//! use stagegrid::stage::StagePipeline;
//! use tokio_util::sync::CancellationToken;
//!
//! let (scheduler, handle) = StageScheduler::new(
//!     SchedulerConfig::default(),
//!     StagePipeline::standard(),
//!     SchedulerServices::default(),
//! );
//! let shutdown = CancellationToken::new();
//! let driver = tokio::spawn(scheduler.run(shutdown.clone()));
//!
//! let full = handle.pipeline().top();
//! let future = handle.request_stage(CellPos::ORIGIN, full, true).await?;
//! let result = future.wait().await;
//!
//! shutdown.cancel();
//! driver.await??;
//! ```

mod commands;
mod config;
mod core;
mod handle;
mod steps;

pub use config::{
    SchedulerConfig, DEFAULT_COMMAND_CHANNEL_CAPACITY, DEFAULT_MAX_IN_FLIGHT,
    DEFAULT_SECONDARY_MAX_IN_FLIGHT, DEFAULT_TICK_INTERVAL, DEFAULT_UPDATE_BUDGET,
};
pub use core::{SchedulerServices, StageScheduler};
pub use handle::{RegionStatus, SchedulerHandle, TicketRow};
pub use steps::{SECONDARY, WORLDGEN};
