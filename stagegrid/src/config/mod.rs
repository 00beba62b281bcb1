//! Configuration file handling for stagegrid.
//!
//! The scheduler can be configured in code through
//! [`SchedulerConfig`](crate::scheduler::SchedulerConfig) or from an INI file
//! at `~/.stagegrid/config.ini`:
//!
//! ```ini
//! [scheduler]
//! max_in_flight = 8
//! tick_interval_ms = 50
//!
//! [logging]
//! file = ~/.stagegrid/stagegrid.log
//! ```
//!
//! # Example
//!
//! ```no_run
//! use stagegrid::config::ConfigFile;
//!
//! let config = ConfigFile::load()?;
//! let scheduler_config = config.to_scheduler_config();
//! # Ok::<(), stagegrid::config::ConfigFileError>(())
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{ConfigFile, LoggingSettings, SchedulerSettings};
