//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use std::path::PathBuf;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    /// Scheduler concurrency and timing
    pub scheduler: SchedulerSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Cells the worldgen processor may hold at once
    pub max_in_flight: usize,
    /// Cells the secondary processor may hold at once
    pub secondary_max_in_flight: usize,
    /// Ticket expiry sweep period in milliseconds (0 = manual ticks only)
    pub tick_interval_ms: u64,
    /// Ticket level at which a cell is fully generated
    pub full_level: u32,
    /// Capacity of the command channel feeding the driver
    pub command_channel_capacity: usize,
    /// Propagation work done per slice before the driver yields
    pub update_budget: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Log file path
    pub file: PathBuf,
    /// Filter used when `RUST_LOG` is not set
    pub filter: String,
}

impl LoggingSettings {
    /// Directory holding the log file.
    pub fn directory(&self) -> PathBuf {
        self.file
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Log file name without its directory.
    pub fn file_name(&self) -> String {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| super::defaults::DEFAULT_LOG_FILE.to_string())
    }
}
