//! Default values for all configuration settings and the
//! `ConfigFile::default()` implementation.

use std::path::PathBuf;

use super::file::config_directory;
use super::settings::*;
use crate::scheduler::{
    DEFAULT_COMMAND_CHANNEL_CAPACITY, DEFAULT_MAX_IN_FLIGHT, DEFAULT_SECONDARY_MAX_IN_FLIGHT,
    DEFAULT_TICK_INTERVAL, DEFAULT_UPDATE_BUDGET,
};
use crate::stage::DEFAULT_FULL_LEVEL;

/// Default filter directive for the log subscriber.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Log file name used when `[logging] file` names no file.
pub const DEFAULT_LOG_FILE: &str = "stagegrid.log";

/// Default tick interval expressed in milliseconds.
pub fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL.as_millis() as u64
}

/// Default log file path (~/.stagegrid/stagegrid.log).
pub fn default_log_path() -> PathBuf {
    config_directory().join(DEFAULT_LOG_FILE)
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            secondary_max_in_flight: DEFAULT_SECONDARY_MAX_IN_FLIGHT,
            tick_interval_ms: default_tick_interval_ms(),
            full_level: DEFAULT_FULL_LEVEL,
            command_channel_capacity: DEFAULT_COMMAND_CHANNEL_CAPACITY,
            update_budget: DEFAULT_UPDATE_BUDGET,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            file: default_log_path(),
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}
