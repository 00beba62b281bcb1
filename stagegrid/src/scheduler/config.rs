//! Scheduler configuration.
//!
//! This module contains the [`SchedulerConfig`] struct and the constants it
//! defaults to.

use crate::config::SchedulerSettings;
use crate::stage::DEFAULT_FULL_LEVEL;
use std::time::Duration;

// =============================================================================
// Configuration Constants
// =============================================================================

/// Default number of cells the worldgen processor may hold at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Default number of cells the secondary processor may hold at once.
pub const DEFAULT_SECONDARY_MAX_IN_FLIGHT: usize = 4;

/// Default ticket expiry sweep period.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Default command channel capacity.
pub const DEFAULT_COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// Default number of propagation steps per update slice.
pub const DEFAULT_UPDATE_BUDGET: usize = 4096;

// =============================================================================
// Scheduler Configuration
// =============================================================================

/// Configuration for the stage scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Admission cap of the worldgen processor.
    pub max_in_flight: usize,

    /// Admission cap of the secondary processor.
    pub secondary_max_in_flight: usize,

    /// Ticket expiry sweep period. `None` means ticks only happen through
    /// [`SchedulerHandle::tick`](super::SchedulerHandle::tick).
    pub tick_interval: Option<Duration>,

    /// Ticket level at which every stage is allowed.
    pub full_level: u32,

    /// Command channel capacity.
    pub command_channel_capacity: usize,

    /// Propagation steps per update slice.
    pub update_budget: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            secondary_max_in_flight: DEFAULT_SECONDARY_MAX_IN_FLIGHT,
            tick_interval: Some(DEFAULT_TICK_INTERVAL),
            full_level: DEFAULT_FULL_LEVEL,
            command_channel_capacity: DEFAULT_COMMAND_CHANNEL_CAPACITY,
            update_budget: DEFAULT_UPDATE_BUDGET,
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    pub fn with_secondary_max_in_flight(mut self, max: usize) -> Self {
        self.secondary_max_in_flight = max.max(1);
        self
    }

    pub fn with_tick_interval(mut self, interval: Option<Duration>) -> Self {
        self.tick_interval = interval.filter(|d| !d.is_zero());
        self
    }

    pub fn with_full_level(mut self, level: u32) -> Self {
        self.full_level = level;
        self
    }

    pub fn with_command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity.max(1);
        self
    }

    pub fn with_update_budget(mut self, budget: usize) -> Self {
        self.update_budget = budget.max(1);
        self
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self::default()
            .with_max_in_flight(settings.max_in_flight)
            .with_secondary_max_in_flight(settings.secondary_max_in_flight)
            .with_tick_interval(Some(Duration::from_millis(settings.tick_interval_ms)))
            .with_full_level(settings.full_level)
            .with_command_channel_capacity(settings.command_channel_capacity)
            .with_update_budget(settings.update_budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
        assert_eq!(config.tick_interval, Some(DEFAULT_TICK_INTERVAL));
        assert_eq!(config.full_level, DEFAULT_FULL_LEVEL);
    }

    #[test]
    fn test_builders_clamp_zero() {
        let config = SchedulerConfig::default()
            .with_max_in_flight(0)
            .with_update_budget(0)
            .with_tick_interval(Some(Duration::ZERO));
        assert_eq!(config.max_in_flight, 1);
        assert_eq!(config.update_budget, 1);
        assert_eq!(config.tick_interval, None);
    }

    #[test]
    fn test_from_settings() {
        let settings = SchedulerSettings {
            max_in_flight: 3,
            secondary_max_in_flight: 2,
            tick_interval_ms: 0,
            full_level: 20,
            command_channel_capacity: 16,
            update_budget: 100,
        };
        let config = SchedulerConfig::from(&settings);
        assert_eq!(config.max_in_flight, 3);
        assert_eq!(config.secondary_max_in_flight, 2);
        assert_eq!(config.tick_interval, None);
        assert_eq!(config.full_level, 20);
        assert_eq!(config.command_channel_capacity, 16);
        assert_eq!(config.update_budget, 100);
    }
}
