//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use std::path::Path;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let scheduler = &config.scheduler;
    let logging = &config.logging;

    format!(
        r#"[scheduler]
; Cells the worldgen processor may work on at once
max_in_flight = {}
; Cells the secondary processor may work on at once
secondary_max_in_flight = {}
; Ticket expiry sweep period in milliseconds (0 = manual ticks only)
tick_interval_ms = {}
; Ticket level at which a cell is fully generated
full_level = {}
; Capacity of the command channel feeding the scheduler
command_channel_capacity = {}
; Propagation work done per slice before the scheduler yields
update_budget = {}

[logging]
; Log file path (cleared at session start)
file = {}
; Filter used when RUST_LOG is not set
filter = {}
"#,
        scheduler.max_in_flight,
        scheduler.secondary_max_in_flight,
        scheduler.tick_interval_ms,
        scheduler.full_level,
        scheduler.command_channel_capacity,
        scheduler.update_budget,
        path_to_string(&logging.file),
        logging.filter,
    )
}

/// Format a path for the config file, collapsing the home directory to `~`.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
