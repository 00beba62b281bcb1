//! INI parsing logic for converting INI sections → `ConfigFile`.
//!
//! Parsing starts from defaults and overlays every key present in the file.
//! Unknown keys are ignored; malformed values are reported with their
//! section and key.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parse an INI document into a `ConfigFile`.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [scheduler]
    if let Some(section) = ini.section(Some("scheduler")) {
        let scheduler = &mut config.scheduler;
        if let Some(v) = parse_positive(section, "scheduler", "max_in_flight")? {
            scheduler.max_in_flight = v;
        }
        if let Some(v) = parse_positive(section, "scheduler", "secondary_max_in_flight")? {
            scheduler.secondary_max_in_flight = v;
        }
        if let Some(v) = parse_number(
            section,
            "scheduler",
            "tick_interval_ms",
            "must be a non-negative integer (milliseconds, 0 = manual)",
        )? {
            scheduler.tick_interval_ms = v;
        }
        if let Some(v) = section.get("full_level") {
            let level: u32 = v.trim().parse().map_err(|_| {
                invalid("scheduler", "full_level", v, "must be a non-negative integer")
            })?;
            if level == 0 || level >= u32::MAX - 1 {
                return Err(invalid(
                    "scheduler",
                    "full_level",
                    v,
                    "must be between 1 and 4294967293",
                ));
            }
            scheduler.full_level = level;
        }
        if let Some(v) = parse_positive(section, "scheduler", "command_channel_capacity")? {
            scheduler.command_channel_capacity = v;
        }
        if let Some(v) = parse_positive(section, "scheduler", "update_budget")? {
            scheduler.update_budget = v;
        }
    }

    // [logging]
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if v.is_empty() {
                return Err(invalid("logging", "file", v, "must not be empty"));
            }
            config.logging.file = expand_tilde(v);
        }
        if let Some(v) = section.get("filter") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.filter = v.to_string();
            }
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number<T: FromStr>(
    section: &Properties,
    name: &str,
    key: &str,
    reason: &str,
) -> Result<Option<T>, ConfigFileError> {
    section
        .get(key)
        .map(|v| v.trim().parse().map_err(|_| invalid(name, key, v, reason)))
        .transpose()
}

fn parse_positive(
    section: &Properties,
    name: &str,
    key: &str,
) -> Result<Option<usize>, ConfigFileError> {
    match parse_number::<usize>(section, name, key, "must be a positive integer")? {
        Some(0) => Err(invalid(name, key, "0", "must be a positive integer")),
        other => Ok(other),
    }
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::*;
    use crate::scheduler::DEFAULT_MAX_IN_FLIGHT;

    fn parse(text: &str) -> Result<ConfigFile, ConfigFileError> {
        let ini = Ini::load_from_str(text).unwrap();
        parse_ini(&ini)
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_scheduler_section_overlays_defaults() {
        let config = parse(
            "[scheduler]\nmax_in_flight = 3\ntick_interval_ms = 0\nfull_level = 12\n",
        )
        .unwrap();

        assert_eq!(config.scheduler.max_in_flight, 3);
        assert_eq!(config.scheduler.tick_interval_ms, 0);
        assert_eq!(config.scheduler.full_level, 12);
        assert_eq!(
            config.scheduler.secondary_max_in_flight,
            ConfigFile::default().scheduler.secondary_max_in_flight
        );
    }

    #[test]
    fn test_invalid_number_names_key() {
        let err = parse("[scheduler]\nmax_in_flight = lots\n").unwrap_err();
        match err {
            ConfigFileError::InvalidValue {
                section, key, value, ..
            } => {
                assert_eq!(section, "scheduler");
                assert_eq!(key, "max_in_flight");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_cap_rejected() {
        assert!(matches!(
            parse("[scheduler]\nupdate_budget = 0\n"),
            Err(ConfigFileError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse("[scheduler]\nfull_level = 0\n"),
            Err(ConfigFileError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_logging_section() {
        let config = parse("[logging]\nfile = /var/log/grid.log\nfilter = stagegrid=debug\n").unwrap();
        assert_eq!(config.logging.file, PathBuf::from("/var/log/grid.log"));
        assert_eq!(config.logging.filter, "stagegrid=debug");
    }

    #[test]
    fn test_blank_filter_keeps_default() {
        let config = parse("[logging]\nfilter =\n").unwrap();
        assert_eq!(config.logging.filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = parse("[scheduler]\nshiny = yes\n[other]\nx = 1\n").unwrap();
        assert_eq!(config.scheduler.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/logs/a.log"), home.join("logs/a.log"));
        }
    }
}
