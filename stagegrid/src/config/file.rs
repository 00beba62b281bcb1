//! Reading and writing `~/.stagegrid/config.ini`.

use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::settings::ConfigFile;
use crate::scheduler::SchedulerConfig;

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("failed to parse config file: {0}")]
    Parse(#[from] ini::Error),

    #[error("failed to write config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigFile {
    /// Loads [`config_file_path`], or defaults when it does not exist.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Loads `path`, or defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        super::parser::parse_ini(&Ini::load_from_file(path)?)
    }

    /// Writes a commented file to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, super::writer::to_config_string(self))?;
        Ok(())
    }

    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::from(&self.scheduler)
    }
}

/// `~/.stagegrid`, or `./.stagegrid` without a home directory.
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".stagegrid")
}

pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.ini");

        let config = ConfigFile::load_from(&config_path).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_save_creates_parent_and_round_trips_edits() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested/dir/config.ini");

        let mut config = ConfigFile::default();
        config.scheduler.max_in_flight = 2;
        config.scheduler.tick_interval_ms = 0;
        config.logging.file = temp_dir.path().join("grid.log");
        config.logging.filter = "stagegrid=trace".to_string();
        config.save_to(&config_path).unwrap();

        let loaded = ConfigFile::load_from(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_file_value_reported() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.ini");
        std::fs::write(&config_path, "[scheduler]\nfull_level = high\n").unwrap();

        let err = ConfigFile::load_from(&config_path).unwrap_err();
        assert!(err.to_string().contains("scheduler.full_level = 'high'"));
    }

    #[test]
    fn test_to_scheduler_config() {
        let mut config = ConfigFile::default();
        config.scheduler.max_in_flight = 5;
        config.scheduler.tick_interval_ms = 0;
        let scheduler = config.to_scheduler_config();
        assert_eq!(scheduler.max_in_flight, 5);
        assert_eq!(scheduler.tick_interval, None);

        config.scheduler.tick_interval_ms = 20;
        assert_eq!(
            config.to_scheduler_config().tick_interval,
            Some(Duration::from_millis(20))
        );
    }

    #[test]
    fn test_save_under_a_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not_a_dir");
        std::fs::write(&blocker, "x").unwrap();

        let err = ConfigFile::default()
            .save_to(&blocker.join("config.ini"))
            .unwrap_err();
        assert!(matches!(err, ConfigFileError::Io(_)));
    }

    #[test]
    fn test_config_file_path() {
        let path = config_file_path();
        assert!(path.ends_with(".stagegrid/config.ini"));
    }
}
