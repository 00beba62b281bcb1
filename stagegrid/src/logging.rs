//! Tracing subscriber setup.
//!
//! [`init_logging`] installs one subscriber with two layers: a plain-text
//! file layer at the `[logging]` path and a compact stdout layer. The file
//! starts empty each session. `RUST_LOG` overrides the configured filter.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// Keeps the non-blocking file writer alive. Dropping it flushes the file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Installs the global subscriber described by `settings`.
///
/// # Errors
///
/// Fails when the log directory cannot be created or the log file cannot be
/// truncated.
pub fn init_logging(settings: &LoggingSettings) -> Result<LoggingGuard, io::Error> {
    let dir = settings.directory();
    let file_name = settings.file_name();
    let path = prepare_log_file(&dir, &file_name)?;

    let (file_writer, file_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, &file_name));
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stdout).compact())
        .init();

    tracing::debug!(path = %path.display(), "Logging initialised");
    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn prepare_log_file(dir: &Path, file_name: &str) -> Result<PathBuf, io::Error> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    fs::write(&path, "")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_creates_nested_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("deep/nested");

        let path = prepare_log_file(&dir, "grid.log").unwrap();

        assert!(dir.exists());
        assert_eq!(fs::read_to_string(path).unwrap(), "");
    }

    #[test]
    fn test_prepare_truncates_previous_session() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("grid.log");
        fs::write(&path, "old session").unwrap();

        prepare_log_file(temp.path(), "grid.log").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_prepare_fails_under_a_file() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not_a_dir");
        fs::write(&blocker, "x").unwrap();

        assert!(prepare_log_file(&blocker.join("logs"), "grid.log").is_err());
    }

    #[test]
    fn test_settings_split_path() {
        let settings = LoggingSettings {
            file: PathBuf::from("/var/log/grid/run.log"),
            filter: "info".to_string(),
        };
        assert_eq!(settings.directory(), Path::new("/var/log/grid"));
        assert_eq!(settings.file_name(), "run.log");
    }
}
