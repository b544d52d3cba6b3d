use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use tokio::time;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::DispatchError;

/// Outcome of the first `init`, replayed to every later caller
static INIT: OnceLock<Result<(), String>> = OnceLock::new();
const MAX_LOG_FILES: usize = 7; // Keep 7 days of logs
const LOG_ROTATION_INTERVAL: Duration = Duration::from_secs(86400); // 24 hours

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global tracing subscriber.
///
/// Only the first call does any work; later calls return its result again.
pub fn init(config: &LoggingConfig) -> Result<(), DispatchError> {
    INIT.get_or_init(|| {
        install(config).map_err(|e| match e {
            DispatchError::Config(msg) => msg,
            other => other.to_string(),
        })
    })
    .clone()
    .map_err(DispatchError::Config)
}

fn install(config: &LoggingConfig) -> Result<(), DispatchError> {
    let console = fmt::Layer::new()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(true)
        .with_ansi(true)
        .with_filter(env_filter(&config.level));

    let json_file = if config.json_file {
        fs::create_dir_all(&config.dir)?;
        let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix("task-ring")
            .filename_suffix("log")
            .build(&config.dir)
            .map_err(|e| DispatchError::config(format!("Failed to create log appender: {}", e)))?;

        Some(
            fmt::Layer::new()
                .json()
                .with_writer(file_appender)
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_target(true)
                .with_ansi(false)
                .with_filter(env_filter(&config.level)),
        )
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry().with(console).with(json_file);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| DispatchError::config(format!("Failed to set tracing subscriber: {}", e)))?;

    // Rotation cleanup needs a runtime; skip it for purely synchronous callers
    if config.json_file {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let log_dir = config.dir.clone();
            handle.spawn(async move {
                let mut interval = time::interval(LOG_ROTATION_INTERVAL);
                loop {
                    interval.tick().await;
                    cleanup_old_logs(&log_dir);
                }
            });
        }
    }
    Ok(())
}

fn cleanup_old_logs(log_dir: &Path) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };
    let mut log_files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with("task-ring") && name.ends_with(".log"))
                .unwrap_or(false)
        })
        .collect();

    // Newest first
    log_files.sort_by_key(|path| {
        std::cmp::Reverse(
            fs::metadata(path)
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        )
    });

    for old_file in log_files.iter().skip(MAX_LOG_FILES) {
        let _ = fs::remove_file(old_file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_keeps_newest_files() {
        let dir = tempfile::tempdir().unwrap();
        for day in 0..10 {
            fs::write(dir.path().join(format!("task-ring.2026-01-{:02}.log", day + 1)), "x").unwrap();
        }
        fs::write(dir.path().join("unrelated.txt"), "keep").unwrap();

        cleanup_old_logs(dir.path());

        let remaining: Vec<_> = fs::read_dir(dir.path()).unwrap().filter_map(|e| e.ok()).collect();
        let logs = remaining
            .iter()
            .filter(|e| e.path().extension().map(|x| x == "log").unwrap_or(false))
            .count();
        assert_eq!(logs, MAX_LOG_FILES);
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_failed_init_is_reported_again() {
        // A regular file where the log directory should go
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let config = LoggingConfig {
            level: "debug".to_string(),
            dir: blocker.path().join("logs"),
            json_file: true,
        };

        let first = init(&config);
        assert!(matches!(first, Err(DispatchError::Config(_))));
        let second = init(&LoggingConfig::default());
        assert_eq!(second.unwrap_err().to_string(), first.unwrap_err().to_string());
    }
}
