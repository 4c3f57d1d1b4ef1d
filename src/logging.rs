//! Tracing subscriber setup.
//!
//! Logs go to stderr through `tracing_subscriber::fmt`, filtered by
//! `RUST_LOG` when set and by [`LoggingSettings::filter`] otherwise. When a
//! log file is configured a second, non-blocking writer appends to it; keep
//! the returned guard alive until shutdown so buffered lines are flushed.

use crate::config::LoggingSettings;
use crate::error::{PhaseflowError, Result};
use std::ffi::OsStr;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
pub fn init(settings: &LoggingSettings) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .map_err(|e| PhaseflowError::Logging(format!("Invalid log filter: {}", e)))?;
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match &settings.file {
        Some(path) => {
            let (dir, name) = split_log_path(path)?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .try_init()
                .map_err(|e| PhaseflowError::Logging(e.to_string()))?;
            tracing::debug!("Logging to {:?}", path);
            Ok(Some(guard))
        }
        None => {
            registry
                .try_init()
                .map_err(|e| PhaseflowError::Logging(e.to_string()))?;
            Ok(None)
        }
    }
}

fn split_log_path(path: &Path) -> Result<(&Path, &OsStr)> {
    let name = path.file_name().ok_or_else(|| {
        PhaseflowError::Logging(format!("Log file path {:?} has no file name", path))
    })?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok((dir, name))
}
