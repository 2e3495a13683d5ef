use std::path::{Path, PathBuf};

use color_eyre::eyre::{Result, WrapErr};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::registry::APP_DIR_NAME;

/// Keeps the file writer alive; logs are flushed when it is dropped
pub struct LoggingGuard {
    _guard: Option<WorkerGuard>,
}

/// `<local data dir>/lighthouse-power/logs`
pub fn default_log_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join(APP_DIR_NAME).join("logs"))
}

/// Installs console and (optionally) file logging.
///
/// `RUST_LOG` wins over `verbose`. Each process gets its own log file,
/// `lhpower.<timestamp>.log`.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Result<LoggingGuard> {
    let default_level = if verbose { "trace" } else { "info" };
    let filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| {
        EnvFilter::new(format!("lighthouse_power={default_level},lhpower={default_level}"))
    });

    let console_layer = fmt::layer().with_writer(std::io::stderr).compact();

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(format!("lhpower.{timestamp}"))
                .filename_suffix("log")
                .build(dir)
                .wrap_err_with(|| format!("Failed to open log directory {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false) // File logs shouldn't have ANSI colors
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .wrap_err("Failed to install the log subscriber")?;

    Ok(LoggingGuard { _guard: guard })
}
