//! Log setup
//!
//! Logs go to stderr, and additionally to daily rotating files when a log
//! directory is given.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging. Keep the returned guard alive until exit so the file
/// writer gets flushed.
pub fn init_logging(verbosity: u8, log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    // RUST_LOG wins over -v
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,wav2bids={}", default_level)));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            // Rotates daily: wav2bids.log.YYYY-MM-DD
            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "wav2bids.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    if let Some(dir) = log_dir {
        tracing::debug!("Logging to {}", dir.display());
    }
    Ok(guard)
}

/// Log an error with context
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {
        tracing::error!(error = %$err, "Conversion failed");
    };
    ($err:expr, $($field:tt)*) => {
        tracing::error!(error = %$err, $($field)*, "Conversion failed");
    };
}
