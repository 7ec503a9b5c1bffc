//! Tracing setup.
//!
//! Logging intent is expressed as a [`LogMode`]: the long-running server
//! keeps a machine-readable JSON trail (daily-rotated file under the data
//! directory) alongside a human-readable stderr mirror, while one-shot
//! subcommands stay on stderr only and default to warnings so their
//! stdout result is not drowned in log noise. `RUST_LOG` overrides the
//! per-mode default either way.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// How the current process wants to log.
pub enum LogMode {
    /// Long-running server: daily-rotated JSON file plus stderr mirror.
    Server {
        /// Directory for the rotated files.
        logs_dir: PathBuf,
    },
    /// One-shot subcommand: stderr only, warnings by default.
    OneShot,
}

/// Keeps the background file writer alive.
///
/// Dropping the handle flushes buffered records and closes the current
/// log file, so the binary holds it until exit. One-shot mode carries no
/// writer and the handle is inert.
pub struct LogHandle {
    _file_guard: Option<WorkerGuard>,
}

/// Rotated file prefix, derived from the crate name so a rename never
/// leaves stale log paths behind.
fn rotation_prefix() -> String {
    concat!(env!("CARGO_PKG_NAME"), ".log").to_owned()
}

/// `RUST_LOG` when set, otherwise the mode's default level.
fn filter_or(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber for `mode`.
///
/// # Errors
///
/// Server mode fails if the logs directory cannot be created.
pub fn init(mode: LogMode) -> anyhow::Result<LogHandle> {
    match mode {
        LogMode::Server { logs_dir } => {
            std::fs::create_dir_all(&logs_dir).map_err(|e| {
                anyhow::anyhow!("failed to create logs directory {}: {e}", logs_dir.display())
            })?;

            let appender = tracing_appender::rolling::daily(&logs_dir, rotation_prefix());
            let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(filter_or("info"))
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(file_writer),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_writer(std::io::stderr),
                )
                .init();

            Ok(LogHandle {
                _file_guard: Some(file_guard),
            })
        }
        LogMode::OneShot => {
            tracing_subscriber::fmt()
                .compact()
                .with_env_filter(filter_or("warn"))
                .with_writer(std::io::stderr)
                .init();

            Ok(LogHandle { _file_guard: None })
        }
    }
}
