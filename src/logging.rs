//! Logging setup driven by `LOG_LEVEL`/`LOG_TYPE`/`LOG_FILE` (spec §6).
//!
//! Mirrors the teacher's tracing-subscriber bootstrap: an [`EnvFilter`]
//! seeded from configuration (real env filter still wins if set), with
//! console, file, or both outputs. File output goes through
//! `tracing-appender`'s non-blocking writer; its [`WorkerGuard`] must be
//! held for the process lifetime or buffered lines are dropped on exit.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogLevel, LogType, Settings};

fn filter_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Verbose => "trace",
        LogLevel::Notice => "info",
        LogLevel::Info => "info",
    }
}

/// Initializes the global tracing subscriber. Returns a guard that must be
/// kept alive for as long as file logging should keep flushing.
pub fn init(settings: &Settings) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(settings.log_level)));

    match settings.log_type {
        LogType::Console => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
        LogType::File => {
            let (writer, guard) = file_writer(&settings.log_file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        LogType::Both => {
            let (file_writer, guard) = file_writer(&settings.log_file);
            let writer = std::io::stdout.and(file_writer);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
    }
}

fn file_writer(log_file: &str) -> (tracing_appender::non_blocking::NonBlocking, WorkerGuard) {
    let path = Path::new(log_file);
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "zonesync.log".to_string());
    let appender = tracing_appender::rolling::never(dir, file_name);
    tracing_appender::non_blocking(appender)
}
