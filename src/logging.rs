//
// logging.rs
// dcmsort
//
// Console and file logging setup; dcmsort.log is truncated at the start of every run.
//

use std::fs::File;
use std::io;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_FILE: &str = "dcmsort.log";

/// Initialize the global subscriber: terse console output plus a full log
/// file. `RUST_LOG` overrides the level; otherwise `--verbose` selects debug.
/// The returned guard must stay alive for the whole process or trailing
/// writes are lost.
pub fn init(verbose: bool) -> Result<WorkerGuard> {
    let log_file = File::create(LOG_FILE)
        .with_context(|| format!("Failed to create log file {:?}", LOG_FILE))?;
    let (file_writer, guard) = tracing_appender::non_blocking(log_file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let console_layer = fmt::layer()
        .with_writer(io::stdout)
        .with_target(false)
        .without_time();

    let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
