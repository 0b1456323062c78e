//! Putaway Tracker
//!
//! Scan-station and supervisor tooling for warehouse put-away. Operators
//! build a draft of bin/SKU/quantity lines against bin capacities, then
//! submit it as a task to a spreadsheet-backed store; supervisors review,
//! close and export tasks.

use std::path::Path;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

pub mod api;
pub mod capacity;
pub mod cli;
pub mod commands;
pub mod config;
pub mod csv_export;
pub mod db;
pub mod diagnostics;
pub mod draft;
pub mod error;
#[cfg(test)]
mod fake_store;
pub mod master_data;
pub mod model;
pub mod report;
pub mod session;
pub mod sync;

pub use error::{PutawayError, Result};
pub use session::{Session, SessionEvent};

/// Initialize structured logging: a daily rolling file under `log_dir` and
/// a stderr console layer that stays at `warn` unless `verbose`.
///
/// The returned guard flushes the file writer on drop; hold it until exit.
pub fn init_logging(log_dir: &Path, verbose: bool) -> WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,putaway_tracker=debug"));

    diagnostics::prune_old_logs(log_dir);
    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(console_level);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        "Starting putaway v{} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_GIT_SHA")
    );
    guard
}
