//! Build info, station status and log retention.

use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::time::SystemTime;
use tracing::warn;

use crate::config::AppConfig;
use crate::db::LocalStore;
use crate::error::Result;

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// File name prefix of the rolling log files.
pub const LOG_PREFIX: &str = "putaway";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

/// Returns version, build timestamp, git SHA, and platform info.
pub fn about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

/// Device identity, autosaved draft size and configured locations.
pub fn station_status(config: &AppConfig, store: &LocalStore) -> Result<Value> {
    let draft = store.load_draft()?;
    let user = store.load_user()?;
    Ok(json!({
        "deviceId": store.device_id()?,
        "user": user.as_ref().map(|u| u.display_name().to_string()),
        "draftLines": draft.len(),
        "draftUnits": draft.iter().map(|l| u64::from(l.qty)).sum::<u64>(),
        "apiUrl": config.api_url,
        "binsFile": config.bins_file.display().to_string(),
        "skusFile": config.skus_file.as_ref().map(|p| p.display().to_string()),
        "database": store.path().display().to_string(),
        "logDir": config.log_dir().display().to_string(),
        "submitStrategy": format!("{:?}", config.submit_strategy).to_lowercase(),
    }))
}

// ---------------------------------------------------------------------------
// Log retention
// ---------------------------------------------------------------------------

/// Prune old log files in `log_dir`, keeping the `MAX_LOG_FILES` newest.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(std::path::PathBuf, SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(&format!("{LOG_PREFIX}.")));
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to prune log file");
        }
    }
}
