//! Runtime configuration for the scan station and supervisor tools.
//!
//! Values come from CLI flags with environment fallbacks (see `cli.rs`).
//! Device identity and the signed-in user are not configuration; they live
//! in the local store (`db.rs`).

use chrono::FixedOffset;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PutawayError, Result};

/// Capacity used for every bin when no bins file is available and the
/// fallback is enabled. The master file is always authoritative.
pub const DEFAULT_FALLBACK_CAPACITY: u32 = 100;

/// Default timeout for remote store requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default length of the recently-closed list.
pub const DEFAULT_RECENT_CLOSED: usize = 10;

/// How SKU identifiers are normalized before lookup and storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SkuCasePolicy {
    /// Upper-case every SKU id.
    #[default]
    Upper,
    /// Keep SKU ids exactly as scanned (trimmed).
    Preserve,
}

impl SkuCasePolicy {
    pub fn normalize(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        match self {
            Self::Upper => trimmed.to_uppercase(),
            Self::Preserve => trimmed.to_string(),
        }
    }
}

/// How a finished draft reaches the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SubmitStrategy {
    /// One `createTaskWithLines` call for the whole draft.
    #[default]
    Batch,
    /// Legacy: `saveLine` per line, then mark the device task `OPEN`.
    Incremental,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_url: String,
    pub bins_file: PathBuf,
    pub skus_file: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub export_dir: PathBuf,
    pub sku_case: SkuCasePolicy,
    /// `Some` enables the fallback capacity when the bins file is missing.
    pub fallback_capacity: Option<u32>,
    /// Offset used to decide which calendar day an instant falls on.
    pub utc_offset: FixedOffset,
    pub submit_strategy: SubmitStrategy,
    pub request_timeout: Duration,
    /// Re-fetch the snapshot before each `add_line` capacity check.
    pub refresh_before_add: bool,
}

impl AppConfig {
    /// Config with the given endpoint and conventional file locations
    /// relative to the working directory.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            bins_file: PathBuf::from("bins.csv"),
            skus_file: Some(PathBuf::from("sku_master.csv")),
            data_dir: default_data_dir(),
            export_dir: PathBuf::from("."),
            sku_case: SkuCasePolicy::default(),
            fallback_capacity: None,
            utc_offset: local_offset(),
            submit_strategy: SubmitStrategy::default(),
            request_timeout: DEFAULT_TIMEOUT,
            refresh_before_add: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            return Err(PutawayError::Config(
                "API URL is required (set PUTAWAY_API_URL or --api-url)".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(PutawayError::Config("request timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// Offset of the machine's local zone right now.
pub fn local_offset() -> FixedOffset {
    *chrono::Local::now().offset()
}

/// Build a `FixedOffset` from minutes east of UTC.
pub fn offset_from_minutes(minutes: i32) -> Result<FixedOffset> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| PutawayError::Config(format!("UTC offset out of range: {minutes} minutes")))
}

/// `$XDG_DATA_HOME/putaway` (or `~/.local/share/putaway`; `%LOCALAPPDATA%`
/// on Windows).
pub fn default_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("putaway")
}
