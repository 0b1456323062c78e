//! Error taxonomy shared by every put-away operation.
//!
//! Each variant renders as the one-line status message the scan station or
//! supervisor sees. Local validation variants (`InvalidBin`, `Validation`,
//! `CapacityExceeded`, `InvalidTransition`) are always raised before any
//! network call is made.

use thiserror::Error;

pub type Result<T, E = PutawayError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum PutawayError {
    /// Bad or missing master-file headers. Fatal for bins, degraded for SKUs.
    #[error("master data error: {0}")]
    MasterData(String),

    #[error("Invalid bin: {0}")]
    InvalidBin(String),

    #[error("{0}")]
    Validation(String),

    #[error(
        "Bin {bin} capacity exceeded: used {used} of {capacity}, free {free}"
    )]
    CapacityExceeded {
        bin: String,
        used: i64,
        capacity: u32,
        free: i64,
    },

    /// Network or HTTP-level failure.
    #[error("{0}")]
    Transport(String),

    /// The backend answered but declared `success: false`.
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    /// Local SQLite or filesystem failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PutawayError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// True for failures that never left the device.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidBin(_)
                | Self::Validation(_)
                | Self::CapacityExceeded { .. }
                | Self::InvalidTransition { .. }
                | Self::NotFound { .. }
        )
    }
}

impl From<rusqlite::Error> for PutawayError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<std::io::Error> for PutawayError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
