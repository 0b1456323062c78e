//! Device-local SQLite store.
//!
//! Holds what must survive a restart of the scan station: the device
//! identifier, the signed-in user and an autosave copy of the draft buffer.
//! Uses rusqlite with WAL mode and versioned migrations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{PutawayError, Result};
use crate::model::{DraftLine, User};

const DB_FILE: &str = "putaway.db";

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

const DEVICE_CATEGORY: &str = "device";
const SESSION_CATEGORY: &str = "session";

pub struct LocalStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

/// Open (or create) `{data_dir}/putaway.db`.
///
/// On open failure the file is deleted and the open retried once; the
/// store only holds recoverable state.
pub fn init(data_dir: &Path) -> Result<LocalStore> {
    fs::create_dir_all(data_dir)
        .map_err(|e| PutawayError::Storage(format!("Failed to create data dir: {e}")))?;

    let db_path = data_dir.join(DB_FILE);
    info!(path = %db_path.display(), "Opening local store");

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(error = %first_err, "Local store open failed, deleting and retrying once");
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path).map_err(|e| {
                PutawayError::Storage(format!("Local store open failed after retry: {e}"))
            })?
        }
    };

    run_migrations(&conn)?;

    Ok(LocalStore {
        conn: Mutex::new(conn),
        db_path,
    })
}

fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!(from = current, to = CURRENT_SCHEMA_VERSION, "Migrating local store");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: category/key/value settings.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_settings (
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (setting_category, setting_key)
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        PutawayError::Storage(format!("migration v1: {e}"))
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: draft autosave.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS draft_lines (
            id TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            bin_id TEXT NOT NULL,
            sku_id TEXT NOT NULL,
            qty INTEGER NOT NULL CHECK (qty > 0),
            remarks TEXT,
            scanned_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_draft_lines_position ON draft_lines(position);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        PutawayError::Storage(format!("migration v2: {e}"))
    })?;

    info!("Applied migration v2 (draft_lines)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

pub fn delete_setting(conn: &Connection, category: &str, key: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
    )?;
    Ok(())
}

pub(crate) fn new_device_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("dev-{}", &hex[..8])
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

impl LocalStore {
    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PutawayError::Storage("local store lock poisoned".into()))
    }

    /// This station's identifier, created on first use.
    pub fn device_id(&self) -> Result<String> {
        let conn = self.lock()?;
        if let Some(id) = get_setting(&conn, DEVICE_CATEGORY, "device_id") {
            return Ok(id);
        }
        let id = new_device_id();
        set_setting(&conn, DEVICE_CATEGORY, "device_id", &id)?;
        info!(device_id = %id, "Generated device id");
        Ok(id)
    }

    pub fn load_user(&self) -> Result<Option<User>> {
        let conn = self.lock()?;
        let Some(raw) = get_setting(&conn, SESSION_CATEGORY, "user") else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable stored user");
                delete_setting(&conn, SESSION_CATEGORY, "user")?;
                Ok(None)
            }
        }
    }

    /// Persist the signed-in user, or forget it with `None`.
    pub fn save_user(&self, user: Option<&User>) -> Result<()> {
        let conn = self.lock()?;
        match user {
            Some(user) => {
                let raw = serde_json::to_string(user)
                    .map_err(|e| PutawayError::Storage(format!("serialize user: {e}")))?;
                set_setting(&conn, SESSION_CATEGORY, "user", &raw)
            }
            None => delete_setting(&conn, SESSION_CATEGORY, "user"),
        }
    }

    /// Replace the autosaved draft with `lines`.
    pub fn save_draft(&self, lines: &[DraftLine]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM draft_lines", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO draft_lines (id, position, bin_id, sku_id, qty, remarks, scanned_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (position, line) in lines.iter().enumerate() {
                stmt.execute(params![
                    line.id,
                    position as i64,
                    line.bin_id,
                    line.sku_id,
                    line.qty,
                    line.remarks,
                    line.scanned_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Autosaved draft lines in their original order. Rows with an
    /// unreadable timestamp are skipped.
    pub fn load_draft(&self) -> Result<Vec<DraftLine>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, bin_id, sku_id, qty, remarks, scanned_at
             FROM draft_lines ORDER BY position",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut lines = Vec::new();
        for row in rows {
            let (id, bin_id, sku_id, qty, remarks, scanned_at) = row?;
            let Ok(scanned_at) = DateTime::parse_from_rfc3339(&scanned_at) else {
                warn!(line_id = %id, "Skipping autosaved line with bad timestamp");
                continue;
            };
            lines.push(DraftLine {
                id,
                bin_id,
                sku_id,
                qty,
                remarks,
                scanned_at: scanned_at.with_timezone(&Utc),
            });
        }
        Ok(lines)
    }

    pub fn clear_draft(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM draft_lines", [])?;
        Ok(())
    }

    pub fn setting(&self, category: &str, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
                params![category, key],
                |row| row.get(0),
            )
            .optional()?)
    }
}
