//! Session controller.
//!
//! A `Session` owns everything one station works with: the remote store,
//! master data, the last snapshot, the draft buffer, device identity and
//! the signed-in user. Command handlers live in `commands/`; they take
//! `&mut self` and report state changes on a broadcast channel so a
//! front end can render without polling.

use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::RemoteStore;
use crate::capacity::BinUsage;
use crate::config::AppConfig;
use crate::db::{self, LocalStore};
use crate::draft::{DraftBuffer, DraftSummary, ResetScope};
use crate::error::Result;
use crate::master_data::MasterData;
use crate::model::{AppSnapshot, User};
use crate::sync::{CloseTally, SubmitOutcome};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    MasterDataLoaded { bins: usize, skus: usize },
    SnapshotRefreshed { tasks: usize, lines: usize },
    SignedIn { user: String },
    SignedOut,
    BinSelected { usage: BinUsage },
    BinCompleted { bin_id: String },
    BinDiscarded { bin_id: String, removed: usize },
    DraftChanged { summary: DraftSummary },
    DraftRestored { lines: usize },
    TaskSubmitted { outcome: SubmitOutcome },
    /// Legacy submission stopped part-way; `saved` lines reached the backend.
    SubmissionStopped {
        saved: usize,
        remaining: usize,
        reason: String,
    },
    TasksClosed { tally: CloseTally },
    RemoteLineUpdated { line_id: String, qty: u32 },
    RemoteLineDeleted { line_id: String },
    Exported { path: PathBuf },
}

pub struct Session<S: RemoteStore> {
    pub(crate) store: S,
    pub(crate) config: AppConfig,
    pub(crate) master: MasterData,
    pub(crate) snapshot: AppSnapshot,
    pub(crate) draft: DraftBuffer,
    pub(crate) device_id: String,
    pub(crate) user: Option<User>,
    pub(crate) local: Option<LocalStore>,
    events: broadcast::Sender<SessionEvent>,
}

impl<S: RemoteStore> Session<S> {
    /// Session with empty master data and snapshot. Without a local store
    /// the device id lives only as long as the session.
    pub fn new(store: S, config: AppConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            draft: DraftBuffer::new(config.sku_case),
            store,
            config,
            master: MasterData::default(),
            snapshot: AppSnapshot::default(),
            device_id: db::new_device_id(),
            user: None,
            local: None,
            events,
        }
    }

    /// Take device identity and the signed-in user from `local`, and
    /// autosave the draft there from now on.
    pub fn attach_local_store(&mut self, local: LocalStore) -> Result<()> {
        self.device_id = local.device_id()?;
        self.user = local.load_user()?;
        info!(
            device_id = %self.device_id,
            user = self.user.as_ref().map(|u| u.display_name()).unwrap_or(""),
            "Local store attached"
        );
        self.local = Some(local);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        debug!(?event, "Session event");
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn master(&self) -> &MasterData {
        &self.master
    }

    pub fn snapshot(&self) -> &AppSnapshot {
        &self.snapshot
    }

    pub fn draft(&self) -> &DraftBuffer {
        &self.draft
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Load the bin and SKU master files named in the config.
    pub fn load_master_data(&mut self) -> Result<()> {
        let master = MasterData::load(&self.config)?;
        self.set_master_data(master);
        Ok(())
    }

    pub fn set_master_data(&mut self, master: MasterData) {
        self.emit(SessionEvent::MasterDataLoaded {
            bins: master.bins.len(),
            skus: master.skus.len(),
        });
        self.master = master;
    }

    /// Replace the snapshot with a fresh fetch. On failure the previous
    /// snapshot is kept.
    pub async fn refresh(&mut self) -> Result<&AppSnapshot> {
        let snapshot = self.store.fetch_app_data().await?;
        self.emit(SessionEvent::SnapshotRefreshed {
            tasks: snapshot.tasks.len(),
            lines: snapshot.lines.len(),
        });
        self.snapshot = snapshot;
        Ok(&self.snapshot)
    }

    /// Rebuild the draft from the local autosave, if any. Call after
    /// master data and the snapshot are loaded.
    pub fn restore_draft(&mut self) -> Result<usize> {
        let Some(local) = &self.local else {
            return Ok(0);
        };
        let saved = local.load_draft()?;
        if saved.is_empty() {
            return Ok(0);
        }
        let total = saved.len();
        self.draft = DraftBuffer::restore(
            self.config.sku_case,
            saved,
            &self.master.bins,
            &self.snapshot,
        );
        let restored = self.draft.lines().len();
        if restored < total {
            warn!(dropped = total - restored, "Some autosaved lines were dropped");
            self.autosave();
        }
        info!(lines = restored, "Draft restored");
        self.emit(SessionEvent::DraftRestored { lines: restored });
        Ok(restored)
    }

    /// Discard the whole draft, locally and in the autosave.
    pub fn clear_draft(&mut self) -> usize {
        let removed = self.draft.reset(ResetScope::All);
        if let Some(local) = &self.local {
            if let Err(e) = local.clear_draft() {
                warn!(error = %e, "Failed to clear draft autosave");
            }
        }
        self.draft_changed();
        removed
    }

    /// Persist the draft after a mutation. Autosave failures are logged,
    /// never surfaced; the in-memory draft stays authoritative.
    pub(crate) fn autosave(&self) {
        if let Some(local) = &self.local {
            if let Err(e) = local.save_draft(self.draft.lines()) {
                warn!(error = %e, "Draft autosave failed");
            }
        }
    }

    pub(crate) fn draft_changed(&self) {
        self.emit(SessionEvent::DraftChanged {
            summary: self.draft.summary(),
        });
    }

    /// Name recorded as the closing actor.
    pub(crate) fn actor(&self) -> Option<&str> {
        self.user.as_ref().map(User::display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_store::{line, task, FakeStore};
    use crate::master_data::BinCatalog;
    use crate::model::TaskStatus;
    use chrono::Utc;
    use std::collections::HashMap;

    fn session(store: FakeStore) -> Session<FakeStore> {
        let mut s = Session::new(store, AppConfig::new("http://localhost/exec"));
        s.set_master_data(MasterData {
            bins: BinCatalog::from_map(HashMap::from([("A1".to_string(), 10)])),
            ..MasterData::default()
        });
        s
    }

    #[tokio::test]
    async fn test_refresh_replaces_snapshot_and_emits() {
        let store = FakeStore::with_snapshot(AppSnapshot {
            tasks: vec![task("1", TaskStatus::Open, Utc::now())],
            lines: vec![line("L1", "1", "A1", "S", 2)],
        });
        let mut s = session(store);
        let mut rx = s.subscribe();

        s.refresh().await.unwrap();
        assert_eq!(s.snapshot().lines.len(), 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::SnapshotRefreshed { tasks: 1, lines: 1 }
        );

        s.store().set_offline(true);
        assert!(s.refresh().await.is_err());
        assert_eq!(s.snapshot().lines.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_draft_from_local_store() {
        let local = LocalStore::open_in_memory().unwrap();
        let device = local.device_id().unwrap();
        let mut first = session(FakeStore::new());
        first.attach_local_store(local).unwrap();
        assert_eq!(first.device_id(), device);

        first.draft.select_bin("A1", &first.master.bins, &first.snapshot).unwrap();
        first.draft.add_line("sku", 4, None).unwrap();
        first.autosave();

        let local = first.local.take().unwrap();
        let mut second = session(FakeStore::new());
        second.attach_local_store(local).unwrap();
        assert_eq!(second.restore_draft().unwrap(), 1);
        assert_eq!(second.draft().lines()[0].sku_id, "SKU");
        assert_eq!(second.device_id(), device);

        assert_eq!(second.clear_draft(), 1);
        assert_eq!(second.restore_draft().unwrap(), 0);
    }
}
