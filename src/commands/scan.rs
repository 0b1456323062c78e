//! Scan-station handlers.

use tracing::{info, warn};

use crate::api::RemoteStore;
use crate::capacity::BinUsage;
use crate::draft::{self, ResetScope};
use crate::error::{PutawayError, Result};
use crate::model::{DraftLine, User};
use crate::session::{Session, SessionEvent};
use crate::sync::{self, SubmitOutcome, Submission};

impl<S: RemoteStore> Session<S> {
    // -----------------------------------------------------------------------
    // Sign-in
    // -----------------------------------------------------------------------

    pub async fn login(&mut self, pin: &str) -> Result<User> {
        let pin = pin.trim();
        if pin.is_empty() {
            return Err(PutawayError::Validation("PIN is required".into()));
        }
        let user = self.store.login(pin).await?;
        if let Some(local) = &self.local {
            local.save_user(Some(&user))?;
        }
        info!(user_id = %user.id, "Signed in");
        self.emit(SessionEvent::SignedIn {
            user: user.display_name().to_string(),
        });
        self.user = Some(user.clone());
        Ok(user)
    }

    /// Forget the signed-in user. The draft is kept.
    pub fn logout(&mut self) -> Result<()> {
        if let Some(local) = &self.local {
            local.save_user(None)?;
        }
        if let Some(user) = self.user.take() {
            info!(user_id = %user.id, "Signed out");
        }
        self.emit(SessionEvent::SignedOut);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bins and lines
    // -----------------------------------------------------------------------

    /// Re-fetch, then select `bin_id` with its current committed usage.
    pub async fn select_bin(&mut self, bin_id: &str) -> Result<BinUsage> {
        let bin_id = bin_id.trim();
        self.draft.check_selectable(bin_id)?;
        self.master.bins.require(bin_id)?;

        self.refresh().await?;
        let usage = self
            .draft
            .select_bin(bin_id, &self.master.bins, &self.snapshot)?;
        info!(
            bin = bin_id,
            capacity = usage.capacity,
            used = usage.used_total(),
            free = usage.free(),
            "Bin selected"
        );
        self.emit(SessionEvent::BinSelected {
            usage: usage.clone(),
        });
        Ok(usage)
    }

    /// Add a line to the selected bin. With `refresh_before_add` the
    /// committed usage is re-fetched first so lines saved by other
    /// stations count.
    pub async fn add_line(
        &mut self,
        sku: &str,
        qty: i64,
        remarks: Option<&str>,
    ) -> Result<DraftLine> {
        let Some(bin_id) = self.draft.selected_bin().map(str::to_string) else {
            return Err(PutawayError::Validation("Select a bin first".into()));
        };
        if self.draft.policy().normalize(sku).is_empty() {
            return Err(PutawayError::Validation("SKU is required".into()));
        }
        draft::validate_qty(qty)?;

        if self.config.refresh_before_add {
            self.refresh().await?;
            self.draft
                .select_bin(&bin_id, &self.master.bins, &self.snapshot)?;
        }

        let line = self.draft.add_line(sku, qty, remarks)?;
        self.autosave();
        self.draft_changed();
        Ok(line)
    }

    pub fn edit_line(
        &mut self,
        line_id: &str,
        sku: &str,
        qty: i64,
        remarks: Option<&str>,
    ) -> Result<DraftLine> {
        let line = self.draft.edit_line(line_id, sku, qty, remarks)?;
        self.autosave();
        self.draft_changed();
        Ok(line)
    }

    pub fn delete_line(&mut self, line_id: &str) -> Result<DraftLine> {
        let line = self.draft.delete_line(line_id)?;
        self.autosave();
        self.draft_changed();
        Ok(line)
    }

    /// Release the selected bin, keeping its lines.
    pub fn complete_bin(&mut self) -> Result<String> {
        let bin_id = self
            .draft
            .complete_bin()
            .ok_or_else(|| PutawayError::Validation("No bin selected".into()))?;
        self.emit(SessionEvent::BinCompleted {
            bin_id: bin_id.clone(),
        });
        Ok(bin_id)
    }

    /// Drop the selected bin's lines and release it.
    pub fn discard_bin(&mut self) -> Result<usize> {
        let bin_id = self
            .draft
            .selected_bin()
            .map(str::to_string)
            .ok_or_else(|| PutawayError::Validation("No bin selected".into()))?;
        let removed = self.draft.reset(ResetScope::CurrentBin);
        self.autosave();
        self.emit(SessionEvent::BinDiscarded { bin_id, removed });
        self.draft_changed();
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Finish
    // -----------------------------------------------------------------------

    /// Submit the draft as one task.
    ///
    /// The snapshot is re-fetched and every bin re-checked first. On
    /// success the draft is cleared and the snapshot fetched again; on any
    /// failure the draft is left as it was, except that lines a stopped
    /// legacy submission already saved are removed from it.
    pub async fn finish_task(&mut self) -> Result<SubmitOutcome> {
        self.draft.ensure_finishable()?;
        self.refresh().await?;
        self.draft.recheck(&self.master.bins, &self.snapshot)?;

        let user_id = self.user.as_ref().map(|u| u.id.clone()).unwrap_or_default();
        let submission = sync::submit(
            &self.store,
            self.config.submit_strategy,
            &self.device_id,
            &user_id,
            self.draft.lines(),
        )
        .await?;

        match submission {
            Submission::Done(outcome) => {
                self.draft.reset(ResetScope::All);
                if let Some(local) = &self.local {
                    if let Err(e) = local.clear_draft() {
                        warn!(error = %e, "Failed to clear draft autosave");
                    }
                }
                self.emit(SessionEvent::TaskSubmitted {
                    outcome: outcome.clone(),
                });
                self.draft_changed();
                if let Err(e) = self.refresh().await {
                    warn!(error = %e, "Refresh after submission failed");
                }
                Ok(outcome)
            }
            Submission::Partial(report) => {
                for line_id in &report.saved {
                    if let Err(e) = self.draft.delete_line(line_id) {
                        warn!(line_id = %line_id, error = %e, "Saved line missing from draft");
                    }
                }
                self.autosave();
                let failure = report.failure.unwrap_or_else(|| {
                    PutawayError::Backend("submission stopped without an error".into())
                });
                self.emit(SessionEvent::SubmissionStopped {
                    saved: report.saved.len(),
                    remaining: self.draft.lines().len(),
                    reason: failure.to_string(),
                });
                let refreshed = self.refresh().await.map(|_| ());
                match refreshed {
                    Ok(()) => {
                        if let Err(e) = self.draft.recapture(&self.master.bins, &self.snapshot) {
                            warn!(error = %e, "Bin usage recapture after partial submission failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "Refresh after partial submission failed"),
                }
                self.draft_changed();
                Err(failure)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{AppConfig, SubmitStrategy};
    use crate::db::LocalStore;
    use crate::error::PutawayError;
    use crate::fake_store::{line, task, FakeStore};
    use crate::master_data::{BinCatalog, MasterData};
    use crate::model::{AppSnapshot, TaskStatus};
    use crate::session::{Session, SessionEvent};
    use chrono::Utc;
    use std::collections::HashMap;

    fn session_with(store: FakeStore, config: AppConfig) -> Session<FakeStore> {
        let mut s = Session::new(store, config);
        s.set_master_data(MasterData {
            bins: BinCatalog::from_map(HashMap::from([
                ("B1".to_string(), 10),
                ("B2".to_string(), 5),
            ])),
            ..MasterData::default()
        });
        s
    }

    fn session(store: FakeStore) -> Session<FakeStore> {
        session_with(store, AppConfig::new("http://localhost/exec"))
    }

    #[tokio::test]
    async fn test_worked_example_through_handlers() {
        let mut s = session(FakeStore::new());
        s.select_bin("B1").await.unwrap();
        let first = s.add_line("SKU1", 7, None).await.unwrap();

        match s.add_line("SKU2", 4, None).await {
            Err(PutawayError::CapacityExceeded {
                used,
                capacity,
                free,
                ..
            }) => assert_eq!((used, capacity, free), (7, 10, 3)),
            other => panic!("expected CapacityExceeded, got {other:?}"),
        }
        s.edit_line(&first.id, "SKU1", 10, None).unwrap();
        assert_eq!(s.draft().summary().total_qty, 10);
    }

    #[tokio::test]
    async fn test_local_errors_never_reach_network() {
        let store = FakeStore::new();
        let mut s = session(store);
        assert!(matches!(
            s.select_bin("NOPE").await,
            Err(PutawayError::InvalidBin(_))
        ));
        assert!(s.add_line("SKU", 1, None).await.is_err());
        assert!(s.finish_task().await.is_err());
        assert!(s.login("  ").await.is_err());
        assert!(s.store().calls().is_empty());

        s.select_bin("B1").await.unwrap();
        let calls = s.store().calls().len();
        assert!(s.add_line("SKU", 0, None).await.is_err());
        assert!(s.select_bin("B2").await.is_err());
        assert_eq!(s.store().calls().len(), calls);
    }

    #[tokio::test]
    async fn test_add_line_sees_lines_saved_elsewhere() {
        let store = FakeStore::with_snapshot(AppSnapshot {
            tasks: vec![task("T0", TaskStatus::Open, Utc::now())],
            lines: vec![],
        });
        let mut s = session(store);
        s.select_bin("B2").await.unwrap();
        s.add_line("A", 2, None).await.unwrap();

        // Another station fills the bin after our selection.
        s.store().push_line("T0", "B2", "X", 3);
        assert!(matches!(
            s.add_line("A", 1, None).await,
            Err(PutawayError::CapacityExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_finish_task_clears_and_refreshes() {
        let local = LocalStore::open_in_memory().unwrap();
        let mut s = session(FakeStore::new());
        s.attach_local_store(local).unwrap();
        let mut rx = s.subscribe();

        s.select_bin("B1").await.unwrap();
        s.add_line("A", 3, Some("fragile")).await.unwrap();
        s.complete_bin().unwrap();
        s.select_bin("B2").await.unwrap();
        s.add_line("B", 2, None).await.unwrap();

        let outcome = s.finish_task().await.unwrap();
        assert_eq!(outcome.line_count, 2);
        assert_eq!(outcome.total_qty, 5);
        assert!(s.draft().is_empty());
        assert_eq!(s.draft().selected_bin(), None);
        assert_eq!(s.snapshot().lines_for_task(&outcome.task_id).count(), 2);
        assert!(s.local.as_ref().unwrap().load_draft().unwrap().is_empty());

        let mut submitted = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::TaskSubmitted { .. }) {
                submitted = true;
            }
        }
        assert!(submitted);
    }

    #[tokio::test]
    async fn test_failed_submission_keeps_draft() {
        let local = LocalStore::open_in_memory().unwrap();
        let mut s = session(FakeStore::new());
        s.attach_local_store(local).unwrap();
        s.select_bin("B1").await.unwrap();
        s.add_line("A", 3, None).await.unwrap();

        s.store().fail_action("createTaskWithLines");
        assert!(matches!(
            s.finish_task().await,
            Err(PutawayError::Backend(_))
        ));
        assert_eq!(s.draft().lines().len(), 1);
        assert_eq!(s.local.as_ref().unwrap().load_draft().unwrap().len(), 1);

        s.store().set_offline(true);
        assert!(matches!(
            s.finish_task().await,
            Err(PutawayError::Transport(_))
        ));
        assert_eq!(s.draft().lines().len(), 1);
    }

    #[tokio::test]
    async fn test_finish_rechecks_capacity() {
        let store = FakeStore::with_snapshot(AppSnapshot {
            tasks: vec![task("T0", TaskStatus::Open, Utc::now())],
            lines: vec![line("L0", "T0", "B2", "X", 1)],
        });
        let mut s = session(store);
        s.select_bin("B2").await.unwrap();
        s.add_line("A", 4, None).await.unwrap();
        s.store().push_line("T0", "B2", "X", 1);

        assert!(matches!(
            s.finish_task().await,
            Err(PutawayError::CapacityExceeded { .. })
        ));
        assert!(!s.store().calls().contains(&"createTaskWithLines".to_string()));
        assert_eq!(s.draft().lines().len(), 1);
    }

    #[tokio::test]
    async fn test_incremental_partial_failure_trims_saved_lines() {
        let mut config = AppConfig::new("http://localhost/exec");
        config.submit_strategy = SubmitStrategy::Incremental;
        config.refresh_before_add = false;
        let mut s = session_with(FakeStore::new(), config);
        s.select_bin("B1").await.unwrap();
        s.add_line("A", 1, None).await.unwrap();
        s.add_line("B", 2, None).await.unwrap();
        s.add_line("C", 3, None).await.unwrap();

        s.store().fail_after_saves(2);
        assert!(matches!(
            s.finish_task().await,
            Err(PutawayError::Backend(_))
        ));
        let left: Vec<&str> = s.draft().lines().iter().map(|l| l.sku_id.as_str()).collect();
        assert_eq!(left, vec!["C"]);
        // The two saved lines are now committed remotely and count against B1.
        assert_eq!(s.snapshot().lines.len(), 2);
    }

    #[tokio::test]
    async fn test_edit_after_partial_submission_counts_saved_lines() {
        let mut config = AppConfig::new("http://localhost/exec");
        config.submit_strategy = SubmitStrategy::Incremental;
        config.refresh_before_add = false;
        let mut s = session_with(FakeStore::new(), config);
        s.select_bin("B1").await.unwrap();
        s.add_line("A", 1, None).await.unwrap();
        s.add_line("B", 2, None).await.unwrap();
        let remaining = s.add_line("C", 3, None).await.unwrap();

        s.store().fail_after_saves(2);
        assert!(s.finish_task().await.is_err());
        assert_eq!(s.draft().bin_usage("B1").unwrap().used_remote, 3);

        // 3 committed + 10 would overfill a bin of 10.
        assert!(matches!(
            s.edit_line(&remaining.id, "C", 10, None),
            Err(PutawayError::CapacityExceeded { .. })
        ));
        s.edit_line(&remaining.id, "C", 7, None).unwrap();
        assert!(matches!(
            s.add_line("D", 1, None).await,
            Err(PutawayError::CapacityExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_incremental_success_opens_task() {
        let mut config = AppConfig::new("http://localhost/exec");
        config.submit_strategy = SubmitStrategy::Incremental;
        let mut s = session_with(FakeStore::new(), config);
        s.login("1234").await.unwrap();
        s.select_bin("B1").await.unwrap();
        s.add_line("A", 1, None).await.unwrap();
        let outcome = s.finish_task().await.unwrap();
        assert_eq!(
            s.snapshot().task(&outcome.task_id).unwrap().status,
            TaskStatus::Open
        );
        assert!(s.draft().is_empty());
    }

    #[tokio::test]
    async fn test_discard_bin_and_login_logout() {
        let local = LocalStore::open_in_memory().unwrap();
        let mut s = session(FakeStore::new());
        s.attach_local_store(local).unwrap();

        let user = s.login("1234").await.unwrap();
        assert_eq!(user.display_name(), "Dana");
        assert_eq!(s.local.as_ref().unwrap().load_user().unwrap(), Some(user));
        assert!(matches!(
            s.login("0000").await,
            Err(PutawayError::Backend(_))
        ));
        assert!(s.user().is_some());

        s.select_bin("B1").await.unwrap();
        s.add_line("A", 1, None).await.unwrap();
        s.add_line("B", 1, None).await.unwrap();
        assert_eq!(s.discard_bin().unwrap(), 2);
        assert!(s.discard_bin().is_err());
        assert!(s.complete_bin().is_err());

        s.logout().unwrap();
        assert!(s.user().is_none());
        assert_eq!(s.local.as_ref().unwrap().load_user().unwrap(), None);
    }
}
