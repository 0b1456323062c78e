//! Pushes finished drafts and status changes to the remote store.
//!
//! Nothing here touches the draft buffer: callers clear (or trim) it only
//! after looking at the outcome. Status transitions are validated against
//! the snapshot before any request is sent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::api::RemoteStore;
use crate::config::SubmitStrategy;
use crate::error::{PutawayError, Result};
use crate::model::{AppSnapshot, DraftLine, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub task_id: String,
    pub code: Option<String>,
    pub line_count: usize,
    pub total_qty: u64,
}

impl SubmitOutcome {
    pub fn label(&self) -> &str {
        self.code.as_deref().unwrap_or(&self.task_id)
    }
}

/// Result of the legacy per-line submission. `saved` lists the draft line
/// ids the backend accepted before `failure`, in submission order.
#[derive(Debug)]
pub struct IncrementalReport {
    pub task_id: Option<String>,
    pub saved: Vec<String>,
    pub outcome: Option<SubmitOutcome>,
    pub failure: Option<PutawayError>,
}

// ---------------------------------------------------------------------------
// Draft submission
// ---------------------------------------------------------------------------

fn totals(lines: &[DraftLine]) -> (usize, u64) {
    (lines.len(), lines.iter().map(|l| u64::from(l.qty)).sum())
}

fn ensure_lines(lines: &[DraftLine]) -> Result<()> {
    if lines.is_empty() {
        return Err(PutawayError::Validation(
            "No lines in this task yet; add at least one line before finishing".into(),
        ));
    }
    Ok(())
}

/// Create one `OPEN` task holding every draft line.
pub async fn submit_batch<S: RemoteStore + ?Sized>(
    store: &S,
    device_id: &str,
    created_at: DateTime<Utc>,
    lines: &[DraftLine],
) -> Result<SubmitOutcome> {
    ensure_lines(lines)?;
    let (line_count, total_qty) = totals(lines);

    let created = store
        .create_task_with_lines(device_id, created_at, lines)
        .await
        .inspect_err(|e| warn!(device_id, lines = line_count, error = %e, "Batch submission failed"))?;

    info!(
        task_id = %created.task_id,
        code = created.code.as_deref().unwrap_or(""),
        lines = line_count,
        units = total_qty,
        "Task submitted"
    );
    Ok(SubmitOutcome {
        task_id: created.task_id,
        code: created.code,
        line_count,
        total_qty,
    })
}

/// Legacy strategy: `saveLine` for each line in order, then move the
/// device's `IN_PROGRESS` task to `OPEN`. Stops at the first failure.
pub async fn submit_incremental<S: RemoteStore + ?Sized>(
    store: &S,
    device_id: &str,
    user_id: &str,
    lines: &[DraftLine],
) -> Result<IncrementalReport> {
    ensure_lines(lines)?;

    let mut report = IncrementalReport {
        task_id: None,
        saved: Vec::with_capacity(lines.len()),
        outcome: None,
        failure: None,
    };

    for line in lines {
        match store
            .save_line(device_id, user_id, &line.bin_id, &line.sku_id, line.qty)
            .await
        {
            Ok(saved) => {
                report.task_id.get_or_insert(saved.task_id);
                report.saved.push(line.id.clone());
            }
            Err(e) => {
                warn!(
                    line_id = %line.id,
                    saved = report.saved.len(),
                    remaining = lines.len() - report.saved.len(),
                    error = %e,
                    "Incremental submission stopped"
                );
                report.failure = Some(e);
                return Ok(report);
            }
        }
    }

    let Some(task_id) = report.task_id.clone() else {
        report.failure = Some(PutawayError::Backend(
            "saveLine did not return a task id".into(),
        ));
        return Ok(report);
    };

    match store
        .update_task_status(&task_id, TaskStatus::Open, None)
        .await
    {
        Ok(update) => {
            let (line_count, total_qty) = totals(lines);
            info!(task_id = %task_id, lines = line_count, units = total_qty, "Task opened");
            report.outcome = Some(SubmitOutcome {
                task_id,
                code: update.code,
                line_count,
                total_qty,
            });
        }
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Lines saved but task could not be opened");
            report.failure = Some(e);
        }
    }
    Ok(report)
}

/// Outcome of [`submit`] under either strategy.
#[derive(Debug)]
pub enum Submission {
    Done(SubmitOutcome),
    /// Incremental submission that stopped part-way.
    Partial(IncrementalReport),
}

pub async fn submit<S: RemoteStore + ?Sized>(
    store: &S,
    strategy: SubmitStrategy,
    device_id: &str,
    user_id: &str,
    lines: &[DraftLine],
) -> Result<Submission> {
    match strategy {
        SubmitStrategy::Batch => submit_batch(store, device_id, Utc::now(), lines)
            .await
            .map(Submission::Done),
        SubmitStrategy::Incremental => {
            let mut report = submit_incremental(store, device_id, user_id, lines).await?;
            match (report.outcome.take(), report.failure.is_some()) {
                (Some(outcome), false) => Ok(Submission::Done(outcome)),
                (outcome, _) => {
                    report.outcome = outcome;
                    Ok(Submission::Partial(report))
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Status changes
// ---------------------------------------------------------------------------

/// Check a transition against the snapshot without touching the network.
pub fn validate_transition(snapshot: &AppSnapshot, task_id: &str, to: TaskStatus) -> Result<()> {
    let task = snapshot
        .task(task_id)
        .ok_or_else(|| PutawayError::not_found("Task", task_id))?;
    if !task.status.can_transition_to(to) {
        return Err(PutawayError::InvalidTransition {
            task_id: task_id.to_string(),
            from: task.status.to_string(),
            to: to.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseFailure {
    pub task_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseTally {
    pub closed: Vec<String>,
    pub failed: Vec<CloseFailure>,
}

impl CloseTally {
    pub fn succeeded(&self) -> usize {
        self.closed.len()
    }

    pub fn failures(&self) -> usize {
        self.failed.len()
    }
}

/// Close each task in turn. A failure is recorded and the loop moves on.
/// An id repeated in `task_ids` is attempted once; later copies are
/// recorded as failures without a request.
pub async fn close_tasks<S: RemoteStore + ?Sized>(
    store: &S,
    snapshot: &AppSnapshot,
    task_ids: &[String],
    closed_by: Option<&str>,
) -> CloseTally {
    let mut tally = CloseTally::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for task_id in task_ids {
        let result = if !seen.insert(task_id.as_str()) {
            Err(PutawayError::Validation(format!(
                "Task {task_id} is listed more than once"
            )))
        } else {
            match validate_transition(snapshot, task_id, TaskStatus::Closed) {
                Ok(()) => store
                    .update_task_status(task_id, TaskStatus::Closed, closed_by)
                    .await
                    .map(|_| ()),
                Err(e) => Err(e),
            }
        };
        match result {
            Ok(()) => tally.closed.push(task_id.clone()),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Task close failed");
                tally.failed.push(CloseFailure {
                    task_id: task_id.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    info!(
        requested = task_ids.len(),
        closed = tally.succeeded(),
        failed = tally.failures(),
        "Bulk close finished"
    );
    tally
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_store::{task, FakeStore};

    fn draft(id: &str, bin: &str, qty: u32) -> DraftLine {
        DraftLine {
            id: id.into(),
            bin_id: bin.into(),
            sku_id: "SKU".into(),
            qty,
            remarks: None,
            scanned_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_batch_creates_one_task() {
        let store = FakeStore::new();
        let lines = vec![draft("d1", "A1", 3), draft("d2", "A2", 4)];
        let outcome = submit_batch(&store, "dev-1", Utc::now(), &lines).await.unwrap();
        assert_eq!(outcome.line_count, 2);
        assert_eq!(outcome.total_qty, 7);
        assert_eq!(store.calls(), vec!["createTaskWithLines"]);

        let remote = store.snapshot();
        assert_eq!(remote.tasks[0].status, TaskStatus::Open);
        assert_eq!(remote.lines_for_task(&outcome.task_id).count(), 2);
    }

    #[tokio::test]
    async fn test_batch_failure_is_returned() {
        let store = FakeStore::new();
        store.fail_action("createTaskWithLines");
        let err = submit_batch(&store, "dev-1", Utc::now(), &[draft("d1", "A1", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, PutawayError::Backend(_)));
        assert!(store.snapshot().tasks.is_empty());
    }

    #[tokio::test]
    async fn test_empty_draft_never_reaches_store() {
        let store = FakeStore::new();
        assert!(submit_batch(&store, "dev-1", Utc::now(), &[]).await.is_err());
        assert!(submit_incremental(&store, "dev-1", "u", &[]).await.is_err());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_incremental_opens_device_task() {
        let store = FakeStore::new();
        let lines = vec![draft("d1", "A1", 3), draft("d2", "A1", 2)];
        let report = submit_incremental(&store, "dev-1", "u-1", &lines).await.unwrap();
        assert!(report.failure.is_none());
        assert_eq!(report.saved, vec!["d1", "d2"]);
        let outcome = report.outcome.unwrap();
        assert_eq!(outcome.total_qty, 5);
        assert_eq!(
            store.calls(),
            vec!["saveLine", "saveLine", "updateTaskStatus"]
        );
        assert_eq!(store.snapshot().tasks[0].status, TaskStatus::Open);
    }

    #[tokio::test]
    async fn test_incremental_stops_at_first_failure() {
        let store = FakeStore::new();
        store.fail_after_saves(1);
        let lines = vec![draft("d1", "A1", 1), draft("d2", "A1", 1), draft("d3", "A1", 1)];
        let report = submit_incremental(&store, "dev-1", "u-1", &lines).await.unwrap();
        assert_eq!(report.saved, vec!["d1"]);
        assert!(report.outcome.is_none());
        assert!(matches!(report.failure, Some(PutawayError::Backend(_))));
        assert_eq!(store.calls(), vec!["saveLine", "saveLine"]);

        let submission = submit(&store, SubmitStrategy::Incremental, "dev-2", "u", &lines)
            .await
            .unwrap();
        assert!(matches!(submission, Submission::Partial(_)));
    }

    #[tokio::test]
    async fn test_close_tasks_tallies_failures() {
        let now = Utc::now();
        let snapshot = AppSnapshot {
            tasks: vec![
                task("1", TaskStatus::Open, now),
                task("2", TaskStatus::Open, now),
                task("3", TaskStatus::Closed, now),
                task("4", TaskStatus::Open, now),
            ],
            lines: vec![],
        };
        let store = FakeStore::with_snapshot(snapshot.clone());
        store.fail_task("2");

        let ids: Vec<String> = ["1", "2", "3", "4", "9"].iter().map(|s| s.to_string()).collect();
        let tally = close_tasks(&store, &snapshot, &ids, Some("Dana")).await;

        assert_eq!(tally.closed, vec!["1", "4"]);
        assert_eq!(tally.failures(), 3);
        // Already closed and unknown ids never reach the store.
        assert_eq!(
            store.calls().iter().filter(|c| *c == "updateTaskStatus").count(),
            3
        );
        assert!(tally.failed[1].message.contains("cannot move from CLOSED"));
        assert!(tally.failed[2].message.contains("not found"));
        let closed = store.snapshot();
        assert_eq!(closed.task("1").unwrap().closed_by.as_deref(), Some("Dana"));
    }

    #[tokio::test]
    async fn test_close_tasks_sends_repeated_id_once() {
        let now = Utc::now();
        let snapshot = AppSnapshot {
            tasks: vec![task("1", TaskStatus::Open, now)],
            lines: vec![],
        };
        let store = FakeStore::with_snapshot(snapshot.clone());

        let ids = vec!["1".to_string(), "1".to_string()];
        let tally = close_tasks(&store, &snapshot, &ids, Some("Dana")).await;

        assert_eq!(tally.closed, vec!["1"]);
        assert_eq!(tally.failures(), 1);
        assert!(tally.failed[0].message.contains("more than once"));
        assert_eq!(
            store.calls().iter().filter(|c| *c == "updateTaskStatus").count(),
            1
        );
    }
}
