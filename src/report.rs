//! Supervisor views over a fetched snapshot.
//!
//! All functions are pure. "Today" and report dates are calendar days in
//! the configured UTC offset, so a task created at 23:30 local time counts
//! for that local day regardless of the UTC date.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::model::{AppSnapshot, Line, Task, TaskStatus};

/// Calendar day of `ts` in `offset`.
pub fn local_date(ts: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    ts.with_timezone(&offset).date_naive()
}

/// Today's calendar day in `offset`.
pub fn today(offset: FixedOffset) -> NaiveDate {
    local_date(Utc::now(), offset)
}

// ---------------------------------------------------------------------------
// Task listings
// ---------------------------------------------------------------------------

/// One row of a task listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub task_id: String,
    pub code: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
    pub line_count: usize,
    pub total_qty: u64,
    /// Whole calendar days since creation, for open tasks.
    pub age_days: Option<i64>,
}

impl TaskSummary {
    pub fn label(&self) -> &str {
        self.code.as_deref().unwrap_or(&self.task_id)
    }
}

/// Line count and units of one task.
pub fn task_lines_summary(snapshot: &AppSnapshot, task_id: &str) -> (usize, u64) {
    snapshot
        .lines_for_task(task_id)
        .fold((0, 0), |(n, units), l| (n + 1, units + u64::from(l.qty)))
}

fn summarize(snapshot: &AppSnapshot, task: &Task, age_days: Option<i64>) -> TaskSummary {
    let (line_count, total_qty) = task_lines_summary(snapshot, &task.id);
    TaskSummary {
        task_id: task.id.clone(),
        code: task.code.clone(),
        status: task.status,
        created_at: task.created_at,
        closed_at: task.closed_at,
        closed_by: task.closed_by.clone(),
        line_count,
        total_qty,
        age_days,
    }
}

fn open_tasks(snapshot: &AppSnapshot) -> impl Iterator<Item = &Task> {
    snapshot
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Open)
}

fn open_where(
    snapshot: &AppSnapshot,
    today: NaiveDate,
    offset: FixedOffset,
    keep: impl Fn(NaiveDate) -> bool,
) -> Vec<TaskSummary> {
    let mut rows: Vec<TaskSummary> = open_tasks(snapshot)
        .filter_map(|t| {
            let created = local_date(t.created_at, offset);
            keep(created).then(|| summarize(snapshot, t, Some((today - created).num_days())))
        })
        .collect();
    rows.sort_by_key(|r| r.created_at);
    rows
}

/// `OPEN` tasks created on `today`.
pub fn open_today(snapshot: &AppSnapshot, today: NaiveDate, offset: FixedOffset) -> Vec<TaskSummary> {
    open_where(snapshot, today, offset, |created| created == today)
}

/// Every `OPEN` task, oldest first, with its age in days.
pub fn all_open(snapshot: &AppSnapshot, today: NaiveDate, offset: FixedOffset) -> Vec<TaskSummary> {
    open_where(snapshot, today, offset, |_| true)
}

/// `OPEN` tasks created before `today`.
pub fn pending_old(snapshot: &AppSnapshot, today: NaiveDate, offset: FixedOffset) -> Vec<TaskSummary> {
    open_where(snapshot, today, offset, |created| created < today)
}

/// The `n` most recently closed tasks, newest first. Tasks without a
/// close time sort last.
pub fn recent_closed(snapshot: &AppSnapshot, n: usize) -> Vec<TaskSummary> {
    let mut closed: Vec<&Task> = snapshot
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Closed)
        .collect();
    closed.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
    closed
        .into_iter()
        .take(n)
        .map(|t| summarize(snapshot, t, None))
        .collect()
}

/// Lines of a task, in snapshot order.
pub fn lines_for_task<'a>(snapshot: &'a AppSnapshot, task_id: &str) -> Vec<&'a Line> {
    snapshot.lines.iter().filter(|l| l.task_id == task_id).collect()
}

// ---------------------------------------------------------------------------
// Daily unit report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    pub date: NaiveDate,
    pub task_count: usize,
    /// Units per SKU, ordered by SKU id.
    pub by_sku: BTreeMap<String, u64>,
    pub total: u64,
}

impl DailyReport {
    pub fn is_empty(&self) -> bool {
        self.by_sku.is_empty()
    }
}

/// Units per SKU across tasks closed on `date`.
pub fn daily_report(snapshot: &AppSnapshot, date: NaiveDate, offset: FixedOffset) -> DailyReport {
    let closed_ids: Vec<&str> = snapshot
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Closed)
        .filter(|t| t.closed_at.is_some_and(|ts| local_date(ts, offset) == date))
        .map(|t| t.id.as_str())
        .collect();

    let mut by_sku: BTreeMap<String, u64> = BTreeMap::new();
    for line in snapshot
        .lines
        .iter()
        .filter(|l| closed_ids.contains(&l.task_id.as_str()))
    {
        *by_sku.entry(line.sku_id.clone()).or_default() += u64::from(line.qty);
    }
    let total = by_sku.values().sum();

    DailyReport {
        date,
        task_count: closed_ids.len(),
        by_sku,
        total,
    }
}
