//! Supervisor handlers. Every view re-fetches the snapshot first.

use chrono::NaiveDate;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::api::RemoteStore;
use crate::capacity::BinUsage;
use crate::config::DEFAULT_RECENT_CLOSED;
use crate::csv_export::{self, ExportSelection};
use crate::draft;
use crate::error::{PutawayError, Result};
use crate::model::{Line, TaskStatus};
use crate::report::{self, DailyReport, TaskSummary};
use crate::session::{Session, SessionEvent};
use crate::sync::{self, CloseTally};

impl<S: RemoteStore> Session<S> {
    /// Today in the configured offset.
    pub fn today(&self) -> NaiveDate {
        report::today(self.config.utc_offset)
    }

    pub async fn open_today(&mut self) -> Result<Vec<TaskSummary>> {
        self.refresh().await?;
        Ok(report::open_today(
            &self.snapshot,
            self.today(),
            self.config.utc_offset,
        ))
    }

    pub async fn all_open(&mut self) -> Result<Vec<TaskSummary>> {
        self.refresh().await?;
        Ok(report::all_open(
            &self.snapshot,
            self.today(),
            self.config.utc_offset,
        ))
    }

    pub async fn pending_old(&mut self) -> Result<Vec<TaskSummary>> {
        self.refresh().await?;
        Ok(report::pending_old(
            &self.snapshot,
            self.today(),
            self.config.utc_offset,
        ))
    }

    pub async fn recent_closed(&mut self, n: Option<usize>) -> Result<Vec<TaskSummary>> {
        self.refresh().await?;
        Ok(report::recent_closed(
            &self.snapshot,
            n.unwrap_or(DEFAULT_RECENT_CLOSED),
        ))
    }

    /// Units per SKU for tasks closed on `date` (today when `None`).
    pub async fn daily_report(&mut self, date: Option<NaiveDate>) -> Result<DailyReport> {
        self.refresh().await?;
        let date = date.unwrap_or_else(|| self.today());
        Ok(report::daily_report(
            &self.snapshot,
            date,
            self.config.utc_offset,
        ))
    }

    /// Lines of one task from a fresh snapshot.
    pub async fn task_lines(&mut self, task_id: &str) -> Result<Vec<Line>> {
        self.refresh().await?;
        if self.snapshot.task(task_id).is_none() {
            return Err(PutawayError::not_found("Task", task_id));
        }
        Ok(report::lines_for_task(&self.snapshot, task_id)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Close each task in turn, recording failures without stopping.
    pub async fn close_tasks(&mut self, task_ids: &[String]) -> Result<CloseTally> {
        if task_ids.is_empty() {
            return Err(PutawayError::Validation("No tasks selected".into()));
        }
        self.refresh().await?;
        let tally = sync::close_tasks(&self.store, &self.snapshot, task_ids, self.actor()).await;
        self.emit(SessionEvent::TasksClosed {
            tally: tally.clone(),
        });
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Refresh after bulk close failed");
        }
        Ok(tally)
    }

    /// Change a committed line's quantity. Increases are checked against
    /// the bin's capacity, counting this station's draft too.
    pub async fn update_remote_line(&mut self, line_id: &str, qty: i64) -> Result<Line> {
        let qty = draft::validate_qty(qty)?;
        self.refresh().await?;
        let line = self
            .snapshot
            .line(line_id)
            .cloned()
            .ok_or_else(|| PutawayError::not_found("Line", line_id))?;
        self.ensure_task_editable(&line.task_id)?;

        if qty > line.qty {
            BinUsage::compute(
                &self.master.bins,
                &self.snapshot,
                self.draft.lines(),
                &line.bin_id,
            )?
            .check(qty - line.qty)?;
        }

        self.store.update_line(line_id, qty).await?;
        info!(line_id, from = line.qty, to = qty, "Remote line updated");
        self.emit(SessionEvent::RemoteLineUpdated {
            line_id: line_id.to_string(),
            qty,
        });
        self.refresh().await?;
        Ok(Line { qty, ..line })
    }

    pub async fn delete_remote_line(&mut self, line_id: &str) -> Result<Line> {
        self.refresh().await?;
        let line = self
            .snapshot
            .line(line_id)
            .cloned()
            .ok_or_else(|| PutawayError::not_found("Line", line_id))?;
        self.ensure_task_editable(&line.task_id)?;

        self.store.delete_line(line_id).await?;
        info!(line_id, task_id = %line.task_id, "Remote line deleted");
        self.emit(SessionEvent::RemoteLineDeleted {
            line_id: line_id.to_string(),
        });
        self.refresh().await?;
        Ok(line)
    }

    fn ensure_task_editable(&self, task_id: &str) -> Result<()> {
        match self.snapshot.task(task_id) {
            Some(task) if task.status == TaskStatus::Closed => Err(PutawayError::Validation(
                format!("Task {} is closed; its lines cannot change", task.label()),
            )),
            _ => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Exports
    // -----------------------------------------------------------------------

    /// Write the lines of `task_ids` to the export directory. A single task
    /// goes to `task_<code>.csv`, several to `tasks_<date>.csv`.
    pub async fn export_tasks(&mut self, task_ids: &[String]) -> Result<PathBuf> {
        if task_ids.is_empty() {
            return Err(PutawayError::Validation("No tasks selected".into()));
        }
        self.refresh().await?;
        let filename = match task_ids {
            [only] => {
                let task = self
                    .snapshot
                    .task(only)
                    .ok_or_else(|| PutawayError::not_found("Task", only.as_str()))?;
                csv_export::task_filename(task.label())
            }
            _ => csv_export::tasks_filename(self.today()),
        };
        let csv = csv_export::to_csv(&self.snapshot, ExportSelection::Tasks(task_ids));
        let path = csv_export::write_export(&self.config.export_dir, &filename, &csv)?;
        self.emit(SessionEvent::Exported { path: path.clone() });
        Ok(path)
    }

    pub async fn export_daily_report(&mut self, date: Option<NaiveDate>) -> Result<PathBuf> {
        let report = self.daily_report(date).await?;
        let csv = csv_export::daily_report_csv(&report);
        let path = csv_export::write_export(
            &self.config.export_dir,
            &csv_export::report_filename(report.date),
            &csv,
        )?;
        self.emit(SessionEvent::Exported { path: path.clone() });
        Ok(path)
    }
}
