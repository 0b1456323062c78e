//! CSV flattening of tasks, lines and daily reports.
//!
//! Fields containing a comma, a double quote or a line break are wrapped in
//! quotes with inner quotes doubled. Rows are joined with `\n`.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::model::{AppSnapshot, Line, Task};
use crate::report::DailyReport;

const LINE_COLUMNS: [&str; 7] = [
    "task_code",
    "bin_id",
    "sku_id",
    "qty",
    "remarks",
    "scanned_at",
    "closed_at",
];

/// Which lines to export.
#[derive(Debug, Clone)]
pub enum ExportSelection<'a> {
    /// Every line of the given tasks, task by task.
    Tasks(&'a [String]),
    /// An explicit list of lines.
    Lines(&'a [Line]),
}

pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_row<I, S>(cells: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    cells
        .into_iter()
        .map(|c| csv_field(c.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

fn timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn line_row(task: Option<&Task>, line: &Line) -> String {
    let code = task.map(Task::label).unwrap_or(line.task_id.as_str());
    csv_row([
        code.to_string(),
        line.bin_id.clone(),
        line.sku_id.clone(),
        line.qty.to_string(),
        line.remarks.clone().unwrap_or_default(),
        timestamp(line.scanned_at),
        timestamp(task.and_then(|t| t.closed_at)),
    ])
}

/// Header plus one row per selected line.
pub fn to_csv_rows(snapshot: &AppSnapshot, selection: ExportSelection<'_>) -> Vec<String> {
    let mut rows = vec![LINE_COLUMNS.join(",")];
    match selection {
        ExportSelection::Tasks(task_ids) => {
            for task_id in task_ids {
                let task = snapshot.task(task_id);
                rows.extend(snapshot.lines_for_task(task_id).map(|l| line_row(task, l)));
            }
        }
        ExportSelection::Lines(lines) => {
            rows.extend(lines.iter().map(|l| line_row(snapshot.task(&l.task_id), l)));
        }
    }
    rows
}

pub fn to_csv(snapshot: &AppSnapshot, selection: ExportSelection<'_>) -> String {
    to_csv_rows(snapshot, selection).join("\n")
}

pub fn daily_report_csv(report: &DailyReport) -> String {
    let mut rows = vec![csv_row(["date", "sku_id", "qty"])];
    let date = report.date.to_string();
    for (sku, qty) in &report.by_sku {
        rows.push(csv_row([date.clone(), sku.clone(), qty.to_string()]));
    }
    rows.push(csv_row([date, "TOTAL".to_string(), report.total.to_string()]));
    rows.join("\n")
}

// ---------------------------------------------------------------------------
// File naming
// ---------------------------------------------------------------------------

/// Keep filenames portable: anything outside `[A-Za-z0-9._-]` becomes `_`.
fn safe_name(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn task_filename(label: &str) -> String {
    format!("task_{}.csv", safe_name(label))
}

pub fn tasks_filename(date: NaiveDate) -> String {
    format!("tasks_{date}.csv")
}

pub fn report_filename(date: NaiveDate) -> String {
    format!("report_{date}.csv")
}

/// Write `contents` to `dir/filename`, creating `dir` when needed.
pub fn write_export(dir: &Path, filename: &str, contents: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(filename);
    fs::write(&path, contents)?;
    info!(path = %path.display(), bytes = contents.len(), "Export written");
    Ok(path)
}
