//! Command-line surface of the `putaway` binary.
//!
//! Every setting is a flag with an environment fallback. Supervisor views
//! are one-shot subcommands; `putaway scan` runs the interactive station,
//! reading one scanned code or command per line from stdin.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::info;

use crate::api::{HttpRemoteStore, RemoteStore};
use crate::config::{self, AppConfig, SkuCasePolicy, SubmitStrategy};
use crate::db;
use crate::diagnostics;
use crate::draft;
use crate::error::PutawayError;
use crate::master_data::SkuCatalog;
use crate::report::{DailyReport, TaskSummary};
use crate::session::{Session, SessionEvent};
use crate::sync::CloseTally;

/// Warehouse put-away tracker.
#[derive(Debug, Parser)]
#[command(name = "putaway")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Task store endpoint.
    #[arg(long, env = "PUTAWAY_API_URL", default_value = "")]
    pub api_url: String,

    /// Bin master file (`bin_id,capacity`).
    #[arg(long, env = "PUTAWAY_BINS_FILE", default_value = "bins.csv")]
    pub bins_file: PathBuf,

    /// SKU master file (`sku_id,sku_name`), optional.
    #[arg(long, env = "PUTAWAY_SKUS_FILE", default_value = "sku_master.csv")]
    pub skus_file: PathBuf,

    /// Directory for the local database and logs.
    #[arg(long, env = "PUTAWAY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Directory CSV exports are written to.
    #[arg(long, env = "PUTAWAY_EXPORT_DIR", default_value = ".")]
    pub export_dir: PathBuf,

    /// SKU id normalization.
    #[arg(long, env = "PUTAWAY_SKU_CASE", value_enum, default_value_t = SkuCasePolicy::Upper)]
    pub sku_case: SkuCasePolicy,

    /// Accept any bin with this capacity when the bins file is missing.
    #[arg(
        long,
        env = "PUTAWAY_FALLBACK_CAPACITY",
        num_args = 0..=1,
        default_missing_value = DEFAULT_FALLBACK_CAPACITY_STR,
    )]
    pub fallback_capacity: Option<u32>,

    /// Minutes east of UTC used for calendar days (default: local zone).
    #[arg(long, env = "PUTAWAY_UTC_OFFSET_MINUTES", allow_hyphen_values = true)]
    pub utc_offset_minutes: Option<i32>,

    /// How finished tasks are sent to the store.
    #[arg(long, env = "PUTAWAY_SUBMIT_STRATEGY", value_enum, default_value_t = SubmitStrategy::Batch)]
    pub submit_strategy: SubmitStrategy,

    /// Request timeout in seconds.
    #[arg(long, env = "PUTAWAY_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Skip the re-fetch before each line is added.
    #[arg(long)]
    pub no_refresh_before_add: bool,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    /// Log to the console at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

const DEFAULT_FALLBACK_CAPACITY_STR: &str = "100";

impl Cli {
    /// Build the runtime configuration from flags.
    pub fn config(&self) -> crate::error::Result<AppConfig> {
        let mut cfg = AppConfig::new(self.api_url.trim());
        cfg.bins_file = self.bins_file.clone();
        cfg.skus_file = Some(self.skus_file.clone());
        if let Some(dir) = &self.data_dir {
            cfg.data_dir = dir.clone();
        }
        cfg.export_dir = self.export_dir.clone();
        cfg.sku_case = self.sku_case;
        cfg.fallback_capacity = self.fallback_capacity;
        if let Some(minutes) = self.utc_offset_minutes {
            cfg.utc_offset = config::offset_from_minutes(minutes)?;
        }
        cfg.submit_strategy = self.submit_strategy;
        cfg.request_timeout = Duration::from_secs(self.timeout_secs);
        cfg.refresh_before_add = !self.no_refresh_before_add;
        Ok(cfg)
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the interactive scan station.
    Scan,
    /// Open tasks created today.
    OpenToday,
    /// All open tasks with their age.
    Open,
    /// Open tasks created before today.
    Pending,
    /// Recently closed tasks.
    Closed {
        /// How many to show.
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Units per SKU for tasks closed on a day.
    Report {
        /// Day as YYYY-MM-DD (default: today).
        date: Option<NaiveDate>,
    },
    /// Lines of one task.
    Lines { task_id: String },
    /// Close tasks; failures are reported and the rest still close.
    Close {
        #[arg(required = true)]
        task_ids: Vec<String>,
        /// PIN of the closing supervisor.
        #[arg(long, env = "PUTAWAY_PIN")]
        pin: Option<String>,
    },
    /// Change the quantity of a submitted line.
    UpdateLine { line_id: String, qty: i64 },
    /// Delete a submitted line.
    DeleteLine { line_id: String },
    /// Export task lines to CSV.
    Export {
        #[arg(required = true)]
        task_ids: Vec<String>,
    },
    /// Export a daily report to CSV.
    ExportReport { date: Option<NaiveDate> },
    /// Build and station information.
    About,
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// Run the parsed command to completion.
pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
    let local = db::init(&config.data_dir).context("opening local store")?;

    if let Commands::About = cli.command {
        let mut about = diagnostics::about_info();
        about["station"] = diagnostics::station_status(&config, &local)?;
        println!("{}", serde_json::to_string_pretty(&about)?);
        return Ok(());
    }

    config.validate()?;
    let store = HttpRemoteStore::new(&config.api_url, config.request_timeout)?;
    info!(url = store.url(), "Task store configured");

    let mut session = Session::new(store, config);
    session.attach_local_store(local)?;
    session.load_master_data()?;

    let json = cli.json;
    match cli.command {
        Commands::Scan => return run_station(&mut session).await,
        Commands::OpenToday => print_tasks(&session.open_today().await?, json)?,
        Commands::Open => print_tasks(&session.all_open().await?, json)?,
        Commands::Pending => print_tasks(&session.pending_old().await?, json)?,
        Commands::Closed { limit } => print_tasks(&session.recent_closed(limit).await?, json)?,
        Commands::Report { date } => print_report(&session.daily_report(date).await?, json)?,
        Commands::Lines { task_id } => {
            let lines = session.task_lines(&task_id).await?;
            if json {
                print_json(&lines)?;
            } else {
                let skus = &session.master().skus;
                for l in &lines {
                    println!(
                        "{:<10} {:<8} {:<14} {:>5}  {:<20} {}",
                        l.id,
                        l.bin_id,
                        l.sku_id,
                        l.qty,
                        skus.display_name(&l.sku_id),
                        l.remarks.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Commands::Close { task_ids, pin } => {
            if let Some(pin) = pin {
                session.login(&pin).await?;
            }
            let tally = session.close_tasks(&task_ids).await?;
            print_tally(&tally, json)?;
        }
        Commands::UpdateLine { line_id, qty } => {
            let line = session.update_remote_line(&line_id, qty).await?;
            println!("Line {} in bin {} now {}", line.id, line.bin_id, line.qty);
        }
        Commands::DeleteLine { line_id } => {
            let line = session.delete_remote_line(&line_id).await?;
            println!("Deleted line {} ({} x{} in {})", line.id, line.sku_id, line.qty, line.bin_id);
        }
        Commands::Export { task_ids } => {
            let path = session.export_tasks(&task_ids).await?;
            println!("{}", path.display());
        }
        Commands::ExportReport { date } => {
            let path = session.export_daily_report(date).await?;
            println!("{}", path.display());
        }
        Commands::About => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_tasks(rows: &[TaskSummary], json: bool) -> Result<()> {
    if json {
        return print_json(rows);
    }
    if rows.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    for t in rows {
        let age = t
            .age_days
            .map(|d| format!("{d}d"))
            .unwrap_or_default();
        let closed = t
            .closed_at
            .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "{:<12} {:<8} {:>4} lines {:>6} units  {:>4}  {} {}",
            t.label(),
            t.status.as_str(),
            t.line_count,
            t.total_qty,
            age,
            closed,
            t.closed_by.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn print_report(report: &DailyReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    println!("{} ({} closed tasks)", report.date, report.task_count);
    for (sku, qty) in &report.by_sku {
        println!("  {sku:<16} {qty:>8}");
    }
    println!("  {:<16} {:>8}", "TOTAL", report.total);
    Ok(())
}

fn print_tally(tally: &CloseTally, json: bool) -> Result<()> {
    if json {
        return print_json(tally);
    }
    println!("Closed {}, failed {}", tally.succeeded(), tally.failures());
    for f in &tally.failed {
        println!("  {}: {}", f.task_id, f.message);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scan station
// ---------------------------------------------------------------------------

/// One line of station input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanInput {
    Login(String),
    Logout,
    SelectBin(String),
    AddLine {
        sku: String,
        qty: i64,
        remarks: Option<String>,
    },
    EditLine {
        line: String,
        sku: String,
        qty: i64,
        remarks: Option<String>,
    },
    DeleteLine(String),
    CompleteBin,
    DiscardBin,
    Finish,
    ClearDraft,
    List,
    Refresh,
    Help,
    Quit,
}

fn parse_qty_word(word: Option<&str>) -> crate::error::Result<i64> {
    let raw = word.ok_or_else(|| PutawayError::Validation("Quantity is required".into()))?;
    draft::parse_qty(raw).map(i64::from)
}

fn rest(words: &[&str]) -> Option<String> {
    let joined = words.join(" ");
    (!joined.trim().is_empty()).then_some(joined)
}

/// Parse a line of station input. A bare code selects a bin when none is
/// selected; with a bin selected, `<sku> <qty> [remarks]` adds a line.
pub fn parse_scan_line(input: &str, bin_selected: bool) -> crate::error::Result<Option<ScanInput>> {
    let words: Vec<&str> = input.split_whitespace().collect();
    let Some((&head, tail)) = words.split_first() else {
        return Ok(None);
    };

    let parsed = match head.to_ascii_lowercase().as_str() {
        "login" => ScanInput::Login(
            tail.first()
                .ok_or_else(|| PutawayError::Validation("PIN is required".into()))?
                .to_string(),
        ),
        "logout" => ScanInput::Logout,
        "bin" => ScanInput::SelectBin(
            tail.first()
                .ok_or_else(|| PutawayError::Validation("Bin id is required".into()))?
                .to_string(),
        ),
        "add" => {
            let sku = tail
                .first()
                .ok_or_else(|| PutawayError::Validation("SKU is required".into()))?;
            ScanInput::AddLine {
                sku: sku.to_string(),
                qty: parse_qty_word(tail.get(1).copied())?,
                remarks: rest(tail.get(2..).unwrap_or_default()),
            }
        }
        "edit" => {
            let (Some(line), Some(sku)) = (tail.first(), tail.get(1)) else {
                return Err(PutawayError::Validation(
                    "Usage: edit <line> <sku> <qty> [remarks]".into(),
                ));
            };
            ScanInput::EditLine {
                line: line.to_string(),
                sku: sku.to_string(),
                qty: parse_qty_word(tail.get(2).copied())?,
                remarks: rest(tail.get(3..).unwrap_or_default()),
            }
        }
        "del" | "delete" => ScanInput::DeleteLine(
            tail.first()
                .ok_or_else(|| PutawayError::Validation("Line is required".into()))?
                .to_string(),
        ),
        "done" | "complete" => ScanInput::CompleteBin,
        "discard" => ScanInput::DiscardBin,
        "finish" => ScanInput::Finish,
        "clear" => ScanInput::ClearDraft,
        "list" | "ls" => ScanInput::List,
        "refresh" => ScanInput::Refresh,
        "help" | "?" => ScanInput::Help,
        "quit" | "exit" => ScanInput::Quit,
        _ if !bin_selected && tail.is_empty() => ScanInput::SelectBin(head.to_string()),
        _ if bin_selected => ScanInput::AddLine {
            sku: head.to_string(),
            qty: parse_qty_word(tail.first().copied())?,
            remarks: rest(tail.get(1..).unwrap_or_default()),
        },
        _ => {
            return Err(PutawayError::Validation(format!(
                "Unknown command: {head} (type help)"
            )))
        }
    };
    Ok(Some(parsed))
}

const HELP: &str = "\
  <bin>                       select a bin (scan its label)
  <sku> <qty> [remarks]       add a line to the selected bin
  edit <n|id> <sku> <qty> [remarks]
  del <n|id>                  delete a draft line
  done | discard              complete the bin / drop its lines
  list | refresh | finish | clear
  login <pin> | logout | quit";

/// Resolve a 1-based listing number or a line id (prefix) to a draft id.
fn resolve_line<S: RemoteStore>(session: &Session<S>, reference: &str) -> crate::error::Result<String> {
    let lines = session.draft().lines();
    if let Ok(n) = reference.parse::<usize>() {
        if let Some(line) = n.checked_sub(1).and_then(|i| lines.get(i)) {
            return Ok(line.id.clone());
        }
    }
    let matches: Vec<&str> = lines
        .iter()
        .map(|l| l.id.as_str())
        .filter(|id| id.starts_with(reference))
        .collect();
    match matches.as_slice() {
        [one] => Ok(one.to_string()),
        _ => Err(PutawayError::not_found("Line", reference)),
    }
}

fn print_draft<S: RemoteStore>(session: &Session<S>) {
    let skus: &SkuCatalog = &session.master().skus;
    let draft = session.draft();
    if draft.is_empty() {
        println!("Draft is empty.");
    }
    for (i, l) in draft.lines().iter().enumerate() {
        println!(
            "{:>3}. {:<8} {:<14} {:>5}  {:<20} {}",
            i + 1,
            l.bin_id,
            l.sku_id,
            l.qty,
            skus.display_name(&l.sku_id),
            l.remarks.as_deref().unwrap_or("")
        );
    }
    let summary = draft.summary();
    println!(
        "{} lines, {} units, {} bins{}",
        summary.line_count,
        summary.total_qty,
        summary.bin_count,
        draft
            .selected_bin()
            .map(|b| format!(" (bin {b} selected)"))
            .unwrap_or_default()
    );
}

fn render_events(rx: &mut broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = rx.try_recv() {
        match event {
            SessionEvent::SignedIn { user } => println!("Signed in as {user}"),
            SessionEvent::SignedOut => println!("Signed out"),
            SessionEvent::BinSelected { usage } => println!(
                "Bin {}: capacity {}, used {}, free {}",
                usage.bin_id,
                usage.capacity,
                usage.used_total(),
                usage.free_display()
            ),
            SessionEvent::BinCompleted { bin_id } => println!("Bin {bin_id} completed"),
            SessionEvent::BinDiscarded { bin_id, removed } => {
                println!("Bin {bin_id} discarded ({removed} lines)")
            }
            SessionEvent::DraftRestored { lines } => println!("Restored {lines} draft lines"),
            SessionEvent::TaskSubmitted { outcome } => println!(
                "Task {} submitted: {} lines, {} units",
                outcome.label(),
                outcome.line_count,
                outcome.total_qty
            ),
            SessionEvent::SubmissionStopped {
                saved,
                remaining,
                reason,
            } => println!(
                "Submission stopped: {saved} lines saved, {remaining} still in draft ({reason})"
            ),
            _ => {}
        }
    }
}

async fn dispatch<S: RemoteStore>(
    session: &mut Session<S>,
    input: ScanInput,
) -> crate::error::Result<bool> {
    match input {
        ScanInput::Login(pin) => {
            session.login(&pin).await?;
        }
        ScanInput::Logout => session.logout()?,
        ScanInput::SelectBin(bin) => {
            session.select_bin(&bin).await?;
        }
        ScanInput::AddLine { sku, qty, remarks } => {
            let line = session.add_line(&sku, qty, remarks.as_deref()).await?;
            let free = session
                .draft()
                .bin_usage(&line.bin_id)
                .map(|u| u.free_display())
                .unwrap_or_default();
            println!(
                "+ {} x{} ({}) in {}, free {free}",
                line.sku_id,
                line.qty,
                session.master().skus.display_name(&line.sku_id),
                line.bin_id
            );
        }
        ScanInput::EditLine {
            line,
            sku,
            qty,
            remarks,
        } => {
            let id = resolve_line(session, &line)?;
            let edited = session.edit_line(&id, &sku, qty, remarks.as_deref())?;
            println!("~ {} x{} in {}", edited.sku_id, edited.qty, edited.bin_id);
        }
        ScanInput::DeleteLine(line) => {
            let id = resolve_line(session, &line)?;
            let removed = session.delete_line(&id)?;
            println!("- {} x{} from {}", removed.sku_id, removed.qty, removed.bin_id);
        }
        ScanInput::CompleteBin => {
            session.complete_bin()?;
        }
        ScanInput::DiscardBin => {
            session.discard_bin()?;
        }
        ScanInput::Finish => {
            session.finish_task().await?;
        }
        ScanInput::ClearDraft => {
            let removed = session.clear_draft();
            println!("Cleared {removed} draft lines");
        }
        ScanInput::List => print_draft(session),
        ScanInput::Refresh => {
            let snapshot = session.refresh().await?;
            println!("{} tasks, {} lines", snapshot.tasks.len(), snapshot.lines.len());
        }
        ScanInput::Help => println!("{HELP}"),
        ScanInput::Quit => return Ok(false),
    }
    Ok(true)
}

/// Interactive station loop. Errors are printed and the loop continues.
async fn run_station<S: RemoteStore>(session: &mut Session<S>) -> Result<()> {
    let mut rx = session.subscribe();
    if let Err(e) = session.refresh().await {
        println!("! {e} (working from an empty snapshot)");
    }
    session.restore_draft()?;
    if let Some(user) = session.user() {
        println!("Signed in as {}", user.display_name());
    }
    render_events(&mut rx);
    println!("Device {} ready. Type help for commands.", session.device_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(raw) = lines.next_line().await? {
        let bin_selected = session.draft().selected_bin().is_some();
        let keep_going = match parse_scan_line(&raw, bin_selected) {
            Ok(None) => true,
            Ok(Some(input)) => match dispatch(session, input).await {
                Ok(keep_going) => keep_going,
                Err(e) => {
                    println!("! {e}");
                    true
                }
            },
            Err(e) => {
                println!("! {e}");
                true
            }
        };
        render_events(&mut rx);
        if !keep_going {
            break;
        }
    }

    if !session.draft().is_empty() {
        println!(
            "{} draft lines kept for next time.",
            session.draft().lines().len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FALLBACK_CAPACITY;

    #[test]
    fn test_cli_config_from_flags() {
        let cli = Cli::parse_from([
            "putaway",
            "--api-url",
            "https://script.example.com/exec",
            "--bins-file",
            "/srv/bins.tsv",
            "--sku-case",
            "preserve",
            "--fallback-capacity",
            "--utc-offset-minutes",
            "-300",
            "--submit-strategy",
            "incremental",
            "--timeout-secs",
            "5",
            "open-today",
        ]);
        let cfg = cli.config().unwrap();
        assert_eq!(cfg.api_url, "https://script.example.com/exec");
        assert_eq!(cfg.bins_file, PathBuf::from("/srv/bins.tsv"));
        assert_eq!(cfg.sku_case, SkuCasePolicy::Preserve);
        assert_eq!(cfg.fallback_capacity, Some(DEFAULT_FALLBACK_CAPACITY));
        assert_eq!(cfg.utc_offset.local_minus_utc(), -300 * 60);
        assert_eq!(cfg.submit_strategy, SubmitStrategy::Incremental);
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert!(cfg.refresh_before_add);
        assert!(matches!(cli.command, Commands::OpenToday));
    }

    #[test]
    fn test_cli_subcommand_args() {
        let cli = Cli::parse_from(["putaway", "--json", "report", "2026-05-04"]);
        assert!(cli.json);
        match cli.command {
            Commands::Report { date } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 5, 4));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["putaway", "close"]).is_err());
        assert!(Cli::try_parse_from(["putaway", "report", "tomorrow"]).is_err());
    }

    #[test]
    fn test_parse_scan_line_bare_codes() {
        assert_eq!(
            parse_scan_line(" A-01 ", false).unwrap(),
            Some(ScanInput::SelectBin("A-01".into()))
        );
        assert_eq!(
            parse_scan_line("sku9 4 left side", true).unwrap(),
            Some(ScanInput::AddLine {
                sku: "sku9".into(),
                qty: 4,
                remarks: Some("left side".into()),
            })
        );
        assert!(parse_scan_line("sku9", true).is_err());
        assert!(parse_scan_line("sku9 0", true).is_err());
        assert!(parse_scan_line("sku9 x", true).is_err());
        assert_eq!(parse_scan_line("   ", true).unwrap(), None);
    }

    #[test]
    fn test_parse_scan_line_commands() {
        assert_eq!(
            parse_scan_line("edit 2 SKU1 10", true).unwrap(),
            Some(ScanInput::EditLine {
                line: "2".into(),
                sku: "SKU1".into(),
                qty: 10,
                remarks: None,
            })
        );
        assert_eq!(
            parse_scan_line("BIN B7", true).unwrap(),
            Some(ScanInput::SelectBin("B7".into()))
        );
        assert_eq!(parse_scan_line("finish", true).unwrap(), Some(ScanInput::Finish));
        assert_eq!(parse_scan_line("login 1234", false).unwrap(), Some(ScanInput::Login("1234".into())));
        assert!(parse_scan_line("login", false).is_err());
        assert!(parse_scan_line("what is this", false).is_err());
    }
}
