//! Draft task buffer for the scan station.
//!
//! Holds the lines of the task being assembled, across any number of bin
//! selections, until the whole draft is submitted in one call. Only one bin
//! is selected at a time; its capacity and committed usage are captured at
//! selection and used for every later check on that bin's lines until the
//! next recapture.
//!
//! Every mutation validates first and leaves the buffer untouched on error.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::capacity::{self, BinUsage};
use crate::config::SkuCasePolicy;
use crate::error::{PutawayError, Result};
use crate::master_data::BinCatalog;
use crate::model::{AppSnapshot, DraftLine};

/// Capacity and committed usage of a bin as of its last selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BinSnapshot {
    capacity: u32,
    remote_used: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetScope {
    /// Discard the selected bin's lines and release the selection.
    CurrentBin,
    /// Discard everything (new task).
    All,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSummary {
    pub line_count: usize,
    pub total_qty: u64,
    pub bin_count: usize,
}

#[derive(Debug, Clone)]
pub struct DraftBuffer {
    policy: SkuCasePolicy,
    lines: Vec<DraftLine>,
    selected: Option<String>,
    bins: HashMap<String, BinSnapshot>,
}

/// Parse operator-entered quantity text.
pub fn parse_qty(raw: &str) -> Result<u32> {
    let trimmed = raw.trim();
    let qty: i64 = trimmed
        .parse()
        .map_err(|_| PutawayError::Validation(format!("Quantity must be a whole number: {trimmed:?}")))?;
    validate_qty(qty)
}

pub(crate) fn validate_qty(qty: i64) -> Result<u32> {
    if qty <= 0 {
        return Err(PutawayError::Validation(format!(
            "Quantity must be greater than zero (got {qty})"
        )));
    }
    u32::try_from(qty)
        .map_err(|_| PutawayError::Validation(format!("Quantity too large: {qty}")))
}

fn clean_remarks(remarks: Option<&str>) -> Option<String> {
    remarks
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
}

impl DraftBuffer {
    pub fn new(policy: SkuCasePolicy) -> Self {
        Self {
            policy,
            lines: Vec::new(),
            selected: None,
            bins: HashMap::new(),
        }
    }

    /// Rebuild a buffer from persisted lines. Lines whose bin is no longer
    /// in the catalog are dropped.
    pub fn restore(
        policy: SkuCasePolicy,
        lines: Vec<DraftLine>,
        catalog: &BinCatalog,
        snapshot: &AppSnapshot,
    ) -> Self {
        let mut buffer = Self::new(policy);
        for line in lines {
            let Some(capacity) = catalog.capacity(&line.bin_id) else {
                warn!(line_id = %line.id, bin = %line.bin_id, "Dropping restored draft line for unknown bin");
                continue;
            };
            buffer.bins.entry(line.bin_id.clone()).or_insert(BinSnapshot {
                capacity,
                remote_used: capacity::used_remote(snapshot, &line.bin_id),
            });
            buffer.lines.push(line);
        }
        buffer
    }

    pub fn lines(&self) -> &[DraftLine] {
        &self.lines
    }

    pub fn lines_for_bin<'a>(&'a self, bin_id: &'a str) -> impl Iterator<Item = &'a DraftLine> + 'a {
        self.lines.iter().filter(move |l| l.bin_id == bin_id)
    }

    pub fn line(&self, line_id: &str) -> Option<&DraftLine> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    pub fn selected_bin(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn policy(&self) -> SkuCasePolicy {
        self.policy
    }

    /// Distinct bins holding draft lines, in first-use order.
    pub fn bins(&self) -> Vec<&str> {
        let mut bins: Vec<&str> = Vec::new();
        for line in &self.lines {
            if !bins.contains(&line.bin_id.as_str()) {
                bins.push(&line.bin_id);
            }
        }
        bins
    }

    /// Whether `bin_id` may be selected now, ignoring the catalog.
    pub fn check_selectable(&self, bin_id: &str) -> Result<()> {
        let bin_id = bin_id.trim();
        if bin_id.is_empty() {
            return Err(PutawayError::Validation("Bin id is required".into()));
        }
        if let Some(current) = self.selected.as_deref() {
            if current != bin_id {
                return Err(PutawayError::Validation(format!(
                    "Bin {current} is still selected; complete it before selecting {bin_id}"
                )));
            }
        }
        Ok(())
    }

    /// Select a bin and capture its committed usage from `snapshot`.
    ///
    /// The caller must refresh `snapshot` beforehand. Re-selecting the
    /// current bin refreshes the captured usage.
    pub fn select_bin(
        &mut self,
        bin_id: &str,
        catalog: &BinCatalog,
        snapshot: &AppSnapshot,
    ) -> Result<BinUsage> {
        let bin_id = bin_id.trim();
        self.check_selectable(bin_id)?;
        let capacity = catalog.require(bin_id)?;
        let remote_used = capacity::used_remote(snapshot, bin_id);
        self.bins.insert(
            bin_id.to_string(),
            BinSnapshot {
                capacity,
                remote_used,
            },
        );
        self.selected = Some(bin_id.to_string());
        debug!(bin = bin_id, capacity, remote_used, "Bin selected");
        self.usage_for(bin_id, None)
    }

    /// Re-capture capacity and committed usage, from `catalog` and a fresh
    /// `snapshot`, for every bin selected since the last reset.
    pub fn recapture(&mut self, catalog: &BinCatalog, snapshot: &AppSnapshot) -> Result<()> {
        let fresh = self
            .bins
            .keys()
            .map(|bin_id| {
                let snap = BinSnapshot {
                    capacity: catalog.require(bin_id)?,
                    remote_used: capacity::used_remote(snapshot, bin_id),
                };
                Ok((bin_id.clone(), snap))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        self.bins = fresh;
        Ok(())
    }

    /// [`recapture`](Self::recapture), then confirm no bin holding draft
    /// lines is over capacity.
    pub fn recheck(&mut self, catalog: &BinCatalog, snapshot: &AppSnapshot) -> Result<()> {
        self.recapture(catalog, snapshot)?;
        for bin_id in self.bins() {
            self.usage_for(bin_id, None)?.check(0)?;
        }
        Ok(())
    }

    /// Current usage view for a bin that has been selected at least once.
    pub fn bin_usage(&self, bin_id: &str) -> Option<BinUsage> {
        self.usage_for(bin_id, None).ok()
    }

    fn usage_for(&self, bin_id: &str, exclude_line: Option<&str>) -> Result<BinUsage> {
        let snap = self
            .bins
            .get(bin_id)
            .ok_or_else(|| PutawayError::InvalidBin(bin_id.to_string()))?;
        Ok(BinUsage {
            bin_id: bin_id.to_string(),
            capacity: snap.capacity,
            used_remote: snap.remote_used,
            used_local: capacity::used_local(&self.lines, bin_id, exclude_line),
        })
    }

    fn normalize_sku(&self, sku: &str) -> Result<String> {
        let sku = self.policy.normalize(sku);
        if sku.is_empty() {
            return Err(PutawayError::Validation("SKU is required".into()));
        }
        Ok(sku)
    }

    /// Append a line to the selected bin.
    pub fn add_line(&mut self, sku: &str, qty: i64, remarks: Option<&str>) -> Result<DraftLine> {
        let bin_id = self
            .selected
            .clone()
            .ok_or_else(|| PutawayError::Validation("Select a bin first".into()))?;
        let sku_id = self.normalize_sku(sku)?;
        let qty = validate_qty(qty)?;
        self.usage_for(&bin_id, None)?.check(qty)?;

        let line = DraftLine {
            id: Uuid::new_v4().to_string(),
            bin_id,
            sku_id,
            qty,
            remarks: clean_remarks(remarks),
            scanned_at: Utc::now(),
        };
        self.lines.push(line.clone());
        debug!(line_id = %line.id, bin = %line.bin_id, sku = %line.sku_id, qty, "Draft line added");
        Ok(line)
    }

    /// Replace a line's SKU, quantity and remarks. The line's own previous
    /// quantity does not count against its bin.
    pub fn edit_line(
        &mut self,
        line_id: &str,
        sku: &str,
        qty: i64,
        remarks: Option<&str>,
    ) -> Result<DraftLine> {
        let idx = self
            .lines
            .iter()
            .position(|l| l.id == line_id)
            .ok_or_else(|| PutawayError::not_found("Line", line_id))?;
        let sku_id = self.normalize_sku(sku)?;
        let qty = validate_qty(qty)?;
        let bin_id = self.lines[idx].bin_id.clone();
        self.usage_for(&bin_id, Some(line_id))?.check(qty)?;

        let line = &mut self.lines[idx];
        line.sku_id = sku_id;
        line.qty = qty;
        line.remarks = clean_remarks(remarks);
        debug!(line_id, bin = %bin_id, qty, "Draft line edited");
        Ok(line.clone())
    }

    pub fn delete_line(&mut self, line_id: &str) -> Result<DraftLine> {
        let idx = self
            .lines
            .iter()
            .position(|l| l.id == line_id)
            .ok_or_else(|| PutawayError::not_found("Line", line_id))?;
        let removed = self.lines.remove(idx);
        debug!(line_id, bin = %removed.bin_id, "Draft line deleted");
        Ok(removed)
    }

    /// Release the selected bin, keeping its lines. Returns the bin id.
    pub fn complete_bin(&mut self) -> Option<String> {
        self.selected.take()
    }

    /// Discard lines per `scope`. Returns how many lines were removed.
    pub fn reset(&mut self, scope: ResetScope) -> usize {
        let before = self.lines.len();
        match scope {
            ResetScope::CurrentBin => {
                if let Some(bin_id) = self.selected.take() {
                    self.lines.retain(|l| l.bin_id != bin_id);
                    self.bins.remove(&bin_id);
                }
            }
            ResetScope::All => {
                self.lines.clear();
                self.bins.clear();
                self.selected = None;
            }
        }
        before - self.lines.len()
    }

    pub fn summary(&self) -> DraftSummary {
        DraftSummary {
            line_count: self.lines.len(),
            total_qty: self.lines.iter().map(|l| u64::from(l.qty)).sum(),
            bin_count: self.bins().len(),
        }
    }

    /// A task can only be finished with at least one line.
    pub fn ensure_finishable(&self) -> Result<DraftSummary> {
        let summary = self.summary();
        if summary.line_count == 0 {
            return Err(PutawayError::Validation(
                "No lines in this task yet; add at least one line before finishing".into(),
            ));
        }
        Ok(summary)
    }
}
