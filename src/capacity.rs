//! Bin usage accounting.
//!
//! Usage for a bin is the committed quantity reported by the last snapshot
//! plus whatever the draft buffer holds for that bin. Every line addition
//! and quantity increase must pass [`BinUsage::check`] first.

use serde::Serialize;

use crate::error::{PutawayError, Result};
use crate::master_data::BinCatalog;
use crate::model::{AppSnapshot, DraftLine};

/// Sum of committed quantities in `bin_id` across every snapshot line.
pub fn used_remote(snapshot: &AppSnapshot, bin_id: &str) -> u64 {
    snapshot
        .lines
        .iter()
        .filter(|l| l.bin_id == bin_id)
        .map(|l| u64::from(l.qty))
        .sum()
}

/// Sum of draft quantities in `bin_id`, optionally leaving one line out.
pub fn used_local(lines: &[DraftLine], bin_id: &str, exclude_line: Option<&str>) -> u64 {
    lines
        .iter()
        .filter(|l| l.bin_id == bin_id)
        .filter(|l| exclude_line != Some(l.id.as_str()))
        .map(|l| u64::from(l.qty))
        .sum()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinUsage {
    pub bin_id: String,
    pub capacity: u32,
    pub used_remote: u64,
    pub used_local: u64,
}

impl BinUsage {
    /// Usage of a bin from catalog, snapshot and draft. `InvalidBin` for
    /// ids the catalog does not know.
    pub fn compute(
        catalog: &BinCatalog,
        snapshot: &AppSnapshot,
        draft: &[DraftLine],
        bin_id: &str,
    ) -> Result<Self> {
        let capacity = catalog.require(bin_id)?;
        Ok(Self {
            bin_id: bin_id.to_string(),
            capacity,
            used_remote: used_remote(snapshot, bin_id),
            used_local: used_local(draft, bin_id, None),
        })
    }

    pub fn used_total(&self) -> i64 {
        (self.used_remote + self.used_local) as i64
    }

    /// Signed remaining capacity; negative when the bin is already over.
    pub fn free(&self) -> i64 {
        i64::from(self.capacity) - self.used_total()
    }

    /// Remaining capacity floored at zero, for display.
    pub fn free_display(&self) -> u64 {
        self.free().max(0) as u64
    }

    /// Reject `delta` more units when they would overflow the bin.
    pub fn check(&self, delta: u32) -> Result<()> {
        if self.used_total() + i64::from(delta) > i64::from(self.capacity) {
            return Err(PutawayError::CapacityExceeded {
                bin: self.bin_id.clone(),
                used: self.used_total(),
                capacity: self.capacity,
                free: self.free().max(0),
            });
        }
        Ok(())
    }
}
