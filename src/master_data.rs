//! Bin and SKU master files.
//!
//! Both files are small delimited tables with a header row. Cells may be
//! separated by commas or tabs (spreadsheet exports produce either), headers
//! are matched case-insensitively and may carry a UTF-8 byte-order mark.
//! The bins file is required; the SKU file is optional and any problem with
//! it degrades to an empty catalog.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::config::{AppConfig, SkuCasePolicy};
use crate::error::{PutawayError, Result};

const BIN_HEADER: &str = "bin_id,capacity";
const SKU_HEADER: &str = "sku_id,sku_name";

// ---------------------------------------------------------------------------
// Catalogs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinCatalog {
    bins: HashMap<String, u32>,
    /// Applies to every bin id when no bins file was available.
    fallback_capacity: Option<u32>,
}

impl BinCatalog {
    pub fn from_map(bins: HashMap<String, u32>) -> Self {
        Self {
            bins,
            fallback_capacity: None,
        }
    }

    /// Catalog that accepts any bin id with the same capacity.
    pub fn fallback(capacity: u32) -> Self {
        Self {
            bins: HashMap::new(),
            fallback_capacity: Some(capacity),
        }
    }

    pub fn capacity(&self, bin_id: &str) -> Option<u32> {
        self.bins.get(bin_id).copied().or(self.fallback_capacity)
    }

    pub fn contains(&self, bin_id: &str) -> bool {
        self.capacity(bin_id).is_some()
    }

    /// Capacity of a known bin, or `InvalidBin`.
    pub fn require(&self, bin_id: &str) -> Result<u32> {
        self.capacity(bin_id)
            .ok_or_else(|| PutawayError::InvalidBin(bin_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback_capacity.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkuCatalog {
    names: HashMap<String, String>,
    policy: SkuCasePolicy,
}

impl SkuCatalog {
    pub fn empty(policy: SkuCasePolicy) -> Self {
        Self {
            names: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> SkuCasePolicy {
        self.policy
    }

    pub fn name(&self, sku_id: &str) -> Option<&str> {
        self.names
            .get(&self.policy.normalize(sku_id))
            .map(String::as_str)
    }

    /// Display name, or "not found" for SKUs missing from the master.
    pub fn display_name(&self, sku_id: &str) -> &str {
        self.name(sku_id).unwrap_or("not found")
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Both catalogs, loaded once per session.
#[derive(Debug, Clone, Default)]
pub struct MasterData {
    pub bins: BinCatalog,
    pub skus: SkuCatalog,
}

impl MasterData {
    /// Read the master files named in the config.
    pub fn load(config: &AppConfig) -> Result<Self> {
        let bins = load_bins_file(&config.bins_file, config.fallback_capacity)?;
        let skus = match &config.skus_file {
            Some(path) => load_skus_file(path, config.sku_case),
            None => SkuCatalog::empty(config.sku_case),
        };
        info!(
            bins = bins.len(),
            fallback = bins.is_fallback(),
            skus = skus.len(),
            "Master data loaded"
        );
        Ok(Self { bins, skus })
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn table_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

fn split_cells(line: &str) -> Vec<&str> {
    line.split([',', '\t']).map(str::trim).collect()
}

fn header_index(line: &str) -> Vec<String> {
    split_cells(line)
        .into_iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
        .collect()
}

fn column(header: &[String], name: &str) -> Option<usize> {
    header.iter().position(|h| h == name)
}

/// Parse bins-file text into a catalog. Fails when the header lacks
/// `bin_id` or `capacity`.
pub fn parse_bins(text: &str) -> Result<BinCatalog> {
    let lines = table_lines(text);
    let Some((first, rows)) = lines.split_first() else {
        return Err(PutawayError::MasterData(format!(
            "bins file is empty (expected {BIN_HEADER} header)"
        )));
    };

    let header = header_index(first);
    let (Some(bin_idx), Some(cap_idx)) = (column(&header, "bin_id"), column(&header, "capacity"))
    else {
        warn!(header = ?header, "Bins header not recognised");
        return Err(PutawayError::MasterData(format!(
            "bins file must have {BIN_HEADER} headers"
        )));
    };

    let mut bins = HashMap::new();
    for row in rows {
        let cells = split_cells(row);
        let bin_id = cells.get(bin_idx).copied().unwrap_or_default();
        if bin_id.is_empty() {
            continue;
        }
        let capacity = cells.get(cap_idx).copied().map_or(0, leading_capacity);
        bins.insert(bin_id.to_string(), capacity);
    }
    Ok(BinCatalog::from_map(bins))
}

/// Capacity from the leading digits of a cell, so `12.5` and `12 units`
/// both read as 12. Anything without leading digits is 0.
fn leading_capacity(cell: &str) -> u32 {
    let cell = cell.trim_start();
    let cell = cell.strip_prefix('+').unwrap_or(cell);
    let end = cell
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(cell.len());
    cell[..end].parse().unwrap_or(0)
}

/// Parse SKU-file text. Never fails: a bad header yields an empty catalog.
pub fn parse_skus(text: &str, policy: SkuCasePolicy) -> SkuCatalog {
    let lines = table_lines(text);
    let Some((first, rows)) = lines.split_first() else {
        return SkuCatalog::empty(policy);
    };

    let header = header_index(first);
    let (Some(sku_idx), Some(name_idx)) = (column(&header, "sku_id"), column(&header, "sku_name"))
    else {
        warn!(header = ?header, "SKU master missing {SKU_HEADER} headers, ignoring file");
        return SkuCatalog::empty(policy);
    };

    let mut names = HashMap::new();
    for row in rows {
        let cells = split_cells(row);
        let sku_id = policy.normalize(cells.get(sku_idx).copied().unwrap_or_default());
        if sku_id.is_empty() {
            continue;
        }
        let name = cells.get(name_idx).copied().unwrap_or_default();
        names.insert(sku_id, name.to_string());
    }
    SkuCatalog { names, policy }
}

fn load_bins_file(path: &Path, fallback: Option<u32>) -> Result<BinCatalog> {
    match fs::read_to_string(path) {
        Ok(text) => parse_bins(&text),
        Err(e) => match fallback {
            Some(capacity) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    capacity,
                    "Bins file unavailable, every bin gets the fallback capacity"
                );
                Ok(BinCatalog::fallback(capacity))
            }
            None => Err(PutawayError::MasterData(format!(
                "unable to read bins file {}: {e}",
                path.display()
            ))),
        },
    }
}

fn load_skus_file(path: &Path, policy: SkuCasePolicy) -> SkuCatalog {
    match fs::read_to_string(path) {
        Ok(text) => parse_skus(&text, policy),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "No SKU master found (optional)");
            SkuCatalog::empty(policy)
        }
    }
}
