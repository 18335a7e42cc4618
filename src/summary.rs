//! Keymark lookup and per-keymark cable length totals

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::token::{field_text, Token};
use crate::CrossRefError;

/// Physical description of a cable, as printed on the schedule
///
/// The schedule layout has no parallel-cable column, so the count is not part
/// of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CableSpec {
    pub size: String,
    pub conductors: String,
    pub insulation: String,
}

impl CableSpec {
    /// Spec of one schedule item; absent fields read as empty
    pub fn of_item(schedule: &[Token], sheet: u32, item: u32) -> Self {
        Self {
            size: field_text(schedule, sheet, item, "size"),
            conductors: field_text(schedule, sheet, item, "conductors"),
            insulation: field_text(schedule, sheet, item, "insulation"),
        }
    }
}

/// One catalog row as stored on disk
///
/// Columns other than these (such as `parallel_cables`) are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub keymark: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub conductors: String,
    #[serde(default)]
    pub insulation: String,
}

/// Lookup from cable spec to keymark
#[derive(Debug, Clone, Default)]
pub struct CableCatalog {
    entries: HashMap<CableSpec, String>,
}

impl CableCatalog {
    /// Build from rows; the first row wins for a repeated spec
    pub fn from_entries(rows: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let mut entries = HashMap::new();
        for row in rows {
            let spec = CableSpec {
                size: row.size,
                conductors: row.conductors,
                insulation: row.insulation,
            };
            entries.entry(spec).or_insert(row.keymark);
        }
        Self { entries }
    }

    pub fn from_json_str(json: &str) -> Result<Self, CrossRefError> {
        let rows: Vec<CatalogEntry> = serde_json::from_str(json)?;
        Ok(Self::from_entries(rows))
    }

    /// Load a catalog file; `Ok(None)` when the file does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>, CrossRefError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("cable catalog {} not found", path.display());
            return Ok(None);
        }
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json).map(Some)
    }

    pub fn lookup(&self, spec: &CableSpec) -> Option<&str> {
        self.entries.get(spec).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Keymark found for one schedule item
#[derive(Debug, Clone, PartialEq)]
pub struct KeymarkAssignment {
    pub sheet: u32,
    pub item: u32,
    pub keymark: String,
    /// Where the keymark is overlaid: right of the size field, slightly lower
    pub position: Option<(f64, f64)>,
}

const KEYMARK_DX: f64 = 175.0;
const KEYMARK_DY: f64 = -5.0;

/// Look every schedule item up in the catalog
pub fn assign_keymarks(schedule: &[Token], catalog: &CableCatalog) -> Vec<KeymarkAssignment> {
    let mut keys: Vec<(u32, u32)> = schedule
        .iter()
        .filter(|t| t.item > 0 && t.tag.is_some())
        .map(|t| (t.sheet, t.item))
        .collect();
    keys.sort_unstable();
    keys.dedup();

    let assignments: Vec<KeymarkAssignment> = keys
        .into_iter()
        .filter_map(|(sheet, item)| {
            let spec = CableSpec::of_item(schedule, sheet, item);
            let keymark = catalog.lookup(&spec)?;
            let position = schedule
                .iter()
                .filter(|t| t.sheet == sheet && t.item == item && t.has_tag("size"))
                .min_by(|a, b| a.is_placeholder().cmp(&b.is_placeholder()))
                .map(|t| (t.x() + KEYMARK_DX, t.y() + KEYMARK_DY));
            Some(KeymarkAssignment {
                sheet,
                item,
                keymark: keymark.to_string(),
                position,
            })
        })
        .collect();

    debug!("{} items matched a keymark", assignments.len());
    assignments
}

/// Total of the integer `length` values per keymark
///
/// Length tokens that do not parse as integers are ignored.
pub fn summarize_lengths(
    schedule: &[Token],
    assignments: &[KeymarkAssignment],
) -> BTreeMap<String, i64> {
    let mut totals: BTreeMap<String, i64> = BTreeMap::new();
    for a in assignments {
        let length: i64 = schedule
            .iter()
            .filter(|t| t.sheet == a.sheet && t.item == a.item && t.has_tag("length"))
            .filter_map(|t| t.text.trim().parse::<i64>().ok())
            .sum();
        *totals.entry(a.keymark.clone()).or_insert(0) += length;
    }
    totals
}
