//! Drawing-side preparation for reconciliation
//!
//! Drawing sheets carry no record structure of their own. A drawing record
//! is a cable tag that also appears in the schedule, paired with the full
//! drawing number of the sheet it sits on.

use std::collections::{BTreeMap, HashSet};

use log::debug;

use crate::token::{reading_order, Token};

pub const CABLE_TAG: &str = "cable_tag";

/// Title-block fields that make up a drawing number, in order
pub const DRAWING_NUMBER_PARTS: [&str; 3] = ["dwg_size", "dwg_number", "dwg_sheet"];

/// One cable tag found on a drawing sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawingRecord {
    pub sheet: u32,
    pub cable_tag: String,
    /// Full drawing number of the sheet, empty when the title block has none
    pub drawing_ref: String,
}

/// Tag drawing tokens whose text is a known schedule cable tag
///
/// Previous `cable_tag` marks are cleared first so the result only depends on
/// the current schedule. Tokens already carrying another tag (title block
/// fields) are left alone. Returns the number of tokens marked.
pub fn mark_cable_tags(drawing: &mut [Token], schedule_tags: &HashSet<String>) -> usize {
    let mut marked = 0;
    for token in drawing.iter_mut() {
        if token.has_tag(CABLE_TAG) {
            token.tag = None;
        }
        if token.tag.is_some() || token.is_placeholder() {
            continue;
        }
        if schedule_tags.contains(token.text.trim()) {
            token.tag = Some(CABLE_TAG.to_string());
            marked += 1;
        }
    }
    debug!("marked {} drawing tokens as cable tags", marked);
    marked
}

/// Drop drawing tokens that carry no tag; returns how many were removed
pub fn prune_untagged(drawing: &mut Vec<Token>) -> usize {
    let before = drawing.len();
    drawing.retain(|t| t.tag.is_some());
    before - drawing.len()
}

/// Full drawing number (`size-number-sheet`) per sheet
///
/// Sheets with none of the parts are absent from the map; a missing part on
/// a sheet that has the others is rendered `NULL`.
pub fn drawing_numbers(drawing: &[Token]) -> BTreeMap<u32, String> {
    let mut parts: BTreeMap<u32, [Vec<&Token>; 3]> = BTreeMap::new();
    for token in drawing.iter().filter(|t| !t.is_placeholder()) {
        let Some(tag) = token.tag.as_deref() else {
            continue;
        };
        if let Some(pos) = DRAWING_NUMBER_PARTS.iter().position(|p| *p == tag) {
            parts.entry(token.sheet).or_default()[pos].push(token);
        }
    }

    parts
        .into_iter()
        .map(|(sheet, mut slots)| {
            let rendered: Vec<String> = slots
                .iter_mut()
                .map(|slot| {
                    slot.sort_by(|a, b| reading_order(a, b));
                    let text = slot
                        .iter()
                        .map(|t| t.text.trim())
                        .collect::<Vec<_>>()
                        .join(" ");
                    if text.is_empty() {
                        "NULL".to_string()
                    } else {
                        text
                    }
                })
                .collect();
            (sheet, rendered.join("-"))
        })
        .collect()
}

/// Every cable tag on the drawings with the drawing number of its sheet
pub fn drawing_records(drawing: &[Token]) -> Vec<DrawingRecord> {
    let numbers = drawing_numbers(drawing);
    let mut tags: Vec<&Token> = drawing
        .iter()
        .filter(|t| t.has_tag(CABLE_TAG) && !t.is_placeholder())
        .collect();
    tags.sort_by(|a, b| reading_order(a, b));

    tags.into_iter()
        .map(|t| DrawingRecord {
            sheet: t.sheet,
            cable_tag: t.text.trim().to_string(),
            drawing_ref: numbers.get(&t.sheet).cloned().unwrap_or_default(),
        })
        .collect()
}
