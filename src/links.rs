//! Cross-document link resolution
//!
//! A matched from/to reference on the schedule becomes a clickable area that
//! jumps to the cable tag on the drawing sheet the reference names.

use std::collections::HashMap;

use log::debug;

use crate::drawing::{drawing_numbers, CABLE_TAG};
use crate::reconcile::{Reconciliation, FROM_REF, TO_REF};
use crate::token::{reading_order, BBox, ColorFlag, Token};

/// Which reference of a schedule record a link starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    From,
    To,
}

impl Direction {
    pub fn tag(self) -> &'static str {
        match self {
            Direction::From => FROM_REF,
            Direction::To => TO_REF,
        }
    }
}

/// Destination framing for link targets
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Space left around the target tag so it is not flush with the window edge
    pub margin: f64,
    /// Zoom factor applied when jumping
    pub zoom: f64,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            margin: 20.0,
            zoom: 2.0,
        }
    }
}

/// Union of all tokens of one field in one item
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEnvelope {
    pub sheet: u32,
    pub item: u32,
    pub rect: BBox,
}

/// Jump target on the drawing set
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub sheet: u32,
    pub left: f64,
    pub top: f64,
    pub zoom: f64,
}

/// A resolved link from a schedule reference to a drawing sheet
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub sheet: u32,
    pub item: u32,
    pub direction: Direction,
    /// Clickable area on the schedule sheet
    pub rect: BBox,
    pub cable_tag: String,
    pub drawing_ref: String,
    pub destination: Destination,
}

/// Aggregate the tokens carrying `tag` into one envelope per (sheet, item)
///
/// Tokens are scanned in (sheet, item) order with a single open envelope. It
/// is flushed whenever the key changes and once more after the last token.
pub fn field_envelopes(tokens: &[Token], tag: &str) -> Vec<FieldEnvelope> {
    let mut fields: Vec<&Token> = tokens
        .iter()
        .filter(|t| t.has_tag(tag) && !t.is_placeholder() && t.item > 0)
        .collect();
    fields.sort_by(|a, b| (a.sheet, a.item).cmp(&(b.sheet, b.item)));

    let mut envelopes = Vec::new();
    let mut open: Option<FieldEnvelope> = None;

    for token in fields {
        let same_field = open
            .as_ref()
            .is_some_and(|env| env.sheet == token.sheet && env.item == token.item);
        if same_field {
            if let Some(env) = open.as_mut() {
                env.rect = env.rect.union(&token.bbox);
            }
            continue;
        }
        if let Some(done) = open.take() {
            envelopes.push(done);
        }
        open = Some(FieldEnvelope {
            sheet: token.sheet,
            item: token.item,
            rect: token.bbox,
        });
    }
    if let Some(done) = open.take() {
        envelopes.push(done);
    }

    envelopes
}

/// Find the cable tag on the sheet whose drawing number is `drawing_ref`
fn locate_target<'a>(
    drawing: &'a [Token],
    sheets_by_ref: &HashMap<&str, Vec<u32>>,
    cable_tag: &str,
    drawing_ref: &str,
) -> Option<&'a Token> {
    let sheets = sheets_by_ref.get(drawing_ref)?;
    drawing
        .iter()
        .filter(|t| {
            sheets.contains(&t.sheet) && t.has_tag(CABLE_TAG) && t.text.trim() == cable_tag
        })
        .min_by(|a, b| reading_order(a, b))
}

/// Resolve one link per matched (item, direction)
///
/// References not flagged `Matched` are not eligible. A matched reference
/// whose target cannot be located is skipped.
pub fn resolve_links(
    schedule: &[Token],
    drawing: &[Token],
    reconciliations: &[Reconciliation],
    options: &LinkOptions,
) -> Vec<Link> {
    let numbers = drawing_numbers(drawing);
    let mut sheets_by_ref: HashMap<&str, Vec<u32>> = HashMap::new();
    for (sheet, number) in &numbers {
        sheets_by_ref.entry(number.as_str()).or_default().push(*sheet);
    }

    let mut links = Vec::new();
    for direction in [Direction::From, Direction::To] {
        let envelopes: HashMap<(u32, u32), BBox> = field_envelopes(schedule, direction.tag())
            .into_iter()
            .map(|env| ((env.sheet, env.item), env.rect))
            .collect();

        for rec in reconciliations {
            let (flag, drawing_ref) = match direction {
                Direction::From => (rec.flags.from, &rec.record.from_ref),
                Direction::To => (rec.flags.to, &rec.record.to_ref),
            };
            if flag != ColorFlag::Matched {
                continue;
            }
            let key = (rec.record.sheet, rec.record.item);
            let Some(rect) = envelopes.get(&key) else {
                continue;
            };
            let Some(target) =
                locate_target(drawing, &sheets_by_ref, &rec.record.cable_tag, drawing_ref)
            else {
                debug!(
                    "no target for {} {:?} -> {}",
                    rec.record.cable_tag, direction, drawing_ref
                );
                continue;
            };

            links.push(Link {
                sheet: key.0,
                item: key.1,
                direction,
                rect: *rect,
                cable_tag: rec.record.cable_tag.clone(),
                drawing_ref: drawing_ref.clone(),
                destination: Destination {
                    sheet: target.sheet,
                    left: target.bbox.x1 - options.margin,
                    top: target.bbox.y2 + options.margin,
                    zoom: options.zoom,
                },
            });
        }
    }

    links.sort_by_key(|l| (l.sheet, l.item, l.direction == Direction::To));
    links
}
