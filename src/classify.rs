//! Positional field classification
//!
//! Tokens of each sheet are scanned top to bottom. A small accumulator
//! (`ScanState`) carries the anchor, the current item's origin and the item
//! counter from one token to the next; nothing is kept between calls, so
//! classifying the same tokens twice yields the same assignments.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use crate::template::{AnchorStrategy, Template};
use crate::token::{sheet_scan_order, Token};

/// Per-sheet reference point all field offsets are measured from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub x: f64,
    pub y: f64,
}

/// What the classifier saw for one item
#[derive(Debug, Clone, PartialEq)]
pub struct ItemObservation {
    pub sheet: u32,
    pub item: u32,
    /// X anchor of the sheet and baseline of the item's first line
    pub origin: Anchor,
    /// Distinct tags assigned to tokens of this item
    pub tags: BTreeSet<String>,
}

/// Result of classifying a token set
#[derive(Debug, Clone, Default)]
pub struct ClassifyOutcome {
    pub anchors: BTreeMap<u32, Anchor>,
    pub items: Vec<ItemObservation>,
    /// Tokens that received a tag
    pub tagged: usize,
    /// In-body tokens whose offset matched no interval (left untagged)
    pub misses: usize,
    /// Tokens above the working band
    pub header_skipped: usize,
}

/// Where a token landed during the scan
#[derive(Debug, Clone, Copy, PartialEq)]
enum Placement {
    Header,
    Body {
        item: u32,
        line: Option<usize>,
        dx: f64,
    },
}

/// Carried-forward scan state for one sheet
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScanState {
    x_anchor: f64,
    y_anchor: f64,
    in_body: bool,
    item: u32,
}

impl ScanState {
    fn new(anchor: Anchor) -> Self {
        Self {
            x_anchor: anchor.x,
            y_anchor: anchor.y,
            in_body: false,
            item: 1,
        }
    }

    /// Consume one token position and return the next state
    fn advance(self, x: f64, y: f64, template: &Template) -> (Self, Placement) {
        let mut next = self;

        if !next.in_body {
            if y > next.y_anchor {
                return (next, Placement::Header);
            }
            next.in_body = true;
            next.y_anchor = y;
        }

        if (y - next.y_anchor).abs() > template.item_gap {
            next.item += 1;
            next.y_anchor = y;
        }

        let placement = Placement::Body {
            item: next.item,
            line: template.band_of(y - next.y_anchor),
            dx: x - next.x_anchor,
        };
        (next, placement)
    }

    fn origin(&self) -> Anchor {
        Anchor {
            x: self.x_anchor,
            y: self.y_anchor,
        }
    }
}

/// Right edge of a sheet: the largest X2 over its extracted words
fn right_edge(tokens: &[Token], indices: &[usize]) -> f64 {
    indices
        .iter()
        .map(|&i| &tokens[i])
        .filter(|t| !t.is_placeholder())
        .map(|t| t.bbox.x2)
        .fold(f64::NEG_INFINITY, f64::max)
}

/// Locate the anchor for one sheet; `None` when the sheet has nothing in scope
pub fn locate_anchor(tokens: &[Token], indices: &[usize], template: &Template) -> Option<Anchor> {
    let right = right_edge(tokens, indices);
    let in_scope = || {
        indices
            .iter()
            .map(move |&i| &tokens[i])
            .filter(move |t| !t.is_placeholder() && template.scope.contains(&t.bbox, right))
    };

    let extreme = |drop: f64| {
        let mut any = false;
        let mut x = f64::INFINITY;
        let mut y = f64::NEG_INFINITY;
        for t in in_scope() {
            any = true;
            x = x.min(t.x());
            y = y.max(t.y());
        }
        any.then(|| Anchor { x, y: y - drop })
    };

    match &template.anchor {
        AnchorStrategy::PageExtreme { header_drop } => extreme(*header_drop),
        AnchorStrategy::Landmark { text, header_drop } => {
            match in_scope().find(|t| t.text.trim().eq_ignore_ascii_case(text)) {
                Some(landmark) => Some(Anchor {
                    x: landmark.x(),
                    y: landmark.y() - header_drop,
                }),
                None => {
                    let fallback = extreme(*header_drop);
                    if fallback.is_some() {
                        warn!(
                            "landmark {:?} not found on sheet {}, using page extreme",
                            text,
                            indices.first().map(|&i| tokens[i].sheet).unwrap_or(0)
                        );
                    }
                    fallback
                }
            }
        }
    }
}

/// Classify every sheet of a token set in place
///
/// Placeholder tokens (empty text) are left untouched, as are tokens outside
/// the template's scope. In-scope tokens are reset first, so a token that no
/// longer matches ends up untagged rather than keeping a stale tag.
pub fn classify_tokens(tokens: &mut [Token], template: &Template) -> ClassifyOutcome {
    let mut outcome = ClassifyOutcome::default();

    for (sheet, indices) in sheet_scan_order(tokens) {
        classify_sheet(tokens, sheet, &indices, template, &mut outcome);
    }

    debug!(
        "classified with {}: {} tagged, {} misses, {} header tokens, {} items",
        template.name,
        outcome.tagged,
        outcome.misses,
        outcome.header_skipped,
        outcome.items.len()
    );
    outcome
}

fn classify_sheet(
    tokens: &mut [Token],
    sheet: u32,
    indices: &[usize],
    template: &Template,
    outcome: &mut ClassifyOutcome,
) {
    let Some(anchor) = locate_anchor(tokens, indices, template) else {
        return;
    };
    debug!("sheet {}: anchor ({:.1}, {:.1})", sheet, anchor.x, anchor.y);
    outcome.anchors.insert(sheet, anchor);

    let right = right_edge(tokens, indices);
    let mut state = ScanState::new(anchor);
    let mut current: Option<ItemObservation> = None;

    for &idx in indices {
        let token = &mut tokens[idx];
        if token.is_placeholder() || !template.scope.contains(&token.bbox, right) {
            continue;
        }
        token.tag = None;
        token.item = 0;

        let (next, placement) = state.advance(token.x(), token.y(), template);
        state = next;

        let (item, line, dx) = match placement {
            Placement::Header => {
                outcome.header_skipped += 1;
                continue;
            }
            Placement::Body { item, line, dx } => (item, line, dx),
        };

        if current.as_ref().map(|obs| obs.item) != Some(item) {
            if let Some(done) = current.take() {
                outcome.items.push(done);
            }
            current = Some(ItemObservation {
                sheet,
                item,
                origin: state.origin(),
                tags: BTreeSet::new(),
            });
        }

        match line.and_then(|line| template.tag_for(line, dx)) {
            Some(tag) => {
                token.tag = Some(tag.to_string());
                token.item = item;
                outcome.tagged += 1;
                if let Some(obs) = current.as_mut() {
                    obs.tags.insert(tag.to_string());
                }
            }
            None => {
                outcome.misses += 1;
                debug!(
                    "sheet {} item {}: no field for {:?} at dx {:.1}",
                    sheet, item, token.text, dx
                );
            }
        }
    }

    if let Some(done) = current.take() {
        outcome.items.push(done);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::BBox;

    fn word(text: &str, x: f64, y: f64, sheet: u32) -> Token {
        Token::new(text, BBox::new(x, y, x + 30.0, y + 6.0), sheet)
    }

    /// A schedule sheet: header line at 600, two records below
    fn schedule_sheet() -> Vec<Token> {
        vec![
            word("CABLE SCHEDULE", 30.0, 600.0, 1),
            word("C-101", 30.0, 500.0, 1),
            word("MCC-1", 160.0, 500.0, 1),
            word("PUMP-1", 300.0, 500.0, 1),
            word("(A1)", 160.0, 488.0, 1),
            word("(B2)", 300.0, 488.0, 1),
            word("C-102", 30.0, 470.0, 1),
            word("600V", 440.0, 458.0, 1),
        ]
    }

    #[test]
    fn test_first_line_token_near_anchor_is_cable_tag() {
        let mut tokens = vec![word("HDR", 30.0, 600.0, 1), word("C-1", 40.0, 500.0, 1)];
        let outcome = classify_tokens(&mut tokens, &Template::schedule());
        assert_eq!(outcome.anchors[&1].x, 30.0);
        assert_eq!(tokens[1].tag.as_deref(), Some("cable_tag"));
        assert_eq!(tokens[1].item, 1);
        assert_eq!(tokens[0].tag, None);
        assert_eq!(outcome.header_skipped, 1);
    }

    #[test]
    fn test_items_split_on_vertical_gap() {
        let mut tokens = schedule_sheet();
        let outcome = classify_tokens(&mut tokens, &Template::schedule());

        let tag = |i: usize| tokens[i].tag.as_deref();
        assert_eq!(tag(1), Some("cable_tag"));
        assert_eq!(tag(2), Some("from_desc"));
        assert_eq!(tag(3), Some("to_desc"));
        assert_eq!(tag(4), Some("from_ref"));
        assert_eq!(tag(5), Some("to_ref"));
        assert_eq!(tag(6), Some("cable_tag"));
        assert_eq!(tag(7), Some("voltage"));
        assert_eq!(tokens[4].item, 1);
        assert_eq!(tokens[6].item, 2);
        assert_eq!(tokens[7].item, 2);

        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.items[0].origin, Anchor { x: 30.0, y: 500.0 });
        assert_eq!(outcome.items[1].origin, Anchor { x: 30.0, y: 470.0 });
        assert_eq!(outcome.items[1].tags.len(), 2);
    }

    #[test]
    fn test_unmatched_offset_stays_untagged() {
        let mut tokens = vec![
            word("HDR", 30.0, 600.0, 1),
            word("C-1", 30.0, 500.0, 1),
            word("stray", 470.0, 500.0, 1),
        ];
        let outcome = classify_tokens(&mut tokens, &Template::schedule());
        assert_eq!(tokens[2].tag, None);
        assert_eq!(tokens[2].item, 0);
        assert_eq!(outcome.misses, 1);
        assert_eq!(tokens.len(), 3);
        // Only tagged tokens belong to an item
        assert!(tokens.iter().filter(|t| t.item > 0).all(|t| t.tag.is_some()));
    }

    #[test]
    fn test_item_numbers_restart_per_sheet() {
        let mut tokens = schedule_sheet();
        tokens.extend(schedule_sheet().into_iter().map(|mut t| {
            t.sheet = 2;
            t
        }));
        classify_tokens(&mut tokens, &Template::schedule());
        let sheet2_items: Vec<u32> = tokens
            .iter()
            .filter(|t| t.sheet == 2 && t.item > 0)
            .map(|t| t.item)
            .collect();
        assert_eq!(sheet2_items.first(), Some(&1));
        assert_eq!(sheet2_items.last(), Some(&2));
    }

    #[test]
    fn test_classification_is_idempotent() {
        let mut tokens = schedule_sheet();
        let template = Template::schedule();
        let first = classify_tokens(&mut tokens, &template);
        let snapshot = tokens.clone();
        let second = classify_tokens(&mut tokens, &template);
        assert_eq!(tokens, snapshot);
        assert_eq!(first.items, second.items);
    }

    #[test]
    fn test_placeholders_do_not_move_the_anchor() {
        let mut tokens = schedule_sheet();
        tokens.push(Token::placeholder(
            "length",
            BBox::new(0.0, 900.0, 10.0, 905.0),
            1,
            1,
        ));
        let outcome = classify_tokens(&mut tokens, &Template::schedule());
        assert_eq!(outcome.anchors[&1], Anchor { x: 30.0, y: 525.0 });
        assert_eq!(tokens[8].tag.as_deref(), Some("length"));
    }

    #[test]
    fn test_landmark_anchor() {
        let mut tokens = vec![
            word("REPORT", 50.0, 700.0, 1),
            word("C-7", 55.0, 600.0, 1),
            word("(X1)", 160.0, 588.0, 1),
        ];
        let outcome = classify_tokens(&mut tokens, &Template::schedule_report());
        assert_eq!(outcome.anchors[&1], Anchor { x: 50.0, y: 630.0 });
        assert_eq!(tokens[1].tag.as_deref(), Some("cable_tag"));
        assert_eq!(tokens[2].tag.as_deref(), Some("from_ref"));
    }

    #[test]
    fn test_title_anchor_ignores_bottom_left_labels() {
        let mut tokens = vec![
            word("A", 20.0, 30.0, 1),
            word("PLANT", 800.0, 100.0, 1),
            word("E", 900.0, 52.0, 1),
            word("7", 1120.0, 52.0, 1),
        ];
        let outcome = classify_tokens(&mut tokens, &Template::drawing_title());
        assert_eq!(outcome.anchors[&1], Anchor { x: 800.0, y: 100.0 });
        assert_eq!(tokens[0].tag, None);
        assert_eq!(tokens[0].item, 0);
        assert_eq!(tokens[2].tag.as_deref(), Some("dwg_size"));
        assert_eq!(tokens[3].tag.as_deref(), Some("dwg_sheet"));
    }

    #[test]
    fn test_empty_sheet_is_noop() {
        let mut tokens: Vec<Token> = Vec::new();
        let outcome = classify_tokens(&mut tokens, &Template::schedule());
        assert!(outcome.items.is_empty());
        assert!(outcome.anchors.is_empty());
    }
}
