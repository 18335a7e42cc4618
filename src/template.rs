//! Document templates: the calibration tables behind classification and synthesis
//!
//! A template is pure data. Field lookup and band lookup are first-match-wins
//! scans over `(span, result)` rows, so adding a document layout means adding
//! a constructor here rather than touching the classifier.

use std::ops::{Bound, RangeBounds};

use crate::token::BBox;
use crate::CrossRefError;

/// A numeric interval, e.g. `(Excluded(100.0), Included(230.0))` for `100 < v <= 230`
pub type Span = (Bound<f64>, Bound<f64>);

/// Left-open, right-closed interval `lo < v <= hi`
pub fn span(lo: f64, hi: f64) -> Span {
    (Bound::Excluded(lo), Bound::Included(hi))
}

/// How the per-sheet anchor is located
#[derive(Debug, Clone, PartialEq)]
pub enum AnchorStrategy {
    /// Minimum X and maximum Y over the sheet, with Y lowered by `header_drop`
    PageExtreme { header_drop: f64 },
    /// Position of the first token whose text equals `text` (case-insensitive),
    /// with Y lowered by `header_drop`. Falls back to the page extreme when absent.
    Landmark { text: String, header_drop: f64 },
}

/// Which tokens of a sheet a template looks at
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scope {
    WholeSheet,
    /// Bottom-right corner of the sheet: the rightmost `width` units, measured
    /// back from the sheet's right edge, and the bottom `height` units
    TitleBlock { width: f64, height: f64 },
}

impl Scope {
    /// Whether a token box falls in scope; `right_edge` is the largest X2 of
    /// the sheet's extracted words
    pub fn contains(&self, bbox: &BBox, right_edge: f64) -> bool {
        match *self {
            Scope::WholeSheet => true,
            Scope::TitleBlock { width, height } => {
                bbox.y1 < height && bbox.x1 >= right_edge - width
            }
        }
    }
}

/// Maps the vertical distance from the item origin to a text line
#[derive(Debug, Clone, PartialEq)]
pub struct BandRule {
    pub dy: Span,
    pub line: usize,
}

/// Maps a horizontal offset from the anchor, on a given line, to a tag
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub line: usize,
    pub dx: Span,
    pub tag: String,
}

/// Where a placeholder for a missing field is drawn, relative to the item origin
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderRule {
    pub tag: String,
    pub line: usize,
    pub dx: f64,
    pub width: f64,
}

/// Calibration for one document layout
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub name: String,
    pub anchor: AnchorStrategy,
    pub scope: Scope,
    /// A vertical jump larger than this starts a new item
    pub item_gap: f64,
    pub bands: Vec<BandRule>,
    pub fields: Vec<FieldRule>,
    /// Required fields and their placeholder geometry, in emission order
    pub placeholders: Vec<PlaceholderRule>,
    /// Distance below the item origin of each line's baseline, indexed by line
    pub line_drops: Vec<f64>,
    /// Height given to synthesized placeholders
    pub row_height: f64,
}

fn field(line: usize, lo: f64, hi: f64, tag: &str) -> FieldRule {
    FieldRule {
        line,
        dx: span(lo, hi),
        tag: tag.to_string(),
    }
}

fn slot(tag: &str, line: usize, dx: f64, width: f64) -> PlaceholderRule {
    PlaceholderRule {
        tag: tag.to_string(),
        line,
        dx,
        width,
    }
}

/// Glyph height assumed for words whose extracted box is flatter than this
pub const MIN_WORD_HEIGHT: f64 = 5.77;

impl Template {
    /// Cable schedule anchored on the page extreme (two-line records)
    pub fn schedule() -> Self {
        Self {
            name: "schedule".to_string(),
            anchor: AnchorStrategy::PageExtreme { header_drop: 75.0 },
            scope: Scope::WholeSheet,
            item_gap: 18.0,
            bands: vec![
                BandRule {
                    dy: (Bound::Unbounded, Bound::Excluded(5.0)),
                    line: 0,
                },
                BandRule {
                    dy: (Bound::Excluded(5.0), Bound::Unbounded),
                    line: 1,
                },
            ],
            fields: vec![
                field(0, -2.0, 95.0, "cable_tag"),
                field(0, 100.0, 230.0, "from_desc"),
                field(0, 231.0, 360.0, "to_desc"),
                field(0, 361.0, 420.0, "function"),
                field(0, 486.0, 530.0, "size"),
                field(0, 540.0, 700.0, "insulation"),
                field(1, 100.0, 230.0, "from_ref"),
                field(1, 231.0, 360.0, "to_ref"),
                field(1, 400.0, 450.0, "voltage"),
                field(1, 450.0, 520.0, "conductors"),
                field(1, 521.0, 566.0, "length"),
            ],
            placeholders: vec![
                slot("cable_tag", 0, 0.0, 40.0),
                slot("from_desc", 0, 110.0, 40.0),
                slot("to_desc", 0, 247.0, 40.0),
                slot("function", 0, 388.0, 40.0),
                slot("size", 0, 516.0, 10.0),
                slot("insulation", 0, 570.0, 40.0),
                slot("from_ref", 1, 110.0, 40.0),
                slot("to_ref", 1, 247.0, 40.0),
                slot("voltage", 1, 424.0, 40.0),
                slot("conductors", 1, 500.0, 10.0),
                slot("length", 1, 555.0, 10.0),
            ],
            line_drops: vec![0.0, 12.0],
            row_height: MIN_WORD_HEIGHT,
        }
    }

    /// Cable schedule variant anchored on the `REPORT` heading
    pub fn schedule_report() -> Self {
        Self {
            name: "schedule_report".to_string(),
            anchor: AnchorStrategy::Landmark {
                text: "REPORT".to_string(),
                header_drop: 70.0,
            },
            item_gap: 17.0,
            ..Self::schedule()
        }
    }

    /// Drawing title block: one item per sheet, four text rows
    pub fn drawing_title() -> Self {
        Self {
            name: "drawing_title".to_string(),
            anchor: AnchorStrategy::PageExtreme { header_drop: 0.0 },
            scope: Scope::TitleBlock {
                width: 495.0,
                height: 114.0,
            },
            item_gap: f64::INFINITY,
            bands: vec![
                BandRule {
                    dy: (Bound::Unbounded, Bound::Excluded(5.0)),
                    line: 0,
                },
                BandRule {
                    dy: span(5.0, 20.0),
                    line: 1,
                },
                BandRule {
                    dy: span(20.0, 35.0),
                    line: 2,
                },
                BandRule {
                    dy: span(35.0, 60.0),
                    line: 3,
                },
            ],
            fields: vec![
                field(0, -2.0, 250.0, "facility_name"),
                field(0, 250.0, 495.0, "facility_id"),
                field(1, -2.0, 495.0, "dwg_title1"),
                field(2, -2.0, 495.0, "dwg_title2"),
                field(3, -2.0, 80.0, "dwg_scale"),
                field(3, 80.0, 130.0, "dwg_size"),
                field(3, 130.0, 300.0, "dwg_number"),
                field(3, 300.0, 360.0, "dwg_sheet"),
                field(3, 360.0, 410.0, "dwg_rev"),
                field(3, 410.0, 495.0, "dwg_type"),
            ],
            placeholders: vec![
                slot("facility_name", 0, 0.0, 120.0),
                slot("facility_id", 0, 260.0, 60.0),
                slot("dwg_title1", 1, 0.0, 200.0),
                slot("dwg_title2", 2, 0.0, 200.0),
                slot("dwg_scale", 3, 0.0, 40.0),
                slot("dwg_size", 3, 90.0, 15.0),
                slot("dwg_number", 3, 140.0, 80.0),
                slot("dwg_sheet", 3, 310.0, 20.0),
                slot("dwg_rev", 3, 370.0, 15.0),
                slot("dwg_type", 3, 420.0, 40.0),
            ],
            line_drops: vec![0.0, 14.0, 28.0, 48.0],
            row_height: MIN_WORD_HEIGHT,
        }
    }

    /// Look a built-in template up by name
    pub fn by_name(name: &str) -> Result<Self, CrossRefError> {
        match name {
            "schedule" => Ok(Self::schedule()),
            "schedule_report" => Ok(Self::schedule_report()),
            "drawing_title" => Ok(Self::drawing_title()),
            other => Err(CrossRefError::UnknownTemplate(other.to_string())),
        }
    }

    /// Text line for a vertical distance from the item origin
    pub fn band_of(&self, dy: f64) -> Option<usize> {
        let dy = dy.abs();
        self.bands
            .iter()
            .find(|rule| rule.dy.contains(&dy))
            .map(|rule| rule.line)
    }

    /// Tag for a horizontal offset on a line; `None` is a soft miss
    pub fn tag_for(&self, line: usize, dx: f64) -> Option<&str> {
        self.fields
            .iter()
            .find(|rule| rule.line == line && rule.dx.contains(&dx))
            .map(|rule| rule.tag.as_str())
    }

    /// Fields every item is expected to carry
    pub fn required_tags(&self) -> impl Iterator<Item = &str> {
        self.placeholders.iter().map(|p| p.tag.as_str())
    }

    pub fn line_drop(&self, line: usize) -> f64 {
        self.line_drops.get(line).copied().unwrap_or(0.0)
    }
}

impl Default for Template {
    fn default() -> Self {
        Self::schedule()
    }
}
