//! Positioned text tokens and the small geometry model they carry
//!
//! Every stage of the pipeline reads and annotates these records. A token
//! starts life untagged (item 0, flag `Unset`) and is only ever mutated by
//! the classifier (tag, item) and the reconciler (color flag).

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Axis-aligned bounding box in PDF user space (origin bottom-left)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// Smallest box covering both boxes
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }
}

/// One of the four right-angle rotations a page or word can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    /// Snap an arbitrary angle in degrees to the nearest right angle
    pub fn from_degrees(degrees: i64) -> Self {
        let normalized = degrees.rem_euclid(360);
        match ((normalized + 45) / 90) % 4 {
            0 => Rotation::R0,
            1 => Rotation::R90,
            2 => Rotation::R180,
            _ => Rotation::R270,
        }
    }

    pub fn degrees(self) -> i64 {
        match self {
            Rotation::R0 => 0,
            Rotation::R90 => 90,
            Rotation::R180 => 180,
            Rotation::R270 => 270,
        }
    }
}

/// Cross-reference validation status, later rendered as a highlight color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorFlag {
    #[default]
    Unset,
    Matched,
    Missing,
    NotFound,
    Ambiguous,
}

impl ColorFlag {
    /// Integer code used by the persisted `ColorFlag` column
    pub fn code(self) -> i64 {
        match self {
            ColorFlag::Unset => 0,
            ColorFlag::Matched => 1,
            ColorFlag::Missing => 2,
            ColorFlag::NotFound => 3,
            ColorFlag::Ambiguous => 4,
        }
    }

    /// Unknown codes read back as `Unset`
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ColorFlag::Matched,
            2 => ColorFlag::Missing,
            3 => ColorFlag::NotFound,
            4 => ColorFlag::Ambiguous,
            _ => ColorFlag::Unset,
        }
    }
}

/// The two document sets the engine reconciles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// Cable/wire schedule (one record per cable)
    Schedule,
    /// Drawing sheets (title block plus cable tags on the body)
    Drawing,
}

impl DocumentKind {
    pub fn table_name(self) -> &'static str {
        match self {
            DocumentKind::Schedule => "schedule_table",
            DocumentKind::Drawing => "drawing_table",
        }
    }
}

/// A positioned word extracted from a page
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Word text; empty for synthesized placeholders
    pub text: String,
    pub bbox: BBox,
    /// Sheet (page) number, 1-indexed
    pub sheet: u32,
    pub page_rotation: Rotation,
    pub word_rotation: Rotation,
    /// Semantic field name, `None` while unclassified
    pub tag: Option<String>,
    /// Item number within the sheet, 0 while unassigned
    pub item: u32,
    pub color: ColorFlag,
}

impl Token {
    pub fn new(text: impl Into<String>, bbox: BBox, sheet: u32) -> Self {
        Self {
            text: text.into(),
            bbox,
            sheet,
            page_rotation: Rotation::R0,
            word_rotation: Rotation::R0,
            tag: None,
            item: 0,
            color: ColorFlag::Unset,
        }
    }

    /// Placeholder for a field that is expected but absent
    pub fn placeholder(tag: &str, bbox: BBox, sheet: u32, item: u32) -> Self {
        Self {
            tag: Some(tag.to_string()),
            item,
            ..Self::new(String::new(), bbox, sheet)
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.text.is_empty()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tag.as_deref() == Some(tag)
    }

    /// X of the bottom-left corner, the coordinate fields are measured from
    pub fn x(&self) -> f64 {
        self.bbox.x1
    }

    /// Y of the bottom-left corner (text baseline)
    pub fn y(&self) -> f64 {
        self.bbox.y1
    }
}

/// Reading order on a page: sheet ascending, then top to bottom, then left to right
pub fn reading_order(a: &Token, b: &Token) -> Ordering {
    a.sheet
        .cmp(&b.sheet)
        .then_with(|| b.y().total_cmp(&a.y()))
        .then_with(|| a.x().total_cmp(&b.x()))
}

/// Indices of the tokens on each sheet, sheets in ascending order and
/// tokens sorted by descending Y. The sort is stable so tokens sharing a
/// baseline keep their stream order.
pub fn sheet_scan_order(tokens: &[Token]) -> BTreeMap<u32, Vec<usize>> {
    let mut sheets: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (idx, token) in tokens.iter().enumerate() {
        sheets.entry(token.sheet).or_default().push(idx);
    }
    for indices in sheets.values_mut() {
        indices.sort_by(|&a, &b| tokens[b].y().total_cmp(&tokens[a].y()));
    }
    sheets
}

/// Space-joined text of the tokens carrying `tag` in one item, in reading order
pub fn field_text(tokens: &[Token], sheet: u32, item: u32, tag: &str) -> String {
    let mut parts: Vec<&Token> = tokens
        .iter()
        .filter(|t| t.sheet == sheet && t.item == item && t.has_tag(tag) && !t.is_placeholder())
        .collect();
    parts.sort_by(|a, b| reading_order(a, b));
    parts
        .iter()
        .map(|t| t.text.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_snaps_to_right_angles() {
        assert_eq!(Rotation::from_degrees(0), Rotation::R0);
        assert_eq!(Rotation::from_degrees(90), Rotation::R90);
        assert_eq!(Rotation::from_degrees(-90), Rotation::R270);
        assert_eq!(Rotation::from_degrees(450), Rotation::R90);
        assert_eq!(Rotation::from_degrees(181), Rotation::R180);
        assert_eq!(Rotation::from_degrees(350), Rotation::R0);
    }

    #[test]
    fn test_color_flag_codes() {
        for flag in [
            ColorFlag::Unset,
            ColorFlag::Matched,
            ColorFlag::Missing,
            ColorFlag::NotFound,
            ColorFlag::Ambiguous,
        ] {
            assert_eq!(ColorFlag::from_code(flag.code()), flag);
        }
        assert_eq!(ColorFlag::from_code(42), ColorFlag::Unset);
    }

    #[test]
    fn test_bbox_union() {
        let a = BBox::new(10.0, 10.0, 20.0, 15.0);
        let b = BBox::new(25.0, 8.0, 40.0, 14.0);
        assert_eq!(a.union(&b), BBox::new(10.0, 8.0, 40.0, 15.0));
    }

    #[test]
    fn test_sheet_scan_order_is_stable() {
        let tokens = vec![
            Token::new("b", BBox::new(50.0, 100.0, 60.0, 105.0), 1),
            Token::new("low", BBox::new(10.0, 80.0, 20.0, 85.0), 1),
            Token::new("a", BBox::new(10.0, 100.0, 20.0, 105.0), 1),
            Token::new("p2", BBox::new(10.0, 500.0, 20.0, 505.0), 2),
        ];
        let order = sheet_scan_order(&tokens);
        assert_eq!(order[&1], vec![0, 2, 1]);
        assert_eq!(order[&2], vec![3]);
    }

    #[test]
    fn test_field_text_joins_in_reading_order() {
        let mut tokens = vec![
            Token::new("PANEL", BBox::new(60.0, 100.0, 80.0, 105.0), 1),
            Token::new("MAIN", BBox::new(30.0, 100.0, 55.0, 105.0), 1),
            Token::placeholder("from_desc", BBox::default(), 1, 1),
        ];
        for t in tokens.iter_mut() {
            t.tag = Some("from_desc".into());
            t.item = 1;
        }
        assert_eq!(field_text(&tokens, 1, 1, "from_desc"), "MAIN PANEL");
        assert_eq!(field_text(&tokens, 1, 2, "from_desc"), "");
    }
}
