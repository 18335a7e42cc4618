//! Positioned word extraction from PDF using lopdf
//!
//! Walks each page's content stream, tracking the graphics and text state,
//! and emits one [`Token`] per whitespace-separated word. Glyph widths are
//! estimated from the font size. Pages are processed in parallel and merged
//! back in sheet order.

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, warn};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use rayon::prelude::*;

use crate::template::MIN_WORD_HEIGHT;
use crate::token::{BBox, Rotation, Token};
use crate::CrossRefError;

/// Part of a page whose words are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Region {
    #[default]
    FullPage,
    /// Schedule table body: drops the page header and footer
    ScheduleBody,
    /// Title block in the bottom-right corner of a drawing
    TitleBlock,
    /// Everything above the title block strip
    DrawingBody,
}

const BODY_HEADER: f64 = 85.0;
const BODY_FOOTER: f64 = 10.0;
const TITLE_BLOCK_WIDTH: f64 = 495.0;
const TITLE_BLOCK_HEIGHT: f64 = 114.0;
const DRAWING_BODY_FLOOR: f64 = 95.0;

impl Region {
    /// Rectangle covered by this region on a page
    ///
    /// `content` is the extent of all words found on the page.
    pub fn bounds(self, width: f64, height: f64, content: &BBox) -> BBox {
        match self {
            Region::FullPage => BBox::new(0.0, 0.0, width, height),
            Region::ScheduleBody => BBox::new(
                content.x1,
                content.y1 + BODY_FOOTER,
                width - content.x1,
                content.y2 - BODY_HEADER,
            ),
            Region::TitleBlock => {
                BBox::new(width - TITLE_BLOCK_WIDTH, 0.0, width, TITLE_BLOCK_HEIGHT)
            }
            Region::DrawingBody => BBox::new(0.0, DRAWING_BODY_FLOOR, width, height),
        }
    }
}

/// Extraction settings
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub region: Region,
    /// Drop the line holding a `DATE:` stamp
    pub skip_date_line: bool,
    /// Words flatter than this are grown to it
    pub min_word_height: f64,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            region: Region::FullPage,
            skip_date_line: true,
            min_word_height: MIN_WORD_HEIGHT,
        }
    }
}

impl ExtractOptions {
    pub fn with_region(region: Region) -> Self {
        Self {
            region,
            ..Default::default()
        }
    }
}

/// Extract tokens from a PDF file
pub fn extract_tokens<P: AsRef<Path>>(
    path: P,
    options: &ExtractOptions,
) -> Result<Vec<Token>, CrossRefError> {
    let doc = Document::load(path)?;
    extract_tokens_from_doc(&doc, options)
}

/// Extract tokens from a PDF memory buffer
pub fn extract_tokens_mem(
    buffer: &[u8],
    options: &ExtractOptions,
) -> Result<Vec<Token>, CrossRefError> {
    let doc = Document::load_mem(buffer)?;
    extract_tokens_from_doc(&doc, options)
}

fn extract_tokens_from_doc(
    doc: &Document,
    options: &ExtractOptions,
) -> Result<Vec<Token>, CrossRefError> {
    let pages: Vec<(u32, ObjectId)> = doc.get_pages().into_iter().collect();

    let per_page: Vec<Vec<Token>> = pages
        .par_iter()
        .map(|&(sheet, page_id)| extract_page(doc, page_id, sheet, options))
        .collect::<Result<_, _>>()?;

    let tokens: Vec<Token> = per_page.into_iter().flatten().collect();
    debug!("extracted {} words from {} pages", tokens.len(), pages.len());
    Ok(tokens)
}

const DEFAULT_PAGE_SIZE: (f64, f64) = (612.0, 792.0);

/// Page width and height from the MediaBox, walking up to inherited values
fn page_size(doc: &Document, page_id: ObjectId) -> (f64, f64) {
    let media_box = inherited(doc, page_id, b"MediaBox").and_then(|obj| {
        let values: Vec<f64> = obj
            .as_array()
            .ok()?
            .iter()
            .filter_map(get_number)
            .collect();
        (values.len() == 4).then(|| (values[2] - values[0], values[3] - values[1]))
    });
    media_box.unwrap_or(DEFAULT_PAGE_SIZE)
}

fn page_rotation(doc: &Document, page_id: ObjectId) -> Rotation {
    inherited(doc, page_id, b"Rotate")
        .and_then(|obj| obj.as_i64().ok())
        .map(Rotation::from_degrees)
        .unwrap_or_default()
}

/// Look a page attribute up on the page or its ancestors
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut dict = doc.get_object(page_id).ok()?.as_dict().ok()?;
    loop {
        if let Ok(value) = dict.get(key) {
            return match value {
                Object::Reference(id) => doc.get_object(*id).ok(),
                other => Some(other),
            };
        }
        let parent = dict.get(b"Parent").ok()?.as_reference().ok()?;
        dict = doc.get_object(parent).ok()?.as_dict().ok()?;
    }
}

/// Extract, normalise and filter the words of one page
fn extract_page(
    doc: &Document,
    page_id: ObjectId,
    sheet: u32,
    options: &ExtractOptions,
) -> Result<Vec<Token>, CrossRefError> {
    let fonts = doc.get_page_fonts(page_id).unwrap_or_default();
    let content_data = doc.get_page_content(page_id)?;
    let content = Content::decode(&content_data)?;

    let mut scan = PageScan::new(doc, &fonts, sheet, page_rotation(doc, page_id));
    for op in &content.operations {
        scan.apply(&op.operator, &op.operands);
    }
    let mut words = scan.words;

    for word in words.iter_mut() {
        word.bbox = normalize_height(&word.text, word.bbox, options.min_word_height);
    }
    if options.skip_date_line {
        words = drop_date_line(words);
    }

    let (width, height) = page_size(doc, page_id);
    let Some(content_box) = words.iter().map(|t| t.bbox).reduce(|a, b| a.union(&b)) else {
        return Ok(words);
    };
    let region = options.region.bounds(width, height, &content_box);
    let before = words.len();
    words.retain(|t| within(&t.bbox, &region));
    if words.len() < before {
        debug!(
            "sheet {}: {} words outside {:?}",
            sheet,
            before - words.len(),
            options.region
        );
    }
    Ok(words)
}

fn within(bbox: &BBox, region: &BBox) -> bool {
    bbox.x1 >= region.x1 && bbox.x2 <= region.x2 && bbox.y1 >= region.y1 && bbox.y2 <= region.y2
}

/// Grow a word box that is flatter than `min_height`
///
/// Words carrying a quote mark keep their top edge, since the mark sits high;
/// others keep their baseline.
pub fn normalize_height(text: &str, bbox: BBox, min_height: f64) -> BBox {
    if (bbox.y2 - bbox.y1).abs() >= FLAT_WORD {
        return bbox;
    }
    if text.contains('"') || text.contains('\'') {
        BBox::new(bbox.x1, bbox.y2 - min_height, bbox.x2, bbox.y2)
    } else {
        BBox::new(bbox.x1, bbox.y1, bbox.x2, bbox.y1 + min_height)
    }
}

const FLAT_WORD: f64 = 5.0;
const DATE_LINE_TOLERANCE: f64 = 2.0;

/// Remove every word on the same baseline as a `DATE:` stamp
pub fn drop_date_line(words: Vec<Token>) -> Vec<Token> {
    let Some(date_y) = words
        .iter()
        .find(|t| t.text.trim().eq_ignore_ascii_case("DATE:"))
        .map(|t| t.bbox.y1)
    else {
        return words;
    };
    words
        .into_iter()
        .filter(|t| (t.bbox.y1 - date_y).abs() >= DATE_LINE_TOLERANCE)
        .collect()
}

/// Rotation of a word from the vector between its first and last glyph
pub fn word_rotation(dx: f64, dy: f64) -> Rotation {
    if dx.abs() >= dy.abs() {
        if dx >= 0.0 {
            Rotation::R0
        } else {
            Rotation::R180
        }
    } else if dy >= 0.0 {
        Rotation::R90
    } else {
        Rotation::R270
    }
}

type Matrix = [f64; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// Average glyph advance as a fraction of the font size
const GLYPH_ADVANCE: f64 = 0.5;
/// TJ adjustment (thousandths of an em) wide enough to read as a space
const TJ_SPACE: f64 = -250.0;

/// Multiply two 2D transformation matrices
/// Matrix format: [a, b, c, d, e, f] representing:
/// | a  b  0 |
/// | c  d  0 |
/// | e  f  1 |
fn multiply_matrices(m1: &Matrix, m2: &Matrix) -> Matrix {
    [
        m1[0] * m2[0] + m1[1] * m2[2],
        m1[0] * m2[1] + m1[1] * m2[3],
        m1[2] * m2[0] + m1[3] * m2[2],
        m1[2] * m2[1] + m1[3] * m2[3],
        m1[4] * m2[0] + m1[5] * m2[2] + m2[4],
        m1[4] * m2[1] + m1[5] * m2[3] + m2[5],
    ]
}

/// Graphics and text state while walking one content stream
struct PageScan<'a> {
    doc: &'a Document,
    fonts: &'a BTreeMap<Vec<u8>, &'a Dictionary>,
    sheet: u32,
    page_rotation: Rotation,
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    font: String,
    font_size: f64,
    text_matrix: Matrix,
    line_matrix: Matrix,
    in_text_block: bool,
    words: Vec<Token>,
}

impl<'a> PageScan<'a> {
    fn new(
        doc: &'a Document,
        fonts: &'a BTreeMap<Vec<u8>, &'a Dictionary>,
        sheet: u32,
        page_rotation: Rotation,
    ) -> Self {
        Self {
            doc,
            fonts,
            sheet,
            page_rotation,
            ctm: IDENTITY,
            ctm_stack: Vec::new(),
            font: String::new(),
            font_size: 12.0,
            text_matrix: IDENTITY,
            line_matrix: IDENTITY,
            in_text_block: false,
            words: Vec::new(),
        }
    }

    fn apply(&mut self, operator: &str, operands: &[Object]) {
        match operator {
            "q" => self.ctm_stack.push(self.ctm),
            "Q" => {
                if let Some(saved) = self.ctm_stack.pop() {
                    self.ctm = saved;
                }
            }
            "cm" => {
                if let Some(m) = matrix_operand(operands) {
                    self.ctm = multiply_matrices(&m, &self.ctm);
                }
            }
            "BT" => {
                self.in_text_block = true;
                self.text_matrix = IDENTITY;
                self.line_matrix = IDENTITY;
            }
            "ET" => self.in_text_block = false,
            "Tf" => {
                if let [name, size, ..] = operands {
                    if let Ok(name) = name.as_name() {
                        self.font = String::from_utf8_lossy(name).to_string();
                    }
                    if let Some(size) = get_number(size) {
                        self.font_size = size;
                    }
                }
            }
            "Td" | "TD" => {
                if let [tx, ty, ..] = operands {
                    self.line_matrix[4] += get_number(tx).unwrap_or(0.0);
                    self.line_matrix[5] += get_number(ty).unwrap_or(0.0);
                    self.text_matrix = self.line_matrix;
                }
            }
            "Tm" => {
                if let Some(m) = matrix_operand(operands) {
                    self.text_matrix = m;
                    self.line_matrix = m;
                }
            }
            "T*" => self.next_line(),
            "Tj" => {
                if let Some(text) = operands.first().and_then(|o| self.decode(o)) {
                    self.show(&text);
                }
            }
            "'" => {
                self.next_line();
                if let Some(text) = operands.first().and_then(|o| self.decode(o)) {
                    self.show(&text);
                }
            }
            "TJ" => {
                let Some(Ok(array)) = operands.first().map(Object::as_array) else {
                    return;
                };
                let mut combined = String::new();
                for item in array {
                    match get_number(item) {
                        Some(adjust) if adjust <= TJ_SPACE => combined.push(' '),
                        Some(_) => {}
                        None => {
                            if let Some(text) = self.decode(item) {
                                combined.push_str(&text);
                            }
                        }
                    }
                }
                self.show(&combined);
            }
            _ => {}
        }
    }

    fn next_line(&mut self) {
        self.line_matrix[5] -= self.font_size * 1.2;
        self.text_matrix = self.line_matrix;
    }

    /// Decode a string operand with the current font's encoding
    fn decode(&self, obj: &Object) -> Option<String> {
        let Object::String(bytes, _) = obj else {
            return None;
        };
        if let Some(font_dict) = self.fonts.get(self.font.as_bytes()) {
            if let Ok(encoding) = font_dict.get_font_encoding(self.doc) {
                if let Ok(text) = Document::decode_text(&encoding, bytes) {
                    return Some(text);
                }
            }
        }

        if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
            let utf16: Vec<u16> = bytes[2..]
                .chunks_exact(2)
                .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                .collect();
            return Some(String::from_utf16_lossy(&utf16));
        }

        // Latin-1
        Some(bytes.iter().map(|&b| b as char).collect())
    }

    /// Emit the words of a shown string and advance the text position
    fn show(&mut self, text: &str) {
        if !self.in_text_block {
            return;
        }
        let combined = multiply_matrices(&self.text_matrix, &self.ctm);
        let scale_x = combined[0].hypot(combined[1]);
        let scale_y = combined[2].hypot(combined[3]);
        if scale_x == 0.0 || scale_y == 0.0 {
            warn!("sheet {}: degenerate text matrix, text dropped", self.sheet);
            return;
        }
        let dir = (combined[0] / scale_x, combined[1] / scale_x);
        let up = (combined[2] / scale_y, combined[3] / scale_y);
        let advance = self.font_size * GLYPH_ADVANCE * scale_x;
        let height = self.font_size * scale_y;
        let origin = (combined[4], combined[5]);
        let at = |chars: usize| {
            let d = chars as f64 * advance;
            (origin.0 + dir.0 * d, origin.1 + dir.1 * d)
        };

        let chars: Vec<char> = text.chars().collect();
        let mut start = 0;
        while start < chars.len() {
            if chars[start].is_whitespace() {
                start += 1;
                continue;
            }
            let end = chars[start..]
                .iter()
                .position(|c| c.is_whitespace())
                .map_or(chars.len(), |n| start + n);

            let first = at(start);
            let last_glyph = at(end - 1);
            let stop = at(end);
            let corners = [
                first,
                stop,
                (first.0 + up.0 * height, first.1 + up.1 * height),
                (stop.0 + up.0 * height, stop.1 + up.1 * height),
            ];
            let bbox = BBox::new(
                corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min),
                corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min),
                corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max),
                corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max),
            );

            let word: String = chars[start..end].iter().collect();
            let mut token = Token::new(word, bbox, self.sheet);
            token.page_rotation = self.page_rotation;
            token.word_rotation = word_rotation(last_glyph.0 - first.0, last_glyph.1 - first.1);
            self.words.push(token);
            start = end;
        }

        let width = chars.len() as f64 * self.font_size * GLYPH_ADVANCE;
        self.text_matrix = multiply_matrices(&[1.0, 0.0, 0.0, 1.0, width, 0.0], &self.text_matrix);
    }
}

fn matrix_operand(operands: &[Object]) -> Option<Matrix> {
    if operands.len() < 6 {
        return None;
    }
    let mut m = IDENTITY;
    for (i, operand) in operands.iter().take(6).enumerate() {
        m[i] = get_number(operand).unwrap_or(IDENTITY[i]);
    }
    Some(m)
}

/// Helper to get f64 from Object
fn get_number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_rotation_from_vector() {
        assert_eq!(word_rotation(10.0, 0.0), Rotation::R0);
        assert_eq!(word_rotation(0.0, 0.0), Rotation::R0);
        assert_eq!(word_rotation(-10.0, 2.0), Rotation::R180);
        assert_eq!(word_rotation(1.0, 12.0), Rotation::R90);
        assert_eq!(word_rotation(1.0, -12.0), Rotation::R270);
    }

    #[test]
    fn test_flat_words_grow_to_minimum() {
        let flat = BBox::new(10.0, 100.0, 20.0, 102.0);
        let grown = normalize_height("C-1", flat, MIN_WORD_HEIGHT);
        assert_eq!(grown, BBox::new(10.0, 100.0, 20.0, 105.77));

        // Quote-bearing words hang from their top edge
        let grown = normalize_height("3/4\"", flat, MIN_WORD_HEIGHT);
        assert_eq!(grown.y2, 102.0);
        assert!((grown.y1 - (102.0 - 5.77)).abs() < 1e-9);

        let tall = BBox::new(10.0, 100.0, 20.0, 108.0);
        assert_eq!(normalize_height("C-1", tall, MIN_WORD_HEIGHT), tall);
    }

    #[test]
    fn test_date_line_dropped() {
        let words = vec![
            Token::new("DATE:", BBox::new(10.0, 700.0, 30.0, 706.0), 1),
            Token::new("2024-01-01", BBox::new(40.0, 701.5, 80.0, 707.0), 1),
            Token::new("C-1", BBox::new(10.0, 650.0, 30.0, 656.0), 1),
        ];
        let kept = drop_date_line(words);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "C-1");

        let no_stamp = vec![Token::new("C-1", BBox::default(), 1)];
        assert_eq!(drop_date_line(no_stamp).len(), 1);
    }

    #[test]
    fn test_region_bounds() {
        let content = BBox::new(20.0, 30.0, 1200.0, 760.0);
        assert_eq!(
            Region::ScheduleBody.bounds(1224.0, 792.0, &content),
            BBox::new(20.0, 40.0, 1204.0, 675.0)
        );
        assert_eq!(
            Region::TitleBlock.bounds(1224.0, 792.0, &content),
            BBox::new(729.0, 0.0, 1224.0, 114.0)
        );
        assert_eq!(
            Region::DrawingBody.bounds(1224.0, 792.0, &content).y1,
            95.0
        );
    }

    #[test]
    fn test_multiply_identity() {
        let m = [2.0, 0.0, 0.0, 2.0, 5.0, 7.0];
        assert_eq!(multiply_matrices(&m, &IDENTITY), m);
        assert_eq!(multiply_matrices(&IDENTITY, &m), m);
    }
}
