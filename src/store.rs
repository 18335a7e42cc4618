//! On-disk token tables shared between pipeline phases
//!
//! Each document kind has one table file holding rows with the persisted
//! column names. A commit writes the whole table to a sibling temp file and
//! renames it over the old one, so a phase either lands completely or not at
//! all.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::token::{BBox, ColorFlag, DocumentKind, Rotation, Token};
use crate::CrossRefError;

/// One persisted token, columns named as in the intermediate schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRow {
    #[serde(rename = "Word")]
    pub word: String,
    #[serde(rename = "X1")]
    pub x1: f64,
    #[serde(rename = "Y1")]
    pub y1: f64,
    #[serde(rename = "X2")]
    pub x2: f64,
    #[serde(rename = "Y2")]
    pub y2: f64,
    #[serde(rename = "Sheet")]
    pub sheet: u32,
    #[serde(rename = "PageRotation", default)]
    pub page_rotation: i64,
    #[serde(rename = "WordRotation", default)]
    pub word_rotation: i64,
    #[serde(rename = "Tag", default)]
    pub tag: String,
    #[serde(rename = "Item", default)]
    pub item: u32,
    #[serde(rename = "ColorFlag", default)]
    pub color_flag: i64,
}

impl From<&Token> for TokenRow {
    fn from(t: &Token) -> Self {
        Self {
            word: t.text.clone(),
            x1: t.bbox.x1,
            y1: t.bbox.y1,
            x2: t.bbox.x2,
            y2: t.bbox.y2,
            sheet: t.sheet,
            page_rotation: t.page_rotation.degrees(),
            word_rotation: t.word_rotation.degrees(),
            tag: t.tag.clone().unwrap_or_default(),
            item: t.item,
            color_flag: t.color.code(),
        }
    }
}

impl From<TokenRow> for Token {
    fn from(row: TokenRow) -> Self {
        let tag = row.tag.trim();
        Self {
            text: row.word,
            bbox: BBox::new(row.x1, row.y1, row.x2, row.y2),
            sheet: row.sheet,
            page_rotation: Rotation::from_degrees(row.page_rotation),
            word_rotation: Rotation::from_degrees(row.word_rotation),
            tag: (!tag.is_empty()).then(|| tag.to_string()),
            item: row.item,
            color: ColorFlag::from_code(row.color_flag),
        }
    }
}

/// Directory of token tables, one file per document kind
#[derive(Debug, Clone)]
pub struct TokenStore {
    dir: PathBuf,
}

impl TokenStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn table_path(&self, kind: DocumentKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind.table_name()))
    }

    pub fn exists(&self, kind: DocumentKind) -> bool {
        self.table_path(kind).is_file()
    }

    /// Read a table; `Ok(None)` when it has not been written yet
    pub fn load(&self, kind: DocumentKind) -> Result<Option<Vec<Token>>, CrossRefError> {
        let path = self.table_path(kind);
        if !path.is_file() {
            warn!("table {} not found in {}", kind.table_name(), self.dir.display());
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&path)?);
        let rows: Vec<TokenRow> = serde_json::from_reader(reader)?;
        Ok(Some(rows.into_iter().map(Token::from).collect()))
    }

    /// Replace a table with `tokens` in one step
    pub fn commit(&self, kind: DocumentKind, tokens: &[Token]) -> Result<(), CrossRefError> {
        self.commit_all(&[(kind, tokens)])
    }

    /// Replace several tables together
    ///
    /// Every table is staged before any is renamed into place. If staging
    /// fails, all temp files are removed, every old table is left as it was
    /// and the error is logged and returned.
    pub fn commit_all(&self, tables: &[(DocumentKind, &[Token])]) -> Result<(), CrossRefError> {
        let staged: Vec<(DocumentKind, PathBuf, PathBuf)> = tables
            .iter()
            .map(|(kind, _)| {
                let path = self.table_path(*kind);
                let staging = path.with_extension("json.tmp");
                (*kind, path, staging)
            })
            .collect();

        let written = fs::create_dir_all(&self.dir)
            .map_err(CrossRefError::from)
            .and_then(|_| {
                tables
                    .iter()
                    .zip(&staged)
                    .try_for_each(|((_, tokens), (_, _, staging))| write_rows(staging, tokens))
            });
        if let Err(e) = written {
            for (kind, _, staging) in &staged {
                error!("rolling back {}: {}", kind.table_name(), e);
                let _ = fs::remove_file(staging);
            }
            return Err(e);
        }

        for ((kind, tokens), (_, path, staging)) in tables.iter().zip(&staged) {
            if let Err(e) = fs::rename(staging, path) {
                error!("renaming {} into place: {}", kind.table_name(), e);
                let _ = fs::remove_file(staging);
                return Err(e.into());
            }
            info!("committed {} rows to {}", tokens.len(), kind.table_name());
        }
        Ok(())
    }
}

fn write_rows(path: &Path, tokens: &[Token]) -> Result<(), CrossRefError> {
    let rows: Vec<TokenRow> = tokens.iter().map(TokenRow::from).collect();
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, &rows)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}
