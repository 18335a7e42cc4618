//! Cable schedule and drawing cross-referencing
//!
//! This crate provides:
//! - Positional field classification of extracted words into records
//! - Placeholder synthesis for required fields a record is missing
//! - Reconciliation of schedule records against cable tags on drawings
//! - Link resolution from schedule references to drawing sheets

pub mod classify;
pub mod drawing;
pub mod extract;
pub mod links;
pub mod reconcile;
pub mod store;
pub mod summary;
pub mod synthesize;
pub mod template;
pub mod token;

pub use classify::{classify_tokens, Anchor, ClassifyOutcome, ItemObservation};
pub use drawing::{drawing_numbers, drawing_records, mark_cable_tags, DrawingRecord};
pub use extract::{extract_tokens, extract_tokens_mem, ExtractOptions, Region};
pub use links::{resolve_links, Direction, Link, LinkOptions};
pub use reconcile::{reconcile, FlagTriple, MatchCounts, ReconcileOutcome, Reconciliation};
pub use store::TokenStore;
pub use summary::{assign_keymarks, summarize_lengths, CableCatalog, KeymarkAssignment};
pub use synthesize::{fill_missing, synthesize_missing};
pub use template::Template;
pub use token::{BBox, ColorFlag, DocumentKind, Rotation, Token};

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use log::{info, warn};

/// Settings for a full cross-reference run
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Layout of the schedule records
    pub schedule_template: Template,
    /// Layout of the drawing title block
    pub title_template: Template,
    pub links: LinkOptions,
    /// Drop drawing tokens that end up with no tag
    pub prune_drawing: bool,
    pub schedule_extract: ExtractOptions,
    pub drawing_extract: ExtractOptions,
    /// Keymark catalog; no keymarks are assigned without one
    pub catalog: Option<CableCatalog>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            schedule_template: Template::schedule(),
            title_template: Template::drawing_title(),
            links: LinkOptions::default(),
            prune_drawing: false,
            schedule_extract: ExtractOptions::default(),
            drawing_extract: ExtractOptions::default(),
            catalog: None,
        }
    }
}

/// Everything a cross-reference run found
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    pub schedule: ClassifyOutcome,
    pub placeholders_added: usize,
    pub title: ClassifyOutcome,
    pub title_placeholders_added: usize,
    /// Drawing tokens recognised as schedule cable tags
    pub cable_tags_marked: usize,
    pub pruned: usize,
    pub reconciliation: ReconcileOutcome,
    pub links: Vec<Link>,
    pub keymarks: Vec<KeymarkAssignment>,
    pub length_totals: BTreeMap<String, i64>,
    /// Processing time in milliseconds
    pub processing_time_ms: u64,
}

/// Outcome of a store-backed phase
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseStatus<T = ()> {
    Completed(T),
    /// A required input was absent; nothing was written
    MissingInput(PathBuf),
}

impl<T> PhaseStatus<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, PhaseStatus::Completed(_))
    }
}

/// Run classification, synthesis, reconciliation and link resolution in memory
///
/// Both token sets are annotated in place. Running it again on its own output
/// gives the same annotations and adds no placeholders.
pub fn run_pipeline(
    schedule: &mut Vec<Token>,
    drawing: &mut Vec<Token>,
    options: &PipelineOptions,
) -> PipelineResult {
    let start = std::time::Instant::now();

    // Schedule: records, then placeholders for their missing fields
    let schedule_outcome = classify_tokens(schedule, &options.schedule_template);
    let placeholders_added = fill_missing(
        schedule,
        &schedule_outcome.items,
        &options.schedule_template,
    );

    // Drawings: title block fields, then cable tags known to the schedule
    let title = classify_tokens(drawing, &options.title_template);
    let title_placeholders_added = fill_missing(drawing, &title.items, &options.title_template);
    let known_tags: HashSet<String> = reconcile::schedule_records(schedule)
        .into_iter()
        .map(|r| r.cable_tag)
        .filter(|tag| !tag.is_empty())
        .collect();
    let cable_tags_marked = mark_cable_tags(drawing, &known_tags);
    let pruned = if options.prune_drawing {
        drawing::prune_untagged(drawing)
    } else {
        0
    };

    let records = drawing_records(drawing);
    let reconciliation = reconcile(schedule, drawing, &records);
    let links = resolve_links(schedule, drawing, &reconciliation.results, &options.links);

    let (keymarks, length_totals) = match &options.catalog {
        Some(catalog) => {
            let keymarks = assign_keymarks(schedule, catalog);
            let totals = summarize_lengths(schedule, &keymarks);
            (keymarks, totals)
        }
        None => (Vec::new(), BTreeMap::new()),
    };

    info!(
        "cross-reference: {} records, {} placeholders, {} links",
        reconciliation.results.len(),
        placeholders_added,
        links.len()
    );

    PipelineResult {
        schedule: schedule_outcome,
        placeholders_added,
        title,
        title_placeholders_added,
        cable_tags_marked,
        pruned,
        reconciliation,
        links,
        keymarks,
        length_totals,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }
}

/// Extract a PDF into the store's table for `kind`
///
/// Returns the number of tokens written.
pub fn ingest_phase<P: AsRef<Path>>(
    pdf: P,
    kind: DocumentKind,
    store: &TokenStore,
    options: &ExtractOptions,
) -> Result<PhaseStatus<usize>, CrossRefError> {
    let pdf = pdf.as_ref();
    if !pdf.is_file() {
        warn!("input {} not found, skipping {}", pdf.display(), kind.table_name());
        return Ok(PhaseStatus::MissingInput(pdf.to_path_buf()));
    }
    let tokens = extract_tokens(pdf, options)?;
    store.commit(kind, &tokens)?;
    Ok(PhaseStatus::Completed(tokens.len()))
}

/// Classify a single stored table with `template` and add its placeholders
pub fn classify_phase(
    store: &TokenStore,
    kind: DocumentKind,
    template: &Template,
) -> Result<PhaseStatus<ClassifyOutcome>, CrossRefError> {
    let Some(mut tokens) = store.load(kind)? else {
        return Ok(PhaseStatus::MissingInput(store.table_path(kind)));
    };
    let outcome = classify_tokens(&mut tokens, template);
    fill_missing(&mut tokens, &outcome.items, template);
    store.commit(kind, &tokens)?;
    info!(
        "{}: {} tagged, {} misses",
        kind.table_name(),
        outcome.tagged,
        outcome.misses
    );
    Ok(PhaseStatus::Completed(outcome))
}

/// Run the whole pipeline over both stored tables and write them back
pub fn crossref_phase(
    store: &TokenStore,
    options: &PipelineOptions,
) -> Result<PhaseStatus<PipelineResult>, CrossRefError> {
    let Some(mut schedule) = store.load(DocumentKind::Schedule)? else {
        return Ok(PhaseStatus::MissingInput(
            store.table_path(DocumentKind::Schedule),
        ));
    };
    let Some(mut drawing) = store.load(DocumentKind::Drawing)? else {
        return Ok(PhaseStatus::MissingInput(
            store.table_path(DocumentKind::Drawing),
        ));
    };

    let result = run_pipeline(&mut schedule, &mut drawing, options);
    store.commit_all(&[
        (DocumentKind::Schedule, schedule.as_slice()),
        (DocumentKind::Drawing, drawing.as_slice()),
    ])?;
    Ok(PhaseStatus::Completed(result))
}

/// Extract both PDFs into the store and cross-reference them
pub fn process_documents<P: AsRef<Path>, Q: AsRef<Path>>(
    schedule_pdf: P,
    drawing_pdf: Q,
    store: &TokenStore,
    options: &PipelineOptions,
) -> Result<PhaseStatus<PipelineResult>, CrossRefError> {
    let inputs = [
        (
            schedule_pdf.as_ref(),
            DocumentKind::Schedule,
            &options.schedule_extract,
        ),
        (
            drawing_pdf.as_ref(),
            DocumentKind::Drawing,
            &options.drawing_extract,
        ),
    ];
    for (pdf, kind, extract) in inputs {
        if let PhaseStatus::MissingInput(path) = ingest_phase(pdf, kind, store, extract)? {
            return Ok(PhaseStatus::MissingInput(path));
        }
    }
    crossref_phase(store, options)
}

#[derive(Debug, thiserror::Error)]
pub enum CrossRefError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parsing error: {0}")]
    Parse(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),
}

impl From<lopdf::Error> for CrossRefError {
    fn from(e: lopdf::Error) -> Self {
        CrossRefError::Parse(e.to_string())
    }
}
