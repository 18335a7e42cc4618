//! Debug tool: Print sheet anchors and the fields found in each item
//!
//! Usage: debug_items <pdf_file> [template] [page_number]
//!
//! Classifies the extracted words with the named template (default
//! `schedule`) and prints, per sheet, the anchor followed by every item with
//! its tagged words. Placeholders that synthesis would add are listed too.

use cable_crossref::extract::{extract_tokens, ExtractOptions, Region};
use cable_crossref::token::reading_order;
use cable_crossref::{classify_tokens, synthesize_missing, Template};
use std::collections::BTreeMap;
use std::env;
use std::process;

fn main() {
    env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <pdf_file> [template] [page_number]", args[0]);
        eprintln!();
        eprintln!("Templates: schedule, schedule_report, drawing_title");
        eprintln!("If page_number is given, only that sheet is shown.");
        process::exit(1);
    }

    let pdf_path = &args[1];
    let template_name = args.get(2).map(String::as_str).unwrap_or("schedule");
    let filter_page: Option<u32> = args.get(3).and_then(|s| s.parse().ok());

    let template = match Template::by_name(template_name) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    let region = if template_name == "drawing_title" {
        Region::TitleBlock
    } else {
        Region::FullPage
    };

    let mut tokens = match extract_tokens(pdf_path, &ExtractOptions::with_region(region)) {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("Error extracting text: {}", e);
            process::exit(1);
        }
    };
    if let Some(page) = filter_page {
        tokens.retain(|t| t.sheet == page);
    }
    if tokens.is_empty() {
        eprintln!("No words found in PDF.");
        process::exit(0);
    }

    let outcome = classify_tokens(&mut tokens, &template);
    let placeholders = synthesize_missing(&tokens, &outcome.items, &template);

    eprintln!(
        "{} words, {} tagged, {} misses, {} above the body, {} placeholders",
        tokens.len(),
        outcome.tagged,
        outcome.misses,
        outcome.header_skipped,
        placeholders.len()
    );

    tokens.sort_by(reading_order);
    let mut by_item: BTreeMap<(u32, u32), Vec<String>> = BTreeMap::new();
    // Misses keep item 0, so every token in an item carries a tag
    for t in tokens.iter().filter(|t| t.item > 0) {
        if let Some(tag) = &t.tag {
            by_item
                .entry((t.sheet, t.item))
                .or_default()
                .push(format!("{}={:?}", tag, t.text));
        }
    }
    for p in &placeholders {
        by_item
            .entry((p.sheet, p.item))
            .or_default()
            .push(format!("+{}", p.tag.as_deref().unwrap_or_default()));
    }

    let mut current_sheet = None;
    for ((sheet, item), fields) in &by_item {
        if current_sheet != Some(*sheet) {
            current_sheet = Some(*sheet);
            println!();
            match outcome.anchors.get(sheet) {
                Some(a) => println!("=== Sheet {} (anchor x={:.1} y={:.1}) ===", sheet, a.x, a.y),
                None => println!("=== Sheet {} (no anchor) ===", sheet),
            }
        }
        println!("  item {:>3}: {}", item, fields.join("  "));
    }
}
