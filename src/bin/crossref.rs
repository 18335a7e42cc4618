//! CLI tool for cross-referencing a cable schedule against drawings

use cable_crossref::{
    process_documents, CableCatalog, ColorFlag, PhaseStatus, PipelineOptions, Template,
    TokenStore,
};
use std::env;
use std::process;

fn usage(program: &str) -> ! {
    eprintln!(
        "Usage: {} <schedule.pdf> <drawings.pdf> <store_dir> [--json]",
        program
    );
    eprintln!("       [--template <name>] [--catalog <file>] [--prune]");
    eprintln!();
    eprintln!("Classifies the schedule, reconciles it against the drawings and");
    eprintln!("writes both annotated token tables to <store_dir>.");
    process::exit(1);
}

fn main() {
    env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        usage(&args[0]);
    }

    let mut options = PipelineOptions::default();
    let mut json_output = false;
    let mut rest = args[4..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--json" => json_output = true,
            "--prune" => options.prune_drawing = true,
            "--template" => {
                let Some(name) = rest.next() else { usage(&args[0]) };
                match Template::by_name(name) {
                    Ok(t) => options.schedule_template = t,
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        process::exit(1);
                    }
                }
            }
            "--catalog" => {
                let Some(path) = rest.next() else { usage(&args[0]) };
                match CableCatalog::load(path) {
                    Ok(catalog) => options.catalog = catalog,
                    Err(e) => {
                        eprintln!("Error reading catalog: {}", e);
                        process::exit(1);
                    }
                }
            }
            _ => usage(&args[0]),
        }
    }

    let store = TokenStore::new(&args[3]);
    let result = match process_documents(&args[1], &args[2], &store, &options) {
        Ok(PhaseStatus::Completed(result)) => result,
        Ok(PhaseStatus::MissingInput(path)) => {
            eprintln!("Missing input: {}", path.display());
            process::exit(2);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let rec = &result.reconciliation;
    if json_output {
        let links: Vec<serde_json::Value> = result
            .links
            .iter()
            .map(|l| {
                serde_json::json!({
                    "sheet": l.sheet,
                    "item": l.item,
                    "direction": l.direction.tag(),
                    "cable_tag": l.cable_tag,
                    "drawing_ref": l.drawing_ref,
                    "rect": [l.rect.x1, l.rect.y1, l.rect.x2, l.rect.y2],
                    "destination": {
                        "sheet": l.destination.sheet,
                        "left": l.destination.left,
                        "top": l.destination.top,
                        "zoom": l.destination.zoom,
                    },
                })
            })
            .collect();
        let report = serde_json::json!({
            "records": rec.results.len(),
            "matched": rec.count_cable(ColorFlag::Matched),
            "missing": rec.count_cable(ColorFlag::Missing),
            "not_found": rec.count_cable(ColorFlag::NotFound),
            "ambiguous": rec.count_cable(ColorFlag::Ambiguous),
            "placeholders": result.placeholders_added,
            "title_placeholders": result.title_placeholders_added,
            "classification_misses": result.schedule.misses,
            "drawing_cable_tags": result.cable_tags_marked,
            "length_totals": result.length_totals,
            "links": links,
            "processing_time_ms": result.processing_time_ms,
        });
        println!("{}", report);
    } else {
        println!("Cable Cross-Reference");
        println!("=====================");
        println!("Schedule: {}", args[1]);
        println!("Drawings: {}", args[2]);
        println!("Store:    {}", store.dir().display());
        println!();
        println!("Records:        {}", rec.results.len());
        println!("  matched:      {}", rec.count_cable(ColorFlag::Matched));
        println!("  missing:      {}", rec.count_cable(ColorFlag::Missing));
        println!("  not found:    {}", rec.count_cable(ColorFlag::NotFound));
        println!("  ambiguous:    {}", rec.count_cable(ColorFlag::Ambiguous));
        println!("Placeholders:   {}", result.placeholders_added);
        println!("  title block:  {}", result.title_placeholders_added);
        println!("Misses:         {}", result.schedule.misses);
        println!("Drawing tags:   {}", result.cable_tags_marked);
        println!("Links:          {}", result.links.len());
        if !result.length_totals.is_empty() {
            println!();
            println!("--- Lengths by keymark ---");
            for (keymark, total) in &result.length_totals {
                println!("{:<12} {:>8}", keymark, total);
            }
        }
        println!();
        println!("Processing time: {}ms", result.processing_time_ms);
    }
}
