// src/bin/import_sanctions.rs
//
// Runs the ingestion adapters over an uploaded watchlist file (CSV, JSON or
// NDJSON) and merges the rows into the sanctions document with an atomic
// replace. The running store picks the change up via the file's mtime.

use anyhow::{bail, Context, Result};
use log::info;
use std::fs;
use std::path::Path;

use screener_lib::sanctions::ingest::{rows_from_csv, rows_from_json};
use screener_lib::sanctions::store::{
    read_sanctions_document, write_sanctions_document, SanctionStore,
};

const USAGE: &str = "Usage: import_sanctions <file.(csv|json|ndjson)> <source_code> [--replace]

Appends parsed rows to the configured sanctions document (or replaces its
contents with --replace).";

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (Some(file), Some(source)) = (args.first(), args.get(1)) else {
        println!("{USAGE}");
        return Ok(());
    };
    let replace = args.iter().any(|a| a == "--replace");

    let path = Path::new(file);
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let new_rows = match extension.as_str() {
        "csv" => {
            let reader = fs::File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            rows_from_csv(reader, source)?
        }
        "json" | "ndjson" => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            rows_from_json(&text, source)?
        }
        other => bail!("Unsupported format '{}'. Use .csv, .json or .ndjson", other),
    };
    if new_rows.is_empty() {
        bail!("No importable rows found in {}", path.display());
    }

    let store = SanctionStore::from_env();
    let mut rows = if replace {
        Vec::new()
    } else {
        read_sanctions_document(store.path())?
    };
    let existing = rows.len();
    rows.extend(new_rows.iter().cloned());
    write_sanctions_document(store.path(), &rows)?;

    info!(
        "Imported {} row(s) from {} into {} ({} total, source: {})",
        new_rows.len(),
        path.display(),
        store.path().display(),
        existing + new_rows.len(),
        source
    );
    println!(
        "Imported {} row(s); watchlist now holds {} row(s)",
        new_rows.len(),
        existing + new_rows.len()
    );
    Ok(())
}
