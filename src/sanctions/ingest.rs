// src/sanctions/ingest.rs
//
// Upload-side adapters: turn tabular (CSV) and JSON/NDJSON exports,
// including the EU-FSF entity schema, into rows in the watchlist document
// shape. These feed the store; the matching path never sees them.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::debug;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::io::Read;

// Aliases in collapsed form: header matching lowercases and strips
// everything non-alphanumeric, so "Full Name", "full_name" and "FullName"
// all resolve the same way.
const NAME_ALIASES: [&str; 3] = ["name", "fullname", "primaryname"];
const ID_ALIASES: [&str; 3] = ["id", "externalid", "recordid"];
const DOB_ALIASES: [&str; 3] = ["dob", "dateofbirth", "birthdate"];
const CITIZENSHIP_ALIASES: [&str; 3] = ["citizenship", "nationality", "country"];
const REMARKS_ALIASES: [&str; 4] = ["remarks", "remark", "notes", "note"];

/// EU export metadata worth keeping verbatim on the row for audit.
const PRESERVED_KEYS: [&str; 8] = [
    "caption",
    "schema",
    "referents",
    "datasets",
    "first_seen",
    "last_seen",
    "last_change",
    "properties",
];

const REMARKS_MAX_LEN: usize = 900;

// Header matching is insensitive to case, spacing and punctuation.
fn normalize_column(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

fn import_stamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// Parses a CSV upload into watchlist rows for the given source code. A name
/// column (any alias) is required; rows without a name are skipped.
pub fn rows_from_csv<R: Read>(reader: R, source: &str) -> Result<Vec<JsonValue>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .context("Failed to read CSV headers")?
        .clone();
    let position = |aliases: &[&str]| -> Option<usize> {
        headers
            .iter()
            .position(|h| aliases.contains(&normalize_column(h).as_str()))
    };

    let Some(name_col) = position(&NAME_ALIASES) else {
        bail!("No name column found (expected one of: name, full_name, fullname, primary_name)");
    };
    let id_col = position(&ID_ALIASES);
    let dob_col = position(&DOB_ALIASES);
    let citizenship_col = position(&CITIZENSHIP_ALIASES);
    let remarks_col = position(&REMARKS_ALIASES);

    let stamp = import_stamp();
    let mut rows = Vec::new();
    let mut skipped = 0usize;

    for (i, record) in csv_reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to parse CSV record {}", i + 1))?;
        let cell = |col: Option<usize>| -> Option<&str> {
            col.and_then(|c| record.get(c)).map(str::trim).filter(|s| !s.is_empty())
        };

        let Some(name) = cell(Some(name_col)) else {
            skipped += 1;
            continue;
        };
        let external_id = cell(id_col)
            .map(str::to_string)
            .unwrap_or_else(|| format!("IMP-{}-{}-{}", source, stamp, i + 1));

        let mut row = JsonMap::new();
        row.insert("id".into(), json!(external_id));
        row.insert("source".into(), json!(source));
        row.insert("name".into(), json!(name));
        if let Some(dob) = cell(dob_col) {
            row.insert("dob".into(), json!(dob));
        }
        if let Some(cit) = cell(citizenship_col) {
            row.insert("citizenship".into(), json!(cit));
        }
        if let Some(remarks) = cell(remarks_col) {
            row.insert("remarks".into(), json!(remarks));
        }
        rows.push(JsonValue::Object(row));
    }

    if skipped > 0 {
        debug!("CSV import skipped {} row(s) without a name", skipped);
    }
    Ok(rows)
}

/// Parses a JSON upload into watchlist rows. Accepts a JSON array, an object
/// with a `sanctions` list, a single object, or NDJSON (one object per
/// line, as in the EU FSF dataset export). EU-style entity objects are
/// mapped down to the minimal schema; plain rows pass through their own
/// name/dob/citizenship fields.
pub fn rows_from_json(text: &str, source: &str) -> Result<Vec<JsonValue>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let items = parse_json_items(text);
    let stamp = import_stamp();
    let mut rows = Vec::new();

    for (i, obj) in items.iter().enumerate() {
        // EU exports carry non-target satellite objects (addresses etc).
        if obj.get("target") == Some(&JsonValue::Bool(false)) {
            continue;
        }

        let properties = obj
            .get("properties")
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();

        let caption = string_value(obj.get("caption"));
        let name = caption
            .or_else(|| first_of(&properties, "name"))
            .or_else(|| string_value(obj.get("name")))
            .or_else(|| string_value(obj.get("full_name")));
        let Some(name) = name else {
            continue;
        };

        let external_id = string_value(obj.get("id"))
            .unwrap_or_else(|| format!("IMPJSON-{}-{}-{}", source, stamp, i + 1));

        // UNSC entries often list several plausible birth dates; keep them
        // joined so the DOB comparator can try each.
        let birth_dates = string_list(properties.get("birthDate"));
        let dob = if birth_dates.is_empty() {
            string_value(obj.get("dob")).or_else(|| string_value(obj.get("date_of_birth")))
        } else {
            Some(
                birth_dates
                    .iter()
                    .take(5)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };

        let citizenship = first_of(&properties, "nationality")
            .or_else(|| first_of(&properties, "country"))
            .or_else(|| string_value(obj.get("citizenship")))
            .or_else(|| string_value(obj.get("nationality")));

        let remarks = build_remarks(obj, &properties);

        let mut row = JsonMap::new();
        row.insert("id".into(), json!(external_id));
        row.insert("source".into(), json!(source));
        row.insert("name".into(), json!(name));
        if let Some(dob) = dob {
            row.insert("dob".into(), json!(dob));
        }
        if let Some(cit) = citizenship {
            row.insert("citizenship".into(), json!(cit));
        }
        if !remarks.is_empty() {
            row.insert("remarks".into(), json!(remarks));
        }
        for key in PRESERVED_KEYS {
            if let Some(value) = obj.get(key) {
                row.entry(key.to_string()).or_insert_with(|| value.clone());
            }
        }
        rows.push(JsonValue::Object(row));
    }

    Ok(rows)
}

fn parse_json_items(text: &str) -> Vec<JsonMap<String, JsonValue>> {
    match serde_json::from_str::<JsonValue>(text) {
        Ok(JsonValue::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect(),
        Ok(JsonValue::Object(obj)) => match obj.get("sanctions") {
            Some(JsonValue::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_object().cloned())
                .collect(),
            _ => vec![obj],
        },
        Ok(_) => Vec::new(),
        // NDJSON fallback: one object per line, bad lines skipped.
        Err(_) => text
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    return None;
                }
                serde_json::from_str::<JsonValue>(line)
                    .ok()
                    .and_then(|v| v.as_object().cloned())
            })
            .collect(),
    }
}

fn string_value(value: Option<&JsonValue>) -> Option<String> {
    match value {
        Some(JsonValue::String(s)) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn string_list(value: Option<&JsonValue>) -> Vec<String> {
    match value {
        Some(JsonValue::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                Vec::new()
            } else {
                vec![s.to_string()]
            }
        }
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|v| string_value(Some(v)))
            .collect(),
        _ => Vec::new(),
    }
}

fn first_of(properties: &JsonMap<String, JsonValue>, key: &str) -> Option<String> {
    string_list(properties.get(key)).into_iter().next()
}

fn build_remarks(obj: &JsonMap<String, JsonValue>, properties: &JsonMap<String, JsonValue>) -> String {
    let mut parts: Vec<String> = Vec::new();
    parts.extend(string_list(properties.get("notes")).into_iter().take(3));
    parts.extend(string_list(properties.get("remarks")).into_iter().take(2));
    parts.extend(string_value(obj.get("remarks")));
    if let Some(position) = first_of(properties, "position") {
        parts.push(format!("position: {}", position));
    }
    if let Some(birth_place) = first_of(properties, "birthPlace") {
        parts.push(format!("birthPlace: {}", birth_place));
    }
    let addresses = string_list(properties.get("address"));
    if !addresses.is_empty() {
        parts.push(format!(
            "address: {}",
            addresses.iter().take(2).cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    let aliases = string_list(properties.get("alias"));
    if !aliases.is_empty() {
        parts.push(format!(
            "alias: {}",
            aliases.iter().take(5).cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    if let Some(program) = first_of(properties, "programId") {
        parts.push(format!("programId: {}", program));
    }
    if let Some(url) = first_of(properties, "sourceUrl") {
        parts.push(format!("sourceUrl: {}", url));
    }
    compact_join(parts, REMARKS_MAX_LEN)
}

fn compact_join(parts: Vec<String>, max_len: usize) -> String {
    let mut seen = std::collections::HashSet::new();
    let cleaned: Vec<String> = parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty() && seen.insert(p.clone()))
        .collect();
    let mut out = cleaned.join(" | ");
    if out.len() > max_len {
        let mut cut = max_len.saturating_sub(3);
        while cut > 0 && !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
        out = out.trim_end().to_string() + "...";
    }
    out
}
