// src/sanctions/store.rs
//
// The watchlist source of truth is one JSON document. The store parses it
// into SanctionRecords, caches the parsed sequence keyed by the file's
// modification time, and serves the deduplicated corpus the matcher runs
// against. Writers must go through the atomic-replace helpers so readers
// never observe a half-written file.

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::matching::normalize::{normalize_country, normalize_name};
use crate::models::SanctionRecord;

pub const SANCTIONS_PATH_ENV: &str = "SCREENER_SANCTIONS_JSON_PATH";
pub const DEFAULT_SANCTIONS_PATH: &str = "data/sanctions.json";

const NAME_KEYS: [&str; 2] = ["name", "full_name"];
const SOURCE_KEYS: [&str; 2] = ["source", "source_code"];
const DOB_KEYS: [&str; 4] = ["dob", "dob_raw", "date_of_birth", "date_of_birth_raw"];
const CITIZENSHIP_KEYS: [&str; 2] = ["citizenship", "citizenship_raw"];
const ID_KEYS: [&str; 2] = ["id", "external_id"];

struct CachedSnapshot {
    modified: SystemTime,
    records: Arc<Vec<SanctionRecord>>,
}

pub struct SanctionStore {
    path: PathBuf,
    cache: Mutex<Option<CachedSnapshot>>,
}

impl SanctionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn from_env() -> Self {
        let path = std::env::var(SANCTIONS_PATH_ENV)
            .unwrap_or_else(|_| DEFAULT_SANCTIONS_PATH.to_string());
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drops the cached snapshot so the next load re-reads the file, without
    /// touching real time or the filesystem clock.
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap() = None;
    }

    /// Parsed records, cached until the file's modification time changes.
    pub fn load(&self, force_reload: bool) -> Result<Arc<Vec<SanctionRecord>>> {
        let metadata = fs::metadata(&self.path).with_context(|| {
            format!(
                "Sanctions JSON not found at {} (create it or set {})",
                self.path.display(),
                SANCTIONS_PATH_ENV
            )
        })?;
        let modified = metadata
            .modified()
            .context("Failed to read sanctions file modification time")?;

        if !force_reload {
            let cache = self.cache.lock().unwrap();
            if let Some(snapshot) = cache.as_ref() {
                if snapshot.modified == modified {
                    return Ok(snapshot.records.clone());
                }
            }
        }

        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let document: JsonValue =
            serde_json::from_str(&text).context("Sanctions JSON is not valid JSON")?;
        let rows = document_rows(&document)?;

        let mut records = Vec::with_capacity(rows.len());
        let mut dropped = 0usize;
        for (idx, row) in rows.iter().enumerate() {
            match parse_record(row, idx) {
                Some(record) => records.push(record),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            debug!(
                "Skipped {} sanctions row(s) without a usable name",
                dropped
            );
        }
        info!(
            "Loaded {} sanction records from {}",
            records.len(),
            self.path.display()
        );

        let records = Arc::new(records);
        *self.cache.lock().unwrap() = Some(CachedSnapshot {
            modified,
            records: records.clone(),
        });
        Ok(records)
    }

    /// The corpus fed to the matcher: optionally restricted to a set of
    /// source codes, deduplicated by normalized name (first occurrence in
    /// load order wins).
    pub fn for_matcher(&self, sources: Option<&str>) -> Result<Vec<SanctionRecord>> {
        let records = self.load(false)?;
        let filter = parse_source_filter(sources);

        let mut seen: HashSet<&str> = HashSet::new();
        let mut out = Vec::new();
        for record in records.iter() {
            if let Some(wanted) = &filter {
                if !wanted.contains(record.source.trim()) {
                    continue;
                }
            }
            if seen.insert(record.name_norm.as_str()) {
                out.push(record.clone());
            }
        }
        Ok(out)
    }

    /// Distinct source codes across the whole corpus, sorted; ignores any
    /// matcher-side filter.
    pub fn list_sources(&self) -> Result<Vec<String>> {
        let records = self.load(false)?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for record in records.iter() {
            let source = record.source.trim();
            if source.is_empty() || !seen.insert(source.to_string()) {
                continue;
            }
            out.push(source.to_string());
        }
        out.sort();
        Ok(out)
    }
}

/// `None` means "no restriction" ("all", empty, or absent filter).
pub fn parse_source_filter(raw: Option<&str>) -> Option<HashSet<String>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    let set: HashSet<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("all"))
        .map(str::to_string)
        .collect();
    if set.is_empty() {
        None
    } else {
        Some(set)
    }
}

fn document_rows(document: &JsonValue) -> Result<Vec<JsonMap<String, JsonValue>>> {
    let list = match document {
        JsonValue::Array(items) => items,
        JsonValue::Object(obj) => match obj.get("sanctions") {
            Some(JsonValue::Array(items)) => items,
            _ => bail!("Sanctions JSON must be a list or an object with a 'sanctions' list"),
        },
        _ => bail!("Sanctions JSON must be a list or an object with a 'sanctions' list"),
    };
    Ok(list
        .iter()
        .filter_map(|v| v.as_object().cloned())
        .collect())
}

fn field_string(row: &JsonMap<String, JsonValue>, keys: &[&str]) -> Option<String> {
    for key in keys {
        match row.get(*key) {
            Some(JsonValue::String(s)) => {
                let s = s.trim();
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            }
            Some(JsonValue::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

// Rows with no resolvable name, or whose normalized name is empty, yield
// None and are dropped by the caller; that is a data condition, not an error.
fn parse_record(row: &JsonMap<String, JsonValue>, idx: usize) -> Option<SanctionRecord> {
    let name = field_string(row, &NAME_KEYS)?;
    let name_norm = normalize_name(&name);
    if name_norm.is_empty() {
        return None;
    }

    let source = field_string(row, &SOURCE_KEYS).unwrap_or_else(|| "UNKNOWN".to_string());
    let dob_raw = field_string(row, &DOB_KEYS);
    let citizenship_raw = field_string(row, &CITIZENSHIP_KEYS);
    let citizenship_norm = citizenship_raw
        .as_deref()
        .map(normalize_country)
        .filter(|s| !s.is_empty());
    let external_id = field_string(row, &ID_KEYS).unwrap_or_else(|| format!("ROW-{}", idx + 1));

    let recognized: HashSet<&str> = NAME_KEYS
        .iter()
        .chain(SOURCE_KEYS.iter())
        .chain(DOB_KEYS.iter())
        .chain(CITIZENSHIP_KEYS.iter())
        .chain(ID_KEYS.iter())
        .copied()
        .collect();
    let extra: JsonMap<String, JsonValue> = row
        .iter()
        .filter(|(k, _)| !recognized.contains(k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Some(SanctionRecord {
        external_id,
        source,
        name,
        name_norm,
        dob_raw,
        citizenship_raw,
        citizenship_norm,
        extra,
    })
}

/// Writes the sanctions document (as a pretty-printed list) with an atomic
/// temp-file + rename so concurrent readers never see a partial file.
pub fn write_sanctions_document(path: &Path, rows: &[JsonValue]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let body = serde_json::to_string_pretty(rows).context("Failed to serialize sanctions rows")?;
    fs::write(&tmp, body + "\n").with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Raw rows of the document, for merge-style imports. A missing file is an
/// empty list, not an error.
pub fn read_sanctions_document(path: &Path) -> Result<Vec<JsonValue>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let document: JsonValue =
        serde_json::from_str(&text).context("Sanctions JSON is not valid JSON")?;
    Ok(document_rows(&document)?
        .into_iter()
        .map(JsonValue::Object)
        .collect())
}

/// Optional registry of known source codes, maintained alongside the
/// watchlist for display purposes. Missing file means an empty registry.
pub fn read_source_registry(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let raw: JsonValue = serde_json::from_str(&text).context("Source registry is not valid JSON")?;
    let JsonValue::Array(items) = raw else {
        warn!("Source registry at {} is not a list; ignoring", path.display());
        return Ok(Vec::new());
    };
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if let JsonValue::String(s) = item {
            let s = s.trim().to_string();
            if !s.is_empty() && seen.insert(s.clone()) {
                out.push(s);
            }
        }
    }
    out.sort();
    Ok(out)
}

pub fn write_source_registry(path: &Path, sources: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut cleaned: Vec<String> = sources
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect();
    cleaned.sort();
    let rows: Vec<JsonValue> = cleaned.into_iter().map(JsonValue::String).collect();
    write_sanctions_document(path, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store_with(rows: JsonValue) -> (TempDir, SanctionStore) {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("sanctions.json");
        fs::write(&path, serde_json::to_string(&rows).unwrap()).expect("seed file");
        let store = SanctionStore::new(&path);
        (dir, store)
    }

    #[test]
    fn load_maps_field_aliases_and_drops_nameless_rows() {
        let (_dir, store) = store_with(json!([
            {"id": "X-1", "source": "OFAC", "name": "Ahmad Yani", "dob": "1961-06-21",
             "citizenship": "ID", "remarks": "listed 2001"},
            {"full_name": "John Doe", "source_code": "EU", "date_of_birth": "1970"},
            {"source": "UN"},
            {"name": "...", "source": "UN"}
        ]));
        let records = store.load(false).expect("load");
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.external_id, "X-1");
        assert_eq!(first.source, "OFAC");
        assert_eq!(first.name_norm, "ahmad yani");
        assert_eq!(first.dob_raw.as_deref(), Some("1961-06-21"));
        assert_eq!(first.citizenship_norm.as_deref(), Some("id"));
        assert_eq!(
            first.extra.get("remarks"),
            Some(&JsonValue::String("listed 2001".into()))
        );

        let second = &records[1];
        assert_eq!(second.external_id, "ROW-2");
        assert_eq!(second.source, "EU");
        assert_eq!(second.dob_raw.as_deref(), Some("1970"));
    }

    #[test]
    fn load_accepts_wrapped_object_document() {
        let (_dir, store) = store_with(json!({"sanctions": [{"name": "Jane Roe"}]}));
        let records = store.load(false).expect("load");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, "UNKNOWN");
    }

    #[test]
    fn cache_serves_same_snapshot_until_file_changes() {
        let (_dir, store) = store_with(json!([{"name": "Ahmad Yani"}]));
        let a = store.load(false).expect("load");
        let b = store.load(false).expect("load");
        assert!(Arc::ptr_eq(&a, &b));

        write_sanctions_document(
            store.path(),
            &[json!({"name": "Ahmad Yani"}), json!({"name": "John Doe"})],
        )
        .expect("rewrite");
        let c = store.load(false).expect("reload");
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn invalidate_forces_a_reread() {
        let (_dir, store) = store_with(json!([{"name": "Ahmad Yani"}]));
        let a = store.load(false).expect("load");
        store.invalidate();
        let b = store.load(false).expect("load");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn for_matcher_dedupes_by_normalized_name_keeping_first() {
        let (_dir, store) = store_with(json!([
            {"id": "A", "name": "John Doe", "source": "OFAC"},
            {"id": "B", "name": "JOHN  DOE!", "source": "OFAC"},
            {"id": "C", "name": "Jane Roe", "source": "EU"}
        ]));
        let corpus = store.for_matcher(None).expect("corpus");
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus[0].external_id, "A");

        let norms: HashSet<&str> = corpus.iter().map(|r| r.name_norm.as_str()).collect();
        assert_eq!(norms.len(), corpus.len());
    }

    #[test]
    fn for_matcher_honors_source_filter() {
        let (_dir, store) = store_with(json!([
            {"name": "John Doe", "source": "OFAC"},
            {"name": "Jane Roe", "source": "EU"},
            {"name": "Budi Santoso", "source": "UN"}
        ]));
        let corpus = store.for_matcher(Some("OFAC,UN")).expect("corpus");
        let sources: Vec<&str> = corpus.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(sources, vec!["OFAC", "UN"]);

        // "all" and empty filters mean no restriction.
        assert_eq!(store.for_matcher(Some("all")).unwrap().len(), 3);
        assert_eq!(store.for_matcher(Some("  ")).unwrap().len(), 3);
        assert_eq!(store.for_matcher(None).unwrap().len(), 3);
    }

    #[test]
    fn list_sources_is_distinct_sorted_and_unfiltered() {
        let (_dir, store) = store_with(json!([
            {"name": "A A", "source": "UN"},
            {"name": "B B", "source": "OFAC"},
            {"name": "C C", "source": "UN"}
        ]));
        assert_eq!(store.list_sources().unwrap(), vec!["OFAC", "UN"]);
    }

    #[test]
    fn missing_file_is_an_error_with_a_hint() {
        let dir = TempDir::new().unwrap();
        let store = SanctionStore::new(dir.path().join("nope.json"));
        let err = store.load(false).unwrap_err();
        assert!(err.to_string().contains(SANCTIONS_PATH_ENV));
    }

    #[test]
    fn atomic_write_replaces_without_leftover_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sanctions.json");
        write_sanctions_document(&path, &[json!({"name": "X Y"})]).expect("write");
        write_sanctions_document(&path, &[json!({"name": "X Y"}), json!({"name": "Z W"})])
            .expect("rewrite");
        let rows = read_sanctions_document(&path).expect("read");
        assert_eq!(rows.len(), 2);
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn source_registry_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sanction_sources.json");
        assert!(read_source_registry(&path).unwrap().is_empty());
        write_source_registry(
            &path,
            &["UN".to_string(), "OFAC".to_string(), "UN".to_string()],
        )
        .expect("write");
        assert_eq!(read_source_registry(&path).unwrap(), vec!["OFAC", "UN"]);
    }

    #[test]
    fn source_filter_parsing() {
        assert!(parse_source_filter(None).is_none());
        assert!(parse_source_filter(Some("")).is_none());
        assert!(parse_source_filter(Some("ALL")).is_none());
        let set = parse_source_filter(Some("OFAC, UN ,")).expect("set");
        assert!(set.contains("OFAC") && set.contains("UN"));
        assert_eq!(set.len(), 2);
    }
}
