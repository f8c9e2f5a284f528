// src/screening/search.rs
//
// Read-only lookup entry points for operators: one entity, or many queries
// against one freshly-built index. These share the scoring stack with the
// batch loop but never touch job state; failures are reported per query.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::matching::dob::FlexibleDobComparator;
use crate::matching::index::{BackendChoice, FilterParams};
use crate::matching::name::NameMatcher;
use crate::models::{MatchQuery, MatchResult, SanctionRecord};
use crate::screening::evaluate::{evaluate_candidate, Thresholds};

pub const SINGLE_SEARCH_NAME_THRESHOLD: f64 = 40.0;
pub const SINGLE_SEARCH_FINAL_THRESHOLD: f64 = 50.0;
pub const SINGLE_SEARCH_LIMIT: usize = 50;

pub const BULK_SEARCH_NAME_THRESHOLD: f64 = 60.0;
pub const BULK_SEARCH_FINAL_THRESHOLD: f64 = 60.0;
pub const BULK_SEARCH_LIMIT: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityQuery {
    /// Caller's correlation id, echoed back in bulk results.
    pub id: Option<String>,
    pub name: String,
    pub dob: Option<String>,
    pub citizenship: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkSearchEntry {
    pub request_id: Option<String>,
    pub matches: Vec<MatchResult>,
    pub match_count: usize,
    pub error: Option<String>,
}

/// Looks one entity up against the full deduplicated corpus. Every match
/// above the thresholds comes back sorted by final score, capped at `limit`.
/// An empty or unmatchable name yields an empty result, not an error.
pub fn search_single_entity(
    records: &[SanctionRecord],
    query: &EntityQuery,
    thresholds: &Thresholds,
    limit: usize,
    backend: BackendChoice,
) -> Result<Vec<MatchResult>> {
    if query.name.trim().is_empty() || records.is_empty() {
        return Ok(Vec::new());
    }
    let matcher = build_matcher(records, backend)?;
    Ok(match_one(records, &matcher, query, thresholds, limit))
}

/// Many queries against one freshly-built index. Per-query problems (such as
/// a missing name) surface in that query's entry; the call itself only fails
/// on setup errors.
pub fn search_entities_bulk(
    records: &[SanctionRecord],
    queries: &[EntityQuery],
    thresholds: &Thresholds,
    limit: usize,
    backend: BackendChoice,
) -> Result<Vec<BulkSearchEntry>> {
    if queries.is_empty() {
        return Ok(Vec::new());
    }
    let matcher = build_matcher(records, backend)?;

    let mut out = Vec::with_capacity(queries.len());
    for query in queries {
        if query.name.trim().is_empty() {
            out.push(BulkSearchEntry {
                request_id: query.id.clone(),
                matches: Vec::new(),
                match_count: 0,
                error: Some("Name is required".to_string()),
            });
            continue;
        }
        let matches = match_one(records, &matcher, query, thresholds, limit);
        out.push(BulkSearchEntry {
            request_id: query.id.clone(),
            match_count: matches.len(),
            matches,
            error: None,
        });
    }
    Ok(out)
}

fn build_matcher(records: &[SanctionRecord], backend: BackendChoice) -> Result<NameMatcher> {
    let norms: Vec<String> = records.iter().map(|r| r.name_norm.clone()).collect();
    NameMatcher::build(norms, backend).context("Failed to build candidate index for search")
}

fn match_one(
    records: &[SanctionRecord],
    matcher: &NameMatcher,
    query: &EntityQuery,
    thresholds: &Thresholds,
    limit: usize,
) -> Vec<MatchResult> {
    let Some(match_query) = MatchQuery::from_parts(
        &query.name,
        query.dob.as_deref(),
        query.citizenship.as_deref(),
        None,
    ) else {
        return Vec::new();
    };

    let dob_comparator = FlexibleDobComparator;
    let mut matches: Vec<MatchResult> = matcher
        .all_matches(&match_query.name_norm, thresholds.name, &FilterParams::default())
        .into_iter()
        .filter_map(|(idx, name_scores)| {
            evaluate_candidate(
                &match_query,
                &records[idx],
                name_scores,
                thresholds,
                &dob_comparator,
            )
        })
        .collect();

    matches.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(limit);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn record(id: &str, name: &str, norm: &str, dob: Option<&str>, cit: Option<&str>) -> SanctionRecord {
        SanctionRecord {
            external_id: id.to_string(),
            source: "OFAC".to_string(),
            name: name.to_string(),
            name_norm: norm.to_string(),
            dob_raw: dob.map(str::to_string),
            citizenship_raw: cit.map(str::to_string),
            citizenship_norm: cit.map(|c| c.to_lowercase()),
            extra: Map::new(),
        }
    }

    fn corpus() -> Vec<SanctionRecord> {
        vec![
            record("A", "Ahmad Yani", "ahmad yani", Some("1961-06-21"), Some("ID")),
            record("B", "Ahmad Yanie", "ahmad yanie", None, None),
            record("C", "Budi Santoso", "budi santoso", None, None),
        ]
    }

    fn thresholds() -> Thresholds {
        Thresholds {
            name: 70.0,
            final_score: 50.0,
        }
    }

    #[test]
    fn single_search_sorts_by_final_score_and_caps() {
        let records = corpus();
        let query = EntityQuery {
            id: None,
            name: "Ahmad Yani".to_string(),
            dob: Some("1961-06-21".to_string()),
            citizenship: Some("ID".to_string()),
        };
        let matches =
            search_single_entity(&records, &query, &thresholds(), 10, BackendChoice::Fallback)
                .expect("search");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].sanction_external_id, "A");
        assert!(matches[0].final_score >= matches[1].final_score);

        let capped =
            search_single_entity(&records, &query, &thresholds(), 1, BackendChoice::Fallback)
                .expect("search");
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn empty_name_returns_empty_without_error() {
        let matches = search_single_entity(
            &corpus(),
            &EntityQuery {
                id: None,
                name: "   ".to_string(),
                dob: None,
                citizenship: None,
            },
            &thresholds(),
            10,
            BackendChoice::Fallback,
        )
        .expect("search");
        assert!(matches.is_empty());
    }

    #[test]
    fn bulk_search_reports_per_query_errors() {
        let queries = vec![
            EntityQuery {
                id: Some("q1".to_string()),
                name: "Ahmad Yani".to_string(),
                dob: None,
                citizenship: None,
            },
            EntityQuery {
                id: Some("q2".to_string()),
                name: String::new(),
                dob: None,
                citizenship: None,
            },
        ];
        let entries = search_entities_bulk(
            &corpus(),
            &queries,
            &Thresholds {
                name: 60.0,
                final_score: 60.0,
            },
            5,
            BackendChoice::Fallback,
        )
        .expect("bulk search");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].request_id.as_deref(), Some("q1"));
        assert!(entries[0].error.is_none());
        assert!(entries[0].match_count >= 1);
        assert_eq!(entries[1].error.as_deref(), Some("Name is required"));
        assert!(entries[1].matches.is_empty());
    }
}
