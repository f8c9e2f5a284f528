// src/matching/index.rs
//
// Stage-1 candidate retrieval: a cheap, deliberately over-inclusive substring
// filter that narrows the watchlist corpus before precise scoring. Two
// interchangeable backends sit behind one trait; selection lives in
// `build_name_index`.

use arrow::array::{Array, BooleanArray, Scalar, StringArray};
use arrow::compute::kernels::boolean::or;
use arrow::compute::kernels::comparison::contains;
use log::{debug, warn};
use thiserror::Error;

/// Tokens shorter than this never participate in filtering.
pub const MIN_FILTER_TOKEN_LENGTH: usize = 3;
/// Substring patterns are the first 4 chars of a token, so a trailing typo
/// still passes the filter and is settled by stage-2 scoring.
const SEARCH_PATTERN_LENGTH: usize = 4;

pub const DEFAULT_MAX_CANDIDATES: usize = 1000;
pub const DEFAULT_TOKENS_LIMIT: usize = 3;

#[derive(Debug, Error)]
pub enum IndexBackendError {
    #[error("accelerated matcher backend failed to initialize: {0}")]
    AcceleratedUnavailable(String),
    #[error("unknown matcher backend '{0}' (expected auto, accelerated or fallback)")]
    UnknownBackend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    /// Prefer the accelerated backend, silently fall back if it cannot start.
    Auto,
    /// Accelerated or nothing: an initialization failure is a hard
    /// configuration error.
    Accelerated,
    /// Plain in-memory scan.
    Fallback,
}

impl BackendChoice {
    pub fn parse(raw: &str) -> Result<Self, IndexBackendError> {
        match raw.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(BackendChoice::Auto),
            "accelerated" => Ok(BackendChoice::Accelerated),
            "fallback" => Ok(BackendChoice::Fallback),
            other => Err(IndexBackendError::UnknownBackend(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendChoice::Auto => "auto",
            BackendChoice::Accelerated => "accelerated",
            BackendChoice::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FilterParams {
    /// Upper bound on returned candidates, in corpus order.
    pub max_candidates: usize,
    /// At most this many query tokens are used for filtering.
    pub tokens_limit: usize,
    /// When set, require |len(candidate) - len(query)| <= max(1, len(query) * ratio).
    pub length_ratio: Option<f64>,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            max_candidates: DEFAULT_MAX_CANDIDATES,
            tokens_limit: DEFAULT_TOKENS_LIMIT,
            length_ratio: None,
        }
    }
}

/// Retrieval contract shared by both backends. Returned indices point into
/// the corpus the index was built from, in corpus order.
pub trait NameIndex: Send + Sync {
    fn filter_indices(&self, query_norm: &str, params: &FilterParams) -> Vec<usize>;
    fn backend_name(&self) -> &'static str;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn filter_tokens(query_norm: &str, tokens_limit: usize) -> Vec<&str> {
    query_norm
        .split_whitespace()
        .filter(|t| t.len() >= MIN_FILTER_TOKEN_LENGTH)
        .take(tokens_limit)
        .collect()
}

// Normalized names are ASCII (normalization strips everything else), so byte
// slicing is safe here.
fn search_pattern(token: &str) -> &str {
    if token.len() < SEARCH_PATTERN_LENGTH {
        token
    } else {
        &token[..SEARCH_PATTERN_LENGTH]
    }
}

fn length_allows(candidate_len: usize, query_len: usize, ratio: f64) -> bool {
    let allowed = std::cmp::max(1, (query_len as f64 * ratio) as i64);
    (candidate_len as i64 - query_len as i64).abs() <= allowed
}

/// CPU fallback: substring tests over an in-memory string sequence.
pub struct VecNameIndex {
    names: Vec<String>,
}

impl VecNameIndex {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}

impl NameIndex for VecNameIndex {
    fn filter_indices(&self, query_norm: &str, params: &FilterParams) -> Vec<usize> {
        let query = query_norm.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let tokens = filter_tokens(query, params.tokens_limit);
        if tokens.is_empty() {
            return Vec::new();
        }
        let patterns: Vec<&str> = tokens.iter().map(|t| search_pattern(t)).collect();

        let mut out = Vec::new();
        for (i, name) in self.names.iter().enumerate() {
            if !patterns.iter().any(|p| name.contains(p)) {
                continue;
            }
            if let Some(ratio) = params.length_ratio {
                if !length_allows(name.len(), query.len(), ratio) {
                    continue;
                }
            }
            out.push(i);
            if out.len() >= params.max_candidates {
                break;
            }
        }
        out
    }

    fn backend_name(&self) -> &'static str {
        "fallback"
    }

    fn len(&self) -> usize {
        self.names.len()
    }
}

/// Accelerated backend: the corpus lives in a columnar string array and each
/// token pattern is tested against the whole corpus with one compute kernel
/// call.
pub struct ArrowNameIndex {
    column: StringArray,
    lengths: Vec<usize>,
}

impl ArrowNameIndex {
    pub fn build(names: &[String]) -> Result<Self, IndexBackendError> {
        let column = StringArray::from_iter_values(names.iter().map(|s| s.as_str()));

        // Run one tiny kernel call now so an unusable compute engine surfaces
        // at construction time instead of mid-job.
        let probe = Scalar::new(StringArray::from_iter_values(["a"]));
        contains(&column, &probe)
            .map_err(|e| IndexBackendError::AcceleratedUnavailable(e.to_string()))?;

        let lengths = names.iter().map(|s| s.len()).collect();
        Ok(Self { column, lengths })
    }

    fn combined_mask(&self, patterns: &[&str]) -> Result<Option<BooleanArray>, arrow::error::ArrowError> {
        let mut mask: Option<BooleanArray> = None;
        for pattern in patterns {
            let needle = Scalar::new(StringArray::from_iter_values([*pattern]));
            let hits = contains(&self.column, &needle)?;
            mask = Some(match mask {
                Some(acc) => or(&acc, &hits)?,
                None => hits,
            });
        }
        Ok(mask)
    }

    // Same contract as the kernel path, used if a kernel call fails mid-query.
    fn scan_indices(&self, patterns: &[&str], query_len: usize, params: &FilterParams) -> Vec<usize> {
        let mut out = Vec::new();
        for i in 0..self.column.len() {
            let name = self.column.value(i);
            if !patterns.iter().any(|p| name.contains(p)) {
                continue;
            }
            if let Some(ratio) = params.length_ratio {
                if !length_allows(self.lengths[i], query_len, ratio) {
                    continue;
                }
            }
            out.push(i);
            if out.len() >= params.max_candidates {
                break;
            }
        }
        out
    }
}

impl NameIndex for ArrowNameIndex {
    fn filter_indices(&self, query_norm: &str, params: &FilterParams) -> Vec<usize> {
        let query = query_norm.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let tokens = filter_tokens(query, params.tokens_limit);
        if tokens.is_empty() {
            return Vec::new();
        }
        let patterns: Vec<&str> = tokens.iter().map(|t| search_pattern(t)).collect();

        let mask = match self.combined_mask(&patterns) {
            Ok(mask) => mask,
            Err(e) => {
                warn!(
                    "Accelerated substring kernel failed mid-query ({}); scanning column directly",
                    e
                );
                return self.scan_indices(&patterns, query.len(), params);
            }
        };
        let mask = match mask {
            Some(mask) => mask,
            None => return Vec::new(),
        };

        let mut out = Vec::new();
        for i in 0..mask.len() {
            if !mask.value(i) {
                continue;
            }
            if let Some(ratio) = params.length_ratio {
                if !length_allows(self.lengths[i], query.len(), ratio) {
                    continue;
                }
            }
            out.push(i);
            if out.len() >= params.max_candidates {
                break;
            }
        }
        out
    }

    fn backend_name(&self) -> &'static str {
        "accelerated"
    }

    fn len(&self) -> usize {
        self.column.len()
    }
}

/// Backend factory. `Auto` degrades to the fallback scan with a warning;
/// explicitly requesting `Accelerated` turns the same failure into a hard
/// configuration error.
pub fn build_name_index(
    names: &[String],
    choice: BackendChoice,
) -> Result<Box<dyn NameIndex>, IndexBackendError> {
    match choice {
        BackendChoice::Fallback => Ok(Box::new(VecNameIndex::new(names.to_vec()))),
        BackendChoice::Accelerated => {
            let index = ArrowNameIndex::build(names)?;
            Ok(Box::new(index))
        }
        BackendChoice::Auto => match ArrowNameIndex::build(names) {
            Ok(index) => {
                debug!("Candidate index using accelerated columnar backend");
                Ok(Box::new(index))
            }
            Err(e) => {
                warn!(
                    "Accelerated matcher backend unavailable ({}); falling back to in-memory scan",
                    e
                );
                Ok(Box::new(VecNameIndex::new(names.to_vec())))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<String> {
        [
            "ahmad yani",
            "john doe",
            "muhammad ali",
            "ali muhammad",
            "jane doe smith",
            "budi santoso",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn backends() -> Vec<Box<dyn NameIndex>> {
        let names = corpus();
        vec![
            Box::new(VecNameIndex::new(names.clone())),
            Box::new(ArrowNameIndex::build(&names).expect("arrow backend")),
        ]
    }

    #[test]
    fn typo_query_still_reaches_its_record() {
        for index in backends() {
            let hits = index.filter_indices("ahmad yanie", &FilterParams::default());
            assert!(hits.contains(&0), "{} backend", index.backend_name());
        }
    }

    #[test]
    fn backends_agree_and_preserve_corpus_order() {
        let params = FilterParams::default();
        let vec_index = VecNameIndex::new(corpus());
        let arrow_index = ArrowNameIndex::build(&corpus()).expect("arrow backend");
        for query in ["muhammad", "doe smith", "ali", "budi santoso", ""] {
            let a = vec_index.filter_indices(query, &params);
            let b = arrow_index.filter_indices(query, &params);
            assert_eq!(a, b, "query: {query:?}");
            let mut sorted = a.clone();
            sorted.sort_unstable();
            assert_eq!(a, sorted, "indices must be in corpus order");
        }
    }

    #[test]
    fn sparse_queries_return_nothing() {
        for index in backends() {
            // All tokens shorter than the minimum filter length.
            assert!(index
                .filter_indices("al bo", &FilterParams::default())
                .is_empty());
            assert!(index.filter_indices("", &FilterParams::default()).is_empty());
        }
    }

    #[test]
    fn max_candidates_bounds_the_result() {
        let names: Vec<String> = (0..50).map(|i| format!("muhammad {i}")).collect();
        let params = FilterParams {
            max_candidates: 7,
            ..FilterParams::default()
        };
        for index in [
            Box::new(VecNameIndex::new(names.clone())) as Box<dyn NameIndex>,
            Box::new(ArrowNameIndex::build(&names).expect("arrow backend")),
        ] {
            let hits = index.filter_indices("muhammad", &params);
            assert_eq!(hits, (0..7).collect::<Vec<_>>());
        }
    }

    #[test]
    fn length_ratio_prunes_disparate_candidates() {
        let params = FilterParams {
            length_ratio: Some(0.2),
            ..FilterParams::default()
        };
        for index in backends() {
            let hits = index.filter_indices("jane doe smith", &params);
            // "john doe" (8 chars) is too far from 14 chars at ratio 0.2.
            assert!(hits.contains(&4));
            assert!(!hits.contains(&1), "{} backend", index.backend_name());
        }
    }

    #[test]
    fn tokens_limit_caps_the_patterns_used() {
        let params = FilterParams {
            tokens_limit: 1,
            ..FilterParams::default()
        };
        for index in backends() {
            // Only "jane" survives the limit, so "budi santoso" cannot match.
            let hits = index.filter_indices("jane budi", &params);
            assert_eq!(hits, vec![4], "{} backend", index.backend_name());
        }
    }

    #[test]
    fn factory_honors_explicit_fallback() {
        let index = build_name_index(&corpus(), BackendChoice::Fallback).expect("index");
        assert_eq!(index.backend_name(), "fallback");
        let index = build_name_index(&corpus(), BackendChoice::Auto).expect("index");
        assert_eq!(index.backend_name(), "accelerated");
    }

    #[test]
    fn backend_choice_parsing() {
        assert_eq!(BackendChoice::parse("auto").unwrap(), BackendChoice::Auto);
        assert_eq!(
            BackendChoice::parse(" Accelerated ").unwrap(),
            BackendChoice::Accelerated
        );
        assert_eq!(
            BackendChoice::parse("fallback").unwrap(),
            BackendChoice::Fallback
        );
        assert!(BackendChoice::parse("gpu").is_err());
    }
}
