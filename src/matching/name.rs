// src/matching/name.rs
//
// Stage-2 precise scoring over the candidates the index lets through, plus
// the matcher that ties both stages together.

use log::debug;
use strsim::{jaro_winkler, normalized_levenshtein};

use super::index::{build_name_index, BackendChoice, FilterParams, IndexBackendError, NameIndex};
use super::round2;
use crate::models::NameScores;

// Jaro-Winkler carries the weight: character/spelling accuracy is what
// matters most for watchlist names. Token-sort covers reordered name parts
// ("Joko Widodo" vs "Widodo Joko").
const JARO_WINKLER_WEIGHT: f64 = 0.60;
const TOKEN_SORT_WEIGHT: f64 = 0.40;

/// Similarity between two normalized names on a 0-100 scale. Symmetric;
/// either side empty scores 0.
pub fn name_similarity(a: &str, b: &str) -> NameScores {
    if a.is_empty() || b.is_empty() {
        return NameScores::zero();
    }
    let jw = jaro_winkler(a, b) * 100.0;
    let sort = token_sort_ratio(a, b);
    let combined = JARO_WINKLER_WEIGHT * jw + TOKEN_SORT_WEIGHT * sort;
    NameScores {
        jaro_winkler: round2(jw),
        token_sort: round2(sort),
        combined: round2(combined),
    }
}

// Similarity ratio after sorting each side's tokens alphabetically, which
// makes word order irrelevant.
fn token_sort_ratio(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&sorted_tokens(a), &sorted_tokens(b)) * 100.0
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Two-stage name matcher: one candidate index over a fixed corpus of
/// normalized names, plus precise scoring of whatever the filter lets
/// through.
pub struct NameMatcher {
    norms: Vec<String>,
    index: Box<dyn NameIndex>,
}

impl NameMatcher {
    pub fn build(norms: Vec<String>, choice: BackendChoice) -> Result<Self, IndexBackendError> {
        let index = build_name_index(&norms, choice)?;
        debug!(
            "Name matcher ready: {} corpus entries, {} backend",
            norms.len(),
            index.backend_name()
        );
        Ok(Self { norms, index })
    }

    pub fn backend_name(&self) -> &'static str {
        self.index.backend_name()
    }

    pub fn corpus_len(&self) -> usize {
        self.norms.len()
    }

    pub fn filter_indices(&self, query_norm: &str, params: &FilterParams) -> Vec<usize> {
        self.index.filter_indices(query_norm, params)
    }

    /// Highest-scoring candidate with combined score >= threshold; on ties
    /// the first candidate in corpus order wins. `None` when nothing clears
    /// the threshold.
    pub fn best_match(
        &self,
        query_norm: &str,
        threshold: f64,
        params: &FilterParams,
    ) -> Option<(usize, NameScores)> {
        if query_norm.is_empty() {
            return None;
        }
        let mut best: Option<(usize, NameScores)> = None;
        for idx in self.index.filter_indices(query_norm, params) {
            let scores = name_similarity(query_norm, &self.norms[idx]);
            if scores.combined < threshold {
                continue;
            }
            let replace = match &best {
                Some((_, current)) => scores.combined > current.combined,
                None => true,
            };
            if replace {
                best = Some((idx, scores));
            }
        }
        best
    }

    /// Every candidate clearing the threshold, in corpus order. Callers that
    /// present results sort by their own final score.
    pub fn all_matches(
        &self,
        query_norm: &str,
        threshold: f64,
        params: &FilterParams,
    ) -> Vec<(usize, NameScores)> {
        if query_norm.is_empty() {
            return Vec::new();
        }
        self.index
            .filter_indices(query_norm, params)
            .into_iter()
            .filter_map(|idx| {
                let scores = name_similarity(query_norm, &self.norms[idx]);
                (scores.combined >= threshold).then_some((idx, scores))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::normalize::normalize_name;

    fn matcher(names: &[&str]) -> NameMatcher {
        let norms = names.iter().map(|n| normalize_name(n)).collect();
        NameMatcher::build(norms, BackendChoice::Fallback).expect("matcher")
    }

    #[test]
    fn scoring_is_symmetric_and_bounded() {
        let pairs = [
            ("ahmad yani", "ahmad yanie"),
            ("muhammad ali", "ali muhammad"),
            ("john doe", "budi santoso"),
            ("a", "ab"),
        ];
        for (a, b) in pairs {
            let ab = name_similarity(a, b);
            let ba = name_similarity(b, a);
            assert_eq!(ab, ba, "{a} vs {b}");
            assert!((0.0..=100.0).contains(&ab.combined));
            assert!((0.0..=100.0).contains(&ab.jaro_winkler));
            assert!((0.0..=100.0).contains(&ab.token_sort));
        }
    }

    #[test]
    fn identical_names_score_100() {
        let scores = name_similarity("ahmad yani", "ahmad yani");
        assert_eq!(scores.combined, 100.0);
        assert_eq!(scores.jaro_winkler, 100.0);
        assert_eq!(scores.token_sort, 100.0);
    }

    #[test]
    fn empty_input_scores_zero() {
        assert_eq!(name_similarity("", "ahmad yani").combined, 0.0);
        assert_eq!(name_similarity("ahmad yani", "").combined, 0.0);
    }

    #[test]
    fn word_order_is_irrelevant_to_token_sort() {
        let scores = name_similarity("joko widodo", "widodo joko");
        assert_eq!(scores.token_sort, 100.0);
        assert!(scores.combined > 70.0);
    }

    #[test]
    fn typo_clears_the_default_threshold() {
        let m = matcher(&["Ahmad Yani"]);
        let (idx, scores) = m
            .best_match(
                &normalize_name("Ahmad Yanie"),
                70.0,
                &FilterParams::default(),
            )
            .expect("match");
        assert_eq!(idx, 0);
        assert!(scores.combined >= 70.0, "scored {}", scores.combined);
    }

    #[test]
    fn best_match_prefers_highest_then_first() {
        let m = matcher(&["Ahmad Yani", "Ahmad Yanie", "Ahmad Yani"]);
        let (idx, scores) = m
            .best_match(
                &normalize_name("Ahmad Yani"),
                70.0,
                &FilterParams::default(),
            )
            .expect("match");
        // Exact duplicates at 0 and 2 both score 100; the first wins.
        assert_eq!(idx, 0);
        assert_eq!(scores.combined, 100.0);
    }

    #[test]
    fn best_match_none_below_threshold() {
        let m = matcher(&["Budi Santoso"]);
        assert!(m
            .best_match(
                &normalize_name("Alice Johnson"),
                70.0,
                &FilterParams::default()
            )
            .is_none());
        assert!(m.best_match("", 70.0, &FilterParams::default()).is_none());
    }

    #[test]
    fn coarse_filter_never_hides_a_scoring_match() {
        // Superset property: every corpus entry scoring above the threshold
        // must survive stage 1 for that query.
        let names = [
            "Ahmad Yani",
            "Achmad Yani",
            "Muhammad Ali",
            "Mohamed Aly",
            "Joko Widodo",
            "Widodo Joko",
            "Jane Doe",
        ];
        let m = matcher(&names);
        let params = FilterParams::default();
        for query in ["ahmad yanie", "muhammad ali", "widodo joko"] {
            let retrieved = m.filter_indices(query, &params);
            for (idx, norm) in m.norms.iter().enumerate() {
                if name_similarity(query, norm).combined >= 70.0 {
                    assert!(
                        retrieved.contains(&idx),
                        "query {query:?} lost candidate {norm:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn all_matches_returns_every_hit() {
        let m = matcher(&["Ahmad Yani", "Ahmad Yanie", "Budi Santoso"]);
        let hits = m.all_matches(
            &normalize_name("Ahmad Yani"),
            70.0,
            &FilterParams::default(),
        );
        let indices: Vec<usize> = hits.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1]);
    }
}
