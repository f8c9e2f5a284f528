// src/screening/evaluate.rs
//
// Given a query and one candidate record whose name already cleared stage-2
// scoring, settle the remaining attributes and decide acceptance.

use crate::matching::combine::combine_scores;
use crate::matching::dob::DobComparator;
use crate::matching::geo::{generate_geographic_insights, GeoAttributes};
use crate::matching::round2;
use crate::models::{MatchQuery, MatchResult, NameScores, SanctionRecord};

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub name: f64,
    pub final_score: f64,
}

/// Attribute scoring and acceptance for one candidate. The name score gates
/// everything: DOB and citizenship are only evaluated once it clears the
/// name threshold. Returns `None` when either threshold rejects the pair.
pub fn evaluate_candidate(
    query: &MatchQuery,
    record: &SanctionRecord,
    name_scores: NameScores,
    thresholds: &Thresholds,
    dob_comparator: &dyn DobComparator,
) -> Option<MatchResult> {
    if name_scores.combined < thresholds.name {
        return None;
    }

    // DOB only counts when both sides carry a value.
    let mut dob_score = 0.0;
    let mut dob_match_type = None;
    let mut has_dob = false;
    if let (Some(query_dob), Some(record_dob)) = (query.dob.as_deref(), record.dob_raw.as_deref())
    {
        let (score, label) = dob_comparator.compare(query_dob, record_dob, &record.source);
        dob_score = round2(score);
        dob_match_type = Some(label);
        has_dob = true;
    }

    // Citizenship is binary on the normalized values: equal or nothing.
    let mut citizenship_score = 0.0;
    let mut has_citizenship = false;
    if let (Some(query_cit), Some(record_cit)) = (
        query.citizenship_norm.as_deref(),
        record.citizenship_norm.as_deref(),
    ) {
        has_citizenship = true;
        if query_cit == record_cit {
            citizenship_score = 100.0;
        }
    }

    let (final_score, scheme) = combine_scores(
        name_scores.combined,
        dob_score,
        citizenship_score,
        has_dob,
        has_citizenship,
    );
    let final_score = round2(final_score);
    if final_score < thresholds.final_score {
        return None;
    }

    // Insights only when the query side declares a citizenship.
    let geographic_insights = match query.citizenship_raw.as_deref() {
        Some(cit) if !cit.is_empty() => generate_geographic_insights(
            &GeoAttributes {
                citizenship: Some(cit.to_string()),
                country_of_residence: query.country_of_residence.clone(),
                place_of_birth: None,
            },
            &GeoAttributes {
                citizenship: record.citizenship_raw.clone(),
                ..GeoAttributes::default()
            },
        ),
        _ => Vec::new(),
    };

    Some(MatchResult {
        sanction_external_id: record.external_id.clone(),
        sanction_source: record.source.clone(),
        sanction_name: record.name.clone(),
        sanction_name_norm: record.name_norm.clone(),
        sanction_dob_raw: record.dob_raw.clone(),
        sanction_citizenship: record.citizenship_raw.clone(),
        name_scores,
        dob_score,
        dob_match_type,
        citizenship_score,
        final_score,
        scheme,
        geographic_insights,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::dob::FlexibleDobComparator;
    use crate::matching::name::name_similarity;
    use crate::models::MatchScheme;
    use serde_json::Map;

    fn record(dob: Option<&str>, citizenship: Option<&str>) -> SanctionRecord {
        SanctionRecord {
            external_id: "X-1".to_string(),
            source: "OFAC".to_string(),
            name: "Ahmad Yani".to_string(),
            name_norm: "ahmad yani".to_string(),
            dob_raw: dob.map(str::to_string),
            citizenship_raw: citizenship.map(str::to_string),
            citizenship_norm: citizenship.map(|c| c.to_lowercase()),
            extra: Map::new(),
        }
    }

    fn query(dob: Option<&str>, citizenship: Option<&str>) -> MatchQuery {
        MatchQuery::from_parts("Ahmad Yani", dob, citizenship, None).expect("query")
    }

    fn thresholds() -> Thresholds {
        Thresholds {
            name: 70.0,
            final_score: 60.0,
        }
    }

    #[test]
    fn name_only_when_no_attributes_available() {
        let q = query(None, None);
        let r = record(None, None);
        let scores = name_similarity(&q.name_norm, &r.name_norm);
        let result =
            evaluate_candidate(&q, &r, scores, &thresholds(), &FlexibleDobComparator)
                .expect("match");
        assert_eq!(result.scheme, MatchScheme::NameOnly);
        assert_eq!(result.final_score, scores.combined);
        assert!(result.geographic_insights.is_empty());
    }

    #[test]
    fn full_scheme_when_both_attributes_align() {
        let q = query(Some("1961-06-21"), Some("ID"));
        let r = record(Some("1961-06-21"), Some("id"));
        let scores = name_similarity(&q.name_norm, &r.name_norm);
        let result =
            evaluate_candidate(&q, &r, scores, &thresholds(), &FlexibleDobComparator)
                .expect("match");
        assert_eq!(result.scheme, MatchScheme::NameDobCitizenship);
        assert_eq!(result.dob_score, 100.0);
        assert_eq!(result.citizenship_score, 100.0);
        let expected = 0.5 * scores.combined + 0.3 * 100.0 + 0.2 * 100.0;
        assert!((result.final_score - crate::matching::round2(expected)).abs() < 1e-9);
        assert!(!result.geographic_insights.is_empty());
    }

    #[test]
    fn one_sided_attributes_are_unavailable() {
        // Record has no DOB: the scheme must not include it even though the
        // query carries one.
        let q = query(Some("1961-06-21"), None);
        let r = record(None, Some("ID"));
        let scores = name_similarity(&q.name_norm, &r.name_norm);
        let result =
            evaluate_candidate(&q, &r, scores, &thresholds(), &FlexibleDobComparator)
                .expect("match");
        assert_eq!(result.scheme, MatchScheme::NameOnly);
        assert!(result.dob_match_type.is_none());
    }

    #[test]
    fn citizenship_mismatch_scores_zero_not_partial() {
        let q = query(None, Some("MY"));
        let r = record(None, Some("ID"));
        let scores = name_similarity(&q.name_norm, &r.name_norm);
        let result =
            evaluate_candidate(&q, &r, scores, &thresholds(), &FlexibleDobComparator)
                .expect("match");
        assert_eq!(result.scheme, MatchScheme::NameCitizenship);
        assert_eq!(result.citizenship_score, 0.0);
    }

    #[test]
    fn name_below_threshold_short_circuits() {
        let q = query(Some("1961-06-21"), Some("ID"));
        let r = record(Some("1961-06-21"), Some("ID"));
        let weak = NameScores {
            jaro_winkler: 10.0,
            token_sort: 10.0,
            combined: 10.0,
        };
        assert!(
            evaluate_candidate(&q, &r, weak, &thresholds(), &FlexibleDobComparator).is_none()
        );
    }

    #[test]
    fn final_threshold_rejects_weak_combinations() {
        // Name barely clears its own threshold but DOB drags the weighted
        // score below the final cut.
        let q = query(Some("1950-01-01"), None);
        let r = record(Some("1961-06-21"), None);
        let scores = NameScores {
            jaro_winkler: 71.0,
            token_sort: 71.0,
            combined: 71.0,
        };
        let tight = Thresholds {
            name: 70.0,
            final_score: 60.0,
        };
        // 0.7 * 71 + 0.3 * 0 = 49.7 < 60.
        assert!(
            evaluate_candidate(&q, &r, scores, &tight, &FlexibleDobComparator).is_none()
        );
    }
}
