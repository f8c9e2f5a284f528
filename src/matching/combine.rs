// src/matching/combine.rs

use crate::models::MatchScheme;

/// Picks the weighting scheme from attribute availability alone.
pub fn choose_scheme(has_dob: bool, has_citizenship: bool) -> MatchScheme {
    match (has_dob, has_citizenship) {
        (true, true) => MatchScheme::NameDobCitizenship,
        (true, false) => MatchScheme::NameDob,
        (false, true) => MatchScheme::NameCitizenship,
        (false, false) => MatchScheme::NameOnly,
    }
}

/// Merges the sub-scores into a final 0-100 score under the scheme dictated
/// by which attributes both sides actually carried.
pub fn combine_scores(
    name_score: f64,
    dob_score: f64,
    citizenship_score: f64,
    has_dob: bool,
    has_citizenship: bool,
) -> (f64, MatchScheme) {
    let scheme = choose_scheme(has_dob, has_citizenship);
    let (w_name, w_dob, w_cit) = scheme.weights();
    let final_score = w_name * name_score + w_dob * dob_score + w_cit * citizenship_score;
    (final_score, scheme)
}
