// src/matching/dob.rs
//
// Date-of-birth comparison is a collaborator with a fixed contract: a 0-100
// score plus a human-readable match-type description. The engine treats the
// implementation as a black box; the default below handles the free-text,
// possibly multi-valued DOB fields found on real watchlists.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

pub const DOB_EXACT_SCORE: f64 = 100.0;
pub const DOB_YEAR_MONTH_SCORE: f64 = 85.0;
pub const DOB_YEAR_ONLY_SCORE: f64 = 60.0;

pub trait DobComparator: Send + Sync {
    /// `record_dob` may hold several semicolon-joined values (UN lists often
    /// carry multiple plausible birth years); the best-scoring value wins.
    /// `source_code` is passed through for source-specific conventions.
    fn compare(&self, query_dob: &str, record_dob: &str, source_code: &str) -> (f64, String);
}

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%Y/%m/%d"];

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(1[89]\d{2}|20\d{2})\b").unwrap());

fn parse_dob(text: &str) -> Option<NaiveDate> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }
    None
}

fn extract_year(text: &str) -> Option<i32> {
    YEAR_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[derive(Debug, Default)]
pub struct FlexibleDobComparator;

impl DobComparator for FlexibleDobComparator {
    fn compare(&self, query_dob: &str, record_dob: &str, _source_code: &str) -> (f64, String) {
        let query_date = parse_dob(query_dob);
        let query_year = query_date.map(|d| d.year()).or_else(|| extract_year(query_dob));

        let mut best_score = 0.0;
        let mut best_label = "No Match".to_string();
        let mut comparable = false;

        for value in record_dob.split(';') {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let record_date = parse_dob(value);
            let record_year = record_date.map(|d| d.year()).or_else(|| extract_year(value));

            let (score, label) = match (query_date, record_date) {
                (Some(q), Some(r)) => {
                    comparable = true;
                    if q == r {
                        (DOB_EXACT_SCORE, "Exact Match")
                    } else if q.year() == r.year() && q.month() == r.month() {
                        (DOB_YEAR_MONTH_SCORE, "Partial Match (year and month)")
                    } else if q.year() == r.year() {
                        (DOB_YEAR_ONLY_SCORE, "Year Only")
                    } else {
                        (0.0, "No Match")
                    }
                }
                _ => match (query_year, record_year) {
                    (Some(qy), Some(ry)) => {
                        comparable = true;
                        if qy == ry {
                            (DOB_YEAR_ONLY_SCORE, "Year Only")
                        } else {
                            (0.0, "No Match")
                        }
                    }
                    _ => (0.0, "Not Comparable"),
                },
            };

            if score > best_score {
                best_score = score;
                best_label = label.to_string();
            }
            if best_score == DOB_EXACT_SCORE {
                break;
            }
        }

        if !comparable {
            return (0.0, "Not Comparable".to_string());
        }
        (best_score, best_label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compare(q: &str, r: &str) -> (f64, String) {
        FlexibleDobComparator.compare(q, r, "OFAC")
    }

    #[test]
    fn exact_date_match() {
        let (score, label) = compare("1961-06-21", "1961-06-21");
        assert_eq!(score, DOB_EXACT_SCORE);
        assert_eq!(label, "Exact Match");
    }

    #[test]
    fn mixed_formats_still_match() {
        let (score, _) = compare("21/06/1961", "1961-06-21");
        assert_eq!(score, DOB_EXACT_SCORE);
    }

    #[test]
    fn year_and_month_partial() {
        let (score, label) = compare("1961-06-01", "1961-06-21");
        assert_eq!(score, DOB_YEAR_MONTH_SCORE);
        assert_eq!(label, "Partial Match (year and month)");
    }

    #[test]
    fn year_only_from_free_text() {
        let (score, label) = compare("1961-01-01", "circa 1961");
        assert_eq!(score, DOB_YEAR_ONLY_SCORE);
        assert_eq!(label, "Year Only");
    }

    #[test]
    fn multiple_record_values_take_the_best() {
        let (score, _) = compare("1961-06-21", "1959; 1961-06-21; 1963");
        assert_eq!(score, DOB_EXACT_SCORE);
        let (score, label) = compare("1963-02-02", "1959; 1961; 1963");
        assert_eq!(score, DOB_YEAR_ONLY_SCORE);
        assert_eq!(label, "Year Only");
    }

    #[test]
    fn garbage_is_not_comparable() {
        let (score, label) = compare("1961-06-21", "unknown");
        assert_eq!(score, 0.0);
        assert_eq!(label, "Not Comparable");
        let (score, label) = compare("n/a", "1961-06-21");
        assert_eq!(score, 0.0);
        assert_eq!(label, "Not Comparable");
    }

    #[test]
    fn different_dates_do_not_score() {
        let (score, label) = compare("1950-01-01", "1961-06-21");
        assert_eq!(score, 0.0);
        assert_eq!(label, "No Match");
    }
}
