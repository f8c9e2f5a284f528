// src/matching/geo.rs
//
// Geographic insight generation is a display-only collaborator: whatever it
// returns is attached verbatim to a match result. It is only invoked when
// the query side actually carries a citizenship value.

use super::normalize::normalize_country;

#[derive(Debug, Clone, Default)]
pub struct GeoAttributes {
    pub citizenship: Option<String>,
    pub country_of_residence: Option<String>,
    pub place_of_birth: Option<String>,
}

pub fn generate_geographic_insights(query: &GeoAttributes, record: &GeoAttributes) -> Vec<String> {
    let mut insights = Vec::new();

    let query_cit = query.citizenship.as_deref().map(normalize_country);
    let record_cit = record.citizenship.as_deref().map(normalize_country);

    match (&query_cit, &record_cit) {
        (Some(q), Some(r)) if !q.is_empty() && !r.is_empty() => {
            if q == r {
                insights.push(format!(
                    "Citizenship matches the listed entry ({})",
                    record.citizenship.as_deref().unwrap_or_default()
                ));
            } else {
                insights.push(format!(
                    "Citizenship differs from the listed entry (party: {}, listed: {})",
                    query.citizenship.as_deref().unwrap_or_default(),
                    record.citizenship.as_deref().unwrap_or_default()
                ));
            }
        }
        _ => {}
    }

    if let (Some(q_cit), Some(residence)) = (&query_cit, &query.country_of_residence) {
        let res_norm = normalize_country(residence);
        if !q_cit.is_empty() && !res_norm.is_empty() && *q_cit != res_norm {
            insights.push(format!(
                "Party resides outside its declared country of citizenship ({})",
                residence
            ));
        }
    }

    if let Some(birthplace) = &query.place_of_birth {
        if let Some(r) = &record_cit {
            if !r.is_empty() && normalize_country(birthplace) == *r {
                insights.push(format!(
                    "Place of birth matches the listed entry's citizenship ({})",
                    birthplace
                ));
            }
        }
    }

    insights
}
