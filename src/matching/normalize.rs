// src/matching/normalize.rs

use once_cell::sync::Lazy;
use regex::Regex;

/// Entity/title tokens that carry no identity signal and are dropped whole.
const NOISE_TOKENS: [&str; 9] = ["pt", "cv", "ltd", "inc", "mr", "mrs", "haji", "hj", "ud"];

/// Purely relational tokens (patronymic connectors); dropped entirely.
const RELATIONAL_TOKENS: [&str; 2] = ["bin", "binti"];

/// Transliteration variants collapsed to one canonical spelling so that
/// "Mohamed", "Mochammad" and "Md" all compare as the same token.
const VARIANT_CANON: [(&str, &str); 7] = [
    ("mohammad", "muhammad"),
    ("mohamed", "muhammad"),
    ("mochammad", "muhammad"),
    ("mehmed", "muhammad"),
    ("moh", "muhammad"),
    ("md", "muhammad"),
    ("abd", "abdul"),
];

static NON_ALNUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());

/// Canonicalizes a raw name into its comparable form: lowercase, symbols
/// stripped, noise/relational tokens removed, variants collapsed, whitespace
/// normalized. Pure and idempotent; an empty result means "unmatchable" and
/// callers skip the value.
pub fn normalize_name(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let stripped = NON_ALNUM_RE.replace_all(&lowered, "");

    let mut tokens: Vec<&str> = Vec::new();
    for token in stripped.split_whitespace() {
        if NOISE_TOKENS.contains(&token) || RELATIONAL_TOKENS.contains(&token) {
            continue;
        }
        tokens.push(canonical_token(token));
    }
    tokens.join(" ")
}

fn canonical_token(token: &str) -> &str {
    for (variant, canonical) in VARIANT_CANON.iter() {
        if token == *variant {
            return canonical;
        }
    }
    token
}

/// Citizenship/country normalization: lowercase, alphanumerics only. Applied
/// identically to both sides before equality comparison.
pub fn normalize_country(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_case_and_whitespace_insensitive() {
        assert_eq!(
            normalize_name(" Mr. MUHAMMAD  Ali "),
            normalize_name("muhammad ali")
        );
        assert_eq!(normalize_name("muhammad ali"), "muhammad ali");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in [
            "PT. Bank Mega Tbk",
            "Hj. Siti Aminah binti Yusuf",
            "Moh. Abd Rahman",
            "O'Connor, John Jr.",
            "",
        ] {
            let once = normalize_name(raw);
            assert_eq!(normalize_name(&once), once, "input: {raw:?}");
        }
    }

    #[test]
    fn noise_and_relational_tokens_are_dropped() {
        assert_eq!(normalize_name("PT Maju Jaya Ltd"), "maju jaya");
        assert_eq!(normalize_name("Ali bin Ahmad"), "ali ahmad");
        assert_eq!(normalize_name("Siti binti Rahman"), "siti rahman");
        // Noise only inside whole tokens, not substrings.
        assert_eq!(normalize_name("Petrus Incognito"), "petrus incognito");
    }

    #[test]
    fn transliteration_variants_collapse() {
        assert_eq!(normalize_name("Mohamed Salah"), "muhammad salah");
        assert_eq!(normalize_name("Mochammad Ridwan"), "muhammad ridwan");
        assert_eq!(normalize_name("Md. Rahim"), "muhammad rahim");
        assert_eq!(normalize_name("Abd Rahman"), "abdul rahman");
        assert_eq!(normalize_name("Mehmed II"), "muhammad ii");
    }

    #[test]
    fn degenerate_inputs_collapse_to_empty() {
        assert_eq!(normalize_name(""), "");
        assert_eq!(normalize_name("  ...  "), "");
        assert_eq!(normalize_name("Mr Mrs PT"), "");
    }

    #[test]
    fn country_normalization_keeps_alphanumerics() {
        assert_eq!(normalize_country("Indonesia"), "indonesia");
        assert_eq!(normalize_country(" I.D. "), "id");
        assert_eq!(normalize_country(""), "");
    }
}
