// src/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::matching::normalize::{normalize_country, normalize_name};

/// One watchlist entry as produced by the record store. Immutable for the
/// lifetime of a cache generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanctionRecord {
    pub external_id: String,
    pub source: String,
    pub name: String,
    /// Canonical comparable form; guaranteed non-empty (rows that normalize
    /// to nothing are dropped at load time).
    pub name_norm: String,
    pub dob_raw: Option<String>,
    pub citizenship_raw: Option<String>,
    pub citizenship_norm: Option<String>,
    /// Unrecognized source keys, retained verbatim for audit.
    pub extra: JsonMap<String, JsonValue>,
}

/// The normalized form of one side being screened (a customer, or one
/// transaction party). Built per comparison and thrown away.
#[derive(Debug, Clone)]
pub struct MatchQuery {
    pub name_norm: String,
    pub dob: Option<String>,
    pub citizenship_raw: Option<String>,
    pub citizenship_norm: Option<String>,
    pub country_of_residence: Option<String>,
}

impl MatchQuery {
    /// Returns `None` when the name normalizes to nothing; such a query is
    /// unmatchable and callers skip it.
    pub fn from_parts(
        name: &str,
        dob: Option<&str>,
        citizenship: Option<&str>,
        country_of_residence: Option<&str>,
    ) -> Option<Self> {
        let name_norm = normalize_name(name);
        if name_norm.is_empty() {
            return None;
        }
        let citizenship_raw = non_empty(citizenship);
        let citizenship_norm = citizenship_raw
            .as_deref()
            .map(normalize_country)
            .filter(|s| !s.is_empty());
        Some(Self {
            name_norm,
            dob: non_empty(dob),
            citizenship_raw,
            citizenship_norm,
            country_of_residence: non_empty(country_of_residence),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Sub-scores from the two-part name similarity, all on a 0-100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NameScores {
    pub jaro_winkler: f64,
    pub token_sort: f64,
    pub combined: f64,
}

impl NameScores {
    pub fn zero() -> Self {
        Self {
            jaro_winkler: 0.0,
            token_sort: 0.0,
            combined: 0.0,
        }
    }
}

/// Which attributes were available when the final score was combined. The
/// weight table is fixed per variant; weights always sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchScheme {
    NameOnly,
    NameDob,
    NameCitizenship,
    NameDobCitizenship,
}

impl MatchScheme {
    /// (name, dob, citizenship) weights.
    pub fn weights(&self) -> (f64, f64, f64) {
        match self {
            MatchScheme::NameDobCitizenship => (0.50, 0.30, 0.20),
            MatchScheme::NameDob => (0.70, 0.30, 0.0),
            MatchScheme::NameCitizenship => (0.70, 0.0, 0.30),
            MatchScheme::NameOnly => (1.0, 0.0, 0.0),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MatchScheme::NameOnly => "NAME_ONLY",
            MatchScheme::NameDob => "NAME_DOB",
            MatchScheme::NameCitizenship => "NAME_CITIZENSHIP",
            MatchScheme::NameDobCitizenship => "NAME_DOB_CITIZENSHIP",
        }
    }
}

/// One accepted match against a sanction record.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub sanction_external_id: String,
    pub sanction_source: String,
    pub sanction_name: String,
    pub sanction_name_norm: String,
    pub sanction_dob_raw: Option<String>,
    pub sanction_citizenship: Option<String>,
    pub name_scores: NameScores,
    pub dob_score: f64,
    pub dob_match_type: Option<String>,
    pub citizenship_score: f64,
    pub final_score: f64,
    pub scheme: MatchScheme,
    pub geographic_insights: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
            JobStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "PENDING" => Some(JobStatus::Pending),
            "RUNNING" => Some(JobStatus::Running),
            "DONE" => Some(JobStatus::Done),
            "FAILED" => Some(JobStatus::Failed),
            "CANCELED" => Some(JobStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetRole {
    Sender,
    Receiver,
}

impl TargetRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetRole::Sender => "sender",
            TargetRole::Receiver => "receiver",
        }
    }
}

/// Persistent screening job row. Created PENDING by a caller, mutated only by
/// the orchestrator while it runs, except for an external cancel request.
#[derive(Debug, Clone)]
pub struct ScreeningJob {
    pub id: i64,
    pub batch_id: i64,
    pub status: JobStatus,
    pub threshold_name_score: f64,
    pub threshold_score: f64,
    /// Comma-joined source codes, empty/"all" meaning no restriction.
    pub sanction_source_filter: Option<String>,
    pub total_transactions: i64,
    pub processed_transactions: i64,
    pub total_sanctions: i64,
    pub total_matches: i64,
    pub progress_percentage: f64,
    pub error_message: Option<String>,
    pub task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Snapshot served to progress pollers.
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub job_id: i64,
    pub status: JobStatus,
    pub processed: i64,
    pub total: i64,
    pub matches: i64,
    pub percent: f64,
}

/// The transaction ledger fields the engine reads. Each row names up to two
/// screenable parties.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: i64,
    pub batch_id: i64,
    pub sender_name: Option<String>,
    pub sender_name_normalized: Option<String>,
    pub sender_dob: Option<String>,
    pub sender_country: Option<String>,
    pub receiver_name: Option<String>,
    pub receiver_name_normalized: Option<String>,
    pub receiver_dob: Option<String>,
    pub receiver_country: Option<String>,
    pub destination_country: Option<String>,
}

/// Borrowed view of one side of a transaction.
#[derive(Debug, Clone, Copy)]
pub struct Party<'a> {
    pub role: TargetRole,
    pub raw_name: Option<&'a str>,
    pub norm_name: Option<&'a str>,
    pub dob: Option<&'a str>,
    pub country: Option<&'a str>,
}

impl Transaction {
    pub fn party(&self, role: TargetRole) -> Party<'_> {
        match role {
            TargetRole::Sender => Party {
                role,
                raw_name: self.sender_name.as_deref(),
                norm_name: self.sender_name_normalized.as_deref(),
                dob: self.sender_dob.as_deref(),
                country: self.sender_country.as_deref(),
            },
            TargetRole::Receiver => Party {
                role,
                raw_name: self.receiver_name.as_deref(),
                norm_name: self.receiver_name_normalized.as_deref(),
                dob: self.receiver_dob.as_deref(),
                country: self.receiver_country.as_deref(),
            },
        }
    }
}

impl<'a> Party<'a> {
    /// Builds the match query for this party, preferring the precomputed
    /// normalized column when the ledger ingest provided one.
    pub fn to_query(&self, destination_country: Option<&str>) -> Option<MatchQuery> {
        let raw = self.raw_name.map(str::trim).filter(|s| !s.is_empty())?;
        let precomputed = self.norm_name.map(str::trim).filter(|s| !s.is_empty());
        let name_norm = match precomputed {
            Some(n) => n.to_string(),
            None => normalize_name(raw),
        };
        if name_norm.is_empty() {
            return None;
        }
        let citizenship_raw = non_empty(self.country);
        let citizenship_norm = citizenship_raw
            .as_deref()
            .map(normalize_country)
            .filter(|s| !s.is_empty());
        Some(MatchQuery {
            name_norm,
            dob: non_empty(self.dob),
            citizenship_raw,
            citizenship_norm,
            country_of_residence: non_empty(destination_country),
        })
    }
}

/// One row for the screening_result table. Insert-only; rows exist only when
/// the final score cleared the owning job's threshold.
#[derive(Debug, Clone)]
pub struct NewScreeningResult {
    pub job_id: i64,
    pub transaction_id: i64,
    pub target_role: TargetRole,
    pub target_name: String,
    pub target_name_normalized: String,
    pub target_country: Option<String>,
    pub matched: MatchResult,
}
