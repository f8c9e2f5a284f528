// src/screening/job.rs
//
// The batch orchestrator: walks one upload batch in keyset-paged chunks,
// screens both parties of every transaction against the watchlist corpus,
// and persists results and live progress. Cancellation is cooperative: the
// job's own status row is re-read once per chunk.

use anyhow::{Context, Result};
use log::{debug, error, info};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::BatchTuning;
use crate::db::{self, PgPool};
use crate::matching::dob::FlexibleDobComparator;
use crate::matching::index::{BackendChoice, FilterParams};
use crate::matching::name::NameMatcher;
use crate::models::{JobStatus, NewScreeningResult, TargetRole};
use crate::sanctions::store::SanctionStore;
use crate::screening::evaluate::{evaluate_candidate, Thresholds};

pub const DEFAULT_NAME_THRESHOLD: f64 = 70.0;
pub const DEFAULT_FINAL_THRESHOLD: f64 = 60.0;

/// What pollers get in error_message on failure; detail stays in the log.
const GENERIC_JOB_ERROR: &str = "Internal error during screening (see worker logs)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Done { processed: i64, matches: i64 },
    Canceled { processed: i64 },
}

/// Live progress fraction; clamped so a drifting transaction count can never
/// push it past 100.
pub fn progress_percentage(processed: i64, total: i64) -> f64 {
    let pct = processed as f64 / std::cmp::max(total, 1) as f64 * 100.0;
    pct.clamp(0.0, 100.0)
}

/// Runs one screening job to a terminal state. Any unexpected error inside
/// the run marks the job FAILED with a generic message, unless an external
/// cancel already landed, which is preserved.
pub async fn run_screening_job(
    pool: &PgPool,
    store: &SanctionStore,
    job_id: i64,
    tuning: &BatchTuning,
    backend: BackendChoice,
) -> Result<JobOutcome> {
    match run_job_inner(pool, store, job_id, tuning, backend).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            error!("[job={}] screening run failed: {:#}", job_id, e);
            if let Err(update_err) = db::mark_job_failed(pool, job_id, GENERIC_JOB_ERROR).await {
                error!(
                    "[job={}] could not persist FAILED status: {:#}",
                    job_id, update_err
                );
            }
            Err(e)
        }
    }
}

async fn run_job_inner(
    pool: &PgPool,
    store: &SanctionStore,
    job_id: i64,
    tuning: &BatchTuning,
    backend: BackendChoice,
) -> Result<JobOutcome> {
    let job = db::get_screening_job(pool, job_id)
        .await?
        .with_context(|| format!("screening job {} not found", job_id))?;
    info!(
        "[job={}] starting screening for batch {} (filter: {})",
        job_id,
        job.batch_id,
        job.sanction_source_filter.as_deref().unwrap_or("all")
    );

    db::mark_job_running(pool, job_id).await?;

    let thresholds = Thresholds {
        name: job.threshold_name_score,
        final_score: job.threshold_score,
    };

    let total_transactions = db::count_batch_transactions(pool, job.batch_id).await?;
    let corpus = store.for_matcher(job.sanction_source_filter.as_deref())?;
    db::update_job_setup_totals(pool, job_id, total_transactions, corpus.len() as i64).await?;
    info!(
        "[job={}] {} transactions, {} unique sanction records",
        job_id,
        total_transactions,
        corpus.len()
    );

    if total_transactions == 0 || corpus.is_empty() {
        db::finalize_job_done(pool, job_id, 0, 0).await?;
        info!("[job={}] nothing to screen; completed immediately", job_id);
        return Ok(JobOutcome::Done {
            processed: 0,
            matches: 0,
        });
    }

    // One index for the whole run.
    let norms: Vec<String> = corpus.iter().map(|r| r.name_norm.clone()).collect();
    let matcher = NameMatcher::build(norms, backend)
        .context("Failed to build candidate index for screening job")?;
    debug!(
        "[job={}] candidate index ready ({} backend)",
        job_id,
        matcher.backend_name()
    );

    let dob_comparator = FlexibleDobComparator;
    let filter_params = FilterParams::default();
    let cadence = tuning.progress_cadence(total_transactions);

    let mut processed: i64 = 0;
    let mut total_matches: i64 = 0;
    let mut last_seen_id: i64 = 0;
    let mut pending: Vec<NewScreeningResult> = Vec::new();

    loop {
        // The only cancellation checkpoint: latency is bounded by one chunk.
        let status = db::fetch_job_status(pool, job_id)
            .await?
            .with_context(|| format!("screening job {} row disappeared mid-run", job_id))?;
        if status == JobStatus::Canceled {
            info!(
                "[job={}] canceled externally after {} transactions; keeping last checkpoint",
                job_id, processed
            );
            db::stamp_job_finished(pool, job_id).await?;
            return Ok(JobOutcome::Canceled { processed });
        }

        let chunk =
            db::fetch_transaction_chunk(pool, job.batch_id, last_seen_id, tuning.chunk_size)
                .await?;
        if chunk.is_empty() {
            break;
        }

        for tx in &chunk {
            processed += 1;

            for role in [TargetRole::Sender, TargetRole::Receiver] {
                let party = tx.party(role);
                let Some(query) = party.to_query(tx.destination_country.as_deref()) else {
                    continue;
                };
                let Some((idx, name_scores)) =
                    matcher.best_match(&query.name_norm, thresholds.name, &filter_params)
                else {
                    continue;
                };
                let record = &corpus[idx];
                let Some(matched) = evaluate_candidate(
                    &query,
                    record,
                    name_scores,
                    &thresholds,
                    &dob_comparator,
                ) else {
                    continue;
                };

                total_matches += 1;
                pending.push(NewScreeningResult {
                    job_id,
                    transaction_id: tx.id,
                    target_role: role,
                    target_name: party.raw_name.unwrap_or_default().to_string(),
                    target_name_normalized: query.name_norm.clone(),
                    target_country: query.citizenship_raw.clone(),
                    matched,
                });
                if pending.len() >= tuning.flush_size {
                    let flushed = db::insert_screening_results(pool, &pending).await?;
                    debug!("[job={}] flushed {} buffered results", job_id, flushed);
                    pending.clear();
                }
            }

            if processed % cadence == 0 || processed == total_transactions {
                db::update_job_progress(
                    pool,
                    job_id,
                    processed.min(total_transactions),
                    progress_percentage(processed, total_transactions),
                    total_matches,
                )
                .await?;
            }
        }

        last_seen_id = chunk.last().map(|t| t.id).unwrap_or(last_seen_id);
    }

    if !pending.is_empty() {
        let flushed = db::insert_screening_results(pool, &pending).await?;
        debug!("[job={}] flushed final {} results", job_id, flushed);
        pending.clear();
    }

    db::finalize_job_done(pool, job_id, processed.min(total_transactions), total_matches).await?;
    info!(
        "[job={}] finished: {} transactions processed, {} matches",
        job_id, processed, total_matches
    );
    Ok(JobOutcome::Done {
        processed,
        matches: total_matches,
    })
}

/// The enqueue contract: spawn the run as an independent background task and
/// hand back an opaque task id, persisted on the job row for pollers.
pub async fn enqueue_screening_job(
    pool: &PgPool,
    store: &Arc<SanctionStore>,
    job_id: i64,
    tuning: BatchTuning,
    backend: BackendChoice,
) -> Result<Uuid> {
    let task_id = Uuid::new_v4();
    db::set_job_task_handle(pool, job_id, &task_id.to_string()).await?;

    let pool = pool.clone();
    let store = store.clone();
    tokio::spawn(async move {
        if let Err(e) = run_screening_job(&pool, &store, job_id, &tuning, backend).await {
            error!(
                "[job={}] background screening task {} failed: {:#}",
                job_id, task_id, e
            );
        }
    });
    info!("Enqueued screening job {} as task {}", job_id, task_id);
    Ok(task_id)
}
