// src/db.rs

use anyhow::{anyhow, bail, Context, Result};
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use log::{debug, info, warn};
use postgres_types::ToSql;
use std::time::Duration;
use tokio_postgres::{Config, NoTls, Row as PgRow};

use crate::models::{
    JobProgress, JobStatus, NewScreeningResult, ScreeningJob, Transaction,
};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

/// Reads environment variables and constructs a PostgreSQL config.
fn build_pg_config() -> Config {
    let mut config = Config::new();
    let host = std::env::var("POSTGRES_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("POSTGRES_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(5432);
    let dbname = std::env::var("POSTGRES_DB").unwrap_or_else(|_| "compliance".to_string());
    let user = std::env::var("POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string());
    let password = std::env::var("POSTGRES_PASSWORD").unwrap_or_default();

    info!(
        "DB Config: Host={}, Port={}, DB={}, User={}",
        host, port, dbname, user
    );
    config
        .host(&host)
        .port(port)
        .dbname(&dbname)
        .user(&user)
        .password(&password);
    config.application_name("sanction_screening_worker");
    config.connect_timeout(Duration::from_secs(10));
    config
}

/// Initializes the database connection pool.
pub async fn connect() -> Result<PgPool> {
    let config = build_pg_config();
    info!("Connecting to PostgreSQL database...");
    let manager = PostgresConnectionManager::new(config, NoTls);

    let pool = Pool::builder()
        .max_size(20)
        .min_idle(Some(1))
        .idle_timeout(Some(Duration::from_secs(180)))
        .connection_timeout(Duration::from_secs(15))
        .build(manager)
        .await
        .context("Failed to build database connection pool")?;

    let conn = pool
        .get()
        .await
        .context("Failed to get test connection from pool")?;
    conn.query_one("SELECT 1", &[])
        .await
        .context("Test query 'SELECT 1' failed")?;
    info!("Database connection pool initialized successfully.");
    Ok(pool.clone())
}

/// Loads environment variables from a .env file; missing file is not an
/// error, already-set variables win.
pub fn load_env_from_file(file_path: &str) -> Result<()> {
    use std::fs::File;
    use std::io::{BufRead, BufReader};

    match File::open(file_path) {
        Ok(file) => {
            for line in BufReader::new(file).lines() {
                let line = line.context("Failed to read line from env file")?;
                let line = line.trim();
                if line.starts_with('#') || line.is_empty() {
                    continue;
                }
                if let Some(idx) = line.find('=') {
                    let key = line[..idx].trim();
                    let value = line[idx + 1..].trim().trim_matches('"');
                    if std::env::var(key).is_err() {
                        std::env::set_var(key, value);
                        debug!(
                            "Set env var from file: {}={}",
                            key,
                            if key.contains("PASSWORD") {
                                "[hidden]"
                            } else {
                                value
                            }
                        );
                    }
                }
            }
            info!("Loaded environment variables from {}", file_path);
        }
        Err(e) => {
            warn!(
                "Could not open env file '{}': {}. Proceeding with system environment.",
                file_path, e
            );
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Screening jobs
// ---------------------------------------------------------------------------

const JOB_COLUMNS: &str = "id, batch_id, status, threshold_name_score, threshold_score, \
     sanction_source_filter, total_transactions, processed_transactions, total_sanctions, \
     total_matches, progress_percentage, error_message, task_id, created_at, started_at, \
     finished_at";

fn job_from_row(row: &PgRow) -> Result<ScreeningJob> {
    let raw_status: String = row.try_get("status")?;
    let status = JobStatus::parse(&raw_status)
        .ok_or_else(|| anyhow!("Unknown screening job status '{}'", raw_status))?;
    Ok(ScreeningJob {
        id: row.try_get("id")?,
        batch_id: row.try_get("batch_id")?,
        status,
        threshold_name_score: row.try_get("threshold_name_score")?,
        threshold_score: row.try_get("threshold_score")?,
        sanction_source_filter: row.try_get("sanction_source_filter")?,
        total_transactions: row.try_get("total_transactions")?,
        processed_transactions: row.try_get("processed_transactions")?,
        total_sanctions: row.try_get("total_sanctions")?,
        total_matches: row.try_get("total_matches")?,
        progress_percentage: row.try_get("progress_percentage")?,
        error_message: row.try_get("error_message")?,
        task_id: row.try_get("task_id")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

pub async fn create_screening_job(
    pool: &PgPool,
    batch_id: i64,
    threshold_name_score: f64,
    threshold_score: f64,
    sanction_source_filter: Option<&str>,
) -> Result<ScreeningJob> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for create_screening_job")?;
    let sql = format!(
        "INSERT INTO screening_job \
            (batch_id, status, threshold_name_score, threshold_score, sanction_source_filter) \
         VALUES ($1, 'PENDING', $2, $3, $4) \
         RETURNING {JOB_COLUMNS}"
    );
    let row = conn
        .query_one(
            sql.as_str(),
            &[
                &batch_id,
                &threshold_name_score,
                &threshold_score,
                &sanction_source_filter,
            ],
        )
        .await
        .context("Failed to insert screening_job row")?;
    let job = job_from_row(&row)?;
    info!("Created screening job {} for batch {}", job.id, batch_id);
    Ok(job)
}

pub async fn get_screening_job(pool: &PgPool, job_id: i64) -> Result<Option<ScreeningJob>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for get_screening_job")?;
    let sql = format!("SELECT {JOB_COLUMNS} FROM screening_job WHERE id = $1");
    let row = conn
        .query_opt(sql.as_str(), &[&job_id])
        .await
        .context("Failed to query screening_job row")?;
    row.map(|r| job_from_row(&r)).transpose()
}

/// Just the status column; the orchestrator polls this at chunk boundaries.
pub async fn fetch_job_status(pool: &PgPool, job_id: i64) -> Result<Option<JobStatus>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for fetch_job_status")?;
    let row = conn
        .query_opt("SELECT status FROM screening_job WHERE id = $1", &[&job_id])
        .await
        .context("Failed to query screening_job status")?;
    match row {
        Some(row) => {
            let raw: String = row.try_get("status")?;
            Ok(Some(JobStatus::parse(&raw).ok_or_else(|| {
                anyhow!("Unknown screening job status '{}'", raw)
            })?))
        }
        None => Ok(None),
    }
}

/// RUNNING entry: reset progress counters and clear any prior error so a
/// re-run starts clean.
pub async fn mark_job_running(pool: &PgPool, job_id: i64) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for mark_job_running")?;
    conn.execute(
        "UPDATE screening_job \
         SET status = 'RUNNING', started_at = now(), finished_at = NULL, error_message = NULL, \
             processed_transactions = 0, progress_percentage = 0, total_matches = 0 \
         WHERE id = $1",
        &[&job_id],
    )
    .await
    .context("Failed to mark screening_job RUNNING")?;
    Ok(())
}

/// Persisted immediately after setup so external pollers see non-zero totals
/// before matching starts.
pub async fn update_job_setup_totals(
    pool: &PgPool,
    job_id: i64,
    total_transactions: i64,
    total_sanctions: i64,
) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for update_job_setup_totals")?;
    conn.execute(
        "UPDATE screening_job SET total_transactions = $2, total_sanctions = $3 WHERE id = $1",
        &[&job_id, &total_transactions, &total_sanctions],
    )
    .await
    .context("Failed to update screening_job totals")?;
    Ok(())
}

pub async fn update_job_progress(
    pool: &PgPool,
    job_id: i64,
    processed_transactions: i64,
    progress_percentage: f64,
    total_matches: i64,
) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for update_job_progress")?;
    conn.execute(
        "UPDATE screening_job \
         SET processed_transactions = $2, progress_percentage = $3, total_matches = $4 \
         WHERE id = $1",
        &[
            &job_id,
            &processed_transactions,
            &progress_percentage,
            &total_matches,
        ],
    )
    .await
    .context("Failed to update screening_job progress")?;
    Ok(())
}

pub async fn finalize_job_done(
    pool: &PgPool,
    job_id: i64,
    processed_transactions: i64,
    total_matches: i64,
) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for finalize_job_done")?;
    conn.execute(
        "UPDATE screening_job \
         SET status = 'DONE', processed_transactions = $2, total_matches = $3, \
             progress_percentage = 100, finished_at = now() \
         WHERE id = $1",
        &[&job_id, &processed_transactions, &total_matches],
    )
    .await
    .context("Failed to finalize screening_job as DONE")?;
    Ok(())
}

/// FAILED transition with a generic message. An externally CANCELED job keeps
/// its status; only the finish timestamp is stamped.
pub async fn mark_job_failed(pool: &PgPool, job_id: i64, message: &str) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for mark_job_failed")?;
    conn.execute(
        "UPDATE screening_job \
         SET status = CASE WHEN status = 'CANCELED' THEN status ELSE 'FAILED' END, \
             error_message = $2, finished_at = COALESCE(finished_at, now()) \
         WHERE id = $1",
        &[&job_id, &message],
    )
    .await
    .context("Failed to mark screening_job FAILED")?;
    Ok(())
}

/// Stamps the finish time without touching status (canceled exit path).
pub async fn stamp_job_finished(pool: &PgPool, job_id: i64) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for stamp_job_finished")?;
    conn.execute(
        "UPDATE screening_job SET finished_at = COALESCE(finished_at, now()) WHERE id = $1",
        &[&job_id],
    )
    .await
    .context("Failed to stamp screening_job finish time")?;
    Ok(())
}

/// External cancel request: only PENDING/RUNNING jobs can be canceled; a
/// terminal job reports a conflict.
pub async fn cancel_screening_job(pool: &PgPool, job_id: i64) -> Result<JobStatus> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for cancel_screening_job")?;
    let row = conn
        .query_opt(
            "UPDATE screening_job \
             SET status = 'CANCELED', finished_at = now() \
             WHERE id = $1 AND status IN ('PENDING', 'RUNNING') \
             RETURNING status",
            &[&job_id],
        )
        .await
        .context("Failed to cancel screening_job")?;
    if row.is_some() {
        info!("Screening job {} canceled", job_id);
        return Ok(JobStatus::Canceled);
    }
    match fetch_job_status(pool, job_id).await? {
        Some(status) => bail!(
            "Screening job {} is already terminal ({})",
            job_id,
            status.as_str()
        ),
        None => bail!("Screening job {} not found", job_id),
    }
}

/// Persists the opaque background-task handle on the job row.
pub async fn set_job_task_handle(pool: &PgPool, job_id: i64, task_id: &str) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for set_job_task_handle")?;
    conn.execute(
        "UPDATE screening_job SET task_id = $2 WHERE id = $1",
        &[&job_id, &task_id],
    )
    .await
    .context("Failed to persist screening_job task handle")?;
    Ok(())
}

pub async fn job_progress(pool: &PgPool, job_id: i64) -> Result<Option<JobProgress>> {
    let job = get_screening_job(pool, job_id).await?;
    Ok(job.map(|j| JobProgress {
        job_id: j.id,
        status: j.status,
        processed: j.processed_transactions,
        total: j.total_transactions,
        matches: j.total_matches,
        percent: j.progress_percentage,
    }))
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

pub async fn count_batch_transactions(pool: &PgPool, batch_id: i64) -> Result<i64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for count_batch_transactions")?;
    let row = conn
        .query_one(
            "SELECT COUNT(*) AS n FROM transactions WHERE batch_id = $1",
            &[&batch_id],
        )
        .await
        .context("Failed to count batch transactions")?;
    Ok(row.try_get("n")?)
}

const TRANSACTION_COLUMNS: &str = "id, batch_id, sender_name, sender_name_normalized, \
     sender_dob, sender_country, receiver_name, receiver_name_normalized, receiver_dob, \
     receiver_country, destination_country";

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    Ok(Transaction {
        id: row.try_get("id")?,
        batch_id: row.try_get("batch_id")?,
        sender_name: row.try_get("sender_name")?,
        sender_name_normalized: row.try_get("sender_name_normalized")?,
        sender_dob: row.try_get("sender_dob")?,
        sender_country: row.try_get("sender_country")?,
        receiver_name: row.try_get("receiver_name")?,
        receiver_name_normalized: row.try_get("receiver_name_normalized")?,
        receiver_dob: row.try_get("receiver_dob")?,
        receiver_country: row.try_get("receiver_country")?,
        destination_country: row.try_get("destination_country")?,
    })
}

/// Keyset page: rows with id greater than the cursor, in id order. Keeps
/// chunk fetches fast on large ledgers where OFFSET pagination degrades.
pub async fn fetch_transaction_chunk(
    pool: &PgPool,
    batch_id: i64,
    last_seen_id: i64,
    limit: i64,
) -> Result<Vec<Transaction>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for fetch_transaction_chunk")?;
    let sql = format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions \
         WHERE batch_id = $1 AND id > $2 ORDER BY id ASC LIMIT $3"
    );
    let rows = conn
        .query(sql.as_str(), &[&batch_id, &last_seen_id, &limit])
        .await
        .context("Failed to fetch transaction chunk")?;
    rows.iter().map(transaction_from_row).collect()
}

// ---------------------------------------------------------------------------
// Screening results
// ---------------------------------------------------------------------------

const RESULT_COLUMN_COUNT: usize = 19;
// Stay well under the postgres parameter limit per statement.
const RESULT_INSERT_ROWS_PER_STATEMENT: usize = 500;

/// Inserts buffered results in one transaction; either the whole flush lands
/// or none of it does.
pub async fn insert_screening_results(
    pool: &PgPool,
    results: &[NewScreeningResult],
) -> Result<u64> {
    if results.is_empty() {
        return Ok(0);
    }
    let mut conn = pool
        .get()
        .await
        .context("Failed to get DB connection for insert_screening_results")?;
    let db_tx = conn
        .transaction()
        .await
        .context("Failed to open transaction for screening results")?;

    let mut inserted = 0u64;
    for chunk in results.chunks(RESULT_INSERT_ROWS_PER_STATEMENT) {
        let roles: Vec<&'static str> = chunk.iter().map(|r| r.target_role.as_str()).collect();
        let schemes: Vec<&'static str> = chunk.iter().map(|r| r.matched.scheme.label()).collect();
        let geo: Vec<serde_json::Value> = chunk
            .iter()
            .map(|r| serde_json::Value::from(r.matched.geographic_insights.clone()))
            .collect();

        let mut placeholders = Vec::with_capacity(chunk.len());
        let mut params: Vec<&(dyn ToSql + Sync)> =
            Vec::with_capacity(chunk.len() * RESULT_COLUMN_COUNT);
        for (i, result) in chunk.iter().enumerate() {
            let base = i * RESULT_COLUMN_COUNT;
            let marks: Vec<String> = (1..=RESULT_COLUMN_COUNT)
                .map(|n| format!("${}", base + n))
                .collect();
            placeholders.push(format!("({})", marks.join(", ")));

            params.push(&result.job_id);
            params.push(&result.transaction_id);
            params.push(&result.matched.sanction_external_id);
            params.push(&result.matched.sanction_source);
            params.push(&roles[i]);
            params.push(&result.target_name);
            params.push(&result.target_name_normalized);
            params.push(&result.target_country);
            params.push(&result.matched.sanction_name);
            params.push(&result.matched.sanction_name_norm);
            params.push(&result.matched.sanction_dob_raw);
            params.push(&result.matched.sanction_citizenship);
            params.push(&result.matched.name_scores.combined);
            params.push(&result.matched.dob_score);
            params.push(&result.matched.citizenship_score);
            params.push(&result.matched.final_score);
            params.push(&result.matched.dob_match_type);
            params.push(&schemes[i]);
            params.push(&geo[i]);
        }

        let sql = format!(
            "INSERT INTO screening_result \
                (job_id, transaction_id, sanction_external_id, sanction_source_code, \
                 target_role, target_name, target_name_normalized, target_country, \
                 sanction_name, sanction_name_normalized, sanction_dob_raw, \
                 sanction_citizenship, name_score, dob_score, citizenship_score, \
                 final_score, dob_match_type, weighting_scheme, geographic_insights) \
             VALUES {}",
            placeholders.join(", ")
        );
        inserted += db_tx
            .execute(sql.as_str(), &params)
            .await
            .context("Failed to insert screening results")?;
    }

    db_tx
        .commit()
        .await
        .context("Failed to commit screening results")?;
    debug!("Inserted {} screening result row(s)", inserted);
    Ok(inserted)
}
