// src/main.rs
use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::{path::Path, sync::Arc, time::Duration};

use screener_lib::{
    config::ScreeningConfig,
    db::{self, PgPool},
    matching::index::build_name_index,
    models::JobStatus,
    sanctions::store::SanctionStore,
    screening::job::{
        enqueue_screening_job, run_screening_job, DEFAULT_FINAL_THRESHOLD,
        DEFAULT_NAME_THRESHOLD,
    },
};

const USAGE: &str = "Usage: screener <command> [args]

Commands:
  create-job <batch_id> [name_threshold] [final_threshold] [source_filter]
      Create a PENDING screening job for an upload batch.
  run-job <job_id>
      Run a screening job to completion in the foreground.
  enqueue <job_id>
      Enqueue a screening job as a background task and watch its progress.
  cancel <job_id>
      Request cancellation of a pending or running job.
  progress <job_id>
      Print the job's current progress snapshot.
  sources
      List distinct sanction source codes in the watchlist.";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let env_paths = [".env", ".env.local", "../.env"];
    for path in env_paths.iter() {
        if Path::new(path).exists() {
            if let Err(e) = db::load_env_from_file(path) {
                warn!("Failed to load environment from {}: {}", path, e);
            }
            break;
        }
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{USAGE}");
        return Ok(());
    };

    let config = ScreeningConfig::from_env()?;
    config.log_summary();

    // Surface a misconfigured backend before any job starts.
    build_name_index(&["probe".to_string()], config.backend)
        .context("Matcher backend configuration is unusable")?;

    let pool = db::connect()
        .await
        .context("Failed to connect to database")?;
    let store = Arc::new(SanctionStore::from_env());

    match command {
        "create-job" => {
            let batch_id = parse_arg::<i64>(&args, 1, "batch_id")?;
            let name_threshold = args
                .get(2)
                .map(|v| v.parse::<f64>())
                .transpose()
                .context("name_threshold must be a number")?
                .unwrap_or(DEFAULT_NAME_THRESHOLD);
            let final_threshold = args
                .get(3)
                .map(|v| v.parse::<f64>())
                .transpose()
                .context("final_threshold must be a number")?
                .unwrap_or(DEFAULT_FINAL_THRESHOLD);
            let source_filter = args.get(4).map(String::as_str);

            let job = db::create_screening_job(
                &pool,
                batch_id,
                name_threshold,
                final_threshold,
                source_filter,
            )
            .await?;
            println!("Created screening job {} (status: PENDING)", job.id);
        }
        "run-job" => {
            let job_id = parse_arg::<i64>(&args, 1, "job_id")?;
            let outcome =
                run_screening_job(&pool, &store, job_id, &config.tuning, config.backend).await?;
            info!("Job {} finished: {:?}", job_id, outcome);
        }
        "enqueue" => {
            let job_id = parse_arg::<i64>(&args, 1, "job_id")?;
            let task_id =
                enqueue_screening_job(&pool, &store, job_id, config.tuning.clone(), config.backend)
                    .await?;
            println!("Enqueued job {} as task {}", job_id, task_id);
            watch_job(&pool, job_id).await?;
        }
        "cancel" => {
            let job_id = parse_arg::<i64>(&args, 1, "job_id")?;
            let status = db::cancel_screening_job(&pool, job_id).await?;
            println!("Job {} is now {}", job_id, status.as_str());
        }
        "progress" => {
            let job_id = parse_arg::<i64>(&args, 1, "job_id")?;
            match db::job_progress(&pool, job_id).await? {
                Some(progress) => println!("{}", serde_json::to_string_pretty(&progress)?),
                None => bail!("Screening job {} not found", job_id),
            }
        }
        "sources" => {
            for source in store.list_sources()? {
                println!("{source}");
            }
        }
        other => {
            println!("Unknown command '{other}'\n\n{USAGE}");
        }
    }

    Ok(())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], index: usize, name: &str) -> Result<T> {
    let raw = args
        .get(index)
        .with_context(|| format!("Missing argument <{name}>\n\n{USAGE}"))?;
    raw.parse::<T>()
        .map_err(|_| anyhow::anyhow!("Argument <{name}> is not valid: {raw:?}"))
}

/// Polls the persisted job row until the job reaches a terminal state,
/// rendering live progress for the operator.
async fn watch_job(pool: &PgPool, job_id: i64) -> Result<()> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}% {msg}")
            .unwrap()
            .progress_chars("##-"),
    );

    loop {
        let Some(progress) = db::job_progress(pool, job_id).await? else {
            bail!("Screening job {} not found", job_id);
        };
        bar.set_position(progress.percent.round() as u64);
        bar.set_message(format!(
            "{} ({}/{} tx, {} matches)",
            progress.status.as_str(),
            progress.processed,
            progress.total,
            progress.matches
        ));
        if progress.status.is_terminal() {
            bar.finish_with_message(format!(
                "{} - {} matches",
                progress.status.as_str(),
                progress.matches
            ));
            if progress.status == JobStatus::Failed {
                bail!("Screening job {} failed", job_id);
            }
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
