// src/config.rs

use anyhow::Result;
use log::{info, warn};
use std::env;

use crate::matching::index::BackendChoice;

pub const MATCHER_BACKEND_ENV: &str = "SCREENER_MATCHER_BACKEND";
pub const CHUNK_SIZE_ENV: &str = "SCREENER_CHUNK_SIZE";
pub const FLUSH_SIZE_ENV: &str = "SCREENER_RESULT_FLUSH_SIZE";
pub const PROGRESS_EVERY_ENV: &str = "SCREENER_PROGRESS_EVERY";

pub const DEFAULT_CHUNK_SIZE: i64 = 500;
const CHUNK_SIZE_MIN: i64 = 50;
const CHUNK_SIZE_MAX: i64 = 5_000;

pub const DEFAULT_FLUSH_SIZE: usize = 1_000;
const FLUSH_SIZE_MIN: usize = 100;
const FLUSH_SIZE_MAX: usize = 10_000;

const PROGRESS_EVERY_MAX: i64 = 1_000;

// Adaptive progress cadence: small jobs report more often so the UI moves.
const SMALL_JOB_CUTOFF: i64 = 200;
const SMALL_JOB_CADENCE: i64 = 10;
const LARGE_JOB_CADENCE: i64 = 50;

/// Batch-loop tuning. None of these affect correctness, only the
/// memory/IO/progress-freshness trade-off, so every knob is clamped to a
/// sane range.
#[derive(Debug, Clone)]
pub struct BatchTuning {
    /// Transactions fetched per keyset page.
    pub chunk_size: i64,
    /// Buffered results flushed to storage at this size.
    pub flush_size: usize,
    /// Fixed progress-update cadence; `None` selects the adaptive default.
    pub progress_every: Option<i64>,
}

impl Default for BatchTuning {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            flush_size: DEFAULT_FLUSH_SIZE,
            progress_every: None,
        }
    }
}

impl BatchTuning {
    pub fn from_env() -> Self {
        let chunk_size = env_clamped_i64(
            CHUNK_SIZE_ENV,
            DEFAULT_CHUNK_SIZE,
            CHUNK_SIZE_MIN,
            CHUNK_SIZE_MAX,
        );
        let flush_size = env_clamped_i64(
            FLUSH_SIZE_ENV,
            DEFAULT_FLUSH_SIZE as i64,
            FLUSH_SIZE_MIN as i64,
            FLUSH_SIZE_MAX as i64,
        ) as usize;
        let progress_every = match env::var(PROGRESS_EVERY_ENV) {
            Ok(raw) => match raw.trim().parse::<i64>() {
                Ok(n) if n > 0 => Some(n.min(PROGRESS_EVERY_MAX)),
                Ok(_) => None,
                Err(_) => {
                    warn!("Ignoring unparseable {}={:?}", PROGRESS_EVERY_ENV, raw);
                    None
                }
            },
            Err(_) => None,
        };
        Self {
            chunk_size,
            flush_size,
            progress_every,
        }
    }

    /// How often (in processed transactions) progress is persisted for
    /// pollers.
    pub fn progress_cadence(&self, total_transactions: i64) -> i64 {
        if let Some(every) = self.progress_every {
            return every.max(1);
        }
        if total_transactions < SMALL_JOB_CUTOFF {
            SMALL_JOB_CADENCE
        } else {
            LARGE_JOB_CADENCE
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScreeningConfig {
    pub backend: BackendChoice,
    pub tuning: BatchTuning,
}

impl ScreeningConfig {
    pub fn from_env() -> Result<Self> {
        let raw_backend =
            env::var(MATCHER_BACKEND_ENV).unwrap_or_else(|_| "auto".to_string());
        let backend = BackendChoice::parse(&raw_backend)?;
        Ok(Self {
            backend,
            tuning: BatchTuning::from_env(),
        })
    }

    pub fn log_summary(&self) {
        info!(
            "Screening config: backend={}, chunk_size={}, flush_size={}, progress_every={}",
            self.backend.as_str(),
            self.tuning.chunk_size,
            self.tuning.flush_size,
            self.tuning
                .progress_every
                .map(|n| n.to_string())
                .unwrap_or_else(|| "adaptive".to_string()),
        );
    }
}

fn env_clamped_i64(key: &str, default: i64, min: i64, max: i64) -> i64 {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<i64>() {
            Ok(value) => {
                let clamped = value.clamp(min, max);
                if clamped != value {
                    warn!(
                        "{}={} outside [{}, {}]; clamped to {}",
                        key, value, min, max, clamped
                    );
                }
                clamped
            }
            Err(_) => {
                warn!("Ignoring unparseable {}={:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}
