use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Runtime settings for the sync engine and worker pool.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_path: PathBuf,
    pub workers: usize,
    /// Attempts allowed before a job is left permanently failed.
    pub max_attempts: i64,
    /// Completed jobs older than this are garbage-collected after a drain.
    pub job_retention: Duration,
    pub request_timeout: Duration,
    pub idle_backoff_min: Duration,
    pub idle_backoff_max: Duration,
}

impl SyncConfig {
    pub const WORKERS_ENV: &'static str = "SYNC_WORKERS";

    /// Applies `SYNC_WORKERS` on top of the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            if key == Self::WORKERS_ENV {
                config.workers = match value.trim().parse::<usize>() {
                    Ok(n) if n > 0 => n,
                    _ => {
                        return Err(Error::Config(format!(
                            "{} must be a positive integer, got '{value}'",
                            Self::WORKERS_ENV
                        )));
                    }
                };
            }
        }
        Ok(config)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/regsync.db"),
            workers: 4,
            max_attempts: 3,
            job_retention: Duration::from_secs(24 * 60 * 60),
            request_timeout: Duration::from_secs(30),
            idle_backoff_min: Duration::from_secs(1),
            idle_backoff_max: Duration::from_secs(5),
        }
    }
}
