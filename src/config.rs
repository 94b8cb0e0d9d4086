//! Runtime configuration loaded from a JSON file

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DbResult, StoreError};

/// How often the watcher polls the clipboard when no push event arrives.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;

/// Signals closer than this to the previous effective check are dropped.
pub const DEFAULT_THROTTLE_MS: u64 = 1000;

pub const DEFAULT_DEDUP_WINDOW_SECS: u64 = 60;
pub const DEFAULT_DEDUP_MAX_RECORDS: usize = 50;
pub const DEFAULT_FINISHED_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub poll_interval_ms: u64,
    pub throttle_ms: u64,
    pub dedup_window_secs: u64,
    pub dedup_max_records: usize,
    pub finished_retention_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("xhsdn.db"),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            throttle_ms: DEFAULT_THROTTLE_MS,
            dedup_window_secs: DEFAULT_DEDUP_WINDOW_SECS,
            dedup_max_records: DEFAULT_DEDUP_MAX_RECORDS,
            finished_retention_days: DEFAULT_FINISHED_RETENTION_DAYS,
        }
    }
}

impl Config {
    /// Read a config file. Missing keys fall back to their defaults.
    pub fn from_file(path: &Path) -> DbResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> DbResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(StoreError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.dedup_max_records == 0 {
            return Err(StoreError::Config(
                "dedup_max_records must be greater than zero".to_string(),
            ));
        }
        if self.finished_retention_days < 0
            || chrono::Duration::try_days(self.finished_retention_days).is_none()
        {
            return Err(StoreError::Config(format!(
                "finished_retention_days out of range: {}",
                self.finished_retention_days
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn finished_retention(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.finished_retention_days)
            .unwrap_or_else(|| chrono::Duration::days(DEFAULT_FINISHED_RETENTION_DAYS))
    }
}
