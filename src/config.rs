//! Runtime configuration for the offline sync core.

use std::env;
use std::time::Duration;
use serde::{Deserialize, Serialize};

pub const MIB: u64 = 1024 * 1024;

/// Limits and intervals shared by the queues, the draft store and the sync worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Largest single attachment admitted to the upload queue
    pub max_file_bytes: u64,
    /// Largest aggregate size of all queued attachments
    pub max_queue_bytes: u64,
    /// Failed uploads at or above this count are no longer retried automatically
    pub max_file_retries: u32,
    /// Replay failures at or above this count dead-letter a queued mutation
    pub max_mutation_retries: u32,
    /// Deadline for a single remote call (mutation or upload)
    pub remote_timeout_ms: u64,
    /// Draft autosave period
    pub draft_save_interval_ms: u64,
    /// Background flush period while online
    pub sync_poll_interval_ms: u64,
    /// Base URL for the default attachment uploader
    pub upload_base_url: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * MIB,
            max_queue_bytes: 50 * MIB,
            max_file_retries: 3,
            max_mutation_retries: 5,
            remote_timeout_ms: 30_000,
            draft_save_interval_ms: 5_000,
            sync_poll_interval_ms: 15_000,
            upload_base_url: None,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|val| val.parse::<T>().ok())
        .unwrap_or(default)
}

impl SyncConfig {
    /// Defaults overridden by `SITE_SYNC_*` environment variables (and a `.env` file, if present).
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();
        let defaults = Self::default();

        let config = Self {
            max_file_bytes: env_or("SITE_SYNC_MAX_FILE_BYTES", defaults.max_file_bytes),
            max_queue_bytes: env_or("SITE_SYNC_MAX_QUEUE_BYTES", defaults.max_queue_bytes),
            max_file_retries: env_or("SITE_SYNC_MAX_FILE_RETRIES", defaults.max_file_retries),
            max_mutation_retries: env_or("SITE_SYNC_MAX_MUTATION_RETRIES", defaults.max_mutation_retries),
            remote_timeout_ms: env_or("SITE_SYNC_REMOTE_TIMEOUT_MS", defaults.remote_timeout_ms),
            draft_save_interval_ms: env_or("SITE_SYNC_DRAFT_INTERVAL_MS", defaults.draft_save_interval_ms),
            sync_poll_interval_ms: env_or("SITE_SYNC_POLL_INTERVAL_MS", defaults.sync_poll_interval_ms),
            upload_base_url: env::var("SITE_SYNC_UPLOAD_URL").ok().filter(|url| !url.is_empty()),
        };

        log::debug!("Loaded sync config: {:?}", config);
        config
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn draft_save_interval(&self) -> Duration {
        Duration::from_millis(self.draft_save_interval_ms)
    }

    pub fn sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync_poll_interval_ms)
    }
}
