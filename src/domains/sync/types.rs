//! Type definitions for the background sync worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domains::mutation::types::MutationFlushReport;
use crate::domains::upload::types::UploadPassReport;

/// Result of one sync pass (mutations first, then attachments).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPassReport {
    pub mutations: MutationFlushReport,
    pub uploads: UploadPassReport,
    /// The pass did nothing because the device was offline
    pub skipped_offline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncWorkerStatus {
    pub online: bool,
    pub poll_interval_ms: u64,
    pub passes_completed: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub uploads_enabled: bool,
}
