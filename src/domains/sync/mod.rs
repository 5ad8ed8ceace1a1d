pub mod types;
pub mod worker;

pub use types::{SyncPassReport, SyncWorkerStatus};
pub use worker::{SyncWorker, SyncWorkerHandle, SyncWorkerMessage};
