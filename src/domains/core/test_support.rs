//! Store doubles for exercising storage failure paths.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

use super::store::{MemoryPersistentStore, PersistentStore};
use crate::errors::{DbError, DbResult};

/// Memory store whose reads and writes can be made to fail on demand.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryPersistentStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PersistentStore for FlakyStore {
    async fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DbError::Other(format!("injected read failure for {}", key)));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> DbResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DbError::Other(format!("injected write failure for {}", key)));
        }
        self.inner.set(key, value).await
    }

    async fn del(&self, key: &str) -> DbResult<bool> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DbError::Other(format!("injected delete failure for {}", key)));
        }
        self.inner.del(key).await
    }
}
