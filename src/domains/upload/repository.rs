//! Repository for queued attachments

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domains::core::store::{load_json, save_json, PersistentStore};
use crate::errors::{DomainError, DomainResult};
use super::types::{FileUploadStatus, QueuedFile};

pub const FILE_QUEUE_KEY: &str = "file-upload-queue";

pub fn blob_key(id: Uuid) -> String {
    format!("{}/blob/{}", FILE_QUEUE_KEY, id)
}

#[async_trait]
pub trait FileQueueRepository: Send + Sync {
    /// All queued files, oldest first
    async fn list(&self) -> DomainResult<Vec<QueuedFile>>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<QueuedFile>>;

    /// Persist the encoded blob, then the metadata entry
    async fn insert(&self, file: QueuedFile, blob: Vec<u8>) -> DomainResult<QueuedFile>;

    /// Encoded blob for a queued file
    async fn load_blob(&self, id: Uuid) -> DomainResult<Option<Vec<u8>>>;

    /// Remove the metadata entry and its blob
    async fn remove(&self, id: Uuid) -> DomainResult<bool>;

    async fn update_status(
        &self,
        id: Uuid,
        status: FileUploadStatus,
        retry_count: u32,
        error: Option<String>,
    ) -> DomainResult<QueuedFile>;

    /// Remove every entry and blob, returning how many entries were removed
    async fn clear(&self) -> DomainResult<usize>;
}

/// Metadata as one JSON array under `file-upload-queue`, content under
/// `file-upload-queue/blob/{id}`.
pub struct KvFileQueueRepository {
    store: Arc<dyn PersistentStore>,
    lock: Mutex<()>,
}

impl KvFileQueueRepository {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> Arc<dyn PersistentStore> {
        self.store.clone()
    }

    async fn load(&self) -> DomainResult<Vec<QueuedFile>> {
        let queue = load_json::<Vec<QueuedFile>>(self.store.as_ref(), FILE_QUEUE_KEY).await?;
        Ok(queue.unwrap_or_default())
    }

    async fn persist(&self, queue: &[QueuedFile]) -> DomainResult<()> {
        if queue.is_empty() {
            self.store.del(FILE_QUEUE_KEY).await?;
        } else {
            save_json(self.store.as_ref(), FILE_QUEUE_KEY, queue).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FileQueueRepository for KvFileQueueRepository {
    async fn list(&self) -> DomainResult<Vec<QueuedFile>> {
        let _guard = self.lock.lock().await;
        let mut queue = self.load().await?;
        queue.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(queue)
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<QueuedFile>> {
        let _guard = self.lock.lock().await;
        let queue = self.load().await?;
        Ok(queue.into_iter().find(|f| f.id == id))
    }

    async fn insert(&self, file: QueuedFile, blob: Vec<u8>) -> DomainResult<QueuedFile> {
        let _guard = self.lock.lock().await;
        let mut queue = self.load().await?;

        // A metadata entry never points at a missing blob
        self.store.set(&blob_key(file.id), &blob).await?;
        queue.push(file.clone());
        if let Err(e) = self.persist(&queue).await {
            if let Err(cleanup) = self.store.del(&blob_key(file.id)).await {
                log::warn!("Failed to remove orphaned blob for {}: {}", file.id, cleanup);
            }
            return Err(e);
        }
        Ok(file)
    }

    async fn load_blob(&self, id: Uuid) -> DomainResult<Option<Vec<u8>>> {
        Ok(self.store.get(&blob_key(id)).await?)
    }

    async fn remove(&self, id: Uuid) -> DomainResult<bool> {
        let _guard = self.lock.lock().await;
        let mut queue = self.load().await?;
        let before = queue.len();
        queue.retain(|f| f.id != id);
        if queue.len() == before {
            return Ok(false);
        }
        self.persist(&queue).await?;
        self.store.del(&blob_key(id)).await?;
        Ok(true)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: FileUploadStatus,
        retry_count: u32,
        error: Option<String>,
    ) -> DomainResult<QueuedFile> {
        let _guard = self.lock.lock().await;
        let mut queue = self.load().await?;

        let entry = queue
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| DomainError::EntityNotFound("QueuedFile".to_string(), id))?;
        entry.status = status;
        entry.retry_count = retry_count;
        entry.error = error;
        let updated = entry.clone();

        self.persist(&queue).await?;
        Ok(updated)
    }

    async fn clear(&self) -> DomainResult<usize> {
        let _guard = self.lock.lock().await;
        let queue = self.load().await?;
        self.persist(&[]).await?;
        for file in &queue {
            self.store.del(&blob_key(file.id)).await?;
        }
        Ok(queue.len())
    }
}
