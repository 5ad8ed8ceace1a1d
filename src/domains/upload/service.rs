use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::{SyncConfig, MIB};
use crate::domains::core::events::{SyncEvent, SyncEventBus};
use crate::domains::core::remote_call::RemoteCallGuard;
use crate::domains::core::store::PersistentStore;
use crate::errors::{DomainError, DomainResult, ServiceError, ServiceResult, ValidationError};
use super::codec::{checksum, codec_for, resolve_mime_type, Base64Codec, FileCodec, RawBytesCodec};
use super::repository::{FileQueueRepository, KvFileQueueRepository};
use super::types::{
    AdmissionDecision, AdmissionRejection, FileDescriptor, FileQueueStats, FileUploadStatus,
    NewFile, QueuedFile, UploadPassReport,
};
use super::uploader::FileUploader;

fn format_mib(bytes: u64) -> String {
    format!("{:.1} MiB", bytes as f64 / MIB as f64)
}

/// Size-capped durable queue of attachments waiting for upload.
pub struct FileUploadQueue {
    repo: Arc<dyn FileQueueRepository>,
    codec: Arc<dyn FileCodec>,
    guard: RemoteCallGuard,
    events: SyncEventBus,
    max_file_bytes: u64,
    max_queue_bytes: u64,
    max_file_retries: u32,
    // Held across the admission check and the insert
    admission_lock: Mutex<()>,
    process_lock: Mutex<()>,
}

impl FileUploadQueue {
    pub fn new(
        repo: Arc<dyn FileQueueRepository>,
        codec: Arc<dyn FileCodec>,
        events: SyncEventBus,
        config: &SyncConfig,
    ) -> Self {
        Self {
            repo,
            codec,
            guard: RemoteCallGuard::new(config.remote_timeout()),
            events,
            max_file_bytes: config.max_file_bytes,
            max_queue_bytes: config.max_queue_bytes,
            max_file_retries: config.max_file_retries,
            admission_lock: Mutex::new(()),
            process_lock: Mutex::new(()),
        }
    }

    /// Queue over a key-value store, storing raw bytes when the store takes binary values.
    pub fn for_store(store: Arc<dyn PersistentStore>, events: SyncEventBus, config: &SyncConfig) -> Self {
        let codec: Arc<dyn FileCodec> = if store.supports_binary() {
            Arc::new(RawBytesCodec)
        } else {
            Arc::new(Base64Codec)
        };
        Self::new(Arc::new(KvFileQueueRepository::new(store)), codec, events, config)
    }

    pub fn with_guard(mut self, guard: RemoteCallGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn max_file_retries(&self) -> u32 {
        self.max_file_retries
    }

    fn admission(&self, size: u64, queued_bytes: u64) -> AdmissionDecision {
        if size == 0 {
            return AdmissionDecision::reject(AdmissionRejection::EmptyFile, "File is empty".to_string());
        }
        if size > self.max_file_bytes {
            return AdmissionDecision::reject(
                AdmissionRejection::FileTooLarge,
                format!(
                    "File is {} but the limit is {}",
                    format_mib(size),
                    format_mib(self.max_file_bytes)
                ),
            );
        }
        if queued_bytes + size > self.max_queue_bytes {
            return AdmissionDecision::reject(
                AdmissionRejection::QueueFull,
                format!(
                    "Upload queue holds {} of {}; {} more does not fit",
                    format_mib(queued_bytes),
                    format_mib(self.max_queue_bytes),
                    format_mib(size)
                ),
            );
        }
        AdmissionDecision::allow()
    }

    async fn queued_bytes(&self) -> DomainResult<u64> {
        let files = self.repo.list().await?;
        Ok(files.iter().map(|f| f.file.size).sum())
    }

    /// Whether a file of `size` bytes would be admitted right now.
    pub async fn can_add_file(&self, size: u64) -> DomainResult<AdmissionDecision> {
        let queued = self.queued_bytes().await?;
        Ok(self.admission(size, queued))
    }

    /// Admit, encode and persist an attachment.
    pub async fn add_file_to_queue(
        &self,
        file: NewFile,
        entity_type: &str,
        entity_id: &str,
        proyecto_id: &str,
    ) -> ServiceResult<QueuedFile> {
        let _admission = self.admission_lock.lock().await;

        let size = file.size();
        let decision = self.admission(size, self.queued_bytes().await?);
        if let Some(reason) = decision.reason {
            log::warn!("Rejected attachment {} ({}): {}", file.name, format_mib(size), reason.as_str());
            let error = match reason {
                AdmissionRejection::EmptyFile => ValidationError::required("file"),
                AdmissionRejection::FileTooLarge => ValidationError::max("file.size", format_mib(self.max_file_bytes)),
                AdmissionRejection::QueueFull => ValidationError::custom(
                    decision.message.as_deref().unwrap_or("Upload queue is full"),
                ),
            };
            return Err(ServiceError::Domain(DomainError::Validation(error)));
        }

        let descriptor = FileDescriptor {
            mime_type: resolve_mime_type(&file.mime_type, &file.bytes),
            checksum: checksum(&file.bytes),
            encoding: self.codec.name().to_string(),
            name: file.name,
            size,
        };
        let blob = self.codec.encode(&file.bytes);

        let queued = QueuedFile {
            id: Uuid::new_v4(),
            file: descriptor,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            proyecto_id: proyecto_id.to_string(),
            timestamp: Utc::now(),
            retry_count: 0,
            status: FileUploadStatus::Pending,
            error: None,
        };

        match self.repo.insert(queued, blob).await {
            Ok(queued) => {
                log::info!(
                    "Queued attachment {} ({}) for {}/{}",
                    queued.file.name, format_mib(size), entity_type, entity_id
                );
                self.events.publish(SyncEvent::FileQueued {
                    id: queued.id,
                    name: queued.file.name.clone(),
                    size,
                });
                Ok(queued)
            }
            Err(e) => {
                log::error!("Failed to persist attachment: {}", e);
                self.events.publish(SyncEvent::StorageFailure {
                    component: "file-upload-queue".to_string(),
                    message: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Run one upload attempt for a queued file.
    ///
    /// Returns the remote URL on success (the item and its blob are removed),
    /// `None` when the attempt failed (the item is marked failed). `Err` when
    /// the item is no longer queued or the queue itself could not be updated.
    pub async fn process_file_upload(
        &self,
        queued_file: &QueuedFile,
        uploader: &dyn FileUploader,
    ) -> ServiceResult<Option<String>> {
        // The caller's copy may be stale; the attempt budget lives in the stored record
        let stored = self
            .repo
            .get(queued_file.id)
            .await?
            .ok_or_else(|| DomainError::EntityNotFound("QueuedFile".to_string(), queued_file.id))?;
        let current = self
            .repo
            .update_status(stored.id, FileUploadStatus::Uploading, stored.retry_count, None)
            .await?;

        match self.attempt_upload(&current, uploader).await {
            Ok(url) => {
                self.repo.remove(current.id).await?;
                log::info!("Uploaded attachment {} -> {}", current.file.name, url);
                self.events.publish(SyncEvent::FileUploaded {
                    id: current.id,
                    url: url.clone(),
                });
                Ok(Some(url))
            }
            Err(e) => {
                let retry_count = current.retry_count + 1;
                let message = e.to_string();
                self.repo
                    .update_status(current.id, FileUploadStatus::Failed, retry_count, Some(message.clone()))
                    .await?;
                let permanent = retry_count >= self.max_file_retries;
                if permanent {
                    log::error!("Attachment {} failed permanently after {} attempts: {}", current.file.name, retry_count, message);
                } else {
                    log::warn!("Attachment {} upload failed (attempt {}): {}", current.file.name, retry_count, message);
                }
                self.events.publish(SyncEvent::FileFailed {
                    id: current.id,
                    retry_count,
                    permanent,
                    error: message,
                });
                Ok(None)
            }
        }
    }

    async fn attempt_upload(&self, file: &QueuedFile, uploader: &dyn FileUploader) -> ServiceResult<String> {
        let blob = self
            .repo
            .load_blob(file.id)
            .await?
            .ok_or_else(|| DomainError::File(format!("Stored content missing for {}", file.id)))?;

        let raw = codec_for(&file.file.encoding)?.decode(&blob)?;
        if checksum(&raw) != file.file.checksum {
            return Err(DomainError::File(format!("Checksum mismatch for {}", file.file.name)).into());
        }

        let label = format!("upload {}", file.id);
        self.guard.run(&label, uploader.upload(file, raw)).await
    }

    /// Upload every eligible item, one at a time, oldest first.
    /// Returns immediately if another pass is running.
    pub async fn process_pending(&self, uploader: &dyn FileUploader) -> ServiceResult<UploadPassReport> {
        let mut report = UploadPassReport::default();
        let _pass = match self.process_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::debug!("Upload pass already in progress");
                return Ok(report);
            }
        };

        let eligible: Vec<QueuedFile> = self
            .repo
            .list()
            .await?
            .into_iter()
            .filter(|f| f.is_retryable(self.max_file_retries))
            .collect();

        for file in eligible {
            report.attempted += 1;
            match self.process_file_upload(&file, uploader).await {
                Ok(Some(_)) => report.uploaded += 1,
                Ok(None) => report.failed += 1,
                Err(e) if e.is_not_found() => {
                    log::debug!("Attachment {} left the queue during the pass, skipping", file.id);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Files still on their way up: pending, in flight, or failed within the retry budget.
    pub async fn get_pending_files(&self) -> DomainResult<Vec<QueuedFile>> {
        let files = self.repo.list().await?;
        Ok(files
            .into_iter()
            .filter(|f| !f.is_permanently_failed(self.max_file_retries))
            .collect())
    }

    /// Files that exhausted automatic retries.
    pub async fn get_failed_files(&self) -> DomainResult<Vec<QueuedFile>> {
        let files = self.repo.list().await?;
        Ok(files
            .into_iter()
            .filter(|f| f.is_permanently_failed(self.max_file_retries))
            .collect())
    }

    pub async fn clear_failed_files(&self) -> DomainResult<usize> {
        let mut removed = 0;
        for file in self.get_failed_files().await? {
            if self.repo.remove(file.id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("Cleared {} permanently failed attachments", removed);
        }
        Ok(removed)
    }

    pub async fn get_file_queue_stats(&self) -> DomainResult<FileQueueStats> {
        let files = self.repo.list().await?;
        let mut stats = FileQueueStats {
            total: files.len(),
            max_queue_bytes: self.max_queue_bytes,
            ..Default::default()
        };
        for file in &files {
            stats.total_bytes += file.file.size;
            match file.status {
                FileUploadStatus::Pending => stats.pending += 1,
                FileUploadStatus::Uploading => stats.uploading += 1,
                FileUploadStatus::Failed if file.retry_count >= self.max_file_retries => {
                    stats.permanently_failed += 1
                }
                FileUploadStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    /// Re-arm a failed item with a fresh retry budget.
    pub async fn retry_file(&self, id: Uuid) -> DomainResult<QueuedFile> {
        self.repo.update_status(id, FileUploadStatus::Pending, 0, None).await
    }

    pub async fn remove_file(&self, id: Uuid) -> DomainResult<bool> {
        self.repo.remove(id).await
    }

    pub async fn clear(&self) -> DomainResult<usize> {
        let removed = self.repo.clear().await?;
        log::info!("Cleared upload queue ({} items)", removed);
        Ok(removed)
    }

    /// Reset items left `uploading` by a crash mid-upload.
    pub async fn recover_interrupted(&self) -> DomainResult<usize> {
        let mut recovered = 0;
        for file in self.repo.list().await? {
            if file.status == FileUploadStatus::Uploading {
                self.repo
                    .update_status(file.id, FileUploadStatus::Pending, file.retry_count, file.error)
                    .await?;
                recovered += 1;
            }
        }
        if recovered > 0 {
            log::info!("Recovered {} interrupted uploads", recovered);
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::core::store::{MemoryPersistentStore, PersistentStore};
    use crate::domains::core::test_support::FlakyStore;
    use crate::domains::upload::repository::blob_key;
    use crate::domains::upload::uploader::mock::MockFileUploader;

    fn binary_queue() -> (Arc<MemoryPersistentStore>, FileUploadQueue) {
        let store = Arc::new(MemoryPersistentStore::new());
        let queue = FileUploadQueue::for_store(store.clone(), SyncEventBus::default(), &SyncConfig::default());
        (store, queue)
    }

    fn text_queue() -> (Arc<MemoryPersistentStore>, FileUploadQueue) {
        let store = Arc::new(MemoryPersistentStore::text_only());
        let queue = FileUploadQueue::for_store(store.clone(), SyncEventBus::default(), &SyncConfig::default());
        (store, queue)
    }

    fn photo(name: &str, size: u64) -> NewFile {
        NewFile::new(name, "image/jpeg", vec![7u8; size as usize])
    }

    async fn add(queue: &FileUploadQueue, file: NewFile) -> ServiceResult<QueuedFile> {
        queue.add_file_to_queue(file, "incidencia", "inc-1", "proyecto-1").await
    }

    #[tokio::test]
    async fn test_rejects_file_over_per_file_cap() {
        let (store, queue) = binary_queue();

        let decision = queue.can_add_file(12 * MIB).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(AdmissionRejection::FileTooLarge));

        let result = add(&queue, photo("big.jpg", 12 * MIB)).await;
        assert!(matches!(
            result,
            Err(ServiceError::Domain(DomainError::Validation(ValidationError::Max { .. })))
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_rejects_file_that_overflows_queue() {
        let (_store, queue) = binary_queue();
        for (i, mib) in [10u64, 10, 10, 10, 8].iter().enumerate() {
            add(&queue, photo(&format!("p{}.jpg", i), mib * MIB)).await.unwrap();
        }
        assert_eq!(queue.get_file_queue_stats().await.unwrap().total_bytes, 48 * MIB);

        let decision = queue.can_add_file(5 * MIB).await.unwrap();
        assert_eq!(decision.reason, Some(AdmissionRejection::QueueFull));
        assert!(add(&queue, photo("extra.jpg", 5 * MIB)).await.is_err());

        // Exactly filling the queue is allowed
        assert!(queue.can_add_file(2 * MIB).await.unwrap().allowed);
        assert_eq!(queue.get_file_queue_stats().await.unwrap().total, 5);
    }

    #[tokio::test]
    async fn test_rejects_empty_file() {
        let (_store, queue) = binary_queue();
        let decision = queue.can_add_file(0).await.unwrap();
        assert_eq!(decision.reason, Some(AdmissionRejection::EmptyFile));
        assert!(add(&queue, NewFile::new("empty.txt", "text/plain", Vec::new())).await.is_err());
    }

    #[tokio::test]
    async fn test_upload_success_removes_item_and_blob() {
        let (store, queue) = text_queue();
        let queued = add(&queue, NewFile::new("note.txt", "", b"site notes".to_vec())).await.unwrap();
        assert_eq!(queued.file.encoding, "base64");
        assert_eq!(queued.file.mime_type, "application/octet-stream");

        let uploader = MockFileUploader::new();
        let url = queue.process_file_upload(&queued, &uploader).await.unwrap();

        assert_eq!(url, Some(format!("https://files.example.test/{}", queued.id)));
        assert_eq!(uploader.received(), vec![("note.txt".to_string(), b"site notes".to_vec())]);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_after_three_attempts() {
        let (_store, queue) = binary_queue();
        let queued = add(&queue, photo("crack.jpg", 1024)).await.unwrap();
        let uploader = MockFileUploader::failing();

        for attempt in 1..=3 {
            let report = queue.process_pending(&uploader).await.unwrap();
            assert_eq!(report.attempted, 1, "attempt {}", attempt);
            assert_eq!(report.failed, 1);
        }

        // No fourth automatic attempt
        assert_eq!(queue.process_pending(&uploader).await.unwrap().attempted, 0);
        assert_eq!(uploader.calls(), 3);

        assert!(queue.get_pending_files().await.unwrap().is_empty());
        let failed = queue.get_failed_files().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 3);
        assert!(failed[0].error.as_deref().unwrap_or("").contains("unreachable"));

        let stats = queue.get_file_queue_stats().await.unwrap();
        assert_eq!(stats.permanently_failed, 1);
        assert_eq!(stats.failed, 0);

        // Manual retry re-arms the item
        uploader.set_failing(false);
        queue.retry_file(queued.id).await.unwrap();
        assert_eq!(queue.process_pending(&uploader).await.unwrap().uploaded, 1);
        assert_eq!(queue.get_file_queue_stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_failed_within_budget_stays_pending() {
        let (_store, queue) = binary_queue();
        let queued = add(&queue, photo("a.jpg", 10)).await.unwrap();
        let uploader = MockFileUploader::failing();

        assert_eq!(queue.process_file_upload(&queued, &uploader).await.unwrap(), None);
        let pending = queue.get_pending_files().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, FileUploadStatus::Failed);
        assert_eq!(queue.get_file_queue_stats().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_stale_handle_still_exhausts_budget() {
        let (_store, queue) = binary_queue();
        let queued = add(&queue, photo("beam.jpg", 10)).await.unwrap();
        let uploader = MockFileUploader::failing();

        // Same handle every time, its retry_count stays at 0
        for _ in 0..3 {
            assert_eq!(queue.process_file_upload(&queued, &uploader).await.unwrap(), None);
        }

        assert!(queue.get_pending_files().await.unwrap().is_empty());
        let failed = queue.get_failed_files().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 3);
    }

    #[tokio::test]
    async fn test_file_removed_mid_pass_is_skipped() {
        struct RemovingUploader {
            repo: Arc<KvFileQueueRepository>,
            doomed: Uuid,
        }

        #[async_trait::async_trait]
        impl FileUploader for RemovingUploader {
            async fn upload(&self, file: &QueuedFile, _content: Vec<u8>) -> ServiceResult<String> {
                if file.id == self.doomed {
                    // The user removes the attachment while it is in flight
                    self.repo.remove(file.id).await?;
                    return Err(ServiceError::Network("connection reset".into()));
                }
                Ok(format!("https://files.example.test/{}", file.id))
            }
        }

        let store = Arc::new(MemoryPersistentStore::new());
        let repo = Arc::new(KvFileQueueRepository::new(store));
        let queue = FileUploadQueue::new(repo.clone(), Arc::new(RawBytesCodec), SyncEventBus::default(), &SyncConfig::default());
        let doomed = add(&queue, photo("doomed.jpg", 10)).await.unwrap();
        add(&queue, photo("kept.jpg", 10)).await.unwrap();

        let uploader = RemovingUploader { repo, doomed: doomed.id };
        let report = queue.process_pending(&uploader).await.unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(queue.get_file_queue_stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_corrupted_blob_fails_checksum() {
        let (store, queue) = binary_queue();
        let queued = add(&queue, photo("a.jpg", 64)).await.unwrap();
        store.set(&blob_key(queued.id), &[0u8; 64]).await.unwrap();

        let uploader = MockFileUploader::new();
        assert_eq!(queue.process_file_upload(&queued, &uploader).await.unwrap(), None);
        assert_eq!(uploader.calls(), 0);

        let pending = queue.get_pending_files().await.unwrap();
        assert!(pending[0].error.as_deref().unwrap_or("").contains("Checksum mismatch"));
    }

    #[tokio::test]
    async fn test_clear_failed_and_remove() {
        let (_store, queue) = binary_queue();
        let keep = add(&queue, photo("keep.jpg", 10)).await.unwrap();
        let doomed = add(&queue, photo("doomed.jpg", 10)).await.unwrap();
        let uploader = MockFileUploader::failing();
        for _ in 0..3 {
            queue.process_file_upload(&queue.repo.get(doomed.id).await.unwrap().unwrap(), &uploader)
                .await
                .unwrap();
        }

        assert_eq!(queue.clear_failed_files().await.unwrap(), 1);
        assert_eq!(queue.get_pending_files().await.unwrap()[0].id, keep.id);
        assert!(queue.remove_file(keep.id).await.unwrap());
        assert!(!queue.remove_file(keep.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_recover_interrupted_upload() {
        let (_store, queue) = binary_queue();
        let queued = add(&queue, photo("a.jpg", 10)).await.unwrap();
        queue.repo.update_status(queued.id, FileUploadStatus::Uploading, 1, None).await.unwrap();

        assert_eq!(queue.recover_interrupted().await.unwrap(), 1);
        let pending = queue.get_pending_files().await.unwrap();
        assert_eq!(pending[0].status, FileUploadStatus::Pending);
        assert_eq!(pending[0].retry_count, 1);
        assert_eq!(queue.clear().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_storage_failure_is_reported() {
        let store = Arc::new(FlakyStore::new());
        let queue = FileUploadQueue::for_store(store.clone(), SyncEventBus::default(), &SyncConfig::default());
        let mut events = queue.events.subscribe();
        store.fail_writes(true);

        assert!(add(&queue, photo("a.jpg", 10)).await.is_err());
        assert!(matches!(events.try_recv(), Ok(SyncEvent::StorageFailure { .. })));
    }
}
