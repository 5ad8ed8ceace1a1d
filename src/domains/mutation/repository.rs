//! Repository for queued mutations

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domains::core::store::{load_json, save_json, PersistentStore};
use crate::errors::{DomainError, DomainResult};
use super::types::{MutationStatus, QueuedMutation};

pub const MUTATION_QUEUE_KEY: &str = "mutation-queue";

#[async_trait]
pub trait MutationQueueRepository: Send + Sync {
    /// Append a mutation to the queue
    async fn enqueue(&self, mutation: QueuedMutation) -> DomainResult<QueuedMutation>;

    /// Every record, in replay order: priority band first, then oldest first.
    /// Records leave the queue only through `remove`.
    async fn dequeue_all(&self) -> DomainResult<Vec<QueuedMutation>>;

    /// Get a single record
    async fn get(&self, id: Uuid) -> DomainResult<Option<QueuedMutation>>;

    /// Remove a record after confirmed delivery or user discard
    async fn remove(&self, id: Uuid) -> DomainResult<bool>;

    /// Update status, retry count and last error of a record
    async fn update_status(
        &self,
        id: Uuid,
        status: MutationStatus,
        retry_count: u32,
        last_error: Option<String>,
    ) -> DomainResult<QueuedMutation>;
}

/// Stores the whole queue as one JSON array under `mutation-queue`.
pub struct KvMutationQueueRepository {
    store: Arc<dyn PersistentStore>,
    // Serializes read-modify-write cycles on the array
    lock: Mutex<()>,
}

impl KvMutationQueueRepository {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> DomainResult<Vec<QueuedMutation>> {
        let queue = load_json::<Vec<QueuedMutation>>(self.store.as_ref(), MUTATION_QUEUE_KEY).await?;
        Ok(queue.unwrap_or_default())
    }

    async fn persist(&self, queue: &[QueuedMutation]) -> DomainResult<()> {
        if queue.is_empty() {
            self.store.del(MUTATION_QUEUE_KEY).await?;
        } else {
            save_json(self.store.as_ref(), MUTATION_QUEUE_KEY, queue).await?;
        }
        Ok(())
    }
}

pub fn sort_for_replay(queue: &mut [QueuedMutation]) {
    queue.sort_by(|a, b| {
        a.priority
            .replay_rank()
            .cmp(&b.priority.replay_rank())
            .then(a.created_at.cmp(&b.created_at))
    });
}

#[async_trait]
impl MutationQueueRepository for KvMutationQueueRepository {
    async fn enqueue(&self, mutation: QueuedMutation) -> DomainResult<QueuedMutation> {
        let _guard = self.lock.lock().await;
        let mut queue = self.load().await?;
        queue.push(mutation.clone());
        self.persist(&queue).await?;
        Ok(mutation)
    }

    async fn dequeue_all(&self) -> DomainResult<Vec<QueuedMutation>> {
        let _guard = self.lock.lock().await;
        let mut queue = self.load().await?;
        // Stable sort keeps insertion order for identical timestamps
        sort_for_replay(&mut queue);
        Ok(queue)
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<QueuedMutation>> {
        let _guard = self.lock.lock().await;
        let queue = self.load().await?;
        Ok(queue.into_iter().find(|m| m.id == id))
    }

    async fn remove(&self, id: Uuid) -> DomainResult<bool> {
        let _guard = self.lock.lock().await;
        let mut queue = self.load().await?;
        let before = queue.len();
        queue.retain(|m| m.id != id);
        if queue.len() == before {
            return Ok(false);
        }
        self.persist(&queue).await?;
        Ok(true)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: MutationStatus,
        retry_count: u32,
        last_error: Option<String>,
    ) -> DomainResult<QueuedMutation> {
        let _guard = self.lock.lock().await;
        let mut queue = self.load().await?;

        let entry = queue
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| DomainError::EntityNotFound("QueuedMutation".to_string(), id))?;
        entry.status = status;
        entry.retry_count = retry_count;
        entry.last_error = last_error;
        let updated = entry.clone();

        self.persist(&queue).await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::core::store::MemoryPersistentStore;
    use crate::domains::mutation::types::MutationPriority;
    use chrono::Duration;
    use serde_json::json;

    fn repo() -> (Arc<MemoryPersistentStore>, KvMutationQueueRepository) {
        let store = Arc::new(MemoryPersistentStore::new());
        let repo = KvMutationQueueRepository::new(store.clone());
        (store, repo)
    }

    #[tokio::test]
    async fn test_replay_order_is_priority_then_fifo() {
        let (_store, repo) = repo();
        let base = chrono::Utc::now();

        let mut first_normal = QueuedMutation::new("checkbox", "set", json!(1), MutationPriority::Normal);
        first_normal.created_at = base;
        let mut second_normal = QueuedMutation::new("checkbox", "set", json!(2), MutationPriority::Normal);
        second_normal.created_at = base + Duration::seconds(1);
        let mut late_critical = QueuedMutation::new("attendance", "mark", json!(3), MutationPriority::Critical);
        late_critical.created_at = base + Duration::seconds(2);

        repo.enqueue(second_normal.clone()).await.unwrap();
        repo.enqueue(late_critical.clone()).await.unwrap();
        repo.enqueue(first_normal.clone()).await.unwrap();

        let ordered: Vec<Uuid> = repo.dequeue_all().await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ordered, vec![late_critical.id, first_normal.id, second_normal.id]);
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let (store, repo) = repo();
        let mutation = repo
            .enqueue(QueuedMutation::new("checkbox", "set", json!({}), MutationPriority::Normal))
            .await
            .unwrap();

        let updated = repo
            .update_status(mutation.id, MutationStatus::Sending, 2, Some("boom".into()))
            .await
            .unwrap();
        assert_eq!(updated.status, MutationStatus::Sending);
        assert_eq!(updated.retry_count, 2);

        let missing = repo.update_status(Uuid::new_v4(), MutationStatus::Queued, 0, None).await;
        assert!(matches!(missing, Err(DomainError::EntityNotFound(_, _))));

        assert!(repo.remove(mutation.id).await.unwrap());
        assert!(!repo.remove(mutation.id).await.unwrap());
        // Empty queue leaves no key behind
        assert!(store.get(MUTATION_QUEUE_KEY).await.unwrap().is_none());
    }
}
