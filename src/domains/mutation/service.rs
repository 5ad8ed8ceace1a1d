use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::domains::core::cache::QueryCache;
use crate::domains::core::connectivity::ConnectivitySignal;
use crate::domains::core::events::{SyncEvent, SyncEventBus};
use crate::domains::core::remote_call::RemoteCallGuard;
use crate::errors::{DomainError, DomainResult, ServiceError, ServiceResult, SyncError};
use super::registry::{DefinitionReplay, MutationDefinition, MutationRegistry};
use super::repository::MutationQueueRepository;
use super::transaction::OptimisticTransaction;
use super::types::{
    MutationFlushReport, MutationOutcome, MutationPriority, MutationQueueStats, MutationStatus,
    QueuedMutation,
};

/// Owns the durable mutation queue and replays it.
pub struct MutationQueueService {
    repo: Arc<dyn MutationQueueRepository>,
    registry: Arc<MutationRegistry>,
    cache: Arc<dyn QueryCache>,
    connectivity: ConnectivitySignal,
    guard: RemoteCallGuard,
    events: SyncEventBus,
    max_retries: u32,
    flush_lock: Mutex<()>,
}

impl MutationQueueService {
    pub fn new(
        repo: Arc<dyn MutationQueueRepository>,
        cache: Arc<dyn QueryCache>,
        connectivity: ConnectivitySignal,
        events: SyncEventBus,
        config: &SyncConfig,
    ) -> Self {
        Self {
            repo,
            registry: Arc::new(MutationRegistry::new()),
            cache,
            connectivity,
            guard: RemoteCallGuard::new(config.remote_timeout()),
            events,
            max_retries: config.max_mutation_retries,
            flush_lock: Mutex::new(()),
        }
    }

    pub fn with_guard(mut self, guard: RemoteCallGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn registry(&self) -> Arc<MutationRegistry> {
        self.registry.clone()
    }

    pub fn cache(&self) -> Arc<dyn QueryCache> {
        self.cache.clone()
    }

    /// Register a definition for replay and get a handle that executes it.
    pub fn register<D: MutationDefinition>(self: &Arc<Self>, definition: D) -> OptimisticMutation<D> {
        let definition = Arc::new(definition);
        self.registry.register(Arc::new(DefinitionReplay::new(definition.clone())));
        OptimisticMutation {
            definition,
            queue: self.clone(),
        }
    }

    /// Persist a payload for later replay. A storage failure here would lose
    /// the write, so it is published and returned to the caller.
    pub async fn enqueue(
        &self,
        entity: &str,
        mutation_type: &str,
        payload: Value,
        priority: MutationPriority,
    ) -> ServiceResult<QueuedMutation> {
        let mutation = QueuedMutation::new(entity, mutation_type, payload, priority);
        match self.repo.enqueue(mutation).await {
            Ok(queued) => {
                log::info!("Queued {}/{} mutation {} ({})", entity, mutation_type, queued.id, priority.as_str());
                self.events.publish(SyncEvent::MutationQueued {
                    id: queued.id,
                    entity: queued.entity.clone(),
                    mutation_type: queued.mutation_type.clone(),
                });
                Ok(queued)
            }
            Err(e) => {
                log::error!("Failed to persist {}/{} mutation: {}", entity, mutation_type, e);
                self.events.publish(SyncEvent::StorageFailure {
                    component: "mutation-queue".to_string(),
                    message: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Replay queued mutations one at a time, critical first then oldest first.
    /// Returns immediately if offline or if another flush is running.
    pub async fn flush(&self) -> ServiceResult<MutationFlushReport> {
        let mut report = MutationFlushReport::default();

        let _flush_guard = match self.flush_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::debug!("Mutation flush already in progress");
                return Ok(report);
            }
        };

        if !self.connectivity.is_online() {
            log::debug!("Skipping mutation flush while offline");
            return Ok(report);
        }

        let records = self.repo.dequeue_all().await?;
        let replayable: Vec<QueuedMutation> = records.into_iter().filter(|m| m.is_replayable()).collect();
        if replayable.is_empty() {
            return Ok(report);
        }

        log::info!("Flushing {} queued mutations", replayable.len());

        for record in replayable {
            if !self.connectivity.is_online() {
                log::info!("Connectivity lost mid-flush, stopping");
                break;
            }

            let handler = match self.registry.handler_for(&record.entity, &record.mutation_type) {
                Some(handler) => handler,
                None => {
                    let missing = SyncError::MissingHandler {
                        entity: record.entity.clone(),
                        mutation_type: record.mutation_type.clone(),
                    }
                    .to_string();
                    log::warn!("{}, leaving mutation {} queued", missing, record.id);
                    report.skipped += 1;
                    if record.last_error.as_deref() != Some(missing.as_str()) {
                        self.update_if_present(record.id, MutationStatus::Queued, record.retry_count, Some(missing))
                            .await?;
                    }
                    continue;
                }
            };

            let sending = self
                .update_if_present(record.id, MutationStatus::Sending, record.retry_count, record.last_error.clone())
                .await?;
            if sending.is_none() {
                continue;
            }
            report.attempted += 1;

            let label = format!("{}/{} {}", record.entity, record.mutation_type, record.id);
            match self.guard.run(&label, handler.replay(&record.payload)).await {
                Ok(()) => {
                    self.repo.remove(record.id).await?;
                    report.replayed += 1;
                    log::info!("Replayed mutation {}", label);
                    self.events.publish(SyncEvent::MutationReplayed {
                        id: record.id,
                        entity: record.entity.clone(),
                        mutation_type: record.mutation_type.clone(),
                    });
                }
                Err(e) => {
                    let retry_count = record.retry_count + 1;
                    let error = e.to_string();
                    if retry_count >= self.max_retries {
                        let exhausted = SyncError::RetriesExhausted {
                            attempts: retry_count,
                            last_error: error.clone(),
                        }
                        .to_string();
                        let updated = self
                            .update_if_present(record.id, MutationStatus::Failed, retry_count, Some(exhausted))
                            .await?;
                        if updated.is_none() {
                            continue;
                        }
                        report.dead_lettered += 1;
                        log::error!("Mutation {} dead-lettered after {} attempts: {}", label, retry_count, error);
                        self.events.publish(SyncEvent::MutationDeadLettered {
                            id: record.id,
                            entity: record.entity.clone(),
                            retry_count,
                            error,
                        });
                    } else {
                        let updated = self
                            .update_if_present(record.id, MutationStatus::Queued, retry_count, Some(error.clone()))
                            .await?;
                        if updated.is_none() {
                            continue;
                        }
                        report.failed += 1;
                        log::warn!("Replay of {} failed (attempt {}): {}", label, retry_count, error);
                    }
                }
            }
        }

        Ok(report)
    }

    /// `None` when the record was discarded while the flush was running.
    async fn update_if_present(
        &self,
        id: Uuid,
        status: MutationStatus,
        retry_count: u32,
        last_error: Option<String>,
    ) -> ServiceResult<Option<QueuedMutation>> {
        match self.repo.update_status(id, status, retry_count, last_error).await {
            Ok(updated) => Ok(Some(updated)),
            Err(DomainError::EntityNotFound(_, _)) => {
                log::debug!("Mutation {} left the queue during flush, skipping", id);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reset records left in `sending` by a crash mid-replay.
    pub async fn recover_interrupted(&self) -> DomainResult<usize> {
        let mut recovered = 0;
        for record in self.repo.dequeue_all().await? {
            if record.status == MutationStatus::Sending {
                self.repo
                    .update_status(record.id, MutationStatus::Queued, record.retry_count, record.last_error)
                    .await?;
                recovered += 1;
            }
        }
        if recovered > 0 {
            log::info!("Recovered {} interrupted mutations", recovered);
        }
        Ok(recovered)
    }

    /// Records still eligible for automatic replay, in replay order.
    pub async fn pending(&self) -> DomainResult<Vec<QueuedMutation>> {
        let records = self.repo.dequeue_all().await?;
        Ok(records.into_iter().filter(|m| m.is_replayable()).collect())
    }

    pub async fn dead_letters(&self) -> DomainResult<Vec<QueuedMutation>> {
        let records = self.repo.dequeue_all().await?;
        Ok(records.into_iter().filter(|m| m.is_dead_lettered()).collect())
    }

    /// User-initiated retry of a dead letter: back in the queue with a fresh budget.
    pub async fn retry(&self, id: Uuid) -> DomainResult<QueuedMutation> {
        let record = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| DomainError::EntityNotFound("QueuedMutation".to_string(), id))?;
        self.repo
            .update_status(record.id, MutationStatus::Queued, 0, record.last_error)
            .await
    }

    /// User-initiated discard. The optimistic cache state is left to the next refetch.
    pub async fn discard(&self, id: Uuid) -> DomainResult<bool> {
        let removed = self.repo.remove(id).await?;
        if removed {
            log::info!("Discarded queued mutation {}", id);
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> DomainResult<MutationQueueStats> {
        let records = self.repo.dequeue_all().await?;
        let mut stats = MutationQueueStats {
            total: records.len(),
            ..Default::default()
        };
        for record in &records {
            match record.status {
                MutationStatus::Queued => stats.queued += 1,
                MutationStatus::Sending => stats.sending += 1,
                MutationStatus::Failed => stats.dead_lettered += 1,
            }
            if record.priority == MutationPriority::Critical {
                stats.critical += 1;
            }
        }
        Ok(stats)
    }
}

/// A configured mutation the UI executes.
pub struct OptimisticMutation<D: MutationDefinition> {
    definition: Arc<D>,
    queue: Arc<MutationQueueService>,
}

impl<D: MutationDefinition> Clone for OptimisticMutation<D> {
    fn clone(&self) -> Self {
        Self {
            definition: self.definition.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl<D: MutationDefinition> OptimisticMutation<D> {
    pub fn definition(&self) -> &D {
        &self.definition
    }

    /// Apply optimistically, then deliver or queue.
    ///
    /// Offline: the optimistic state is kept and the write is queued without a
    /// remote attempt. Online failure: the cache is rolled back and the write is
    /// queued. `Err` only when the write could be neither delivered nor queued.
    pub async fn execute(&self, variables: D::Variables) -> ServiceResult<MutationOutcome<D::Output>> {
        let def = self.definition.as_ref();
        let mut tx = OptimisticTransaction::begin(self.queue.cache.clone());
        def.apply_optimistic(&variables, &mut tx);

        if !self.queue.connectivity.is_online() {
            log::debug!("Offline, deferring {}/{}", def.entity(), def.mutation_type());
            return match self.queue_variables(&variables).await {
                Ok(queued) => {
                    tx.commit();
                    Ok(MutationOutcome::Queued(queued))
                }
                Err(e) => {
                    tx.rollback();
                    Err(e)
                }
            };
        }

        let label = format!("{}/{}", def.entity(), def.mutation_type());
        match self.queue.guard.run(&label, def.mutate(&variables)).await {
            Ok(output) => {
                tx.commit();
                Ok(MutationOutcome::Applied(output))
            }
            Err(e) => {
                log::warn!("Remote {} failed, rolling back and queuing: {}", label, e);
                tx.rollback();
                let queued = self.queue_variables(&variables).await?;
                Ok(MutationOutcome::Queued(queued))
            }
        }
    }

    async fn queue_variables(&self, variables: &D::Variables) -> ServiceResult<QueuedMutation> {
        let def = self.definition.as_ref();
        let payload = def.to_payload(variables).map_err(ServiceError::from)?;
        self.queue
            .enqueue(def.entity(), def.mutation_type(), payload, def.priority())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::core::cache::MemoryQueryCache;
    use crate::domains::core::store::{MemoryPersistentStore, PersistentStore};
    use crate::domains::core::test_support::FlakyStore;
    use crate::domains::mutation::repository::KvMutationQueueRepository;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Remote checklist: item id -> checked
    #[derive(Default)]
    struct FakeRemote {
        items: StdMutex<HashMap<String, bool>>,
        fail: AtomicBool,
        calls: AtomicUsize,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct SetChecked {
        item_id: String,
        checked: bool,
    }

    struct SetChecklistItem {
        remote: Arc<FakeRemote>,
        priority: MutationPriority,
    }

    #[async_trait]
    impl MutationDefinition for SetChecklistItem {
        type Variables = SetChecked;
        type Output = bool;

        fn entity(&self) -> &str { "checkbox" }
        fn mutation_type(&self) -> &str { "set_checked" }
        fn priority(&self) -> MutationPriority { self.priority }

        async fn mutate(&self, variables: &SetChecked) -> ServiceResult<bool> {
            self.remote.calls.fetch_add(1, Ordering::SeqCst);
            if self.remote.fail.load(Ordering::SeqCst) {
                return Err(ServiceError::Network("connection reset".into()));
            }
            self.remote.items.lock().unwrap().insert(variables.item_id.clone(), variables.checked);
            Ok(variables.checked)
        }

        fn apply_optimistic(&self, variables: &SetChecked, tx: &mut OptimisticTransaction) {
            tx.set(&format!("checkbox:{}", variables.item_id), json!(variables.checked));
        }
    }

    struct Harness {
        service: Arc<MutationQueueService>,
        cache: Arc<MemoryQueryCache>,
        connectivity: ConnectivitySignal,
        remote: Arc<FakeRemote>,
    }

    fn harness_with_store(store: Arc<dyn PersistentStore>, online: bool) -> Harness {
        let cache = Arc::new(MemoryQueryCache::new());
        let connectivity = ConnectivitySignal::new(online);
        let service = Arc::new(MutationQueueService::new(
            Arc::new(KvMutationQueueRepository::new(store)),
            cache.clone(),
            connectivity.clone(),
            SyncEventBus::default(),
            &SyncConfig::default(),
        ));
        Harness {
            service,
            cache,
            connectivity,
            remote: Arc::new(FakeRemote::default()),
        }
    }

    fn harness(online: bool) -> Harness {
        harness_with_store(Arc::new(MemoryPersistentStore::new()), online)
    }

    impl Harness {
        fn checklist(&self, priority: MutationPriority) -> OptimisticMutation<SetChecklistItem> {
            self.service.register(SetChecklistItem {
                remote: self.remote.clone(),
                priority,
            })
        }

        fn remote_state(&self, item: &str) -> Option<bool> {
            self.remote.items.lock().unwrap().get(item).copied()
        }
    }

    #[tokio::test]
    async fn test_online_success_keeps_optimistic_state() {
        let h = harness(true);
        let mutation = h.checklist(MutationPriority::Normal);

        let outcome = mutation
            .execute(SetChecked { item_id: "x".into(), checked: true })
            .await
            .unwrap();

        assert_eq!(outcome, MutationOutcome::Applied(true));
        assert_eq!(h.cache.get_query_data("checkbox:x"), Some(json!(true)));
        assert!(h.service.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_failure_rolls_back_and_queues() {
        let h = harness(true);
        let mutation = h.checklist(MutationPriority::Normal);
        h.cache.set_query_data("checkbox:x", json!(false));
        let before = h.cache.snapshot();
        h.remote.fail.store(true, Ordering::SeqCst);

        let outcome = mutation
            .execute(SetChecked { item_id: "x".into(), checked: true })
            .await
            .unwrap();

        assert!(outcome.is_queued());
        assert_eq!(h.cache.snapshot(), before);
        let pending = h.service.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload, json!({"item_id": "x", "checked": true}));
    }

    #[tokio::test]
    async fn test_offline_toggle_then_flush_reaches_remote() {
        let h = harness(false);
        let mutation = h.checklist(MutationPriority::Normal);

        let outcome = mutation
            .execute(SetChecked { item_id: "x".into(), checked: true })
            .await
            .unwrap();
        let queued = match outcome {
            MutationOutcome::Queued(q) => q,
            other => panic!("expected queued, got {:?}", other),
        };
        assert_eq!(queued.entity, "checkbox");
        assert_eq!(h.remote.calls.load(Ordering::SeqCst), 0);
        // The user keeps seeing their change while offline
        assert_eq!(h.cache.get_query_data("checkbox:x"), Some(json!(true)));

        // Flushing while offline is a no-op
        assert_eq!(h.service.flush().await.unwrap().attempted, 0);

        h.connectivity.set_online(true);
        let report = h.service.flush().await.unwrap();
        assert_eq!(report.replayed, 1);
        assert!(h.service.pending().await.unwrap().is_empty());
        assert_eq!(h.remote_state("x"), Some(true));
    }

    #[tokio::test]
    async fn test_duplicate_sets_replay_idempotently() {
        let h = harness(false);
        let mutation = h.checklist(MutationPriority::Normal);

        // Rapid taps: on, off, on. Each carries its target state.
        for checked in [true, false, true] {
            mutation.execute(SetChecked { item_id: "x".into(), checked }).await.unwrap();
        }

        h.connectivity.set_online(true);
        h.service.flush().await.unwrap();
        assert_eq!(h.remote_state("x"), Some(true));

        // Replaying the final payload again changes nothing
        let handler = h.service.registry().handler_for("checkbox", "set_checked").unwrap();
        handler.replay(&json!({"item_id": "x", "checked": true})).await.unwrap();
        assert_eq!(h.remote_state("x"), Some(true));
    }

    #[tokio::test]
    async fn test_two_successful_sets_restore_original_state() {
        let h = harness(true);
        let mutation = h.checklist(MutationPriority::Normal);
        mutation.execute(SetChecked { item_id: "x".into(), checked: true }).await.unwrap();
        mutation.execute(SetChecked { item_id: "x".into(), checked: false }).await.unwrap();
        assert_eq!(h.remote_state("x"), Some(false));
        assert_eq!(h.cache.get_query_data("checkbox:x"), Some(json!(false)));
    }

    #[tokio::test]
    async fn test_critical_mutations_replay_first() {
        let h = harness(false);
        let normal = h.checklist(MutationPriority::Normal);
        normal.execute(SetChecked { item_id: "late".into(), checked: true }).await.unwrap();

        // Second definition for the same key replaces the handler; both share the remote
        let critical = h.checklist(MutationPriority::Critical);
        critical.execute(SetChecked { item_id: "urgent".into(), checked: true }).await.unwrap();

        let pending = h.service.pending().await.unwrap();
        assert_eq!(pending[0].payload["item_id"], "urgent");
        assert_eq!(pending[1].payload["item_id"], "late");
    }

    #[tokio::test]
    async fn test_dead_letter_after_max_retries() {
        let h = harness(false);
        let mutation = h.checklist(MutationPriority::Normal);
        mutation.execute(SetChecked { item_id: "x".into(), checked: true }).await.unwrap();
        h.remote.fail.store(true, Ordering::SeqCst);
        h.connectivity.set_online(true);

        let mut events = h.service.events.subscribe();
        for attempt in 1..=5u32 {
            let report = h.service.flush().await.unwrap();
            assert_eq!(report.attempted, 1, "attempt {}", attempt);
        }

        assert!(h.service.pending().await.unwrap().is_empty());
        let dead = h.service.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].retry_count, 5);
        let last_error = dead[0].last_error.as_deref().unwrap_or("");
        assert!(last_error.starts_with("Retries exhausted after 5 attempts"));
        assert!(last_error.contains("connection reset"));

        // Dead letters are not replayed automatically
        assert_eq!(h.service.flush().await.unwrap().attempted, 0);

        let mut saw_dead_letter = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SyncEvent::MutationDeadLettered { .. }) {
                saw_dead_letter = true;
            }
        }
        assert!(saw_dead_letter);

        // Manual retry re-arms it
        h.remote.fail.store(false, Ordering::SeqCst);
        let retried = h.service.retry(dead[0].id).await.unwrap();
        assert_eq!(retried.retry_count, 0);
        assert_eq!(h.service.flush().await.unwrap().replayed, 1);
        assert_eq!(h.remote_state("x"), Some(true));
    }

    #[tokio::test]
    async fn test_unknown_handler_is_skipped() {
        let h = harness(true);
        h.service
            .enqueue("attendance", "mark_present", json!({"worker": "w1", "present": true}), MutationPriority::Critical)
            .await
            .unwrap();

        let report = h.service.flush().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.attempted, 0);
        assert_eq!(h.service.stats().await.unwrap().queued, 1);

        let pending = h.service.pending().await.unwrap();
        assert_eq!(pending[0].retry_count, 0);
        assert_eq!(
            pending[0].last_error.as_deref(),
            Some("No replay handler registered for attendance/mark_present")
        );
    }

    #[tokio::test]
    async fn test_record_discarded_mid_flush_is_skipped() {
        struct DiscardingRemote {
            repo: Arc<KvMutationQueueRepository>,
        }

        #[async_trait]
        impl MutationDefinition for DiscardingRemote {
            type Variables = SetChecked;
            type Output = ();
            fn entity(&self) -> &str { "checkbox" }
            fn mutation_type(&self) -> &str { "discarding" }
            async fn mutate(&self, variables: &SetChecked) -> ServiceResult<()> {
                if variables.item_id != "gone" {
                    return Ok(());
                }
                // The user discards the record while its replay is in flight
                for record in self.repo.dequeue_all().await? {
                    if record.payload["item_id"] == "gone" {
                        self.repo.remove(record.id).await?;
                    }
                }
                Err(ServiceError::Network("connection reset".into()))
            }
            fn apply_optimistic(&self, variables: &SetChecked, tx: &mut OptimisticTransaction) {
                tx.set(&format!("checkbox:{}", variables.item_id), json!(variables.checked));
            }
        }

        let repo = Arc::new(KvMutationQueueRepository::new(Arc::new(MemoryPersistentStore::new())));
        let service = Arc::new(MutationQueueService::new(
            repo.clone(),
            Arc::new(MemoryQueryCache::new()),
            ConnectivitySignal::new(true),
            SyncEventBus::default(),
            &SyncConfig::default(),
        ));
        service.register(DiscardingRemote { repo: repo.clone() });
        for item in ["gone", "kept"] {
            service
                .enqueue("checkbox", "discarding", json!({"item_id": item, "checked": true}), MutationPriority::Normal)
                .await
                .unwrap();
        }

        let report = service.flush().await.unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.replayed, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(service.stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_timeout_is_a_transient_failure() {
        struct Hanging;

        #[async_trait]
        impl MutationDefinition for Hanging {
            type Variables = SetChecked;
            type Output = ();
            fn entity(&self) -> &str { "checkbox" }
            fn mutation_type(&self) -> &str { "hang" }
            async fn mutate(&self, _variables: &SetChecked) -> ServiceResult<()> {
                futures::future::pending::<()>().await;
                Ok(())
            }
            fn apply_optimistic(&self, variables: &SetChecked, tx: &mut OptimisticTransaction) {
                tx.set(&format!("checkbox:{}", variables.item_id), json!(variables.checked));
            }
        }

        let cache = Arc::new(MemoryQueryCache::new());
        let service = Arc::new(
            MutationQueueService::new(
                Arc::new(KvMutationQueueRepository::new(Arc::new(MemoryPersistentStore::new()))),
                cache.clone(),
                ConnectivitySignal::new(true),
                SyncEventBus::default(),
                &SyncConfig::default(),
            )
            .with_guard(RemoteCallGuard::new(Duration::from_millis(20))),
        );
        let mutation = service.register(Hanging);

        let outcome = mutation.execute(SetChecked { item_id: "y".into(), checked: true }).await.unwrap();
        assert!(outcome.is_queued());
        assert!(cache.get_query_data("checkbox:y").is_none());
    }

    #[tokio::test]
    async fn test_storage_failure_is_escalated_and_rolled_back() {
        let store = Arc::new(FlakyStore::new());
        let h = harness_with_store(store.clone(), false);
        let mutation = h.checklist(MutationPriority::Normal);
        store.fail_writes(true);

        let mut events = h.service.events.subscribe();
        let result = mutation.execute(SetChecked { item_id: "x".into(), checked: true }).await;

        assert!(result.is_err());
        assert!(h.cache.get_query_data("checkbox:x").is_none());
        assert!(matches!(events.try_recv(), Ok(SyncEvent::StorageFailure { .. })));
    }

    #[tokio::test]
    async fn test_recover_interrupted_resets_sending() {
        let h = harness(true);
        let queued = h.service
            .enqueue("checkbox", "set_checked", json!({"item_id": "x", "checked": true}), MutationPriority::Normal)
            .await
            .unwrap();
        h.service.repo.update_status(queued.id, MutationStatus::Sending, 1, None).await.unwrap();

        assert_eq!(h.service.recover_interrupted().await.unwrap(), 1);
        assert_eq!(h.service.stats().await.unwrap().queued, 1);

        assert!(h.service.discard(queued.id).await.unwrap());
        assert_eq!(h.service.stats().await.unwrap().total, 0);
    }
}
