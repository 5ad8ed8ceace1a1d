//! Mutation definitions and the replay handler registry.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::errors::{DbError, DomainError, DomainResult, ServiceResult};
use super::transaction::OptimisticTransaction;
use super::types::MutationPriority;

/// One logical write the UI can perform offline.
///
/// `Variables` must describe the target state of the write, not a relative
/// intent: replay may happen more than once.
#[async_trait]
pub trait MutationDefinition: Send + Sync + 'static {
    type Variables: Serialize + DeserializeOwned + Send + Sync;
    type Output: Send;

    fn entity(&self) -> &str;

    fn mutation_type(&self) -> &str;

    fn priority(&self) -> MutationPriority {
        MutationPriority::Normal
    }

    /// The remote call.
    async fn mutate(&self, variables: &Self::Variables) -> ServiceResult<Self::Output>;

    /// Apply the expected effect to the read cache.
    fn apply_optimistic(&self, variables: &Self::Variables, tx: &mut OptimisticTransaction);

    fn to_payload(&self, variables: &Self::Variables) -> DomainResult<Value> {
        serde_json::to_value(variables).map_err(|e| DomainError::Database(DbError::from(e)))
    }

    fn from_payload(&self, payload: &Value) -> DomainResult<Self::Variables> {
        serde_json::from_value(payload.clone()).map_err(|e| DomainError::Database(DbError::from(e)))
    }
}

/// Type-erased replay entry point for a persisted payload.
#[async_trait]
pub trait MutationReplayHandler: Send + Sync {
    fn entity(&self) -> &str;

    fn mutation_type(&self) -> &str;

    async fn replay(&self, payload: &Value) -> ServiceResult<()>;
}

/// Replays payloads through a definition's `mutate`.
pub struct DefinitionReplay<D> {
    definition: Arc<D>,
}

impl<D: MutationDefinition> DefinitionReplay<D> {
    pub fn new(definition: Arc<D>) -> Self {
        Self { definition }
    }
}

#[async_trait]
impl<D: MutationDefinition> MutationReplayHandler for DefinitionReplay<D> {
    fn entity(&self) -> &str {
        self.definition.entity()
    }

    fn mutation_type(&self) -> &str {
        self.definition.mutation_type()
    }

    async fn replay(&self, payload: &Value) -> ServiceResult<()> {
        let variables = self.definition.from_payload(payload)?;
        self.definition.mutate(&variables).await?;
        Ok(())
    }
}

/// Central registry that routes queued records to their handler by
/// `(entity, mutation_type)`.
#[derive(Default)]
pub struct MutationRegistry {
    handlers: RwLock<HashMap<(String, String), Arc<dyn MutationReplayHandler>>>,
}

impl MutationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same key.
    pub fn register(&self, handler: Arc<dyn MutationReplayHandler>) {
        let key = (handler.entity().to_string(), handler.mutation_type().to_string());
        let mut handlers = self.handlers.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if handlers.insert(key.clone(), handler).is_some() {
            log::debug!("Replaced replay handler for {}/{}", key.0, key.1);
        }
    }

    pub fn handler_for(&self, entity: &str, mutation_type: &str) -> Option<Arc<dyn MutationReplayHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers
            .get(&(entity.to_string(), mutation_type.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl MutationReplayHandler for Noop {
        fn entity(&self) -> &str { "checkbox" }
        fn mutation_type(&self) -> &str { "set_checked" }
        async fn replay(&self, _payload: &Value) -> ServiceResult<()> { Ok(()) }
    }

    #[tokio::test]
    async fn test_registry_routes_by_entity_and_type() {
        let registry = MutationRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(Noop));
        registry.register(Arc::new(Noop));
        assert_eq!(registry.len(), 1);

        let handler = registry.handler_for("checkbox", "set_checked").unwrap();
        handler.replay(&json!({})).await.unwrap();
        assert!(registry.handler_for("checkbox", "toggle").is_none());
    }
}
