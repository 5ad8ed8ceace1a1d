//! Read cache the UI renders from. Optimistic updates write here synchronously.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// Minimal get/set contract over the host's query cache.
pub trait QueryCache: Send + Sync {
    fn get_query_data(&self, key: &str) -> Option<Value>;

    fn set_query_data(&self, key: &str, value: Value);

    fn remove_query_data(&self, key: &str);
}

/// In-process cache used when the host does not supply its own.
#[derive(Default)]
pub struct MemoryQueryCache {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryQueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every cached entry, for diagnostics and tests.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        match self.entries.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                log::error!("Query cache lock poisoned, recovering snapshot");
                poisoned.into_inner().clone()
            }
        }
    }
}

impl QueryCache for MemoryQueryCache {
    fn get_query_data(&self, key: &str) -> Option<Value> {
        match self.entries.read() {
            Ok(guard) => guard.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }

    fn set_query_data(&self, key: &str, value: Value) {
        let mut guard = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.insert(key.to_string(), value);
    }

    fn remove_query_data(&self, key: &str) {
        let mut guard = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.remove(key);
    }
}
