//! Optimistic cache writes with an explicit undo.

use serde_json::Value;
use std::sync::Arc;

use crate::domains::core::cache::QueryCache;

/// Short-lived record of one mutation attempt's cache writes.
///
/// The first write to each key snapshots the prior value; `rollback` restores
/// those snapshots in reverse order, `commit` keeps the new state.
pub struct OptimisticTransaction {
    cache: Arc<dyn QueryCache>,
    snapshots: Vec<(String, Option<Value>)>,
}

impl OptimisticTransaction {
    pub fn begin(cache: Arc<dyn QueryCache>) -> Self {
        Self {
            cache,
            snapshots: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.cache.get_query_data(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.capture(key);
        self.cache.set_query_data(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        self.cache.remove_query_data(key);
    }

    /// Read-modify-write of one key. `None` from `f` removes the key.
    pub fn update<F>(&mut self, key: &str, f: F)
    where
        F: FnOnce(Option<Value>) -> Option<Value>,
    {
        let current = self.get(key);
        match f(current) {
            Some(value) => self.set(key, value),
            None => self.remove(key),
        }
    }

    pub fn touched_keys(&self) -> impl Iterator<Item = &str> {
        self.snapshots.iter().map(|(key, _)| key.as_str())
    }

    pub fn commit(self) {}

    pub fn rollback(self) {
        for (key, prior) in self.snapshots.into_iter().rev() {
            match prior {
                Some(value) => self.cache.set_query_data(&key, value),
                None => self.cache.remove_query_data(&key),
            }
        }
    }

    fn capture(&mut self, key: &str) {
        if self.snapshots.iter().any(|(k, _)| k == key) {
            return;
        }
        let prior = self.cache.get_query_data(key);
        self.snapshots.push((key.to_string(), prior));
    }
}
