//! Persisted form snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot layout version. Records carrying another version are ignored.
pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedFormData<T> {
    pub data: T,
    /// Epoch milliseconds
    pub saved_at: i64,
    pub version: u32,
}

impl<T> SavedFormData<T> {
    pub fn new(data: T, saved_at: i64) -> Self {
        Self {
            data,
            saved_at,
            version: CURRENT_VERSION,
        }
    }

    pub fn is_current(&self) -> bool {
        self.version == CURRENT_VERSION
    }
}

/// True when a form holds nothing the user typed.
///
/// Shallow: an object is empty when every top-level field is `""`, `null` or `[]`.
/// Nested objects count as content.
pub fn is_structurally_empty(value: &Value) -> bool {
    match value {
        Value::Object(fields) => fields.values().all(is_blank_field),
        other => is_blank_field(other),
    }
}

fn is_blank_field(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
