use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::domains::core::store::{load_json, save_json, PersistentStore};
use crate::errors::DbResult;
use super::types::SavedFormData;

pub fn draft_key(form_key: &str) -> String {
    format!("form-autosave-{}", form_key)
}

/// Reads and writes `form-autosave-{key}` snapshots.
#[derive(Clone)]
pub struct DraftRepository {
    store: Arc<dyn PersistentStore>,
}

impl DraftRepository {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    /// Current-version snapshot, if any. Stale versions and undecodable
    /// records read as absent.
    pub async fn load<T: DeserializeOwned>(&self, form_key: &str) -> DbResult<Option<SavedFormData<T>>> {
        let key = draft_key(form_key);
        match load_json::<SavedFormData<T>>(self.store.as_ref(), &key).await {
            Ok(Some(saved)) if saved.is_current() => Ok(Some(saved)),
            Ok(Some(saved)) => {
                log::debug!("Ignoring {} snapshot with version {}", key, saved.version);
                Ok(None)
            }
            Ok(None) => Ok(None),
            Err(crate::errors::DbError::Serialization(e)) => {
                log::warn!("Ignoring undecodable snapshot {}: {}", key, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn save<T: Serialize + Sync>(&self, form_key: &str, saved: &SavedFormData<T>) -> DbResult<()> {
        save_json(self.store.as_ref(), &draft_key(form_key), saved).await
    }

    pub async fn delete(&self, form_key: &str) -> DbResult<bool> {
        self.store.del(&draft_key(form_key)).await
    }
}
