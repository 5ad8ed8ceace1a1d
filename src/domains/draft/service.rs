//! Autosaving form drafts.
//!
//! A `FormDraft` keeps the in-progress values of one form, persists them on a
//! timer and on unmount, and restores them on the next mount when the form
//! opens empty. Storage problems are logged and never reach the form.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::domains::core::store::PersistentStore;
use super::repository::DraftRepository;
use super::types::{is_structurally_empty, SavedFormData};

pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_millis(5000);

pub type RestoreCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct DraftOptions<T> {
    pub form_key: String,
    pub save_interval: Duration,
    pub initial_values: T,
    pub on_restore: Option<RestoreCallback<T>>,
    pub enabled: bool,
}

impl<T> DraftOptions<T> {
    pub fn new(form_key: impl Into<String>, initial_values: T) -> Self {
        Self {
            form_key: form_key.into(),
            save_interval: DEFAULT_SAVE_INTERVAL,
            initial_values,
            on_restore: None,
            enabled: true,
        }
    }

    /// Options with the autosave period taken from the shared configuration.
    pub fn from_config(form_key: impl Into<String>, initial_values: T, config: &SyncConfig) -> Self {
        Self::new(form_key, initial_values).save_interval(config.draft_save_interval())
    }

    pub fn save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval;
        self
    }

    pub fn on_restore<F>(mut self, callback: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.on_restore = Some(Arc::new(callback));
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

struct DraftState<T> {
    data: T,
    /// Serialized form of what the store currently holds
    last_persisted: Option<Value>,
    last_saved_at: Option<i64>,
    has_saved_data: bool,
}

/// Stops the autosave task.
pub struct AutosaveHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl AutosaveHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            log::warn!("Autosave task ended abnormally: {}", e);
        }
    }
}

struct DraftInner<T> {
    repo: DraftRepository,
    form_key: String,
    save_interval: Duration,
    initial_values: T,
    // Snapshots only ever fill a form that was opened blank
    initial_empty: bool,
    on_restore: Option<RestoreCallback<T>>,
    enabled: bool,
    state: Mutex<DraftState<T>>,
    is_saving: AtomicBool,
    // Serializes writes from the timer and explicit saves
    save_lock: tokio::sync::Mutex<()>,
    autosave: Mutex<Option<AutosaveHandle>>,
}

/// Handle to a mounted form draft. Clones share the same draft.
pub struct FormDraft<T> {
    inner: Arc<DraftInner<T>>,
}

impl<T> Clone for FormDraft<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> FormDraft<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create the draft and load any saved snapshot.
    pub async fn mount(store: Arc<dyn PersistentStore>, options: DraftOptions<T>) -> Self {
        let initial_empty = serde_json::to_value(&options.initial_values)
            .map(|v| is_structurally_empty(&v))
            .unwrap_or(false);
        let draft = Self {
            inner: Arc::new(DraftInner {
                repo: DraftRepository::new(store),
                form_key: options.form_key,
                save_interval: options.save_interval,
                state: Mutex::new(DraftState {
                    data: options.initial_values.clone(),
                    last_persisted: None,
                    last_saved_at: None,
                    has_saved_data: false,
                }),
                initial_values: options.initial_values,
                initial_empty,
                on_restore: options.on_restore,
                enabled: options.enabled,
                is_saving: AtomicBool::new(false),
                save_lock: tokio::sync::Mutex::new(()),
                autosave: Mutex::new(None),
            }),
        };
        if draft.inner.enabled {
            draft.load_snapshot().await;
        }
        draft
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, DraftState<T>> {
        self.inner.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn form_key(&self) -> &str {
        &self.inner.form_key
    }

    pub fn data(&self) -> T {
        self.lock_state().data.clone()
    }

    pub fn set_data(&self, data: T) {
        self.lock_state().data = data;
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        f(&mut self.lock_state().data);
    }

    pub fn has_saved_data(&self) -> bool {
        self.lock_state().has_saved_data
    }

    /// Epoch milliseconds of the snapshot in the store
    pub fn last_saved_at(&self) -> Option<i64> {
        self.lock_state().last_saved_at
    }

    pub fn is_saving(&self) -> bool {
        self.inner.is_saving.load(Ordering::SeqCst)
    }

    /// Load the snapshot and apply it if the form was mounted with empty initial values.
    async fn load_snapshot(&self) -> bool {
        let saved = match self.inner.repo.load::<T>(&self.inner.form_key).await {
            Ok(Some(saved)) => saved,
            Ok(None) => return false,
            Err(e) => {
                log::warn!("Failed to load draft {}: {}", self.inner.form_key, e);
                return false;
            }
        };

        let persisted = serde_json::to_value(&saved.data).ok();
        let restored = {
            let mut state = self.lock_state();
            state.has_saved_data = true;
            state.last_saved_at = Some(saved.saved_at);
            state.last_persisted = persisted;
            if self.inner.initial_empty {
                state.data = saved.data.clone();
            }
            self.inner.initial_empty
        };

        if restored {
            log::info!("Restored draft {}", self.inner.form_key);
            if let Some(callback) = &self.inner.on_restore {
                callback(&saved.data);
            }
        } else {
            log::debug!("Draft {} found but form was opened with values, keeping them", self.inner.form_key);
        }
        restored
    }

    /// Re-read the snapshot; replaces data only when the initial values were empty.
    pub async fn restore(&self) -> bool {
        if !self.inner.enabled {
            return false;
        }
        self.load_snapshot().await
    }

    /// Persist the current data unconditionally. Returns whether the write succeeded.
    pub async fn save(&self) -> bool {
        self.persist(false).await
    }

    /// Persist only if the data differs from the stored snapshot.
    pub async fn save_if_changed(&self) -> bool {
        self.persist(true).await
    }

    async fn persist(&self, skip_unchanged: bool) -> bool {
        if !self.inner.enabled {
            return false;
        }
        let _save = self.inner.save_lock.lock().await;

        let (data, serialized) = {
            let state = self.lock_state();
            let serialized = match serde_json::to_value(&state.data) {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("Failed to serialize draft {}: {}", self.inner.form_key, e);
                    return false;
                }
            };
            if skip_unchanged && state.last_persisted.as_ref() == Some(&serialized) {
                return false;
            }
            (state.data.clone(), serialized)
        };

        self.inner.is_saving.store(true, Ordering::SeqCst);
        let saved = SavedFormData::new(data, Utc::now().timestamp_millis());
        let result = self.inner.repo.save(&self.inner.form_key, &saved).await;
        self.inner.is_saving.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                let mut state = self.lock_state();
                state.last_persisted = Some(serialized);
                state.last_saved_at = Some(saved.saved_at);
                state.has_saved_data = true;
                log::debug!("Saved draft {}", self.inner.form_key);
                true
            }
            Err(e) => {
                log::warn!("Failed to save draft {}: {}", self.inner.form_key, e);
                false
            }
        }
    }

    /// Delete the snapshot, keeping the in-memory data.
    pub async fn clear(&self) {
        if !self.inner.enabled {
            return;
        }
        let _save = self.inner.save_lock.lock().await;
        if let Err(e) = self.inner.repo.delete(&self.inner.form_key).await {
            log::warn!("Failed to delete draft {}: {}", self.inner.form_key, e);
            return;
        }
        let mut state = self.lock_state();
        state.last_persisted = None;
        state.last_saved_at = None;
        state.has_saved_data = false;
    }

    /// Delete the snapshot and reset the form to its initial values.
    pub async fn discard(&self) {
        self.clear().await;
        self.lock_state().data = self.inner.initial_values.clone();
    }

    /// Start periodic saving. Returns false if already running or disabled.
    pub fn start_autosave(&self) -> bool {
        if !self.inner.enabled {
            return false;
        }
        let mut slot = self.inner.autosave.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return false;
        }

        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let weak: Weak<DraftInner<T>> = Arc::downgrade(&self.inner);
        let period = self.inner.save_interval;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        FormDraft { inner }.save_if_changed().await;
                    }
                }
            }
        });

        *slot = Some(AutosaveHandle { shutdown, task });
        log::debug!("Autosave started for {} every {:?}", self.inner.form_key, period);
        true
    }

    pub async fn stop_autosave(&self) {
        let handle = self
            .inner
            .autosave
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    /// Stop autosave and persist pending changes.
    pub async fn unmount(&self) {
        self.stop_autosave().await;
        self.save_if_changed().await;
    }
}
