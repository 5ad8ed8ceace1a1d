//! Notifications the UI turns into toasts and badges.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    MutationQueued {
        id: Uuid,
        entity: String,
        mutation_type: String,
    },
    MutationReplayed {
        id: Uuid,
        entity: String,
        mutation_type: String,
    },
    MutationDeadLettered {
        id: Uuid,
        entity: String,
        retry_count: u32,
        error: String,
    },
    FileQueued {
        id: Uuid,
        name: String,
        size: u64,
    },
    FileUploaded {
        id: Uuid,
        url: String,
    },
    FileFailed {
        id: Uuid,
        retry_count: u32,
        permanent: bool,
        error: String,
    },
    /// A queue could not persist a write; the user must be told.
    StorageFailure {
        component: String,
        message: String,
    },
    ConnectivityChanged {
        online: bool,
    },
}

#[derive(Clone, Debug)]
pub struct SyncEventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl SyncEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: SyncEvent) {
        // No subscribers is normal (headless runs, tests)
        if self.sender.send(event).is_err() {
            log::trace!("Sync event dropped: no subscribers");
        }
    }
}

impl Default for SyncEventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
