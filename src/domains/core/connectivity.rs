//! Online/offline signal with transition subscriptions.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared boolean connectivity state. Clones observe and drive the same signal.
#[derive(Clone, Debug)]
pub struct ConnectivitySignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ConnectivitySignal {
    pub fn new(initially_online: bool) -> Self {
        let (sender, _receiver) = watch::channel(initially_online);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Update the state. Returns true when this was a transition; subscribers are
    /// only woken on transitions.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                log::info!("Connectivity restored");
            } else {
                log::warn!("Connectivity lost, writes will be queued");
            }
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Resolves immediately if already online.
    pub async fn wait_until_online(&self) {
        let mut receiver = self.subscribe();
        let _ = receiver.wait_for(|online| *online).await;
    }
}

impl Default for ConnectivitySignal {
    fn default() -> Self {
        Self::new(true)
    }
}
