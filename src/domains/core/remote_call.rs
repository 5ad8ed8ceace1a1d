//! Deadline and cancellation around remote calls, so a hung request cannot
//! hold a queue slot forever.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::errors::{ServiceResult, SyncError};

/// Cancels every in-flight and future call made through guards sharing this handle.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Re-arm after a cancellation (e.g. on app resume).
    pub fn reset(&self) {
        self.sender.send_replace(false);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct RemoteCallGuard {
    timeout: Duration,
    cancel: CancelHandle,
}

impl RemoteCallGuard {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `call`, failing with `SyncError::Timeout` past the deadline and
    /// `SyncError::Interrupted` on cancellation. The call future is dropped in both cases.
    pub async fn run<F, T>(&self, label: &str, call: F) -> ServiceResult<T>
    where
        F: Future<Output = ServiceResult<T>>,
    {
        let mut cancelled = self.cancel.subscribe();
        if *cancelled.borrow_and_update() {
            log::debug!("Remote call {} skipped: cancelled", label);
            return Err(SyncError::Interrupted.into());
        }

        tokio::select! {
            result = tokio::time::timeout(self.timeout, call) => match result {
                Ok(inner) => inner,
                Err(_) => {
                    log::warn!("Remote call {} timed out after {:?}", label, self.timeout);
                    Err(SyncError::Timeout.into())
                }
            },
            _ = cancelled.wait_for(|c| *c) => {
                log::info!("Remote call {} cancelled", label);
                Err(SyncError::Interrupted.into())
            }
        }
    }
}
