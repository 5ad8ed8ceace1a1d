//! Background worker that drains the mutation and upload queues while online

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::domains::core::connectivity::ConnectivitySignal;
use crate::domains::core::events::{SyncEvent, SyncEventBus};
use crate::domains::mutation::service::MutationQueueService;
use crate::domains::upload::service::FileUploadQueue;
use crate::domains::upload::uploader::FileUploader;
use crate::errors::{ServiceError, ServiceResult};
use super::types::{SyncPassReport, SyncWorkerStatus};

/// Messages that can be sent to the sync worker
#[derive(Debug)]
pub enum SyncWorkerMessage {
    /// Run a pass now (still a no-op while offline)
    FlushNow {
        response: oneshot::Sender<ServiceResult<SyncPassReport>>,
    },
    GetStatus {
        response: oneshot::Sender<SyncWorkerStatus>,
    },
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

pub struct SyncWorker {
    mutations: Arc<MutationQueueService>,
    files: Arc<FileUploadQueue>,
    uploader: Option<Arc<dyn FileUploader>>,
    connectivity: ConnectivitySignal,
    events: SyncEventBus,
    interval_ms: u64,
    message_receiver: Option<mpsc::Receiver<SyncWorkerMessage>>,
    message_sender: mpsc::Sender<SyncWorkerMessage>,
    passes_completed: u64,
    last_pass_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl SyncWorker {
    pub fn new(
        mutations: Arc<MutationQueueService>,
        files: Arc<FileUploadQueue>,
        uploader: Option<Arc<dyn FileUploader>>,
        connectivity: ConnectivitySignal,
        events: SyncEventBus,
        interval_ms: u64,
    ) -> Self {
        let (message_sender, message_receiver) = mpsc::channel(32);
        Self {
            mutations,
            files,
            uploader,
            connectivity,
            events,
            interval_ms,
            message_receiver: Some(message_receiver),
            message_sender,
            passes_completed: 0,
            last_pass_at: None,
            last_error: None,
        }
    }

    /// Spawn the worker loop. The first pass runs immediately.
    pub fn start(mut self) -> (JoinHandle<()>, SyncWorkerHandle) {
        let sender = self.message_sender.clone();
        let receiver = self.message_receiver.take();
        // Subscribe before spawning so a transition right after start is not missed
        let online_rx = self.connectivity.subscribe();

        let handle = tokio::spawn(async move {
            match receiver {
                Some(mut receiver) => self.run(&mut receiver, online_rx).await,
                None => log::error!("Sync worker started without a message receiver"),
            }
        });

        (handle, SyncWorkerHandle { sender })
    }

    async fn run(
        &mut self,
        receiver: &mut mpsc::Receiver<SyncWorkerMessage>,
        mut online_rx: watch::Receiver<bool>,
    ) {
        log::info!("Starting sync worker (poll interval {}ms)", self.interval_ms);

        let mut interval = tokio::time::interval(Duration::from_millis(self.interval_ms.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut shutdown_response: Option<oneshot::Sender<()>> = None;

        loop {
            tokio::select! {
                message = receiver.recv() => {
                    match message {
                        Some(SyncWorkerMessage::FlushNow { response }) => {
                            let result = self.run_pass().await;
                            let _ = response.send(result);
                        }
                        Some(SyncWorkerMessage::GetStatus { response }) => {
                            let _ = response.send(self.status());
                        }
                        Some(SyncWorkerMessage::Shutdown { response }) => {
                            shutdown_response = Some(response);
                            break;
                        }
                        None => {
                            log::info!("Sync worker channel closed, shutting down");
                            break;
                        }
                    }
                }
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        log::warn!("Connectivity signal dropped, sync worker continues on its timer only");
                        online_rx = self.connectivity.subscribe();
                        continue;
                    }
                    let online = *online_rx.borrow_and_update();
                    self.events.publish(SyncEvent::ConnectivityChanged { online });
                    if online {
                        log::info!("Back online, flushing queues");
                        if let Err(e) = self.run_pass().await {
                            log::error!("Sync pass after reconnect failed: {}", e);
                        }
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_pass().await {
                        log::error!("Scheduled sync pass failed: {}", e);
                    }
                }
            }
        }

        log::info!("Sync worker stopped after {} passes", self.passes_completed);
        if let Some(response) = shutdown_response {
            let _ = response.send(());
        }
    }

    /// Mutations first so uploads can reference server-side records.
    async fn run_pass(&mut self) -> ServiceResult<SyncPassReport> {
        let mut report = SyncPassReport::default();
        if !self.connectivity.is_online() {
            report.skipped_offline = true;
            return Ok(report);
        }

        let result = self.drain(&mut report).await;
        self.passes_completed += 1;
        self.last_pass_at = Some(Utc::now());
        self.last_error = result.as_ref().err().map(|e| e.to_string());
        result.map(|_| report)
    }

    async fn drain(&self, report: &mut SyncPassReport) -> ServiceResult<()> {
        report.mutations = self.mutations.flush().await?;

        if !self.connectivity.is_online() {
            return Ok(());
        }
        if let Some(uploader) = &self.uploader {
            report.uploads = self.files.process_pending(uploader.as_ref()).await?;
        }

        let touched = report.mutations.attempted + report.uploads.attempted;
        if touched > 0 {
            log::info!(
                "Sync pass: {} replayed, {} failed, {} dead-lettered; {} uploaded, {} upload failures",
                report.mutations.replayed,
                report.mutations.failed,
                report.mutations.dead_lettered,
                report.uploads.uploaded,
                report.uploads.failed
            );
        }
        Ok(())
    }

    fn status(&self) -> SyncWorkerStatus {
        SyncWorkerStatus {
            online: self.connectivity.is_online(),
            poll_interval_ms: self.interval_ms,
            passes_completed: self.passes_completed,
            last_pass_at: self.last_pass_at,
            last_error: self.last_error.clone(),
            uploads_enabled: self.uploader.is_some(),
        }
    }
}

/// Cloneable sender side of a running worker.
#[derive(Clone, Debug)]
pub struct SyncWorkerHandle {
    sender: mpsc::Sender<SyncWorkerMessage>,
}

impl SyncWorkerHandle {
    pub async fn flush_now(&self) -> ServiceResult<SyncPassReport> {
        let (response, receiver) = oneshot::channel();
        self.send(SyncWorkerMessage::FlushNow { response }).await?;
        receiver.await.map_err(|_| Self::stopped())?
    }

    pub async fn status(&self) -> ServiceResult<SyncWorkerStatus> {
        let (response, receiver) = oneshot::channel();
        self.send(SyncWorkerMessage::GetStatus { response }).await?;
        receiver.await.map_err(|_| Self::stopped())
    }

    pub async fn shutdown(&self) -> ServiceResult<()> {
        let (response, receiver) = oneshot::channel();
        self.send(SyncWorkerMessage::Shutdown { response }).await?;
        receiver.await.map_err(|_| Self::stopped())
    }

    async fn send(&self, message: SyncWorkerMessage) -> ServiceResult<()> {
        self.sender.send(message).await.map_err(|_| Self::stopped())
    }

    fn stopped() -> ServiceError {
        ServiceError::ServiceUnavailable("Sync worker is not running".to_string())
    }
}
