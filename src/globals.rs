use crate::config::SyncConfig;
use crate::domains::core::cache::{MemoryQueryCache, QueryCache};
use crate::domains::core::connectivity::ConnectivitySignal;
use crate::domains::core::events::SyncEventBus;
use crate::domains::core::store::{PersistentStore, SqlitePersistentStore};
use crate::domains::draft::repository::DraftRepository;
use crate::domains::mutation::repository::KvMutationQueueRepository;
use crate::domains::mutation::service::MutationQueueService;
use crate::domains::sync::worker::{SyncWorker, SyncWorkerHandle};
use crate::domains::upload::service::FileUploadQueue;
use crate::domains::upload::uploader::{ApiFileUploader, FileUploader};
use crate::ffi::error::{FFIError, FFIResult};
use lazy_static::lazy_static;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Runtime;

// Global state definitions
lazy_static! {
    static ref INIT_MUTEX: tokio::sync::Mutex<()> = tokio::sync::Mutex::new(());
    static ref INITIALIZED: AtomicBool = AtomicBool::new(false);

    // Long-lived runtime for FFI calls; the sync worker lives on it
    static ref RUNTIME: Mutex<Option<Arc<Runtime>>> = Mutex::new(None);

    static ref CONFIG: Mutex<Option<SyncConfig>> = Mutex::new(None);
    static ref STORE: Mutex<Option<Arc<dyn PersistentStore>>> = Mutex::new(None);
    static ref CONNECTIVITY: Mutex<Option<ConnectivitySignal>> = Mutex::new(None);
    static ref EVENT_BUS: Mutex<Option<SyncEventBus>> = Mutex::new(None);
    static ref QUERY_CACHE: Mutex<Option<Arc<dyn QueryCache>>> = Mutex::new(None);
    static ref MUTATION_QUEUE: Mutex<Option<Arc<MutationQueueService>>> = Mutex::new(None);
    static ref FILE_QUEUE: Mutex<Option<Arc<FileUploadQueue>>> = Mutex::new(None);
    static ref DRAFT_REPO: Mutex<Option<DraftRepository>> = Mutex::new(None);
    static ref SYNC_WORKER: Mutex<Option<SyncWorkerHandle>> = Mutex::new(None);
}

/// Shared runtime, created on first use.
pub fn runtime() -> FFIResult<Arc<Runtime>> {
    let mut guard = RUNTIME
        .lock()
        .map_err(|_| FFIError::internal("RUNTIME lock poisoned".to_string()))?;
    if let Some(rt) = guard.as_ref() {
        return Ok(rt.clone());
    }
    let rt = Arc::new(
        Runtime::new().map_err(|e| FFIError::internal(format!("Failed to create tokio runtime: {}", e)))?,
    );
    *guard = Some(rt.clone());
    Ok(rt)
}

/// Run a future to completion on the shared runtime.
pub fn block_on<F, T>(future: F) -> FFIResult<T>
where
    F: Future<Output = FFIResult<T>>,
{
    runtime()?.block_on(future)
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

pub async fn initialize(db_url: &str, config: SyncConfig, online: bool) -> FFIResult<()> {
    // Acquire the async mutex to ensure single initialization
    let _guard = INIT_MUTEX.lock().await;

    if INITIALIZED.load(Ordering::Acquire) {
        return Ok(());
    }

    let result = initialize_internal(db_url, config, online).await;

    // Mark as initialized only if successful
    if result.is_ok() {
        INITIALIZED.store(true, Ordering::Release);
    }

    result
}

fn init_logging() {
    let default_level = if cfg!(debug_assertions) { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .try_init();
}

async fn initialize_internal(db_url: &str, config: SyncConfig, online: bool) -> FFIResult<()> {
    init_logging();

    log::info!("Starting offline sync initialization");
    log::debug!("Database URL: {}", db_url);
    log::debug!("Initial connectivity: {}", if online { "online" } else { "offline" });
    log::debug!("Config: {:?}", config);

    let store: Arc<dyn PersistentStore> = Arc::new(
        SqlitePersistentStore::connect(db_url)
            .await
            .map_err(|e| FFIError::internal(format!("Database connection failed: {}", e)))?,
    );

    let connectivity = ConnectivitySignal::new(online);
    let events = SyncEventBus::default();
    let cache: Arc<dyn QueryCache> = Arc::new(MemoryQueryCache::new());

    let mutation_queue = Arc::new(MutationQueueService::new(
        Arc::new(KvMutationQueueRepository::new(store.clone())),
        cache.clone(),
        connectivity.clone(),
        events.clone(),
        &config,
    ));
    let file_queue = Arc::new(FileUploadQueue::for_store(store.clone(), events.clone(), &config));
    let draft_repo = DraftRepository::new(store.clone());

    // Crash recovery before the worker starts replaying
    let recovered_mutations = mutation_queue.recover_interrupted().await?;
    let recovered_files = file_queue.recover_interrupted().await?;
    if recovered_mutations + recovered_files > 0 {
        log::info!(
            "Recovered {} mutations and {} uploads interrupted by a previous run",
            recovered_mutations, recovered_files
        );
    }

    let uploader: Option<Arc<dyn FileUploader>> = match &config.upload_base_url {
        Some(url) => Some(Arc::new(ApiFileUploader::new(url))),
        None => {
            log::warn!("No upload URL configured; attachments stay queued until one is set");
            None
        }
    };

    let (_worker_task, worker) = SyncWorker::new(
        mutation_queue.clone(),
        file_queue.clone(),
        uploader,
        connectivity.clone(),
        events.clone(),
        config.sync_poll_interval_ms,
    )
    .start();

    set_global(&CONFIG, "CONFIG", config)?;
    set_global(&STORE, "STORE", store)?;
    set_global(&CONNECTIVITY, "CONNECTIVITY", connectivity)?;
    set_global(&EVENT_BUS, "EVENT_BUS", events)?;
    set_global(&QUERY_CACHE, "QUERY_CACHE", cache)?;
    set_global(&MUTATION_QUEUE, "MUTATION_QUEUE", mutation_queue)?;
    set_global(&FILE_QUEUE, "FILE_QUEUE", file_queue)?;
    set_global(&DRAFT_REPO, "DRAFT_REPO", draft_repo)?;
    set_global(&SYNC_WORKER, "SYNC_WORKER", worker)?;

    log::info!("Offline sync initialization complete");
    Ok(())
}

fn set_global<T>(slot: &Mutex<Option<T>>, name: &str, value: T) -> FFIResult<()> {
    let mut guard = slot
        .lock()
        .map_err(|_| FFIError::internal(format!("{} lock poisoned", name)))?;
    *guard = Some(value);
    Ok(())
}

fn get_global<T: Clone>(slot: &Mutex<Option<T>>, name: &str) -> FFIResult<T> {
    slot.lock()
        .map_err(|_| FFIError::internal(format!("{} lock poisoned", name)))?
        .clone()
        .ok_or_else(FFIError::not_initialized)
}

pub fn get_config() -> FFIResult<SyncConfig> {
    get_global(&CONFIG, "CONFIG")
}

pub fn get_store() -> FFIResult<Arc<dyn PersistentStore>> {
    get_global(&STORE, "STORE")
}

pub fn get_connectivity() -> FFIResult<ConnectivitySignal> {
    get_global(&CONNECTIVITY, "CONNECTIVITY")
}

pub fn get_event_bus() -> FFIResult<SyncEventBus> {
    get_global(&EVENT_BUS, "EVENT_BUS")
}

pub fn get_query_cache() -> FFIResult<Arc<dyn QueryCache>> {
    get_global(&QUERY_CACHE, "QUERY_CACHE")
}

pub fn get_mutation_queue() -> FFIResult<Arc<MutationQueueService>> {
    get_global(&MUTATION_QUEUE, "MUTATION_QUEUE")
}

pub fn get_file_queue() -> FFIResult<Arc<FileUploadQueue>> {
    get_global(&FILE_QUEUE, "FILE_QUEUE")
}

pub fn get_draft_repo() -> FFIResult<DraftRepository> {
    get_global(&DRAFT_REPO, "DRAFT_REPO")
}

pub fn get_sync_worker() -> FFIResult<SyncWorkerHandle> {
    get_global(&SYNC_WORKER, "SYNC_WORKER")
}

/// Returns whether the state changed.
pub fn set_online(online: bool) -> FFIResult<bool> {
    Ok(get_connectivity()?.set_online(online))
}

pub fn is_online() -> bool {
    get_connectivity().map(|c| c.is_online()).unwrap_or(false)
}
