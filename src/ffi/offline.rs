// FFI surface for initialization, connectivity and the two durable queues.
// Data-returning calls hand back JSON strings freed with `offline_free_string`.

use crate::config::SyncConfig;
use crate::domains::mutation::types::QueuedMutation;
use crate::domains::sync::types::SyncPassReport;
use crate::domains::upload::types::{AdmissionDecision, FileQueueStats, NewFile, QueuedFile};
use crate::ffi::error::{FFIError, FFIResult};
use crate::ffi::{handle_json_result, handle_status_result, parse_json_input, str_arg, uuid_arg};
use crate::globals;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::ffi::CString;
use std::os::raw::{c_char, c_int};

#[derive(Serialize)]
struct RemovedCount {
    removed: usize,
}

#[derive(Serialize)]
struct Discarded {
    discarded: bool,
}

/// Initialize storage, queues and the sync worker.
/// `db_url` is a SQLite URL (`sqlite://...` or `sqlite::memory:`). Limits come from `SITE_SYNC_*`.
/// Returns 0 on success, an `ErrorCode` otherwise.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn offline_initialize(db_url: *const c_char, online: bool) -> c_int {
    let result = std::panic::catch_unwind(|| -> FFIResult<()> {
        let db_url = unsafe { str_arg(db_url, "db_url")? }.to_string();
        if !db_url.starts_with("sqlite:") {
            return Err(FFIError::invalid_argument("db_url must be a SQLite URL starting with 'sqlite:'"));
        }
        let config = SyncConfig::from_env();
        globals::block_on(crate::initialize(&db_url, config, online))
    });

    match result {
        Ok(ffi_result) => handle_status_result(|| ffi_result),
        Err(panic_payload) => {
            let panic_msg = if let Some(s) = panic_payload.downcast_ref::<String>() {
                s.clone()
            } else if let Some(s) = panic_payload.downcast_ref::<&str>() {
                s.to_string()
            } else {
                "Panicked during FFI call, but panic message is not a string".to_string()
            };
            handle_status_result(|| Err(FFIError::internal(format!("Panic during initialization: {}", panic_msg))))
        }
    }
}

/// Feed a connectivity change from the platform's network monitor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn offline_set_online(online: bool) -> c_int {
    handle_status_result(|| {
        globals::set_online(online)?;
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn offline_is_online() -> bool {
    globals::is_online()
}

/// Run a sync pass now. Returns a `SyncPassReport`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn offline_flush_now() -> *mut c_char {
    handle_json_result(|| -> FFIResult<SyncPassReport> {
        let worker = globals::get_sync_worker()?;
        globals::block_on(async move { Ok::<_, FFIError>(worker.flush_now().await?) })
    })
}

/// Admission check before the user picks a file. Returns an `AdmissionDecision`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn file_queue_can_add(size_bytes: u64) -> *mut c_char {
    handle_json_result(|| -> FFIResult<AdmissionDecision> {
        let queue = globals::get_file_queue()?;
        globals::block_on(async move { Ok::<_, FFIError>(queue.can_add_file(size_bytes).await?) })
    })
}

#[derive(Deserialize)]
struct AddFilePayload {
    name: String,
    #[serde(default)]
    mime_type: String,
    file_data: String, // base64 encoded
    entity_type: String,
    entity_id: String,
    proyecto_id: String,
}

impl AddFilePayload {
    fn into_new_file(self) -> FFIResult<(NewFile, String, String, String)> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.file_data)
            .map_err(|_| FFIError::invalid_argument("invalid base64 file data"))?;
        Ok((
            NewFile::new(self.name, self.mime_type, bytes),
            self.entity_type,
            self.entity_id,
            self.proyecto_id,
        ))
    }
}

/// Queue an attachment for upload. Returns the stored `QueuedFile`.
/// Expected JSON payload:
/// {
///   "name": "string",
///   "mime_type": "optional_string",
///   "file_data": "base64_encoded_file_data",
///   "entity_type": "string",
///   "entity_id": "string",
///   "proyecto_id": "string"
/// }
#[unsafe(no_mangle)]
pub unsafe extern "C" fn file_queue_add(payload_json: *const c_char) -> *mut c_char {
    handle_json_result(|| -> FFIResult<QueuedFile> {
        let payload: AddFilePayload = parse_json_input(unsafe { str_arg(payload_json, "payload_json")? })?;
        let (file, entity_type, entity_id, proyecto_id) = payload.into_new_file()?;
        let queue = globals::get_file_queue()?;
        globals::block_on(async move {
            Ok::<_, FFIError>(
                queue
                    .add_file_to_queue(file, &entity_type, &entity_id, &proyecto_id)
                    .await?,
            )
        })
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn file_queue_stats() -> *mut c_char {
    handle_json_result(|| -> FFIResult<FileQueueStats> {
        let queue = globals::get_file_queue()?;
        globals::block_on(async move { Ok::<_, FFIError>(queue.get_file_queue_stats().await?) })
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn file_queue_pending() -> *mut c_char {
    handle_json_result(|| -> FFIResult<Vec<QueuedFile>> {
        let queue = globals::get_file_queue()?;
        globals::block_on(async move { Ok::<_, FFIError>(queue.get_pending_files().await?) })
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn file_queue_failed() -> *mut c_char {
    handle_json_result(|| -> FFIResult<Vec<QueuedFile>> {
        let queue = globals::get_file_queue()?;
        globals::block_on(async move { Ok::<_, FFIError>(queue.get_failed_files().await?) })
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn file_queue_clear_failed() -> *mut c_char {
    handle_json_result(|| -> FFIResult<RemovedCount> {
        let queue = globals::get_file_queue()?;
        let removed = globals::block_on(async move { Ok::<_, FFIError>(queue.clear_failed_files().await?) })?;
        Ok(RemovedCount { removed })
    })
}

/// Re-arm a permanently failed upload. Returns the updated `QueuedFile`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn file_queue_retry(id: *const c_char) -> *mut c_char {
    handle_json_result(|| -> FFIResult<QueuedFile> {
        let id = unsafe { uuid_arg(id, "id")? };
        let queue = globals::get_file_queue()?;
        globals::block_on(async move { Ok::<_, FFIError>(queue.retry_file(id).await?) })
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mutation_queue_pending() -> *mut c_char {
    handle_json_result(|| -> FFIResult<Vec<QueuedMutation>> {
        let queue = globals::get_mutation_queue()?;
        globals::block_on(async move { Ok::<_, FFIError>(queue.pending().await?) })
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mutation_queue_dead_letters() -> *mut c_char {
    handle_json_result(|| -> FFIResult<Vec<QueuedMutation>> {
        let queue = globals::get_mutation_queue()?;
        globals::block_on(async move { Ok::<_, FFIError>(queue.dead_letters().await?) })
    })
}

/// Put a dead letter back in the queue with a fresh retry budget.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mutation_queue_retry(id: *const c_char) -> *mut c_char {
    handle_json_result(|| -> FFIResult<QueuedMutation> {
        let id = unsafe { uuid_arg(id, "id")? };
        let queue = globals::get_mutation_queue()?;
        globals::block_on(async move { Ok::<_, FFIError>(queue.retry(id).await?) })
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mutation_queue_discard(id: *const c_char) -> *mut c_char {
    handle_json_result(|| -> FFIResult<Discarded> {
        let id = unsafe { uuid_arg(id, "id")? };
        let queue = globals::get_mutation_queue()?;
        let discarded = globals::block_on(async move { Ok::<_, FFIError>(queue.discard(id).await?) })?;
        Ok(Discarded { discarded })
    })
}

/// Frees a string returned by any function in this library.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn offline_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = unsafe { CString::from_raw(ptr) };
    }
}
