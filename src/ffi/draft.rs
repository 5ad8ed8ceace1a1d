// Form draft snapshots for hosts that drive autosave from their own UI loop.

use crate::domains::draft::types::SavedFormData;
use crate::ffi::error::{FFIError, FFIResult};
use crate::ffi::{handle_json_result, handle_status_result, parse_json_input, str_arg};
use crate::globals;
use chrono::Utc;
use serde_json::Value;
use std::os::raw::{c_char, c_int};

/// Returns the current snapshot for `form_key` as `SavedFormData`, or `null` when there is none.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn draft_load(form_key: *const c_char) -> *mut c_char {
    handle_json_result(|| -> FFIResult<Option<SavedFormData<Value>>> {
        let form_key = unsafe { str_arg(form_key, "form_key")? }.to_string();
        let repo = globals::get_draft_repo()?;
        globals::block_on(async move { Ok::<_, FFIError>(repo.load::<Value>(&form_key).await?) })
    })
}

/// Writes `data_json` as the snapshot for `form_key`, stamped with the current time.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn draft_save(form_key: *const c_char, data_json: *const c_char) -> c_int {
    handle_status_result(|| {
        let form_key = unsafe { str_arg(form_key, "form_key")? }.to_string();
        let data: Value = parse_json_input(unsafe { str_arg(data_json, "data_json")? })?;
        let repo = globals::get_draft_repo()?;
        let saved = SavedFormData::new(data, Utc::now().timestamp_millis());
        globals::block_on(async move { Ok::<_, FFIError>(repo.save(&form_key, &saved).await?) })
    })
}

/// Deletes the snapshot for `form_key`. Deleting a missing snapshot succeeds.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn draft_discard(form_key: *const c_char) -> c_int {
    handle_status_result(|| {
        let form_key = unsafe { str_arg(form_key, "form_key")? }.to_string();
        let repo = globals::get_draft_repo()?;
        globals::block_on(async move {
            repo.delete(&form_key).await?;
            Ok::<_, FFIError>(())
        })
    })
}
