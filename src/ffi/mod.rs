use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use crate::ffi::error::{FFIError, ErrorCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

pub mod draft;
pub mod error;
pub mod offline;

/// Error handling helper for FFI boundaries (returns error code)
pub fn handle_status_result<F>(func: F) -> c_int
where
    F: FnOnce() -> FFIResult<()>,
{
    match func() {
        Ok(_) => ErrorCode::Success as c_int,
        Err(e) => {
            log::error!("FFI error {:?}: {} ({})", e.code, e.message, e.details.as_deref().unwrap_or("no details"));
            e.code as c_int
        }
    }
}

/// Serializes Ok(T) or Err(FFIError) to JSON.
/// Returns a pointer to a C string the caller frees with `offline_free_string`.
pub fn handle_json_result<F, T>(func: F) -> *mut c_char
where
    F: FnOnce() -> FFIResult<T>,
    T: Serialize,
{
    let json_string = match func() {
        Ok(value) => serde_json::to_string(&value),
        Err(ffi_error) => {
            log::error!("FFI error {:?}: {}", ffi_error.code, ffi_error.message);
            serde_json::to_string(&ffi_error)
        }
    };

    let final_json = match json_string {
        Ok(s) => s,
        Err(e) => {
            // The caller must always receive parseable JSON
            let error = FFIError::internal(format!("Failed to serialize result: {}", e));
            serde_json::json!({ "code": error.code, "message": error.message, "details": null }).to_string()
        }
    };

    match CString::new(final_json) {
        Ok(c_string) => c_string.into_raw(),
        Err(e) => {
            log::error!("Failed to create CString: {}", e);
            let error_json = serde_json::json!({
                "code": ErrorCode::InternalError,
                "message": "Result contained an interior null byte",
                "details": null
            })
            .to_string();
            CString::new(error_json).map_or(std::ptr::null_mut(), |cs| cs.into_raw())
        }
    }
}

/// Borrow a C string argument as UTF-8.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string valid for the call.
pub unsafe fn str_arg<'a>(ptr: *const c_char, name: &str) -> FFIResult<&'a str> {
    if ptr.is_null() {
        return Err(FFIError::new(ErrorCode::NullPointer, &format!("{} is null", name)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| FFIError::new(ErrorCode::InvalidUtf8, &format!("{} is not valid UTF-8", name)))
}

/// # Safety
/// Same contract as [`str_arg`].
pub unsafe fn uuid_arg(ptr: *const c_char, name: &str) -> FFIResult<Uuid> {
    let raw = str_arg(ptr, name)?;
    Uuid::parse_str(raw).map_err(|_| {
        FFIError::with_details(
            ErrorCode::InvalidUuid,
            &format!("Invalid UUID for {}", name),
            &serde_json::json!({ "uuid": raw }).to_string(),
        )
    })
}

pub fn parse_json_input<T: DeserializeOwned>(json: &str) -> FFIResult<T> {
    serde_json::from_str(json).map_err(|e| FFIError::invalid_argument(&format!("json parse: {}", e)))
}

pub use error::FFIResult;
