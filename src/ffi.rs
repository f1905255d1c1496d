//! FFI bindings for the SSNHL outcome pipeline
//!
//! This module provides C-compatible functions for running the preprocessing
//! pipeline from other languages. All functions use C strings (null-terminated)
//! and return allocated memory that must be freed by the caller using
//! `ssnhl_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::PipelineConfig;
use crate::pipeline::preprocess_json;
use crate::schema::{feature_schema, FEATURE_SCHEMA_VERSION};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

// ============================================================================
// Preprocessing
// ============================================================================

/// Preprocess a JSON array of patient records into a finalized batch (JSON).
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - `config_json` may be NULL for the default configuration, otherwise it
///   must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `ssnhl_free_string`.
/// - Returns NULL on error; call `ssnhl_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ssnhl_preprocess_json(
    json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    let config = if config_json.is_null() {
        PipelineConfig::default()
    } else {
        let parsed = cstr_to_string(config_json)
            .ok_or_else(|| "Invalid config string pointer".to_string())
            .and_then(|s| PipelineConfig::from_json(&s).map_err(|e| e.to_string()));
        match parsed {
            Ok(config) => config,
            Err(msg) => {
                set_last_error(&msg);
                return ptr::null_mut();
            }
        }
    };

    let result = preprocess_json(&json_str, &config)
        .and_then(|batch| serde_json::to_string(&batch).map_err(Into::into));
    match result {
        Ok(out) => string_to_cstr(&out),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Get the finalized feature schema as JSON.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `ssnhl_free_string`.
/// - Returns NULL on error; call `ssnhl_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ssnhl_feature_schema() -> *mut c_char {
    clear_last_error();

    let schema = serde_json::json!({
        "schema_version": FEATURE_SCHEMA_VERSION,
        "columns": feature_schema(),
    });
    match serde_json::to_string(&schema) {
        Ok(out) => string_to_cstr(&out),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by ssnhl functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an ssnhl function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn ssnhl_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next ssnhl function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn ssnhl_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn ssnhl_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn sample_records_json() -> CString {
        CString::new(
            r#"[{
                "ID": 12345, "Birth": "1980-05-01", "test_date": "2024-02-01",
                "Sex": 1, "Side": 2, "HL_duration": 2,
                "PTA_LT_AC_500": 60, "PTA_RT_AC_500": 15,
                "AST": 45, "Na": 140
            }]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_ffi_preprocess_json() {
        let json = sample_records_json();

        unsafe {
            let result = ssnhl_preprocess_json(json.as_ptr(), ptr::null());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            let value: serde_json::Value = serde_json::from_str(result_str).unwrap();
            assert_eq!(value["schema_version"], FEATURE_SCHEMA_VERSION);
            assert_eq!(value["identifiers"][0], "0012345");
            assert_eq!(value["rows"][0].as_array().unwrap().len(), 74);

            ssnhl_free_string(result);
        }
    }

    #[test]
    fn test_ffi_preprocess_with_config() {
        let json = sample_records_json();
        let config = CString::new(r#"{"imputer": {"max_iter": 0}}"#).unwrap();

        unsafe {
            let result = ssnhl_preprocess_json(json.as_ptr(), config.as_ptr());
            assert!(result.is_null());

            let error_str = CStr::from_ptr(ssnhl_last_error()).to_str().unwrap();
            assert!(error_str.contains("max_iter"));
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid_json = CString::new("not json").unwrap();
            let result = ssnhl_preprocess_json(invalid_json.as_ptr(), ptr::null());
            assert!(result.is_null());

            let error = ssnhl_last_error();
            assert!(!error.is_null());
            assert!(!CStr::from_ptr(error).to_str().unwrap().is_empty());

            assert!(ssnhl_preprocess_json(ptr::null(), ptr::null()).is_null());
        }
    }

    #[test]
    fn test_ffi_feature_schema() {
        unsafe {
            let schema = ssnhl_feature_schema();
            assert!(!schema.is_null());

            let value: serde_json::Value =
                serde_json::from_str(CStr::from_ptr(schema).to_str().unwrap()).unwrap();
            assert_eq!(value["columns"].as_array().unwrap().len(), 74);
            assert_eq!(value["columns"][73]["name"], "Sex_2.0");
            assert_eq!(value["columns"][73]["kind"], "binary");

            ssnhl_free_string(schema);
            assert!(ssnhl_last_error().is_null());
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = ssnhl_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
