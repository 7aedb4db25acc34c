//! FFI bindings for Mindscore
//!
//! This module provides C-compatible functions for calling Mindscore from other languages.
//! All functions use C strings (null-terminated) and return allocated memory that
//! must be freed by the caller using `mindscore_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;
use std::ptr;

use crate::config::Config;
use crate::duration::DurationParser;
use crate::pipeline::PredictionPipeline;

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
// Engine API
// ============================================================================

/// Opaque handle to a loaded pipeline
pub struct MindscoreEngine {
    pipeline: PredictionPipeline,
}

/// Load a model artifact and open a store directory.
///
/// `collection` may be NULL to use the default record collection. The UTC
/// offset and fetch timeout come from the environment, as for the CLI.
///
/// # Safety
/// - `model_path` and `store_dir` must be valid null-terminated C strings.
/// - `collection` must be NULL or a valid null-terminated C string.
/// - Returns a pointer that must be freed with `mindscore_engine_free`.
/// - Returns NULL on error; call `mindscore_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn mindscore_engine_new(
    model_path: *const c_char,
    store_dir: *const c_char,
    collection: *const c_char,
) -> *mut MindscoreEngine {
    clear_last_error();

    let model_str = match cstr_to_string(model_path) {
        Some(s) => s,
        None => {
            set_last_error("Invalid model_path string pointer");
            return ptr::null_mut();
        }
    };

    let store_str = match cstr_to_string(store_dir) {
        Some(s) => s,
        None => {
            set_last_error("Invalid store_dir string pointer");
            return ptr::null_mut();
        }
    };

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };
    config.model_path = Some(PathBuf::from(model_str));
    config.store_dir = PathBuf::from(store_str);
    if !collection.is_null() {
        match cstr_to_string(collection) {
            Some(name) => config.collection = name,
            None => {
                set_last_error("Invalid collection string pointer");
                return ptr::null_mut();
            }
        }
    }

    match PredictionPipeline::from_config(&config) {
        Ok(pipeline) => Box::into_raw(Box::new(MindscoreEngine { pipeline })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free an engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `mindscore_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn mindscore_engine_free(engine: *mut MindscoreEngine) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Score one user-day and return the JSON response.
///
/// The response is `{"score": <f64>}` or `{"error": {"kind", "message", "retryable"}}`.
/// Request failures, including no data, are reported in the JSON, not through
/// `mindscore_last_error`.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `mindscore_engine_new`.
/// - `user_key` and `date` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `mindscore_free_string`.
/// - Returns NULL only for null or non-UTF-8 arguments.
#[no_mangle]
pub unsafe extern "C" fn mindscore_engine_analyze(
    engine: *const MindscoreEngine,
    user_key: *const c_char,
    date: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }

    let handle = &*engine;

    let key_str = match cstr_to_string(user_key) {
        Some(s) => s,
        None => {
            set_last_error("Invalid user_key string pointer");
            return ptr::null_mut();
        }
    };

    let date_str = match cstr_to_string(date) {
        Some(s) => s,
        None => {
            set_last_error("Invalid date string pointer");
            return ptr::null_mut();
        }
    };

    let response = handle.pipeline.analyze(&key_str, &date_str);
    match serde_json::to_string(&response) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Parse duration text such as `"6 hr 30 min"` into hours.
///
/// # Safety
/// - `text` must be a valid null-terminated C string.
/// - `out_hours` must be a valid pointer to writable memory.
/// - Returns 0 on success, -1 on error.
/// - On error, call `mindscore_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn mindscore_parse_duration(text: *const c_char, out_hours: *mut f64) -> i32 {
    clear_last_error();

    if out_hours.is_null() {
        set_last_error("Null output pointer");
        return -1;
    }

    let text_str = match cstr_to_string(text) {
        Some(s) => s,
        None => {
            set_last_error("Invalid text string pointer");
            return -1;
        }
    };

    match DurationParser::parse_hours(&text_str) {
        Ok(hours) => {
            *out_hours = hours;
            0
        }
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Mindscore functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Mindscore function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn mindscore_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Mindscore function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn mindscore_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Mindscore library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn mindscore_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FEATURE_NAMES;
    use serde_json::json;
    use std::ffi::CString;
    use std::fs;
    use tempfile::TempDir;

    fn write_fixture(dir: &TempDir) -> (CString, CString) {
        let artifact = json!({
            "name": "ffi-test",
            "version": "1",
            "feature_names": FEATURE_NAMES,
            "estimators": [{"coefficients": [0.0, 1.0, 0.0, 0.0, 0.0], "intercept": 0.0}]
        });
        let model_path = dir.path().join("model.json");
        fs::write(&model_path, artifact.to_string()).unwrap();

        let store_dir = dir.path().join("store");
        fs::create_dir(&store_dir).unwrap();
        let record = json!({
            "_id": "U1",
            "createdAt": {"$date": "2024-05-01T08:00:00Z"},
            "heartRateAvg": 72,
            "oxygenAvg": 97,
            "temperature": 36.6,
            "totalSteps": 5000,
            "sleepDuration": "6 hr 30 min"
        });
        fs::write(store_dir.join("dashboards.ndjson"), format!("{}\n", record)).unwrap();

        (
            CString::new(model_path.to_str().unwrap()).unwrap(),
            CString::new(store_dir.to_str().unwrap()).unwrap(),
        )
    }

    #[test]
    fn test_ffi_engine_lifecycle() {
        let dir = TempDir::new().unwrap();
        let (model, store) = write_fixture(&dir);
        let user = CString::new("U1").unwrap();
        let date = CString::new("2024-05-01").unwrap();
        let empty_date = CString::new("2024-05-02").unwrap();

        unsafe {
            let engine = mindscore_engine_new(model.as_ptr(), store.as_ptr(), ptr::null());
            assert!(!engine.is_null());

            let result = mindscore_engine_analyze(engine, user.as_ptr(), date.as_ptr());
            assert!(!result.is_null());
            let value: serde_json::Value =
                serde_json::from_str(CStr::from_ptr(result).to_str().unwrap()).unwrap();
            assert_eq!(value, json!({"score": 6.5}));
            mindscore_free_string(result);

            let result = mindscore_engine_analyze(engine, user.as_ptr(), empty_date.as_ptr());
            let value: serde_json::Value =
                serde_json::from_str(CStr::from_ptr(result).to_str().unwrap()).unwrap();
            assert_eq!(value["error"]["kind"], "no_data");
            mindscore_free_string(result);

            mindscore_engine_free(engine);
        }
    }

    #[test]
    fn test_ffi_engine_new_reports_bad_model() {
        let dir = TempDir::new().unwrap();
        let missing = CString::new(dir.path().join("absent.json").to_str().unwrap()).unwrap();
        let store = CString::new(dir.path().to_str().unwrap()).unwrap();

        unsafe {
            let engine = mindscore_engine_new(missing.as_ptr(), store.as_ptr(), ptr::null());
            assert!(engine.is_null());

            let error = mindscore_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(error_str.contains("Failed to load model"), "{error_str}");
        }
    }

    #[test]
    fn test_ffi_parse_duration() {
        let text = CString::new("6 hr 30 min").unwrap();
        let garbage = CString::new("garbage").unwrap();
        let mut hours = 0.0_f64;

        unsafe {
            assert_eq!(mindscore_parse_duration(text.as_ptr(), &mut hours), 0);
            assert_eq!(hours, 6.5);
            assert!(mindscore_last_error().is_null());

            assert_eq!(mindscore_parse_duration(garbage.as_ptr(), &mut hours), -1);
            assert!(!mindscore_last_error().is_null());
        }
    }

    #[test]
    fn test_ffi_null_pointers() {
        unsafe {
            let result = mindscore_engine_analyze(ptr::null(), ptr::null(), ptr::null());
            assert!(result.is_null());
            assert!(!mindscore_last_error().is_null());
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = mindscore_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, env!("CARGO_PKG_VERSION"));
        }
    }
}
