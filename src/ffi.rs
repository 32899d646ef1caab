//! FFI bindings for ethoflux
//!
//! C-compatible entry points for scoring sessions from other languages.
//! Strings are null-terminated UTF-8; every returned string is newly allocated
//! and must be released with `ethoflux_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::ScoringConfig;
use crate::error::ScoringError;
use crate::pipeline::{score_session, score_session_with_config, BehaviourProcessor};
use crate::session::SavedSession;

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

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Map a pipeline result onto the C convention: string or NULL + last error
fn finish(result: Result<String, ScoringError>) -> *mut c_char {
    match result {
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

/// Score a session input JSON with the default configuration.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `ethoflux_free_string`.
/// - Returns NULL on error; call `ethoflux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ethoflux_score_session(json: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(json_str) = cstr_to_string(json) else {
        set_last_error("Invalid JSON string pointer");
        return ptr::null_mut();
    };

    finish(score_session(&json_str))
}

/// Score a session input JSON with a JSON scoring configuration.
///
/// # Safety
/// - `json` and `config_json` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `ethoflux_free_string`.
/// - Returns NULL on error; call `ethoflux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ethoflux_score_session_with_config(
    json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(json_str) = cstr_to_string(json) else {
        set_last_error("Invalid JSON string pointer");
        return ptr::null_mut();
    };
    let Some(config_str) = cstr_to_string(config_json) else {
        set_last_error("Invalid config string pointer");
        return ptr::null_mut();
    };

    finish(score_session_with_config(&json_str, &config_str))
}

/// Default scoring configuration as JSON.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `ethoflux_free_string`.
#[no_mangle]
pub unsafe extern "C" fn ethoflux_default_config() -> *mut c_char {
    clear_last_error();
    finish(serde_json::to_string(&ScoringConfig::default()).map_err(ScoringError::from))
}

// ============================================================================
// Processor API
// ============================================================================

/// Opaque handle to a configured processor
pub struct EthofluxProcessorHandle {
    processor: BehaviourProcessor,
}

/// Create a processor.
///
/// # Safety
/// - `config_json` may be NULL (default configuration) or a valid C string.
/// - `user` may be NULL or a valid C string; it is recorded in session history.
/// - Returns NULL on error. Must be freed with `ethoflux_processor_free`.
#[no_mangle]
pub unsafe extern "C" fn ethoflux_processor_new(
    config_json: *const c_char,
    user: *const c_char,
) -> *mut EthofluxProcessorHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        ScoringConfig::default()
    } else {
        let parsed = cstr_to_string(config_json)
            .ok_or_else(|| ScoringError::ConfigError("config is not valid UTF-8".to_string()))
            .and_then(|s| ScoringConfig::from_json(&s));
        match parsed {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    let mut processor = BehaviourProcessor::with_config(config);
    if let Some(user) = cstr_to_string(user) {
        processor = processor.with_user(user);
    }
    Box::into_raw(Box::new(EthofluxProcessorHandle { processor }))
}

/// Free a processor.
///
/// # Safety
/// - `processor` must be a pointer returned by `ethoflux_processor_new`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn ethoflux_processor_free(processor: *mut EthofluxProcessorHandle) {
    if !processor.is_null() {
        drop(Box::from_raw(processor));
    }
}

/// Score a session, optionally reprocessing against a saved session.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `ethoflux_processor_new`.
/// - `json` must be a valid C string; `saved_json` may be NULL.
/// - Returns a newly allocated string that must be freed with `ethoflux_free_string`.
/// - Returns NULL on error; call `ethoflux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ethoflux_processor_process(
    processor: *mut EthofluxProcessorHandle,
    json: *const c_char,
    saved_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &*processor;

    let Some(json_str) = cstr_to_string(json) else {
        set_last_error("Invalid JSON string pointer");
        return ptr::null_mut();
    };

    finish(process_with_saved(
        &handle.processor,
        &json_str,
        cstr_to_string(saved_json).as_deref(),
    ))
}

fn process_with_saved(
    processor: &BehaviourProcessor,
    json: &str,
    saved: Option<&str>,
) -> Result<String, ScoringError> {
    let prior = saved.map(SavedSession::from_json).transpose()?;
    let ctx = processor.process_json(json, prior.as_ref())?;
    Ok(serde_json::to_string(&ctx.result())?)
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by ethoflux functions.
///
/// # Safety
/// - `ptr` must be a pointer returned by an ethoflux function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn ethoflux_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is thread-local and valid until the next ethoflux call
///   on this thread. Do NOT free it.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn ethoflux_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn ethoflux_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ScoringResult;

    fn sample_session_json() -> CString {
        let frames = 40;
        let column = |v: f64| vec![v; frames];
        let mut tracks = serde_json::Map::new();
        for (name, dx, dy) in [
            ("Snout", 0.0, -40.0),
            ("EarLeft", -5.0, -25.0),
            ("EarRight", 5.0, -25.0),
            ("TailBase", 0.0, 35.0),
            ("ForePawLeft", -6.0, -15.0),
            ("ForePawRight", 6.0, -15.0),
            ("HindPawLeft", -8.0, 40.0),
            ("HindPawRight", 8.0, 40.0),
        ] {
            tracks.insert(
                name.to_string(),
                serde_json::json!({
                    "x": column(300.0 + dx),
                    "y": column(300.0 + dy),
                    "likelihood": column(0.99),
                }),
            );
        }
        let session = serde_json::json!({
            "session_name": "m7_OF",
            "timestamps": (0..frames).map(|i| i as f64 / 25.0).collect::<Vec<_>>(),
            "frame_width": 600,
            "frame_height": 600,
            "pixels_per_cm": 10.0,
            "arena": {"shape": "rectangle", "x": 50.0, "y": 50.0, "width": 500.0, "height": 500.0},
            "tracks": tracks,
            "centroid": {"x": column(300.0), "y": column(300.0)},
            "motion": column(0.2),
        });
        CString::new(session.to_string()).unwrap()
    }

    #[test]
    fn test_ffi_score_session() {
        let json = sample_session_json();
        unsafe {
            let result = ethoflux_score_session(json.as_ptr());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            let parsed: ScoringResult = serde_json::from_str(result_str).unwrap();
            assert_eq!(parsed.frames, 40);

            ethoflux_free_string(result);
        }
    }

    #[test]
    fn test_ffi_processor_reprocesses_saved_session() {
        let json = sample_session_json();
        let user = CString::new("ffi-user").unwrap();
        unsafe {
            let processor = ethoflux_processor_new(ptr::null(), user.as_ptr());
            assert!(!processor.is_null());

            let first = ethoflux_processor_process(processor, json.as_ptr(), ptr::null());
            assert!(!first.is_null());
            let parsed: ScoringResult =
                serde_json::from_str(CStr::from_ptr(first).to_str().unwrap()).unwrap();
            let saved = CString::new(parsed.session.to_json().unwrap()).unwrap();

            let second = ethoflux_processor_process(processor, json.as_ptr(), saved.as_ptr());
            assert!(!second.is_null());
            let reparsed: ScoringResult =
                serde_json::from_str(CStr::from_ptr(second).to_str().unwrap()).unwrap();
            assert_eq!(reparsed.session.history.len(), 2);
            assert_eq!(reparsed.session.episodes, parsed.session.episodes);

            ethoflux_free_string(first);
            ethoflux_free_string(second);
            ethoflux_processor_free(processor);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid_json = CString::new("not json").unwrap();
            let result = ethoflux_score_session(invalid_json.as_ptr());
            assert!(result.is_null());

            let error = ethoflux_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(error_str.starts_with("Failed to parse session input"));
        }
    }

    #[test]
    fn test_ffi_bad_config_is_rejected() {
        let config = CString::new(r#"{"freezing": {"motion_threshold": "high"}}"#).unwrap();
        unsafe {
            let processor = ethoflux_processor_new(config.as_ptr(), ptr::null());
            assert!(processor.is_null());
            assert!(!ethoflux_last_error().is_null());
        }
    }

    #[test]
    fn test_ffi_default_config_and_version() {
        unsafe {
            let config = ethoflux_default_config();
            assert!(!config.is_null());
            let parsed =
                ScoringConfig::from_json(CStr::from_ptr(config).to_str().unwrap()).unwrap();
            assert_eq!(parsed, ScoringConfig::default());
            ethoflux_free_string(config);

            let version = ethoflux_version();
            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
