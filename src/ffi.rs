//! FFI bindings for Calm Flux
//!
//! This module provides C-compatible functions for driving the engine from a host
//! application (browser extension native host, desktop shell, mobile app).
//! All strings are null-terminated UTF-8. Strings returned by this module are
//! allocated here and must be freed by the caller using `calmflux_free_string`.
//!
//! Timestamps are Unix epoch milliseconds; pass `0` (or any non-positive value) to
//! use the current wall clock.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{DateTime, TimeZone, Utc};

use crate::config::EngineConfig;
use crate::encoder::SignalEncoder;
use crate::pipeline::StressEngine;
use crate::storage::{FileStore, MemoryStore, StateStore};
use crate::types::MetricSnapshot;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
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

/// Epoch milliseconds to a timestamp, wall clock for non-positive input
fn resolve_time(now_ms: i64) -> Option<DateTime<Utc>> {
    if now_ms <= 0 {
        return Some(Utc::now());
    }
    Utc.timestamp_millis_opt(now_ms).single()
}

// ============================================================================
// Engine lifecycle
// ============================================================================

/// Opaque handle to a StressEngine
pub struct CalmFluxEngineHandle {
    engine: StressEngine<Box<dyn StateStore>>,
    encoder: SignalEncoder,
}

/// Create a new engine.
///
/// # Safety
/// - `config_json` may be NULL for the default configuration, otherwise a valid
///   null-terminated C string holding an `EngineConfig` JSON object.
/// - `state_dir` may be NULL for in-memory state, otherwise a directory path where
///   state is persisted between runs.
/// - Returns a pointer that must be freed with `calmflux_engine_free`.
/// - Returns NULL on error; call `calmflux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn calmflux_engine_new(
    config_json: *const c_char,
    state_dir: *const c_char,
) -> *mut CalmFluxEngineHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        EngineConfig::default()
    } else {
        let Some(json) = cstr_to_string(config_json) else {
            set_last_error("Invalid config string pointer");
            return ptr::null_mut();
        };
        match EngineConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    let store: Box<dyn StateStore> = if state_dir.is_null() {
        Box::new(MemoryStore::new())
    } else {
        match cstr_to_string(state_dir) {
            Some(dir) => Box::new(FileStore::new(dir)),
            None => {
                set_last_error("Invalid state_dir string pointer");
                return ptr::null_mut();
            }
        }
    };

    match StressEngine::new(config, store) {
        Ok(engine) => Box::into_raw(Box::new(CalmFluxEngineHandle {
            engine,
            encoder: SignalEncoder::new(),
        })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free an engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `calmflux_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn calmflux_engine_free(engine: *mut CalmFluxEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

// ============================================================================
// Metric intake and evaluation
// ============================================================================

/// Push a metric snapshot from one source.
///
/// # Safety
/// - `engine` must be a valid engine pointer.
/// - `source_id` and `snapshot_json` must be valid null-terminated C strings.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn calmflux_push_snapshot(
    engine: *mut CalmFluxEngineHandle,
    source_id: *const c_char,
    snapshot_json: *const c_char,
    now_ms: i64,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &mut *engine;

    let Some(source) = cstr_to_string(source_id) else {
        set_last_error("Invalid source_id string pointer");
        return -1;
    };
    let Some(json) = cstr_to_string(snapshot_json) else {
        set_last_error("Invalid snapshot string pointer");
        return -1;
    };
    let Some(now) = resolve_time(now_ms) else {
        set_last_error("Timestamp out of range");
        return -1;
    };

    match serde_json::from_str::<MetricSnapshot>(&json) {
        Ok(snapshot) => {
            handle.engine.push_snapshot(&source, snapshot, now);
            0
        }
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Run one evaluation tick and return the encoded signal payload.
///
/// # Safety
/// - `engine` must be a valid engine pointer.
/// - Returns a newly allocated string that must be freed with `calmflux_free_string`.
/// - Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn calmflux_tick(
    engine: *mut CalmFluxEngineHandle,
    now_ms: i64,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &mut *engine;

    let Some(now) = resolve_time(now_ms) else {
        set_last_error("Timestamp out of range");
        return ptr::null_mut();
    };

    let outcome = handle.engine.tick(now);
    let status = handle.engine.scheduler_status(now);
    match handle.encoder.encode_to_json(&outcome, status, now) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Open a calibration session.
///
/// # Safety
/// - `engine` must be a valid engine pointer.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn calmflux_start_calibration(
    engine: *mut CalmFluxEngineHandle,
    now_ms: i64,
) -> i32 {
    with_engine(engine, now_ms, |engine, now| engine.start_calibration(now))
}

// ============================================================================
// Presenter feedback
// ============================================================================

/// Record that an intervention was shown.
///
/// # Safety
/// - `engine` must be a valid engine pointer.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn calmflux_record_shown(
    engine: *mut CalmFluxEngineHandle,
    now_ms: i64,
) -> i32 {
    with_engine(engine, now_ms, |engine, now| engine.record_shown(now))
}

/// Record that the last intervention was completed.
///
/// # Safety
/// - `engine` must be a valid engine pointer.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn calmflux_record_completed(
    engine: *mut CalmFluxEngineHandle,
    duration_ms: u64,
    now_ms: i64,
) -> i32 {
    with_engine(engine, now_ms, |engine, now| {
        engine.record_completed(now, duration_ms)
    })
}

/// Record that the last intervention was dismissed.
///
/// # Safety
/// - `engine` must be a valid engine pointer.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn calmflux_record_dismissed(
    engine: *mut CalmFluxEngineHandle,
    now_ms: i64,
) -> i32 {
    with_engine(engine, now_ms, |engine, now| engine.record_dismissed(now))
}

/// Clear baseline, calibration and scheduler state, in memory and persisted.
///
/// # Safety
/// - `engine` must be a valid engine pointer.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn calmflux_reset(engine: *mut CalmFluxEngineHandle) -> i32 {
    with_engine(engine, 0, |engine, _| engine.reset())
}

unsafe fn with_engine(
    engine: *mut CalmFluxEngineHandle,
    now_ms: i64,
    f: impl FnOnce(&mut StressEngine<Box<dyn StateStore>>, DateTime<Utc>),
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let Some(now) = resolve_time(now_ms) else {
        set_last_error("Timestamp out of range");
        return -1;
    };
    f(&mut (*engine).engine, now);
    0
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Calm Flux functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Calm Flux function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn calmflux_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Calm Flux function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn calmflux_last_error() -> *const c_char {
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
pub unsafe extern "C" fn calmflux_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0_MS: i64 = 1_705_312_800_000; // 2024-01-15T10:00:00Z

    fn snapshot_json(ts_ms: i64, clicks: f64) -> CString {
        let ts = Utc.timestamp_millis_opt(ts_ms).unwrap().to_rfc3339();
        CString::new(format!(
            r#"{{
                "mouse": {{
                    "movementVelocity": 400.0,
                    "movementAcceleration": 900.0,
                    "mouseJitter": 0.2,
                    "clickFrequencyPerMin": {clicks},
                    "multiClickRatePerMin": 1.0,
                    "pathEfficiency": 0.85,
                    "pauseRatio": 0.3,
                    "scrollVelocity": 200.0
                }},
                "keyboard": {{
                    "typingErrorRate": 0.04,
                    "typingSpeedPerMin": 220.0,
                    "pauseRegularity": 0.3,
                    "avgPauseDuration": 600.0
                }},
                "scroll": {{ "velocity": 200.0 }},
                "timestamp": "{ts}"
            }}"#
        ))
        .unwrap()
    }

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        calmflux_free_string(ptr);
        s
    }

    #[test]
    fn test_ffi_engine_lifecycle() {
        unsafe {
            let config = CString::new(r#"{ "calibrationDurationSeconds": 5 }"#).unwrap();
            let engine = calmflux_engine_new(config.as_ptr(), ptr::null());
            assert!(!engine.is_null());

            let source = CString::new("tab-1").unwrap();
            assert_eq!(calmflux_start_calibration(engine, T0_MS), 0);

            let first = take_string(calmflux_tick(engine, T0_MS));
            assert!(first.contains("\"status\":\"calibrating\""));

            for i in 0..=5 {
                let ts = T0_MS + i * 1000;
                let json = snapshot_json(ts, 9.0 + (i % 2) as f64);
                assert_eq!(
                    calmflux_push_snapshot(engine, source.as_ptr(), json.as_ptr(), ts),
                    0
                );
            }

            let scored = take_string(calmflux_tick(engine, T0_MS + 6000));
            let value: serde_json::Value = serde_json::from_str(&scored).unwrap();
            assert_eq!(value["outcome"]["status"], "scored");
            assert_eq!(value["producer"]["name"], crate::PRODUCER_NAME);

            assert_eq!(calmflux_record_shown(engine, T0_MS + 7000), 0);
            assert_eq!(calmflux_record_dismissed(engine, T0_MS + 8000), 0);

            let status = take_string(calmflux_tick(engine, T0_MS + 9000));
            assert!(status.contains("\"state\":\"cooling_down\""));

            assert_eq!(calmflux_reset(engine), 0);
            let reset = take_string(calmflux_tick(engine, T0_MS + 10_000));
            assert!(reset.contains("\"status\":\"uncalibrated\""));

            calmflux_engine_free(engine);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let bad_config = CString::new(r#"{ "calibrationDurationSeconds": 0 }"#).unwrap();
            let engine = calmflux_engine_new(bad_config.as_ptr(), ptr::null());
            assert!(engine.is_null());
            let error = CStr::from_ptr(calmflux_last_error()).to_str().unwrap();
            assert!(error.contains("calibrationDurationSeconds"));

            let engine = calmflux_engine_new(ptr::null(), ptr::null());
            let source = CString::new("tab-1").unwrap();
            let invalid = CString::new("not json").unwrap();
            assert_eq!(
                calmflux_push_snapshot(engine, source.as_ptr(), invalid.as_ptr(), T0_MS),
                -1
            );
            assert!(!calmflux_last_error().is_null());

            assert_eq!(calmflux_record_shown(ptr::null_mut(), T0_MS), -1);
            assert!(calmflux_tick(ptr::null_mut(), T0_MS).is_null());

            calmflux_engine_free(engine);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = calmflux_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, env!("CARGO_PKG_VERSION"));
        }
    }
}
