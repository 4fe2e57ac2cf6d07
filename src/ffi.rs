//! FFI bindings for MindWell Core
//!
//! C-compatible functions for driving a [`WellnessCore`] from a host shell.
//! A core lives behind an opaque handle. Structured results are returned as
//! JSON strings allocated by this library; free them with
//! `mindwell_free_string`. On failure functions return NULL (or -1) and
//! record a message retrievable with `mindwell_last_error`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use serde::Serialize;

use crate::config::CoreConfig;
use crate::crisis;
use crate::error::CoreError;
use crate::pipeline::WellnessCore;
use crate::types::{ConsentSettings, Intensity};

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

/// Convert a C string to an owned Rust string; NULL or invalid UTF-8 yields None
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Like `cstr_to_string`, recording an error naming the argument when missing
unsafe fn required_arg(ptr: *const c_char, name: &str) -> Option<String> {
    let value = cstr_to_string(ptr);
    if value.is_none() {
        set_last_error(&format!("Invalid {} string pointer", name));
    }
    value
}

/// Convert a Rust string to a C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => {
            set_last_error("Result contains an interior NUL byte");
            ptr::null_mut()
        }
    }
}

/// Serialize a result as JSON, or record the error and return NULL
fn json_result<T: Serialize>(result: Result<T, CoreError>) -> *mut c_char {
    match result.and_then(|value| serde_json::to_string(&value).map_err(CoreError::from)) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Map a unit result to a status code
fn status_result(result: Result<(), CoreError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Borrow the core behind a handle, recording an error for NULL
unsafe fn core_mut<'a>(handle: *mut MindwellHandle) -> Option<&'a mut WellnessCore> {
    if handle.is_null() {
        set_last_error("Null core handle");
        return None;
    }
    Some(&mut (*handle).core)
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Opaque handle to a WellnessCore
pub struct MindwellHandle {
    core: WellnessCore,
}

/// Open a core.
///
/// # Safety
/// - `db_path` is a null-terminated path to the database file, or NULL for an
///   in-memory database.
/// - `config_json` is a null-terminated JSON configuration, or NULL for defaults.
/// - Returns a handle that must be freed with `mindwell_core_free`, or NULL on error.
#[no_mangle]
pub unsafe extern "C" fn mindwell_core_new(
    db_path: *const c_char,
    config_json: *const c_char,
) -> *mut MindwellHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        CoreConfig::default()
    } else {
        let Some(json) = required_arg(config_json, "config") else {
            return ptr::null_mut();
        };
        match CoreConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    let core = if db_path.is_null() {
        WellnessCore::in_memory(config)
    } else {
        let Some(path) = required_arg(db_path, "db_path") else {
            return ptr::null_mut();
        };
        WellnessCore::open(path, config)
    };

    match core {
        Ok(core) => Box::into_raw(Box::new(MindwellHandle { core })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a core. The session key is zeroed.
///
/// # Safety
/// - `handle` must be a pointer returned by `mindwell_core_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn mindwell_core_free(handle: *mut MindwellHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

// ============================================================================
// Account and Session
// ============================================================================

/// Returns 1 if an account exists, 0 if not, -1 on error.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
#[no_mangle]
pub unsafe extern "C" fn mindwell_has_account(handle: *mut MindwellHandle) -> i32 {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return -1;
    };
    match core.has_account() {
        Ok(exists) => i32::from(exists),
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Create the account and unlock. Returns the user summary as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - `password` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `mindwell_free_string`.
#[no_mangle]
pub unsafe extern "C" fn mindwell_create_account(
    handle: *mut MindwellHandle,
    password: *const c_char,
) -> *mut c_char {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return ptr::null_mut();
    };
    let Some(password) = required_arg(password, "password") else {
        return ptr::null_mut();
    };
    json_result(core.create_account(&password))
}

/// Unlock the session. Returns 0 on success, -1 on error.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - `password` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn mindwell_unlock(
    handle: *mut MindwellHandle,
    password: *const c_char,
) -> i32 {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return -1;
    };
    let Some(password) = required_arg(password, "password") else {
        return -1;
    };
    status_result(core.unlock(&password))
}

/// Unlock with a base64 key previously returned by `mindwell_export_key`.
///
/// Returns 0 on success, -1 on error.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - `exported_key` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn mindwell_unlock_with_key(
    handle: *mut MindwellHandle,
    exported_key: *const c_char,
) -> i32 {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return -1;
    };
    let Some(exported_key) = required_arg(exported_key, "exported_key") else {
        return -1;
    };
    status_result(core.unlock_with_exported_key(&exported_key))
}

/// Lock the session.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn mindwell_lock(handle: *mut MindwellHandle) {
    if let Some(core) = core_mut(handle) {
        core.lock();
    }
}

/// Returns 1 when unlocked, 0 otherwise.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn mindwell_is_unlocked(handle: *mut MindwellHandle) -> i32 {
    core_mut(handle).map_or(0, |core| i32::from(core.is_unlocked()))
}

/// Export the session key as base64.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - Returns a newly allocated string that must be freed with `mindwell_free_string`.
#[no_mangle]
pub unsafe extern "C" fn mindwell_export_key(handle: *mut MindwellHandle) -> *mut c_char {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return ptr::null_mut();
    };
    match core.export_key() {
        Ok(key) => string_to_cstr(&key),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Mood
// ============================================================================

/// Log a mood entry. Returns the gated result as JSON
/// (`{"status":"accepted",...}` or `{"status":"crisis",...}`).
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - `note` must be a valid null-terminated C string.
/// - `tags_json` is a JSON array of strings, or NULL for no tags.
/// - Returns a newly allocated string that must be freed with `mindwell_free_string`.
#[no_mangle]
pub unsafe extern "C" fn mindwell_log_mood(
    handle: *mut MindwellHandle,
    intensity: u8,
    note: *const c_char,
    tags_json: *const c_char,
) -> *mut c_char {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return ptr::null_mut();
    };
    let Some(note) = required_arg(note, "note") else {
        return ptr::null_mut();
    };
    let tags: Vec<String> = if tags_json.is_null() {
        Vec::new()
    } else {
        let Some(json) = required_arg(tags_json, "tags") else {
            return ptr::null_mut();
        };
        match serde_json::from_str(&json) {
            Ok(tags) => tags,
            Err(e) => {
                set_last_error(&CoreError::from(e).to_string());
                return ptr::null_mut();
            }
        }
    };
    json_result(core.log_mood(intensity, &note, tags))
}

/// Most recent `limit` entries as a JSON array.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - Returns a newly allocated string that must be freed with `mindwell_free_string`.
#[no_mangle]
pub unsafe extern "C" fn mindwell_recent_entries(
    handle: *mut MindwellHandle,
    limit: u32,
) -> *mut c_char {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return ptr::null_mut();
    };
    json_result(core.recent_entries(limit as usize))
}

/// Delete one entry. Returns 1 if it existed, 0 if not, -1 on error.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - `entry_id` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn mindwell_delete_entry(
    handle: *mut MindwellHandle,
    entry_id: *const c_char,
) -> i32 {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return -1;
    };
    let Some(entry_id) = required_arg(entry_id, "entry_id") else {
        return -1;
    };
    match core.delete_entry(&entry_id) {
        Ok(existed) => i32::from(existed),
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Current baseline as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - Returns a newly allocated string that must be freed with `mindwell_free_string`.
#[no_mangle]
pub unsafe extern "C" fn mindwell_baseline(handle: *mut MindwellHandle) -> *mut c_char {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return ptr::null_mut();
    };
    json_result(core.baseline())
}

/// Recommendation for local `hour` as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - Returns a newly allocated string that must be freed with `mindwell_free_string`.
#[no_mangle]
pub unsafe extern "C" fn mindwell_recommendation(
    handle: *mut MindwellHandle,
    hour: u32,
) -> *mut c_char {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return ptr::null_mut();
    };
    json_result(core.recommendation(hour))
}

/// Dashboard insights as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - Returns a newly allocated string that must be freed with `mindwell_free_string`.
#[no_mangle]
pub unsafe extern "C" fn mindwell_insights(handle: *mut MindwellHandle) -> *mut c_char {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return ptr::null_mut();
    };
    json_result(core.insights(chrono::Utc::now()))
}

/// Scan text for crisis language. Stateless; stores nothing.
///
/// # Safety
/// - `text` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `mindwell_free_string`.
#[no_mangle]
pub unsafe extern "C" fn mindwell_scan_text(text: *const c_char) -> *mut c_char {
    clear_last_error();
    let Some(text) = required_arg(text, "text") else {
        return ptr::null_mut();
    };
    json_result(Ok(crisis::scan(&text)))
}

// ============================================================================
// Interventions
// ============================================================================

/// Record the start of an intervention. Returns the run as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - `intervention_id` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `mindwell_free_string`.
#[no_mangle]
pub unsafe extern "C" fn mindwell_intervention_start(
    handle: *mut MindwellHandle,
    intervention_id: *const c_char,
) -> *mut c_char {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return ptr::null_mut();
    };
    let Some(intervention_id) = required_arg(intervention_id, "intervention_id") else {
        return ptr::null_mut();
    };
    json_result(core.record_intervention_start(&intervention_id))
}

/// Complete an intervention run. Returns the gated result as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - `run_id` must be a valid null-terminated C string.
/// - `effectiveness` is 1-5, or 0 when not rated.
/// - `outcome` is a null-terminated C string, or NULL when there is none.
/// - Returns a newly allocated string that must be freed with `mindwell_free_string`.
#[no_mangle]
pub unsafe extern "C" fn mindwell_intervention_end(
    handle: *mut MindwellHandle,
    run_id: *const c_char,
    effectiveness: u8,
    outcome: *const c_char,
) -> *mut c_char {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return ptr::null_mut();
    };
    let Some(run_id) = required_arg(run_id, "run_id") else {
        return ptr::null_mut();
    };
    let rating = if effectiveness == 0 {
        None
    } else {
        match Intensity::new(effectiveness) {
            Ok(rating) => Some(rating),
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };
    let outcome = if outcome.is_null() {
        None
    } else {
        let Some(text) = required_arg(outcome, "outcome") else {
            return ptr::null_mut();
        };
        Some(text)
    };
    json_result(core.record_intervention_end(&run_id, rating, outcome.as_deref()))
}

// ============================================================================
// Consent, Export and Deletion
// ============================================================================

/// Current consent settings as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - Returns a newly allocated string that must be freed with `mindwell_free_string`.
#[no_mangle]
pub unsafe extern "C" fn mindwell_consent(handle: *mut MindwellHandle) -> *mut c_char {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return ptr::null_mut();
    };
    json_result(core.consent())
}

/// Replace consent settings from JSON. Returns 0 on success, -1 on error.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - `settings_json` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn mindwell_update_consent(
    handle: *mut MindwellHandle,
    settings_json: *const c_char,
) -> i32 {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return -1;
    };
    let Some(json) = required_arg(settings_json, "settings") else {
        return -1;
    };
    let settings = serde_json::from_str::<ConsentSettings>(&json).map_err(CoreError::from);
    status_result(settings.and_then(|settings| core.update_consent(settings)))
}

/// Decrypted export of all data as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - Returns a newly allocated string that must be freed with `mindwell_free_string`.
#[no_mangle]
pub unsafe extern "C" fn mindwell_export_all(handle: *mut MindwellHandle) -> *mut c_char {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return ptr::null_mut();
    };
    json_result(core.export_all())
}

/// Delete the account and all data. Returns removed record counts as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - `confirmation` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `mindwell_free_string`.
#[no_mangle]
pub unsafe extern "C" fn mindwell_wipe_all(
    handle: *mut MindwellHandle,
    confirmation: *const c_char,
) -> *mut c_char {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return ptr::null_mut();
    };
    let Some(confirmation) = required_arg(confirmation, "confirmation") else {
        return ptr::null_mut();
    };
    json_result(core.wipe_all(&confirmation))
}

/// Destroy a locked account whose password was forgotten.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `mindwell_core_new`.
/// - `confirmation` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `mindwell_free_string`.
#[no_mangle]
pub unsafe extern "C" fn mindwell_reset_forgotten_password(
    handle: *mut MindwellHandle,
    confirmation: *const c_char,
) -> *mut c_char {
    clear_last_error();
    let Some(core) = core_mut(handle) else {
        return ptr::null_mut();
    };
    let Some(confirmation) = required_arg(confirmation, "confirmation") else {
        return ptr::null_mut();
    };
    json_result(core.reset_forgotten_password(&confirmation))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by MindWell functions.
///
/// # Safety
/// - `ptr` must be a pointer returned by a MindWell function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn mindwell_free_string(ptr: *mut c_char) {
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
/// - Returns a pointer to a thread-local error string, valid until the next
///   MindWell call on this thread. Do NOT free it.
/// - Returns NULL if the last call succeeded.
#[no_mangle]
pub unsafe extern "C" fn mindwell_last_error() -> *const c_char {
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
pub unsafe extern "C" fn mindwell_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
