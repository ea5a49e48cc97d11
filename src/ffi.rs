//! FFI bindings for BCBA Sync
//!
//! C-compatible functions for driving backups from a mobile host. The host owns
//! its database; it hands over a store snapshot as JSON and gets JSON back.
//! All functions use C strings (null-terminated) and return allocated memory
//! that must be freed by the caller using `bcba_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

use crate::exporter::Exporter;
use crate::importer::{ImportStrategy, Importer};
use crate::schema::{decode_document, encode_document};
use crate::store::{MemoryStore, StoreSnapshot};

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

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Caller must free the result
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Hand a result across the boundary, recording the error on failure
fn finish(result: Result<String, String>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(message) => {
            set_last_error(&message);
            ptr::null_mut()
        }
    }
}

fn load_store(snapshot_json: &str) -> Result<Arc<MemoryStore>, String> {
    let snapshot: StoreSnapshot =
        serde_json::from_str(snapshot_json).map_err(|e| format!("Invalid store snapshot: {e}"))?;
    MemoryStore::from_snapshot(snapshot)
        .map(Arc::new)
        .map_err(|e| e.to_string())
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|e| format!("Failed to start runtime: {e}"))?;
    Ok(runtime.block_on(future))
}

fn export_snapshot(snapshot_json: &str, device_name: &str, app_version: &str) -> Result<String, String> {
    let store = load_store(snapshot_json)?;
    let exporter = Exporter::new(store, device_name, app_version);
    let bytes = block_on(exporter.export_to_bytes())?.map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}

fn import_snapshot(snapshot_json: &str, backup_json: &str, strategy: &str) -> Result<String, String> {
    let strategy: ImportStrategy = strategy.parse().map_err(|e: String| e)?;
    let store = load_store(snapshot_json)?;
    let importer = Importer::new(store.clone());
    block_on(importer.import_bytes(backup_json.as_bytes(), strategy))?.map_err(|e| e.to_string())?;
    let snapshot = store.snapshot().map_err(|e| e.to_string())?;
    serde_json::to_string(&snapshot).map_err(|e| e.to_string())
}

fn backup_metadata(backup_json: &str) -> Result<String, String> {
    let document = decode_document(backup_json.as_bytes()).map_err(|e| format!("Malformed backup: {e}"))?;
    serde_json::to_string(&document.metadata).map_err(|e| e.to_string())
}

// ============================================================================
// Backup API
// ============================================================================

/// Export a store snapshot to backup document JSON.
///
/// # Safety
/// - `snapshot_json`, `device_name`, and `app_version` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `bcba_free_string`.
/// - Returns NULL on error; call `bcba_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn bcba_export_snapshot(
    snapshot_json: *const c_char,
    device_name: *const c_char,
    app_version: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(snapshot) = cstr_to_string(snapshot_json) else {
        set_last_error("Invalid snapshot string pointer");
        return ptr::null_mut();
    };
    let Some(device) = cstr_to_string(device_name) else {
        set_last_error("Invalid device_name string pointer");
        return ptr::null_mut();
    };
    let Some(version) = cstr_to_string(app_version) else {
        set_last_error("Invalid app_version string pointer");
        return ptr::null_mut();
    };

    finish(export_snapshot(&snapshot, &device, &version))
}

/// Import a backup document into a store snapshot and return the new snapshot.
///
/// `strategy` is one of `merge`, `replace` or `skip`. The input snapshot is
/// never modified; on error nothing is returned.
///
/// # Safety
/// - `snapshot_json`, `backup_json`, and `strategy` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `bcba_free_string`.
/// - Returns NULL on error; call `bcba_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn bcba_import_snapshot(
    snapshot_json: *const c_char,
    backup_json: *const c_char,
    strategy: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(snapshot) = cstr_to_string(snapshot_json) else {
        set_last_error("Invalid snapshot string pointer");
        return ptr::null_mut();
    };
    let Some(backup) = cstr_to_string(backup_json) else {
        set_last_error("Invalid backup string pointer");
        return ptr::null_mut();
    };
    let Some(strategy) = cstr_to_string(strategy) else {
        set_last_error("Invalid strategy string pointer");
        return ptr::null_mut();
    };

    finish(import_snapshot(&snapshot, &backup, &strategy))
}

/// Read the metadata block of a backup document.
///
/// # Safety
/// - `backup_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `bcba_free_string`.
/// - Returns NULL on error; call `bcba_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn bcba_backup_metadata(backup_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(backup) = cstr_to_string(backup_json) else {
        set_last_error("Invalid backup string pointer");
        return ptr::null_mut();
    };

    finish(backup_metadata(&backup))
}

/// Re-encode a backup document in canonical form.
///
/// # Safety
/// - `backup_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `bcba_free_string`.
/// - Returns NULL on error; call `bcba_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn bcba_canonicalize_backup(backup_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(backup) = cstr_to_string(backup_json) else {
        set_last_error("Invalid backup string pointer");
        return ptr::null_mut();
    };

    let result = decode_document(backup.as_bytes())
        .and_then(|document| encode_document(&document))
        .map_err(|e| e.to_string())
        .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()));
    finish(result)
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by BCBA Sync functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a BCBA Sync function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn bcba_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next BCBA Sync call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn bcba_last_error() -> *const c_char {
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
pub unsafe extern "C" fn bcba_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
