//! Translation of engine status codes into [`Error`] values

use crate::Error;
use std::ffi::{CStr, c_int};

const STATUS_NAMES: [&str; 27] = [
    "SQLITE_OK",
    "SQLITE_ERROR",
    "SQLITE_INTERNAL",
    "SQLITE_PERM",
    "SQLITE_ABORT",
    "SQLITE_BUSY",
    "SQLITE_LOCKED",
    "SQLITE_NOMEM",
    "SQLITE_READONLY",
    "SQLITE_INTERRUPT",
    "SQLITE_IOERR",
    "SQLITE_CORRUPT",
    "SQLITE_NOTFOUND",
    "SQLITE_FULL",
    "SQLITE_CANTOPEN",
    "SQLITE_PROTOCOL",
    "SQLITE_EMPTY",
    "SQLITE_SCHEMA",
    "SQLITE_TOOBIG",
    "SQLITE_CONSTRAINT",
    "SQLITE_MISMATCH",
    "SQLITE_MISUSE",
    "SQLITE_NOLFS",
    "SQLITE_AUTH",
    "SQLITE_FORMAT",
    "SQLITE_RANGE",
    "SQLITE_NOTADB",
];

/// Symbolic name of a primary result code, if it is one of the classic codes
pub fn status_name(code: c_int) -> Option<&'static str> {
    usize::try_from(code).ok().and_then(|index| STATUS_NAMES.get(index).copied())
}

/// Human readable description: "Result code 19 (SQLITE_CONSTRAINT)"
pub fn describe_status(code: c_int) -> String {
    match status_name(code) {
        Some(name) => format!("Result code {code} ({name})"),
        None => format!("Result code {code}"),
    }
}

/// Message of the most recent failure on the connection
pub(crate) fn engine_message(db: *mut libsqlite3_sys::sqlite3) -> String {
    let error_message = unsafe { libsqlite3_sys::sqlite3_errmsg(db) };
    if error_message.is_null() {
        return describe_status(libsqlite3_sys::SQLITE_NOMEM);
    }

    let c_str = unsafe { CStr::from_ptr(error_message) };
    c_str.to_string_lossy().into_owned()
}

/// Map a failed status code to the matching error
///
/// Busy is kept apart so callers can retry, a generic error carries the engine message,
/// everything else is reported by its code.
pub(crate) fn status_error(code: c_int, db: *mut libsqlite3_sys::sqlite3) -> Error {
    match code {
        libsqlite3_sys::SQLITE_BUSY => Error::DatabaseBusy,
        libsqlite3_sys::SQLITE_ERROR => Error::EngineError(engine_message(db)),
        _ => Error::EngineError(describe_status(code)),
    }
}

pub(crate) fn check_status(code: c_int, db: *mut libsqlite3_sys::sqlite3) -> crate::Result<()> {
    if code == libsqlite3_sys::SQLITE_OK {
        Ok(())
    } else {
        Err(status_error(code, db))
    }
}
