use std::ffi::{CStr, c_char, c_int};
use std::ptr;

use rusqlite::ffi;

use crate::error::{Error, Result};
use crate::permit::{ExecutionPermit, with_released};

/// A compiled engine statement.
///
/// Owns the raw statement handle; finalization happens on drop, so every
/// exit path of the query engine releases the statement deterministically.
pub(crate) struct CompiledStatement {
    ptr: *mut ffi::sqlite3_stmt,
}

impl CompiledStatement {
    fn new(ptr: *mut ffi::sqlite3_stmt) -> Self {
        Self { ptr }
    }

    pub(crate) fn as_ptr(&self) -> *mut ffi::sqlite3_stmt {
        self.ptr
    }

    pub(crate) fn reset(&self) {
        unsafe {
            ffi::sqlite3_reset(self.ptr);
        }
    }

    pub(crate) fn clear_bindings(&self) {
        unsafe {
            ffi::sqlite3_clear_bindings(self.ptr);
        }
    }

    pub(crate) fn column_count(&self) -> usize {
        unsafe { ffi::sqlite3_column_count(self.ptr) as usize }
    }

    /// Whether the statement has been stepped and not yet reset.
    pub(crate) fn is_executing(&self) -> bool {
        unsafe { ffi::sqlite3_stmt_busy(self.ptr) != 0 }
    }

    pub(crate) fn counter(&self, op: c_int, reset: bool) -> i32 {
        unsafe { ffi::sqlite3_stmt_status(self.ptr, op, if reset { 1 } else { 0 }) }
    }

    #[cfg(test)]
    pub(crate) fn null_for_tests() -> Self {
        Self::new(ptr::null_mut())
    }
}

impl Drop for CompiledStatement {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                ffi::sqlite3_finalize(self.ptr);
            }
            self.ptr = ptr::null_mut();
        }
    }
}

/// The engine's error message for a connection, lossily decoded.
pub(crate) fn db_errmsg(db: *mut ffi::sqlite3) -> String {
    unsafe { CStr::from_ptr(ffi::sqlite3_errmsg(db)) }
        .to_string_lossy()
        .into_owned()
}

/// A result-code description independent of any connection.
pub(crate) fn rc_errstr(rc: c_int) -> String {
    unsafe { CStr::from_ptr(ffi::sqlite3_errstr(rc)) }
        .to_string_lossy()
        .into_owned()
}

/// Extended result codes are enabled at open; classification happens on
/// the primary code.
pub(crate) fn primary_code(rc: c_int) -> c_int {
    rc & 0xff
}

fn prepare_error(db: *mut ffi::sqlite3, rc: c_int) -> Error {
    match primary_code(rc) {
        ffi::SQLITE_BUSY => Error::Busy,
        ffi::SQLITE_ERROR => {
            let message = db_errmsg(db);
            log::error!("prepare failed: {}", message);
            Error::Sql(message)
        }
        code => Error::engine(code, db_errmsg(db)),
    }
}

fn run_compile<T>(permit: Option<&dyn ExecutionPermit>, f: impl FnOnce() -> T) -> T {
    match permit {
        Some(permit) => with_released(permit, f),
        None => f(),
    }
}

struct PreparedPiece {
    stmt: CompiledStatement,
    consumed: usize,
}

/// Compiles the next statement from `sql[offset..]`. Returns the
/// statement (null when the remainder is only whitespace or comments) and
/// the number of bytes consumed.
fn prepare_piece(
    db: *mut ffi::sqlite3,
    sql: &str,
    offset: usize,
    permit: Option<&dyn ExecutionPermit>,
) -> Result<PreparedPiece> {
    let bytes = &sql.as_bytes()[offset..];
    let head = bytes.as_ptr() as *const c_char;
    let mut stmt_ptr: *mut ffi::sqlite3_stmt = ptr::null_mut();
    let mut tail: *const c_char = ptr::null();

    let rc = run_compile(permit, || unsafe {
        ffi::sqlite3_prepare_v2(db, head, bytes.len() as c_int, &mut stmt_ptr, &mut tail)
    });
    // Wrap before the error check so a partially-compiled statement is
    // finalized even when the compile failed.
    let stmt = CompiledStatement::new(stmt_ptr);
    if rc != ffi::SQLITE_OK {
        return Err(prepare_error(db, rc));
    }

    let consumed = unsafe { tail.offset_from(head) } as usize;
    Ok(PreparedPiece { stmt, consumed })
}

/// Steps a statement to completion, discarding its results. Used for the
/// leading statements of a multi-statement script.
fn run_to_completion(
    db: *mut ffi::sqlite3,
    stmt: &CompiledStatement,
    permit: Option<&dyn ExecutionPermit>,
) -> Result<()> {
    loop {
        let rc = run_compile(permit, || unsafe { ffi::sqlite3_step(stmt.as_ptr()) });
        match primary_code(rc) {
            ffi::SQLITE_ROW => continue,
            ffi::SQLITE_DONE => return Ok(()),
            ffi::SQLITE_BUSY => return Err(Error::Busy),
            ffi::SQLITE_INTERRUPT => return Err(Error::Interrupted),
            ffi::SQLITE_ERROR => return Err(Error::sql(db_errmsg(db))),
            code => return Err(Error::engine(code, db_errmsg(db))),
        }
    }
}

/// Prepares an SQL string containing one or more statements. All
/// statements except the last are executed to completion and finalized;
/// the last is returned compiled for iteration.
pub(crate) fn prepare_multi(
    db: *mut ffi::sqlite3,
    sql: &str,
    permit: Option<&dyn ExecutionPermit>,
) -> Result<CompiledStatement> {
    let mut offset = 0usize;
    loop {
        let piece = prepare_piece(db, sql, offset, permit)?;
        offset += piece.consumed;

        if sql[offset..].trim().is_empty() {
            if piece.stmt.as_ptr().is_null() {
                return Err(Error::argument("SQL string contains no statement"));
            }
            return Ok(piece.stmt);
        }

        // Not the last statement: run it for effect and let the wrapper
        // finalize it before moving on.
        run_to_completion(db, &piece.stmt, permit)?;
    }
}

/// Prepares exactly one statement; trailing non-whitespace SQL is an
/// error.
pub(crate) fn prepare_single(
    db: *mut ffi::sqlite3,
    sql: &str,
    permit: Option<&dyn ExecutionPermit>,
) -> Result<CompiledStatement> {
    let piece = prepare_piece(db, sql, 0, permit)?;
    if piece.stmt.as_ptr().is_null() {
        return Err(Error::argument("SQL string contains no statement"));
    }
    if !sql[piece.consumed..].trim().is_empty() {
        return Err(Error::argument(
            "a prepared statement accepts a single SQL statement",
        ));
    }
    Ok(piece.stmt)
}
