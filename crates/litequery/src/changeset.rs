use std::ffi::{CStr, CString, c_int, c_void};
use std::marker::PhantomData;
use std::ptr;

use rusqlite::ffi;

use crate::database::Database;
use crate::error::{Error, Result};
use crate::stmt::rc_errstr;
use crate::value::Value;

/// The kind of row change a changeset entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangesetOp {
    Insert,
    Update,
    Delete,
}

/// One row-level change.
///
/// Inserts carry only new values, deletes only old values, updates both.
/// Columns an update did not touch are `Value::Null` placeholders in both
/// lists, as recorded by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangesetEntry {
    pub op: ChangesetOp,
    pub table: String,
    pub old_values: Option<Vec<Value>>,
    pub new_values: Option<Vec<Value>>,
}

/// How [`Changeset::apply_with`] resolves conflicting changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Skip the conflicting change.
    Omit,
    /// Apply the change anyway, replacing the conflicting row.
    Replace,
    /// Abort the whole application.
    Abort,
}

impl ConflictResolution {
    fn code(self) -> c_int {
        match self {
            ConflictResolution::Omit => ffi::SQLITE_CHANGESET_OMIT,
            ConflictResolution::Replace => ffi::SQLITE_CHANGESET_REPLACE,
            ConflictResolution::Abort => ffi::SQLITE_CHANGESET_ABORT,
        }
    }
}

fn session_error(what: &str, rc: c_int) -> Error {
    Error::engine(rc, format!("{}: {}", what, rc_errstr(rc)))
}

struct SessionGuard(*mut ffi::sqlite3_session);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        unsafe { ffi::sqlite3session_delete(self.0) };
    }
}

/// A binary record of row-level changes captured on attached tables.
///
/// Produced by [`track`](Self::track) (or
/// [`Database::track_changes`]), loaded from serialized bytes, or derived
/// by [`invert`](Self::invert).
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    data: Option<Vec<u8>>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps previously serialized changeset bytes.
    pub fn load(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(bytes.into()),
        }
    }

    /// The serialized changeset; empty until something was tracked.
    pub fn to_blob(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Captures the changes `f` makes to `db` into this changeset,
    /// replacing any previous contents.
    ///
    /// `tables` names the tables to watch; `None` attaches all tables,
    /// and an empty slice attaches none (yielding an empty changeset).
    /// The underlying session is deleted on every exit path, including
    /// when `f` fails.
    pub fn track<F>(&mut self, db: &Database, tables: Option<&[&str]>, f: F) -> Result<()>
    where
        F: FnOnce(&Database) -> Result<()>,
    {
        let handle = db.raw_handle()?;
        self.data = None;

        let mut session: *mut ffi::sqlite3_session = ptr::null_mut();
        let rc = unsafe { ffi::sqlite3session_create(handle, c"main".as_ptr(), &mut session) };
        if rc != ffi::SQLITE_OK {
            return Err(session_error("error while creating session", rc));
        }
        let _guard = SessionGuard(session);

        match tables {
            Some(tables) => {
                for table in tables {
                    let name = CString::new(*table)
                        .map_err(|_| Error::argument("table name contains NUL"))?;
                    let rc = unsafe { ffi::sqlite3session_attach(session, name.as_ptr()) };
                    if rc != ffi::SQLITE_OK {
                        return Err(session_error("error while attaching session tables", rc));
                    }
                }
            }
            None => {
                let rc = unsafe { ffi::sqlite3session_attach(session, ptr::null()) };
                if rc != ffi::SQLITE_OK {
                    return Err(session_error("error while attaching all tables", rc));
                }
            }
        }

        f(db)?;

        let mut len: c_int = 0;
        let mut buf: *mut c_void = ptr::null_mut();
        let rc = unsafe { ffi::sqlite3session_changeset(session, &mut len, &mut buf) };
        if rc != ffi::SQLITE_OK {
            return Err(session_error(
                "error while collecting changeset from session",
                rc,
            ));
        }
        let bytes = if buf.is_null() {
            Vec::new()
        } else {
            let bytes =
                unsafe { std::slice::from_raw_parts(buf as *const u8, len as usize) }.to_vec();
            unsafe { ffi::sqlite3_free(buf) };
            bytes
        };
        log::debug!("captured changeset of {} bytes", bytes.len());
        self.data = Some(bytes);
        Ok(())
    }

    fn data(&self) -> Result<&[u8]> {
        self.data
            .as_deref()
            .ok_or_else(|| Error::argument("changeset not available"))
    }

    /// Iterates the recorded changes.
    pub fn iter(&self) -> Result<ChangesetIter<'_>> {
        let data = self.data()?;
        if data.is_empty() {
            return Ok(ChangesetIter {
                iter: ptr::null_mut(),
                _data: PhantomData,
            });
        }
        let mut iter: *mut ffi::sqlite3_changeset_iter = ptr::null_mut();
        let rc = unsafe {
            ffi::sqlite3changeset_start(&mut iter, data.len() as c_int, data.as_ptr() as *mut c_void)
        };
        if rc != ffi::SQLITE_OK {
            return Err(session_error("error while starting changeset iterator", rc));
        }
        Ok(ChangesetIter {
            iter,
            _data: PhantomData,
        })
    }

    /// Yields every recorded change to `f`.
    pub fn each(&self, mut f: impl FnMut(ChangesetEntry)) -> Result<()> {
        for entry in self.iter()? {
            f(entry?);
        }
        Ok(())
    }

    /// Materializes the recorded changes.
    pub fn to_a(&self) -> Result<Vec<ChangesetEntry>> {
        self.iter()?.collect()
    }

    /// A changeset that reverses this one when applied.
    pub fn invert(&self) -> Result<Changeset> {
        let data = self.data()?;
        if data.is_empty() {
            return Ok(Changeset::load(Vec::new()));
        }
        let mut len: c_int = 0;
        let mut buf: *mut c_void = ptr::null_mut();
        let rc = unsafe {
            ffi::sqlite3changeset_invert(
                data.len() as c_int,
                data.as_ptr() as *const c_void,
                &mut len,
                &mut buf,
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(session_error("error while inverting changeset", rc));
        }
        let bytes = if buf.is_null() {
            Vec::new()
        } else {
            let bytes =
                unsafe { std::slice::from_raw_parts(buf as *const u8, len as usize) }.to_vec();
            unsafe { ffi::sqlite3_free(buf) };
            bytes
        };
        Ok(Changeset::load(bytes))
    }

    /// Applies the changeset to `db`, resolving every conflict by
    /// applying the change anyway.
    pub fn apply(&self, db: &Database) -> Result<()> {
        self.apply_with(db, ConflictResolution::Replace)
    }

    /// Applies the changeset with an explicit conflict policy; every
    /// conflict kind maps to the one resolution.
    pub fn apply_with(&self, db: &Database, resolution: ConflictResolution) -> Result<()> {
        let handle = db.raw_handle()?;
        let data = self.data()?;
        if data.is_empty() {
            return Ok(());
        }
        let rc = unsafe {
            ffi::sqlite3changeset_apply(
                handle,
                data.len() as c_int,
                data.as_ptr() as *mut c_void,
                None,
                Some(conflict_trampoline),
                resolution.code() as isize as *mut c_void,
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(session_error("error while applying changeset", rc));
        }
        Ok(())
    }
}

unsafe extern "C" fn conflict_trampoline(
    ctx: *mut c_void,
    _conflict: c_int,
    _iter: *mut ffi::sqlite3_changeset_iter,
) -> c_int {
    ctx as isize as c_int
}

/// Iterator over the entries of a changeset. The engine-side iterator is
/// finalized on drop, on every exit path.
pub struct ChangesetIter<'a> {
    iter: *mut ffi::sqlite3_changeset_iter,
    _data: PhantomData<&'a [u8]>,
}

impl ChangesetIter<'_> {
    fn read_entry(&self) -> Result<ChangesetEntry> {
        let mut table: *const std::ffi::c_char = ptr::null();
        let mut column_count: c_int = 0;
        let mut op: c_int = 0;
        let mut indirect: c_int = 0;
        let rc = unsafe {
            ffi::sqlite3changeset_op(self.iter, &mut table, &mut column_count, &mut op, &mut indirect)
        };
        if rc != ffi::SQLITE_OK {
            return Err(session_error("error while reading changeset entry", rc));
        }

        let table = unsafe { CStr::from_ptr(table) }.to_string_lossy().into_owned();
        let op = match op {
            ffi::SQLITE_INSERT => ChangesetOp::Insert,
            ffi::SQLITE_UPDATE => ChangesetOp::Update,
            ffi::SQLITE_DELETE => ChangesetOp::Delete,
            other => {
                return Err(Error::engine(
                    other,
                    format!("invalid changeset op code {}", other),
                ));
            }
        };

        let old_values = if matches!(op, ChangesetOp::Update | ChangesetOp::Delete) {
            Some(self.read_values(column_count, false)?)
        } else {
            None
        };
        let new_values = if matches!(op, ChangesetOp::Update | ChangesetOp::Insert) {
            Some(self.read_values(column_count, true)?)
        } else {
            None
        };

        Ok(ChangesetEntry {
            op,
            table,
            old_values,
            new_values,
        })
    }

    fn read_values(&self, column_count: c_int, new: bool) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(column_count as usize);
        for i in 0..column_count {
            let mut value: *mut ffi::sqlite3_value = ptr::null_mut();
            let rc = unsafe {
                if new {
                    ffi::sqlite3changeset_new(self.iter, i, &mut value)
                } else {
                    ffi::sqlite3changeset_old(self.iter, i, &mut value)
                }
            };
            if rc != ffi::SQLITE_OK {
                return Err(session_error("error while reading changeset values", rc));
            }
            values.push(convert_raw_value(value)?);
        }
        Ok(values)
    }
}

impl Iterator for ChangesetIter<'_> {
    type Item = Result<ChangesetEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.iter.is_null() {
            return None;
        }
        match unsafe { ffi::sqlite3changeset_next(self.iter) } {
            ffi::SQLITE_ROW => Some(self.read_entry()),
            ffi::SQLITE_DONE => None,
            rc => Some(Err(session_error("error while iterating changeset", rc))),
        }
    }
}

impl Drop for ChangesetIter<'_> {
    fn drop(&mut self) {
        if !self.iter.is_null() {
            unsafe { ffi::sqlite3changeset_finalize(self.iter) };
            self.iter = ptr::null_mut();
        }
    }
}

fn convert_raw_value(value: *mut ffi::sqlite3_value) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let converted = unsafe {
        match ffi::sqlite3_value_type(value) {
            ffi::SQLITE_NULL => Value::Null,
            ffi::SQLITE_INTEGER => Value::Integer(ffi::sqlite3_value_int64(value)),
            ffi::SQLITE_FLOAT => Value::Real(ffi::sqlite3_value_double(value)),
            ffi::SQLITE_TEXT => {
                let ptr = ffi::sqlite3_value_text(value);
                let len = ffi::sqlite3_value_bytes(value) as usize;
                if ptr.is_null() {
                    Value::Text(String::new())
                } else {
                    let bytes = std::slice::from_raw_parts(ptr, len);
                    Value::Text(String::from_utf8_lossy(bytes).into_owned())
                }
            }
            ffi::SQLITE_BLOB => {
                let ptr = ffi::sqlite3_value_blob(value);
                let len = ffi::sqlite3_value_bytes(value) as usize;
                if ptr.is_null() {
                    Value::Blob(Vec::new())
                } else {
                    let bytes = std::slice::from_raw_parts(ptr as *const u8, len);
                    Value::Blob(bytes.to_vec())
                }
            }
            other => return Err(Error::engine(other, format!("invalid value type: {}", other))),
        }
    };
    Ok(converted)
}
