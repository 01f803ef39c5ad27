use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::Arc;

use rusqlite::ffi;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::stmt::CompiledStatement;
use crate::value::Value;

/// Column counts at or below this stay off the heap, both for names and
/// for per-row value staging.
#[doc(hidden)]
pub const INLINE_COLUMNS: usize = 12;

#[doc(hidden)]
pub type RowValues = SmallVec<[Value; INLINE_COLUMNS]>;

/// A row in hash mode: column name to value.
pub type HashRow = HashMap<Arc<str>, Value>;

/// Column names of a compiled statement, read once per invocation and
/// shared across the rows it produces.
#[doc(hidden)]
#[derive(Debug, Default, Clone)]
pub struct ColumnNames(SmallVec<[Arc<str>; INLINE_COLUMNS]>);

impl ColumnNames {
    pub(crate) fn read(stmt: &CompiledStatement) -> Result<Self> {
        let count = stmt.column_count();
        let mut names = SmallVec::with_capacity(count);
        for i in 0..count {
            let ptr = unsafe { ffi::sqlite3_column_name(stmt.as_ptr(), i as i32) };
            if ptr.is_null() {
                return Err(Error::engine(
                    ffi::SQLITE_NOMEM,
                    format!("failed to read name of column {}", i),
                ));
            }
            let name = unsafe { CStr::from_ptr(ptr) }.to_string_lossy();
            names.push(Arc::<str>::from(name.as_ref()));
        }
        Ok(Self(names))
    }

    pub(crate) fn get(&self, i: usize) -> &Arc<str> {
        &self.0[i]
    }

    pub(crate) fn to_vec(&self) -> Vec<Arc<str>> {
        self.0.to_vec()
    }
}

/// Reads one column value, mapping the engine storage class to [`Value`].
pub(crate) fn column_value(stmt: &CompiledStatement, col: usize) -> Result<Value> {
    let p = stmt.as_ptr();
    let col = col as i32;
    let value = unsafe {
        match ffi::sqlite3_column_type(p, col) {
            ffi::SQLITE_NULL => Value::Null,
            ffi::SQLITE_INTEGER => Value::Integer(ffi::sqlite3_column_int64(p, col)),
            ffi::SQLITE_FLOAT => Value::Real(ffi::sqlite3_column_double(p, col)),
            ffi::SQLITE_TEXT => {
                let ptr = ffi::sqlite3_column_text(p, col);
                let len = ffi::sqlite3_column_bytes(p, col) as usize;
                if ptr.is_null() {
                    Value::Text(String::new())
                } else {
                    let bytes = std::slice::from_raw_parts(ptr, len);
                    Value::Text(String::from_utf8_lossy(bytes).into_owned())
                }
            }
            ffi::SQLITE_BLOB => {
                let ptr = ffi::sqlite3_column_blob(p, col);
                let len = ffi::sqlite3_column_bytes(p, col) as usize;
                if ptr.is_null() {
                    Value::Blob(Vec::new())
                } else {
                    let bytes = std::slice::from_raw_parts(ptr as *const u8, len);
                    Value::Blob(bytes.to_vec())
                }
            }
            other => return Err(Error::engine(other, format!("unknown column type: {}", other))),
        }
    };
    Ok(value)
}

/// Stages the current row's values.
pub(crate) fn read_row(stmt: &CompiledStatement, column_count: usize) -> Result<RowValues> {
    let mut values = SmallVec::with_capacity(column_count);
    for i in 0..column_count {
        values.push(column_value(stmt, i)?);
    }
    Ok(values)
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Hash {}
    impl Sealed for super::Ary {}
    impl Sealed for super::Splat {}
}

/// The shape rows are delivered in.
///
/// [`Hash`] maps column names to values, [`Ary`] keeps the values in
/// column order, and [`Splat`] delivers the single column's value
/// directly (a splat query fails unless the result has exactly one
/// column).
pub trait QueryMode: sealed::Sealed + 'static {
    type Row;

    #[doc(hidden)]
    const NEEDS_NAMES: bool;

    #[doc(hidden)]
    fn check(column_count: usize) -> Result<()>;

    #[doc(hidden)]
    fn shape(names: &ColumnNames, values: RowValues) -> Self::Row;
}

pub struct Hash;
pub struct Ary;
pub struct Splat;

impl QueryMode for Hash {
    type Row = HashRow;

    const NEEDS_NAMES: bool = true;

    fn check(_column_count: usize) -> Result<()> {
        Ok(())
    }

    fn shape(names: &ColumnNames, values: RowValues) -> HashRow {
        let mut row = HashMap::with_capacity(values.len());
        for (i, value) in values.into_iter().enumerate() {
            row.insert(names.get(i).clone(), value);
        }
        row
    }
}

impl QueryMode for Ary {
    type Row = Vec<Value>;

    const NEEDS_NAMES: bool = false;

    fn check(_column_count: usize) -> Result<()> {
        Ok(())
    }

    fn shape(_names: &ColumnNames, values: RowValues) -> Vec<Value> {
        values.into_vec()
    }
}

impl QueryMode for Splat {
    type Row = Value;

    const NEEDS_NAMES: bool = false;

    fn check(column_count: usize) -> Result<()> {
        if column_count == 1 {
            Ok(())
        } else {
            Err(Error::argument(
                "expected query result to have a single column",
            ))
        }
    }

    fn shape(_names: &ColumnNames, values: RowValues) -> Value {
        values.into_iter().next().unwrap_or(Value::Null)
    }
}
