use std::marker::PhantomData;
use std::sync::Arc;

use rusqlite::ffi;

use crate::database::Database;
use crate::error::{Error, Result};
use crate::exec::strip_sql;
use crate::params::Params;
use crate::rows::{ColumnNames, Hash, QueryMode, read_row};
use crate::step::{Step, StepPolicy, step};
use crate::stmt::{self, CompiledStatement};

/// A reusable prepared query.
///
/// The compiled statement is created lazily on first use and finalized
/// when the query is closed or dropped. The row shape is fixed at
/// creation through the mode parameter ([`Hash`], [`Ary`](crate::Ary) or
/// [`Splat`](crate::Splat)).
///
/// `next` continues from the current position; `each`, `to_a` and
/// `execute` rewind to row 0 first. Bindings survive a rewind until
/// [`bind`](Self::bind) replaces them.
pub struct Query<'db, M: QueryMode = Hash> {
    db: &'db Database,
    sql: String,
    stmt: Option<CompiledStatement>,
    names: ColumnNames,
    eof: bool,
    closed: bool,
    step_count: u64,
    _mode: PhantomData<M>,
}

impl<'db, M: QueryMode> Query<'db, M> {
    pub(crate) fn new(db: &'db Database, sql: &str) -> Result<Self> {
        let sql = strip_sql(sql)?.to_string();
        Ok(Self {
            db,
            sql,
            stmt: None,
            names: ColumnNames::default(),
            eof: false,
            closed: false,
            step_count: 0,
            _mode: PhantomData,
        })
    }

    fn ensure_stmt(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed("query"));
        }
        if self.stmt.is_some() {
            return Ok(());
        }
        let handle = self.db.raw_handle()?;
        let stmt = stmt::prepare_single(handle, &self.sql, self.db.compile_permit().as_deref())?;
        M::check(stmt.column_count())?;
        if M::NEEDS_NAMES {
            self.names = ColumnNames::read(&stmt)?;
        }
        self.stmt = Some(stmt);
        Ok(())
    }

    fn stmt(&self) -> Result<&CompiledStatement> {
        self.stmt.as_ref().ok_or(Error::Closed("query"))
    }

    /// Resets the query to its initial state; the next step starts at
    /// row 0. Bindings are kept.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_stmt()?;
        self.stmt()?.reset();
        self.eof = false;
        self.step_count = 0;
        Ok(())
    }

    /// Resets, clears the current bindings, and binds `params`.
    pub fn bind(&mut self, params: impl Into<Params>) -> Result<()> {
        self.reset()?;
        let stmt = self.stmt()?;
        stmt.clear_bindings();
        params.into().bind(stmt)
    }

    /// Produces the next row, or `None` at the end of the result set.
    pub fn next(&mut self) -> Result<Option<M::Row>> {
        if self.closed {
            return Err(Error::Closed("query"));
        }
        if self.eof {
            return Ok(None);
        }
        self.ensure_stmt()?;
        let handle = self.db.raw_handle()?;
        if self.step_count == 0 {
            self.db.emit_trace(&self.sql);
            self.db.progress_begin();
        }

        let permit = self.db.permit();
        let policy = StepPolicy {
            threshold: self.db.release_threshold(),
            permit: &*permit,
        };
        let stmt = self.stmt.as_ref().ok_or(Error::Closed("query"))?;
        match step(handle, stmt, &policy, &mut self.step_count) {
            Ok(Step::Row) => {
                let values = read_row(stmt, stmt.column_count())
                    .map_err(|e| self.db.after_step_error(e))?;
                Ok(Some(M::shape(&self.names, values)))
            }
            Ok(Step::Done) => {
                self.eof = true;
                self.db.finish_run(Ok(()))?;
                Ok(None)
            }
            Err(e) => Err(self.db.after_step_error(e)),
        }
    }

    /// Produces up to `n` further rows.
    pub fn next_n(&mut self, n: usize) -> Result<Vec<M::Row>> {
        let mut rows = Vec::new();
        while rows.len() < n {
            match self.next()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    /// Produces all remaining rows.
    pub fn next_all(&mut self) -> Result<Vec<M::Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Rewinds and yields every row to `f`.
    pub fn each(&mut self, mut f: impl FnMut(M::Row)) -> Result<()> {
        self.reset()?;
        while let Some(row) = self.next()? {
            f(row);
        }
        Ok(())
    }

    /// Rewinds and materializes the full result set.
    pub fn to_a(&mut self) -> Result<Vec<M::Row>> {
        self.reset()?;
        self.next_all()
    }

    /// Rewinds and collects every row through `f`.
    pub fn map<T>(&mut self, mut f: impl FnMut(M::Row) -> T) -> Result<Vec<T>> {
        self.reset()?;
        let mut out = Vec::new();
        while let Some(row) = self.next()? {
            out.push(f(row));
        }
        Ok(out)
    }

    /// Runs the query to completion, returning the change count. A
    /// non-empty `params` replaces the current bindings first.
    pub fn execute(&mut self, params: impl Into<Params>) -> Result<usize> {
        let params: Params = params.into();
        self.reset()?;
        if !params.is_empty() {
            let stmt = self.stmt()?;
            stmt.clear_bindings();
            params.bind(stmt)?;
        }

        let handle = self.db.raw_handle()?;
        self.db.emit_trace(&self.sql);
        self.db.progress_begin();
        let permit = self.db.permit();
        let policy = StepPolicy {
            threshold: self.db.release_threshold(),
            permit: &*permit,
        };
        let outcome: Result<usize> = (|| {
            let stmt = self.stmt.as_ref().ok_or(Error::Closed("query"))?;
            while step(handle, stmt, &policy, &mut self.step_count)? == Step::Row {}
            Ok(unsafe { ffi::sqlite3_changes(handle) } as usize)
        })();
        self.eof = true;
        self.db.finish_run(outcome)
    }

    /// [`execute`](Self::execute) returning `self`, for chaining batch
    /// inserts: `q.push((1, "a"))?.push((2, "b"))?`.
    pub fn push(&mut self, params: impl Into<Params>) -> Result<&mut Self> {
        self.execute(params)?;
        Ok(self)
    }

    /// Column names, without consuming rows.
    pub fn columns(&mut self) -> Result<Vec<Arc<str>>> {
        self.ensure_stmt()?;
        Ok(ColumnNames::read(self.stmt()?)?.to_vec())
    }

    /// A per-statement engine counter, optionally resetting it.
    pub fn status(&mut self, op: i32, reset: bool) -> Result<i32> {
        self.ensure_stmt()?;
        Ok(self.stmt()?.counter(op, reset))
    }

    /// Finalizes the compiled statement. Subsequent operations fail;
    /// repeated close is a no-op.
    pub fn close(&mut self) {
        self.stmt = None;
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn eof(&self) -> bool {
        self.eof
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn database(&self) -> &'db Database {
        self.db
    }
}
