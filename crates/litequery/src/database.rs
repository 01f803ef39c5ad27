use std::cell::{Cell, RefCell};
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::fmt;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::ptr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, InterruptHandle, OpenFlags, ffi};

use crate::backup::{BackupTarget, run_backup};
use crate::changeset::Changeset;
use crate::error::{Error, Result};
use crate::exec;
use crate::params::Params;
use crate::permit::{ExecutionPermit, YieldPermit};
use crate::progress::{
    Invoke, Progress, ProgressOptions, ProgressState, busy_trampoline, progress_trampoline,
};
use crate::query::Query;
use crate::rows::{Ary, Hash, HashRow, Splat};
use crate::stmt::rc_errstr;
use crate::value::Value;

/// Default release threshold: the execution permit is released during
/// compilation, on the first step of a statement, and on every 1000th
/// step thereafter.
pub const DEFAULT_RELEASE_THRESHOLD: i32 = 1000;

/// Options recognized when opening a database.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Open read-only instead of read-write + create.
    pub read_only: bool,
    /// Initial release threshold; `None` keeps the default.
    pub release_threshold: Option<i32>,
    /// Pragmas applied after opening, in order.
    pub pragma: Vec<(String, String)>,
    /// Sets `journal_mode=WAL` and `synchronous=1`.
    pub wal: bool,
}

/// One open connection to a database file.
///
/// A database is used by one task at a time; the only operation intended
/// for another thread is [`InterruptHandle::interrupt`], obtained through
/// [`Database::interrupt_handle`].
pub struct Database {
    conn: RefCell<Option<Connection>>,
    trace: RefCell<Option<Rc<dyn Fn(&str)>>>,
    progress: Box<ProgressState>,
    release_threshold: Cell<i32>,
    permit: RefCell<Rc<dyn ExecutionPermit>>,
}

impl Database {
    /// Opens a database file with default options. The special path
    /// `:memory:` opens an in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &Options::default())
    }

    pub fn open_with(path: impl AsRef<Path>, opts: &Options) -> Result<Self> {
        let flags = if opts.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        };
        let conn = Connection::open_with_flags(path, flags)?;
        unsafe {
            let handle = conn.handle();
            ffi::sqlite3_extended_result_codes(handle, 1);
            ffi::sqlite3_enable_load_extension(handle, 1);
        }

        for (name, value) in &opts.pragma {
            conn.execute_batch(&format!("PRAGMA {} = {}", name, value))?;
        }
        if opts.wal {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = 1")?;
        }

        Ok(Self {
            conn: RefCell::new(Some(conn)),
            trace: RefCell::new(None),
            progress: Box::new(ProgressState::new()),
            release_threshold: Cell::new(
                opts.release_threshold.unwrap_or(DEFAULT_RELEASE_THRESHOLD),
            ),
            permit: RefCell::new(Rc::new(YieldPermit)),
        })
    }

    /// Closes the connection. Closed state is sticky: every subsequent
    /// operation except inspection fails. Repeated close is a no-op.
    pub fn close(&self) -> Result<()> {
        let Some(conn) = self.conn.borrow_mut().take() else {
            return Ok(());
        };
        self.progress.uninstall();
        if let Err((conn, e)) = conn.close() {
            // Close can fail while prepared queries still hold compiled
            // statements; the connection stays usable in that case.
            *self.conn.borrow_mut() = Some(conn);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.conn.borrow().is_none()
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Runs a query, returning all rows as column-name-to-value maps.
    ///
    /// `sql` may contain multiple statements; all but the last are
    /// executed to completion and the last produces the rows.
    pub fn query(&self, sql: &str, params: impl Into<Params>) -> Result<Vec<HashRow>> {
        exec::query_collect::<Hash>(self, sql, &params.into())
    }

    /// Runs a query, returning rows as ordered value lists.
    pub fn query_ary(&self, sql: &str, params: impl Into<Params>) -> Result<Vec<Vec<Value>>> {
        exec::query_collect::<Ary>(self, sql, &params.into())
    }

    /// Runs a single-column query, returning the column's values.
    pub fn query_splat(&self, sql: &str, params: impl Into<Params>) -> Result<Vec<Value>> {
        exec::query_collect::<Splat>(self, sql, &params.into())
    }

    /// Runs a query, passing every row through `f` and collecting the
    /// results.
    pub fn query_map<T>(
        &self,
        sql: &str,
        params: impl Into<Params>,
        f: impl FnMut(HashRow) -> T,
    ) -> Result<Vec<T>> {
        exec::query_map::<Hash, T>(self, sql, &params.into(), f)
    }

    pub fn query_ary_map<T>(
        &self,
        sql: &str,
        params: impl Into<Params>,
        f: impl FnMut(Vec<Value>) -> T,
    ) -> Result<Vec<T>> {
        exec::query_map::<Ary, T>(self, sql, &params.into(), f)
    }

    /// Runs a query, passing the column values of every row to `f`
    /// positionally.
    pub fn query_splat_map<T>(
        &self,
        sql: &str,
        params: impl Into<Params>,
        f: impl FnMut(&[Value]) -> T,
    ) -> Result<Vec<T>> {
        exec::query_splat_map(self, sql, &params.into(), f)
    }

    /// Runs a query, yielding each row to `f` as it is produced.
    pub fn query_each(
        &self,
        sql: &str,
        params: impl Into<Params>,
        f: impl FnMut(HashRow),
    ) -> Result<()> {
        exec::query_each::<Hash>(self, sql, &params.into(), f)
    }

    pub fn query_ary_each(
        &self,
        sql: &str,
        params: impl Into<Params>,
        f: impl FnMut(Vec<Value>),
    ) -> Result<()> {
        exec::query_each::<Ary>(self, sql, &params.into(), f)
    }

    pub fn query_splat_each(
        &self,
        sql: &str,
        params: impl Into<Params>,
        f: impl FnMut(Value),
    ) -> Result<()> {
        exec::query_each::<Splat>(self, sql, &params.into(), f)
    }

    /// Runs a query, consuming at most one row.
    pub fn query_single(&self, sql: &str, params: impl Into<Params>) -> Result<Option<HashRow>> {
        exec::query_single::<Hash>(self, sql, &params.into())
    }

    pub fn query_single_ary(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<Option<Vec<Value>>> {
        exec::query_single::<Ary>(self, sql, &params.into())
    }

    pub fn query_single_splat(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<Option<Value>> {
        exec::query_single::<Splat>(self, sql, &params.into())
    }

    /// Runs a script for effect, returning the change count of the last
    /// statement.
    pub fn execute(&self, sql: &str, params: impl Into<Params>) -> Result<usize> {
        exec::execute(self, sql, &params.into())
    }

    /// Runs one statement once per parameter list the source yields,
    /// returning the total change count. Any iterator works as a source;
    /// `std::iter::from_fn` covers producer callables.
    pub fn batch_execute<I>(&self, sql: &str, sources: I) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Into<Params>,
    {
        exec::batch_execute(self, sql, sources)
    }

    /// Like [`batch_execute`](Self::batch_execute), collecting each
    /// iteration's rows into a result set.
    pub fn batch_query<I>(&self, sql: &str, sources: I) -> Result<Vec<Vec<HashRow>>>
    where
        I: IntoIterator,
        I::Item: Into<Params>,
    {
        exec::batch_query_collect::<Hash, I>(self, sql, sources)
    }

    pub fn batch_query_ary<I>(&self, sql: &str, sources: I) -> Result<Vec<Vec<Vec<Value>>>>
    where
        I: IntoIterator,
        I::Item: Into<Params>,
    {
        exec::batch_query_collect::<Ary, I>(self, sql, sources)
    }

    pub fn batch_query_splat<I>(&self, sql: &str, sources: I) -> Result<Vec<Vec<Value>>>
    where
        I: IntoIterator,
        I::Item: Into<Params>,
    {
        exec::batch_query_collect::<Splat, I>(self, sql, sources)
    }

    /// Yields each iteration's result set to `f` and returns the total
    /// change count.
    pub fn batch_query_each<I>(
        &self,
        sql: &str,
        sources: I,
        f: impl FnMut(Vec<HashRow>),
    ) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Into<Params>,
    {
        exec::batch_query_each::<Hash, I>(self, sql, sources, f)
    }

    pub fn batch_query_ary_each<I>(
        &self,
        sql: &str,
        sources: I,
        f: impl FnMut(Vec<Vec<Value>>),
    ) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Into<Params>,
    {
        exec::batch_query_each::<Ary, I>(self, sql, sources, f)
    }

    pub fn batch_query_splat_each<I>(
        &self,
        sql: &str,
        sources: I,
        f: impl FnMut(Vec<Value>),
    ) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Into<Params>,
    {
        exec::batch_query_each::<Splat, I>(self, sql, sources, f)
    }

    /// Column names of the final statement, without consuming rows.
    pub fn columns(&self, sql: &str) -> Result<Vec<Arc<str>>> {
        exec::columns(self, sql)
    }

    /// Prepares a reusable query delivering hash rows.
    pub fn prepare(&self, sql: &str) -> Result<Query<'_, Hash>> {
        Query::new(self, sql)
    }

    /// Prepares a reusable query delivering ordered value lists.
    pub fn prepare_ary(&self, sql: &str) -> Result<Query<'_, Ary>> {
        Query::new(self, sql)
    }

    /// Prepares a reusable single-column query delivering bare values.
    pub fn prepare_splat(&self, sql: &str) -> Result<Query<'_, Splat>> {
        Query::new(self, sql)
    }

    // -----------------------------------------------------------------
    // Changesets and backup
    // -----------------------------------------------------------------

    /// Captures the changes `f` makes to the named tables (`None` = all
    /// tables) into a fresh changeset.
    pub fn track_changes<F>(&self, tables: Option<&[&str]>, f: F) -> Result<Changeset>
    where
        F: FnOnce(&Database) -> Result<()>,
    {
        let mut changeset = Changeset::new();
        changeset.track(self, tables, f)?;
        Ok(changeset)
    }

    /// Copies this database into `dst` (a path or an open database).
    pub fn backup<'a>(&self, dst: impl Into<BackupTarget<'a>>) -> Result<()> {
        run_backup(self, dst.into(), "main", "main", None)
    }

    /// Like [`backup`](Self::backup), reporting `(remaining, total)` page
    /// counts after every copy step; the final report is `(0, total)`.
    pub fn backup_progress<'a, F>(&self, dst: impl Into<BackupTarget<'a>>, mut f: F) -> Result<()>
    where
        F: FnMut(u32, u32),
    {
        run_backup(self, dst.into(), "main", "main", Some(&mut f))
    }

    /// Backup between named databases (`main`, `temp`, or an attached
    /// name) on the source and destination sides.
    pub fn backup_named<'a>(
        &self,
        dst: impl Into<BackupTarget<'a>>,
        src_name: &str,
        dst_name: &str,
    ) -> Result<()> {
        run_backup(self, dst.into(), src_name, dst_name, None)
    }

    // -----------------------------------------------------------------
    // Connection state
    // -----------------------------------------------------------------

    /// Interrupts the running query; it fails with
    /// [`Error::Interrupted`] at the next step boundary. For interrupting
    /// from another thread, use [`interrupt_handle`](Self::interrupt_handle).
    pub fn interrupt(&self) -> Result<()> {
        let handle = self.raw_handle()?;
        unsafe { ffi::sqlite3_interrupt(handle) };
        Ok(())
    }

    /// A `Send` handle that interrupts this connection from another
    /// thread, remaining safe against a concurrent close.
    pub fn interrupt_handle(&self) -> Result<InterruptHandle> {
        match self.conn.borrow().as_ref() {
            Some(conn) => Ok(conn.get_interrupt_handle()),
            None => Err(Error::Closed("database")),
        }
    }

    pub fn last_insert_rowid(&self) -> Result<i64> {
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(self.raw_handle()?) })
    }

    /// Rows changed by the most recent statement.
    pub fn changes(&self) -> Result<usize> {
        Ok(unsafe { ffi::sqlite3_changes(self.raw_handle()?) } as usize)
    }

    /// Rows changed since the connection was opened.
    pub fn total_changes(&self) -> Result<usize> {
        Ok(unsafe { ffi::sqlite3_total_changes(self.raw_handle()?) } as usize)
    }

    pub fn is_transaction_active(&self) -> Result<bool> {
        Ok(unsafe { ffi::sqlite3_get_autocommit(self.raw_handle()?) } == 0)
    }

    /// The database file path; `None` for in-memory or temporary
    /// databases.
    pub fn filename(&self) -> Result<Option<PathBuf>> {
        let handle = self.raw_handle()?;
        let ptr = unsafe { ffi::sqlite3_db_filename(handle, c"main".as_ptr()) };
        if ptr.is_null() {
            return Ok(None);
        }
        let name = unsafe { CStr::from_ptr(ptr) }.to_string_lossy();
        if name.is_empty() {
            Ok(None)
        } else {
            Ok(Some(PathBuf::from(name.into_owned())))
        }
    }

    pub fn is_read_only(&self) -> Result<bool> {
        let rc = unsafe { ffi::sqlite3_db_readonly(self.raw_handle()?, c"main".as_ptr()) };
        match rc {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::argument("unknown database name: main")),
        }
    }

    /// Sets the engine's sleep-and-retry policy for locked databases;
    /// `None` disables it.
    pub fn set_busy_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match self.conn.borrow().as_ref() {
            Some(conn) => {
                conn.busy_timeout(timeout.unwrap_or(Duration::ZERO))?;
                Ok(())
            }
            None => Err(Error::Closed("database")),
        }
    }

    /// Current value of a runtime limit category.
    pub fn limit(&self, category: i32) -> Result<i32> {
        let value = unsafe { ffi::sqlite3_limit(self.raw_handle()?, category, -1) };
        if value == -1 {
            return Err(Error::argument("invalid limit category"));
        }
        Ok(value)
    }

    /// Sets a runtime limit, returning the previous value.
    pub fn set_limit(&self, category: i32, value: i32) -> Result<i32> {
        let prev = unsafe { ffi::sqlite3_limit(self.raw_handle()?, category, value) };
        if prev == -1 {
            return Err(Error::argument("invalid limit category"));
        }
        Ok(prev)
    }

    /// A per-connection status counter: `(current, highwater)`, optionally
    /// resetting the highwater mark.
    pub fn status(&self, op: i32, reset: bool) -> Result<(i32, i32)> {
        let handle = self.raw_handle()?;
        let mut current: c_int = 0;
        let mut highwater: c_int = 0;
        let rc = unsafe {
            ffi::sqlite3_db_status(
                handle,
                op,
                &mut current,
                &mut highwater,
                if reset { 1 } else { 0 },
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(Error::argument("invalid status operation"));
        }
        Ok((current, highwater))
    }

    pub fn load_extension(&self, path: impl AsRef<Path>) -> Result<()> {
        let handle = self.raw_handle()?;
        let cpath = CString::new(path.as_ref().to_string_lossy().as_ref())
            .map_err(|_| Error::argument("extension path contains NUL"))?;
        let mut errmsg: *mut c_char = ptr::null_mut();
        let rc = unsafe {
            ffi::sqlite3_load_extension(handle, cpath.as_ptr(), ptr::null(), &mut errmsg)
        };
        if rc == ffi::SQLITE_OK {
            return Ok(());
        }
        let message = if errmsg.is_null() {
            rc_errstr(rc)
        } else {
            let message = unsafe { CStr::from_ptr(errmsg) }.to_string_lossy().into_owned();
            unsafe { ffi::sqlite3_free(errmsg as *mut c_void) };
            message
        };
        Err(Error::sql(message))
    }

    // -----------------------------------------------------------------
    // Callbacks and scheduling
    // -----------------------------------------------------------------

    /// Installs a trace callback invoked with each SQL string about to be
    /// executed.
    pub fn on_trace(&self, f: impl Fn(&str) + 'static) {
        *self.trace.borrow_mut() = Some(Rc::new(f));
    }

    pub fn clear_trace(&self) {
        *self.trace.borrow_mut() = None;
    }

    /// Installs the progress handler. While one is installed the release
    /// threshold is forced to −1: the user callback is responsible for
    /// yielding to other tasks.
    pub fn set_progress_handler<F>(&self, opts: ProgressOptions, callback: F) -> Result<()>
    where
        F: FnMut(Progress) -> ControlFlow<()> + 'static,
    {
        let handle = self.raw_handle()?;
        let tick = self.progress.install(opts, Box::new(callback));
        let ctx = &*self.progress as *const ProgressState as *mut c_void;
        unsafe {
            ffi::sqlite3_progress_handler(handle, tick, Some(progress_trampoline), ctx);
            ffi::sqlite3_busy_handler(handle, Some(busy_trampoline), ctx);
        }
        self.release_threshold.set(-1);
        Ok(())
    }

    /// Removes the progress handler, clearing both engine callbacks and
    /// restoring the default release threshold.
    pub fn clear_progress_handler(&self) -> Result<()> {
        let handle = self.raw_handle()?;
        self.progress.uninstall();
        unsafe {
            ffi::sqlite3_progress_handler(handle, 0, None, ptr::null_mut());
            ffi::sqlite3_busy_handler(handle, None, ptr::null_mut());
        }
        self.release_threshold.set(DEFAULT_RELEASE_THRESHOLD);
        Ok(())
    }

    pub fn release_threshold(&self) -> i32 {
        self.release_threshold.get()
    }

    /// Sets the release threshold (see [`DEFAULT_RELEASE_THRESHOLD`]).
    /// Rejected while a progress handler is installed.
    pub fn set_release_threshold(&self, threshold: i32) -> Result<()> {
        if self.progress.is_installed() {
            return Err(Error::argument(
                "a progress handler forces the release threshold to -1",
            ));
        }
        self.release_threshold.set(threshold);
        Ok(())
    }

    /// Replaces the execution permit engine calls release around long
    /// operations.
    pub fn set_execution_permit(&self, permit: Rc<dyn ExecutionPermit>) {
        *self.permit.borrow_mut() = permit;
    }

    // -----------------------------------------------------------------
    // Crate internals
    // -----------------------------------------------------------------

    pub(crate) fn raw_handle(&self) -> Result<*mut ffi::sqlite3> {
        match self.conn.borrow().as_ref() {
            Some(conn) => Ok(unsafe { conn.handle() }),
            None => Err(Error::Closed("database")),
        }
    }

    pub(crate) fn permit(&self) -> Rc<dyn ExecutionPermit> {
        self.permit.borrow().clone()
    }

    /// The permit to release during compilation, when the threshold
    /// allows releasing at all.
    pub(crate) fn compile_permit(&self) -> Option<Rc<dyn ExecutionPermit>> {
        if self.release_threshold.get() >= 0 {
            Some(self.permit())
        } else {
            None
        }
    }

    pub(crate) fn emit_trace(&self, sql: &str) {
        let callback = self.trace.borrow().clone();
        if let Some(callback) = callback {
            callback(sql);
        }
    }

    pub(crate) fn progress_begin(&self) {
        self.progress.begin_query();
    }

    /// Completes a query invocation: runs the at-least-once progress hook
    /// and resurfaces a callback panic stashed during stepping.
    pub(crate) fn finish_run<T>(&self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => match self.progress.finish_query() {
                Invoke::Continue => Ok(value),
                Invoke::Abort => Err(self.after_step_error(Error::Interrupted)),
            },
            Err(e) => Err(self.after_step_error(e)),
        }
    }

    pub(crate) fn after_step_error(&self, e: Error) -> Error {
        if matches!(e, Error::Interrupted) {
            if let Some(payload) = self.progress.take_panic() {
                std::panic::resume_unwind(payload);
            }
        }
        e
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_closed() {
            return f.write_str("Database(closed)");
        }
        match self.filename() {
            Ok(Some(path)) => write!(f, "Database({})", path.display()),
            _ => f.write_str("Database(:memory:)"),
        }
    }
}

/// Engine-wide status counter: `(current, highwater)`.
pub fn runtime_status(op: i32, reset: bool) -> Result<(i32, i32)> {
    let mut current: c_int = 0;
    let mut highwater: c_int = 0;
    let rc = unsafe {
        ffi::sqlite3_status(op, &mut current, &mut highwater, if reset { 1 } else { 0 })
    };
    if rc != ffi::SQLITE_OK {
        return Err(Error::argument("invalid status operation"));
    }
    Ok((current, highwater))
}
