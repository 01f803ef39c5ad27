//! An ergonomic query and iteration layer over SQLite.
//!
//! litequery wraps the engine with a small, typed surface: multi-statement
//! scripts, three row shapes (hash, splat, ary), batched parameter-driven
//! execution, reusable prepared queries, changeset capture and
//! application, and cooperative online backup.
//!
//! ```no_run
//! use litequery::Database;
//!
//! # fn main() -> litequery::Result<()> {
//! let db = Database::open(":memory:")?;
//! db.execute("create table t (a, b)", ())?;
//! db.execute("insert into t values (?, ?)", (1, "x"))?;
//! let rows = db.query("select * from t", ())?;
//! assert_eq!(rows[0]["a"], litequery::Value::Integer(1));
//! # Ok(())
//! # }
//! ```
//!
//! Long engine calls release the shared execution permit so other tasks
//! can run; see [`ExecutionPermit`] and
//! [`Database::set_release_threshold`].

mod backup;
mod changeset;
mod database;
mod error;
mod exec;
mod params;
mod permit;
mod progress;
mod query;
mod rows;
mod step;
mod stmt;
mod value;

pub use backup::BackupTarget;
pub use changeset::{Changeset, ChangesetEntry, ChangesetIter, ChangesetOp, ConflictResolution};
pub use database::{DEFAULT_RELEASE_THRESHOLD, Database, Options, runtime_status};
pub use error::{Error, Result};
pub use params::{ParamKey, Params};
pub use permit::{ExecutionPermit, YieldPermit};
pub use progress::{
    DEFAULT_PROGRESS_PERIOD, DEFAULT_PROGRESS_TICK, Progress, ProgressMode, ProgressOptions,
};
pub use query::Query;
pub use rows::{Ary, Hash, HashRow, QueryMode, Splat};
pub use rusqlite::InterruptHandle;
pub use value::Value;

/// Engine category codes for [`Database::status`], [`Database::limit`],
/// [`Query::status`] and [`runtime_status`].
pub mod consts {
    pub use rusqlite::ffi::{
        SQLITE_DBSTATUS_CACHE_HIT, SQLITE_DBSTATUS_CACHE_MISS, SQLITE_DBSTATUS_CACHE_USED,
        SQLITE_DBSTATUS_SCHEMA_USED, SQLITE_DBSTATUS_STMT_USED, SQLITE_LIMIT_ATTACHED,
        SQLITE_LIMIT_COLUMN, SQLITE_LIMIT_COMPOUND_SELECT, SQLITE_LIMIT_EXPR_DEPTH,
        SQLITE_LIMIT_FUNCTION_ARG, SQLITE_LIMIT_LENGTH, SQLITE_LIMIT_LIKE_PATTERN_LENGTH,
        SQLITE_LIMIT_SQL_LENGTH, SQLITE_LIMIT_TRIGGER_DEPTH, SQLITE_LIMIT_VARIABLE_NUMBER,
        SQLITE_LIMIT_VDBE_OP, SQLITE_LIMIT_WORKER_THREADS, SQLITE_STATUS_MEMORY_USED,
        SQLITE_STATUS_PAGECACHE_USED, SQLITE_STMTSTATUS_AUTOINDEX, SQLITE_STMTSTATUS_FULLSCAN_STEP,
        SQLITE_STMTSTATUS_RUN, SQLITE_STMTSTATUS_SORT, SQLITE_STMTSTATUS_VM_STEP,
    };
}
