use std::sync::Arc;

use rusqlite::ffi;

use crate::database::Database;
use crate::error::{Error, Result};
use crate::params::Params;
use crate::rows::{Ary, ColumnNames, QueryMode, RowValues, read_row};
use crate::step::{Step, StepPolicy, step};
use crate::stmt;
use crate::value::Value;

pub(crate) fn strip_sql(sql: &str) -> Result<&str> {
    let stripped = sql.trim();
    if stripped.is_empty() {
        return Err(Error::argument("cannot prepare an empty SQL query"));
    }
    Ok(stripped)
}

/// Drives one query invocation: compile the (possibly multi-statement)
/// script, bind, and feed each staged row to the sink until done or the
/// cap is reached. The compiled statement is finalized on every exit path
/// by ownership.
fn drive<M: QueryMode>(
    db: &Database,
    dbh: *mut ffi::sqlite3,
    sql: &str,
    params: &Params,
    cap: Option<usize>,
    sink: &mut dyn FnMut(&ColumnNames, RowValues) -> Result<()>,
) -> Result<()> {
    let stmt = stmt::prepare_multi(dbh, sql, db.compile_permit().as_deref())?;
    params.bind(&stmt)?;

    let column_count = stmt.column_count();
    M::check(column_count)?;
    let names = if M::NEEDS_NAMES {
        ColumnNames::read(&stmt)?
    } else {
        ColumnNames::default()
    };

    let permit = db.permit();
    let policy = StepPolicy {
        threshold: db.release_threshold(),
        permit: &*permit,
    };
    let mut step_count = 0u64;
    let mut delivered = 0usize;
    loop {
        match step(dbh, &stmt, &policy, &mut step_count)? {
            Step::Done => break,
            Step::Row => {
                let values = read_row(&stmt, column_count)?;
                sink(&names, values)?;
                delivered += 1;
                if cap.is_some_and(|cap| delivered >= cap) {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn run_rows<M: QueryMode>(
    db: &Database,
    sql: &str,
    params: &Params,
    cap: Option<usize>,
    sink: &mut dyn FnMut(&ColumnNames, RowValues) -> Result<()>,
) -> Result<()> {
    let sql = strip_sql(sql)?;
    let dbh = db.raw_handle()?;
    db.emit_trace(sql);
    db.progress_begin();
    let outcome = drive::<M>(db, dbh, sql, params, cap, sink);
    db.finish_run(outcome)
}

pub(crate) fn query_collect<M: QueryMode>(
    db: &Database,
    sql: &str,
    params: &Params,
) -> Result<Vec<M::Row>> {
    let mut rows = Vec::new();
    run_rows::<M>(db, sql, params, None, &mut |names, values| {
        rows.push(M::shape(names, values));
        Ok(())
    })?;
    Ok(rows)
}

pub(crate) fn query_each<M: QueryMode>(
    db: &Database,
    sql: &str,
    params: &Params,
    mut f: impl FnMut(M::Row),
) -> Result<()> {
    run_rows::<M>(db, sql, params, None, &mut |names, values| {
        f(M::shape(names, values));
        Ok(())
    })
}

pub(crate) fn query_map<M: QueryMode, T>(
    db: &Database,
    sql: &str,
    params: &Params,
    mut f: impl FnMut(M::Row) -> T,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    run_rows::<M>(db, sql, params, None, &mut |names, values| {
        out.push(f(M::shape(names, values)));
        Ok(())
    })?;
    Ok(out)
}

/// Splat transform: the closure receives the column values positionally,
/// whatever the column count.
pub(crate) fn query_splat_map<T>(
    db: &Database,
    sql: &str,
    params: &Params,
    mut f: impl FnMut(&[Value]) -> T,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    run_rows::<Ary>(db, sql, params, None, &mut |_names, values| {
        out.push(f(&values));
        Ok(())
    })?;
    Ok(out)
}

pub(crate) fn query_single<M: QueryMode>(
    db: &Database,
    sql: &str,
    params: &Params,
) -> Result<Option<M::Row>> {
    let mut row = None;
    run_rows::<M>(db, sql, params, Some(1), &mut |names, values| {
        row = Some(M::shape(names, values));
        Ok(())
    })?;
    Ok(row)
}

pub(crate) fn execute(db: &Database, sql: &str, params: &Params) -> Result<usize> {
    let sql = strip_sql(sql)?;
    let dbh = db.raw_handle()?;
    db.emit_trace(sql);
    db.progress_begin();
    let outcome: Result<usize> = (|| {
        let stmt = stmt::prepare_multi(dbh, sql, db.compile_permit().as_deref())?;
        params.bind(&stmt)?;
        let permit = db.permit();
        let policy = StepPolicy {
            threshold: db.release_threshold(),
            permit: &*permit,
        };
        let mut step_count = 0u64;
        while step(dbh, &stmt, &policy, &mut step_count)? == Step::Row {}
        Ok(unsafe { ffi::sqlite3_changes(dbh) } as usize)
    })();
    db.finish_run(outcome)
}

/// Shared scaffolding for the batch operations: a single statement is
/// compiled once, then rebound and rerun for each parameter list the
/// source yields.
fn batch_drive<M: QueryMode, I>(
    db: &Database,
    sql: &str,
    sources: I,
    collect_rows: bool,
    per_set: &mut dyn FnMut(Vec<M::Row>),
) -> Result<usize>
where
    I: IntoIterator,
    I::Item: Into<Params>,
{
    let sql = strip_sql(sql)?;
    let dbh = db.raw_handle()?;
    db.emit_trace(sql);
    db.progress_begin();
    let outcome: Result<usize> = (|| {
        let stmt = stmt::prepare_single(dbh, sql, db.compile_permit().as_deref())?;
        let column_count = stmt.column_count();
        if collect_rows {
            M::check(column_count)?;
        }
        let names = if collect_rows && M::NEEDS_NAMES {
            ColumnNames::read(&stmt)?
        } else {
            ColumnNames::default()
        };

        let permit = db.permit();
        let policy = StepPolicy {
            threshold: db.release_threshold(),
            permit: &*permit,
        };
        let mut step_count = 0u64;
        let mut changes = 0usize;
        for params in sources {
            let params: Params = params.into();
            stmt.reset();
            stmt.clear_bindings();
            params.bind(&stmt)?;

            let mut rows = Vec::new();
            loop {
                match step(dbh, &stmt, &policy, &mut step_count)? {
                    Step::Done => break,
                    Step::Row => {
                        if collect_rows {
                            rows.push(M::shape(&names, read_row(&stmt, column_count)?));
                        }
                    }
                }
            }
            changes += unsafe { ffi::sqlite3_changes(dbh) } as usize;
            per_set(rows);
        }
        Ok(changes)
    })();
    db.finish_run(outcome)
}

pub(crate) fn batch_execute<I>(db: &Database, sql: &str, sources: I) -> Result<usize>
where
    I: IntoIterator,
    I::Item: Into<Params>,
{
    batch_drive::<Ary, I>(db, sql, sources, false, &mut |_| {})
}

pub(crate) fn batch_query_collect<M: QueryMode, I>(
    db: &Database,
    sql: &str,
    sources: I,
) -> Result<Vec<Vec<M::Row>>>
where
    I: IntoIterator,
    I::Item: Into<Params>,
{
    let mut sets = Vec::new();
    batch_drive::<M, I>(db, sql, sources, true, &mut |rows| sets.push(rows))?;
    Ok(sets)
}

pub(crate) fn batch_query_each<M: QueryMode, I>(
    db: &Database,
    sql: &str,
    sources: I,
    mut f: impl FnMut(Vec<M::Row>),
) -> Result<usize>
where
    I: IntoIterator,
    I::Item: Into<Params>,
{
    batch_drive::<M, I>(db, sql, sources, true, &mut |rows| f(rows))
}

/// Column names of the final statement of `sql`, without consuming rows.
pub(crate) fn columns(db: &Database, sql: &str) -> Result<Vec<Arc<str>>> {
    let sql = strip_sql(sql)?;
    let dbh = db.raw_handle()?;
    db.emit_trace(sql);
    db.progress_begin();
    let outcome: Result<Vec<Arc<str>>> = (|| {
        let stmt = stmt::prepare_multi(dbh, sql, db.compile_permit().as_deref())?;
        Ok(ColumnNames::read(&stmt)?.to_vec())
    })();
    db.finish_run(outcome)
}
