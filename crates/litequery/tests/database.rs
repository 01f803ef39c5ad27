use std::cell::Cell;
use std::ops::ControlFlow;
use std::rc::Rc;
use std::time::Duration;

use litequery::{
    DEFAULT_RELEASE_THRESHOLD, Database, Error, ExecutionPermit, Options, Progress,
    ProgressOptions, Result, Value, consts, runtime_status,
};
use litequery_test_support::TestDb;

// ---------------------------------------------------------------------------
// Open options
// ---------------------------------------------------------------------------

#[test]
fn read_only_databases_reject_writes() -> Result<()> {
    let fixture = TestDb::new()?;
    fixture.db.execute("create table t (a)", ())?;
    fixture.db.close()?;

    let opts = Options {
        read_only: true,
        ..Options::default()
    };
    let db = Database::open_with(fixture.path(), &opts)?;
    assert!(db.is_read_only()?);

    // The write is rejected at step time with the engine's readonly code.
    let err = db.execute("insert into t values (1)", ()).unwrap_err();
    assert!(
        matches!(err, Error::Sql(_) | Error::Engine { .. }),
        "got {:?}",
        err
    );

    Ok(())
}

#[test]
fn pragma_and_wal_options_apply_post_open() -> Result<()> {
    let opts = Options {
        wal: true,
        pragma: vec![("user_version".to_string(), "42".to_string())],
        ..Options::default()
    };
    let fixture = TestDb::open_with(&opts)?;
    let db = &fixture.db;

    assert_eq!(
        db.query_single_splat("pragma journal_mode", ())?,
        Some(Value::Text("wal".to_string()))
    );
    assert_eq!(
        db.query_single_splat("pragma user_version", ())?,
        Some(Value::Integer(42))
    );

    Ok(())
}

#[test]
fn release_threshold_option_and_setter() -> Result<()> {
    let opts = Options {
        release_threshold: Some(7),
        ..Options::default()
    };
    let db = Database::open_with(":memory:", &opts)?;
    assert_eq!(db.release_threshold(), 7);

    db.set_release_threshold(-1)?;
    assert_eq!(db.release_threshold(), -1);

    Ok(())
}

// ---------------------------------------------------------------------------
// Closed-state stickiness
// ---------------------------------------------------------------------------

#[test]
fn closed_databases_reject_every_operation() -> Result<()> {
    let db = Database::open(":memory:")?;
    db.execute("create table t (a)", ())?;

    db.close()?;
    assert!(db.is_closed());
    // Repeated close is a no-op.
    db.close()?;

    let closed = |err: Error| matches!(err, Error::Closed(_));
    assert!(closed(db.query("select 1", ()).unwrap_err()));
    assert!(closed(db.execute("select 1", ()).unwrap_err()));
    assert!(closed(db.columns("select 1").unwrap_err()));
    assert!(closed(db.changes().unwrap_err()));
    assert!(closed(db.last_insert_rowid().unwrap_err()));
    assert!(closed(db.interrupt().unwrap_err()));
    assert!(closed(db.interrupt_handle().unwrap_err()));
    assert!(closed(db.limit(consts::SQLITE_LIMIT_LENGTH).unwrap_err()));
    assert!(closed(db.set_busy_timeout(None).unwrap_err()));

    let mut query = db.prepare("select 1")?;
    assert!(closed(query.next().unwrap_err()));

    Ok(())
}

// ---------------------------------------------------------------------------
// Interrupt
// ---------------------------------------------------------------------------

#[test]
fn interrupt_from_another_thread_aborts_the_query() -> Result<()> {
    let db = Database::open(":memory:")?;
    let handle = db.interrupt_handle()?;

    let interrupter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        handle.interrupt();
    });

    let err = db
        .query_splat_each(
            "with recursive c(n) as (select 1 union all select n + 1 from c) select n from c",
            (),
            |_| {},
        )
        .unwrap_err();
    assert!(matches!(err, Error::Interrupted), "got {:?}", err);
    interrupter.join().unwrap();

    // The connection stays usable and no statement leaked.
    assert_eq!(
        db.query_single_splat("select 1", ())?,
        Some(Value::Integer(1))
    );
    db.close()?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Execution permit
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CountingPermit {
    released: Cell<u32>,
}

impl ExecutionPermit for CountingPermit {
    fn release(&self) {
        self.released.set(self.released.get() + 1);
    }

    fn reacquire(&self) {}
}

fn released_during(db: &Database, threshold: i32) -> Result<u32> {
    let permit = Rc::new(CountingPermit::default());
    db.set_execution_permit(permit.clone());
    db.set_release_threshold(threshold)?;
    db.query_splat_each("select n from seq", (), |_| {})?;
    Ok(permit.released.get())
}

#[test]
fn release_threshold_controls_permit_releases() -> Result<()> {
    let db = Database::open(":memory:")?;
    db.execute(
        "create table seq (n);
         with recursive c(n) as (select 1 union all select n + 1 from c limit 100)
         insert into seq select n from c",
        (),
    )?;

    // Never released, released at compile only, released per step.
    assert_eq!(released_during(&db, -1)?, 0);
    let compile_only = released_during(&db, 0)?;
    assert_eq!(compile_only, 1);
    let per_step = released_during(&db, 1)?;
    assert!(per_step > compile_only, "per_step = {}", per_step);

    Ok(())
}

// ---------------------------------------------------------------------------
// Progress handler
// ---------------------------------------------------------------------------

const SLOW_QUERY: &str =
    "with recursive c(n) as (select 1 union all select n + 1 from c limit 100000) \
     select count(n) from c";

#[test]
fn progress_handler_fires_and_forces_threshold() -> Result<()> {
    let db = Database::open(":memory:")?;

    let calls = Rc::new(Cell::new(0u32));
    let counter = calls.clone();
    db.set_progress_handler(
        ProgressOptions {
            period: 100,
            tick: 10,
            ..ProgressOptions::default()
        },
        move |progress| {
            assert_eq!(progress, Progress::Tick);
            counter.set(counter.get() + 1);
            ControlFlow::Continue(())
        },
    )?;
    assert_eq!(db.release_threshold(), -1);
    let err = db.set_release_threshold(1000).unwrap_err();
    assert!(matches!(err, Error::Argument(_)), "got {:?}", err);

    db.query_splat("select 1", ())?;
    db.query_splat(SLOW_QUERY, ())?;
    assert!(calls.get() > 0, "progress callback never fired");

    db.clear_progress_handler()?;
    assert_eq!(db.release_threshold(), DEFAULT_RELEASE_THRESHOLD);
    let fired = calls.get();
    db.query_splat(SLOW_QUERY, ())?;
    assert_eq!(calls.get(), fired, "cleared handler still fired");

    Ok(())
}

#[test]
fn progress_handler_break_aborts_the_query() -> Result<()> {
    let db = Database::open(":memory:")?;
    db.set_progress_handler(
        ProgressOptions {
            period: 10,
            tick: 10,
            ..ProgressOptions::default()
        },
        |_| ControlFlow::Break(()),
    )?;

    let err = db.query_splat(SLOW_QUERY, ()).unwrap_err();
    assert!(matches!(err, Error::Interrupted), "got {:?}", err);

    db.clear_progress_handler()?;
    assert_eq!(
        db.query_single_splat("select 1", ())?,
        Some(Value::Integer(1))
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Counters, limits, status
// ---------------------------------------------------------------------------

#[test]
fn change_counters_and_rowids() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;

    db.execute("create table t (a integer primary key, b)", ())?;
    db.execute("insert into t (b) values ('x'), ('y')", ())?;
    assert_eq!(db.changes()?, 2);
    assert_eq!(db.last_insert_rowid()?, 2);

    db.execute("update t set b = 'z'", ())?;
    assert_eq!(db.changes()?, 2);
    assert!(db.total_changes()? >= 4);

    assert!(!db.is_transaction_active()?);
    db.execute("begin", ())?;
    assert!(db.is_transaction_active()?);
    db.execute("rollback", ())?;
    assert!(!db.is_transaction_active()?);

    Ok(())
}

#[test]
fn filename_reflects_the_open_path() -> Result<()> {
    let fixture = TestDb::new()?;
    assert_eq!(fixture.db.filename()?.as_deref(), Some(fixture.path()));

    let mem = Database::open(":memory:")?;
    assert_eq!(mem.filename()?, None);

    Ok(())
}

#[test]
fn limits_get_and_set() -> Result<()> {
    let db = Database::open(":memory:")?;

    let previous = db.limit(consts::SQLITE_LIMIT_VARIABLE_NUMBER)?;
    assert!(previous > 0);

    assert_eq!(db.set_limit(consts::SQLITE_LIMIT_VARIABLE_NUMBER, 99)?, previous);
    assert_eq!(db.limit(consts::SQLITE_LIMIT_VARIABLE_NUMBER)?, 99);

    let err = db.limit(9999).unwrap_err();
    assert!(matches!(err, Error::Argument(_)), "got {:?}", err);

    Ok(())
}

#[test]
fn status_counters_are_queryable() -> Result<()> {
    let db = Database::open(":memory:")?;
    db.execute("create table t (a)", ())?;

    let (current, highwater) = db.status(consts::SQLITE_DBSTATUS_SCHEMA_USED, false)?;
    assert!(current >= 0);
    assert!(highwater >= 0);

    let (memory, _) = runtime_status(consts::SQLITE_STATUS_MEMORY_USED, false)?;
    assert!(memory > 0);

    Ok(())
}

#[test]
fn busy_timeout_accepts_values_and_none() -> Result<()> {
    let db = Database::open(":memory:")?;
    db.set_busy_timeout(Some(Duration::from_millis(250)))?;
    db.set_busy_timeout(None)?;
    Ok(())
}
