use litequery::{Error, Result, Value, consts};
use litequery_test_support::TestDb;

// ---------------------------------------------------------------------------
// Stepping
// ---------------------------------------------------------------------------

#[test]
fn next_produces_rows_until_eof() -> Result<()> {
    let fixture = TestDb::new()?;
    fixture.seed_sample_table()?;
    let db = &fixture.db;

    let mut query = db.prepare_splat("select a from t order by a")?;
    assert!(!query.eof());
    assert_eq!(query.next()?, Some(Value::Integer(1)));
    assert_eq!(query.next()?, Some(Value::Integer(4)));
    assert_eq!(query.next()?, Some(Value::Integer(7)));
    assert_eq!(query.next()?, None);
    assert!(query.eof());
    // Eof is sticky until a reset.
    assert_eq!(query.next()?, None);

    query.reset()?;
    assert!(!query.eof());
    assert_eq!(query.next()?, Some(Value::Integer(1)));

    Ok(())
}

#[test]
fn next_n_caps_the_row_count() -> Result<()> {
    let fixture = TestDb::new()?;
    fixture.seed_sample_table()?;
    let db = &fixture.db;

    let mut query = db.prepare_splat("select a from t order by a")?;
    let rows = query.next_n(2)?;
    assert_eq!(rows, vec![Value::Integer(1), Value::Integer(4)]);

    // The cap stops stepping; the remainder is still available.
    let rest = query.next_all()?;
    assert_eq!(rest, vec![Value::Integer(7)]);

    // Asking past the end returns what is left.
    query.reset()?;
    assert_eq!(query.next_n(100)?.len(), 3);

    Ok(())
}

#[test]
fn bind_rebinds_and_rewinds() -> Result<()> {
    let fixture = TestDb::new()?;
    fixture.seed_sample_table()?;
    let db = &fixture.db;

    let mut query = db.prepare_splat("select b from t where a = ?")?;
    query.bind((1,))?;
    assert_eq!(query.next()?, Some(Value::Integer(2)));

    query.bind((7,))?;
    assert_eq!(query.next()?, Some(Value::Integer(8)));

    // Bindings survive a plain reset.
    query.reset()?;
    assert_eq!(query.next()?, Some(Value::Integer(8)));

    Ok(())
}

#[test]
fn each_and_to_a_rewind_and_materialize() -> Result<()> {
    let fixture = TestDb::new()?;
    fixture.seed_sample_table()?;
    let db = &fixture.db;

    let mut query = db.prepare_ary("select a, b from t order by a")?;
    let rows = query.to_a()?;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], vec![Value::Integer(1), Value::Integer(2)]);

    // to_a consumed the result set; each starts over.
    let mut seen = Vec::new();
    query.each(|row| seen.push(row[0].clone()))?;
    assert_eq!(
        seen,
        vec![Value::Integer(1), Value::Integer(4), Value::Integer(7)]
    );

    let mut hash_query = db.prepare("select a from t order by a")?;
    let rows = hash_query.to_a()?;
    assert_eq!(rows[2]["a"], Value::Integer(7));

    Ok(())
}

#[test]
fn map_collects_transformed_rows() -> Result<()> {
    let fixture = TestDb::new()?;
    fixture.seed_sample_table()?;
    let db = &fixture.db;

    let mut query = db.prepare_ary("select a, b from t order by a")?;
    let sums = query.map(|row| row.iter().filter_map(Value::as_integer).sum::<i64>())?;
    assert_eq!(sums, vec![3, 9, 15]);

    // Equivalent to materializing and mapping afterwards.
    let collected: Vec<i64> = query
        .to_a()?
        .into_iter()
        .map(|row| row.iter().filter_map(Value::as_integer).sum::<i64>())
        .collect();
    assert_eq!(sums, collected);

    Ok(())
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[test]
fn execute_returns_changes_and_push_chains() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    db.execute("create table u (a, b)", ())?;

    let mut insert = db.prepare("insert into u values (?, ?)")?;
    assert_eq!(insert.execute((1, "a"))?, 1);
    insert.push((2, "b"))?.push((3, "c"))?;

    assert_eq!(
        db.query_single_splat("select count(*) from u", ())?,
        Some(Value::Integer(3))
    );

    Ok(())
}

#[test]
fn columns_and_status_do_not_consume_rows() -> Result<()> {
    let fixture = TestDb::new()?;
    fixture.seed_sample_table()?;
    let db = &fixture.db;

    let mut query = db.prepare("select a as first, b as second from t")?;
    let names = query.columns()?;
    let names: Vec<&str> = names.iter().map(|n| n.as_ref()).collect();
    assert_eq!(names, vec!["first", "second"]);

    query.to_a()?;
    assert!(query.status(consts::SQLITE_STMTSTATUS_RUN, false)? >= 1);

    Ok(())
}

#[test]
fn sql_and_database_accessors() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;

    let query = db.prepare("  select 1  ")?;
    assert_eq!(query.sql(), "select 1");
    assert!(!query.database().is_closed());

    Ok(())
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn closed_queries_reject_every_operation() -> Result<()> {
    let fixture = TestDb::new()?;
    fixture.seed_sample_table()?;
    let db = &fixture.db;

    let mut query = db.prepare_ary("select a from t")?;
    query.next()?;
    query.close();
    assert!(query.is_closed());
    // Repeated close is a no-op.
    query.close();

    let closed = |err: Error| matches!(err, Error::Closed(_));
    assert!(closed(query.next().unwrap_err()));
    assert!(closed(query.reset().unwrap_err()));
    assert!(closed(query.bind((1,)).unwrap_err()));
    assert!(closed(query.execute(()).unwrap_err()));
    assert!(closed(query.to_a().unwrap_err()));
    assert!(closed(query.columns().unwrap_err()));
    assert!(closed(query.status(consts::SQLITE_STMTSTATUS_RUN, false).unwrap_err()));

    Ok(())
}

#[test]
fn prepared_queries_accept_a_single_statement_only() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;

    let mut query = db.prepare("select 1; select 2")?;
    let err = query.next().unwrap_err();
    assert!(matches!(err, Error::Argument(_)), "got {:?}", err);

    Ok(())
}

#[test]
fn splat_queries_require_a_single_column() -> Result<()> {
    let fixture = TestDb::new()?;
    fixture.seed_sample_table()?;
    let db = &fixture.db;

    let mut query = db.prepare_splat("select a, b from t")?;
    let err = query.next().unwrap_err();
    assert!(matches!(err, Error::Argument(_)), "got {:?}", err);

    Ok(())
}

#[test]
fn queries_keep_statements_alive_until_close() -> Result<()> {
    let fixture = TestDb::new()?;
    fixture.seed_sample_table()?;
    let db = &fixture.db;

    let mut query = db.prepare("select a from t")?;
    query.next()?;

    // An outstanding compiled statement blocks close.
    assert!(db.close().is_err());

    query.close();
    db.close()?;

    Ok(())
}
