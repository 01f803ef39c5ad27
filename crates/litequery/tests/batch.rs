use litequery::{Error, Params, Result, Value};
use litequery_test_support::TestDb;

// ---------------------------------------------------------------------------
// batch_execute
// ---------------------------------------------------------------------------

#[test]
fn batch_execute_sums_changes_across_iterations() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    db.execute("create table t (a, b)", ())?;

    let changes = db.batch_execute(
        "insert into t values (?, ?)",
        [(1, "a"), (2, "b"), (3, "c")],
    )?;
    assert_eq!(changes, 3);

    assert_eq!(
        db.query_single_splat("select count(*) from t", ())?,
        Some(Value::Integer(3))
    );

    Ok(())
}

#[test]
fn batch_sources_can_be_iterators_and_producers() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    db.execute("create table t (a)", ())?;

    // Any iterator works as a source.
    let changes = db.batch_execute("insert into t values (?)", (0..5).map(|n| (n,)))?;
    assert_eq!(changes, 5);

    // A producer callable is an iterator via from_fn, drained until None.
    let mut n = 0;
    let changes = db.batch_execute(
        "insert into t values (?)",
        std::iter::from_fn(|| {
            n += 1;
            (n <= 4).then(|| Params::positional([n]))
        }),
    )?;
    assert_eq!(changes, 4);

    assert_eq!(
        db.query_single_splat("select count(*) from t", ())?,
        Some(Value::Integer(9))
    );

    Ok(())
}

#[test]
fn batch_operations_reject_multi_statement_sql() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    db.execute("create table t (a)", ())?;

    let err = db
        .batch_execute("insert into t values (?); select 1", [(1,)])
        .unwrap_err();
    assert!(matches!(err, Error::Argument(_)), "got {:?}", err);

    Ok(())
}

// ---------------------------------------------------------------------------
// batch_query
// ---------------------------------------------------------------------------

#[test]
fn batch_query_splat_returns_one_result_set_per_params() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;

    let sets = db.batch_query_splat("select ? + ?", [(1, 2), (10, 20), (100, 200)])?;
    assert_eq!(
        sets,
        vec![
            vec![Value::Integer(3)],
            vec![Value::Integer(30)],
            vec![Value::Integer(300)],
        ]
    );

    Ok(())
}

#[test]
fn batch_query_collects_hash_rows_per_iteration() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    db.execute("create table t (a, b)", ())?;
    db.batch_execute("insert into t values (?, ?)", [(1, "x"), (2, "y")])?;

    let sets = db.batch_query("select * from t where a = ?", [(1,), (2,), (3,)])?;
    assert_eq!(sets.len(), 3);
    assert_eq!(sets[0][0]["b"], Value::Text("x".to_string()));
    assert_eq!(sets[1][0]["b"], Value::Text("y".to_string()));
    assert!(sets[2].is_empty());

    Ok(())
}

#[test]
fn batch_query_each_yields_sets_and_returns_changes() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    db.execute("create table t (a, b)", ())?;

    let mut sets = Vec::new();
    let changes = db.batch_query_ary_each(
        "insert into t values (?, ?) returning a",
        [(1, "x"), (2, "y")],
        |rows| sets.push(rows),
    )?;
    assert_eq!(changes, 2);
    assert_eq!(
        sets,
        vec![
            vec![vec![Value::Integer(1)]],
            vec![vec![Value::Integer(2)]],
        ]
    );

    Ok(())
}
