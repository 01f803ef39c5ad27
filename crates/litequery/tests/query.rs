use std::cell::RefCell;
use std::rc::Rc;

use litequery::{Database, Error, Params, Result, Value};
use litequery_test_support::TestDb;

// ---------------------------------------------------------------------------
// Value round trips
// ---------------------------------------------------------------------------

#[test]
fn values_round_trip_through_bind_and_select() -> Result<()> {
    let db = Database::open(":memory:")?;

    let cases = [
        Value::Null,
        Value::Integer(0),
        Value::Integer(i64::MAX),
        Value::Integer(i64::MIN),
        Value::Real(1.5),
        Value::Real(-1e300),
        Value::Text("hello".to_string()),
        Value::Text("".to_string()),
        Value::Blob(vec![0, 1, 2, 0xff]),
        Value::Blob(Vec::new()),
    ];
    for value in cases {
        let got = db.query_single_splat("select ?", (value.clone(),))?;
        assert_eq!(got, Some(value));
    }

    // Booleans round-trip as 0/1 integers.
    assert_eq!(
        db.query_single_splat("select ?", (true,))?,
        Some(Value::Integer(1))
    );
    assert_eq!(
        db.query_single_splat("select ?", (false,))?,
        Some(Value::Integer(0))
    );

    // A text/blob pair of the same bytes keeps its storage class.
    let text = db.query_single_splat("select ?", ("ab",))?;
    let blob = db.query_single_splat("select ?", (b"ab".as_slice(),))?;
    assert_eq!(text, Some(Value::Text("ab".to_string())));
    assert_eq!(blob, Some(Value::Blob(b"ab".to_vec())));

    Ok(())
}

#[test]
fn named_parameters_bind_with_and_without_prefix() -> Result<()> {
    let db = Database::open(":memory:")?;

    let row = db.query_single_ary(
        "select :a, :b",
        Params::named([("a", 1), (":b", 2)]),
    )?;
    assert_eq!(row, Some(vec![Value::Integer(1), Value::Integer(2)]));

    let err = db
        .query_single_ary("select :a", Params::named([("nope", 1)]))
        .unwrap_err();
    assert!(matches!(err, Error::Parameter(_)), "got {:?}", err);

    Ok(())
}

// ---------------------------------------------------------------------------
// Row shapes
// ---------------------------------------------------------------------------

#[test]
fn query_returns_hash_rows() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;

    db.execute("create table t (a, b)", ())?;
    db.execute("insert into t values (?, ?)", (1, "x"))?;

    let rows = db.query("select * from t", ())?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["a"], Value::Integer(1));
    assert_eq!(rows[0]["b"], Value::Text("x".to_string()));

    Ok(())
}

#[test]
fn ary_and_splat_shapes() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    fixture.seed_sample_table()?;

    let rows = db.query_ary("select a, b from t order by a", ())?;
    assert_eq!(rows[0], vec![Value::Integer(1), Value::Integer(2)]);

    let values = db.query_splat("select a from t order by a", ())?;
    assert_eq!(
        values,
        vec![Value::Integer(1), Value::Integer(4), Value::Integer(7)]
    );

    // Splat without a transform requires a single column.
    let err = db.query_splat("select a, b from t", ()).unwrap_err();
    assert!(matches!(err, Error::Argument(_)), "got {:?}", err);

    Ok(())
}

#[test]
fn single_row_variants_consume_at_most_one_row() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    fixture.seed_sample_table()?;

    let row = db.query_single("select a from t order by a", ())?;
    assert_eq!(row.unwrap()["a"], Value::Integer(1));

    let row = db.query_single_ary("select a, b from t order by a", ())?;
    assert_eq!(row, Some(vec![Value::Integer(1), Value::Integer(2)]));

    let value = db.query_single_splat("select count(*) from t", ())?;
    assert_eq!(value, Some(Value::Integer(3)));

    assert_eq!(db.query_single("select a from t where a = 100", ())?, None);

    Ok(())
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

#[test]
fn map_variants_match_collect_then_map() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    fixture.seed_sample_table()?;

    let transform = |row: Vec<Value>| row.iter().filter_map(Value::as_integer).sum::<i64>();

    let mapped = db.query_ary_map("select a, b, c from t order by a", (), transform)?;
    let collected: Vec<i64> = db
        .query_ary("select a, b, c from t order by a", ())?
        .into_iter()
        .map(transform)
        .collect();
    assert_eq!(mapped, collected);
    assert_eq!(mapped, vec![6, 15, 24]);

    // The splat transform receives the values positionally, whatever the
    // column count.
    let sums = db.query_splat_map("select a, b from t order by a", (), |values| {
        values[0].as_integer().unwrap() * 10 + values[1].as_integer().unwrap()
    })?;
    assert_eq!(sums, vec![12, 45, 78]);

    Ok(())
}

#[test]
fn each_variants_yield_rows_in_order() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    fixture.seed_sample_table()?;

    let mut seen = Vec::new();
    db.query_splat_each("select a from t order by a desc", (), |value| {
        seen.push(value)
    })?;
    assert_eq!(
        seen,
        vec![Value::Integer(7), Value::Integer(4), Value::Integer(1)]
    );

    Ok(())
}

// ---------------------------------------------------------------------------
// Multi-statement scripts
// ---------------------------------------------------------------------------

#[test]
fn scripts_execute_all_but_last_and_iterate_last() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;

    let rows = db.query_ary(
        "create table s (x);
         insert into s values (1), (2), (3);
         select sum(x) from s",
        (),
    )?;
    assert_eq!(rows, vec![vec![Value::Integer(6)]]);

    Ok(())
}

#[test]
fn failing_scripts_leak_no_statements() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;

    let err = db
        .execute("create table ok1 (x); this is not sql; select 1", ())
        .unwrap_err();
    assert!(matches!(err, Error::Sql(_)), "got {:?}", err);

    // Statements executed before the failure took effect.
    assert_eq!(db.query("select * from ok1", ())?.len(), 0);

    // Close fails if any compiled statement is still outstanding.
    db.close()?;
    Ok(())
}

#[test]
fn empty_sql_is_rejected() {
    let db = Database::open(":memory:").unwrap();
    for sql in ["", "   ", "\n\t"] {
        let err = db.query(sql, ()).unwrap_err();
        assert!(matches!(err, Error::Argument(_)), "got {:?}", err);
    }
}

// ---------------------------------------------------------------------------
// Columns and tracing
// ---------------------------------------------------------------------------

#[test]
fn columns_reports_names_without_consuming_rows() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    fixture.seed_sample_table()?;

    let names = db.columns("select a as first, b as second from t")?;
    let names: Vec<&str> = names.iter().map(|n| n.as_ref()).collect();
    assert_eq!(names, vec!["first", "second"]);

    Ok(())
}

#[test]
fn trace_sees_each_sql_string_before_execution() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;

    let traced: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = traced.clone();
    db.on_trace(move |sql| sink.borrow_mut().push(sql.to_string()));

    db.execute("create table tr (x)", ())?;
    db.query("select * from tr", ())?;

    let mut query = db.prepare("select x from tr")?;
    query.to_a()?;

    let traced = traced.borrow();
    assert_eq!(
        *traced,
        vec![
            "create table tr (x)".to_string(),
            "select * from tr".to_string(),
            "select x from tr".to_string(),
        ]
    );
    drop(traced);

    db.clear_trace();
    Ok(())
}
