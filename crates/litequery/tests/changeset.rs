use litequery::{Changeset, ChangesetOp, Database, Error, Result, Value};
use litequery_test_support::TestDb;

fn schema(db: &Database) -> Result<()> {
    db.execute("create table t (a integer primary key, b text)", ())?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tracking and iteration
// ---------------------------------------------------------------------------

#[test]
fn track_records_inserts_updates_and_deletes() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    schema(db)?;
    db.execute("insert into t values (1, 'x'), (2, 'y')", ())?;

    let changeset = db.track_changes(Some(&["t"]), |db| {
        db.execute("insert into t values (3, 'z')", ())?;
        db.execute("update t set b = 'Y' where a = 2", ())?;
        db.execute("delete from t where a = 1", ())?;
        Ok(())
    })?;

    let entries = changeset.to_a()?;
    assert_eq!(entries.len(), 3);
    for entry in &entries {
        assert_eq!(entry.table, "t");
    }

    let insert = entries.iter().find(|e| e.op == ChangesetOp::Insert).unwrap();
    assert_eq!(insert.old_values, None);
    assert_eq!(
        insert.new_values,
        Some(vec![Value::Integer(3), Value::Text("z".to_string())])
    );

    let update = entries.iter().find(|e| e.op == ChangesetOp::Update).unwrap();
    assert!(update.old_values.is_some());
    assert!(update.new_values.is_some());

    let delete = entries.iter().find(|e| e.op == ChangesetOp::Delete).unwrap();
    assert_eq!(
        delete.old_values,
        Some(vec![Value::Integer(1), Value::Text("x".to_string())])
    );
    assert_eq!(delete.new_values, None);

    Ok(())
}

#[test]
fn empty_table_list_attaches_nothing() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    schema(db)?;

    let changeset = db.track_changes(Some(&[]), |db| {
        db.execute("insert into t values (1, 'x')", ())?;
        Ok(())
    })?;

    assert!(changeset.to_blob().is_empty());
    assert_eq!(changeset.to_a()?.len(), 0);

    Ok(())
}

#[test]
fn untracked_tables_are_not_recorded() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    schema(db)?;
    db.execute("create table other (a integer primary key, b)", ())?;

    let changeset = db.track_changes(Some(&["t"]), |db| {
        db.execute("insert into t values (1, 'x')", ())?;
        db.execute("insert into other values (1, 'x')", ())?;
        Ok(())
    })?;

    let entries = changeset.to_a()?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].table, "t");

    Ok(())
}

#[test]
fn failing_track_closure_unwinds_the_session() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    schema(db)?;

    let mut changeset = Changeset::new();
    let err = changeset
        .track(db, None, |db| {
            db.execute("insert into t values (1, 'x')", ())?;
            Err(Error::argument("boom"))
        })
        .unwrap_err();
    assert!(matches!(err, Error::Argument(_)), "got {:?}", err);

    // No changeset was captured; a fresh track still works.
    let err = changeset.to_a().unwrap_err();
    assert!(matches!(err, Error::Argument(_)), "got {:?}", err);
    changeset.track(db, None, |db| {
        db.execute("insert into t values (2, 'y')", ())?;
        Ok(())
    })?;
    assert_eq!(changeset.to_a()?.len(), 1);

    Ok(())
}

// ---------------------------------------------------------------------------
// Apply, invert, serialize
// ---------------------------------------------------------------------------

#[test]
fn changeset_blob_round_trips_and_applies_to_a_clone() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    schema(db)?;

    let changeset = db.track_changes(None, |db| {
        db.execute("insert into t values (1, 'x'), (2, 'y')", ())?;
        Ok(())
    })?;

    let blob = changeset.to_blob().to_vec();
    assert!(!blob.is_empty());

    let clone_fixture = TestDb::new()?;
    let clone = &clone_fixture.db;
    schema(clone)?;
    Changeset::load(blob).apply(clone)?;

    assert_eq!(
        clone.query_ary("select a, b from t order by a", ())?,
        db.query_ary("select a, b from t order by a", ())?
    );

    Ok(())
}

#[test]
fn invert_reverses_an_update() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    schema(db)?;
    db.execute("insert into t values (1, 'x')", ())?;

    let changeset = db.track_changes(Some(&["t"]), |db| {
        db.execute("update t set b = 'Z' where a = 1", ())?;
        Ok(())
    })?;
    let inverted = changeset.invert()?;

    assert_eq!(
        db.query_single_splat("select b from t where a = 1", ())?,
        Some(Value::Text("Z".to_string()))
    );

    inverted.apply(db)?;
    assert_eq!(
        db.query_single_splat("select b from t where a = 1", ())?,
        Some(Value::Text("x".to_string()))
    );

    Ok(())
}

#[test]
fn invert_reverses_inserts_and_deletes() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    schema(db)?;
    db.execute("insert into t values (1, 'x')", ())?;

    let changeset = db.track_changes(None, |db| {
        db.execute("insert into t values (2, 'y')", ())?;
        db.execute("delete from t where a = 1", ())?;
        Ok(())
    })?;

    changeset.invert()?.apply(db)?;
    assert_eq!(
        db.query_ary("select a, b from t order by a", ())?,
        vec![vec![Value::Integer(1), Value::Text("x".to_string())]]
    );

    Ok(())
}

#[test]
fn apply_resolves_conflicts_by_replacing() -> Result<()> {
    let fixture = TestDb::new()?;
    let db = &fixture.db;
    schema(db)?;

    let changeset = db.track_changes(None, |db| {
        db.execute("insert into t values (1, 'from_changeset')", ())?;
        Ok(())
    })?;

    // The target already has a conflicting row; apply wins.
    let target_fixture = TestDb::new()?;
    let target = &target_fixture.db;
    schema(target)?;
    target.execute("insert into t values (1, 'existing')", ())?;

    changeset.apply(target)?;
    assert_eq!(
        target.query_single_splat("select b from t where a = 1", ())?,
        Some(Value::Text("from_changeset".to_string()))
    );

    Ok(())
}

#[test]
fn untracked_changeset_operations_fail() {
    let changeset = Changeset::new();
    assert!(changeset.to_a().is_err());
    assert!(changeset.invert().is_err());
    assert!(changeset.to_blob().is_empty());
}
