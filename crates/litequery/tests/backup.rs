use litequery::{Database, Result, Value};
use litequery_test_support::TestDb;

/// Seeds enough data for the source to span well over one copy step
/// (16 pages).
fn seed_pages(db: &Database) -> Result<()> {
    db.execute("create table big (id integer primary key, payload blob)", ())?;
    db.batch_execute(
        "insert into big (payload) values (?)",
        (0..256).map(|n| (vec![n as u8; 2048],)),
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Destinations
// ---------------------------------------------------------------------------

#[test]
fn backup_to_a_path_copies_the_database() -> Result<()> {
    let fixture = TestDb::new()?;
    let src = &fixture.db;
    seed_pages(src)?;

    let dst_path = fixture.sibling_path("dst.db");
    src.backup(dst_path.as_path())?;

    let dst = Database::open(&dst_path)?;
    assert_eq!(
        dst.query_single_splat("select count(*) from big", ())?,
        Some(Value::Integer(256))
    );

    Ok(())
}

#[test]
fn backup_to_an_open_database_handle() -> Result<()> {
    let fixture = TestDb::new()?;
    let src = &fixture.db;
    seed_pages(src)?;

    let dst = Database::open(":memory:")?;
    src.backup(&dst)?;

    assert_eq!(
        dst.query_single_splat("select count(*) from big", ())?,
        Some(Value::Integer(256))
    );

    Ok(())
}

#[test]
fn backup_named_copies_between_main_databases() -> Result<()> {
    let fixture = TestDb::new()?;
    let src = &fixture.db;
    src.execute("create table t (a)", ())?;
    src.execute("insert into t values (1)", ())?;

    let dst = Database::open(":memory:")?;
    src.backup_named(&dst, "main", "main")?;

    assert_eq!(
        dst.query_single_splat("select a from t", ())?,
        Some(Value::Integer(1))
    );

    Ok(())
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

#[test]
fn backup_progress_reports_a_converging_page_count() -> Result<()> {
    let fixture = TestDb::new()?;
    let src = &fixture.db;
    seed_pages(src)?;

    let mut observed: Vec<(u32, u32)> = Vec::new();
    let dst_path = fixture.sibling_path("dst.db");
    src.backup_progress(dst_path.as_path(), |remaining, total| {
        observed.push((remaining, total))
    })?;

    assert!(observed.len() > 1, "expected several progress reports");

    let total = observed[0].1;
    assert!(total > 16, "source should span several copy steps");
    for (remaining, reported_total) in &observed {
        assert_eq!(*reported_total, total);
        assert!(*remaining <= total);
    }
    for pair in observed.windows(2) {
        assert!(pair[1].0 <= pair[0].0, "remaining went up: {:?}", pair);
    }
    assert_eq!(observed.last(), Some(&(0, total)));
    assert_eq!(
        observed.iter().filter(|(remaining, _)| *remaining == 0).count(),
        1
    );

    Ok(())
}

#[test]
fn backup_overwrites_an_existing_destination() -> Result<()> {
    let fixture = TestDb::new()?;
    let src = &fixture.db;
    src.execute("create table t (a)", ())?;
    src.execute("insert into t values (42)", ())?;

    let dst = Database::open(":memory:")?;
    dst.execute("create table stale (x)", ())?;

    src.backup(&dst)?;
    assert_eq!(
        dst.query_single_splat("select a from t", ())?,
        Some(Value::Integer(42))
    );
    assert!(dst.query("select * from stale", ()).is_err());

    Ok(())
}
