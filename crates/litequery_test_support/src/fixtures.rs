use std::path::{Path, PathBuf};

use litequery::{Database, Options, Result};
use tempfile::TempDir;

/// An on-disk database in a temporary directory that lives as long as the
/// fixture.
pub struct TestDb {
    dir: TempDir,
    path: PathBuf,
    pub db: Database,
}

impl TestDb {
    pub fn new() -> Result<Self> {
        Self::open_with(&Options::default())
    }

    pub fn open_with(opts: &Options) -> Result<Self> {
        let dir = TempDir::new().map_err(|e| {
            litequery::Error::argument(format!("failed to create temp dir: {}", e))
        })?;
        let path = dir.path().join("test.db");
        let db = Database::open_with(&path, opts)?;
        Ok(Self { dir, path, db })
    }

    /// The database file path, e.g. for opening a second connection.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A path for another database file in the same temporary directory.
    pub fn sibling_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Creates `t (a, b, c)` and seeds it with three rows.
    pub fn seed_sample_table(&self) -> Result<()> {
        self.db.execute("create table t (a, b, c)", ())?;
        self.db.batch_execute(
            "insert into t values (?, ?, ?)",
            [(1, 2, 3), (4, 5, 6), (7, 8, 9)],
        )?;
        Ok(())
    }
}
