use std::ffi::{CString, c_int};
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, ffi};

use crate::database::Database;
use crate::error::{Error, Result};
use crate::permit::with_released;
use crate::stmt::{db_errmsg, primary_code};

/// Pages copied per backup step; the permit is released across each
/// step so readers on other tasks are not starved.
const STEP_MAX_PAGES: c_int = 16;

/// Engine sleep between retries when the source or destination is
/// contended.
const RETRY_SLEEP_MS: c_int = 100;

/// Destination of a backup: a file path (opened read-write + create and
/// closed again internally) or an already-open database.
pub enum BackupTarget<'a> {
    Path(PathBuf),
    Database(&'a Database),
}

impl From<&str> for BackupTarget<'_> {
    fn from(path: &str) -> Self {
        BackupTarget::Path(PathBuf::from(path))
    }
}

impl From<&Path> for BackupTarget<'_> {
    fn from(path: &Path) -> Self {
        BackupTarget::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for BackupTarget<'_> {
    fn from(path: PathBuf) -> Self {
        BackupTarget::Path(path)
    }
}

impl<'a> From<&'a Database> for BackupTarget<'a> {
    fn from(db: &'a Database) -> Self {
        BackupTarget::Database(db)
    }
}

struct BackupGuard(*mut ffi::sqlite3_backup);

impl Drop for BackupGuard {
    fn drop(&mut self) {
        unsafe { ffi::sqlite3_backup_finish(self.0) };
    }
}

pub(crate) fn run_backup(
    src: &Database,
    dst: BackupTarget<'_>,
    src_name: &str,
    dst_name: &str,
    mut progress: Option<&mut dyn FnMut(u32, u32)>,
) -> Result<()> {
    let src_handle = src.raw_handle()?;

    // An internally opened destination is owned by this frame, so it is
    // closed again on every exit path.
    let _owned_dst: Option<Connection>;
    let dst_handle = match dst {
        BackupTarget::Path(path) => {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            )?;
            let handle = unsafe { conn.handle() };
            _owned_dst = Some(conn);
            handle
        }
        BackupTarget::Database(db) => {
            _owned_dst = None;
            db.raw_handle()?
        }
    };

    let c_src_name =
        CString::new(src_name).map_err(|_| Error::argument("database name contains NUL"))?;
    let c_dst_name =
        CString::new(dst_name).map_err(|_| Error::argument("database name contains NUL"))?;

    let backup = unsafe {
        ffi::sqlite3_backup_init(
            dst_handle,
            c_dst_name.as_ptr(),
            src_handle,
            c_src_name.as_ptr(),
        )
    };
    if backup.is_null() {
        return Err(Error::sql(db_errmsg(dst_handle)));
    }
    let _guard = BackupGuard(backup);

    let permit = src.permit();
    loop {
        let rc = with_released(&*permit, || unsafe {
            ffi::sqlite3_backup_step(backup, STEP_MAX_PAGES)
        });
        match primary_code(rc) {
            ffi::SQLITE_OK => {
                if let Some(report) = progress.as_mut() {
                    let remaining = unsafe { ffi::sqlite3_backup_remaining(backup) } as u32;
                    let total = unsafe { ffi::sqlite3_backup_pagecount(backup) } as u32;
                    report(remaining, total);
                }
            }
            ffi::SQLITE_DONE => {
                if let Some(report) = progress.as_mut() {
                    let total = unsafe { ffi::sqlite3_backup_pagecount(backup) } as u32;
                    report(0, total);
                }
                return Ok(());
            }
            ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => {
                log::debug!("backup contended (rc {}), retrying", rc);
                with_released(&*permit, || unsafe {
                    ffi::sqlite3_sleep(RETRY_SLEEP_MS);
                });
            }
            code => return Err(Error::engine(code, db_errmsg(dst_handle))),
        }
    }
}
