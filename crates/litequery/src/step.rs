use rusqlite::ffi;

use crate::error::{Error, Result};
use crate::permit::{ExecutionPermit, with_released};
use crate::stmt::{CompiledStatement, db_errmsg, primary_code};

/// Outcome of advancing a statement by one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Row,
    Done,
}

/// The per-invocation release policy.
pub(crate) struct StepPolicy<'a> {
    pub threshold: i32,
    pub permit: &'a dyn ExecutionPermit,
}

impl StepPolicy<'_> {
    /// A negative threshold never releases the permit. Otherwise the
    /// permit is released on the first step of a statement and on every
    /// threshold-th step thereafter.
    fn should_release(&self, stmt: &CompiledStatement, step_count: u64) -> bool {
        if self.threshold <= 0 {
            return false;
        }
        if !stmt.is_executing() {
            return true;
        }
        step_count % self.threshold as u64 == 0
    }
}

/// Advances a statement by one step, consulting the release policy and
/// mapping the engine return code.
pub(crate) fn step(
    db: *mut ffi::sqlite3,
    stmt: &CompiledStatement,
    policy: &StepPolicy<'_>,
    step_count: &mut u64,
) -> Result<Step> {
    let release = policy.should_release(stmt, *step_count);
    *step_count += 1;

    let rc = if release {
        with_released(policy.permit, || unsafe { ffi::sqlite3_step(stmt.as_ptr()) })
    } else {
        unsafe { ffi::sqlite3_step(stmt.as_ptr()) }
    };

    match primary_code(rc) {
        ffi::SQLITE_ROW => Ok(Step::Row),
        ffi::SQLITE_DONE => Ok(Step::Done),
        ffi::SQLITE_BUSY => Err(Error::Busy),
        ffi::SQLITE_INTERRUPT => {
            log::debug!("step interrupted");
            Err(Error::Interrupted)
        }
        ffi::SQLITE_ERROR => {
            let message = db_errmsg(db);
            log::error!("step failed: {}", message);
            Err(Error::Sql(message))
        }
        code => Err(Error::engine(code, db_errmsg(db))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permit::YieldPermit;

    // The policy decision is pure apart from the engine's busy flag, so a
    // null-statement stand-in covers the "not yet executing" branch.
    fn policy(threshold: i32) -> StepPolicy<'static> {
        static PERMIT: YieldPermit = YieldPermit;
        StepPolicy {
            threshold,
            permit: &PERMIT,
        }
    }

    #[test]
    fn negative_threshold_never_releases() {
        let stmt = idle_stmt();
        assert!(!policy(-1).should_release(&stmt, 0));
        assert!(!policy(-1).should_release(&stmt, 1000));
    }

    #[test]
    fn zero_threshold_holds_across_steps() {
        let stmt = idle_stmt();
        assert!(!policy(0).should_release(&stmt, 0));
        assert!(!policy(0).should_release(&stmt, 500));
    }

    #[test]
    fn positive_threshold_releases_on_first_step() {
        let stmt = idle_stmt();
        assert!(policy(1000).should_release(&stmt, 17));
    }

    fn idle_stmt() -> CompiledStatement {
        // A statement that was never stepped reports not-executing; the
        // engine treats a null handle the same way.
        CompiledStatement::null_for_tests()
    }
}
