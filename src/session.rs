//! Environment sessions
//!
//! A session is one prepared testbed bound to one task instance. The
//! orchestrator only talks to it through [`EnvSession`], and only inside
//! [`with_session`], which guarantees `close` runs on every exit path.

use crate::instance::TaskInstance;
use crate::patch_type::PatchType;
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Everything that identifies a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub instance_id: String,
    pub testbed_name: String,
    pub testbed: PathBuf,
    pub log_dir: PathBuf,
    pub timeout: Option<Duration>,
    pub log_suffix: Option<String>,
    /// Test files restored to HEAD before the test patch is applied.
    pub test_directives: Vec<String>,
}

pub trait EnvSession {
    /// Apply (or with `revert`, reverse) `patch` in the working tree.
    ///
    /// `None` means the predictor produced no patch at all. Returns whether
    /// the working tree now carries (or no longer carries) the change.
    fn apply(&mut self, patch: Option<&str>, patch_type: PatchType, revert: bool) -> bool;

    /// Run the task's tests; true only when they ran and passed.
    fn run_tests(&mut self, instance: &TaskInstance) -> bool;

    /// Release the session. Must tolerate being called more than once.
    fn close(&mut self) -> Result<()>;
}

struct SessionGuard<S: EnvSession> {
    session: S,
    closed: bool,
}

impl<S: EnvSession> SessionGuard<S> {
    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.session.close()
    }
}

impl<S: EnvSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.session.close() {
                warn!("Failed to release session during unwind: {:#}", err);
            }
        }
    }
}

/// Open a session, hand it to `body`, and release it afterwards.
///
/// Release also happens if `body` panics. A failing release is logged and
/// does not change `body`'s result.
pub fn with_session<S, T, O, B>(open: O, body: B) -> Result<T>
where
    S: EnvSession,
    O: FnOnce() -> Result<S>,
    B: FnOnce(&mut S) -> T,
{
    let mut guard = SessionGuard {
        session: open()?,
        closed: false,
    };
    let result = body(&mut guard.session);
    if let Err(err) = guard.close() {
        warn!("Failed to release session: {:#}", err);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::Cell;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::rc::Rc;

    struct CountingSession {
        closes: Rc<Cell<usize>>,
    }

    impl EnvSession for CountingSession {
        fn apply(&mut self, _: Option<&str>, _: PatchType, _: bool) -> bool {
            true
        }

        fn run_tests(&mut self, _: &TaskInstance) -> bool {
            true
        }

        fn close(&mut self) -> Result<()> {
            self.closes.set(self.closes.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn test_closes_after_body_returns() {
        let closes = Rc::new(Cell::new(0));
        let session = CountingSession {
            closes: closes.clone(),
        };
        let value = with_session(|| Ok(session), |_| 42).unwrap();
        assert_eq!(value, 42);
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn test_closes_when_body_panics() {
        let closes = Rc::new(Cell::new(0));
        let session = CountingSession {
            closes: closes.clone(),
        };
        let result = catch_unwind(AssertUnwindSafe(|| {
            with_session(|| Ok(session), |_| -> () { panic!("boom") })
        }));
        assert!(result.is_err());
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn test_open_failure_skips_body() {
        let mut ran = false;
        let result = with_session(
            || -> Result<CountingSession> { Err(anyhow!("no testbed")) },
            |_| ran = true,
        );
        assert!(result.is_err());
        assert!(!ran);
    }
}
