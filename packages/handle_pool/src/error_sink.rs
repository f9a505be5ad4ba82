//! Per-thread record of the most recent pool failure.
//!
//! Every failing pool operation returns its [`Error`] to the caller and also records a
//! structured [`ErrorReport`] for the calling thread. Layers that only see "it failed" can
//! retrieve the details afterwards without threading the error value through.

use std::cell::RefCell;
use std::error::Error as StdError;

use crate::{Error, ErrorKind};

thread_local! {
    static LAST_ERROR: RefCell<Option<ErrorReport>> = const { RefCell::new(None) };
}

/// Structured description of a failed pool operation, retrievable by the thread that
/// performed the operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ErrorReport {
    kind: ErrorKind,
    path: String,
    message: String,
}

impl ErrorReport {
    fn from_error(error: &Error) -> Self {
        let mut message = error.to_string();

        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        Self {
            kind: error.kind(),
            path: error.path().to_string(),
            message,
        }
    }

    /// The category of the failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Identity of the pool that failed.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Human-readable description of the failure, including the chain of causes.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Records `error` as the most recent failure on the current thread.
pub(crate) fn report(error: &Error) {
    let report = ErrorReport::from_error(error);
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(report));
}

/// Returns the most recent pool failure recorded on the current thread, if any.
///
/// The report stays recorded until [`take_last_error()`] is called or a newer failure
/// replaces it.
///
/// # Example
///
/// ```
/// use handle_pool::{BoxError, ErrorKind, Handle, HandlePool, last_error};
///
/// struct Connection;
///
/// impl Handle for Connection {
///     fn open(&mut self) -> Result<(), BoxError> {
///         Err("database is locked".into())
///     }
///
///     fn close(&mut self) {}
/// }
///
/// let pool = HandlePool::new("main.db", || Ok(Connection));
///
/// assert!(pool.flow_out().is_err());
///
/// let report = last_error().unwrap();
/// assert_eq!(report.kind(), ErrorKind::Creation);
/// assert_eq!(report.path(), "main.db");
/// ```
#[must_use]
pub fn last_error() -> Option<ErrorReport> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Removes and returns the most recent pool failure recorded on the current thread, if any.
pub fn take_last_error() -> Option<ErrorReport> {
    LAST_ERROR.with(|slot| slot.borrow_mut().take())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::io;
    use std::thread;

    use super::*;

    #[test]
    fn report_includes_cause_chain() {
        drop(take_last_error());

        report(&Error::Creation {
            path: "a.db".to_string(),
            source: Box::new(io::Error::other("permission denied")),
        });

        let recorded = last_error().unwrap();
        assert_eq!(recorded.kind(), ErrorKind::Creation);
        assert_eq!(recorded.path(), "a.db");
        assert_eq!(
            recorded.message(),
            "failed to create a handle for 'a.db': permission denied"
        );
    }

    #[test]
    fn take_clears_the_slot() {
        report(&Error::Blockaded {
            path: "b.db".to_string(),
        });

        assert_eq!(take_last_error().unwrap().kind(), ErrorKind::Blockaded);
        assert!(last_error().is_none());
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn reports_are_per_thread() {
        report(&Error::Blockaded {
            path: "c.db".to_string(),
        });

        let seen_elsewhere = thread::spawn(last_error).join().unwrap();

        assert!(seen_elsewhere.is_none());
        assert!(last_error().is_some());
    }
}
