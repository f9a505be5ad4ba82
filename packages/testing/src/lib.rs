#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing code that blocks on other threads.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// How long a test may run before the watchdog gives up on it.
///
/// Miri is dramatically slower for thread synchronization, so it gets more time.
fn watchdog_timeout() -> Duration {
    if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    }
}

/// Runs a test on a separate thread and fails it if it does not finish in time.
///
/// Use this for every test that waits on another thread (e.g. a drain waiting for handles to
/// be released), so that a bug turns into a test failure instead of a hung test run.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled so
/// that mutation testing can detect mutations that cause hangs.
///
/// # Panics
///
/// Panics if the test exceeds the timeout, and re-raises any panic from the test itself.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let answer = with_watchdog(|| 6 * 7);
/// assert_eq!(answer, 42);
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (result_tx, result_rx) = mpsc::channel();

    let test_thread = thread::Builder::new()
        .name("watched-test".to_string())
        .spawn(move || {
            // The receiver is gone if the watchdog already timed out.
            drop(result_tx.send(test_fn()));
        })
        .expect("failed to spawn test thread");

    let timeout = watchdog_timeout();

    match result_rx.recv_timeout(timeout) {
        Ok(result) => {
            test_thread.join().expect("test thread finished but could not be joined");
            result
        }
        Err(RecvTimeoutError::Timeout) => {
            panic!("test did not finish within {timeout:?}");
        }
        Err(RecvTimeoutError::Disconnected) => match test_thread.join() {
            Ok(()) => panic!("test thread exited without producing a result"),
            Err(payload) => std::panic::resume_unwind(payload),
        },
    }
}

/// A one-shot gate that threads can wait on until some other thread opens it.
///
/// Clones refer to the same gate. Once opened, the gate stays open.
///
/// # Example
///
/// ```rust
/// use std::thread;
///
/// use testing::Gate;
///
/// let gate = Gate::new();
///
/// let worker = thread::spawn({
///     let gate = gate.clone();
///     move || {
///         gate.wait();
///         "released"
///     }
/// });
///
/// gate.open();
/// assert_eq!(worker.join().unwrap(), "released");
/// ```
#[derive(Clone, Debug, Default)]
pub struct Gate {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    /// Creates a closed gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the gate, releasing all current and future waiters.
    pub fn open(&self) {
        let (is_open, opened) = &*self.state;

        *is_open.lock() = true;
        opened.notify_all();
    }

    /// Whether the gate has been opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.state.0.lock()
    }

    /// Blocks the current thread until the gate is opened.
    pub fn wait(&self) {
        let (is_open, opened) = &*self.state;

        let mut guard = is_open.lock();
        while !*guard {
            opened.wait(&mut guard);
        }
    }
}

/// Polls `condition` until it returns `true`.
///
/// Useful for observing that another thread has reached a blocking point that offers no
/// signal of its own, such as a drain that is waiting for handles.
///
/// # Panics
///
/// Panics if the condition does not become true within the watchdog timeout.
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now()
        .checked_add(watchdog_timeout())
        .expect("deadline is always representable");

    while !condition() {
        assert!(
            Instant::now() < deadline,
            "condition did not become true within {:?}",
            watchdog_timeout()
        );

        thread::sleep(Duration::from_millis(1));
    }
}
