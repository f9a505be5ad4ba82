//! Multithreaded stress tests for `handle_pool`.
//!
//! Many threads acquire and release handles at the same time while the bookkeeping is checked
//! for exclusivity and the admission limit.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use foldhash::{HashSet, HashSetExt};
use handle_pool::{BoxError, ErrorKind, Handle, HandleId, HandlePool, Priority};
use parking_lot::Mutex;
use testing::{Gate, wait_until, with_watchdog};

const THREADS: usize = 8;
const ITERATIONS: usize = 200;
const MAX_CONCURRENCY: usize = 3;

#[derive(Debug)]
struct Connection;

impl Handle for Connection {
    fn open(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    fn close(&mut self) {}
}

fn pool() -> Arc<HandlePool<Connection>> {
    Arc::new(
        HandlePool::builder("stress.db", || Ok(Connection))
            .max_concurrency(MAX_CONCURRENCY.try_into().unwrap())
            .build(),
    )
}

#[cfg_attr(miri, ignore)] // Too slow under Miri.
#[test]
fn concurrent_flow_out_never_shares_a_handle() {
    with_watchdog(|| {
        let pool = pool();
        let checked_out = Arc::new(Mutex::new(HashSet::<HandleId>::new()));
        let peak = Arc::new(AtomicUsize::new(0));

        let workers = (0..THREADS)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let checked_out = Arc::clone(&checked_out);
                let peak = Arc::clone(&peak);

                thread::spawn(move || {
                    for _ in 0..ITERATIONS {
                        let handle = match pool.flow_out() {
                            Ok(handle) => handle,
                            Err(error) => {
                                assert_eq!(error.kind(), ErrorKind::CapacityExceeded);
                                thread::yield_now();
                                continue;
                            }
                        };

                        {
                            let mut checked_out = checked_out.lock();
                            assert!(
                                checked_out.insert(handle.id()),
                                "handle {} dispensed twice",
                                handle.id()
                            );
                            peak.fetch_max(checked_out.len(), Ordering::Relaxed);
                        }

                        thread::yield_now();

                        checked_out.lock().remove(&handle.id());
                        handle.release();
                    }
                })
            })
            .collect::<Vec<_>>();

        for worker in workers {
            worker.join().unwrap();
        }

        assert!(peak.load(Ordering::Relaxed) <= MAX_CONCURRENCY);
        assert_eq!(pool.alive_handle_count(), 0);
        assert!(pool.handle_count() <= MAX_CONCURRENCY);
        assert_eq!(pool.idle_handle_count(), pool.handle_count());
    });
}

#[cfg_attr(miri, ignore)] // Too slow under Miri.
#[test]
fn config_changes_race_with_acquisitions() {
    with_watchdog(|| {
        let pool = pool();

        let workers = (0..THREADS)
            .map(|_| {
                let pool = Arc::clone(&pool);

                thread::spawn(move || {
                    for _ in 0..ITERATIONS {
                        if let Ok(handle) = pool.flow_out() {
                            // The configs may have changed again after flow_out() returned.
                            assert!(handle.configured_version() <= pool.config_version());
                        }
                    }
                })
            })
            .collect::<Vec<_>>();

        for round in 0..ITERATIONS {
            let name = format!("step_{}", round % 4);
            pool.set_config(
                name,
                |_: &mut Connection| -> Result<(), BoxError> { Ok(()) },
                Priority::DEFAULT,
            );
        }

        for worker in workers {
            worker.join().unwrap();
        }

        let handle = pool.flow_out().unwrap();
        assert_eq!(handle.configured_version(), pool.config_version());
    });
}

#[cfg_attr(miri, ignore)] // Too slow under Miri.
#[test]
fn drain_completes_when_other_thread_releases() {
    with_watchdog(|| {
        let pool = pool();
        let release = Gate::new();
        let acquired = Gate::new();

        let holder = thread::spawn({
            let pool = Arc::clone(&pool);
            let release = release.clone();
            let acquired = acquired.clone();

            move || {
                let handle = pool.flow_out().unwrap();
                acquired.open();

                release.wait();
                handle.release();
            }
        });

        acquired.wait();

        let drainer = thread::spawn({
            let pool = Arc::clone(&pool);
            move || pool.drain(|| pool.handle_count())
        });

        wait_until(|| pool.is_blockaded());
        assert_eq!(pool.alive_handle_count(), 1);

        release.open();

        holder.join().unwrap();
        assert_eq!(drainer.join().unwrap(), 0);
        assert!(!pool.is_blockaded());
    });
}

#[cfg_attr(miri, ignore)] // Too slow under Miri.
#[test]
fn repeated_drains_under_load() {
    with_watchdog(|| {
        let pool = pool();
        let drains = Arc::new(AtomicUsize::new(0));

        let workers = (0..THREADS)
            .map(|_| {
                let pool = Arc::clone(&pool);

                thread::spawn(move || {
                    for _ in 0..ITERATIONS {
                        match pool.flow_out() {
                            Ok(handle) => handle.release(),
                            Err(error) => assert!(matches!(
                                error.kind(),
                                ErrorKind::Blockaded | ErrorKind::CapacityExceeded
                            )),
                        }
                    }
                })
            })
            .collect::<Vec<_>>();

        for _ in 0..10 {
            let drains = Arc::clone(&drains);

            let alive = pool.drain(|| {
                drains.fetch_add(1, Ordering::Relaxed);
                pool.handle_count()
            });

            assert_eq!(alive, 0);
        }

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(drains.load(Ordering::Relaxed), 10);
        assert!(!pool.is_blockaded());
    });
}
