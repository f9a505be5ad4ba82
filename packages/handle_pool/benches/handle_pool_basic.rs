//! Basic benchmarks for the `handle_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::time::Instant;

use criterion::{Criterion, criterion_group, criterion_main};
use handle_pool::{BoxError, Handle, HandlePool, Priority};
use new_zealand::nz;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

struct Connection {
    statements: usize,
}

impl Handle for Connection {
    fn open(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    fn close(&mut self) {}
}

fn new_pool() -> HandlePool<Connection> {
    HandlePool::builder("bench.db", || Ok(Connection { statements: 0 }))
        .max_concurrency(nz!(4))
        .build()
}

fn run_statement(connection: &mut Connection) -> Result<(), BoxError> {
    connection.statements = connection.statements.wrapping_add(1);
    Ok(())
}

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("handle_pool_basic");

    group.bench_function("flow_out_idle", |b| {
        let pool = new_pool();
        pool.flow_out().unwrap().release();

        b.iter(|| {
            let handle = black_box(pool.flow_out().unwrap());
            handle.release();
        });
    });

    group.bench_function("flow_out_stale", |b| {
        b.iter_custom(|iters| {
            let pool = new_pool();
            pool.flow_out().unwrap().release();

            let start = Instant::now();

            for _ in 0..iters {
                // Every change makes the idle handle stale again.
                pool.set_config("statement", run_statement, Priority::DEFAULT);
                let handle = black_box(pool.flow_out().unwrap());
                handle.release();
            }

            start.elapsed()
        });
    });

    group.bench_function("create_and_purge", |b| {
        let pool = new_pool();

        b.iter(|| {
            pool.flow_out().unwrap().release();
            black_box(pool.purge());
        });
    });

    group.bench_function("drain_idle", |b| {
        let pool = new_pool();

        b.iter(|| {
            pool.flow_out().unwrap().release();
            pool.drain(|| black_box(pool.handle_count()));
        });
    });

    group.finish();
}
