//! Speculative patch benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use patchsync_bench::{host_tree, random_status_ops, status_path};
use patchsync_client::PatchLog;
use patchsync_protocol::{Dump, Operation, UpdateBatch};

/// Benchmark apply-then-retract with other patches already pending.
fn bench_speculate_and_retract(c: &mut Criterion) {
    let mut group = c.benchmark_group("speculate_retract");

    for pending in [0, 4, 16].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(pending),
            pending,
            |b, &pending| {
                let log = PatchLog::from_dump(Dump::new(host_tree(100), 0));
                for _ in 0..pending {
                    log.apply_speculative(random_status_ops(100, 2)).unwrap();
                }
                let ops = random_status_ops(100, 2);

                b.iter(|| {
                    let token = log.apply_speculative(black_box(ops.clone())).unwrap();
                    black_box(log.retract(token));
                });
            },
        );
    }
    group.finish();
}

/// Benchmark a durable commit that must replay pending patches on top.
fn bench_commit_under_speculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_with_pending");

    for pending in [1, 8, 32].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(pending),
            pending,
            |b, &pending| {
                let log = PatchLog::from_dump(Dump::new(host_tree(100), 0));
                for _ in 0..pending {
                    log.apply_speculative(random_status_ops(100, 1)).unwrap();
                }
                let op = Operation::replace(status_path("pkg-0000"), "running");
                let mut sequence = 0;

                b.iter(|| {
                    sequence += 1;
                    log.apply_batch(UpdateBatch::durable(sequence, vec![op.clone()]))
                        .unwrap();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark reading a path from the published snapshot.
fn bench_read(c: &mut Criterion) {
    let log = PatchLog::from_dump(Dump::new(host_tree(100), 0));
    log.apply_speculative(random_status_ops(100, 4)).unwrap();
    let path = status_path("pkg-0042");

    c.bench_function("get_status", |b| {
        b.iter(|| black_box(log.get(black_box(&path))));
    });
}

criterion_group!(
    benches,
    bench_speculate_and_retract,
    bench_commit_under_speculation,
    bench_read,
);

criterion_main!(benches);
