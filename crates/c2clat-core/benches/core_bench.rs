//! Criterion micro-benchmarks for the per-round hot paths.
//!
//! - Registry resolution (hit under the shared lock, first discovery)
//! - Baton exchange between two threads
//! - Matrix resort over a 64-core matrix

use std::hint::black_box;
use std::thread;
use std::time::{Duration, Instant};

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use c2clat_core::{CoreRegistry, Experiment, ExperimentMatrix, Role};
use c2clat_probe::PhysicalCoreId;

fn criterion_config() -> Criterion {
    Criterion::default().configure_from_args()
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

fn bench_registry_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry/resolve");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1));

    group.bench_function("hit", |b| {
        let registry = CoreRegistry::new(64);
        for raw in 0..64 {
            registry.resolve(PhysicalCoreId::new(raw * 3));
        }
        let id = PhysicalCoreId::new(60);
        b.iter(|| black_box(registry.resolve(black_box(id))));
    });

    group.bench_function("discover_64", |b| {
        b.iter_batched(
            || CoreRegistry::new(64),
            |registry| {
                for raw in 0..64 {
                    black_box(registry.resolve(PhysicalCoreId::new(raw)));
                }
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Baton
// ---------------------------------------------------------------------------

/// Round trips of the baton between this thread and one partner.
fn bench_baton_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("baton/round_trip");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1));

    group.bench_function("two_threads", |b| {
        b.iter_custom(|iters| {
            let experiment = Experiment::new(0, 1);
            thread::scope(|s| {
                s.spawn(|| {
                    for _ in 0..iters {
                        experiment.pass_baton(Role::Destination);
                    }
                });
                let start = Instant::now();
                for _ in 0..iters {
                    experiment.pass_baton(Role::Source);
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

fn bench_resort(c: &mut Criterion) {
    let mut group = c.benchmark_group("matrix/resort");
    group.sample_size(50);

    for &cores in &[8_usize, 32, 64] {
        let pairs = cores * (cores - 1);
        group.throughput(Throughput::Elements(pairs as u64));
        group.bench_with_input(BenchmarkId::new("cores", cores), &cores, |b, &n| {
            let matrix = ExperimentMatrix::new(n, u32::MAX);
            b.iter(|| black_box(matrix.resort()));
        });
    }

    group.finish();
}

criterion_group!(
    name = registry;
    config = criterion_config();
    targets = bench_registry_resolve
);

criterion_group!(
    name = baton;
    config = criterion_config();
    targets = bench_baton_round_trip
);

criterion_group!(
    name = scheduler;
    config = criterion_config();
    targets = bench_resort
);

criterion_main!(registry, baton, scheduler);
