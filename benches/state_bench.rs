//! Criterion micro-benchmarks for the state engine hot paths.
//!
//! These benchmarks measure:
//! - Key encoding of composite column family keys
//! - Command application (one transaction per command)
//! - Distribution and acknowledgment round trips
//! - Snapshotting the committed keyspace
//!
//! Run with: `cargo bench --bench state_bench`

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use statehouse::db::{DbKey, StateDb};
use statehouse::state::{
    CommandDistributionRecord, DistributionCommand, EngineCommand, ProcessingState, UserCommand,
    UserRecord,
};

fn bench_key_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_encoding");

    group.bench_function("u64", |b| {
        b.iter(|| black_box(black_box(42u64).encode()));
    });

    group.bench_function("queue_key", |b| {
        let key = ("deployments".to_string(), 7i32, 123_456u64);
        b.iter(|| black_box(key.encode()));
    });

    group.finish();
}

fn bench_apply_user_commands(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_user_commands");

    for count in [100u64, 1_000].iter() {
        group.throughput(Throughput::Elements(*count));
        group.bench_with_input(BenchmarkId::new("create", count), count, |b, &count| {
            b.iter(|| {
                let state = ProcessingState::new(StateDb::default(), 1, 1);
                for key in 0..count {
                    let _ = state.apply(EngineCommand::User(UserCommand::Create {
                        user: UserRecord::new(key, format!("user-{key}")),
                    }));
                }
                black_box(state);
            });
        });
    }

    group.finish();
}

fn bench_distribution_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("distribution_round_trip");

    for partitions in [3i32, 16].iter() {
        group.bench_with_input(
            BenchmarkId::new("distribute_acknowledge", partitions),
            partitions,
            |b, &partitions| {
                let state = ProcessingState::new(StateDb::default(), 1, partitions);
                let record =
                    CommandDistributionRecord::new(1, "USER", "CREATE", Bytes::from_static(b"x"));
                b.iter(|| {
                    let Ok(response) =
                        state.apply(EngineCommand::Distribution(DistributionCommand::Distribute {
                            record: record.clone(),
                        }))
                    else {
                        return;
                    };
                    let Some(key) = response
                        .distribution_effects()
                        .and_then(|effects| effects.distribution_key)
                    else {
                        return;
                    };
                    for partition in 2..=partitions {
                        let _ = state.apply(EngineCommand::Distribution(
                            DistributionCommand::Acknowledge {
                                distribution_key: key,
                                partition,
                            },
                        ));
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let state = ProcessingState::new(StateDb::default(), 1, 1);
    for key in 0..1_000u64 {
        let _ = state.apply(EngineCommand::User(UserCommand::Create {
            user: UserRecord::new(key, format!("user-{key}")),
        }));
    }

    c.bench_function("snapshot_1000_users", |b| {
        b.iter(|| black_box(state.db().snapshot()));
    });
}

criterion_group!(
    benches,
    bench_key_encoding,
    bench_apply_user_commands,
    bench_distribution_round_trip,
    bench_snapshot,
);
criterion_main!(benches);
