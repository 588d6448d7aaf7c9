//! Performance benchmarks for the channel store.

use channel_store::{
    ChannelLimits, FileStore, FileStoreConfig, LimitsResolver, MemoryStore, MsgStoreLimits, Store,
    StoreLimits, SubState,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tempfile::TempDir;

fn limits_with_overrides(count: usize) -> StoreLimits {
    let mut limits = StoreLimits::default();
    limits.max_channels = 0;
    for i in 0..count {
        let limits_for = ChannelLimits {
            msgs: MsgStoreLimits {
                max_msgs: (i + 1) as i64,
                ..Default::default()
            },
            ..Default::default()
        };
        limits.add_per_channel(format!("svc{}.*", i), limits_for);
        limits.add_per_channel(format!("svc{}.orders.>", i), limits_for);
    }
    limits
}

/// Benchmark limits resolution with a growing number of overrides
fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    for overrides in [10, 100, 1000] {
        let resolver = LimitsResolver::configure(&limits_with_overrides(overrides)).unwrap();
        group.bench_with_input(
            BenchmarkId::new("overrides", overrides),
            &resolver,
            |b, resolver| {
                b.iter(|| {
                    black_box(resolver.resolve("svc7.orders.created"));
                    black_box(resolver.resolve("unmatched.channel"));
                });
            },
        );
    }

    group.finish();
}

/// Benchmark building limits (validation and inheritance)
fn bench_configure(c: &mut Criterion) {
    let mut group = c.benchmark_group("configure");

    for overrides in [10, 100, 1000] {
        let limits = limits_with_overrides(overrides);
        group.bench_with_input(
            BenchmarkId::new("overrides", overrides),
            &limits,
            |b, limits| {
                b.iter(|| black_box(LimitsResolver::configure(limits).unwrap()));
            },
        );
    }

    group.finish();
}

/// Benchmark message stores, with and without eviction
fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");
    let payload = vec![0u8; 256];

    for max_msgs in [0i64, 1000] {
        let mut limits = StoreLimits::default();
        limits.channel.msgs.max_msgs = max_msgs;
        let store = MemoryStore::new(Some(&limits)).unwrap();
        let (cs, _) = store.create_channel("bench", None).unwrap();

        group.bench_with_input(
            BenchmarkId::new("memory_max_msgs", max_msgs),
            &payload,
            |b, payload| {
                b.iter(|| black_box(cs.msgs.store(payload).unwrap()));
            },
        );
    }

    let dir = TempDir::new().unwrap();
    let store = FileStore::open(
        FileStoreConfig {
            path: dir.path().join("store"),
            sync_interval: 1000,
            ..Default::default()
        },
        None,
    )
    .unwrap();
    let (cs, _) = store.create_channel("bench", None).unwrap();
    group.bench_function("file", |b| {
        b.iter(|| black_box(cs.msgs.store(&payload).unwrap()));
    });

    group.finish();
}

/// Benchmark subscription creation
fn bench_create_sub(c: &mut Criterion) {
    let mut limits = StoreLimits::default();
    limits.channel.subs.max_subscriptions = 0;
    let store = MemoryStore::new(Some(&limits)).unwrap();
    let (cs, _) = store.create_channel("bench", None).unwrap();

    c.bench_function("create_sub", |b| {
        b.iter(|| {
            let mut sub = SubState {
                client_id: "bench".into(),
                inbox: "_INBOX.bench".into(),
                ..Default::default()
            };
            cs.subs.create_sub(&mut sub).unwrap();
            black_box(sub.id)
        });
    });
}

criterion_group!(
    benches,
    bench_resolve,
    bench_configure,
    bench_store,
    bench_create_sub
);
criterion_main!(benches);
