//! Performance benchmarks for the subscription coordinator.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use chrono::{Months, NaiveDate};
use rink_sync::{
    Constraint, CoordinatorConfig, MemoryRemoteStore, NullSink, SubscriptionCoordinator,
};
use serde_json::json;
use std::sync::Arc;

fn create_coordinator(remote: &MemoryRemoteStore) -> SubscriptionCoordinator {
    SubscriptionCoordinator::new(
        CoordinatorConfig::default(),
        Arc::new(remote.clone()),
        Arc::new(NullSink),
    )
    .unwrap()
}

fn open_screens(coordinator: &SubscriptionCoordinator) {
    coordinator
        .add_listener(
            "bookings",
            "week-view".into(),
            Constraint::range("date", "2021-12-01", "2022-02-28").unwrap(),
        )
        .unwrap();
    coordinator
        .add_listener(
            "calendar",
            "week-view".into(),
            Constraint::documents(["2021-12", "2022-01", "2022-02"]).unwrap(),
        )
        .unwrap();
}

/// Benchmark pagination ticks that stay inside the covered window
fn bench_redundant_ticks(c: &mut Criterion) {
    let remote = MemoryRemoteStore::new();
    let coordinator = create_coordinator(&remote);
    open_screens(&coordinator);
    let driver = coordinator.pagination_driver();
    let date = NaiveDate::from_ymd_opt(2022, 1, 15).unwrap();

    c.bench_function("pagination_noop_tick", |b| {
        b.iter(|| {
            black_box(driver.on_date_changed(black_box(date)).unwrap());
        });
    });
}

/// Benchmark paging forward month by month from a fresh listener
fn bench_paging_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("paging_forward");

    for months in [1u32, 6, 24] {
        group.bench_with_input(BenchmarkId::new("months", months), &months, |b, &months| {
            b.iter(|| {
                let remote = MemoryRemoteStore::new();
                let coordinator = create_coordinator(&remote);
                open_screens(&coordinator);
                let driver = coordinator.pagination_driver();
                let start = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();

                for step in 1..=months {
                    let date = start.checked_add_months(Months::new(step)).unwrap();
                    driver.on_date_changed(date).unwrap();
                }
                black_box(remote.active_subscriptions());
            });
        });
    }

    group.finish();
}

/// Benchmark snapshot delivery into the cache
fn bench_snapshot_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_delivery");

    for docs in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("bookings", docs), &docs, |b, &docs| {
            let remote = MemoryRemoteStore::new();
            for i in 0..docs {
                let date = format!("2022-01-{:02}", i % 28 + 1);
                remote.put_document("bookings", format!("b{i}"), json!({"date": date}));
            }
            let coordinator = create_coordinator(&remote);
            open_screens(&coordinator);
            remote.deliver_pending();

            let mut version = 0u64;
            b.iter(|| {
                version += 1;
                remote.put_document(
                    "bookings",
                    "b0",
                    json!({"date": "2022-01-01", "version": version}),
                );
                black_box(remote.deliver_pending());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_redundant_ticks,
    bench_paging_forward,
    bench_snapshot_delivery
);
criterion_main!(benches);
