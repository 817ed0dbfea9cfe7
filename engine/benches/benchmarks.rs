//! Performance benchmarks for tether-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use tether_engine::{
    Anchor, Collection, Notification, OrderedMirror, Priority, Record, RecordBody,
};

fn record(i: u64) -> Record {
    Record::new(
        format!("r{i:08}"),
        Priority::from(((i * 7919) % 100_000) as i64),
        RecordBody::from_value(json!({"title": "Test item", "n": i})).unwrap(),
    )
}

fn populated(size: u64) -> OrderedMirror {
    OrderedMirror::from_records((0..size).map(record)).unwrap()
}

fn bench_mirror_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("mirror_operations");

    group.bench_function("insert", |b| {
        let mut mirror = OrderedMirror::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            mirror.insert(black_box(record(i)))
        })
    });

    for size in [100u64, 1_000, 10_000] {
        let mirror = populated(size);
        group.bench_with_input(BenchmarkId::new("index_of", size), &mirror, |b, mirror| {
            let id = format!("r{:08}", size / 2);
            b.iter(|| mirror.index_of(black_box(&id)))
        });
    }

    group.bench_function("relocate_1000", |b| {
        let mut mirror = populated(1_000);
        let mut p = 0i64;
        b.iter(|| {
            p = (p + 37) % 100_000;
            mirror.relocate(black_box("r00000500"), Priority::from(p), None)
        })
    });

    group.finish();
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");

    for size in [100u64, 1_000] {
        group.bench_with_input(BenchmarkId::new("initial_sync", size), &size, |b, &size| {
            b.iter(|| {
                let mut collection = Collection::new();
                let mut prev: Option<String> = None;
                for i in 0..size {
                    let id = format!("r{i:08}");
                    collection
                        .apply(Notification::Added {
                            id: id.clone(),
                            priority: Priority::None,
                            after: Anchor::from_preceding(prev.take()),
                            body: RecordBody::Primitive(json!(i)),
                        })
                        .unwrap();
                    prev = Some(id);
                }
                collection.apply(Notification::Ready).unwrap();
                black_box(collection.len())
            })
        });
    }

    group.bench_function("echo_of_local_add", |b| {
        let mut collection = Collection::with_mirror(populated(1_000));
        let mut i = 1_000_000u64;
        b.iter(|| {
            i += 1;
            let rec = record(i);
            let write = collection
                .begin_add(rec.id.clone(), rec.priority.clone(), rec.body.clone())
                .unwrap();
            collection
                .apply(Notification::Added {
                    id: rec.id,
                    priority: rec.priority,
                    after: Anchor::First,
                    body: rec.body,
                })
                .unwrap();
            collection.complete(write.ticket);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_mirror_operations, bench_reconcile);
criterion_main!(benches);
