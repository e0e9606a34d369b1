//! Performance benchmarks for tidepool-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use tidepool_engine::{Query, RecordId, SaveOptions, Store, StoreSnapshot};

fn users(count: i64) -> Vec<Value> {
    (0..count)
        .map(|i| {
            let dept = ["Accounting", "IT", "Marketing"][(i % 3) as usize];
            json!({
                "id": i,
                "fname": format!("User {}", i % 50),
                "dept": dept,
                "tags": [i % 10, i % 7],
            })
        })
        .collect()
}

fn seeded(count: i64) -> Store {
    let mut store = Store::new("users");
    let _ = store.reset(users(count));
    store
}

fn bench_store_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_operations");

    group.bench_function("save_new", |b| {
        let mut store = Store::new("users");
        let mut id = 0i64;

        b.iter(|| {
            id += 1;
            store.save(black_box(json!({"id": id, "fname": "Test"})), SaveOptions::default().silent())
        })
    });

    group.bench_function("save_existing", |b| {
        let mut store = seeded(1000);

        b.iter(|| {
            store.save(
                black_box(json!({"id": 500, "fname": "Updated"})),
                SaveOptions::default().silent(),
            )
        })
    });

    group.bench_function("get_record", |b| {
        let store = seeded(1000);
        let id = RecordId::Int(500);

        b.iter(|| store.get(black_box(&id)).is_some())
    });

    group.bench_function("dirty_scan", |b| {
        let mut store = seeded(1000);
        for i in (0..1000).step_by(10) {
            let _ = store.save(json!({"id": i}), SaveOptions::default().silent());
        }

        b.iter(|| store.dirty().len())
    });

    group.finish();
}

fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");

    for size in [100i64, 1000, 10000].iter() {
        let store = seeded(*size);

        group.bench_with_input(BenchmarkId::new("literal_and", size), size, |b, _| {
            let query = Query::new().field("fname", "User 7").field("dept", "IT");
            b.iter(|| store.filter(black_box(&query), false).len())
        });

        group.bench_with_input(BenchmarkId::new("descriptor_or", size), size, |b, _| {
            let query = Query::new()
                .any_of("tags", [1, 2, 3])
                .any_of("dept", ["Accounting", "Marketing"]);
            b.iter(|| store.filter(black_box(&query), true).len())
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [100i64, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("export", size), size, |b, &size| {
            let store = seeded(size);
            b.iter(|| store.export_state().to_json())
        });

        group.bench_with_input(BenchmarkId::new("import", size), size, |b, &size| {
            let json = seeded(size).export_state().to_json().unwrap_or_default();
            b.iter(|| {
                let mut store = Store::new("users");
                StoreSnapshot::from_json(black_box(&json)).map(|snapshot| store.import_state(snapshot))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_store_operations, bench_filter, bench_snapshot);
criterion_main!(benches);
