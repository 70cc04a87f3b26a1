use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use semstore::{namespace, EntityKey, PredefinedProperty, Property, SemanticData, SemanticStore, StoreConfig};

fn store() -> SemanticStore {
    SemanticStore::in_memory(StoreConfig {
        enable_update_jobs: false,
        ..StoreConfig::default()
    })
    .unwrap()
}

fn page(values: usize, generation: usize) -> SemanticData {
    let mut data = SemanticData::new(EntityKey::new("Bench", namespace::MAIN)).with_value(
        Property::predefined(PredefinedProperty::Instance),
        EntityKey::new("Benchmark", namespace::CATEGORY),
    );
    for i in 0..values {
        // One value in ten changes per generation.
        let value = if i % 10 == 0 { i + generation } else { i };
        data.add_value(
            Property::new(format!("P{}", i % 8)).unwrap(),
            (value as f64).into(),
        );
        data.add_value(
            Property::new("Links_to").unwrap(),
            EntityKey::new(format!("Target_{i}"), namespace::MAIN).into(),
        );
    }
    data
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_data");
    for values in [16usize, 128] {
        group.throughput(Throughput::Elements(values as u64));

        group.bench_with_input(BenchmarkId::new("unchanged", values), &values, |b, &values| {
            let store = store();
            let data = page(values, 0);
            store.update_data(&data).unwrap();
            b.iter(|| black_box(store.update_data(&data).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("partial_change", values), &values, |b, &values| {
            let store = store();
            let generations: Vec<SemanticData> = (0..2).map(|g| page(values, g)).collect();
            let mut round = 0usize;
            b.iter(|| {
                round += 1;
                black_box(store.update_data(&generations[round % 2]).unwrap())
            });
        });
    }
    group.finish();
}

fn bench_id_lookup(c: &mut Criterion) {
    let store = store();
    let keys: Vec<EntityKey> = (0..1024)
        .map(|i| EntityKey::new(format!("Page_{i}"), namespace::MAIN))
        .collect();
    for key in &keys {
        store.ids().make_id(key, None, true, false).unwrap();
    }

    c.bench_function("get_id_cached", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % 64;
            black_box(store.ids().get_id(&keys[i]).unwrap())
        });
    });
    c.bench_function("get_id_cold", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % keys.len();
            store.ids().clear_caches();
            black_box(store.ids().get_id(&keys[i]).unwrap())
        });
    });
}

criterion_group!(benches, bench_update, bench_id_lookup);
criterion_main!(benches);
