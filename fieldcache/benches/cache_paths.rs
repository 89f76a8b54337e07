use criterion::{criterion_group, criterion_main, Criterion};
use fieldcache::{
    build_key, Arguments, CacheEntry, FieldCache, FieldInvocation, MemoryStore, Policy,
    PolicyRegistry, StorageBackend,
};
use serde_json::{json, Value};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn args(value: Value) -> Arguments {
    match value {
        Value::Object(map) => map,
        _ => Arguments::new(),
    }
}

fn bench_build_key(c: &mut Criterion) {
    let flat = args(json!({"page": 1, "size": 3}));
    let nested = args(json!({
        "filter": {"name": {"startsWith": "A"}, "groups": [10, 12, 15], "active": true},
        "order": [{"field": "name", "dir": "asc"}],
        "page": 4,
        "size": 25,
    }));

    c.bench_function("keys/flat", |b| {
        b.iter(|| black_box(build_key("users", black_box(&flat))));
    });
    c.bench_function("keys/nested", |b| {
        b.iter(|| black_box(build_key("users", black_box(&nested))));
    });
}

fn bench_memory_store(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("build runtime");
    let store = MemoryStore::new(1_024);

    runtime.block_on(async {
        for i in 0..1_024 {
            let entry = CacheEntry::new(format!("user:{}", i), json!({"id": i}), Duration::from_secs(600));
            store.set(entry).await.expect("seed store");
        }
    });

    c.bench_function("memory/get_hit", |b| {
        b.to_async(&runtime)
            .iter(|| async { black_box(store.get("user:512").await.expect("get")) });
    });

    let mut next = 0u64;
    c.bench_function("memory/set_evicting", |b| {
        b.to_async(&runtime).iter(|| {
            next += 1;
            let entry = CacheEntry::new(format!("fresh:{}", next), json!(next), Duration::from_secs(600));
            let store = &store;
            async move { store.set(entry).await.expect("set") }
        });
    });
}

fn bench_resolve_hit(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("build runtime");
    let policies = PolicyRegistry::builder()
        .query("user", Policy::references(|args, _| vec![format!("user:{}", args["id"])]))
        .build();

    let cache: FieldCache<String> = runtime.block_on(async {
        FieldCache::builder()
            .policies(policies)
            .storage(Arc::new(MemoryStore::new(1_024)))
            .build()
            .await
            .expect("build cache")
    });
    let arguments = args(json!({"id": 1}));

    runtime.block_on(async {
        cache
            .resolve(FieldInvocation::query("user", &arguments), || async {
                Ok(json!({"id": 1, "name": "Alice"}))
            })
            .await
            .expect("warm cache");
    });

    c.bench_function("resolve/hit", |b| {
        b.to_async(&runtime).iter(|| async {
            let value = cache
                .resolve(FieldInvocation::query("user", &arguments), || async {
                    Ok(Value::Null)
                })
                .await;
            black_box(value)
        });
    });
}

criterion_group!(benches, bench_build_key, bench_memory_store, bench_resolve_hit);
criterion_main!(benches);
