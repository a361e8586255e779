use criterion::{criterion_group, criterion_main, Criterion};

use keyql_core::{ExecuteCtx, MemStore, Optimizer};

fn seeded_store() -> MemStore {
    MemStore::from_pairs((0..10_000).map(|i| {
        (
            format!("user{i:05}").into_bytes(),
            format!("name{i}_{}", i % 97).into_bytes(),
        )
    }))
}

fn drain(store: &MemStore, query: &str) -> usize {
    let mut plan = Optimizer::new(query).build_plan(store).unwrap();
    let mut ctx = ExecuteCtx::new();
    let mut rows = 0;
    loop {
        let chunk = plan.batch(&mut ctx).unwrap();
        if chunk.is_empty() {
            break;
        }
        rows += chunk.len();
    }
    rows
}

fn bench_queries(c: &mut Criterion) {
    let store = seeded_store();

    c.bench_function("plan_only", |b| {
        b.iter(|| {
            Optimizer::new("select key, int(split(value, '_')[1]) as n where key ^= 'user0' & n > 10")
                .build_plan(&store)
                .unwrap()
        })
    });

    c.bench_function("prefix_scan", |b| {
        b.iter(|| drain(&store, "where key ^= 'user00'"))
    });

    c.bench_function("filtered_projection", |b| {
        b.iter(|| {
            drain(
                &store,
                "select key, int(split(value, '_')[1]) as n where key ^= 'user0' & n > 50",
            )
        })
    });

    c.bench_function("group_by_aggregate", |b| {
        b.iter(|| {
            drain(
                &store,
                "select split(value, '_')[1] as g, count(1) as c where key ^= 'user0' group by g",
            )
        })
    });
}

criterion_group!(benches, bench_queries);
criterion_main!(benches);
