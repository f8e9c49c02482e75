//! Benchmarks for ShardCache put/get throughput

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use shardcache::{Config, InMemDataStore, Record};
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> InMemDataStore {
    let config = Config::builder()
        .output_dir(dir.path())
        .num_shards(16)
        .num_persisters(4)
        .queue_capacity(4096)
        .write_log_interval(0)
        .build();
    let store = InMemDataStore::open(config).unwrap();
    store.start().unwrap();
    store
}

fn store_benchmarks(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut ts = 0i64;

    c.bench_function("put_single_key", |b| {
        b.iter_batched(
            || {
                ts += 1;
                Record::new().with("id", "sensor0").with("collection_time", ts)
            },
            |record| store.put(black_box("sensor0"), record).unwrap(),
            BatchSize::SmallInput,
        )
    });

    let mut i = 0u64;
    c.bench_function("put_spread_keys", |b| {
        b.iter_batched(
            || {
                i += 1;
                let key = format!("sensor{}", i % 1000);
                let record = Record::new().with("id", key.as_str()).with("collection_time", i as i64);
                (key, record)
            },
            |(key, record)| store.put(&key, record).unwrap(),
            BatchSize::SmallInput,
        )
    });

    c.bench_function("get_hit", |b| b.iter(|| store.get(black_box("sensor0")).unwrap()));

    store.shutdown().unwrap();
}

criterion_group!(benches, store_benchmarks);
criterion_main!(benches);
