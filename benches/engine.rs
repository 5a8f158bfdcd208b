use bitcask::Engine;
use criterion::{criterion_group, criterion_main, Criterion};

fn put(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(dir.path()).unwrap();

    let mut i = 0_u64;
    c.bench_function("put", |b| {
        b.iter(|| {
            engine
                .put(&format!("key_{i}"), format!("data_{i}").as_bytes())
                .unwrap();
            i += 1;
        });
    });
}

fn get_hit(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(dir.path()).unwrap();
    for i in 0..10_000 {
        engine
            .put(&format!("key_{i}"), format!("data_{i}").as_bytes())
            .unwrap();
    }

    let mut rng_state = 0_u64;
    c.bench_function("get (existing key)", |b| {
        b.iter(|| {
            rng_state = rng_state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let key = format!("key_{}", rng_state % 10_000);
            assert!(engine.get(&key).unwrap().is_some());
        });
    });
}

fn merge(c: &mut Criterion) {
    use bitcask::Config;

    c.bench_function("merge 1000 overwritten keys across 8 archives", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().unwrap();
                let engine = Engine::open_with_config(dir.path(), Config::new().max_size(4096))
                    .unwrap();
                for round in 0..8 {
                    for i in 0..1000 {
                        engine
                            .put(&format!("key_{i}"), format!("round_{round}").as_bytes())
                            .unwrap();
                    }
                }
                (dir, engine)
            },
            |(_dir, engine)| engine.merge().unwrap(),
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, put, get_hit, merge);
criterion_main!(benches);
