use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use regex::Regex;

use callisto::cache::{Binding, BindingOptions, Cache, CacheSettings, EntryStore};
use callisto::fmt::parse_duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn store_benchmarks(c: &mut Criterion) {
    c.bench_function("store lookup", |b| {
        let mut store = EntryStore::new();
        let now = tokio::time::Instant::now();
        for i in 0..1000 {
            store.set(format!("key-{}", i), i, Duration::from_secs(60), now);
        }

        b.iter(|| {
            black_box(store.get(black_box("key-500")).map(|entry| entry.is_valid(now)));
        })
    });

    c.bench_function("parse duration", |b| {
        b.iter(|| {
            black_box(parse_duration(black_box("15m")).unwrap());
        })
    });
}

fn binding_benchmarks(c: &mut Criterion) {
    c.bench_function("activate with a valid entry", |b| {
        let rt = runtime();
        let cache = Cache::new(CacheSettings::default());
        let binding: Binding<Vec<u32>> = cache.bind_with(
            "users",
            || async { Ok::<_, anyhow::Error>(vec![1, 2, 3]) },
            BindingOptions::default().with_ttl(Duration::from_secs(24 * 60 * 60)),
        );
        rt.block_on(async {
            let _ = binding.activate();
            let _ = binding.settled().await;
        });

        b.iter(|| {
            black_box(binding.activate());
        })
    });

    c.bench_function("cold fetch with ten joining bindings", |b| {
        b.iter_custom(|iters| {
            let rt = runtime();
            rt.block_on(async {
                let cache = Cache::new(CacheSettings::default());

                let start = Instant::now();
                for i in 0..iters {
                    let key = format!("key-{}", i);
                    let bindings: Vec<Binding<u64>> = (0..10)
                        .map(|_| cache.bind(key.as_str(), move || async move {
                            Ok::<_, anyhow::Error>(i)
                        }))
                        .collect();
                    for binding in &bindings {
                        let _ = binding.activate();
                    }
                    for binding in &bindings {
                        let _ = black_box(binding.settled().await);
                    }
                }
                start.elapsed()
            })
        })
    });

    c.bench_function("clear by pattern", |b| {
        let rt = runtime();
        let cache = Cache::new(CacheSettings::default());
        let pattern = Regex::new("^user:").unwrap();

        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                rt.block_on(async {
                    for i in 0..100 {
                        let binding: Binding<u32> = cache.bind(format!("user:{}", i), || async {
                            Ok::<_, anyhow::Error>(1)
                        });
                        let _ = binding.activate();
                        let _ = binding.settled().await;
                    }
                });

                let start = Instant::now();
                black_box(cache.clear_by_pattern(&pattern));
                total += start.elapsed();
            }
            total
        })
    });
}

criterion_group!(benches, store_benchmarks, binding_benchmarks);
criterion_main!(benches);
