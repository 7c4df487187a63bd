use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use tiercache::{Controller, Key, Scheduler, TaskHandle, TieredCache, TieredCacheOptions};

struct NoopController;

impl Controller<Key, usize> for NoopController {
    fn create(&self, key: &Key) -> usize {
        key.len()
    }
}

struct NoopScheduler;

impl Scheduler for NoopScheduler {
    fn post_delayed(
        &self,
        _bus: &str,
        _delay: std::time::Duration,
        _task: Box<dyn FnMut() + Send>,
    ) -> TaskHandle {
        TaskHandle::default()
    }

    fn cancel(&self, _handle: TaskHandle) {}
}

fn make_cache(min_hard_size: u64) -> Arc<TieredCache<usize>> {
    TieredCache::build(
        Arc::new(NoopController),
        TieredCacheOptions {
            expire: None,
            min_hard_size,
            max_hard_size: None,
        },
        Arc::new(NoopScheduler),
    )
}

pub fn criterion_benchmark(c: &mut Criterion) {
    const CACHE_SIZE: u64 = 1000;
    let mut group = c.benchmark_group("TieredCache Operations");

    {
        let cache = make_cache(CACHE_SIZE);
        for i in 0..CACHE_SIZE {
            cache.get(&Key::new([i]), true);
        }

        group.bench_function("get hard hit", |b| {
            b.iter(|| {
                for i in 0..100u64 {
                    black_box(cache.get(&Key::new([i % CACHE_SIZE]), true));
                }
            });
        });

        group.bench_function("get on unseen key creates", |b| {
            b.iter(|| {
                for i in 0..100u64 {
                    black_box(cache.get(&Key::new([i + CACHE_SIZE]), true));
                }
            });
        });
    }

    {
        let cache = make_cache(CACHE_SIZE);
        for i in 0..CACHE_SIZE {
            cache.get(&Key::new([i]), true);
        }
        for _ in 0..5 {
            cache.trim_hard();
        }

        group.bench_function("get after hard-tier trim recovers from weak", |b| {
            b.iter(|| {
                for i in 0..100u64 {
                    black_box(cache.get(&Key::new([i % CACHE_SIZE]), true));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
