//! Concurrent `get`/`put_if_absent`/trim interleavings, run on real OS
//! threads via `scoped_threadpool` the way the teacher's own concurrent
//! tests do.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tiercache::{Controller, Key, Scheduler, TaskHandle, TieredCache, TieredCacheOptions};

struct NullScheduler;

impl Scheduler for NullScheduler {
    fn post_delayed(
        &self,
        _bus: &str,
        _delay: Duration,
        _task: Box<dyn FnMut() + Send>,
    ) -> TaskHandle {
        TaskHandle::default()
    }

    fn cancel(&self, _handle: TaskHandle) {}
}

struct CountingController {
    created: AtomicU32,
}

impl Controller<Key, u32> for CountingController {
    fn create(&self, key: &Key) -> u32 {
        self.created.fetch_add(1, Ordering::SeqCst);
        key.len() as u32
    }
}

#[test]
fn concurrent_get_does_not_corrupt_either_tier() {
    let cache = TieredCache::build(
        Arc::new(CountingController {
            created: AtomicU32::new(0),
        }),
        TieredCacheOptions {
            expire: None,
            min_hard_size: 8,
            max_hard_size: None,
        },
        Arc::new(NullScheduler),
    );

    let mut pool = scoped_threadpool::Pool::new(8);
    pool.scoped(|scope| {
        for t in 0..8u32 {
            let cache = Arc::clone(&cache);
            scope.execute(move || {
                for i in 0..500u32 {
                    let key = Key::new([(t * 500 + i) % 64]);
                    let _ = cache.get(&key, true);
                }
            });
        }
    });

    assert!(cache.hard_len() <= 64);
}

#[test]
fn concurrent_get_and_trim_interleave_safely() {
    let cache = TieredCache::build(
        Arc::new(CountingController {
            created: AtomicU32::new(0),
        }),
        TieredCacheOptions {
            expire: None,
            min_hard_size: 4,
            max_hard_size: None,
        },
        Arc::new(NullScheduler),
    );

    let mut pool = scoped_threadpool::Pool::new(4);
    pool.scoped(|scope| {
        for t in 0..3u32 {
            let cache = Arc::clone(&cache);
            scope.execute(move || {
                for i in 0..300u32 {
                    let key = Key::new([(t * 300 + i) % 32]);
                    let _ = cache.get(&key, true);
                }
            });
        }
        let trimmer_cache = Arc::clone(&cache);
        scope.execute(move || {
            for _ in 0..50 {
                trimmer_cache.trim_hard();
                trimmer_cache.trim_weak();
            }
        });
    });

    // No assertion on exact counts — this test's job is to finish without
    // deadlocking or panicking under concurrent mutation.
    let _ = cache.hard_len();
    let _ = cache.weak_len();
}

#[test]
fn concurrent_put_if_absent_never_produces_two_live_instances() {
    let cache = TieredCache::build(
        Arc::new(CountingController {
            created: AtomicU32::new(0),
        }),
        TieredCacheOptions {
            expire: None,
            min_hard_size: 16,
            max_hard_size: None,
        },
        Arc::new(NullScheduler),
    );

    let key = Key::new(["shared"]);
    let mut pool = scoped_threadpool::Pool::new(8);
    pool.scoped(|scope| {
        for t in 0..8u32 {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            scope.execute(move || {
                let _ = cache.put_if_absent(key, t);
            });
        }
    });

    // Exactly one of the 8 racing inserts won; every later read must see
    // that same resident instance.
    let resident = cache.get(&key, false).expect("key must be present after concurrent inserts");
    for _ in 0..8 {
        let seen = cache.get(&key, false).unwrap();
        assert!(Arc::ptr_eq(&resident, &seen));
    }
}
