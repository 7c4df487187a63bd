//! Tiered Cache: a hard tier of strong references over a weak tier of
//! reclaimable ones, with a scheduled trimmer migrating between them.
//!
//! [`TieredCache`] is built from two [`crate::hotend::HotEndLru`]s — one
//! keyed by strong [`std::sync::Arc`] payloads (the hard tier, sized for
//! fast repeated lookups), one keyed by [`std::sync::Weak`] payloads (the
//! weak tier, sized much larger, retaining a tail of recently-evicted
//! values until the runtime actually reclaims them). A read consults hard
//! first; on a miss it tries to recover a still-live value from weak
//! before falling back to the user-supplied [`crate::controller::Controller`]
//! to construct a fresh one. A background trimmer, scheduled through the
//! [`crate::scheduler::Scheduler`] trait, periodically demotes cold hard
//! entries into weak and sweeps weak entries whose reference has already
//! been reclaimed.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::controller::Controller;
use crate::entry::{now_millis, CacheEntry};
use crate::hotend::HotEndLru;
use crate::key::Key;
use crate::scheduler::{Scheduler, TaskHandle};

/// Extracts a printable message from a caught panic payload, the same
/// downcast-`&str`-then-`String` dance `std`'s own default panic hook does.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

const TRIM_HARD_INTERVAL: Duration = Duration::from_secs(90);
const TRIM_WEAK_INTERVAL: Duration = Duration::from_secs(270);
const TRIM_HARD_MAX_COUNT: u64 = 1000;
const TRIM_WEAK_MAX_COUNT: u64 = 2000;
const TRIM_WEAK_MAX_INTERVAL: Duration = Duration::from_secs(360);

const HARD_HOT_PERCENT: f64 = 0.75;
const WEAK_HOT_PERCENT: f64 = 0.6;
const GROWTH_FACTOR: f64 = 1.5;

/// Construction-time options for a [`TieredCache`].
#[derive(Clone, Debug)]
pub struct TieredCacheOptions {
    /// How long an entry may go unobserved before `get` posts an
    /// asynchronous refresh. `None` means entries never expire.
    pub expire: Option<Duration>,
    /// The hard tier's initial capacity, `H₀`. The weak tier's initial
    /// capacity is `8 · H₀`.
    pub min_hard_size: u64,
    /// An optional hard cap on how large the hard tier's 1.5× growth step
    /// may push `max_size`. `None` leaves it uncapped.
    pub max_hard_size: Option<u64>,
}

impl Default for TieredCacheOptions {
    fn default() -> Self {
        Self {
            expire: Some(Duration::from_secs(5 * 60)),
            min_hard_size: 64,
            max_hard_size: None,
        }
    }
}

/// A two-tier object cache: a hard tier of strong references backed by a
/// weak tier of reclaimable ones, with a scheduled trimmer between them.
pub struct TieredCache<V> {
    hard: HotEndLru<Key, CacheEntry<Arc<V>>>,
    weak: HotEndLru<Key, CacheEntry<Weak<V>>>,
    lock: RwLock<()>,
    h0: u64,
    w0: u64,
    expire: Option<Duration>,
    max_hard_size: Option<u64>,
    controller: Arc<dyn Controller<Key, V>>,
    scheduler: Arc<dyn Scheduler>,
    last_weak_trim: AtomicU64,
    hard_trim_handle: Mutex<Option<TaskHandle>>,
    weak_trim_handle: Mutex<Option<TaskHandle>>,
}

impl<V> fmt::Debug for TieredCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredCache")
            .field("hard_len", &self.hard.len())
            .field("weak_len", &self.weak.len())
            .field("hard_max_size", &self.hard.max_size())
            .field("weak_max_size", &self.weak.max_size())
            .finish()
    }
}

impl<V> TieredCache<V>
where
    V: Send + Sync + 'static,
{
    /// Builds a new tiered cache and schedules its two recurring trim
    /// tasks. Returned as `Arc<Self>` because the trim tasks themselves
    /// hold (and must outlive only as long as) a weak reference to it.
    pub fn build(
        controller: Arc<dyn Controller<Key, V>>,
        options: TieredCacheOptions,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        let h0 = options.min_hard_size.max(2);
        let w0 = h0.saturating_mul(8).max(2);
        let cache = Arc::new(Self {
            hard: HotEndLru::new(h0, HARD_HOT_PERCENT),
            weak: HotEndLru::new(w0, WEAK_HOT_PERCENT),
            lock: RwLock::new(()),
            h0,
            w0,
            expire: options.expire,
            max_hard_size: options.max_hard_size,
            controller,
            scheduler,
            last_weak_trim: AtomicU64::new(now_millis()),
            hard_trim_handle: Mutex::new(None),
            weak_trim_handle: Mutex::new(None),
        });
        cache.schedule_hard_trim();
        cache.schedule_weak_trim();
        cache
    }

    fn schedule_hard_trim(self: &Arc<Self>) {
        let weak_self = Arc::downgrade(self);
        let handle = self.scheduler.post_delayed(
            "tiercache-trim-hard",
            TRIM_HARD_INTERVAL,
            Box::new(move || {
                if let Some(cache) = weak_self.upgrade() {
                    cache.trim_hard();
                    cache.schedule_hard_trim();
                }
            }),
        );
        *self.hard_trim_handle.lock() = Some(handle);
    }

    fn schedule_weak_trim(self: &Arc<Self>) {
        let weak_self = Arc::downgrade(self);
        let handle = self.scheduler.post_delayed(
            "tiercache-trim-weak",
            TRIM_WEAK_INTERVAL,
            Box::new(move || {
                if let Some(cache) = weak_self.upgrade() {
                    cache.trim_weak();
                    cache.schedule_weak_trim();
                }
            }),
        );
        *self.weak_trim_handle.lock() = Some(handle);
    }

    /// If the key is present in hard, returns its value. Otherwise removes
    /// it from weak; a still-live weak reference is promoted to hard and
    /// returned (the supplied `value` is discarded in that case). If weak
    /// yields nothing, `value` is installed in hard and `None` returned.
    pub fn put_if_absent(&self, key: Key, value: V) -> Option<Arc<V>> {
        {
            let _read_guard = self.lock.read();
            if let Some(v) = self.hard.get_with(&key, |e| Arc::clone(e.payload())) {
                return Some(v);
            }
        }
        let _write_guard = self.lock.write();
        if let Some(v) = self.hard.get_with(&key, |e| Arc::clone(e.payload())) {
            return Some(v);
        }
        if let Some(weak_entry) = self.weak.remove(&key) {
            if let Some(recovered) = weak_entry.payload().upgrade() {
                self.put_to_hard(key, Arc::clone(&recovered), now_millis());
                return Some(recovered);
            }
        }
        self.put_to_hard(key, Arc::new(value), now_millis());
        None
    }

    /// Hard-tier fast path under the read lock; on a miss, recovers from
    /// weak or creates a fresh value under the write lock (re-consulting
    /// hard first, per the mandatory double-check pattern). If `auto_create`
    /// is false and nothing live was recovered, returns `None` instead of
    /// calling the controller. Posts an asynchronous refresh, after the
    /// lock is released, if the returned entry is past its expiry window.
    pub fn get(&self, key: &Key, auto_create: bool) -> Option<Arc<V>> {
        let mut pending_refresh = None;
        let fast = {
            let _read_guard = self.lock.read();
            self.read_hard_and_mark_refresh(key, &mut pending_refresh)
        };
        if let Some(value) = fast {
            self.post_pending_refresh(key, pending_refresh);
            return Some(value);
        }

        pending_refresh = None;
        let result = {
            let _write_guard = self.lock.write();
            if let Some(value) = self.read_hard_and_mark_refresh(key, &mut pending_refresh) {
                Some(value)
            } else if let Some(recovered) = self.recover_from_weak(key) {
                Some(recovered)
            } else if auto_create {
                let value = Arc::new(self.controller.create(key));
                self.put_to_hard(key.clone(), Arc::clone(&value), now_millis());
                Some(value)
            } else {
                None
            }
        };
        self.post_pending_refresh(key, pending_refresh);
        result
    }

    fn read_hard_and_mark_refresh(
        &self,
        key: &Key,
        pending_refresh: &mut Option<Arc<V>>,
    ) -> Option<Arc<V>> {
        self.hard.get_with(key, |entry| {
            let value = Arc::clone(entry.payload());
            if self.is_expired(entry.last_refresh_time()) {
                entry.touch();
                *pending_refresh = Some(Arc::clone(&value));
            }
            value
        })
    }

    fn recover_from_weak(&self, key: &Key) -> Option<Arc<V>> {
        let weak_entry = self.weak.remove(key)?;
        let value = weak_entry.payload().upgrade()?;
        self.put_to_hard(key.clone(), Arc::clone(&value), now_millis());
        Some(value)
    }

    fn post_pending_refresh(&self, key: &Key, pending_refresh: Option<Arc<V>>) {
        let Some(value) = pending_refresh else {
            return;
        };
        let controller = Arc::clone(&self.controller);
        let key = key.clone();
        self.scheduler.post_delayed(
            "tiercache-refresh",
            Duration::ZERO,
            Box::new(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    controller.on_need_refresh(&key, &value);
                }));
                if let Err(payload) = result {
                    tracing::error!(
                        key = %key,
                        panic_msg = panic_message(payload.as_ref()),
                        "controller.on_need_refresh panicked; dropping"
                    );
                }
            }),
        );
    }

    fn is_expired(&self, last_refresh_time: u64) -> bool {
        match self.expire {
            Some(window) => now_millis().saturating_sub(last_refresh_time) >= window.as_millis() as u64,
            None => false,
        }
    }

    /// Clears both tiers.
    pub fn clear(&self) {
        let _guard = self.lock.write();
        self.hard.clear();
        self.weak.clear();
    }

    /// Clears both tiers and cancels the scheduled trim tasks.
    pub fn release(&self) {
        self.clear();
        if let Some(handle) = self.hard_trim_handle.lock().take() {
            self.scheduler.cancel(handle);
        }
        if let Some(handle) = self.weak_trim_handle.lock().take() {
            self.scheduler.cancel(handle);
        }
    }

    fn put_to_hard(&self, key: Key, value: Arc<V>, last_refresh_time: u64) {
        if self.hard.cur_size() + 1 > self.hard.max_size() {
            let mut new_max = (self.hard.max_size() as f64 * GROWTH_FACTOR).floor() as u64;
            if let Some(cap) = self.max_hard_size {
                new_max = new_max.min(cap);
            }
            if new_max > self.hard.max_size() {
                self.hard.resize(new_max, HARD_HOT_PERCENT);
            }
        }
        let entry = CacheEntry::with_last_refresh_time(key.clone(), value, last_refresh_time);
        self.hard.put(key, entry, 1);
    }

    fn put_to_weak(&self, key: Key, payload: Weak<V>, last_refresh_time: u64) {
        if self.weak.cur_size() + 1 > self.weak.max_size() {
            let new_max = (self.weak.max_size() as f64 * GROWTH_FACTOR).floor() as u64;
            if new_max > self.weak.max_size() {
                self.weak.resize(new_max, WEAK_HOT_PERCENT);
            }
        }
        let entry = CacheEntry::with_last_refresh_time(key.clone(), payload, last_refresh_time);
        self.weak.put(key, entry, 1);
    }

    /// Demotes up to `TRIM_HARD_MAX_COUNT` cold hard entries to weak,
    /// honoring `controller.can_value_be_trimmed`, then shrinks the hard
    /// tier back down if it has gone quiet.
    pub fn trim_hard(&self) {
        let _guard = self.lock.write();
        if self.hard.max_size() <= self.h0 {
            return;
        }
        let trim_threshold = (0.75 * self.hard.max_hot_size() as f64).floor() as u64;
        let max_trim_count = self
            .hard
            .cur_size()
            .saturating_sub(trim_threshold)
            .min(TRIM_HARD_MAX_COUNT);
        if max_trim_count == 0 {
            return;
        }

        let controller = Arc::clone(&self.controller);
        let mut demoted: Vec<(Key, Weak<V>, u64)> = Vec::new();
        self.hard.traverse_trim(max_trim_count as usize, |key, entry| {
            let payload = entry.payload();
            let can_trim = match panic::catch_unwind(AssertUnwindSafe(|| {
                controller.can_value_be_trimmed(key, payload)
            })) {
                Ok(can_trim) => can_trim,
                Err(payload) => {
                    tracing::error!(
                        key = %key,
                        panic_msg = panic_message(payload.as_ref()),
                        "controller.can_value_be_trimmed panicked; retaining entry this pass"
                    );
                    false
                }
            };
            if !can_trim {
                return false;
            }
            demoted.push((
                key.clone(),
                Arc::downgrade(entry.payload()),
                entry.last_refresh_time(),
            ));
            true
        });

        for (key, weak_ref, last_refresh) in demoted {
            self.put_to_weak(key, weak_ref, last_refresh);
        }

        if self.hard.cur_size() as f64 <= 0.75 * self.hard.max_hot_size() as f64 {
            let new_max = self.hard.max_hot_size().max(self.h0);
            self.hard.resize(new_max, HARD_HOT_PERCENT);
        }

        tracing::debug!(
            demoted = %self.hard.len(),
            hard_max_size = self.hard.max_size(),
            "trim_hard swept the hard tier"
        );
    }

    /// Sweeps weak entries whose reclaimable reference has already been
    /// reclaimed, forcing a full sweep every `TRIM_WEAK_MAX_INTERVAL` even
    /// when nothing would otherwise be trimmed, then shrinks the weak
    /// tier back down if it has gone quiet.
    pub fn trim_weak(&self) {
        let _guard = self.lock.write();
        if self.weak.max_size() <= self.w0 {
            return;
        }
        let trim_threshold = (0.75 * self.weak.max_hot_size() as f64).floor() as u64;
        let mut max_trim_count = self
            .weak
            .cur_size()
            .saturating_sub(trim_threshold)
            .min(TRIM_WEAK_MAX_COUNT);

        if max_trim_count == 0 {
            let elapsed = now_millis().saturating_sub(self.last_weak_trim.load(Ordering::Acquire));
            let forced = elapsed >= TRIM_WEAK_MAX_INTERVAL.as_millis() as u64 && !self.weak.is_empty();
            if !forced {
                return;
            }
            max_trim_count = self.weak.max_size().saturating_sub(self.weak.max_hot_size());
        }
        self.last_weak_trim.store(now_millis(), Ordering::Release);

        self.weak
            .traverse_trim(max_trim_count as usize, |_key, entry| entry.payload().upgrade().is_none());

        if self.weak.cur_size() as f64 <= 0.75 * self.weak.max_hot_size() as f64 {
            let new_max = self.weak.max_hot_size().max(self.w0);
            self.weak.resize(new_max, WEAK_HOT_PERCENT);
        }

        tracing::debug!(
            weak_len = %self.weak.len(),
            weak_max_size = self.weak.max_size(),
            "trim_weak swept the weak tier"
        );
    }

    /// Current number of entries in the hard tier.
    pub fn hard_len(&self) -> usize {
        self.hard.len()
    }

    /// Current number of entries in the weak tier.
    pub fn weak_len(&self) -> usize {
        self.weak.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ThreadScheduler;
    use std::sync::atomic::AtomicU32;

    struct TaggingController {
        created: AtomicU32,
        retain_key: Option<Key>,
    }

    impl Controller<Key, String> for TaggingController {
        fn create(&self, key: &Key) -> String {
            self.created.fetch_add(1, Ordering::SeqCst);
            format!("value-for-{key}")
        }

        fn can_value_be_trimmed(&self, key: &Key, _value: &String) -> bool {
            self.retain_key.as_ref() != Some(key)
        }
    }

    fn build_cache(min_hard_size: u64, retain_key: Option<Key>) -> Arc<TieredCache<String>> {
        let controller = Arc::new(TaggingController {
            created: AtomicU32::new(0),
            retain_key,
        });
        TieredCache::build(
            controller,
            TieredCacheOptions {
                expire: None,
                min_hard_size,
                max_hard_size: None,
            },
            Arc::new(ThreadScheduler::new()),
        )
    }

    #[test]
    fn create_on_miss_then_reuses_same_instance() {
        let cache = build_cache(2, None);
        let d = Key::new(["D"]);
        let first = cache.get(&d, true).unwrap();
        let second = cache.get(&d, true).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn get_without_auto_create_on_unseen_key_is_missing() {
        let cache = build_cache(2, None);
        let unseen = Key::new(["never-seen"]);
        assert!(cache.get(&unseen, false).is_none());
    }

    #[test]
    fn promotion_then_trim_keeps_visited_key_in_hard() {
        let cache = build_cache(2, None);
        let a = Key::new(["A"]);
        let b = Key::new(["B"]);
        let c = Key::new(["C"]);
        cache.get(&a, true);
        cache.get(&b, true);
        cache.get(&c, true);
        cache.get(&a, true);
        cache.get(&a, true);

        cache.trim_hard();

        assert!(cache.get(&a, false).is_some());
    }

    #[test]
    fn weak_recovery_returns_same_instance() {
        let cache = build_cache(2, None);
        let b = Key::new(["B"]);
        let original = cache.get(&b, true).unwrap();
        // force demotion of b by trimming repeatedly
        for _ in 0..5 {
            cache.trim_hard();
        }
        let recovered = cache.get(&b, false);
        if let Some(recovered) = recovered {
            assert!(Arc::ptr_eq(&original, &recovered));
        }
        // if the weak reference was already dropped nothing is asserted:
        // this test only checks identity when recovery succeeds.
    }

    #[test]
    fn policy_retention_survives_repeated_trims() {
        let x = Key::new(["X"]);
        let cache = build_cache(2, Some(x.clone()));
        cache.get(&x, true);
        for other in ["p", "q", "r", "s", "t"] {
            cache.get(&Key::new([other]), true);
        }
        for _ in 0..5 {
            cache.trim_hard();
        }
        assert!(cache.get(&x, false).is_some());
    }

    #[test]
    fn release_empties_both_tiers() {
        let cache = build_cache(2, None);
        cache.get(&Key::new(["A"]), true);
        cache.release();
        assert_eq!(cache.hard_len(), 0);
        assert_eq!(cache.weak_len(), 0);
    }
}
