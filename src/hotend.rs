//! Hot-End LRU: an ordered associative container with hot/cold promotion.
//!
//! The container is a single circular, intrusively doubly-linked ring of
//! nodes (no sentinel nodes — unlike [`crate::entry`]'s flat storage, the
//! ring here is genuinely cyclic, so a lone node simply links to itself)
//! plus a hash index from key to node pointer. Two positions on the ring —
//! `hot_head` and `cold_head` — mark the boundary between a protected "hot"
//! region and an evictable "cold" region. A node freshly inserted lands in
//! the cold region; only a node visited again while still linked (its
//! `visit_count` reaching 2) earns promotion to hot. This resists pollution
//! by one-shot scans without paying for strict LRU bookkeeping.
//!
//! The whole structure lives behind one [`parking_lot::RwLock`], acquired
//! fresh for the duration of each public method — there is no lock-free
//! fast path here (unlike the per-entry `last_refresh_time` in
//! [`crate::entry::CacheEntry`]), except for the visit-count bump on `get`,
//! which increments through a poison-aware CAS loop while only the *read*
//! lock is held.

use std::fmt;
use std::hash::Hash;
use std::ptr;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;

use crate::error::CacheConfigError;

#[cfg(feature = "hashbrown")]
type Map<K, V> = hashbrown::HashMap<K, V>;
#[cfg(not(feature = "hashbrown"))]
type Map<K, V> = std::collections::HashMap<K, V>;

/// A node in the ring. Never constructed or freed outside this module.
struct Node<K, V> {
    key: K,
    value: V,
    size: u64,
    /// Poisoned (negative) once unlinked, so a racing reader's CAS loop
    /// cannot resurrect it.
    visit_count: AtomicI64,
    is_cold: bool,
    prev: *mut Node<K, V>,
    next: *mut Node<K, V>,
}

/// The hot/cold boundary at which a cold node is promoted to hot.
const PROMOTE_AT_VISIT_COUNT: i64 = 2;

struct Ring<K, V> {
    hot_head: *mut Node<K, V>,
    cold_head: *mut Node<K, V>,
    map: Map<K, *mut Node<K, V>>,
    cur_size: u64,
    max_size: u64,
    hot_size: u64,
    max_hot_size: u64,
}

// SAFETY: `Ring` is never exposed outside a `parking_lot::RwLock` held by
// `HotEndLru`, and every raw-pointer access happens while that lock is
// held, so concurrent access to the nodes themselves is always serialized
// exactly the way it would be if the ring held `Box<Node<K, V>>` directly.
unsafe impl<K: Send, V: Send> Send for Ring<K, V> {}
// SAFETY: see above; shared references across threads only ever read
// through methods that take `&mut Ring`, reached solely via the write
// guard, except for visit-count bumps which use a genuinely atomic field.
unsafe impl<K: Send, V: Send> Sync for Ring<K, V> {}

impl<K, V> Ring<K, V> {
    fn new(max_size: u64, max_hot_size: u64) -> Self {
        Self {
            hot_head: ptr::null_mut(),
            cold_head: ptr::null_mut(),
            map: Map::default(),
            cur_size: 0,
            max_size,
            hot_size: 0,
            max_hot_size,
        }
    }

    fn is_empty(&self) -> bool {
        self.hot_head.is_null()
    }

    /// Inserts `node` into the ring immediately before `anchor`. If
    /// `anchor` is null the ring is empty and `node` becomes a self-loop.
    ///
    /// # Safety
    /// `anchor` must be null or a valid node currently linked in this ring.
    /// `node` must be a freshly allocated node not yet linked anywhere.
    unsafe fn insert_before(anchor: *mut Node<K, V>, node: *mut Node<K, V>) {
        if anchor.is_null() {
            // SAFETY: node is exclusively owned by the caller at this point.
            unsafe {
                (*node).prev = node;
                (*node).next = node;
            }
            return;
        }
        // SAFETY: anchor is a valid, linked node; node is unlinked.
        unsafe {
            let anchor_prev = (*anchor).prev;
            (*node).next = anchor;
            (*node).prev = anchor_prev;
            (*anchor_prev).next = node;
            (*anchor).prev = node;
        }
    }

    /// Removes `node` from the ring topology, fixing `hot_head`/`cold_head`
    /// and the size scalars, and poisons its `visit_count`. Does not touch
    /// the index or free the node's memory.
    ///
    /// # Safety
    /// `node` must be a valid node currently linked in this ring.
    unsafe fn unlink(&mut self, node: *mut Node<K, V>) {
        // SAFETY: node is linked in this ring per caller contract.
        unsafe {
            let size = (*node).size;
            let was_hot = !(*node).is_cold;
            if (*node).next == node {
                // sole node
                self.hot_head = ptr::null_mut();
                self.cold_head = ptr::null_mut();
            } else {
                if node == self.hot_head {
                    self.hot_head = (*node).next;
                }
                if node == self.cold_head {
                    self.cold_head = (*node).next;
                }
                (*(*node).prev).next = (*node).next;
                (*(*node).next).prev = (*node).prev;
            }
            self.cur_size -= size;
            if was_hot {
                self.hot_size -= size;
            }
            (*node).visit_count.store(-1, Ordering::Release);
        }
    }

    /// # Safety
    /// `node` must be a valid node currently linked in this ring.
    unsafe fn set_new_hot_head(&mut self, node: *mut Node<K, V>) {
        // SAFETY: caller contract.
        unsafe {
            if (*node).is_cold {
                self.hot_size += (*node).size;
                (*node).is_cold = false;
            }
        }
        self.hot_head = node;
    }

    /// Returns false (and still assigns `cold_head`) if `node` is null or
    /// coincides with `hot_head` — there can be no cold region in that case.
    ///
    /// # Safety
    /// `node` must be null or a valid node currently linked in this ring.
    unsafe fn set_new_cold_head(&mut self, node: *mut Node<K, V>) -> bool {
        self.cold_head = node;
        if node.is_null() || node == self.hot_head {
            return false;
        }
        // SAFETY: node is non-null and linked, per caller contract.
        unsafe {
            if !(*node).is_cold {
                self.hot_size -= (*node).size;
                (*node).is_cold = true;
            }
        }
        true
    }

    /// Steps `cold_head` backward (toward `hot_head`) one node at a time
    /// while `hot_size` exceeds `max_hot_size`, reclassifying each stepped
    /// node as cold.
    fn shrink_hot_region(&mut self) {
        while self.hot_size > self.max_hot_size {
            if self.cold_head.is_null() {
                break;
            }
            // SAFETY: cold_head is a valid linked node.
            let candidate = unsafe { (*self.cold_head).prev };
            if candidate == self.cold_head {
                // single node left; cannot shrink further
                break;
            }
            // SAFETY: candidate is linked in this ring (it is cold_head's
            // predecessor).
            if !unsafe { self.set_new_cold_head(candidate) } {
                break;
            }
        }
    }

    /// Repeatedly promotes or evicts the cold-tail until `cur_size <=
    /// target` or the ring is empty. Returns whether anything was evicted.
    fn trim_to(&mut self, target: u64) -> bool {
        let mut evicted = false;
        while self.cur_size > target && !self.is_empty() {
            // SAFETY: hot_head is non-null (ring non-empty); its predecessor
            // is the cold-tail, always a valid linked node.
            let tail = unsafe { (*self.hot_head).prev };
            // SAFETY: tail is a valid linked node.
            let visit_count = unsafe { (*tail).visit_count.load(Ordering::Acquire) };
            if visit_count >= PROMOTE_AT_VISIT_COUNT {
                // SAFETY: tail is a valid linked node.
                unsafe {
                    (*tail).visit_count.store(1, Ordering::Release);
                    self.set_new_hot_head(tail);
                }
                self.shrink_hot_region();
                continue;
            }
            // SAFETY: tail is a valid linked node about to be fully removed.
            unsafe {
                self.unlink(tail);
                self.map.remove(&(*tail).key);
                drop(Box::from_raw(tail));
            }
            evicted = true;
        }
        evicted
    }
}

impl<K, V> Drop for Ring<K, V> {
    fn drop(&mut self) {
        while !self.hot_head.is_null() {
            let node = self.hot_head;
            // SAFETY: node is hot_head, a valid linked node; it is fully
            // removed and freed, never touched again.
            unsafe {
                self.unlink(node);
                drop(Box::from_raw(node));
            }
        }
    }
}

/// An ordered associative container with hot/cold LRU promotion.
///
/// See the module documentation for the algorithm. `K` must be `Clone`
/// because a copy of the key lives both in the hash index and in the ring
/// node it indexes to.
pub struct HotEndLru<K, V> {
    inner: RwLock<Ring<K, V>>,
}

impl<K, V> fmt::Debug for HotEndLru<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.inner.read();
        f.debug_struct("HotEndLru")
            .field("len", &ring.map.len())
            .field("cur_size", &ring.cur_size)
            .field("max_size", &ring.max_size)
            .field("hot_size", &ring.hot_size)
            .field("max_hot_size", &ring.max_hot_size)
            .finish()
    }
}

impl<K: Clone + Eq + Hash, V> HotEndLru<K, V> {
    /// Validates `(max_size, hot_percent)` without constructing anything.
    /// Shared by `new` and `resize` so both paths fail the same way.
    fn validate(max_size: u64, hot_percent: f64) -> Result<(), CacheConfigError> {
        if max_size < 2 {
            return Err(CacheConfigError::MaxSizeTooSmall(max_size as usize));
        }
        if !(0.0..1.0).contains(&hot_percent) {
            return Err(CacheConfigError::HotPercentOutOfRange(hot_percent));
        }
        Ok(())
    }

    fn max_hot_size_for(max_size: u64, hot_percent: f64) -> u64 {
        ((max_size as f64 * hot_percent).floor() as u64).clamp(1, max_size - 1)
    }

    /// Builds a new, empty container.
    ///
    /// # Panics
    /// Panics if `max_size < 2` or `hot_percent` is not in `[0, 1)`.
    pub fn new(max_size: u64, hot_percent: f64) -> Self {
        if let Err(e) = Self::validate(max_size, hot_percent) {
            e.or_panic()
        }
        let max_hot_size = Self::max_hot_size_for(max_size, hot_percent);
        Self {
            inner: RwLock::new(Ring::new(max_size, max_hot_size)),
        }
    }

    /// Read-locked lookup. Bumps `visit_count` via a poison-aware CAS loop;
    /// does not move the node. Returns a clone of the stored value.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.get_with(key, Clone::clone)
    }

    /// Like [`Self::get`], but applies `f` to a reference to the value
    /// instead of cloning it.
    pub fn get_with<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        let ring = self.inner.read();
        let node = *ring.map.get(key)?;
        // SAFETY: node came from the index, so it is a valid linked node;
        // the read lock is held for the duration of this access.
        unsafe {
            bump_visit_count(&(*node).visit_count);
            Some(f(&(*node).value))
        }
    }

    /// Write-locked insertion. Rejects oversized values. If `key` is
    /// already present, its node is replaced and the new node inherits
    /// `old.visit_count + 1`. Returns whether the value was accepted.
    pub fn put(&self, key: K, value: V, size: u64) -> bool {
        let mut ring = self.inner.write();
        if size > ring.max_size {
            return false;
        }

        let inherited_visit_count = if let Some(&old) = ring.map.get(&key) {
            // SAFETY: old came from the index, a valid linked node.
            let old_visit_count = unsafe { (*old).visit_count.load(Ordering::Acquire) };
            // SAFETY: old is a valid linked node, about to be fully removed.
            unsafe {
                ring.unlink(old);
                ring.map.remove(&key);
                drop(Box::from_raw(old));
            }
            Some(old_visit_count.max(0) + 1)
        } else {
            None
        };

        let both_heads_were_nonnull = !ring.hot_head.is_null();
        let target = ring.max_size.saturating_sub(size);
        let trimmed_any = ring.trim_to(target);

        let new_node = Box::into_raw(Box::new(Node {
            key: key.clone(),
            value,
            size,
            visit_count: AtomicI64::new(inherited_visit_count.unwrap_or(1)),
            is_cold: false,
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }));

        if ring.is_empty() {
            // SAFETY: new_node is freshly allocated and unlinked.
            unsafe {
                Ring::insert_before(ptr::null_mut(), new_node);
                (*new_node).is_cold = false;
            }
            ring.hot_head = new_node;
            ring.cold_head = new_node;
            ring.hot_size += size;
        } else if trimmed_any && both_heads_were_nonnull {
            // SAFETY: cold_head is non-null (ring non-empty) and linked;
            // new_node is freshly allocated and unlinked.
            unsafe {
                Ring::insert_before(ring.cold_head, new_node);
                (*new_node).is_cold = true;
            }
            ring.cold_head = new_node;
        } else {
            // SAFETY: hot_head is non-null (ring non-empty) and linked;
            // new_node is freshly allocated and unlinked.
            unsafe {
                Ring::insert_before(ring.hot_head, new_node);
                (*new_node).is_cold = false;
            }
            ring.hot_head = new_node;
            ring.hot_size += size;
            ring.shrink_hot_region();
        }
        ring.cur_size += size;
        ring.map.insert(key, new_node);
        true
    }

    /// Write-locked removal. Returns the removed value, if any.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut ring = self.inner.write();
        let node = *ring.map.get(key)?;
        // SAFETY: node came from the index, a valid linked node, about to
        // be fully removed.
        unsafe {
            ring.unlink(node);
            ring.map.remove(key);
            let node = Box::from_raw(node);
            Some(node.value)
        }
    }

    /// Write-locked resize.
    ///
    /// # Panics
    /// Panics if `max_size < 2` or `hot_percent` is not in `[0, 1)`.
    pub fn resize(&self, max_size: u64, hot_percent: f64) {
        if let Err(e) = Self::validate(max_size, hot_percent) {
            e.or_panic()
        }
        let mut ring = self.inner.write();
        ring.max_size = max_size;
        ring.max_hot_size = Self::max_hot_size_for(max_size, hot_percent);
        if ring.cur_size > ring.max_size {
            ring.trim_to(ring.max_size);
        }
    }

    /// Write-locked traversal from the cold-tail backward, visiting up to
    /// `max_count` nodes. `callback(key, value)` returns `true` to accept
    /// removal, `false` to retain (re-promoting the node to hot). A node
    /// accepted for removal is unlinked and freed by this method itself,
    /// *after* the callback runs — the callback's return value is purely a
    /// verdict, so callers (the tiered cache) can perform side effects such
    /// as constructing a weak-tier entry from `value` before it is dropped.
    /// Returns the number of nodes visited.
    pub fn traverse_trim(&self, max_count: usize, mut callback: impl FnMut(&K, &V) -> bool) -> usize {
        let mut ring = self.inner.write();
        if ring.is_empty() || max_count == 0 {
            return 0;
        }
        // SAFETY: ring is non-empty, so hot_head is valid and its
        // predecessor (the cold-tail) is a valid linked node.
        let start = unsafe { (*ring.hot_head).prev };
        let mut cur = start;
        let mut visited = 0usize;
        loop {
            if visited >= max_count {
                break;
            }
            // SAFETY: cur is a valid linked node (start, or a predecessor
            // of a previously-visited node that was never freed this loop).
            let prev = unsafe { (*cur).prev };
            let accept = {
                // SAFETY: cur is a valid linked node.
                let node_ref = unsafe { &*cur };
                callback(&node_ref.key, &node_ref.value)
            };
            if accept {
                // SAFETY: cur is a valid linked node, about to be removed.
                unsafe {
                    ring.unlink(cur);
                    ring.map.remove(&(*cur).key);
                    drop(Box::from_raw(cur));
                }
            } else {
                // SAFETY: cur is a valid linked node.
                unsafe {
                    (*cur).visit_count.store(1, Ordering::Release);
                    ring.set_new_hot_head(cur);
                }
                ring.shrink_hot_region();
            }
            visited += 1;
            if prev == cur || ring.is_empty() {
                break;
            }
            cur = prev;
        }
        visited
    }

    /// Clears all entries.
    pub fn clear(&self) {
        let mut ring = self.inner.write();
        while !ring.hot_head.is_null() {
            let node = ring.hot_head;
            // SAFETY: node is hot_head, a valid linked node.
            unsafe {
                ring.unlink(node);
                drop(Box::from_raw(node));
            }
        }
        ring.map.clear();
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    /// True if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of `size` over all stored entries.
    pub fn cur_size(&self) -> u64 {
        self.inner.read().cur_size
    }

    /// Current capacity, in size units.
    pub fn max_size(&self) -> u64 {
        self.inner.read().max_size
    }

    /// Sum of `size` over hot entries.
    pub fn hot_size(&self) -> u64 {
        self.inner.read().hot_size
    }

    /// Current hot-region capacity, in size units.
    pub fn max_hot_size(&self) -> u64 {
        self.inner.read().max_hot_size
    }

    /// True if `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.read().map.contains_key(key)
    }
}

fn bump_visit_count(counter: &AtomicI64) {
    let mut current = counter.load(Ordering::Relaxed);
    loop {
        if current < 0 {
            return;
        }
        match counter.compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_on_fresh_cache() {
        let lru: HotEndLru<u32, &str> = HotEndLru::new(4, 0.5);
        assert!(lru.put(1, "one", 1));
        assert_eq!(lru.get(&1), Some("one"));
    }

    #[test]
    fn put_twice_inherits_visit_count_plus_one() {
        let lru: HotEndLru<u32, &str> = HotEndLru::new(4, 0.5);
        lru.put(1, "one", 1);
        lru.get(&1); // visit_count now 2
        lru.put(1, "uno", 1);
        assert_eq!(lru.get(&1), Some("uno"));
    }

    #[test]
    fn remove_then_get_is_missing() {
        let lru: HotEndLru<u32, &str> = HotEndLru::new(4, 0.5);
        lru.put(1, "one", 1);
        assert_eq!(lru.remove(&1), Some("one"));
        assert_eq!(lru.get(&1), None);
    }

    #[test]
    fn oversized_put_is_rejected() {
        let lru: HotEndLru<u32, &str> = HotEndLru::new(4, 0.5);
        assert!(!lru.put(1, "too-big", 10));
        assert_eq!(lru.len(), 0);
    }

    #[test]
    fn promotion_on_second_access_survives_eviction() {
        // capacity 2: insert A, B; access A twice so it is promoted; insert
        // C, forcing one eviction; A (hot) should survive, B (cold) should not.
        let lru: HotEndLru<u32, u32> = HotEndLru::new(2, 0.5);
        lru.put(1, 100, 1);
        lru.put(2, 200, 1);
        lru.get(&1);
        lru.get(&1); // visit_count reaches 2 on A
        lru.put(3, 300, 1);
        assert_eq!(lru.get(&1), Some(100));
        assert!(lru.get(&2).is_none() || lru.get(&3).is_none());
    }

    #[test]
    fn resize_rejects_bad_params() {
        let lru: HotEndLru<u32, u32> = HotEndLru::new(4, 0.5);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            lru.resize(1, 0.5);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn traverse_trim_demotes_unvisited_and_promotes_visited() {
        let lru: HotEndLru<u32, u32> = HotEndLru::new(8, 0.5);
        lru.put(1, 10, 1);
        lru.put(2, 20, 1);
        lru.get(&1);
        lru.get(&1); // A reaches visit_count 2

        let mut removed = Vec::new();
        let visited = lru.traverse_trim(10, |k, _v| {
            removed.push(*k);
            true // always accept removal in this pass, to see what the traversal order finds
        });
        // at least one node visited; nodes accepted for removal are gone
        assert!(visited > 0);
        for k in &removed {
            assert!(!lru.contains_key(k));
        }
    }

    #[test]
    fn traverse_trim_retain_keeps_entry() {
        let lru: HotEndLru<u32, u32> = HotEndLru::new(8, 0.5);
        lru.put(1, 10, 1);
        let visited = lru.traverse_trim(10, |_k, _v| false);
        assert_eq!(visited, 1);
        assert!(lru.contains_key(&1));
    }

    #[test]
    fn clear_empties_structure() {
        let lru: HotEndLru<u32, u32> = HotEndLru::new(4, 0.5);
        lru.put(1, 10, 1);
        lru.put(2, 20, 1);
        lru.clear();
        assert!(lru.is_empty());
        assert_eq!(lru.cur_size(), 0);
    }

    #[test]
    fn invariants_hold_after_a_sequence_of_operations() {
        let lru: HotEndLru<u32, u32> = HotEndLru::new(4, 0.5);
        for i in 0..10u32 {
            lru.put(i, i * 10, 1);
        }
        let ring = lru.inner.read();
        assert!(ring.hot_size <= ring.cur_size);
        assert!(ring.cur_size <= ring.max_size);
        assert_eq!(ring.map.len() as u64, ring.cur_size);
    }

    #[test]
    fn concurrent_get_and_put_do_not_corrupt_structure() {
        use std::sync::Arc;

        let lru = Arc::new(HotEndLru::<u32, u32>::new(64, 0.5));
        for i in 0..64u32 {
            lru.put(i, i, 1);
        }

        let mut pool = scoped_threadpool::Pool::new(8);
        pool.scoped(|scope| {
            for t in 0..8u32 {
                let lru = Arc::clone(&lru);
                scope.execute(move || {
                    for i in 0..200u32 {
                        let key = (t * 200 + i) % 64;
                        let _ = lru.get(&key);
                        lru.put(key, key, 1);
                    }
                });
            }
        });

        assert!(lru.len() <= 64);
    }
}
