//! Per-tier cache entry: a key, a payload, and a last-refresh timestamp.
//!
//! `CacheEntry` is generic over the payload `P` so the same type serves both
//! tiers of [`crate::tiered::TieredCache`]: the hard tier stores
//! `CacheEntry<Arc<V>>`, the weak tier stores `CacheEntry<Weak<V>>`. Entry
//! equality is defined by key equality alone, matching the contract the
//! enclosing [`crate::hotend::HotEndLru`] already enforces via its key
//! index — this type does not re-derive `PartialEq` on the payload.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::key::Key;

/// A tier-level cache entry: key, payload, and a mutable last-refresh stamp.
///
/// `last_refresh_time` is an `AtomicU64` (milliseconds since the Unix epoch)
/// so it can be read and updated across threads without requiring the
/// enclosing cache's write lock for the read path alone.
pub struct CacheEntry<P> {
    key: Key,
    payload: P,
    last_refresh_time: AtomicU64,
}

impl<P> CacheEntry<P> {
    /// Creates a new entry with `last_refresh_time` set to now.
    pub fn new(key: Key, payload: P) -> Self {
        Self {
            key,
            payload,
            last_refresh_time: AtomicU64::new(Self::now_millis()),
        }
    }

    /// Creates a new entry carrying a specific `last_refresh_time`, used
    /// when demoting a hard entry to the weak tier (the timestamp is
    /// preserved rather than reset).
    pub fn with_last_refresh_time(key: Key, payload: P, last_refresh_time: u64) -> Self {
        Self {
            key,
            payload,
            last_refresh_time: AtomicU64::new(last_refresh_time),
        }
    }

    /// The entry's key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// The entry's payload.
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Consumes the entry, returning its key and payload.
    pub fn into_parts(self) -> (Key, P) {
        (self.key, self.payload)
    }

    /// Current `last_refresh_time`, milliseconds since the Unix epoch.
    pub fn last_refresh_time(&self) -> u64 {
        self.last_refresh_time.load(Ordering::Acquire)
    }

    /// Updates `last_refresh_time` to now.
    pub fn touch(&self) {
        self.last_refresh_time
            .store(Self::now_millis(), Ordering::Release);
    }

    fn now_millis() -> u64 {
        now_millis()
    }
}

/// Milliseconds since the Unix epoch, clamped to 0 if the clock is set
/// before it (matching [`CacheEntry`]'s own fallback).
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl<P: fmt::Debug> fmt::Debug for CacheEntry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("payload", &self.payload)
            .field("last_refresh_time", &self.last_refresh_time())
            .finish()
    }
}
