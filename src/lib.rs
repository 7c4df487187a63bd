//! An in-process, two-tier object cache.
//!
//! A [`crate::tiered::TieredCache`] holds recently-used values behind
//! strong references (the *hard* tier) and keeps a much larger tail of
//! recently-evicted values alive only as long as something else in the
//! process still references them (the *weak* tier, via [`std::sync::Weak`]).
//! A read that misses hard but finds a live weak reference recovers the
//! value without re-running the caller's construction logic; a read that
//! misses both falls back to a user-supplied [`crate::controller::Controller`].
//! Both tiers are backed by the same ordered container,
//! [`crate::hotend::HotEndLru`] — a hot/cold-promoting LRU ring that
//! resists one-shot scan pollution without the bookkeeping cost of a
//! strict access-order list.
//!
//! A background [`crate::scheduler::Scheduler`] periodically demotes cold
//! hard entries into weak (`trim_hard`) and sweeps weak entries whose
//! reference has already been reclaimed (`trim_weak`); both tiers grow on
//! their own when they run hot and shrink back down once they go quiet.
//!
//! [`crate::registry::CacheRegistry`] sits above all of this for callers
//! who want "the cache for this logical purpose" without managing the
//! `Arc<TieredCache<V>>` themselves — one `build` call per token registers
//! it, every later caller on any thread can `get` the same instance back,
//! and a second `build` for the same token is a programmer error.
//!
//! ## Modules
//!
//! - [`key`]: the structured, dot-joined cache key type.
//! - [`entry`]: per-tier entry wrapper (key, payload, last-refresh stamp).
//! - [`hotend`]: the hot/cold-promoting LRU ring shared by both tiers.
//! - [`controller`]: user-supplied create/refresh/retention hooks.
//! - [`scheduler`]: the background task bus trim tasks run on.
//! - [`tiered`]: the two-tier cache itself.
//! - [`registry`]: build-once-per-token lookup of [`tiered::TieredCache`]s.
//! - [`error`]: configuration error type.

#[cfg(test)]
extern crate scoped_threadpool;

/// The structured cache key: an ordered sequence of string parts joined
/// into one canonical, case-sensitive identifier.
pub mod key;

/// Per-tier cache entry: a key, a payload, and a last-refresh timestamp.
pub mod entry;

/// Configuration and validation error types.
pub mod error;

/// Hot-End LRU: the hot/cold-promoting ordered container backing both
/// tiers of [`tiered::TieredCache`].
///
/// **Note**: this module exposes the ring's raw-pointer internals only to
/// the extent needed for its own tests; consumers should use
/// [`hotend::HotEndLru`]'s public methods rather than relying on its
/// internal layout.
pub mod hotend;

/// User-supplied policy hooks bound to a cache at build time: how to
/// construct a value the cache has never seen, what to do when a value
/// looks stale, and whether a value may be trimmed out of the hard tier.
pub mod controller;

/// The background task bus scheduled trims run on.
pub mod scheduler;

/// The two-tier object cache: a hard tier of strong references backed by
/// a weak tier of reclaimable ones.
pub mod tiered;

/// Build-once-per-token lookup of [`tiered::TieredCache`] instances.
pub mod registry;

pub use controller::Controller;
pub use entry::CacheEntry;
pub use error::CacheConfigError;
pub use hotend::HotEndLru;
pub use key::Key;
pub use registry::CacheRegistry;
pub use scheduler::{Scheduler, TaskHandle, ThreadScheduler};
pub use tiered::{TieredCache, TieredCacheOptions};
