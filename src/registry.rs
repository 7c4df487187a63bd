//! Cache Registry: one cache instance per type-token, built exactly once.
//!
//! [`CacheRegistry`] is the process-wide front door: one `build` call per
//! token registers a cache (via a user-supplied closure), and every later
//! caller — on any thread — fetches back the same instance through `get`.
//! A second `build` for a token already registered is a programmer error,
//! not a race to tolerate silently. Internally this is a
//! `HashMap<Token, Box<dyn Any + Send + Sync>>` plus downcast-on-lookup,
//! generalized here to arbitrary cache value types behind one opaque `Any`
//! slot per token.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::controller::Controller;
use crate::error::CacheConfigError;
use crate::key::Key;
use crate::scheduler::Scheduler;
use crate::tiered::{TieredCache, TieredCacheOptions};

/// A type-erased, build-once registry of [`TieredCache`] instances, keyed
/// by an arbitrary `Token`.
///
/// `Token` is typically a small marker type or enum variant identifying a
/// logical cache ("user profiles", "session tokens", ...) rather than the
/// cache's own key or value type.
pub struct CacheRegistry<Token> {
    caches: RwLock<std::collections::HashMap<Token, Arc<dyn Any + Send + Sync>>>,
}

impl<Token> fmt::Debug for CacheRegistry<Token> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("len", &self.caches.read().len())
            .finish()
    }
}

impl<Token> Default for CacheRegistry<Token>
where
    Token: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Token> CacheRegistry<Token>
where
    Token: Eq + Hash + Clone,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            caches: RwLock::new(std::collections::HashMap::new()),
        }
    }

    /// Builds and registers the cache for `token`, running `builder`
    /// exactly once. Double-checked: a fast read-locked check first, then a
    /// write-locked recheck before inserting.
    ///
    /// # Panics
    /// Panics if a cache is already registered under `token` — build-once
    /// is a contract the caller is expected to uphold, not a race to
    /// tolerate; building twice for the same token is a programmer error.
    pub fn build<V>(
        &self,
        token: Token,
        builder: impl FnOnce() -> Arc<TieredCache<V>>,
    ) -> Arc<TieredCache<V>>
    where
        V: Send + Sync + 'static,
    {
        if self.get::<V>(&token).is_some() {
            CacheConfigError::AlreadyBuilt.or_panic()
        }
        let built = builder();
        let mut caches = self.caches.write();
        if caches.contains_key(&token) {
            CacheConfigError::AlreadyBuilt.or_panic()
        }
        caches.insert(token, built.clone() as Arc<dyn Any + Send + Sync>);
        built
    }

    /// Returns the cache already registered under `token`, if any, without
    /// building one.
    pub fn get<V>(&self, token: &Token) -> Option<Arc<TieredCache<V>>>
    where
        V: Send + Sync + 'static,
    {
        let caches = self.caches.read();
        let entry = caches.get(token)?;
        Some(
            entry
                .clone()
                .downcast::<TieredCache<V>>()
                .expect("cache registered under this token has a different value type"),
        )
    }

    /// Removes and returns the cache registered under `token`, if any. The
    /// caller is responsible for calling [`TieredCache::release`] on it if
    /// its background trim tasks should stop.
    pub fn remove<V>(&self, token: &Token) -> Option<Arc<TieredCache<V>>>
    where
        V: Send + Sync + 'static,
    {
        let mut caches = self.caches.write();
        let entry = caches.remove(token)?;
        Some(
            entry
                .downcast::<TieredCache<V>>()
                .expect("cache registered under this token has a different value type"),
        )
    }

    /// Number of distinct tokens currently registered.
    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    /// True if no tokens are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheRegistry<TypeId> {
    /// Convenience for the common case of one cache per concrete value
    /// type: builds and registers a [`TieredCache<V>`] keyed by `V`'s own
    /// [`TypeId`], so callers never have to invent a token type of their
    /// own. Panics under the same "already built" contract as [`Self::build`]
    /// if a cache is already registered for `V`.
    pub fn build_for<V>(
        &self,
        controller: Arc<dyn Controller<Key, V>>,
        options: TieredCacheOptions,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<TieredCache<V>>
    where
        V: Send + Sync + 'static,
    {
        self.build(TypeId::of::<V>(), || {
            TieredCache::build(controller, options, scheduler)
        })
    }
}
