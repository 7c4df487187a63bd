//! User-supplied policy hooks bound to a cache at build time.

/// Policy hooks a [`crate::tiered::TieredCache`] invokes at the points
/// where it needs domain knowledge it does not itself have: how to build a
/// value for a key it has never seen, what to do when a value looks stale,
/// and whether a given value is allowed to be trimmed out of the hard tier.
///
/// Default method bodies give the "no-op"/"always retrue" behavior the
/// enclosing cache falls back to when a controller does not care to
/// override them.
pub trait Controller<K, V>: Send + Sync {
    /// Constructs a new value for a previously-absent key. Runs under
    /// `TieredCache`'s write lock on the calling thread — must not block
    /// indefinitely.
    fn create(&self, key: &K) -> V;

    /// Notification that `value` has exceeded its expiry window since it
    /// was last observed. Invoked from a background task, never from the
    /// calling thread, and must not re-enter the same cache on its own
    /// stack.
    fn on_need_refresh(&self, _key: &K, _value: &V) {}

    /// Trim-time retention policy. Returning `false` keeps the entry
    /// strongly retained in the hard tier across as many trims as desired.
    /// Defaults to `true` (no special retention).
    fn can_value_be_trimmed(&self, _key: &K, _value: &V) -> bool {
        true
    }
}
