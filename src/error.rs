//! Configuration errors.
//!
//! These are the only `Result`-carrying error values in this crate (see the
//! module docs on [`crate::hotend`] and [`crate::tiered`] for why every
//! other failure mode is a `bool`/`Option`, not a `Result`). Configuration
//! errors are programmer errors — a bad `resize` call, a negative
//! `hot_percent`, a double `build` for a registry token — and the public
//! constructors that can produce one panic with this error's `Display` text
//! rather than returning it. The type exists so that text is structured
//! and consistent rather than an ad hoc `format!` string at each call site.

use thiserror::Error;

/// A fatal configuration error.
#[derive(Debug, Error)]
pub enum CacheConfigError {
    /// `max_size` must be at least 2.
    #[error("max_size must be >= 2, got {0}")]
    MaxSizeTooSmall(usize),

    /// `hot_percent` must be in `[0, 1)`.
    #[error("hot_percent must be in [0, 1), got {0}")]
    HotPercentOutOfRange(f64),

    /// A cache was already built for this registry token.
    #[error("a cache is already built for this token")]
    AlreadyBuilt,
}

impl CacheConfigError {
    /// Panics with this error's message. Used at construction/resize
    /// boundaries where failing loudly at the call site is preferable to
    /// threading a `Result` through every caller.
    #[track_caller]
    pub fn or_panic<T>(self) -> T {
        panic!("{self}");
    }
}
