//! Caching layer: an expiring in-process store and HTTP response caching.
//!
//! - [`ExpiringCache`]: thread-safe key/value store with absolute per-entry
//!   expiration and get-or-compute population.
//! - [`CacheProfile`]: declares how a route's responses may be cached by
//!   clients and intermediaries; applied through [`CacheProfileMiddleware`].
//! - [`ResponseCachingMiddleware`]: serves repeat `GET` requests from an
//!   [`ExpiringCache`] while the stored response is still fresh.
//!
//! ## Stampedes
//!
//! [`ExpiringCache::get_or_set`] does not coalesce concurrent misses: every
//! caller that misses runs its own `compute`. When several callers race to
//! populate the same key, the first value stored wins and the others return
//! it, so the cache converges on a single value.

use thiserror::Error;

pub mod middleware;
pub mod profile;
pub mod store;

pub use middleware::{CacheProfileMiddleware, CachedResponse, ResponseCachingMiddleware};
pub use profile::{CacheLocation, CacheProfile};
pub use store::ExpiringCache;

/// Errors produced by [`ExpiringCache`] operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache key must not be empty")]
    EmptyKey,

    #[error("time-to-live must be greater than zero")]
    InvalidTtl,

    /// The value factory passed to [`ExpiringCache::get_or_try_set`] failed.
    /// Nothing was stored.
    #[error("failed to compute cache value: {0}")]
    Compute(#[source] Box<dyn std::error::Error + Send + Sync>),
}
