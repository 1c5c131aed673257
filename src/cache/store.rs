//! In-process key/value store with absolute expiration.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::CacheError;

/// Longest lifetime an entry can have; longer TTLs are capped to it.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

// Value and expiry are replaced together by a single map insert.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl.min(MAX_TTL),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// A thread-safe map from string keys to values that expire at a fixed instant.
///
/// Entries become invisible the moment their time-to-live has elapsed, whether
/// or not they have been physically removed yet. Removal happens lazily on the
/// next lookup of the key, or in bulk through [`purge_expired`](Self::purge_expired)
/// and the background task started by [`spawn_sweeper`](Self::spawn_sweeper).
///
/// The cache is meant to be constructed once at startup and shared behind an
/// [`Arc`] with everything that needs it.
///
/// Time is read from [`tokio::time::Instant`], which follows tokio's paused
/// test clock when one is active and the system monotonic clock otherwise.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cachet::cache::ExpiringCache;
///
/// let cache = ExpiringCache::new();
/// cache.set("greeting", "hello".to_string(), Duration::from_secs(20)).unwrap();
///
/// assert_eq!(cache.try_get("greeting").unwrap().as_deref(), Some("hello"));
/// assert_eq!(cache.try_get("missing").unwrap(), None);
/// ```
#[derive(Debug)]
pub struct ExpiringCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
}

impl<V> Default for ExpiringCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ExpiringCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Returns a clone of the live value stored under `key`, or `None` if the
    /// key is absent or its entry has expired.
    ///
    /// An expired entry found here is removed.
    ///
    /// # Errors
    ///
    /// [`CacheError::EmptyKey`] if `key` is empty.
    pub fn try_get(&self, key: &str) -> Result<Option<V>, CacheError> {
        validate_key(key)?;
        let now = Instant::now();

        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                trace!(key, "cache hit");
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            // A concurrent `set` may have replaced the entry since the read above.
            if self
                .entries
                .remove_if(key, |_, entry| !entry.is_live(now))
                .is_some()
            {
                debug!(key, "evicted expired cache entry");
            }
        }

        trace!(key, "cache miss");
        Ok(None)
    }

    /// Stores `value` under `key` until `ttl` has elapsed, replacing any
    /// previous entry together with its expiration.
    ///
    /// A `ttl` above [`MAX_TTL`] is capped to it.
    ///
    /// # Errors
    ///
    /// - [`CacheError::EmptyKey`] if `key` is empty.
    /// - [`CacheError::InvalidTtl`] if `ttl` is zero.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) -> Result<(), CacheError> {
        let key = key.into();
        validate_key(&key)?;
        validate_ttl(ttl)?;

        trace!(key = %key, ttl_ms = ttl.as_millis() as u64, "cache set");
        self.entries.insert(key, CacheEntry::new(value, ttl));
        Ok(())
    }

    /// Returns the live value under `key`, or runs `compute`, stores its result
    /// for `ttl` and returns it.
    ///
    /// `compute` runs without any lock held. Concurrent misses on the same key
    /// each run their own `compute`; the first result stored wins and later
    /// callers return that stored value instead of their own.
    ///
    /// # Errors
    ///
    /// - [`CacheError::EmptyKey`] if `key` is empty.
    /// - [`CacheError::InvalidTtl`] if `ttl` is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use cachet::cache::ExpiringCache;
    ///
    /// let cache = ExpiringCache::new();
    /// let ttl = Duration::from_secs(20);
    ///
    /// let first = cache.get_or_set("answer", ttl, || 42).unwrap();
    /// let second = cache.get_or_set("answer", ttl, || unreachable!()).unwrap();
    /// assert_eq!((first, second), (42, 42));
    /// ```
    pub fn get_or_set<F>(&self, key: &str, ttl: Duration, compute: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> V,
    {
        self.get_or_try_set(key, ttl, || Ok::<V, Infallible>(compute()))
    }

    /// Fallible variant of [`get_or_set`](Self::get_or_set).
    ///
    /// If `compute` returns an error the cache is left untouched and the error
    /// is returned as [`CacheError::Compute`].
    ///
    /// # Errors
    ///
    /// - [`CacheError::EmptyKey`] if `key` is empty.
    /// - [`CacheError::InvalidTtl`] if `ttl` is zero.
    /// - [`CacheError::Compute`] if `compute` fails.
    pub fn get_or_try_set<F, E>(&self, key: &str, ttl: Duration, compute: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> Result<V, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        validate_ttl(ttl)?;
        if let Some(value) = self.try_get(key)? {
            return Ok(value);
        }

        let value = compute().map_err(|e| CacheError::Compute(e.into()))?;
        Ok(self.populate(key, value, ttl))
    }

    // Store a freshly computed value unless another caller stored a live one first.
    fn populate(&self, key: &str, value: V, ttl: Duration) -> V {
        let now = Instant::now();
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    debug!(key, "cache populated concurrently, discarding computed value");
                    return occupied.get().value.clone();
                }
                occupied.insert(CacheEntry::new(value.clone(), ttl));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(value.clone(), ttl));
            }
        }
        debug!(key, ttl_ms = ttl.as_millis() as u64, "cache populated");
        value
    }

    /// Removes the entry under `key`, returning its value if it was still live.
    ///
    /// # Errors
    ///
    /// [`CacheError::EmptyKey`] if `key` is empty.
    pub fn remove(&self, key: &str) -> Result<Option<V>, CacheError> {
        validate_key(key)?;
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .and_then(|(_, entry)| entry.is_live(now).then_some(entry.value)))
    }

    /// Physically removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.entries.retain(|_, entry| {
            let live = entry.is_live(now);
            if !live {
                purged += 1;
            }
            live
        });
        purged
    }

    /// Number of physically stored entries, including expired ones that have
    /// not been removed yet.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is physically stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawns a task that calls [`purge_expired`](Self::purge_expired) every
    /// `period`.
    ///
    /// The task only holds a weak reference and exits on the first tick after
    /// the last [`Arc`] to the cache is dropped. Abort the returned handle to
    /// stop it sooner.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero, or if called outside a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    debug!("cache dropped, sweeper exiting");
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = cache.len(), "swept expired cache entries");
                }
            }
        })
    }
}

fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::EmptyKey);
    }
    Ok(())
}

fn validate_ttl(ttl: Duration) -> Result<(), CacheError> {
    if ttl.is_zero() {
        return Err(CacheError::InvalidTtl);
    }
    Ok(())
}
