//! Response cacheability profiles.
//!
//! A [`CacheProfile`] is handed to the router when a route is registered and
//! describes the `Cache-Control` directives that route's responses carry.

use std::sync::Arc;
use std::time::Duration;

use crate::middleware::{MiddlewareHandler, from_middleware};

use super::CacheProfileMiddleware;

/// Where a response may be cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheLocation {
    /// Any cache: the client, proxies and the server-side response cache.
    #[default]
    Any,
    /// Only the requesting client.
    Client,
    /// Caches must revalidate before reuse.
    None,
}

/// `Cache-Control` settings for the responses of one route.
///
/// | profile                | header                      |
/// |------------------------|-----------------------------|
/// | `no_store`             | `no-store`                  |
/// | [`CacheLocation::None`]   | `no-cache,max-age=N` plus `Pragma: no-cache` |
/// | [`CacheLocation::Client`] | `private,max-age=N`      |
/// | [`CacheLocation::Any`]    | `public,max-age=N`       |
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cachet::cache::{CacheLocation, CacheProfile};
///
/// let profile = CacheProfile::new(Duration::from_secs(10)).location(CacheLocation::Any);
/// assert_eq!(profile.header_value(), "public,max-age=10");
///
/// let private = profile.location(CacheLocation::Client);
/// assert_eq!(private.header_value(), "private,max-age=10");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheProfile {
    duration: Duration,
    location: CacheLocation,
    no_store: bool,
}

impl CacheProfile {
    /// A profile that lets any cache keep the response for `duration`
    /// (whole seconds; sub-second parts are dropped).
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            location: CacheLocation::Any,
            no_store: false,
        }
    }

    /// A profile that forbids storing the response anywhere.
    pub fn no_store() -> Self {
        Self {
            duration: Duration::ZERO,
            location: CacheLocation::None,
            no_store: true,
        }
    }

    #[must_use]
    pub fn location(mut self, location: CacheLocation) -> Self {
        self.location = location;
        self
    }

    pub fn is_no_store(&self) -> bool {
        self.no_store
    }

    /// Renders the `Cache-Control` header value for this profile.
    pub fn header_value(&self) -> String {
        if self.no_store {
            return "no-store".to_owned();
        }

        let max_age = self.duration.as_secs();
        match self.location {
            CacheLocation::Any => format!("public,max-age={max_age}"),
            CacheLocation::Client => format!("private,max-age={max_age}"),
            CacheLocation::None => format!("no-cache,max-age={max_age}"),
        }
    }

    /// Returns `true` when a `Pragma: no-cache` header should accompany the
    /// response for HTTP/1.0 caches.
    pub fn sends_pragma(&self) -> bool {
        !self.no_store && self.location == CacheLocation::None
    }

    /// Wraps the profile in a [`CacheProfileMiddleware`] ready to be passed to
    /// [`Router::get_with`](crate::router::Router::get_with).
    pub fn into_layer(self) -> MiddlewareHandler {
        from_middleware(Arc::new(CacheProfileMiddleware::new(self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN: Duration = Duration::from_secs(10);

    #[test]
    fn public_profile() {
        let p = CacheProfile::new(TEN);
        assert_eq!(p.header_value(), "public,max-age=10");
        assert!(!p.sends_pragma());
    }

    #[test]
    fn client_profile() {
        let p = CacheProfile::new(TEN).location(CacheLocation::Client);
        assert_eq!(p.header_value(), "private,max-age=10");
    }

    #[test]
    fn no_cache_location_adds_pragma() {
        let p = CacheProfile::new(TEN).location(CacheLocation::None);
        assert_eq!(p.header_value(), "no-cache,max-age=10");
        assert!(p.sends_pragma());
    }

    #[test]
    fn no_store_overrides_location() {
        let p = CacheProfile::no_store().location(CacheLocation::Any);
        assert_eq!(p.header_value(), "no-store");
        assert!(!p.sends_pragma());
        assert!(p.is_no_store());
    }

    #[test]
    fn sub_second_duration_truncates() {
        let p = CacheProfile::new(Duration::from_millis(2500));
        assert_eq!(p.header_value(), "public,max-age=2");
    }
}
