//! Caching middleware: `Cache-Control` profiles and server-side response caching.
//!
//! - [`CacheProfileMiddleware`]: stamps a route's [`CacheProfile`] onto its
//!   responses. Registered per route.
//! - [`ResponseCachingMiddleware`]: stores publicly cacheable `GET` responses
//!   in an [`ExpiringCache`] and replays them until their `max-age` elapses.
//!   Registered once, around the whole router.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    Method, Request, Response, StatusCode,
    context::Context,
    middleware::{Middleware, Next},
};

use super::{CacheProfile, ExpiringCache};

/// Default upper bound on the body size the response cache will store (1 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Longest time a response is kept, whatever its `max-age` says (one year).
pub const MAX_STORED_AGE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Applies a [`CacheProfile`] to every response that passes through it.
///
/// Any `Cache-Control` header set by the handler is replaced.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use cachet::{Response, StatusCode, Router};
/// use cachet::cache::CacheProfile;
/// use cachet::context::Context;
///
/// let mut router = Router::new();
/// router.get_with(
///     "/clock",
///     [CacheProfile::new(Duration::from_secs(10)).into_layer()],
///     |_ctx: Context| async { Response::new(StatusCode::Ok).body("tick") },
/// );
/// ```
pub struct CacheProfileMiddleware {
    profile: CacheProfile,
}

impl CacheProfileMiddleware {
    pub fn new(profile: CacheProfile) -> Self {
        Self { profile }
    }
}

impl Middleware for CacheProfileMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let profile = self.profile;
        Box::pin(async move {
            let mut response = next.run(ctx).await;
            response.set_header("Cache-Control", profile.header_value());
            if profile.sends_pragma() {
                response.set_header("Pragma", "no-cache");
            }
            response
        })
    }
}

/// A response held by [`ResponseCachingMiddleware`], stamped with the instant
/// it was stored so replays can report their `Age`.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    response: Response,
    stored_at: Instant,
}

impl CachedResponse {
    fn new(response: Response) -> Self {
        Self {
            response,
            stored_at: Instant::now(),
        }
    }

    fn into_response(self) -> Response {
        let age = self.stored_at.elapsed().as_secs();
        let mut response = self.response;
        response.set_header("Age", age.to_string());
        response
    }
}

/// Server-side cache for publicly cacheable responses.
///
/// # Behavior
///
/// - Only `GET` requests without an `Authorization` header and without
///   `Cache-Control: no-cache` / `no-store` are looked up or stored.
/// - Entries are keyed by method, path and query string.
/// - A response is stored only if it is `200 OK`, carries
///   `Cache-Control: public` with a positive `max-age`, carries no
///   `no-store`, `no-cache` or `private` directive, sets no cookie, and its body
///   fits within the configured limit. It is kept for `max-age` seconds.
/// - Replayed responses carry an `Age` header with the whole seconds elapsed
///   since they were stored.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use cachet::Router;
/// use cachet::cache::{ExpiringCache, ResponseCachingMiddleware};
///
/// let store = Arc::new(ExpiringCache::new());
/// let mut router = Router::new();
/// router.layer(ResponseCachingMiddleware::new(store).max_body_size(64 * 1024));
/// ```
pub struct ResponseCachingMiddleware {
    cache: Arc<ExpiringCache<CachedResponse>>,
    max_body_size: usize,
}

impl ResponseCachingMiddleware {
    /// Creates the middleware over a shared response store.
    pub fn new(cache: Arc<ExpiringCache<CachedResponse>>) -> Self {
        Self {
            cache,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Sets the largest body, in bytes, that will be stored.
    #[must_use]
    pub fn max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }
}

impl Middleware for ResponseCachingMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let cache = Arc::clone(&self.cache);
        let max_body_size = self.max_body_size;

        Box::pin(async move {
            if !is_cacheable_request(ctx.request()) {
                return next.run(ctx).await;
            }
            let key = cache_key(ctx.request());

            match cache.try_get(&key) {
                Ok(Some(cached)) => {
                    debug!(key = %key, "serving response from cache");
                    return cached.into_response();
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "response cache lookup failed");
                    return next.run(ctx).await;
                }
            }

            let response = next.run(ctx).await;

            if let Some(ttl) = storable_ttl(&response, max_body_size) {
                match cache.set(key.clone(), CachedResponse::new(response.clone()), ttl) {
                    Ok(()) => debug!(key = %key, ttl_secs = ttl.as_secs(), "stored response"),
                    Err(e) => warn!(key = %key, error = %e, "failed to store response"),
                }
            }

            response
        })
    }
}

fn is_cacheable_request(request: &Request) -> bool {
    if request.method() != &Method::Get || request.headers().contains("authorization") {
        return false;
    }
    !request
        .headers()
        .get_all("cache-control")
        .flat_map(|value| directives(value))
        .any(|d| d == "no-cache" || d == "no-store")
}

fn cache_key(request: &Request) -> String {
    match request.query_string() {
        Some(query) => format!("{} {}?{}", request.method(), request.path(), query),
        None => format!("{} {}", request.method(), request.path()),
    }
}

// Returns the time the response may be served from cache, or `None` if it must not be stored.
fn storable_ttl(response: &Response, max_body_size: usize) -> Option<Duration> {
    if response.status() != StatusCode::Ok
        || response.headers().contains("set-cookie")
        || response.payload().len() > max_body_size
    {
        return None;
    }

    let mut public = false;
    let mut max_age = None;
    for directive in response.headers().get_all("cache-control").flat_map(|value| directives(value)) {
        match directive.as_str() {
            "public" => public = true,
            "no-store" | "no-cache" | "private" => return None,
            d => {
                if let Some(secs) = d.strip_prefix("max-age=") {
                    max_age = secs.trim_matches('"').parse::<u64>().ok();
                }
            }
        }
    }

    match max_age {
        Some(secs) if public && secs > 0 => {
            Some(Duration::from_secs(secs).min(MAX_STORED_AGE))
        }
        _ => None,
    }
}

fn directives(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::cache::CacheLocation;
    use crate::middleware::{MiddlewareHandler, endpoint, from_middleware};

    fn request(raw: &str) -> Context {
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        Context::new(req)
    }

    fn get(path: &str) -> Context {
        request(&format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n"))
    }

    // Terminal handler that counts invocations and answers with the given Cache-Control.
    fn counting_endpoint(calls: Arc<AtomicUsize>, cache_control: &'static str) -> MiddlewareHandler {
        endpoint(move |_ctx: Context| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                Response::new(StatusCode::Ok)
                    .header("Cache-Control", cache_control)
                    .body(format!("call {n}"))
            }
        })
    }

    fn pipeline(
        store: &Arc<ExpiringCache<CachedResponse>>,
        endpoint: &MiddlewareHandler,
    ) -> Next {
        Next::new(vec![
            from_middleware(Arc::new(ResponseCachingMiddleware::new(Arc::clone(store)))),
            Arc::clone(endpoint),
        ])
    }

    #[tokio::test]
    async fn profile_middleware_replaces_cache_control() {
        let handler = endpoint(|_ctx: Context| async {
            Response::new(StatusCode::Ok).header("Cache-Control", "no-cache")
        });
        let next = Next::new(vec![
            CacheProfile::new(Duration::from_secs(10)).into_layer(),
            handler,
        ]);

        let res = next.run(get("/")).await;
        let values: Vec<_> = res.headers().get_all("cache-control").collect();
        assert_eq!(values, vec!["public,max-age=10"]);
        assert!(!res.headers().contains("pragma"));
    }

    #[tokio::test]
    async fn profile_middleware_sets_pragma_for_no_cache_location() {
        let handler = endpoint(|_ctx: Context| async { Response::new(StatusCode::Ok) });
        let profile = CacheProfile::new(Duration::from_secs(10)).location(CacheLocation::None);
        let res = Next::new(vec![profile.into_layer(), handler]).run(get("/")).await;

        assert_eq!(res.headers().get("cache-control"), Some("no-cache,max-age=10"));
        assert_eq!(res.headers().get("pragma"), Some("no-cache"));
    }

    #[tokio::test(start_paused = true)]
    async fn public_response_is_replayed_until_max_age() {
        let store = Arc::new(ExpiringCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = counting_endpoint(Arc::clone(&calls), "public,max-age=10");

        let first = pipeline(&store, &endpoint).run(get("/clock")).await;
        assert!(!first.headers().contains("age"));

        tokio::time::advance(Duration::from_secs(3)).await;
        let second = pipeline(&store, &endpoint).run(get("/clock")).await;
        assert_eq!(second.headers().get("age"), Some("3"));
        assert_eq!(second.payload(), b"call 1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(8)).await;
        let third = pipeline(&store, &endpoint).run(get("/clock")).await;
        assert_eq!(third.payload(), b"call 2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn query_string_is_part_of_the_key() {
        let store = Arc::new(ExpiringCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = counting_endpoint(Arc::clone(&calls), "public,max-age=10");

        pipeline(&store, &endpoint).run(get("/items?page=1")).await;
        pipeline(&store, &endpoint).run(get("/items?page=2")).await;
        pipeline(&store, &endpoint).run(get("/items?page=1")).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn private_and_uncacheable_responses_are_not_stored() {
        for cache_control in ["private,max-age=10", "no-store", "public", "public,max-age=0"] {
            let store = Arc::new(ExpiringCache::new());
            let calls = Arc::new(AtomicUsize::new(0));
            let endpoint = counting_endpoint(Arc::clone(&calls), cache_control);

            pipeline(&store, &endpoint).run(get("/")).await;
            pipeline(&store, &endpoint).run(get("/")).await;

            assert_eq!(calls.load(Ordering::SeqCst), 2, "{cache_control}");
            assert!(store.is_empty(), "{cache_control}");
        }
    }

    #[tokio::test]
    async fn request_no_cache_bypasses_store() {
        let store = Arc::new(ExpiringCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = counting_endpoint(Arc::clone(&calls), "public,max-age=10");

        pipeline(&store, &endpoint).run(get("/")).await;
        let raw = "GET / HTTP/1.1\r\nHost: localhost\r\nCache-Control: no-cache\r\n\r\n";
        let res = pipeline(&store, &endpoint).run(request(raw)).await;

        assert_eq!(res.payload(), b"call 2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_get_requests_pass_through() {
        let store = Arc::new(ExpiringCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = counting_endpoint(Arc::clone(&calls), "public,max-age=10");
        let post = "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n";

        pipeline(&store, &endpoint).run(request(post)).await;
        pipeline(&store, &endpoint).run(request(post)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn oversized_body_is_not_storable() {
        let res = Response::new(StatusCode::Ok)
            .header("Cache-Control", "public, max-age=60")
            .body("0123456789");
        assert_eq!(storable_ttl(&res, 100), Some(Duration::from_secs(60)));
        assert_eq!(storable_ttl(&res, 5), None);
    }

    #[test]
    fn huge_max_age_is_capped() {
        let res = Response::new(StatusCode::Ok)
            .header("Cache-Control", "public,max-age=18446744073709551615");
        assert_eq!(storable_ttl(&res, DEFAULT_MAX_BODY_SIZE), Some(MAX_STORED_AGE));
    }

    #[tokio::test]
    async fn huge_max_age_response_is_stored_and_replayed() {
        let store = Arc::new(ExpiringCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint =
            counting_endpoint(Arc::clone(&calls), "public,max-age=18446744073709551615");

        pipeline(&store, &endpoint).run(get("/forever")).await;
        let res = pipeline(&store, &endpoint).run(get("/forever")).await;

        assert_eq!(res.payload(), b"call 1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn authorized_requests_bypass_store() {
        let store = Arc::new(ExpiringCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = counting_endpoint(Arc::clone(&calls), "public,max-age=10");
        let raw = "GET / HTTP/1.1\r\nHost: localhost\r\nAuthorization: Bearer x\r\n\r\n";

        pipeline(&store, &endpoint).run(request(raw)).await;
        let res = pipeline(&store, &endpoint).run(request(raw)).await;

        assert_eq!(res.payload(), b"call 2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn cookies_are_never_stored() {
        let res = Response::new(StatusCode::Ok)
            .header("Cache-Control", "public,max-age=60")
            .header("Set-Cookie", "session=abc");
        assert_eq!(storable_ttl(&res, DEFAULT_MAX_BODY_SIZE), None);
    }
}
