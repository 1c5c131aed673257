//! Demo request handlers.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error};

use crate::cache::{CacheError, ExpiringCache};
use crate::context::Context;
use crate::{Response, StatusCode};

/// Key under which `/memory-cache` stores its timestamp.
pub const TIMESTAMP_KEY: &str = "MyCachedTimestamp";

const INDEX: &str = "\
cachet caching demo

GET /memory-cache    timestamp held in the in-process cache
GET /response-cache  response cacheable by clients, proxies and this server
";

#[derive(Debug, Serialize)]
struct MemoryCacheBody {
    cached_timestamp: String,
    current_timestamp: String,
    cache_hit: bool,
}

#[derive(Debug, Serialize)]
struct ResponseCacheBody {
    timestamp: String,
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

pub async fn index(_ctx: Context) -> Response {
    Response::new(StatusCode::Ok).body(INDEX)
}

/// Returns the timestamp cached under [`TIMESTAMP_KEY`] next to the current
/// time, caching a fresh one for `ttl` when none is live.
///
/// `cache_hit` is `false` only when the returned timestamp is the one this
/// request computed. If a concurrent request stored its value first, that
/// value is returned and counts as a hit.
pub fn memory_cache(cache: &ExpiringCache<String>, ttl: Duration) -> Response {
    let mut computed = None;
    let cached = cache.get_or_set(TIMESTAMP_KEY, ttl, || {
        let now = timestamp();
        computed = Some(now.clone());
        now
    });

    match cached {
        Ok(cached_timestamp) => {
            let cache_hit = is_hit(computed.as_deref(), &cached_timestamp);
            debug!(key = TIMESTAMP_KEY, cache_hit, "memory cache lookup");
            Response::new(StatusCode::Ok).json(&MemoryCacheBody {
                cached_timestamp,
                current_timestamp: timestamp(),
                cache_hit,
            })
        }
        Err(e) => internal_error(&e),
    }
}

/// Returns the time the response was generated. The route is registered with
/// a public [`CacheProfile`](crate::cache::CacheProfile), so repeat requests
/// within its `max-age` see the same timestamp.
pub async fn response_cache(_ctx: Context) -> Response {
    Response::new(StatusCode::Ok).json(&ResponseCacheBody {
        timestamp: timestamp(),
    })
}

// Identical strings from the same second are indistinguishable; either one is
// this request's own value.
fn is_hit(computed: Option<&str>, returned: &str) -> bool {
    computed != Some(returned)
}

fn internal_error(e: &CacheError) -> Response {
    error!(error = %e, "memory cache failure");
    Response::new(StatusCode::InternalServerError).body("Internal Server Error")
}
