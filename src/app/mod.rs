//! The caching demo application: shared state and the route table.
//!
//! | route             | behaviour                                               |
//! |-------------------|---------------------------------------------------------|
//! | `/`               | plain-text index                                        |
//! | `/memory-cache`   | timestamp held in an [`ExpiringCache`] for `memory_ttl` |
//! | `/response-cache` | timestamp served with a public [`CacheProfile`]         |
//!
//! Every route sits behind [`LoggerMiddleware`] and a
//! [`ResponseCachingMiddleware`], so `/response-cache` is also replayed from
//! the server-side response cache while fresh.

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::Router;
use crate::cache::{CacheLocation, CacheProfile, CachedResponse, ExpiringCache, ResponseCachingMiddleware};
use crate::config::AppConfig;
use crate::context::Context;
use crate::middleware::LoggerMiddleware;

/// Caches shared by every request, created once at startup.
#[derive(Clone, Default)]
pub struct AppState {
    pub memory_cache: Arc<ExpiringCache<String>>,
    pub response_cache: Arc<ExpiringCache<CachedResponse>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts one expired-entry sweeper per cache.
    pub fn spawn_sweepers(&self, period: Duration) -> Vec<JoinHandle<()>> {
        vec![
            self.memory_cache.spawn_sweeper(period),
            self.response_cache.spawn_sweeper(period),
        ]
    }
}

/// Builds the demo router over `state`.
pub fn router(config: &AppConfig, state: &AppState) -> Router {
    let mut router = Router::new();
    router.layer(LoggerMiddleware);
    router.layer(
        ResponseCachingMiddleware::new(Arc::clone(&state.response_cache))
            .max_body_size(config.response_cache_max_body),
    );

    router.get("/", handlers::index);

    let memory_cache = Arc::clone(&state.memory_cache);
    let memory_ttl = config.memory_ttl;
    router.get("/memory-cache", move |_ctx: Context| {
        let memory_cache = Arc::clone(&memory_cache);
        async move { handlers::memory_cache(&memory_cache, memory_ttl) }
    });

    router.get_with(
        "/response-cache",
        [CacheProfile::new(config.response_max_age)
            .location(CacheLocation::Any)
            .into_layer()],
        handlers::response_cache,
    );

    router
}
