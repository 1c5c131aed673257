//! Request routing: map exact paths and HTTP methods to handler functions.
//!
//! [`Router`] dispatches each request to the first route whose method and
//! path match. Trailing slashes are ignored on both registered and incoming
//! paths, so `/memory-cache/` reaches `/memory-cache`.
//!
//! Middleware attaches at two levels:
//!
//! - [`Router::layer`] wraps every request, matched or not (logging, response
//!   caching).
//! - [`Router::get_with`] / [`Router::add_with`] attach layers to a single route
//!   at registration time, e.g. a [`CacheProfile`](crate::cache::CacheProfile).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::middleware::{Middleware, MiddlewareHandler, Next, endpoint, from_middleware};
use crate::{Method, Request, Response, StatusCode};

/// Conversion trait for async handler functions.
///
/// Implemented for every `Fn(Context) -> impl Future<Output = Response> + Send`
/// that is also `Send + Sync + 'static`.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

fn trim_trailing_slash(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ => path,
    }
}

struct Route {
    method: Method,
    // Registered path without its trailing slash.
    path: String,
    // Route layers followed by the handler endpoint.
    chain: Vec<MiddlewareHandler>,
}

impl Route {
    fn matches(&self, method: &Method, path: &str) -> bool {
        &self.method == method && self.path == trim_trailing_slash(path)
    }
}

/// HTTP request router with global and per-route middleware.
///
/// When no route matches, a `404 Not Found` is produced after the global
/// layers have run, so those layers see unmatched requests too.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use cachet::{Router, Response, StatusCode};
/// use cachet::cache::CacheProfile;
/// use cachet::context::Context;
/// use cachet::middleware::LoggerMiddleware;
///
/// let mut router = Router::new();
/// router.layer(LoggerMiddleware);
///
/// router.get("/ping", |_ctx: Context| async { Response::new(StatusCode::Ok) });
/// router.get_with(
///     "/report",
///     [CacheProfile::new(Duration::from_secs(10)).into_layer()],
///     |_ctx: Context| async { Response::new(StatusCode::Ok).body("report") },
/// );
/// ```
pub struct Router {
    routes: Vec<Route>,
    layers: Vec<MiddlewareHandler>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            layers: Vec::new(),
        }
    }

    /// Adds a middleware that wraps every request handled by this router.
    ///
    /// Layers run in registration order, outermost first.
    pub fn layer(&mut self, middleware: impl Middleware + 'static) {
        self.layers.push(from_middleware(Arc::new(middleware)));
    }

    /// Register a handler for `GET` requests matching `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add(Method::Get, path, handler);
    }

    /// Register a `GET` handler wrapped in route-specific `layers`.
    pub fn get_with(
        &mut self,
        path: &str,
        layers: impl IntoIterator<Item = MiddlewareHandler>,
        handler: impl IntoHandler,
    ) {
        self.add_with(Method::Get, path, layers, handler);
    }

    /// Register a handler for any method.
    pub fn add(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        self.add_with(method, path, std::iter::empty(), handler);
    }

    /// Register a handler for any method, wrapped in route-specific `layers`.
    ///
    /// Route layers run inside the router's global layers, in the order given.
    pub fn add_with(
        &mut self,
        method: Method,
        path: &str,
        layers: impl IntoIterator<Item = MiddlewareHandler>,
        handler: impl IntoHandler,
    ) {
        let mut chain: Vec<MiddlewareHandler> = layers.into_iter().collect();
        chain.push(endpoint(handler));
        self.routes.push(Route {
            method,
            path: trim_trailing_slash(path).to_owned(),
            chain,
        });
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatch `request` through the global layers to the first matching route.
    pub async fn route(&self, request: Request) -> Response {
        let matched = self
            .routes
            .iter()
            .find(|route| route.matches(request.method(), request.path()));

        let mut chain = self.layers.clone();
        match matched {
            Some(route) => chain.extend(route.chain.iter().cloned()),
            None => chain.push(endpoint(not_found)),
        }

        Next::new(chain).run(Context::new(request)).await
    }
}

async fn not_found(_ctx: Context) -> Response {
    Response::new(StatusCode::NotFound).body("Not Found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::LoggerMiddleware;

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    struct Tag(&'static str);

    impl Middleware for Tag {
        fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            let tag = self.0;
            Box::pin(async move {
                let mut res = next.run(ctx).await;
                res.add_header("X-Layer", tag);
                res
            })
        }
    }

    #[tokio::test]
    async fn trailing_slashes_are_ignored() {
        let mut router = Router::new();
        router.get("/users/", |_ctx: Context| async { Response::new(StatusCode::Ok) });
        router.get("/", |_ctx: Context| async { Response::new(StatusCode::NoContent) });

        assert_eq!(router.route(make_request("GET", "/users")).await.status(), StatusCode::Ok);
        assert_eq!(router.route(make_request("GET", "/users/")).await.status(), StatusCode::Ok);
        assert_eq!(router.route(make_request("GET", "/")).await.status(), StatusCode::NoContent);
        assert_eq!(
            router.route(make_request("GET", "/users/7")).await.status(),
            StatusCode::NotFound
        );
    }

    #[tokio::test]
    async fn handler_sees_query_string() {
        let mut router = Router::new();
        router.get("/search", |ctx: Context| async move {
            let q = ctx.request().query_param("q").unwrap_or_default().to_owned();
            Response::new(StatusCode::Ok).body(q)
        });
        let res = router.route(make_request("GET", "/search?q=cache")).await;
        assert_eq!(res.payload(), b"cache");
    }

    #[test]
    fn router_counts_routes() {
        let mut router = Router::default();
        assert!(router.is_empty());
        router.get("/a", |_ctx: Context| async { Response::new(StatusCode::Ok) });
        router.add(Method::Post, "/b", |_ctx: Context| async { Response::new(StatusCode::Ok) });
        assert_eq!(router.len(), 2);
    }

    #[tokio::test]
    async fn unmatched_request_returns_404() {
        let mut router = Router::new();
        router.get("/hello", |_ctx: Context| async { Response::new(StatusCode::Ok) });
        let res = router.route(make_request("GET", "/world")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
        let res = router.route(make_request("POST", "/hello")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn first_matching_route_wins() {
        let mut router = Router::new();
        router.get("/path", |_ctx: Context| async { Response::new(StatusCode::Ok) });
        router.get("/path", |_ctx: Context| async { Response::new(StatusCode::NoContent) });
        let res = router.route(make_request("GET", "/path")).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn route_layers_apply_only_to_their_route() {
        let mut router = Router::new();
        router.get_with(
            "/tagged",
            [from_middleware(Arc::new(Tag("route")))],
            |_ctx: Context| async { Response::new(StatusCode::Ok) },
        );
        router.get("/plain", |_ctx: Context| async { Response::new(StatusCode::Ok) });

        let tagged = router.route(make_request("GET", "/tagged")).await;
        assert_eq!(tagged.headers().get("x-layer"), Some("route"));
        let plain = router.route(make_request("GET", "/plain")).await;
        assert!(!plain.headers().contains("x-layer"));
    }

    #[tokio::test]
    async fn global_layers_wrap_route_layers_and_404s() {
        let mut router = Router::new();
        router.layer(LoggerMiddleware);
        router.layer(Tag("global"));
        router.add_with(
            Method::Get,
            "/tagged",
            [from_middleware(Arc::new(Tag("route")))],
            |_ctx: Context| async { Response::new(StatusCode::Ok) },
        );

        let res = router.route(make_request("GET", "/tagged")).await;
        let tags: Vec<_> = res.headers().get_all("x-layer").collect();
        assert_eq!(tags, vec!["route", "global"]);

        let missing = router.route(make_request("GET", "/missing")).await;
        assert_eq!(missing.status(), StatusCode::NotFound);
        assert_eq!(missing.headers().get("x-layer"), Some("global"));
    }
}
