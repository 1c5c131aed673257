//! Middleware pipeline: composable before/after request handler logic.
//!
//! Every request travels through an ordered chain of [`MiddlewareHandler`]s.
//! The router builds one chain per request: its global layers first, then the
//! matched route's own layers, then the route handler wrapped by [`endpoint`].
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable chain link.
//! - [`from_middleware`] / [`endpoint`]: build links from a [`Middleware`]
//!   or from a terminal handler.
//! - [`LoggerMiddleware`]: built-in request/response logger.
//!
//! Caching middleware lives in [`crate::cache`].

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;
use tracing::info;

use crate::{Response, StatusCode, context::Context, router::IntoHandler};

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so each middleware can forward a
/// request at most once.
///
/// # Examples
///
/// ```rust,no_run
/// use std::pin::Pin;
/// use cachet::{Response, context::Context, middleware::{Middleware, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(
///         &self,
///         ctx: Context,
///         next: Next,
///     ) -> Pin<Box<dyn std::future::Future<Output = Response> + Send>> {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Vec<MiddlewareHandler>,
    // Position of the link invoked by the next `run` call.
    index: usize,
}

/// A type-erased, reference-counted link in a middleware chain.
///
/// The [`Arc`] makes links cheap to clone when the router assembles a chain
/// for each request.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Wraps a request handler as the terminal link of a chain.
///
/// The handler never sees the (empty) remainder of the chain.
///
/// # Examples
///
/// ```rust
/// use cachet::{Response, StatusCode, context::Context, middleware::{Next, endpoint}};
///
/// let chain = vec![endpoint(|_ctx: Context| async { Response::new(StatusCode::Ok) })];
/// let next = Next::new(chain);
/// ```
pub fn endpoint(handler: impl IntoHandler) -> MiddlewareHandler {
    Arc::new(move |ctx: Context, _next: Next| handler.call(ctx))
}

impl Next {
    /// Creates a `Next` positioned at the start of `middlewares`.
    pub fn new(middlewares: Vec<MiddlewareHandler>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next link in the chain and returns its response.
    ///
    /// If the chain is exhausted without any link producing a response, a
    /// `500 Internal Server Error` is returned.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = Arc::clone(&self.middlewares[self.index]);
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors may pass the request through (`next.run(ctx).await`),
/// short-circuit with their own [`Response`], or decorate the downstream
/// response before returning it.
///
/// Middleware is shared across Tokio tasks, so it must be `Send + Sync` and
/// return a `Send` future. Copy whatever state the future needs out of `&self`
/// before boxing it.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next link.
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Logs each request's method, path, status, and duration once the downstream
/// chain has produced a response.
///
/// Register it as the first router layer so the timing covers cache hits too.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_owned();
            let path = ctx.request().path().to_owned();

            let response = next.run(ctx).await;

            info!(
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                elapsed = ?start.elapsed(),
                "request served"
            );

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Request;

    fn ctx() -> Context {
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
        Context::new(req)
    }

    struct Stamp(&'static str);

    impl Middleware for Stamp {
        fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            let name = self.0;
            Box::pin(async move {
                let mut res = next.run(ctx).await;
                res.add_header("X-Stamp", name);
                res
            })
        }
    }

    struct Deny;

    impl Middleware for Deny {
        fn handle(&self, _ctx: Context, _next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            Box::pin(async { Response::new(StatusCode::NotFound) })
        }
    }

    #[tokio::test]
    async fn empty_chain_falls_back_to_500() {
        let res = Next::new(vec![]).run(ctx()).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn layers_unwind_innermost_first() {
        let chain = vec![
            from_middleware(Arc::new(Stamp("outer"))),
            from_middleware(Arc::new(Stamp("inner"))),
            endpoint(|_ctx: Context| async { Response::new(StatusCode::Ok) }),
        ];
        let res = Next::new(chain).run(ctx()).await;
        let stamps: Vec<_> = res.headers().get_all("x-stamp").collect();
        assert_eq!(stamps, vec!["inner", "outer"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_endpoint() {
        let chain = vec![
            from_middleware(Arc::new(Deny)),
            endpoint(|_ctx: Context| async { Response::new(StatusCode::Ok) }),
        ];
        let res = Next::new(chain).run(ctx()).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn logger_passes_response_through() {
        let chain = vec![
            from_middleware(Arc::new(LoggerMiddleware)),
            endpoint(|_ctx: Context| async { Response::new(StatusCode::Ok).body("hi") }),
        ];
        let res = Next::new(chain).run(ctx()).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.payload(), b"hi");
    }
}
