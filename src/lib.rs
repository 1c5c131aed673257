//! # cachet
//!
//! An expiring in-process cache and HTTP response caching, served by a small
//! async HTTP/1.1 framework.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use std::sync::Arc;
//!
//! use cachet::cache::ExpiringCache;
//! use cachet::context::Context;
//! use cachet::{Response, Router, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = Arc::new(ExpiringCache::new());
//!
//!     let mut router = Router::new();
//!     router.get("/", move |_ctx: Context| {
//!         let cache = Arc::clone(&cache);
//!         async move {
//!             match cache.get_or_set("greeting", Duration::from_secs(20), || "Hello!".to_owned()) {
//!                 Ok(greeting) => Response::new(StatusCode::Ok).body(greeting),
//!                 Err(_) => Response::new(StatusCode::InternalServerError),
//!             }
//!         }
//!     });
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server
//!         .serve(router, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod cache;
pub mod config;
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
