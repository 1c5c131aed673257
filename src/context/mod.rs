//! Per-request context handed to middleware and handlers.

use crate::Request;

/// Everything a middleware or handler knows about the request it is serving.
///
/// Application state is not carried here; handlers capture the shared services
/// they need when they are registered.
pub struct Context {
    request: Request,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }
}
