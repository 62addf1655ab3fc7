//! Trailing-slash normalisation.
//!
//! Rewrites the routing path only; the URI the client sent is kept for
//! logging.

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::request::Request;

#[derive(Debug, Clone, Copy, Default)]
pub struct TrailingSlash;

impl TrailingSlash {
    pub fn new() -> Self {
        Self
    }
}

/// `/a/b/` → `/a/b`. The root path is never emptied.
pub fn trim_trailing_slash(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

impl Middleware for TrailingSlash {
    fn handle(&self, mut req: Request, next: Next) -> BoxFuture {
        let trimmed = trim_trailing_slash(req.path());
        if trimmed.len() != req.path().len() {
            let trimmed = trimmed.to_owned();
            req.set_path(trimmed);
        }
        Box::pin(next.run(req))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::{Method, Uri};

    use super::*;
    use crate::handler::{ErasedHandler, Handler};
    use crate::middleware::layer;

    #[test]
    fn trims_only_trailing_slashes() {
        assert_eq!(trim_trailing_slash("/test/path/"), "/test/path");
        assert_eq!(trim_trailing_slash("/test/path"), "/test/path");
        assert_eq!(trim_trailing_slash("/test//"), "/test");
        assert_eq!(trim_trailing_slash("/"), "/");
        assert_eq!(trim_trailing_slash("//"), "/");
    }

    async fn echo_path(req: Request) -> String {
        format!("{} {}", req.path(), req.uri())
    }

    #[tokio::test]
    async fn rewrites_routing_path_but_keeps_uri() {
        let chain = layer(echo_path.into_boxed_handler(), Arc::new(TrailingSlash::new()));
        let response = chain.call(Request::new(Method::GET, Uri::from_static("/test/path/?q=1"))).await;
        assert_eq!(response.body().as_ref(), b"/test/path /test/path/?q=1");
    }
}
