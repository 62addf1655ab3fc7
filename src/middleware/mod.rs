//! Middleware layer.
//!
//! A middleware receives the request and a [`Next`] handle to the rest of the
//! chain. It may short-circuit by returning its own response without running
//! `next`, or run `next` and inspect or rewrite what comes back. Every layer
//! sees a complete [`Response`], so status, headers and body are all
//! observable on the way out.
//!
//! ```rust
//! use plinth::middleware::{self, Next};
//! use plinth::{Request, Response, Router};
//!
//! async fn stamp(req: Request, next: Next) -> Response {
//!     let mut response = next.run(req).await;
//!     response.headers_mut().insert("x-served-by", "plinth".parse().unwrap());
//!     response
//! }
//!
//! # async fn hello(_: Request) -> &'static str { "hi" }
//! let router = Router::new()
//!     .route_layer(middleware::from_fn(stamp))
//!     .get("/", hello);
//! ```
//!
//! The canonical chain assembled by [`App`](crate::App) runs, outermost first:
//!
//! ```text
//! RequestId → RequestLogger → Recovery → RecordMetrics
//!   → Trace → Cors → RateLimit → TrailingSlash → [ETag] → routes
//! ```

use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::request::Request;
use crate::response::{IntoResponse, Response};

pub mod auth;
pub mod cors;
pub mod etag;
pub mod logger;
pub mod metrics;
pub mod rate_limit;
pub mod recovery;
pub mod request_id;
pub mod trace;
pub mod trailing_slash;

pub use auth::{AuthorizeRole, JwtAuth};
pub use cors::{Cors, CorsConfig};
pub use etag::ETag;
pub use logger::RequestLogger;
pub use metrics::RecordMetrics;
pub use rate_limit::RateLimit;
pub use recovery::Recovery;
pub use request_id::RequestId;
pub use trace::Trace;
pub use trailing_slash::TrailingSlash;

/// A request-processing layer wrapping the rest of the chain.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: Request, next: Next) -> BoxFuture;
}

/// The remainder of the chain below the current middleware.
#[derive(Clone)]
pub struct Next {
    inner: BoxedHandler,
}

impl Next {
    pub(crate) fn new(inner: BoxedHandler) -> Self {
        Self { inner }
    }

    pub async fn run(self, req: Request) -> Response {
        self.inner.call(req).await
    }
}

/// Wraps `next` in `middleware`, producing a new handler.
pub(crate) fn layer(next: BoxedHandler, middleware: Arc<dyn Middleware>) -> BoxedHandler {
    Arc::new(Layered { middleware, next })
}

struct Layered {
    middleware: Arc<dyn Middleware>,
    next: BoxedHandler,
}

impl ErasedHandler for Layered {
    fn call(&self, req: Request) -> BoxFuture {
        self.middleware.handle(req, Next::new(Arc::clone(&self.next)))
    }
}

/// Adapts an `async fn(Request, Next) -> impl IntoResponse` into a
/// [`Middleware`].
pub fn from_fn<F, Fut>(f: F) -> FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoResponse,
{
    FromFn(f)
}

pub struct FromFn<F>(F);

impl<F, Fut> Middleware for FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoResponse,
{
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let fut = (self.0)(req, next);
        Box::pin(async move { fut.await.into_response() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use http::{Method, StatusCode, Uri};

    async fn ok(_req: Request) -> &'static str {
        "ok"
    }

    async fn deny(_req: Request, _next: Next) -> Response {
        Response::status(StatusCode::FORBIDDEN)
    }

    async fn tag(req: Request, next: Next) -> Response {
        let mut response = next.run(req).await;
        response.headers_mut().append("x-layer", "outer".parse().unwrap());
        response
    }

    fn get() -> Request {
        Request::new(Method::GET, Uri::from_static("/"))
    }

    #[tokio::test]
    async fn short_circuit_skips_the_rest_of_the_chain() {
        let chain = layer(ok.into_boxed_handler(), Arc::new(from_fn(deny)));
        let response = chain.call(get()).await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn outer_layer_sees_inner_response() {
        let chain = layer(ok.into_boxed_handler(), Arc::new(from_fn(tag)));
        let response = chain.call(get()).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.header("x-layer"), Some("outer"));
        assert_eq!(response.body().as_ref(), b"ok");
    }

    async fn require_key(req: Request, next: Next) -> Result<Response, crate::error::ApiError> {
        if req.header("x-api-key").is_none() {
            return Err(crate::error::ApiError::Unauthorized("missing api key".into()));
        }
        Ok(next.run(req).await)
    }

    #[tokio::test]
    async fn fallible_middleware_renders_its_error() {
        let chain = layer(ok.into_boxed_handler(), Arc::new(from_fn(require_key)));
        assert_eq!(chain.call(get()).await.status_code(), StatusCode::UNAUTHORIZED);
        let keyed = get().with_header("x-api-key", "k");
        assert_eq!(chain.call(keyed).await.status_code(), StatusCode::OK);
    }
}
