//! Content-hash ETags and conditional GETs.
//!
//! Responses are already fully buffered, so hashing costs one pass over the
//! body. Still, it is a pass per request: keep this off routes that serve
//! large payloads.

use http::header::{self, HeaderValue};
use http::{Method, StatusCode};
use sha2::{Digest, Sha256};

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::Response;

#[derive(Debug, Clone, Copy, Default)]
pub struct ETag;

impl ETag {
    pub fn new() -> Self {
        Self
    }
}

/// Strong validator: the quoted hex SHA-256 of `body`.
pub fn compute_etag(body: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(body)))
}

/// `If-None-Match` semantics: `*`, or any listed tag, weak or strong.
fn matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag)
}

impl Middleware for ETag {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return Box::pin(next.run(req));
        }
        let if_none_match = req.header(header::IF_NONE_MATCH).map(str::to_owned);

        Box::pin(async move {
            let mut response = next.run(req).await;
            if response.status_code() != StatusCode::OK {
                return response;
            }

            let etag = compute_etag(response.body());
            let Ok(etag_value) = HeaderValue::from_str(&etag) else {
                return response;
            };

            if if_none_match.is_some_and(|inm| matches(&inm, &etag)) {
                let mut not_modified = Response::status(StatusCode::NOT_MODIFIED);
                not_modified.headers_mut().insert(header::ETAG, etag_value);
                *not_modified.extensions_mut() = std::mem::take(response.extensions_mut());
                return not_modified;
            }

            let headers = response.headers_mut();
            headers.insert(header::ETAG, etag_value);
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("public, no-cache"));
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::Uri;

    use super::*;
    use crate::handler::{BoxedHandler, ErasedHandler, Handler};
    use crate::middleware::layer;

    async fn doc(req: Request) -> Response {
        match req.path() {
            "/a" => Response::text("alpha"),
            "/b" => Response::text("beta"),
            _ => Response::builder().status(StatusCode::NOT_FOUND).text("missing"),
        }
    }

    fn chain() -> BoxedHandler {
        layer(doc.into_boxed_handler(), Arc::new(ETag::new()))
    }

    fn get(uri: &'static str) -> Request {
        Request::new(Method::GET, Uri::from_static(uri))
    }

    #[test]
    fn identical_bodies_share_an_etag() {
        assert_eq!(compute_etag(b"alpha"), compute_etag(b"alpha"));
        assert_ne!(compute_etag(b"alpha"), compute_etag(b"beta"));
        assert_eq!(compute_etag(b"").len(), 66);
    }

    #[tokio::test]
    async fn sets_etag_and_cache_control_on_200() {
        let response = chain().call(get("/a")).await;
        assert_eq!(response.header(header::ETAG), Some(compute_etag(b"alpha").as_str()));
        assert_eq!(response.header(header::CACHE_CONTROL), Some("public, no-cache"));
        assert_eq!(response.body().as_ref(), b"alpha");
    }

    #[tokio::test]
    async fn matching_if_none_match_yields_empty_304() {
        let etag = compute_etag(b"alpha");
        for inm in [etag.clone(), format!("\"other\", W/{etag}"), "*".to_owned()] {
            let response = chain().call(get("/a").with_header(header::IF_NONE_MATCH, &inm)).await;
            assert_eq!(response.status_code(), StatusCode::NOT_MODIFIED, "{inm}");
            assert!(response.body().is_empty());
            assert_eq!(response.header(header::ETAG), Some(etag.as_str()));
        }
    }

    #[tokio::test]
    async fn stale_tag_gets_full_body() {
        let stale = compute_etag(b"alpha");
        let response = chain().call(get("/b").with_header(header::IF_NONE_MATCH, &stale)).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"beta");
    }

    #[tokio::test]
    async fn skips_non_success_and_writes() {
        let missing = chain().call(get("/zzz")).await;
        assert!(missing.header(header::ETAG).is_none());

        let post = chain().call(Request::new(Method::POST, Uri::from_static("/a"))).await;
        assert!(post.header(header::ETAG).is_none());
    }
}
