//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{self, HeaderValue, IntoHeaderName};
use http::{HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::context::Context;
use crate::error::ApiError;

/// An incoming HTTP request with its body fully buffered.
///
/// Middlewares receive the request by value and hand it on to the next layer,
/// so the [`Context`] attached here travels the whole chain.
///
/// Requests can be built by hand, which is how the pipeline is tested:
///
/// ```rust
/// use http::Method;
/// use plinth::Request;
///
/// let req = Request::new(Method::GET, "/users/42?verbose=1".parse().unwrap())
///     .with_header("x-request-id", "abc");
///
/// assert_eq!(req.path(), "/users/42");
/// assert_eq!(req.query(), Some("verbose=1"));
/// assert_eq!(req.header("x-request-id"), Some("abc"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    path: String,
    headers: HeaderMap,
    body: Bytes,
    params: HashMap<String, String>,
    remote_addr: Option<SocketAddr>,
    context: Context,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        let path = uri.path().to_owned();
        Self {
            method,
            uri,
            path,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            params: HashMap::new(),
            remote_addr: None,
            context: Context::default(),
        }
    }

    pub(crate) fn from_parts(parts: http::request::Parts, body: Bytes, remote_addr: SocketAddr) -> Self {
        let mut req = Self::new(parts.method, parts.uri);
        req.headers = parts.headers;
        req.body = body;
        req.remote_addr = Some(remote_addr);
        req
    }

    /// Appends a header.
    ///
    /// # Panics
    ///
    /// Panics if `value` is not a valid header value.
    pub fn with_header(mut self, name: impl IntoHeaderName, value: &str) -> Self {
        let value = HeaderValue::from_str(value).unwrap_or_else(|e| panic!("invalid header value `{value}`: {e}"));
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Routing path. Starts as the URI path; path-rewriting middlewares
    /// (trailing-slash trimming, API prefix stripping) change this, never the URI.
    pub fn path(&self) -> &str { &self.path }

    pub(crate) fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    pub fn query(&self) -> Option<&str> { self.uri.query() }

    /// Header value as a string, if present and visible ASCII. Case-insensitive.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub fn context(&self) -> &Context { &self.context }
    pub fn context_mut(&mut self) -> &mut Context { &mut self.context }

    /// Replaces the context with one derived from it.
    pub fn extend_context(&mut self, f: impl FnOnce(Context) -> Context) {
        let ctx = std::mem::take(&mut self.context);
        self.context = f(ctx);
    }

    /// Value of the named cookie from the `Cookie` header(s).
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    /// Deserialises the JSON body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        if self.body.is_empty() {
            return Err(ApiError::InvalidInput("request body is empty".into()));
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Deserialises the JSON body and runs its validation rules.
    pub fn json_validated<T: DeserializeOwned + Validate>(&self) -> Result<T, ApiError> {
        let value: T = self.json()?;
        value.validate()?;
        Ok(value)
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        let mut out = Self::new(parts.method, parts.uri);
        out.headers = parts.headers;
        out.body = body;
        out.remote_addr = parts.extensions.get::<SocketAddr>().copied();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Validate)]
    struct Login {
        #[validate(email)]
        email: String,
    }

    fn post(body: &'static str) -> Request {
        Request::new(Method::POST, Uri::from_static("/login")).with_body(body)
    }

    #[test]
    fn cookie_lookup_spans_pairs_and_headers() {
        let req = Request::new(Method::GET, Uri::from_static("/"))
            .with_header(header::COOKIE, "theme=dark; jwt_token=abc.def")
            .with_header(header::COOKIE, "lang=en");

        assert_eq!(req.cookie("jwt_token"), Some("abc.def"));
        assert_eq!(req.cookie("lang"), Some("en"));
        assert_eq!(req.cookie("missing"), None);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = Request::new(Method::GET, Uri::from_static("/")).with_header("x-custom", "1");
        assert_eq!(req.header("X-Custom"), Some("1"));
    }

    #[test]
    fn json_validated_rejects_bad_fields() {
        let err = post(r#"{"email":"not-an-email"}"#).json_validated::<Login>().unwrap_err();
        assert_eq!(err.status_code(), http::StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "email should be a valid email address");
    }

    #[test]
    fn json_rejects_malformed_and_empty_bodies() {
        assert!(matches!(post("{").json::<Login>(), Err(ApiError::InvalidInput(_))));
        assert!(matches!(post("").json::<Login>(), Err(ApiError::InvalidInput(_))));
        let ok: Login = post(r#"{"email":"a@b.co"}"#).json_validated().unwrap();
        assert_eq!(ok.email, "a@b.co");
    }
}
