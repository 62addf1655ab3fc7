//! Cross-origin resource sharing.

use std::sync::Arc;

use http::header::{self, HeaderValue};
use http::{Method, StatusCode};

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::Response;

#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Exact origins, `*` for any, or patterns with a single `*` such as
    /// `https://*.example.com`.
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<Method>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    /// `Access-Control-Max-Age` for preflight responses; omitted when zero.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".into()],
            allowed_methods: vec![Method::GET, Method::POST, Method::HEAD],
            allowed_headers: ["Origin", "Accept", "Content-Type", "X-Requested-With"]
                .into_iter()
                .map(String::from)
                .collect(),
            allow_credentials: false,
            max_age_secs: 0,
        }
    }
}

impl CorsConfig {
    fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|allowed| match allowed.split_once('*') {
            None => allowed.eq_ignore_ascii_case(origin),
            Some(("", "")) => true,
            Some((prefix, suffix)) => {
                origin.len() >= prefix.len() + suffix.len()
                    && origin.starts_with(prefix)
                    && origin.ends_with(suffix)
            }
        })
    }

    fn is_method_allowed(&self, method: &str) -> bool {
        // Preflights are always allowed.
        method.eq_ignore_ascii_case("OPTIONS")
            || self.allowed_methods.iter().any(|m| m.as_str().eq_ignore_ascii_case(method))
    }

    fn are_headers_allowed(&self, requested: &str) -> bool {
        if self.allowed_headers.iter().any(|h| h == "*") {
            return true;
        }
        requested
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .all(|h| self.allowed_headers.iter().any(|a| a.eq_ignore_ascii_case(h)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Cors {
    config: Arc<CorsConfig>,
}

impl Cors {
    pub fn new(config: CorsConfig) -> Self {
        Self { config: Arc::new(config) }
    }

    fn allow_origin_value(&self, origin: &str) -> Option<HeaderValue> {
        if self.config.allows_any_origin() && !self.config.allow_credentials {
            Some(HeaderValue::from_static("*"))
        } else {
            HeaderValue::from_str(origin).ok()
        }
    }

    fn preflight(&self, req: &Request, origin: Option<&str>) -> Response {
        let mut response = Response::status(StatusCode::NO_CONTENT);
        let headers = response.headers_mut();
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
        headers.append(header::VARY, HeaderValue::from_static("Access-Control-Request-Method"));
        headers.append(header::VARY, HeaderValue::from_static("Access-Control-Request-Headers"));

        let Some(origin) = origin.filter(|o| self.config.is_origin_allowed(o)) else {
            return response;
        };
        let method = req.header(header::ACCESS_CONTROL_REQUEST_METHOD).unwrap_or_default();
        if !self.config.is_method_allowed(method) {
            return response;
        }
        let requested_headers = req.header(header::ACCESS_CONTROL_REQUEST_HEADERS).unwrap_or_default();
        if !self.config.are_headers_allowed(requested_headers) {
            return response;
        }

        let headers = response.headers_mut();
        if let Some(value) = self.allow_origin_value(origin) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        if let Ok(value) = HeaderValue::from_str(&method.to_ascii_uppercase()) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, value);
        }
        if !requested_headers.is_empty() {
            if let Ok(value) = HeaderValue::from_str(requested_headers) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, value);
            }
        }
        if self.config.allow_credentials {
            headers.insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if self.config.max_age_secs > 0 {
            headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(self.config.max_age_secs));
        }
        response
    }

    fn decorate(&self, response: &mut Response, origin: Option<&str>, method: &Method) {
        response.headers_mut().append(header::VARY, HeaderValue::from_static("Origin"));

        let Some(origin) = origin.filter(|o| self.config.is_origin_allowed(o)) else { return };
        if !self.config.is_method_allowed(method.as_str()) {
            return;
        }
        let headers = response.headers_mut();
        if let Some(value) = self.allow_origin_value(origin) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        if self.config.allow_credentials {
            headers.insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
    }
}

fn is_preflight(req: &Request) -> bool {
    req.method() == Method::OPTIONS && req.headers().contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

impl Middleware for Cors {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let origin = req.header(header::ORIGIN).map(str::to_owned);

        if is_preflight(&req) {
            let response = self.preflight(&req, origin.as_deref());
            return Box::pin(async move { response });
        }

        let this = self.clone();
        let method = req.method().clone();
        Box::pin(async move {
            let mut response = next.run(req).await;
            this.decorate(&mut response, origin.as_deref(), &method);
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use http::Uri;

    use super::*;
    use crate::handler::{BoxedHandler, ErasedHandler, Handler};
    use crate::middleware::layer;

    async fn ok(_req: Request) -> &'static str {
        "ok"
    }

    fn chain(config: CorsConfig) -> BoxedHandler {
        layer(ok.into_boxed_handler(), Arc::new(Cors::new(config)))
    }

    fn preflight(origin: &str, method: &str) -> Request {
        Request::new(Method::OPTIONS, Uri::from_static("/orders"))
            .with_header(header::ORIGIN, origin)
            .with_header(header::ACCESS_CONTROL_REQUEST_METHOD, method)
    }

    fn restricted() -> CorsConfig {
        CorsConfig {
            allowed_origins: vec!["https://app.example.com".into(), "https://*.preview.example.com".into()],
            allowed_methods: vec![Method::GET, Method::POST, Method::DELETE],
            allow_credentials: true,
            max_age_secs: 600,
            ..CorsConfig::default()
        }
    }

    #[tokio::test]
    async fn allowed_preflight_short_circuits_with_headers() {
        let response = chain(restricted()).call(preflight("https://app.example.com", "DELETE")).await;

        assert_eq!(response.status_code(), StatusCode::NO_CONTENT);
        assert!(response.body().is_empty());
        assert_eq!(response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN), Some("https://app.example.com"));
        assert_eq!(response.header(header::ACCESS_CONTROL_ALLOW_METHODS), Some("DELETE"));
        assert_eq!(response.header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS), Some("true"));
        assert_eq!(response.header(header::ACCESS_CONTROL_MAX_AGE), Some("600"));
    }

    #[tokio::test]
    async fn denied_preflight_has_no_allow_headers() {
        for req in [
            preflight("https://evil.example.net", "GET"),
            preflight("https://app.example.com", "PATCH"),
        ] {
            let response = chain(restricted()).call(req).await;
            assert_eq!(response.status_code(), StatusCode::NO_CONTENT);
            assert!(response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        }
    }

    #[tokio::test]
    async fn actual_request_gets_origin_and_vary() {
        let req = Request::new(Method::GET, Uri::from_static("/orders"))
            .with_header(header::ORIGIN, "https://pr-12.preview.example.com");
        let response = chain(restricted()).call(req).await;

        assert_eq!(response.body().as_ref(), b"ok");
        assert_eq!(
            response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some("https://pr-12.preview.example.com")
        );
        assert_eq!(response.header(header::VARY), Some("Origin"));
    }

    #[tokio::test]
    async fn wildcard_without_credentials_echoes_star() {
        let req = Request::new(Method::GET, Uri::from_static("/"))
            .with_header(header::ORIGIN, "https://anything.dev");
        let response = chain(CorsConfig::default()).call(req).await;
        assert_eq!(response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN), Some("*"));
    }

    #[test]
    fn origin_patterns() {
        let config = restricted();
        assert!(config.is_origin_allowed("https://app.example.com"));
        assert!(config.is_origin_allowed("https://a.preview.example.com"));
        assert!(!config.is_origin_allowed("https://preview.example.com"));
        assert!(!config.is_origin_allowed("http://app.example.com"));
    }
}
