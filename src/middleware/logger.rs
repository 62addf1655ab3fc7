//! One consolidated log record per request.
//!
//! Sits directly inside [`RequestId`](super::RequestId) so it observes the
//! final status of everything below it, including responses produced by
//! recovery and rate limiting. The record is emitted once, after the inner
//! chain returns, and the request's [`LogState`](crate::LogState) is sealed
//! at that point.

use std::sync::Arc;
use std::time::Duration;

use http::header::{self, HeaderName};
use http::Method;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::handler::BoxFuture;
use crate::log_state::LogSnapshot;
use crate::logging::mask_sensitive;
use crate::middleware::{Middleware, Next};
use crate::request::Request;

/// Requests slower than this log at WARN and keep their breadcrumbs.
pub const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_millis(500);

const P90_THRESHOLD: Duration = Duration::from_millis(200);

static CF_CONNECTING_IP: HeaderName = HeaderName::from_static("cf-connecting-ip");
static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Skips the bare `/health` probe and the API's own `/api/{version}/health`.
#[derive(Debug, Clone)]
pub struct RequestLogger {
    api_health: Arc<str>,
}

impl Default for RequestLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestLogger {
    pub fn new() -> Self {
        Self::for_api_version("v1")
    }

    pub fn for_api_version(version: &str) -> Self {
        Self { api_health: format!("/api/{}/health", version.trim_matches('/')).into() }
    }

    fn is_health_check(&self, path: &str) -> bool {
        let path = match path.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };
        path == "/health" || path == &*self.api_health
    }
}

fn latency_class(elapsed: Duration) -> &'static str {
    if elapsed > SLOW_REQUEST_THRESHOLD {
        "slow"
    } else if elapsed > P90_THRESHOLD {
        "p90"
    } else {
        "fast"
    }
}

/// Client address for the log record, proxy headers first. Never used for
/// admission decisions.
fn client_ip(req: &Request) -> String {
    if let Some(ip) = req.header(&CF_CONNECTING_IP) {
        return ip.to_owned();
    }
    if let Some(ip) = req.header(&X_FORWARDED_FOR).and_then(|v| v.split(',').next()) {
        return ip.trim().to_owned();
    }
    if let Some(ip) = req.header(&X_REAL_IP) {
        return ip.to_owned();
    }
    req.remote_addr().map(|a| a.ip().to_string()).unwrap_or_default()
}

/// JSON bodies are masked field by field; anything else is logged as-is.
pub(crate) fn scrub_payload(body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(mut value) => {
            mask_sensitive(&mut value);
            value.to_string()
        }
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

impl Middleware for RequestLogger {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        if self.is_health_check(req.path()) {
            return Box::pin(next.run(req));
        }

        let start = Instant::now();
        let method = req.method().clone();
        let url = req.uri().to_string();
        let payload = if method == Method::GET { String::new() } else { scrub_payload(req.body()) };
        let ip = client_ip(&req);
        let user_agent = req.header(header::USER_AGENT).unwrap_or_default().to_owned();
        let referer = req.header(header::REFERER).unwrap_or_default().to_owned();
        let request_id = req.context().request_id().unwrap_or_default().to_owned();
        let state = req.context().log_state().cloned();
        let context_user = req.context().user().and_then(|u| u.id.parse::<u64>().ok());

        Box::pin(async move {
            let response = next.run(req).await;
            let elapsed = start.elapsed();
            let status = response.status_code();

            let LogSnapshot { mut fields, breadcrumbs, user_id } =
                state.map(|s| s.finish()).unwrap_or_default();

            let user_id = if user_id != 0 { user_id } else { context_user.unwrap_or(0) };
            let trace_id = match fields.remove("trace_id") {
                Some(Value::String(id)) => id,
                Some(other) => other.to_string(),
                None => String::new(),
            };
            let failed = status.as_u16() >= 400;
            let breadcrumbs = ((failed || elapsed > SLOW_REQUEST_THRESHOLD) && !breadcrumbs.is_empty())
                .then(|| Value::from(breadcrumbs).to_string());
            let fields = (!fields.is_empty()).then(|| {
                let mut fields = Value::Object(fields);
                mask_sensitive(&mut fields);
                fields.to_string()
            });
            let error_body = failed.then(|| scrub_payload(response.body()));
            let content_type = response.header(header::CONTENT_TYPE).unwrap_or_default();

            macro_rules! emit {
                ($level:ident) => {
                    $level!(
                        http.method = %method,
                        http.url = %url,
                        http.status = status.as_u16(),
                        http.duration_ms = elapsed.as_millis() as u64,
                        http.latency_class = latency_class(elapsed),
                        http.size_bytes = response.body().len(),
                        http.content_type = content_type,
                        user.id = user_id,
                        user.ip = %ip,
                        user.ua = %user_agent,
                        user.referer = %referer,
                        trace.request_id = %request_id,
                        trace.trace_id = %trace_id,
                        payload = %payload,
                        error = error_body.as_deref(),
                        fields = fields.as_deref(),
                        breadcrumbs = breadcrumbs.as_deref(),
                        "HTTP Request"
                    )
                };
            }

            if status.is_server_error() {
                emit!(error);
            } else if failed || elapsed > SLOW_REQUEST_THRESHOLD {
                emit!(warn);
            } else {
                emit!(info);
            }

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::{StatusCode, Uri};

    use super::*;
    use crate::handler::{BoxedHandler, ErasedHandler, Handler};
    use crate::logging::MASKED;
    use crate::logging::capture::json_subscriber;
    use crate::middleware::{RequestId, layer};
    use crate::response::Response;

    async fn checkout(req: Request) -> Response {
        let state = req.context().log_state().unwrap();
        state.add_breadcrumb("loaded cart");
        state.set("order_id", 991);
        if req.query() == Some("fail=1") {
            return Response::builder()
                .status(StatusCode::UNPROCESSABLE_ENTITY)
                .json(r#"{"message":"card declined"}"#);
        }
        Response::text("ok")
    }

    async fn slow(req: Request) -> Response {
        req.context().log_state().unwrap().add_breadcrumb("waited");
        tokio::time::sleep(Duration::from_millis(600)).await;
        Response::text("ok")
    }

    fn chain(handler: impl Handler) -> BoxedHandler {
        let inner = layer(handler.into_boxed_handler(), Arc::new(RequestLogger::new()));
        layer(inner, Arc::new(RequestId::new()))
    }

    fn get(uri: &'static str) -> Request {
        Request::new(Method::GET, Uri::from_static(uri))
    }

    #[tokio::test]
    async fn success_omits_breadcrumbs() {
        let (subscriber, capture) = json_subscriber();
        let _guard = tracing::subscriber::set_default(subscriber);

        chain(checkout).call(get("/checkout")).await;

        let records = capture.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record["msg"], "HTTP Request");
        assert_eq!(record["level"], "INFO");
        assert_eq!(record["http.status"], 200);
        assert_eq!(record["http.latency_class"], "fast");
        assert!(record["fields"].as_str().unwrap().contains("order_id"));
        assert!(record.get("breadcrumbs").is_none());
        assert!(record.get("error").is_none());
    }

    #[tokio::test]
    async fn client_error_keeps_breadcrumbs_and_error_body() {
        let (subscriber, capture) = json_subscriber();
        let _guard = tracing::subscriber::set_default(subscriber);

        chain(checkout).call(get("/checkout?fail=1")).await;

        let record = &capture.records()[0];
        assert_eq!(record["level"], "WARN");
        assert_eq!(record["http.status"], 422);
        assert!(record["breadcrumbs"].as_str().unwrap().contains("loaded cart"));
        assert!(record["error"].as_str().unwrap().contains("card declined"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_success_keeps_breadcrumbs() {
        let (subscriber, capture) = json_subscriber();
        let _guard = tracing::subscriber::set_default(subscriber);

        chain(slow).call(get("/slow")).await;

        let record = &capture.records()[0];
        assert_eq!(record["level"], "WARN");
        assert_eq!(record["http.latency_class"], "slow");
        assert!(record["breadcrumbs"].as_str().unwrap().contains("waited"));
    }

    #[tokio::test]
    async fn health_checks_are_not_logged() {
        let (subscriber, capture) = json_subscriber();
        let _guard = tracing::subscriber::set_default(subscriber);

        chain(checkout).call(get("/api/v1/health")).await;

        assert!(capture.records().is_empty());
    }

    #[tokio::test]
    async fn only_exact_health_paths_are_skipped() {
        let (subscriber, capture) = json_subscriber();
        let _guard = tracing::subscriber::set_default(subscriber);

        let logger = RequestLogger::for_api_version("v2");
        let chain = layer(layer(checkout.into_boxed_handler(), Arc::new(logger)), Arc::new(RequestId::new()));
        for uri in ["/health", "/api/v2/health", "/api/v2/health/"] {
            chain.call(Request::new(Method::GET, Uri::from_static(uri))).await;
        }
        assert!(capture.records().is_empty());

        chain.call(get("/api/v2/users/health")).await;
        chain.call(get("/api/v1/health")).await;
        let records = capture.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["http.url"], "/api/v2/users/health");
    }

    async fn leaky(req: Request) -> Response {
        let state = req.context().log_state().unwrap();
        state.set("token", "sekret-token");
        state.set("login", serde_json::json!({ "email": "a@b.co", "password": "hunter2" }));
        Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .json(r#"{"message":"bad login","refresh_token":"rt-123"}"#)
    }

    #[tokio::test]
    async fn fields_and_error_body_are_masked() {
        let (subscriber, capture) = json_subscriber();
        let _guard = tracing::subscriber::set_default(subscriber);

        chain(leaky).call(get("/login")).await;

        let record = &capture.records()[0];
        let fields = record["fields"].as_str().unwrap();
        assert!(!fields.contains("sekret-token"));
        assert!(!fields.contains("hunter2"));
        assert!(fields.contains("a@b.co"));
        assert!(fields.contains(MASKED));

        let error = record["error"].as_str().unwrap();
        assert!(!error.contains("rt-123"));
        assert!(error.contains("bad login"));
    }

    #[tokio::test]
    async fn payload_is_scrubbed_and_request_id_attached() {
        let (subscriber, capture) = json_subscriber();
        let _guard = tracing::subscriber::set_default(subscriber);

        let req = Request::new(Method::POST, Uri::from_static("/login"))
            .with_header("x-request-id", "req-42")
            .with_header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .with_body(r#"{"email":"a@b.co","password":"hunter2"}"#);
        chain(checkout).call(req).await;

        let record = &capture.records()[0];
        let payload = record["payload"].as_str().unwrap();
        assert!(payload.contains(MASKED));
        assert!(!payload.contains("hunter2"));
        assert_eq!(record["trace.request_id"], "req-42");
        assert_eq!(record["request_id"], "req-42");
        assert_eq!(record["user.ip"], "203.0.113.9");
    }

    #[test]
    fn latency_classes() {
        assert_eq!(latency_class(Duration::from_millis(200)), "fast");
        assert_eq!(latency_class(Duration::from_millis(201)), "p90");
        assert_eq!(latency_class(Duration::from_millis(501)), "slow");
    }

    #[test]
    fn non_json_payload_is_kept_verbatim() {
        assert_eq!(scrub_payload(b"name=ada"), "name=ada");
        assert_eq!(scrub_payload(b""), "");
    }
}
