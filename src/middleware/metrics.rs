//! Prometheus request metrics.
//!
//! [`Metrics`] owns its own registry; nothing is registered globally. The
//! [`App`](crate::App) builds one, installs [`RecordMetrics`] in its chain
//! and serves [`Metrics::render`] at `/metrics`.

use std::sync::Arc;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::time::Instant;

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::router::MatchedPath;

const LABELS: [&str; 3] = ["method", "path", "status"];

#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    http_response_size_bytes: HistogramVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total =
            IntCounterVec::new(Opts::new("http_requests_total", "Total number of HTTP requests."), &LABELS)
                .expect("metric can be created");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "Duration of HTTP requests."),
            &LABELS,
        )
        .expect("metric can be created");

        let http_response_size_bytes = HistogramVec::new(
            HistogramOpts::new("http_response_size_bytes", "Size of HTTP responses.")
                .buckets(prometheus::exponential_buckets(64.0, 4.0, 8).expect("valid bucket layout")),
            &LABELS,
        )
        .expect("metric can be created");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(http_response_size_bytes.clone()))
            .expect("metric can be registered");

        Self {
            inner: Arc::new(Inner {
                registry,
                http_requests_total,
                http_request_duration_seconds,
                http_response_size_bytes,
            }),
        }
    }

    pub fn record(&self, method: &str, path: &str, status: u16, duration_secs: f64, size_bytes: usize) {
        let status = status.to_string();
        let labels = [method, path, status.as_str()];
        self.inner.http_requests_total.with_label_values(&labels).inc();
        self.inner.http_request_duration_seconds.with_label_values(&labels).observe(duration_secs);
        self.inner.http_response_size_bytes.with_label_values(&labels).observe(size_bytes as f64);
    }

    /// Current value of `http_requests_total` for one label set.
    pub fn requests(&self, method: &str, path: &str, status: u16) -> u64 {
        let status = status.to_string();
        self.inner.http_requests_total.with_label_values(&[method, path, status.as_str()]).get()
    }

    /// Text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.inner.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Records count, duration and size of every response. The path label is
/// the matched route pattern when routing succeeded, which keeps label
/// cardinality bounded by the route table.
#[derive(Debug, Clone)]
pub struct RecordMetrics {
    metrics: Metrics,
}

impl RecordMetrics {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }
}

impl Middleware for RecordMetrics {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let metrics = self.metrics.clone();
        let method = req.method().to_string();
        let raw_path = req.path().to_owned();
        let start = Instant::now();

        Box::pin(async move {
            let response = next.run(req).await;
            let path = response
                .extensions()
                .get::<MatchedPath>()
                .map_or(raw_path.as_str(), MatchedPath::as_str);
            metrics.record(
                &method,
                path,
                response.status_code().as_u16(),
                start.elapsed().as_secs_f64(),
                response.body().len(),
            );
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode, Uri};

    use super::*;
    use crate::handler::ErasedHandler;
    use crate::middleware::layer;
    use crate::response::Response;
    use crate::router::Router;

    async fn user(_req: Request) -> Response {
        Response::text("ada")
    }

    #[test]
    fn registries_are_independent() {
        let a = Metrics::new();
        let b = Metrics::new();
        a.record("GET", "/x", 200, 0.01, 10);
        assert_eq!(a.requests("GET", "/x", 200), 1);
        assert_eq!(b.requests("GET", "/x", 200), 0);
    }

    #[test]
    fn render_exposes_all_three_families() {
        let metrics = Metrics::new();
        metrics.record("POST", "/orders", 201, 0.2, 512);
        let text = metrics.render().unwrap();
        assert!(text.contains("http_requests_total{method=\"POST\",path=\"/orders\",status=\"201\"} 1"));
        assert!(text.contains("http_request_duration_seconds_bucket"));
        assert!(text.contains("http_response_size_bytes_sum"));
    }

    #[tokio::test]
    async fn labels_use_route_pattern_not_raw_path() {
        let metrics = Metrics::new();
        let router = Router::new().get("/users/{id}", user).into_handler();
        let chain = layer(router, Arc::new(RecordMetrics::new(metrics.clone())));

        for id in ["1", "2", "3"] {
            let uri: Uri = format!("/users/{id}").parse().unwrap();
            let response = chain.call(Request::new(Method::GET, uri)).await;
            assert_eq!(response.status_code(), StatusCode::OK);
        }
        chain.call(Request::new(Method::GET, Uri::from_static("/nope"))).await;

        assert_eq!(metrics.requests("GET", "/users/{id}", 200), 3);
        assert_eq!(metrics.requests("GET", "/nope", 404), 1);
    }
}
