//! Radix-tree request router and the application shell around it.
//!
//! [`Router`] keeps one tree per HTTP method. Lookup is O(path-length). Build
//! it once at startup and hand it to [`App`], which mounts it under
//! `/api/{version}` inside the standard middleware chain.

use std::collections::HashMap;
use std::sync::Arc;

use http::header::{self, HeaderValue};
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;
use tracing::error;

use crate::config;
use crate::error::ApiError;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
use crate::health;
use crate::middleware::metrics::Metrics;
use crate::middleware::rate_limit::{RateLimitConfig, RateLimiter};
use crate::middleware::{
    self, Cors, CorsConfig, ETag, Middleware, RateLimit, RecordMetrics, Recovery, RequestId, RequestLogger, Trace,
    TrailingSlash,
};
use crate::request::Request;
use crate::response::{ContentType, IntoResponse, Response};
use crate::worker::Supervisor;

/// The route pattern that served a request, e.g. `/users/{id}`.
///
/// Set as a response extension by the router so outer layers can label
/// requests by route instead of by raw path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedPath(Arc<str>);

impl MatchedPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

struct Endpoint {
    pattern: Arc<str>,
    handler: BoxedHandler,
}

/// The API route table.
///
/// Each registration returns `self` so calls chain:
///
/// ```rust
/// # use plinth::{Request, Response, Router};
/// # async fn get_user(_: Request) -> Response { Response::text("") }
/// # async fn create_user(_: Request) -> Response { Response::text("") }
/// # async fn delete_user(_: Request) -> Response { Response::text("") }
/// Router::new()
///     .delete("/users/{id}", delete_user)
///     .get("/users/{id}", get_user)
///     .post("/users", create_user);
/// ```
///
/// Path parameters use `{name}` syntax and are read with
/// [`Request::param`].
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Endpoint>>,
    route_layers: Vec<Arc<dyn Middleware>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), route_layers: Vec::new() }
    }

    /// Registers `handler` for `method` and `path`, wrapped in every route
    /// layer added so far.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid pattern or conflicts with a route
    /// already registered for the same method.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        let handler = self
            .route_layers
            .iter()
            .rev()
            .fold(handler.into_boxed_handler(), |inner, mw| middleware::layer(inner, Arc::clone(mw)));
        self.insert(method, path, handler);
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, path, handler)
    }

    pub fn patch(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PATCH, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    /// Wraps every route registered *after* this call. Layers added earlier
    /// run first.
    pub fn route_layer(mut self, middleware: impl Middleware) -> Self {
        self.route_layers.push(Arc::new(middleware));
        self
    }

    fn insert(&mut self, method: Method, path: &str, handler: BoxedHandler) {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, Endpoint { pattern: path.into(), handler })
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
    }

    fn has_route(&self, method: &Method, path: &str) -> bool {
        self.routes.get(method).is_some_and(|tree| tree.at(path).is_ok())
    }

    pub(crate) fn into_handler(self) -> BoxedHandler {
        Arc::new(Dispatch { routes: self.routes })
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

struct Dispatch {
    routes: HashMap<Method, MatchitRouter<Endpoint>>,
}

impl Dispatch {
    fn lookup(&self, method: &Method, path: &str) -> Option<(&Endpoint, HashMap<String, String>)> {
        let matched = self.routes.get(method)?.at(path).ok()?;
        let params = matched.params.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect();
        Some((matched.value, params))
    }

    /// Methods with a route for `path`, for the `Allow` header of a 405.
    fn allowed(&self, path: &str) -> Vec<&str> {
        let mut methods: Vec<&str> = self
            .routes
            .iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method.as_str())
            .collect();
        methods.sort_unstable();
        methods
    }
}

impl ErasedHandler for Dispatch {
    fn call(&self, mut req: Request) -> BoxFuture {
        let found = self.lookup(req.method(), req.path()).or_else(|| {
            // HEAD is served by the GET route when none is registered for it.
            (req.method() == Method::HEAD).then(|| self.lookup(&Method::GET, req.path())).flatten()
        });

        let Some((endpoint, params)) = found else {
            let allowed = self.allowed(req.path());
            let response = if allowed.is_empty() {
                ApiError::NotFound(format!("no route for {} {}", req.method(), req.path())).into_response()
            } else {
                let mut response =
                    ApiError::status(StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response();
                if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
                    response.headers_mut().insert(header::ALLOW, value);
                }
                response
            };
            return Box::pin(async move { response });
        };

        req.set_params(params);
        let matched = MatchedPath(Arc::clone(&endpoint.pattern));
        let fut = endpoint.handler.call(req);
        Box::pin(async move {
            let mut response = fut.await;
            response.extensions_mut().insert(matched);
            response
        })
    }
}

// ── App ──────────────────────────────────────────────────────────────────────

/// Settings for [`App::new`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// The API is mounted at `/api/{api_version}`.
    pub api_version: String,
    pub cors: CorsConfig,
    pub rate_limit: RateLimitConfig,
    /// Adds the [`ETag`] layer in front of the API routes.
    pub etag: bool,
    /// Concurrency bound of the app's background task [`Supervisor`].
    pub max_background_tasks: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            api_version: "v1".to_owned(),
            cors: CorsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            etag: false,
            max_background_tasks: 64,
        }
    }
}

impl RouterConfig {
    /// `API_VERSION`, `CORS_ALLOWED_ORIGINS` (comma separated),
    /// `CORS_ALLOW_CREDENTIALS`, `ETAG_ENABLED`, `MAX_BACKGROUND_TASKS` and
    /// the `RATE_LIMIT_*` variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let origins = config::string_or("CORS_ALLOWED_ORIGINS", "*");
        Self {
            api_version: config::string_or("API_VERSION", &defaults.api_version),
            cors: CorsConfig {
                allowed_origins: origins.split(',').map(str::trim).filter(|o| !o.is_empty()).map(String::from).collect(),
                allow_credentials: config::bool_or("CORS_ALLOW_CREDENTIALS", false),
                ..defaults.cors
            },
            rate_limit: RateLimitConfig::from_env(),
            etag: config::bool_or("ETAG_ENABLED", defaults.etag),
            max_background_tasks: usize::try_from(config::int_or("MAX_BACKGROUND_TASKS", 64))
                .unwrap_or(defaults.max_background_tasks),
        }
    }
}

/// A complete application: the API router wrapped in the standard chain,
/// plus `/metrics`, `/healthz` and `/readyz`.
///
/// ```text
/// RequestId → RequestLogger → Recovery → RecordMetrics
///   → Trace → Cors → RateLimit → TrailingSlash → [ETag] → /api/{version}/…
/// ```
///
/// Handlers see paths relative to the mount point: a request for
/// `/api/v1/users/7` reaches the route registered as `/users/{id}`.
///
/// The metrics registry, the rate limiter and the task supervisor are owned
/// by the app, so two apps in one process share nothing. Cloning is cheap
/// and clones share everything.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

struct AppInner {
    chain: BoxedHandler,
    metrics: Metrics,
    rate_limiter: RateLimiter,
    supervisor: Supervisor,
}

impl App {
    pub fn new(config: RouterConfig, mut api: Router) -> Self {
        if !api.has_route(&Method::GET, "/health") {
            api.insert(Method::GET, "/health", health::api_health.into_boxed_handler());
        }

        let metrics = Metrics::new();
        let rate_limiter = RateLimiter::new(config.rate_limit.clone());
        if rate_limiter.config().enabled {
            rate_limiter.spawn_sweeper();
        }

        let mount: BoxedHandler = Arc::new(Mount {
            prefix: format!("/api/{}", config.api_version.trim_matches('/')).into(),
            api: api.into_handler(),
        });

        let mut layers: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(RequestId::new()),
            Arc::new(RequestLogger::for_api_version(&config.api_version)),
            Arc::new(Recovery::new()),
            Arc::new(RecordMetrics::new(metrics.clone())),
            Arc::new(Trace::new()),
            Arc::new(Cors::new(config.cors)),
            Arc::new(RateLimit::new(rate_limiter.clone())),
            Arc::new(TrailingSlash::new()),
        ];
        if config.etag {
            layers.push(Arc::new(ETag::new()));
        }
        let chain = layers.into_iter().rev().fold(mount, middleware::layer);

        Self {
            inner: Arc::new(AppInner {
                chain,
                metrics,
                rate_limiter,
                supervisor: Supervisor::new(config.max_background_tasks),
            }),
        }
    }

    /// Replaces the background task supervisor, e.g. with one the handlers
    /// already hold a clone of.
    pub fn with_supervisor(self, supervisor: Supervisor) -> Self {
        let inner = &self.inner;
        Self {
            inner: Arc::new(AppInner {
                chain: Arc::clone(&inner.chain),
                metrics: inner.metrics.clone(),
                rate_limiter: inner.rate_limiter.clone(),
                supervisor,
            }),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.rate_limiter
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.inner.supervisor
    }

    /// Serves one request.
    pub async fn call(&self, req: Request) -> Response {
        match (req.method(), req.path()) {
            (&Method::GET | &Method::HEAD, "/healthz") => health::liveness(req).await,
            (&Method::GET | &Method::HEAD, "/readyz") => health::readiness(req).await,
            (&Method::GET, "/metrics") => self.render_metrics(),
            _ => self.inner.chain.call(req).await,
        }
    }

    fn render_metrics(&self) -> Response {
        match self.inner.metrics.render() {
            Ok(text) => Response::builder().bytes(ContentType::Prometheus, text),
            Err(e) => {
                error!(error = %e, "failed to encode metrics");
                Response::status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

impl From<Router> for App {
    fn from(router: Router) -> Self {
        App::new(RouterConfig::default(), router)
    }
}

/// Strips the API prefix and hands the rest to the API router. The matched
/// route is reported with the prefix so metrics labels are unambiguous.
struct Mount {
    prefix: Arc<str>,
    api: BoxedHandler,
}

fn strip_mount<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    match path.strip_prefix(prefix)? {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

impl ErasedHandler for Mount {
    fn call(&self, mut req: Request) -> BoxFuture {
        let Some(rest) = strip_mount(req.path(), &self.prefix) else {
            let response = ApiError::NotFound(format!("no route for {} {}", req.method(), req.path())).into_response();
            return Box::pin(async move { response });
        };
        let rest = rest.to_owned();
        req.set_path(rest);

        let prefix = Arc::clone(&self.prefix);
        let fut = self.api.call(req);
        Box::pin(async move {
            let mut response = fut.await;
            if let Some(matched) = response.extensions_mut().remove::<MatchedPath>() {
                let full = format!("{prefix}{}", matched.as_str());
                response.extensions_mut().insert(MatchedPath(full.into()));
            }
            response
        })
    }
}
