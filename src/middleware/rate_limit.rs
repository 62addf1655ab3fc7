//! Fixed-window rate limiting per client address.
//!
//! The key is the connection's remote IP, never a request header, so a
//! client cannot dodge its quota by rewriting `X-Forwarded-For`. Deployments
//! behind a proxy therefore limit per proxy address.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use http::StatusCode;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::config;
use crate::error::ApiError;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::IntoResponse;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests admitted per client per window.
    pub limit: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { enabled: false, limit: 100, window_secs: 60 }
    }
}

impl RateLimitConfig {
    /// `RATE_LIMIT_ENABLED`, `RATE_LIMIT_LIMIT`, `RATE_LIMIT_WINDOW_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let limit = config::int_or("RATE_LIMIT_LIMIT", defaults.limit.into());
        let window_secs = config::int_or("RATE_LIMIT_WINDOW_SECS", i64::try_from(defaults.window_secs).unwrap_or(i64::MAX));
        Self {
            enabled: config::bool_or("RATE_LIMIT_ENABLED", defaults.enabled),
            limit: u32::try_from(limit).unwrap_or(defaults.limit),
            window_secs: u64::try_from(window_secs).unwrap_or(defaults.window_secs),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Copy)]
struct Client {
    window_start: Instant,
    request_count: u32,
}

type Clients = Mutex<HashMap<IpAddr, Client>>;

/// Shared client table. Clones share state, including the sweeper.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: Arc<Clients>,
    sweeper_started: Arc<AtomicBool>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, clients: Arc::default(), sweeper_started: Arc::default() }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admits or rejects one request from `ip`.
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    pub fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let window = self.config.window();
        let mut clients = self.clients.lock();
        let client = clients.entry(ip).or_insert(Client { window_start: now, request_count: 0 });

        if now.saturating_duration_since(client.window_start) > window {
            client.request_count = 0;
            client.window_start = now;
        }

        if client.request_count >= self.config.limit {
            return false;
        }
        client.request_count += 1;
        true
    }

    /// Drops clients idle for longer than one window.
    pub fn sweep_at(&self, now: Instant) -> usize {
        sweep(&self.clients, self.config.window(), now)
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }

    /// Sweeps once per window on the current tokio runtime. The task holds
    /// only a weak reference and ends once every limiter clone is dropped.
    ///
    /// At most one sweeper runs per limiter. Returns `None` when one is
    /// already running or no runtime is current; [`RateLimit`] retries on
    /// the next request in that case.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        if self.sweeper_started.load(Ordering::Acquire) {
            return None;
        }
        let handle = tokio::runtime::Handle::try_current().ok()?;
        if self.sweeper_started.swap(true, Ordering::AcqRel) {
            return None;
        }
        let clients: Weak<Clients> = Arc::downgrade(&self.clients);
        let window = self.config.window().max(Duration::from_secs(1));

        Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(window);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(clients) = clients.upgrade() else { break };
                let removed = sweep(&clients, window, Instant::now());
                if removed > 0 {
                    debug!(removed, "rate limiter swept idle clients");
                }
            }
        }))
    }
}

fn sweep(clients: &Clients, window: Duration, now: Instant) -> usize {
    let mut clients = clients.lock();
    let before = clients.len();
    clients.retain(|_, c| now.saturating_duration_since(c.window_start) <= window);
    before - clients.len()
}

/// Rejects over-quota clients with `429 Too Many Requests`.
#[derive(Debug, Clone)]
pub struct RateLimit {
    limiter: RateLimiter,
}

impl RateLimit {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

impl Middleware for RateLimit {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        if !self.limiter.config.enabled {
            return Box::pin(next.run(req));
        }

        self.limiter.spawn_sweeper();

        let ip = req.remote_addr().map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |a| a.ip());
        if self.limiter.check(ip) {
            return Box::pin(next.run(req));
        }

        if let Some(state) = req.context().log_state() {
            state.set("rate_limited", true);
        }
        let response = ApiError::status(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
        Box::pin(async move { response })
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use http::{Method, Uri};

    use super::*;
    use crate::handler::{ErasedHandler, Handler};
    use crate::json::ErrorResponse;
    use crate::middleware::layer;

    fn limiter(limit: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig { enabled: true, limit, window_secs })
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn third_request_in_window_is_rejected_then_window_resets() {
        let limiter = limiter(2, 1);
        let t0 = Instant::now();

        assert!(limiter.check_at(ip(1), t0));
        assert!(limiter.check_at(ip(1), t0 + Duration::from_millis(100)));
        assert!(!limiter.check_at(ip(1), t0 + Duration::from_millis(200)));
        // Other clients have their own window.
        assert!(limiter.check_at(ip(2), t0 + Duration::from_millis(200)));

        assert!(limiter.check_at(ip(1), t0 + Duration::from_millis(1001)));
    }

    #[test]
    fn sweep_drops_only_idle_clients() {
        let limiter = limiter(5, 10);
        let t0 = Instant::now();
        limiter.check_at(ip(1), t0);
        limiter.check_at(ip(2), t0 + Duration::from_secs(8));

        assert_eq!(limiter.sweep_at(t0 + Duration::from_secs(11)), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    async fn ok(_req: Request) -> &'static str {
        "ok"
    }

    fn from(addr: &str) -> Request {
        let addr: SocketAddr = addr.parse().unwrap();
        Request::new(Method::GET, Uri::from_static("/")).with_remote_addr(addr)
    }

    #[tokio::test(start_paused = true)]
    async fn middleware_rejects_with_json_429() {
        let chain = layer(ok.into_boxed_handler(), Arc::new(RateLimit::new(limiter(2, 1))));

        assert_eq!(chain.call(from("10.0.0.1:5000")).await.status_code(), StatusCode::OK);
        assert_eq!(chain.call(from("10.0.0.1:5001")).await.status_code(), StatusCode::OK);

        let rejected = chain.call(from("10.0.0.1:5002")).await;
        assert_eq!(rejected.status_code(), StatusCode::TOO_MANY_REQUESTS);
        let body: ErrorResponse = serde_json::from_slice(rejected.body()).unwrap();
        assert_eq!(body.status, 429);
        assert_eq!(body.message, "Too Many Requests");

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(chain.call(from("10.0.0.1:5003")).await.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn spoofed_forwarding_headers_do_not_change_the_key() {
        let chain = layer(ok.into_boxed_handler(), Arc::new(RateLimit::new(limiter(1, 60))));

        assert_eq!(chain.call(from("10.0.0.1:5000")).await.status_code(), StatusCode::OK);
        let spoofed = from("10.0.0.1:5001").with_header("x-forwarded-for", "198.51.100.7");
        assert_eq!(chain.call(spoofed).await.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn disabled_limiter_passes_everything() {
        let disabled = RateLimiter::new(RateLimitConfig { enabled: false, limit: 0, window_secs: 1 });
        let chain = layer(ok.into_boxed_handler(), Arc::new(RateLimit::new(disabled.clone())));

        for _ in 0..5 {
            assert_eq!(chain.call(from("10.0.0.1:5000")).await.status_code(), StatusCode::OK);
        }
        assert_eq!(disabled.tracked_clients(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_when_limiter_is_dropped() {
        let limiter = limiter(1, 1);
        limiter.check(ip(1));
        let task = limiter.spawn_sweeper().unwrap();

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(limiter.tracked_clients(), 0);

        drop(limiter);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn middleware_starts_a_single_sweeper_on_first_request() {
        let limiter = limiter(5, 1);
        let chain = layer(ok.into_boxed_handler(), Arc::new(RateLimit::new(limiter.clone())));

        chain.call(from("10.0.0.1:5000")).await;
        chain.call(from("10.0.0.2:5000")).await;
        assert_eq!(limiter.tracked_clients(), 2);
        assert!(limiter.spawn_sweeper().is_none());

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn window_default_comes_from_the_default_config() {
        assert_eq!(RateLimitConfig::from_env().window_secs, RateLimitConfig::default().window_secs);
    }
}
