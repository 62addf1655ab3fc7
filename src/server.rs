//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()`, so no new connections are made.
//! 2. Asking every open connection to finish its in-flight request and close.
//! 3. Waiting for the app's background tasks.
//! 4. Returning from [`Server::serve`], which lets `main` exit cleanly.
//!
//! Steps 2 and 3 share one grace period ([`Server::shutdown_timeout`]). When
//! it runs out, remaining connections are aborted and shutdown proceeds.
//! Keep it below `terminationGracePeriodSeconds`.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{ApiError, Error};
use crate::request::Request;
use crate::response::IntoResponse;
use crate::router::App;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(25);

/// The HTTP server.
#[derive(Debug)]
pub struct Server {
    addr: SocketAddr,
    shutdown_timeout: Duration,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust,no_run
    /// use plinth::Server;
    /// let server = Server::bind("0.0.0.0:3000")?;
    /// # Ok::<(), plinth::Error>(())
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr: SocketAddr = addr.parse().map_err(|_| Error::Addr(addr.to_owned()))?;
        Ok(Self { addr, shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT })
    }

    /// Grace period for draining connections and background tasks.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Serves `app` until SIGTERM or Ctrl-C, then shuts down gracefully.
    pub async fn serve(self, app: impl Into<App>) -> Result<(), Error> {
        self.serve_with_shutdown(app, shutdown_signal()).await
    }

    /// Serves `app` until `signal` resolves, then shuts down gracefully.
    pub async fn serve_with_shutdown(
        self,
        app: impl Into<App>,
        signal: impl Future<Output = ()> + Send,
    ) -> Result<(), Error> {
        let app: App = app.into();
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %listener.local_addr()?, "plinth listening");

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during graceful shutdown.
        let mut tasks = tokio::task::JoinSet::new();
        let (stop_tx, stop_rx) = watch::channel(false);

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // `biased` checks shutdown first so a SIGTERM stops accepting
                // even if more connections are queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = app.clone();
                    let mut stop = stop_rx.clone();
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let app = app.clone();
                            async move { dispatch(app, req, remote_addr).await }
                        });

                        // Speaks HTTP/1.1 or HTTP/2, whatever the client negotiates.
                        let builder = ConnBuilder::new(TokioExecutor::new());
                        let conn = builder.serve_connection(io, svc);
                        tokio::pin!(conn);

                        let result = tokio::select! {
                            res = conn.as_mut() => res,
                            _ = stop.changed() => {
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };
                        if let Err(e) = result {
                            debug!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);
        let _ = stop_tx.send(true);
        let deadline = Instant::now() + self.shutdown_timeout;

        let drained = tokio::time::timeout_at(deadline, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !drained {
            warn!(remaining = tasks.len(), "grace period elapsed, aborting open connections");
            tasks.abort_all();
        }

        app.supervisor().shutdown(deadline.saturating_duration_since(Instant::now())).await;

        info!("plinth stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Buffers the body, runs the app and converts the response for hyper. All
/// failures become responses, so hyper never sees an error.
async fn dispatch(
    app: App,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(peer = %remote_addr, "failed to read request body: {e}");
            let response = ApiError::InvalidInput("unreadable request body".into()).into_response();
            return Ok(response.into_inner());
        }
    };

    let response = app.call(Request::from_parts(parts, body, remote_addr)).await;
    Ok(response.into_inner())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM (Kubernetes) or SIGINT (Ctrl-C). On Windows
/// only Ctrl-C is available. A handler that cannot be installed is logged
/// and never fires.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
