//! Built-in health handlers.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Can the pod serve traffic? Failure → pulled from load-balancer. |
//! | **API health** | `/api/{version}/health` | Does a request make it through the full middleware chain? |
//!
//! [`App`](crate::App) serves all three. The probes bypass the middleware
//! chain so they are never rate limited or logged. The API health route runs
//! through it, which is the point: it exercises the same path real traffic
//! takes. Register your own `GET /health` on the API router to replace it.

use crate::{Request, Response};

/// Always `200 OK` with body `"ok"`. If the process can respond to HTTP at
/// all, it is alive.
pub async fn liveness(_req: Request) -> Response {
    Response::text("ok")
}

/// `200 OK` with body `"ready"`.
pub async fn readiness(_req: Request) -> Response {
    Response::text("ready")
}

pub async fn api_health(_req: Request) -> Response {
    Response::text("API is healthy")
}
