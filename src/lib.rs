//! # plinth
//!
//! Shared plumbing for HTTP services: a middleware pipeline with one
//! consolidated log record per request, rate limiting, JSON errors, auth and
//! a handful of helpers every service ends up writing.
//!
//! ## The request record
//!
//! Every request produces exactly one log record, written by
//! [`RequestLogger`](middleware::RequestLogger) after the response is known.
//! Code anywhere below it enriches that record through the request's
//! [`LogState`]:
//!
//! ```rust
//! use plinth::{ApiError, Request};
//!
//! async fn checkout(req: Request) -> Result<&'static str, ApiError> {
//!     if let Some(state) = req.context().log_state() {
//!         state.set("cart_items", 3);
//!         state.add_breadcrumb("payment authorised");
//!     }
//!     Ok("done")
//! }
//! ```
//!
//! Breadcrumbs are only written out when something went wrong (status
//! ≥ 400 or a slow request), so the happy path stays quiet.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use plinth::logging::{self, LogConfig};
//! use plinth::{ApiError, App, Json, Request, RouterConfig, Router, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     plinth::config::load_dotenv();
//!     logging::init(&LogConfig::from_env())?;
//!
//!     let api = Router::new().get("/users/{id}", get_user);
//!     let app = App::new(RouterConfig::from_env(), api);
//!
//!     Server::bind("0.0.0.0:3000")?.serve(app).await?;
//!     Ok(())
//! }
//!
//! async fn get_user(req: Request) -> Result<Json<String>, ApiError> {
//!     let id = req.param("id").unwrap_or_default();
//!     Ok(Json(format!("user {id}")))
//! }
//! ```

mod context;
mod error;
mod handler;
mod json;
mod log_state;
mod request;
mod response;
mod router;
mod server;

pub mod config;
pub mod cookies;
pub mod crypto;
pub mod health;
pub mod jwt;
pub mod logging;
pub mod middleware;
pub mod netutil;
pub mod strutil;
pub mod worker;

pub use context::{AuthenticatedUser, Context};
pub use error::{ApiError, Error, INTERNAL_ERROR_MESSAGE};
pub use handler::{BoxFuture, Handler};
pub use json::{ErrorResponse, Json};
pub use log_state::{LogSnapshot, LogState};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::{App, MatchedPath, Router, RouterConfig};
pub use server::{Server, shutdown_signal};
