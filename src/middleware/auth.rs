//! JWT authentication and role checks.
//!
//! [`JwtAuth`] establishes who is calling; [`AuthorizeRole`] decides whether
//! they may. Register them as route layers, authentication first:
//!
//! ```rust
//! use plinth::middleware::{AuthorizeRole, JwtAuth};
//! use plinth::{Request, Router};
//!
//! # async fn purge(_: Request) -> &'static str { "purged" }
//! let admin = Router::new()
//!     .route_layer(JwtAuth::new("secret"))
//!     .route_layer(AuthorizeRole::new(["admin"]))
//!     .delete("/cache", purge);
//! ```

use std::sync::Arc;

use http::header;
use tracing::debug;

use crate::context::AuthenticatedUser;
use crate::cookies::JWT_COOKIE_NAME;
use crate::error::ApiError;
use crate::handler::BoxFuture;
use crate::jwt;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::IntoResponse;

fn reject(err: ApiError) -> BoxFuture {
    let response = err.into_response();
    Box::pin(async move { response })
}

/// Session cookie first, then `Authorization: Bearer`.
fn token(req: &Request) -> Option<&str> {
    req.cookie(JWT_COOKIE_NAME).filter(|t| !t.is_empty()).or_else(|| {
        req.header(header::AUTHORIZATION)?
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
    })
}

#[derive(Debug, Clone)]
pub struct JwtAuth {
    secret: Arc<str>,
}

impl JwtAuth {
    pub fn new(secret: impl Into<Arc<str>>) -> Self {
        Self { secret: secret.into() }
    }
}

impl Middleware for JwtAuth {
    fn handle(&self, mut req: Request, next: Next) -> BoxFuture {
        let Some(token) = token(&req) else {
            debug!(path = %req.path(), "request without jwt");
            return reject(ApiError::Unauthorized("missing jwt cookie".into()));
        };

        let claims = match jwt::parse_token(token, &self.secret) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(path = %req.path(), error = %e, "jwt rejected");
                return reject(ApiError::Unauthorized(format!("invalid or expired token: {e}")));
            }
        };

        if let Some(state) = req.context().log_state() {
            state.set_user(claims.user_id);
        }
        let user = AuthenticatedUser { id: claims.user_id.to_string(), email: String::new(), role: claims.role };
        req.extend_context(|ctx| ctx.with_user(user));

        Box::pin(next.run(req))
    }
}

/// Admits only users whose role is in the allowed set.
#[derive(Debug, Clone)]
pub struct AuthorizeRole {
    roles: Arc<[String]>,
}

impl AuthorizeRole {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { roles: roles.into_iter().map(Into::into).collect() }
    }
}

impl Middleware for AuthorizeRole {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let Some(user) = req.context().user() else {
            return reject(ApiError::Unauthorized("user not found in context".into()));
        };
        if !self.roles.iter().any(|r| *r == user.role) {
            debug!(user_id = %user.id, role = %user.role, "role not permitted");
            return reject(ApiError::Forbidden("insufficient permissions".into()));
        }
        Box::pin(next.run(req))
    }
}
