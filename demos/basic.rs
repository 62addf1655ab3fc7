//! Small user API behind the full middleware chain.
//!
//! Run with:
//!   APP_ENV=development JWT_SECRET=dev-secret cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/api/v1/health
//!   curl -X POST http://localhost:3000/api/v1/login -d '{"email":"ada@example.com"}' -i
//!   curl http://localhost:3000/api/v1/users/42 --cookie 'jwt_token=<token from login>'
//!   curl http://localhost:3000/metrics

use std::sync::Arc;

use plinth::cookies::{self, CookieOptions};
use plinth::logging::{self, LogConfig};
use plinth::middleware::{AuthorizeRole, JwtAuth};
use plinth::worker::TaskResult;
use plinth::{ApiError, App, Context, Json, Request, Response, Router, RouterConfig, Server, config, jwt};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
struct Login {
    #[validate(email)]
    email: String,
}

#[derive(Debug, Serialize)]
struct User {
    id: u64,
    role: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    config::load_dotenv();
    logging::init(&LogConfig::from_env())?;

    let secret: Arc<str> = config::string_or("JWT_SECRET", "dev-secret").into();
    let tasks = plinth::worker::Supervisor::new(8);

    let login_secret = Arc::clone(&secret);
    let login_tasks = tasks.clone();
    let api = Router::new()
        .post("/login", move |req| login(req, Arc::clone(&login_secret), login_tasks.clone()))
        .route_layer(JwtAuth::new(Arc::clone(&secret)))
        .get("/users/{id}", get_user)
        .route_layer(AuthorizeRole::new(["admin"]))
        .delete("/users/{id}", delete_user);

    let app = App::new(RouterConfig::from_env(), api).with_supervisor(tasks);
    Server::bind("0.0.0.0:3000")?.serve(app).await?;
    Ok(())
}

async fn login(req: Request, secret: Arc<str>, tasks: plinth::worker::Supervisor) -> Result<Response, ApiError> {
    let input: Login = req.json_validated()?;
    let token = jwt::create_token(1, "admin", &secret).map_err(|e| ApiError::Internal(e.to_string()))?;

    if let Some(state) = req.context().log_state() {
        state.add_breadcrumb(format!("issued token for {}", input.email));
    }
    let _ = tasks.spawn(req.context(), "record-login", record_login);

    let mut response = Response::text("signed in");
    cookies::set_auth_cookies(&mut response, &token, &CookieOptions::default());
    Ok(response)
}

async fn record_login(ctx: Context) -> TaskResult {
    tracing::info!(request_id = ctx.request_id(), "login recorded");
    Ok(())
}

async fn get_user(req: Request) -> Result<Json<User>, ApiError> {
    let id: u64 = req
        .param("id")
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| ApiError::InvalidInput("id must be a number".into()))?;
    let role = req.context().user().map(|u| u.role.clone()).unwrap_or_default();
    Ok(Json(User { id, role }))
}

async fn delete_user(_req: Request) -> http::StatusCode {
    http::StatusCode::NO_CONTENT
}
