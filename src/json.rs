//! JSON response helpers.

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::response::{IntoResponse, Response};

/// Standard error body shared by every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status code.
    pub status: u16,
    /// Short summary, normally the status reason phrase.
    pub error: String,
    /// Human-readable detail.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Unknown Status").to_owned(),
            message: message.into(),
        }
    }

    /// Serialises the body under `status`.
    pub fn into_response_with(self, status: StatusCode) -> Response {
        match serde_json::to_vec(&self) {
            Ok(bytes) => Response::builder().status(status).json(bytes),
            // Three plain fields cannot fail to serialise; keep the status regardless.
            Err(_) => Response::status(status),
        }
    }
}

/// Serialises `T` as the response body with `200 OK`.
///
/// ```rust
/// use plinth::{Json, Request};
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct User { id: u64 }
///
/// async fn get_user(_req: Request) -> Json<User> {
///     Json(User { id: 1 })
/// }
/// ```
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(bytes) => Response::json(bytes),
            Err(e) => ApiError::Internal(format!("response serialisation failed: {e}")).into_response(),
        }
    }
}

/// `Json` with a non-200 status, e.g. `(StatusCode::CREATED, Json(user))`.
impl<T: Serialize> IntoResponse for (StatusCode, Json<T>) {
    fn into_response(self) -> Response {
        let mut response = self.1.into_response();
        if response.status_code().is_success() {
            response.set_status(self.0);
        }
        response
    }
}
