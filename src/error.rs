//! Unified error types.
//!
//! Two families live here:
//!
//! - [`Error`] surfaces infrastructure failures: binding to a port,
//!   accepting a connection, parsing the listen address.
//! - [`ApiError`] is the application-facing taxonomy. Every variant maps to
//!   a fixed HTTP status and renders as the shared JSON error body
//!   `{"status", "error", "message"}`. Handlers return it directly:
//!
//! ```rust
//! use plinth::{ApiError, Json, Request};
//!
//! async fn get_user(req: Request) -> Result<Json<String>, ApiError> {
//!     let id = req.param("id").ok_or_else(|| ApiError::InvalidInput("missing id".into()))?;
//!     Err(ApiError::NotFound(format!("user {id}")))
//! }
//! ```

use http::StatusCode;
use tracing::error;

use crate::json::ErrorResponse;
use crate::response::{IntoResponse, Response};

/// Message returned to clients for every internal failure. Internals never leak.
pub const INTERNAL_ERROR_MESSAGE: &str = "An unexpected internal server error occurred";

/// The error type returned by plinth's fallible infrastructure operations.
///
/// Application-level errors (404, 422, etc.) are expressed as [`ApiError`]
/// values, not as `Error`s.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address `{0}`")]
    Addr(String),
}

/// Application error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    /// Logged server-side; the client only ever sees [`INTERNAL_ERROR_MESSAGE`].
    #[error("internal server error: {0}")]
    Internal(String),

    /// Field-level validation failures, one human-readable message per field.
    #[error("{}", .0.join(", "))]
    Validation(Vec<String>),

    /// Escape hatch for statuses outside the taxonomy (429, 405, ...).
    #[error("{message}")]
    Status { status: StatusCode, message: String },
}

impl ApiError {
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status { status, message: message.into() }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::AlreadyExists(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Status { status, .. } => *status,
        }
    }

    /// The JSON body clients receive.
    pub fn to_body(&self) -> ErrorResponse {
        let status = self.status_code();
        match self {
            Self::Validation(_) => ErrorResponse {
                status: status.as_u16(),
                error: "Validation Error".to_owned(),
                message: self.to_string(),
            },
            Self::Internal(_) => ErrorResponse::new(status, INTERNAL_ERROR_MESSAGE),
            other => ErrorResponse::new(status, other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            error!(error = %detail, "internal server error");
        }
        let status = self.status_code();
        self.to_body().into_response_with(status)
    }
}

/// Field-by-field translation: `required`, `email`, everything else is "invalid".
/// Messages are ordered by field name so the aggregate is stable.
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        let messages = fields
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match e.code.as_ref() {
                    "required" => format!("{field} is required"),
                    "email" => format!("{field} should be a valid email address"),
                    _ => format!("{field} is invalid"),
                })
            })
            .collect();

        Self::Validation(messages)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput(format!("malformed JSON body: {err}"))
    }
}
