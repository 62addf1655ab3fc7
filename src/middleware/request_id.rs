//! Request-id assignment: the outermost layer.
//!
//! Every request gets an id, a `request` span carrying it, and a fresh
//! [`LogState`]. All three live in the request [`Context`](crate::Context) so
//! later layers can correlate without re-deriving anything.

use http::header::{HeaderName, HeaderValue};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::handler::BoxFuture;
use crate::log_state::LogState;
use crate::middleware::{Middleware, Next};
use crate::request::Request;

pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestId;

impl RequestId {
    pub fn new() -> Self {
        Self
    }
}

/// Inbound ids are reused only when short and printable; anything else is
/// replaced so log lines stay well-formed.
fn inbound_id(req: &Request) -> Option<String> {
    let id = req.header(&REQUEST_ID_HEADER)?;
    let well_formed = !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LEN
        && id.bytes().all(|b| b.is_ascii_graphic());
    well_formed.then(|| id.to_owned())
}

impl Middleware for RequestId {
    fn handle(&self, mut req: Request, next: Next) -> BoxFuture {
        let id = inbound_id(&req).unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = info_span!("request", request_id = %id);

        req.extend_context(|ctx| {
            ctx.with_request_id(id.as_str())
                .with_logger(span.clone())
                .with_log_state(LogState::new())
        });

        Box::pin(async move {
            let mut response = next.run(req).instrument(span).await;
            if let Ok(value) = HeaderValue::from_str(&id) {
                response.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
            }
            response
        })
    }
}
