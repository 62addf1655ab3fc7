//! Per-request tracing span.
//!
//! Continues a W3C `traceparent` when the caller sent a valid one, otherwise
//! starts a fresh trace. The trace id lands in three places: the `http` span,
//! the request's log state (`trace_id`), and from there the request log
//! record.

use http::header::HeaderName;
use tracing::{Instrument, info_span};

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::request::Request;

pub static TRACEPARENT_HEADER: HeaderName = HeaderName::from_static("traceparent");

#[derive(Debug, Clone, Copy, Default)]
pub struct Trace;

impl Trace {
    pub fn new() -> Self {
        Self
    }
}

/// Trace id from `version-traceid-parentid-flags`, if well formed.
pub fn parse_traceparent(value: &str) -> Option<&str> {
    let mut parts = value.trim().split('-');
    let (version, trace_id, parent_id, flags) = (parts.next()?, parts.next()?, parts.next()?, parts.next()?);

    let is_hex = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    let valid = is_hex(version, 2)
        && version != "ff"
        && is_hex(trace_id, 32)
        && is_hex(parent_id, 16)
        && is_hex(flags, 2)
        && trace_id.bytes().any(|b| b != b'0')
        && parent_id.bytes().any(|b| b != b'0');
    // Version 00 has exactly four fields; later versions may append more.
    let valid = valid && (version != "00" || parts.next().is_none());
    valid.then_some(trace_id)
}

fn new_trace_id() -> String {
    format!("{:032x}", rand::random::<u128>().max(1))
}

impl Middleware for Trace {
    fn handle(&self, mut req: Request, next: Next) -> BoxFuture {
        let trace_id = req
            .header(&TRACEPARENT_HEADER)
            .and_then(parse_traceparent)
            .map(str::to_owned)
            .unwrap_or_else(new_trace_id);

        if let Some(state) = req.context().log_state() {
            state.set("trace_id", trace_id.as_str());
        }

        let span = info_span!("http", method = %req.method(), path = %req.path(), trace_id = %trace_id);
        req.extend_context(|ctx| ctx.with_logger(span.clone()));

        Box::pin(next.run(req).instrument(span))
    }
}
