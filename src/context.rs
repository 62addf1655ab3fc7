//! Per-request context carrier.
//!
//! A closed set of typed slots instead of an open map keyed by strings:
//! request id, logger handle, authenticated user and log state. Each slot
//! has one `with_*` constructor that derives a new context and one typed
//! accessor. Absent values are never an error: the logger falls back to a
//! disabled span and everything else reads as `None`.
//!
//! Contexts are cheap to clone (every slot is reference counted), so deriving
//! one leaves the original untouched:
//!
//! ```rust
//! use plinth::Context;
//!
//! let base = Context::default();
//! let derived = base.clone().with_request_id("req-1");
//! assert_eq!(base.request_id(), None);
//! assert_eq!(derived.request_id(), Some("req-1"));
//! ```

use std::sync::Arc;

use tracing::Span;

use crate::log_state::LogState;

/// Identity established by the JWT middleware for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

#[derive(Clone, Default)]
pub struct Context {
    request_id: Option<Arc<str>>,
    logger: Option<Span>,
    user: Option<Arc<AuthenticatedUser>>,
    log_state: Option<LogState>,
}

impl Context {
    pub fn with_request_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_logger(mut self, span: Span) -> Self {
        self.logger = Some(span);
        self
    }

    pub fn with_user(mut self, user: AuthenticatedUser) -> Self {
        self.user = Some(Arc::new(user));
        self
    }

    pub fn with_log_state(mut self, state: LogState) -> Self {
        self.log_state = Some(state);
        self
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// The request's logging span, or a disabled span when none was attached.
    pub fn logger(&self) -> Span {
        self.logger.clone().unwrap_or_else(Span::none)
    }

    pub fn user(&self) -> Option<&AuthenticatedUser> {
        self.user.as_deref()
    }

    pub fn log_state(&self) -> Option<&LogState> {
        self.log_state.as_ref()
    }

    /// Copy for work that outlives the request: correlation is kept, the log
    /// state is not, so nothing detached can write into the request's record.
    pub fn detached(&self) -> Self {
        Self { log_state: None, ..self.clone() }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request_id)
            .field("user", &self.user)
            .field("log_state", &self.log_state.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> AuthenticatedUser {
        AuthenticatedUser { id: "7".into(), email: "a@b.c".into(), role: "admin".into() }
    }

    #[test]
    fn empty_context_reads_as_absent() {
        let ctx = Context::default();
        assert_eq!(ctx.request_id(), None);
        assert!(ctx.user().is_none());
        assert!(ctx.log_state().is_none());
        assert!(ctx.logger().is_disabled());
    }

    #[test]
    fn derived_context_leaves_parent_untouched() {
        let parent = Context::default().with_request_id("abc");
        let child = parent.clone().with_user(user());

        assert!(parent.user().is_none());
        assert_eq!(child.user().map(|u| u.role.as_str()), Some("admin"));
        assert_eq!(child.request_id(), Some("abc"));
    }

    #[test]
    fn detached_drops_log_state_only() {
        let ctx = Context::default()
            .with_request_id("abc")
            .with_user(user())
            .with_log_state(LogState::new());

        let detached = ctx.detached();
        assert!(detached.log_state().is_none());
        assert_eq!(detached.request_id(), Some("abc"));
        assert!(detached.user().is_some());
    }
}
