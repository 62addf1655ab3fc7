//! Request-scoped, mutably accumulated log state.
//!
//! One [`LogState`] is created per request by the request-id middleware and
//! shared by reference with every middleware and handler downstream. Anything
//! may add fields or breadcrumbs; the request logger reads the state exactly
//! once after the inner chain returns and then seals it. Writes after the
//! seal are dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Clone, Default)]
pub struct LogState {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    fields: Map<String, Value>,
    breadcrumbs: Vec<String>,
    user_id: u64,
    sealed: bool,
}

/// Point-in-time copy of a [`LogState`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSnapshot {
    pub fields: Map<String, Value>,
    pub breadcrumbs: Vec<String>,
    pub user_id: u64,
}

impl LogState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts a field. Last writer wins.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let mut inner = self.inner.lock();
        if inner.sealed {
            debug!(%key, "log state already flushed, dropping field");
            return;
        }
        inner.fields.insert(key, value.into());
    }

    /// Appends a milestone. Only surfaced for failed or slow requests.
    pub fn add_breadcrumb(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        if inner.sealed {
            debug!("log state already flushed, dropping breadcrumb");
            return;
        }
        inner.breadcrumbs.push(message.into());
    }

    pub fn set_user(&self, id: u64) {
        let mut inner = self.inner.lock();
        if inner.sealed {
            debug!(user_id = id, "log state already flushed, dropping user");
            return;
        }
        inner.user_id = id;
    }

    pub fn snapshot(&self) -> LogSnapshot {
        let inner = self.inner.lock();
        LogSnapshot {
            fields: inner.fields.clone(),
            breadcrumbs: inner.breadcrumbs.clone(),
            user_id: inner.user_id,
        }
    }

    /// Drops every later write.
    pub fn seal(&self) {
        self.inner.lock().sealed = true;
    }

    /// Takes the final snapshot and seals the state in one critical section.
    pub fn finish(&self) -> LogSnapshot {
        let mut inner = self.inner.lock();
        inner.sealed = true;
        LogSnapshot {
            fields: std::mem::take(&mut inner.fields),
            breadcrumbs: std::mem::take(&mut inner.breadcrumbs),
            user_id: inner.user_id,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.lock().sealed
    }
}
