//! Panic recovery.
//!
//! A panic anywhere below this layer becomes a generic 500 JSON response and
//! exactly one ERROR record carrying the panic message, the request id and the
//! backtrace taken at the panic site. Nothing about the panic reaches the
//! client.
//!
//! The backtrace has to be captured while the panicking frame is still on
//! the stack, which only a panic hook can do. [`catch_panic`] marks the
//! current thread while it polls the wrapped future; the hook installed here
//! records a backtrace for marked threads and defers to the previous hook
//! for everyone else.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

use futures::FutureExt;
use http::StatusCode;
use tracing::error;

use crate::error::INTERNAL_ERROR_MESSAGE;
use crate::handler::BoxFuture;
use crate::json::ErrorResponse;
use crate::middleware::{Middleware, Next};
use crate::request::Request;

#[derive(Debug, Clone, Copy)]
pub struct Recovery;

impl Recovery {
    pub fn new() -> Self {
        install_hook();
        Self
    }
}

impl Default for Recovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for Recovery {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let request_id = req.context().request_id().unwrap_or_default().to_owned();

        Box::pin(async move {
            match catch_panic(next.run(req)).await {
                Ok(response) => response,
                Err(panic) => {
                    error!(
                        error = %panic.message,
                        request_id = %request_id,
                        stack = %panic.backtrace,
                        "panic recovered"
                    );
                    ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
                        .into_response_with(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        })
    }
}

// ── Panic capture ────────────────────────────────────────────────────────────

pub(crate) struct Panic {
    pub(crate) message: String,
    pub(crate) backtrace: String,
}

thread_local! {
    static CAPTURING: Cell<u32> = const { Cell::new(0) };
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

fn install_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) > 0 {
                let trace = Backtrace::force_capture().to_string();
                LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

/// Runs `fut` to completion, turning a panic into an `Err` with the message
/// and the backtrace from the panic site.
pub(crate) async fn catch_panic<F: Future>(fut: F) -> Result<F::Output, Panic> {
    install_hook();
    match AssertUnwindSafe(Capturing { inner: Box::pin(fut) }).catch_unwind().await {
        Ok(output) => Ok(output),
        Err(payload) => Err(Panic {
            message: panic_message(&*payload),
            backtrace: LAST_BACKTRACE.with(|slot| slot.borrow_mut().take()).unwrap_or_default(),
        }),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_owned()
    }
}

/// Marks the polling thread so the hook captures a backtrace.
struct Capturing<F> {
    inner: Pin<Box<F>>,
}

struct Mark;

impl Mark {
    fn set() -> Self {
        CAPTURING.with(|c| c.set(c.get() + 1));
        Mark
    }
}

impl Drop for Mark {
    fn drop(&mut self) {
        CAPTURING.with(|c| c.set(c.get() - 1));
    }
}

impl<F: Future> Future for Capturing<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _mark = Mark::set();
        self.inner.as_mut().poll(cx)
    }
}
