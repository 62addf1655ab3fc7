//! Supervised background tasks.
//!
//! Fire-and-forget work started from a handler (sending an email, warming a
//! cache) runs through a [`Supervisor`]: concurrency is bounded, panics are
//! recovered and logged, and the server can wait for stragglers on shutdown.
//!
//! A task never sees the request's [`LogState`](crate::LogState). It gets a
//! detached copy of the context with the request id and logger kept, because
//! it may still be running after the request record has been written.
//!
//! ```rust,no_run
//! use plinth::worker::{Supervisor, TaskResult};
//! use plinth::{Context, Request, Response};
//!
//! async fn send_welcome_email(ctx: Context) -> TaskResult {
//!     tracing::info!(request_id = ctx.request_id(), "sending welcome email");
//!     Ok(())
//! }
//!
//! async fn signup(req: Request, tasks: Supervisor) -> Response {
//!     let _ = tasks.spawn(req.context(), "welcome-email", send_welcome_email);
//!     Response::text("created")
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, error, info, warn};

use crate::context::Context;
use crate::middleware::recovery::catch_panic;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What a task returns. Errors are logged, never propagated.
pub type TaskResult = Result<(), BoxError>;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task {name} failed: {source}")]
    Failed {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("task {name} panicked: {message}")]
    Panicked { name: String, message: String },

    #[error("task {0} rejected: supervisor is shutting down")]
    ShuttingDown(String),
}

struct Inner {
    permits: Arc<Semaphore>,
    in_flight: AtomicUsize,
    idle: Notify,
    closed: AtomicBool,
}

/// Handle to a pool of background tasks. Clones share the pool.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("in_flight", &self.in_flight())
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl Supervisor {
    /// At most `max_concurrent` tasks run at once; the rest queue. Zero is
    /// treated as one.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Spawned tasks that have not finished yet, queued ones included.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Spawns `task` on the current tokio runtime with a detached copy of
    /// `ctx`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn<F, Fut>(&self, ctx: &Context, name: impl Into<String>, task: F) -> Result<JoinHandle<()>, TaskError>
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let name = name.into();

        // Count the task before checking `closed`. Paired with the store then
        // load in `shutdown`, either the task is rejected here or shutdown
        // sees it in flight and waits.
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight(Arc::clone(&self.inner));
        if self.inner.closed.load(Ordering::SeqCst) {
            drop(guard);
            warn!(task = %name, "supervisor is shutting down, task rejected");
            return Err(TaskError::ShuttingDown(name));
        }
        let permits = Arc::clone(&self.inner.permits);
        let ctx = ctx.detached();
        let span = ctx.logger();

        Ok(tokio::spawn(
            async move {
                let _guard = guard;
                let Ok(_permit) = permits.acquire_owned().await else { return };
                let _ = execute(&name, async move { task(ctx).await }).await;
            }
            .instrument(span),
        ))
    }

    /// Resolves once no task is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stops accepting tasks and waits up to `grace` for running ones.
    /// Returns whether everything finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.closed.store(true, Ordering::SeqCst);
        let drained = tokio::time::timeout(grace, self.wait_idle()).await.is_ok();
        if !drained {
            warn!(in_flight = self.in_flight(), "background tasks still running after grace period");
        }
        drained
    }
}

struct InFlight(Arc<Inner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Runs `task` inline with the same logging and panic recovery as
/// [`Supervisor::spawn`]. For one-off jobs such as migrations.
pub async fn run_sync<F, Fut>(ctx: &Context, name: &str, task: F) -> Result<(), TaskError>
where
    F: FnOnce(Context) -> Fut,
    Fut: Future<Output = TaskResult>,
{
    let ctx = ctx.detached();
    let span = ctx.logger();
    execute(name, async move { task(ctx).await }).instrument(span).await
}

async fn execute<Fut>(name: &str, task: Fut) -> Result<(), TaskError>
where
    Fut: Future<Output = TaskResult>,
{
    let start = Instant::now();
    info!(task = name, "task started");

    let outcome = catch_panic(task).await;
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match outcome {
        Ok(Ok(())) => {
            info!(task = name, duration_ms, "task completed");
            Ok(())
        }
        Ok(Err(source)) => {
            error!(task = name, error = %source, duration_ms, "task failed");
            Err(TaskError::Failed { name: name.to_owned(), source })
        }
        Err(panic) => {
            error!(task = name, error = %panic.message, duration_ms, stack = %panic.backtrace, "task panic recovered");
            Err(TaskError::Panicked { name: name.to_owned(), message: panic.message })
        }
    }
}
