//! # Job abstraction and function-backed job implementation.
//!
//! This module defines the [`Job`] trait (async, cancelable) and a convenient
//! function-backed implementation [`JobFn`]. The common handle type is
//! [`JobRef`], an `Arc<dyn Job>` suitable for sharing across the runtime.
//!
//! A job receives a [`CancellationToken`] and should check it to stop
//! cooperatively during shutdown. Jobs that never look at it are tolerated:
//! the scheduler stops waiting for them after the shutdown grace period.
//!
//! [`JobFn`] produces a **fresh** future per spawn, so the same `JobRef` can be
//! spawned again by a module that wants to restart a crashed job.

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::JobError;

/// Boxed future returned by [`Job::spawn`].
pub type BoxJobFuture = Pin<Box<dyn Future<Output = Result<(), JobError>> + Send + 'static>>;

/// Shared handle to a job.
pub type JobRef = Arc<dyn Job>;

/// # Asynchronous, cancelable unit of supervised work.
///
/// # Example
/// ```
/// use tokio_util::sync::CancellationToken;
/// use modvisor::{BoxJobFuture, Job, JobError};
///
/// struct Heartbeat;
///
/// impl Job for Heartbeat {
///     fn name(&self) -> &str { "heartbeat" }
///
///     fn spawn(&self, ctx: CancellationToken) -> BoxJobFuture {
///         Box::pin(async move {
///             ctx.cancelled().await;
///             Err(JobError::Canceled)
///         })
///     }
/// }
/// ```
pub trait Job: Send + Sync + 'static {
    /// Returns a stable, human-readable job name.
    fn name(&self) -> &str;

    /// Creates a new future running the job until completion or cancellation.
    fn spawn(&self, ctx: CancellationToken) -> BoxJobFuture;
}

/// Function-backed job, the form [`Scheduler::run_async`](crate::Scheduler::run_async) builds.
///
/// The closure is `Fn`, not `FnOnce`: the scheduler never restarts a job on
/// its own, so a module that wants a faulted job back passes the same
/// [`JobRef`] to [`Scheduler::spawn`](crate::Scheduler::spawn) again. Each
/// spawn calls the closure for a fresh future and hands it a new child token
/// of the module's scope, so cancelling one run never leaks into the next.
#[derive(Debug)]
pub struct JobFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> JobFn<F> {
    /// Creates a new function-backed job.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the job and returns it as a shared handle.
    ///
    /// ## Example
    /// ```rust
    /// use tokio_util::sync::CancellationToken;
    /// use modvisor::{Job, JobError, JobFn, JobRef};
    ///
    /// let j: JobRef = JobFn::arc("hello", |_ctx: CancellationToken| async {
    ///     Ok::<_, JobError>(())
    /// });
    /// assert_eq!(j.name(), "hello");
    /// ```
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F, Fut> Job for JobFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, ctx: CancellationToken) -> BoxJobFuture {
        Box::pin((self.f)(ctx))
    }
}
