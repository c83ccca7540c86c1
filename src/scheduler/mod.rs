//! Supervised execution of long-lived background jobs.
//!
//! Internal modules:
//! - [`job`]: the [`Job`] trait and the closure-backed [`JobFn`];
//! - [`kind`]: supervision kinds and job status;
//! - [`runner`]: the fault boundary around one job execution;
//! - [`handle`]: [`JobHandle`] returned to the spawner;
//! - [`scheduler`]: registry, spawning and bounded shutdown.

mod handle;
mod job;
mod kind;
mod runner;
#[allow(clippy::module_inception)]
mod scheduler;

pub use handle::JobHandle;
pub use job::{BoxJobFuture, Job, JobFn, JobRef};
pub use kind::{JobId, JobKind, JobStatus};
pub use runner::CriticalFailure;
pub use scheduler::Scheduler;
