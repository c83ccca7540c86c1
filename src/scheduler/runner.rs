//! # Run one supervised job inside its fault boundary.
//!
//! ## Flow
//! ```text
//! Success:
//!   job.spawn() → Ok(())           → JobCompleted
//!
//! Cancellation:
//!   job.spawn() → Err(Canceled)    → JobCanceled (graceful exit)
//!
//! Failure:
//!   job.spawn() → Err(Fail)        → warn! + JobFaulted
//!   job.spawn() → panic            → Err(Panicked) → warn! + JobFaulted
//!     └─ kind == Critical          → error! + CriticalFailure on the escalation channel
//!                                    + CriticalEscalated
//! ```
//!
//! ## Rules
//! - Always publishes **exactly one** terminal event.
//! - The terminal status is stored before the job leaves the registry, so
//!   anyone waiting on the status never misses it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::job::JobRef;
use super::kind::{JobKind, JobStatus};
use crate::bus::Bus;
use crate::error::JobError;
use crate::events::{EventKind, SupervisionEvent};
use crate::fault::panic_message;

/// A critical job fault reported to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CriticalFailure {
    /// Name of the job.
    pub job: String,
    /// Failure message.
    pub error: String,
}

/// Everything the runner needs besides the job itself.
pub(super) struct RunContext {
    pub name: Arc<str>,
    pub kind: JobKind,
    pub token: CancellationToken,
    pub bus: Bus,
    pub status: watch::Sender<JobStatus>,
    pub escalation: mpsc::UnboundedSender<CriticalFailure>,
}

/// Executes `job` to completion and records its terminal status.
pub(super) async fn run_supervised(job: JobRef, cx: RunContext) -> JobStatus {
    let token = cx.token.clone();
    let attempt = AssertUnwindSafe(async move { job.spawn(token).await });
    let res = match attempt.catch_unwind().await {
        Ok(res) => res,
        Err(payload) => Err(JobError::Panicked {
            info: panic_message(payload.as_ref()),
        }),
    };

    let status = match res {
        Ok(()) => {
            tracing::debug!(job = %cx.name, kind = %cx.kind, "job completed");
            publish(&cx, EventKind::JobCompleted, None);
            JobStatus::Completed
        }
        Err(JobError::Canceled) => {
            tracing::debug!(job = %cx.name, kind = %cx.kind, "job canceled");
            publish(&cx, EventKind::JobCanceled, None);
            JobStatus::Canceled
        }
        Err(e) => {
            report_fault(&cx, &e);
            JobStatus::Faulted
        }
    };

    cx.status.send_replace(status);
    status
}

fn report_fault(cx: &RunContext, err: &JobError) {
    let error = err.to_string();
    tracing::warn!(
        job = %cx.name,
        kind = %cx.kind,
        label = err.as_label(),
        error = %error,
        "job faulted"
    );
    publish(cx, EventKind::JobFaulted, Some(&error));

    if cx.kind == JobKind::Critical {
        tracing::error!(job = %cx.name, error = %error, "critical job failed; escalating to host");
        let failure = CriticalFailure {
            job: cx.name.to_string(),
            error: error.clone(),
        };
        if cx.escalation.send(failure).is_err() {
            tracing::warn!(job = %cx.name, "no host listening for critical failures");
        }
        publish(cx, EventKind::CriticalEscalated, Some(&error));
    }
}

fn publish(cx: &RunContext, kind: EventKind, reason: Option<&str>) {
    let mut ev = SupervisionEvent::new(kind).with_subject(Arc::clone(&cx.name));
    if let Some(reason) = reason {
        ev = ev.with_reason(reason);
    }
    cx.bus.publish(ev);
}
