//! # Scheduler: spawns supervised jobs and drains them at shutdown.
//!
//! ## Architecture
//! ```text
//! run_async(name, kind, scope, work) / spawn(job, kind, scope)
//!   ├─► token = scope.child_token()
//!   ├─► registry.insert(id → {name, kind, token, status})
//!   ├─► publish JobStarted
//!   └─► tokio::spawn(run_supervised(job, ..)) ──► terminal status ──► registry.remove(id)
//!
//! shutdown(grace)
//!   ├─► cancel every registered token
//!   ├─► wait for all statuses to turn terminal, at most `grace`
//!   └─► still running? ─► warn!("abandoned job") + JobAbandoned, return their names
//! ```
//!
//! ## Rules
//! - Spawning never blocks the caller.
//! - Cancellation is cooperative: an abandoned job keeps running detached.
//! - No restart: a faulted job stays faulted until its owner spawns it again.
//! - The registry lock is held only to insert, remove or copy entries.

use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::handle::JobHandle;
use super::job::{JobFn, JobRef};
use super::kind::{JobId, JobKind, JobStatus};
use super::runner::{CriticalFailure, RunContext, run_supervised};
use crate::bus::Bus;
use crate::error::JobError;
use crate::events::{EventKind, SupervisionEvent};

/// Registry entry of a running job.
struct Entry {
    name: Arc<str>,
    token: CancellationToken,
    status: watch::Receiver<JobStatus>,
}

struct Inner {
    bus: Bus,
    jobs: Mutex<HashMap<JobId, Entry>>,
    next_id: AtomicU64,
    escalation_tx: mpsc::UnboundedSender<CriticalFailure>,
    escalation_rx: Mutex<Option<mpsc::UnboundedReceiver<CriticalFailure>>>,
}

/// Runs named jobs with fault and cancellation isolation.
///
/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Creates a scheduler publishing lifecycle events on `bus`.
    pub fn new(bus: Bus) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                bus,
                jobs: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                escalation_tx: tx,
                escalation_rx: Mutex::new(Some(rx)),
            }),
        }
    }

    /// Launches `work` as a supervised job and returns immediately.
    ///
    /// `work` receives a token derived from `scope`. Errors and panics are
    /// contained; for [`JobKind::Critical`] they are also escalated.
    ///
    /// # Panics
    /// Must be called from within a tokio runtime.
    ///
    /// ## Example
    /// ```rust
    /// use tokio_util::sync::CancellationToken;
    /// use modvisor::{Bus, JobError, JobKind, JobStatus, Scheduler};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let scheduler = Scheduler::new(Bus::new());
    /// let scope = CancellationToken::new();
    ///
    /// let handle = scheduler.run_async("hello", JobKind::Background, &scope, |_ctx| async {
    ///     Ok::<_, JobError>(())
    /// });
    /// assert_eq!(handle.wait().await, JobStatus::Completed);
    /// # }
    /// ```
    pub fn run_async<F, Fut>(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: JobKind,
        scope: &CancellationToken,
        work: F,
    ) -> JobHandle
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        self.spawn(JobFn::arc(name, work), kind, scope)
    }

    /// Launches an existing [`JobRef`]; spawning the same job again restarts it.
    ///
    /// # Panics
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, job: JobRef, kind: JobKind, scope: &CancellationToken) -> JobHandle {
        let id = JobId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let name: Arc<str> = Arc::from(job.name());
        let token = scope.child_token();
        let (status_tx, status_rx) = watch::channel(JobStatus::Running);

        self.jobs().insert(
            id,
            Entry {
                name: Arc::clone(&name),
                token: token.clone(),
                status: status_rx.clone(),
            },
        );

        tracing::debug!(job = %name, %kind, %id, "job started");
        self.inner.bus.publish(
            SupervisionEvent::new(EventKind::JobStarted)
                .with_subject(Arc::clone(&name))
                .with_reason(kind.as_label()),
        );

        let cx = RunContext {
            name: Arc::clone(&name),
            kind,
            token: token.clone(),
            bus: self.inner.bus.clone(),
            status: status_tx,
            escalation: self.inner.escalation_tx.clone(),
        };
        let me = self.clone();
        tokio::spawn(async move {
            run_supervised(job, cx).await;
            me.jobs().remove(&id);
        });

        JobHandle {
            id,
            name,
            kind,
            token,
            status: status_rx,
        }
    }

    /// Takes the receiver of critical failures. Returns `None` after the first call.
    pub fn escalations(&self) -> Option<mpsc::UnboundedReceiver<CriticalFailure>> {
        self.inner
            .escalation_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Sorted names of jobs that have not finished yet.
    pub fn active(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .jobs()
            .values()
            .filter(|e| !e.status.borrow().is_terminal())
            .map(|e| e.name.to_string())
            .collect();
        names.sort_unstable();
        names
    }

    /// Cancels every job and waits up to `grace` for them to stop.
    ///
    /// Returns the sorted names of jobs still running afterwards ("abandoned").
    /// Never waits longer than `grace`; abandoned jobs are left running.
    pub async fn shutdown(&self, grace: Duration) -> Vec<String> {
        let pending: Vec<(Arc<str>, watch::Receiver<JobStatus>)> = {
            let jobs = self.jobs();
            jobs.values()
                .map(|e| {
                    e.token.cancel();
                    (Arc::clone(&e.name), e.status.clone())
                })
                .collect()
        };
        if pending.is_empty() {
            return Vec::new();
        }
        tracing::debug!(jobs = pending.len(), ?grace, "draining jobs");

        let all_done = futures::future::join_all(pending.iter().map(|(_, rx)| {
            let mut rx = rx.clone();
            async move {
                let _ = rx.wait_for(|s| s.is_terminal()).await;
            }
        }));
        let _ = tokio::time::timeout(grace, all_done).await;

        let mut abandoned: Vec<String> = pending
            .iter()
            .filter(|(_, rx)| !rx.borrow().is_terminal())
            .map(|(name, _)| name.to_string())
            .collect();
        abandoned.sort_unstable();

        for name in &abandoned {
            tracing::warn!(job = %name, ?grace, "abandoned job: still running after shutdown grace period");
            self.inner.bus.publish(
                SupervisionEvent::new(EventKind::JobAbandoned).with_subject(name.as_str()),
            );
        }
        abandoned
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, Entry>> {
        self.inner.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.jobs().len())
            .finish()
    }
}
