//! # Handle to a spawned job.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::kind::{JobId, JobKind, JobStatus};

/// Observes and cancels one supervised job.
///
/// Dropping the handle does not affect the job.
#[derive(Clone, Debug)]
pub struct JobHandle {
    pub(super) id: JobId,
    pub(super) name: Arc<str>,
    pub(super) kind: JobKind,
    pub(super) token: CancellationToken,
    pub(super) status: watch::Receiver<JobStatus>,
}

impl JobHandle {
    /// Unique id.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Name given at spawn time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Supervision kind.
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Current status.
    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    /// True once the job returned or panicked.
    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Signals the job's cancellation token. Cooperative only.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits until the job reaches a terminal status.
    pub async fn wait(&self) -> JobStatus {
        let mut rx = self.status.clone();
        let res = rx.wait_for(|s| s.is_terminal()).await.map(|s| *s);
        res.unwrap_or_else(|_| *rx.borrow())
    }
}
