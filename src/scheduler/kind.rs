//! # Supervision kinds and job status.

use std::fmt;

/// How the scheduler reacts when a job faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum JobKind {
    /// Fault is logged and contained; siblings and host are unaffected.
    #[default]
    Background,
    /// Fault is logged and escalated to the host's shutdown path.
    Critical,
}

impl JobKind {
    /// Short stable label for logs.
    pub fn as_label(self) -> &'static str {
        match self {
            JobKind::Background => "background",
            JobKind::Critical => "critical",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Lifecycle state of a supervised job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Still executing (or abandoned and still executing).
    Running,
    /// Returned `Ok(())`.
    Completed,
    /// Returned an error or panicked.
    Faulted,
    /// Returned `JobError::Canceled`.
    Canceled,
}

impl JobStatus {
    /// True for every state except [`JobStatus::Running`].
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Unique id of a spawned job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}
