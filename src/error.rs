//! Error types used by the modvisor kernel, its handlers, jobs and modules.
//!
//! - [`RuntimeError`] errors raised by the host itself.
//! - [`JobError`] outcome of a supervised job that did not complete normally.
//! - [`HandlerError`] fault returned by a bus handler.
//! - [`ModuleError`] failure of a module's start routine.
//! - [`StateError`] typed state store violations.
//! - [`QueryError`] a query that never got its response.
//!
//! Every enum exposes `as_label` with a short stable label for logs.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the module host.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    /// A module failed to start and the host is configured to abort on that.
    #[error("module '{module}' failed to start: {error}")]
    ModuleStart {
        /// Name of the module.
        module: String,
        /// Failure message.
        error: String,
    },

    /// A critical job faulted and the host shut down because of it.
    #[error("critical job '{job}' failed: {error}")]
    CriticalJobFailed {
        /// Name of the job.
        job: String,
        /// Failure message.
        error: String,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use modvisor::RuntimeError;
    ///
    /// let err = RuntimeError::CriticalJobFailed { job: "window".into(), error: "boom".into() };
    /// assert_eq!(err.as_label(), "runtime_critical_job_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::ModuleStart { .. } => "runtime_module_start",
            RuntimeError::CriticalJobFailed { .. } => "runtime_critical_job_failed",
        }
    }
}

/// # Errors produced by job execution.
///
/// `Canceled` is the graceful answer to a cancelled token and is not a fault.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// Job failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Job panicked; filled in by the scheduler's fault boundary.
    #[error("panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// Job stopped because its cancellation token fired.
    #[error("context cancelled")]
    Canceled,
}

impl JobError {
    /// Shorthand for [`JobError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        JobError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use modvisor::JobError;
    ///
    /// assert_eq!(JobError::fail("boom").as_label(), "job_failed");
    /// assert_eq!(JobError::Canceled.as_label(), "job_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            JobError::Fail { .. } => "job_failed",
            JobError::Panicked { .. } => "job_panicked",
            JobError::Canceled => "job_canceled",
        }
    }

    /// True for every variant except [`JobError::Canceled`].
    pub fn is_fault(&self) -> bool {
        !matches!(self, JobError::Canceled)
    }
}

/// # Fault returned by a bus handler.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum HandlerError {
    /// Handler could not process the message.
    #[error("handler failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        HandlerError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::Fail { .. } => "handler_failed",
        }
    }
}

/// # Failure of a module's start routine.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ModuleError {
    /// Start routine failed.
    #[error("start failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },
}

impl ModuleError {
    /// Shorthand for [`ModuleError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        ModuleError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ModuleError::Fail { .. } => "module_start_failed",
        }
    }
}

/// # Typed state store violations.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// A value exists under `key` but with a different type than requested.
    #[error("state key '{key}' holds {found}, not {expected}")]
    TypeMismatch {
        /// Offending key.
        key: String,
        /// Type the caller asked for.
        expected: &'static str,
        /// Type currently stored.
        found: &'static str,
    },
}

impl StateError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            StateError::TypeMismatch { .. } => "state_type_mismatch",
        }
    }
}

impl From<StateError> for HandlerError {
    fn from(err: StateError) -> Self {
        HandlerError::fail(err.to_string())
    }
}

impl From<StateError> for JobError {
    fn from(err: StateError) -> Self {
        JobError::fail(err.to_string())
    }
}

/// # Outcome of a query that did not resolve with a response.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The caller's cancellation token fired first.
    #[error("query cancelled")]
    Canceled,

    /// The caller-provided deadline elapsed first.
    #[error("query timed out after {timeout:?}")]
    TimedOut {
        /// The deadline that elapsed.
        timeout: Duration,
    },
}

impl QueryError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use modvisor::QueryError;
    ///
    /// assert_eq!(QueryError::Canceled.as_label(), "query_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            QueryError::Canceled => "query_canceled",
            QueryError::TimedOut { .. } => "query_timed_out",
        }
    }
}
