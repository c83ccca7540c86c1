//! # Kernel lifecycle events published on the bus.
//!
//! The [`EventKind`] enum classifies what happened:
//! - **Dispatch events**: a bus handler faulted or overflowed its queue
//! - **Job events**: supervised job lifecycle (started, completed, faulted, ...)
//! - **Module events**: module start/stop outcomes
//! - **Shutdown events**: host shutdown progress
//!
//! A [`SupervisionEvent`] is an ordinary message: modules observe it with
//! `bus.subscribe::<SupervisionEvent>(..)` like any other shape.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use modvisor::{EventKind, SupervisionEvent};
//!
//! let ev = SupervisionEvent::new(EventKind::JobFaulted)
//!     .with_subject("tick-producer")
//!     .with_reason("boom");
//!
//! assert_eq!(ev.kind, EventKind::JobFaulted);
//! assert_eq!(ev.subject.as_deref(), Some("tick-producer"));
//! assert_eq!(ev.reason.as_deref(), Some("boom"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of kernel events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Dispatch events ===
    /// A handler returned an error or panicked.
    ///
    /// Sets:
    /// - `subject`: handler name
    /// - `reason`: message type and fault
    HandlerFaulted,

    /// A queued handler dropped a message because its queue was full.
    ///
    /// Sets:
    /// - `subject`: handler name
    /// - `reason`: message type
    HandlerOverflow,

    // === Job events ===
    /// Job was spawned.
    ///
    /// Sets:
    /// - `subject`: job name
    /// - `reason`: job kind
    JobStarted,

    /// Job returned `Ok(())`.
    JobCompleted,

    /// Job returned `Err(Canceled)` after its token fired.
    JobCanceled,

    /// Job returned an error or panicked.
    ///
    /// Sets:
    /// - `subject`: job name
    /// - `reason`: error message
    JobFaulted,

    /// A critical job faulted and the failure was escalated to the host.
    CriticalEscalated,

    /// Job did not stop within the shutdown grace period.
    JobAbandoned,

    // === Module events ===
    /// Module start routine returned successfully.
    ModuleStarted,

    /// Module start routine failed (error or panic).
    ///
    /// Sets:
    /// - `subject`: module name
    /// - `reason`: error message
    ModuleFailed,

    /// Module was stopped and dropped.
    ModuleStopped,

    /// Module stop routine did not finish within the grace period.
    ModuleAbandoned,

    // === Shutdown events ===
    /// Host shutdown began.
    ShutdownRequested,

    /// Every job and module stopped within the grace period.
    AllStoppedWithin,

    /// At least one job or module outlived the grace period.
    GraceExceeded,
}

impl EventKind {
    /// Short stable label (kebab-case) for log lines.
    pub fn as_label(self) -> &'static str {
        match self {
            EventKind::HandlerFaulted => "handler-faulted",
            EventKind::HandlerOverflow => "handler-overflow",
            EventKind::JobStarted => "job-started",
            EventKind::JobCompleted => "job-completed",
            EventKind::JobCanceled => "job-canceled",
            EventKind::JobFaulted => "job-faulted",
            EventKind::CriticalEscalated => "critical-escalated",
            EventKind::JobAbandoned => "job-abandoned",
            EventKind::ModuleStarted => "module-started",
            EventKind::ModuleFailed => "module-failed",
            EventKind::ModuleStopped => "module-stopped",
            EventKind::ModuleAbandoned => "module-abandoned",
            EventKind::ShutdownRequested => "shutdown-requested",
            EventKind::AllStoppedWithin => "all-stopped-within-grace",
            EventKind::GraceExceeded => "grace-exceeded",
        }
    }
}

/// Kernel event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - `subject`: name of the job, handler or module concerned
/// - `reason`: human-readable detail
#[derive(Debug, Clone)]
pub struct SupervisionEvent {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Job, handler or module name, if applicable.
    pub subject: Option<Arc<str>>,
    /// Human-readable detail (errors, kinds, message types).
    pub reason: Option<Arc<str>>,
}

impl SupervisionEvent {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            subject: None,
            reason: None,
        }
    }

    /// Attaches the job, handler or module name.
    #[inline]
    pub fn with_subject(mut self, subject: impl Into<Arc<str>>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// True for events that report a contained or escalated fault.
    #[inline]
    pub fn is_fault(&self) -> bool {
        matches!(
            self.kind,
            EventKind::HandlerFaulted
                | EventKind::JobFaulted
                | EventKind::CriticalEscalated
                | EventKind::ModuleFailed
        )
    }
}
