//! # Host configuration.
//!
//! Provides [`HostConfig`] with the settings that shape start-up and shutdown.
//!
//! ## Sentinel values
//! - `grace = 0s` → nothing is waited for; every stop and job is abandoned at once
//! - `queue_capacity = 0` → clamped to 1 by [`HostConfig::queue_capacity_clamped`]

use std::time::Duration;

/// What the host does when a module fails to start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StartPolicy {
    /// Drop only the failed module; the rest keep starting.
    #[default]
    Isolate,
    /// Shut down the modules started so far and fail the start.
    Abort,
}

/// What [`Host::run`](crate::Host::run) does when a critical job faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CriticalPolicy {
    /// Begin shutdown and return [`RuntimeError::CriticalJobFailed`](crate::RuntimeError::CriticalJobFailed).
    #[default]
    Shutdown,
    /// Log the failure and keep running.
    Ignore,
}

/// Configuration for the module host.
///
/// ## Field semantics
/// - `grace`: bound for each module stop and for draining the scheduler
/// - `start_policy`: reaction to a module start failure
/// - `critical_policy`: reaction to a critical job fault while running
/// - `handle_signals`: whether `run` listens for OS termination signals
/// - `queue_capacity`: queue bound for [`Kernel::subscribe_queued`](crate::Kernel::subscribe_queued)
#[derive(Clone, Debug)]
pub struct HostConfig {
    /// Maximum wait for a module's `stop` and, separately, for jobs to finish.
    pub grace: Duration,

    /// Module start failure handling.
    pub start_policy: StartPolicy,

    /// Critical job failure handling.
    pub critical_policy: CriticalPolicy,

    /// Listen for SIGINT/SIGTERM/SIGQUIT (Ctrl-C on Windows) in `run`.
    pub handle_signals: bool,

    /// Queue bound used by `Kernel::subscribe_queued`.
    pub queue_capacity: usize,
}

impl HostConfig {
    /// Returns the queue capacity clamped to a minimum of 1.
    #[inline]
    pub fn queue_capacity_clamped(&self) -> usize {
        self.queue_capacity.max(1)
    }

    /// Sets the grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Sets the start policy.
    pub fn with_start_policy(mut self, policy: StartPolicy) -> Self {
        self.start_policy = policy;
        self
    }

    /// Sets the critical failure policy.
    pub fn with_critical_policy(mut self, policy: CriticalPolicy) -> Self {
        self.critical_policy = policy;
        self
    }

    /// Enables or disables OS signal handling.
    pub fn with_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Sets the queue bound for kernel-created queued subscribers.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

impl Default for HostConfig {
    /// Default configuration:
    ///
    /// - `grace = 5s`
    /// - `start_policy = Isolate`
    /// - `critical_policy = Shutdown`
    /// - `handle_signals = true`
    /// - `queue_capacity = 1024`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5),
            start_policy: StartPolicy::default(),
            critical_policy: CriticalPolicy::default(),
            handle_signals: true,
            queue_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = HostConfig::default();
        assert_eq!(cfg.grace, Duration::from_secs(5));
        assert_eq!(cfg.start_policy, StartPolicy::Isolate);
        assert_eq!(cfg.critical_policy, CriticalPolicy::Shutdown);
        assert!(cfg.handle_signals);
        assert_eq!(cfg.queue_capacity_clamped(), 1024);
    }

    #[test]
    fn zero_queue_capacity_is_clamped() {
        let cfg = HostConfig {
            queue_capacity: 0,
            ..HostConfig::default()
        };
        assert_eq!(cfg.queue_capacity_clamped(), 1);
    }
}
