//! # Host: builds modules, starts them, and drives shutdown.
//!
//! The [`Host`] owns one [`Kernel`] (bus, state store, scheduler), the root
//! cancellation scope and the list of running modules.
//!
//! ## Architecture
//! ```text
//! HostBuilder::new(cfg).module(factory)...build()
//!
//! start():  for each factory, in registration order
//!   ├─► module = factory(&kernel)                 (panic ─► start failure)
//!   ├─► module.start(root.child_token())          (Err / panic ─► start failure)
//!   │     ├─ ok        ─► ModuleStarted, module kept
//!   │     └─ failure   ─► scope cancelled, module dropped, ModuleFailed
//!   │                     └─ StartPolicy::Abort ─► error! + shutdown() + Err(ModuleStart)
//!   └─► next
//!
//! run():
//!   start() ─► wait for the first of
//!                ├─ ShutdownHandle::trigger()
//!                ├─ OS termination signal          (handle_signals)
//!                └─ CriticalFailure escalation      (CriticalPolicy::Shutdown)
//!           ─► shutdown()
//!
//! shutdown():
//!   ├─► publish ShutdownRequested
//!   ├─► root.cancel()                    → propagates to module scopes and jobs
//!   ├─► modules in reverse order: timeout(grace, stop()) then drop
//!   │     └─ timed out ─► warn!("abandoned module") + ModuleAbandoned
//!   ├─► scheduler.shutdown(grace)         → abandoned job names
//!   └─► AllStoppedWithin | GraceExceeded
//! ```
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use modvisor::{HostBuilder, HostConfig, Kernel, Module, ModuleError};
//!
//! struct Greeter;
//!
//! #[async_trait::async_trait]
//! impl Module for Greeter {
//!     fn name(&self) -> &str { "greeter" }
//!     fn start(&mut self, _scope: CancellationToken) -> Result<(), ModuleError> { Ok(()) }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cfg = HostConfig::default()
//!     .with_signals(false)
//!     .with_grace(Duration::from_millis(100));
//! let host = HostBuilder::new(cfg).module(|_k: &Kernel| Greeter).build();
//!
//! let stop = host.shutdown_handle();
//! stop.trigger();
//! let report = host.run().await.unwrap();
//! assert!(report.is_clean());
//! # }
//! ```

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::config::{CriticalPolicy, HostConfig, StartPolicy};
use super::module::{Kernel, Module, ShutdownHandle};
use super::signal::termination_signal;
use crate::error::{ModuleError, RuntimeError};
use crate::events::{EventKind, SupervisionEvent};
use crate::fault::panic_message;
use crate::scheduler::CriticalFailure;

type Factory = Box<dyn FnOnce(&Kernel) -> Box<dyn Module> + Send>;

/// Builder for a [`Host`].
pub struct HostBuilder {
    cfg: HostConfig,
    factories: Vec<Factory>,
}

impl HostBuilder {
    /// Creates a builder with the given configuration.
    pub fn new(cfg: HostConfig) -> Self {
        Self {
            cfg,
            factories: Vec::new(),
        }
    }

    /// Registers a module factory. Modules start in registration order.
    pub fn module<M, F>(mut self, factory: F) -> Self
    where
        M: Module,
        F: FnOnce(&Kernel) -> M + Send + 'static,
    {
        self.factories
            .push(Box::new(move |kernel: &Kernel| Box::new(factory(kernel)) as Box<dyn Module>));
        self
    }

    /// Builds the host with a fresh kernel. Nothing is started yet.
    pub fn build(self) -> Host {
        let kernel = Kernel::new(self.cfg.queue_capacity_clamped());
        let escalations = kernel.scheduler.escalations();
        Host {
            cfg: self.cfg,
            root: CancellationToken::new(),
            factories: self.factories,
            modules: Vec::new(),
            escalations,
            stopped: false,
            kernel,
        }
    }
}

impl fmt::Debug for HostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuilder")
            .field("cfg", &self.cfg)
            .field("modules", &self.factories.len())
            .finish()
    }
}

/// A module that started successfully.
struct Running {
    name: Arc<str>,
    module: Box<dyn Module>,
}

/// What was left behind by a shutdown.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Modules whose `stop` did not finish within the grace period.
    pub abandoned_modules: Vec<String>,
    /// Jobs still running after the grace period.
    pub abandoned_jobs: Vec<String>,
    /// Wall time the shutdown took.
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// True when nothing was abandoned.
    pub fn is_clean(&self) -> bool {
        self.abandoned_modules.is_empty() && self.abandoned_jobs.is_empty()
    }
}

/// Why `run` began shutting down.
enum StopCause {
    Requested,
    Signal,
    Critical(CriticalFailure),
}

/// Owns the kernel and the module lifecycle.
pub struct Host {
    cfg: HostConfig,
    kernel: Kernel,
    root: CancellationToken,
    factories: Vec<Factory>,
    modules: Vec<Running>,
    escalations: Option<mpsc::UnboundedReceiver<CriticalFailure>>,
    stopped: bool,
}

impl Host {
    /// Shared kernel services.
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Trigger that makes [`run`](Self::run) shut down.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.kernel.shutdown.clone()
    }

    /// Names of running modules, in start order.
    pub fn modules(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name.to_string()).collect()
    }

    /// Constructs and starts every registered module.
    ///
    /// Start failures follow [`HostConfig::start_policy`]. A second call does nothing.
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        let factories = std::mem::take(&mut self.factories);
        for factory in factories {
            let scope = self.root.child_token();
            let (name, outcome) = self.start_one(factory, scope.clone());

            match outcome {
                Ok(module) => {
                    tracing::debug!(module = %name, "module started");
                    self.publish(EventKind::ModuleStarted, &name, None);
                    self.modules.push(Running { name, module });
                }
                Err(err) => {
                    scope.cancel();
                    let error = err.to_string();
                    self.publish(EventKind::ModuleFailed, &name, Some(&error));

                    match self.cfg.start_policy {
                        StartPolicy::Isolate => {
                            tracing::warn!(module = %name, error = %error, "module failed to start; isolated");
                        }
                        StartPolicy::Abort => {
                            tracing::error!(module = %name, error = %error, "module failed to start; aborting host start");
                            self.shutdown().await;
                            return Err(RuntimeError::ModuleStart {
                                module: name.to_string(),
                                error,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Builds and starts one module inside a fault boundary.
    fn start_one(
        &self,
        factory: Factory,
        scope: CancellationToken,
    ) -> (Arc<str>, Result<Box<dyn Module>, ModuleError>) {
        let kernel = &self.kernel;
        let mut module = match std::panic::catch_unwind(AssertUnwindSafe(|| factory(kernel))) {
            Ok(module) => module,
            Err(payload) => {
                let err = ModuleError::fail(format!(
                    "factory panicked: {}",
                    panic_message(payload.as_ref())
                ));
                return (Arc::from("<unnamed>"), Err(err));
            }
        };
        let name: Arc<str> = Arc::from(module.name());

        let started = std::panic::catch_unwind(AssertUnwindSafe(|| module.start(scope)));
        let outcome = match started {
            Ok(Ok(())) => Ok(module),
            Ok(Err(err)) => Err(err),
            Err(payload) => Err(ModuleError::fail(format!(
                "start panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };
        (name, outcome)
    }

    /// Stops everything within the grace period and reports what was left.
    ///
    /// Always returns. A second call is a no-op with an empty report.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        if self.stopped {
            return ShutdownReport::default();
        }
        self.stopped = true;
        self.factories.clear();

        let started_at = Instant::now();
        let grace = self.cfg.grace;
        tracing::debug!(modules = self.modules.len(), ?grace, "host shutdown requested");
        self.kernel
            .bus
            .publish(SupervisionEvent::new(EventKind::ShutdownRequested));
        self.root.cancel();

        let mut abandoned_modules = Vec::new();
        while let Some(Running { name, mut module }) = self.modules.pop() {
            let stop = AssertUnwindSafe(module.stop()).catch_unwind();
            match tokio::time::timeout(grace, stop).await {
                Ok(Ok(())) => {
                    tracing::debug!(module = %name, "module stopped");
                    self.publish(EventKind::ModuleStopped, &name, None);
                }
                Ok(Err(payload)) => {
                    let info = panic_message(payload.as_ref());
                    tracing::warn!(module = %name, error = %info, "module stop panicked");
                    self.publish(EventKind::ModuleStopped, &name, Some(&info));
                }
                Err(_) => {
                    tracing::warn!(module = %name, ?grace, "abandoned module: stop exceeded grace period");
                    self.publish(EventKind::ModuleAbandoned, &name, None);
                    abandoned_modules.push(name.to_string());
                }
            }
            drop(module);
        }

        let abandoned_jobs = self.kernel.scheduler.shutdown(grace).await;

        let report = ShutdownReport {
            abandoned_modules,
            abandoned_jobs,
            elapsed: started_at.elapsed(),
        };
        if report.is_clean() {
            self.kernel
                .bus
                .publish(SupervisionEvent::new(EventKind::AllStoppedWithin));
        } else {
            let left = report
                .abandoned_modules
                .iter()
                .chain(report.abandoned_jobs.iter())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(abandoned = %left, ?grace, "shutdown grace exceeded");
            self.kernel
                .bus
                .publish(SupervisionEvent::new(EventKind::GraceExceeded).with_reason(left));
        }
        report
    }

    /// Starts the host, waits for a stop cause, then shuts down.
    ///
    /// Returns [`RuntimeError::CriticalJobFailed`] when a critical job fault
    /// caused the shutdown and [`RuntimeError::ModuleStart`] when start was
    /// aborted.
    pub async fn run(mut self) -> Result<ShutdownReport, RuntimeError> {
        self.start().await?;
        let cause = self.wait_for_stop().await;
        let report = self.shutdown().await;

        match cause {
            StopCause::Critical(CriticalFailure { job, error }) => {
                Err(RuntimeError::CriticalJobFailed { job, error })
            }
            StopCause::Requested | StopCause::Signal => Ok(report),
        }
    }

    async fn wait_for_stop(&mut self) -> StopCause {
        let trigger = self.kernel.shutdown.clone();
        let handle_signals = self.cfg.handle_signals;
        let policy = self.cfg.critical_policy;
        let mut escalations = self.escalations.take();

        let signal = async {
            if !handle_signals {
                return std::future::pending().await;
            }
            match termination_signal().await {
                Ok(sig) => tracing::info!(signal = %sig, "termination signal received"),
                Err(e) => {
                    tracing::warn!(error = %e, "signal registration failed; ignoring OS signals");
                    std::future::pending::<()>().await;
                }
            }
        };

        let critical = async {
            let Some(rx) = escalations.as_mut() else {
                return std::future::pending().await;
            };
            while let Some(failure) = rx.recv().await {
                match policy {
                    CriticalPolicy::Shutdown => return failure,
                    CriticalPolicy::Ignore => {
                        tracing::warn!(job = %failure.job, error = %failure.error, "critical failure ignored by host policy");
                    }
                }
            }
            std::future::pending().await
        };

        let cause = tokio::select! {
            _ = trigger.triggered() => StopCause::Requested,
            _ = signal => StopCause::Signal,
            failure = critical => {
                tracing::error!(job = %failure.job, error = %failure.error, "critical job failed; shutting down host");
                StopCause::Critical(failure)
            }
        };
        self.escalations = escalations;
        cause
    }

    fn publish(&self, kind: EventKind, module: &Arc<str>, reason: Option<&str>) {
        let mut ev = SupervisionEvent::new(kind).with_subject(Arc::clone(module));
        if let Some(reason) = reason {
            ev = ev.with_reason(reason);
        }
        self.kernel.bus.publish(ev);
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("modules", &self.modules())
            .field("stopped", &self.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::scheduler::JobKind;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cfg() -> HostConfig {
        HostConfig::default()
            .with_signals(false)
            .with_grace(Duration::from_millis(200))
    }

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Module for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn start(&mut self, _scope: CancellationToken) -> Result<(), ModuleError> {
            self.log.lock().unwrap().push(format!("start {}", self.name));
            if self.fail {
                return Err(ModuleError::fail("refused"));
            }
            Ok(())
        }

        async fn stop(&mut self) {
            self.log.lock().unwrap().push(format!("stop {}", self.name));
        }
    }

    fn recorder(
        name: &'static str,
        log: &Log,
        fail: bool,
    ) -> impl FnOnce(&Kernel) -> Recorder + Send + 'static {
        let log = Arc::clone(log);
        move |_k: &Kernel| Recorder { name, log, fail }
    }

    #[tokio::test]
    async fn starts_in_order_and_stops_in_reverse() {
        let log: Log = Arc::default();
        let mut host = HostBuilder::new(cfg())
            .module(recorder("a", &log, false))
            .module(recorder("b", &log, false))
            .module(recorder("c", &log, false))
            .build();

        host.start().await.unwrap();
        assert_eq!(host.modules(), vec!["a", "b", "c"]);

        let report = host.shutdown().await;
        assert!(report.is_clean());
        assert!(host.modules().is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start a", "start b", "start c", "stop c", "stop b", "stop a"]
        );
    }

    #[tokio::test]
    async fn isolate_policy_skips_failed_module() {
        let log: Log = Arc::default();
        let mut host = HostBuilder::new(cfg())
            .module(recorder("a", &log, false))
            .module(recorder("broken", &log, true))
            .module(recorder("c", &log, false))
            .build();

        let failed = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&failed);
        host.kernel()
            .bus
            .subscribe("failures", move |ev: &SupervisionEvent| {
                if ev.kind == EventKind::ModuleFailed {
                    f.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            })
            .detach();

        host.start().await.unwrap();
        assert_eq!(host.modules(), vec!["a", "c"]);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
        host.shutdown().await;
    }

    #[tokio::test]
    async fn abort_policy_unwinds_started_modules() {
        let log: Log = Arc::default();
        let mut host = HostBuilder::new(cfg().with_start_policy(StartPolicy::Abort))
            .module(recorder("a", &log, false))
            .module(recorder("broken", &log, true))
            .module(recorder("never", &log, false))
            .build();

        let err = host.start().await.unwrap_err();
        assert!(matches!(err, RuntimeError::ModuleStart { ref module, .. } if module == "broken"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start a", "start broken", "stop a"]
        );
    }

    struct Panicky;

    #[async_trait::async_trait]
    impl Module for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }
        fn start(&mut self, _scope: CancellationToken) -> Result<(), ModuleError> {
            panic!("start exploded");
        }
    }

    #[tokio::test]
    async fn panicking_start_and_factory_are_contained() {
        let log: Log = Arc::default();
        let mut host = HostBuilder::new(cfg())
            .module(|_k: &Kernel| Panicky)
            .module(|_k: &Kernel| -> Recorder { panic!("factory exploded") })
            .module(recorder("ok", &log, false))
            .build();

        host.start().await.unwrap();
        assert_eq!(host.modules(), vec!["ok"]);
        host.shutdown().await;
    }

    struct Stubborn;

    #[async_trait::async_trait]
    impl Module for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }
        fn start(&mut self, _scope: CancellationToken) -> Result<(), ModuleError> {
            Ok(())
        }
        async fn stop(&mut self) {
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_stop_is_abandoned() {
        let mut host = HostBuilder::new(cfg()).module(|_k: &Kernel| Stubborn).build();
        host.start().await.unwrap();
        let report = host.shutdown().await;
        assert_eq!(report.abandoned_modules, vec!["stubborn"]);
        assert!(report.abandoned_jobs.is_empty());
    }

    struct Looper {
        kernel: Kernel,
    }

    #[async_trait::async_trait]
    impl Module for Looper {
        fn name(&self) -> &str {
            "looper"
        }
        fn start(&mut self, scope: CancellationToken) -> Result<(), ModuleError> {
            self.kernel
                .scheduler
                .run_async("deaf-loop", JobKind::Background, &scope, |_ctx| async {
                    std::future::pending::<()>().await;
                    Ok(())
                });
            self.kernel
                .scheduler
                .run_async("polite-loop", JobKind::Background, &scope, |ctx| async move {
                    ctx.cancelled().await;
                    Err(JobError::Canceled)
                });
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn job_ignoring_cancellation_is_abandoned() {
        let mut host = HostBuilder::new(cfg())
            .module(|k: &Kernel| Looper { kernel: k.clone() })
            .build();
        host.start().await.unwrap();
        tokio::task::yield_now().await;

        let report = host.shutdown().await;
        assert_eq!(report.abandoned_jobs, vec!["deaf-loop"]);
        assert!(report.abandoned_modules.is_empty());
    }

    struct Escalator {
        kernel: Kernel,
    }

    #[async_trait::async_trait]
    impl Module for Escalator {
        fn name(&self) -> &str {
            "escalator"
        }
        fn start(&mut self, scope: CancellationToken) -> Result<(), ModuleError> {
            self.kernel
                .scheduler
                .run_async("vital", JobKind::Critical, &scope, |_ctx| async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err(JobError::fail("device lost"))
                });
            Ok(())
        }
    }

    #[tokio::test]
    async fn critical_failure_stops_run() {
        let host = HostBuilder::new(cfg())
            .module(|k: &Kernel| Escalator { kernel: k.clone() })
            .build();
        let err = host.run().await.unwrap_err();
        assert!(
            matches!(err, RuntimeError::CriticalJobFailed { ref job, .. } if job == "vital")
        );
    }

    #[tokio::test]
    async fn ignore_policy_keeps_running_until_triggered() {
        let host = HostBuilder::new(cfg().with_critical_policy(CriticalPolicy::Ignore))
            .module(|k: &Kernel| Escalator { kernel: k.clone() })
            .build();

        let escalated = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&escalated);
        host.kernel()
            .bus
            .subscribe("escalations", move |ev: &SupervisionEvent| {
                if ev.kind == EventKind::CriticalEscalated {
                    e.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            })
            .detach();

        let stop = host.shutdown_handle();
        let seen = Arc::clone(&escalated);
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let before_trigger = seen.load(Ordering::SeqCst);
            stop.trigger();
            before_trigger
        });

        let report = tokio::time::timeout(Duration::from_secs(5), host.run())
            .await
            .unwrap()
            .unwrap();
        assert!(report.is_clean());
        assert_eq!(trigger.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn trigger_from_inside_a_module_stops_run() {
        let host = HostBuilder::new(cfg())
            .module(|k: &Kernel| {
                let stop = k.shutdown.clone();
                k.scheduler.run_async(
                    "requester",
                    JobKind::Background,
                    &CancellationToken::new(),
                    move |_ctx| {
                        let stop = stop.clone();
                        async move {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            stop.trigger();
                            Ok(())
                        }
                    },
                );
                Stubborn
            })
            .build();
        let handle = host.shutdown_handle();
        let report = tokio::time::timeout(Duration::from_secs(5), host.run())
            .await
            .unwrap()
            .unwrap();
        assert!(handle.is_triggered());
        assert_eq!(report.abandoned_modules, vec!["stubborn"]);
    }

    #[tokio::test]
    async fn second_shutdown_is_noop() {
        let log: Log = Arc::default();
        let mut host = HostBuilder::new(cfg())
            .module(recorder("a", &log, false))
            .build();
        host.start().await.unwrap();
        host.shutdown().await;
        let again = host.shutdown().await;
        assert_eq!(again, ShutdownReport::default());
        assert_eq!(log.lock().unwrap().len(), 2);
    }
}
