//! End-to-end kernel scenarios: bus, scheduler, correlator, store and host together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use modvisor::{
    Bus, CorrelationId, EventKind, HandlerError, HostBuilder, HostConfig, JobError, JobKind,
    JobStatus, Kernel, Module, ModuleError, Query, QueryError, Response, RuntimeError, Scheduler,
    StartPolicy, StateStore, Subscription, SupervisionEvent, query, respond,
};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Tick(u64);

#[derive(Debug)]
struct GetStatusQuery {
    id: CorrelationId,
}

#[derive(Debug, Clone)]
struct GetStatusResponse {
    id: CorrelationId,
    status: &'static str,
}

impl Query for GetStatusQuery {
    type Response = GetStatusResponse;
    fn correlation_id(&self) -> CorrelationId {
        self.id
    }
}

impl Response for GetStatusResponse {
    fn correlation_id(&self) -> CorrelationId {
        self.id
    }
}

fn host_cfg() -> HostConfig {
    HostConfig::default()
        .with_signals(false)
        .with_grace(Duration::from_millis(200))
}

#[test]
fn tick_without_subscribers_then_in_order() {
    let bus = Bus::new();
    bus.publish(Tick(0));
    assert_eq!(bus.fault_count(), 0);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let _h = bus.subscribe("h", move |t: &Tick| {
        s.lock().unwrap().push(*t);
        Ok(())
    });
    bus.publish(Tick(1));
    bus.publish(Tick(2));
    assert_eq!(*seen.lock().unwrap(), vec![Tick(1), Tick(2)]);
}

#[test]
fn disposed_subscription_never_fires_again() {
    let bus = Bus::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let sub = bus.subscribe("h", move |_t: &Tick| {
        h.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    bus.publish(Tick(1));
    sub.dispose();
    bus.publish(Tick(2));
    bus.publish(Tick(3));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn failing_handler_does_not_suppress_sibling() {
    let bus = Bus::new();
    let _a = bus.subscribe("a", |_t: &Tick| Err(HandlerError::fail("a refuses")));
    let _panicky = bus.subscribe("p", |_t: &Tick| -> Result<(), HandlerError> { panic!("p blew up") });
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let _b = bus.subscribe("b", move |_t: &Tick| {
        h.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    bus.publish(Tick(1));
    bus.publish(Tick(2));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(bus.fault_count(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_from_jobs_are_not_lost() {
    const N: usize = 100;
    let scheduler = Scheduler::new(Bus::new());
    let state = StateStore::new();
    let scope = CancellationToken::new();

    let handles: Vec<_> = (0..N)
        .map(|i| {
            let state = state.clone();
            scheduler.run_async(format!("inc-{i}"), JobKind::Background, &scope, move |_ctx| {
                let state = state.clone();
                async move {
                    state.update("counter", |x: usize| x + 1, 0)?;
                    Ok::<(), JobError>(())
                }
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.wait().await, JobStatus::Completed);
    }
    assert_eq!(state.get("counter", 0usize).unwrap(), N);
}

#[tokio::test]
async fn query_resolves_through_unrelated_traffic() {
    let bus = Bus::new();
    let b = bus.clone();
    let _responder = bus.subscribe("status", move |q: &GetStatusQuery| {
        let (b, id) = (b.clone(), q.id);
        tokio::spawn(async move {
            b.publish(Tick(7));
            b.publish(GetStatusResponse {
                id: CorrelationId::new(),
                status: "someone else",
            });
            tokio::time::sleep(Duration::from_millis(5)).await;
            b.publish(Tick(8));
            b.publish(GetStatusResponse { id, status: "ready" });
        });
        Ok(())
    });

    let resp = query(&bus, |id| GetStatusQuery { id }, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resp.status, "ready");
}

#[tokio::test]
async fn cancelled_query_leaves_nothing_behind() {
    let bus = Bus::new();
    let last_query = Arc::new(Mutex::new(None));
    let lq = Arc::clone(&last_query);
    let _silent = bus.subscribe("silent", move |q: &GetStatusQuery| {
        *lq.lock().unwrap() = Some(q.id);
        Ok(())
    });

    let cancel = CancellationToken::new();
    let c = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        c.cancel();
    });
    let res = query(&bus, |id| GetStatusQuery { id }, &cancel).await;
    assert_eq!(res.unwrap_err(), QueryError::Canceled);

    // No observer is left for the late response.
    assert_eq!(bus.subscriber_count::<GetStatusResponse>(), 0);
    let id = last_query.lock().unwrap().expect("query was published");
    bus.publish(GetStatusResponse { id, status: "late" });
    assert_eq!(bus.fault_count(), 0);
}

#[tokio::test]
async fn background_fault_does_not_stop_sibling() {
    let scheduler = Scheduler::new(Bus::new());
    let scope = CancellationToken::new();

    let failing = scheduler.run_async("failing", JobKind::Background, &scope, |_ctx| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Err(JobError::fail("raised after 50ms"))
    });
    let sibling = scheduler.run_async("sibling", JobKind::Background, &scope, |_ctx| async {
        tokio::time::sleep(Duration::from_millis(120)).await;
        Ok(())
    });

    assert_eq!(failing.wait().await, JobStatus::Faulted);
    assert_eq!(sibling.wait().await, JobStatus::Completed);
}

/// Spawns one job that ignores its token and one that honours it.
struct Misbehaving {
    kernel: Kernel,
}

#[async_trait::async_trait]
impl Module for Misbehaving {
    fn name(&self) -> &str {
        "misbehaving"
    }

    fn start(&mut self, scope: CancellationToken) -> Result<(), ModuleError> {
        self.kernel
            .scheduler
            .run_async("ignores-cancel", JobKind::Background, &scope, |_ctx| async {
                let mut spins = 0u64;
                while spins < u64::MAX {
                    spins += 1;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Ok(())
            });
        self.kernel
            .scheduler
            .run_async("honours-cancel", JobKind::Background, &scope, |ctx| async move {
                ctx.cancelled().await;
                Err(JobError::Canceled)
            });
        Ok(())
    }
}

#[tokio::test]
async fn job_ignoring_cancel_does_not_block_shutdown() {
    let mut host = HostBuilder::new(host_cfg())
        .module(|k: &Kernel| Misbehaving { kernel: k.clone() })
        .build();

    let events = Arc::new(Mutex::new(Vec::new()));
    let ev = Arc::clone(&events);
    host.kernel()
        .bus
        .subscribe("events", move |e: &SupervisionEvent| {
            ev.lock().unwrap().push(e.kind);
            Ok(())
        })
        .detach();

    host.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = std::time::Instant::now();
    let report = host.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.abandoned_jobs, vec!["ignores-cancel"]);

    let kinds = events.lock().unwrap().clone();
    assert!(kinds.contains(&EventKind::ShutdownRequested));
    assert!(kinds.contains(&EventKind::JobAbandoned));
    assert_eq!(kinds.last(), Some(&EventKind::GraceExceeded));
}

/// Answers status queries and fails its critical job on demand.
struct Service {
    kernel: Kernel,
    responder: Option<Subscription>,
    fail_critical: bool,
}

#[async_trait::async_trait]
impl Module for Service {
    fn name(&self) -> &str {
        "service"
    }

    fn start(&mut self, scope: CancellationToken) -> Result<(), ModuleError> {
        self.responder = Some(respond(&self.kernel.bus, "status", |q: &GetStatusQuery| {
            Ok(GetStatusResponse { id: q.id, status: "up" })
        }));
        if self.fail_critical {
            self.kernel
                .scheduler
                .run_async("heart", JobKind::Critical, &scope, |_ctx| async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Err(JobError::fail("heart stopped"))
                });
        }
        Ok(())
    }
}

struct Refuses;

#[async_trait::async_trait]
impl Module for Refuses {
    fn name(&self) -> &str {
        "refuses"
    }

    fn start(&mut self, _scope: CancellationToken) -> Result<(), ModuleError> {
        Err(ModuleError::fail("missing device"))
    }
}

#[tokio::test]
async fn critical_fault_shuts_host_down() {
    let host = HostBuilder::new(host_cfg())
        .module(|k: &Kernel| Service {
            kernel: k.clone(),
            responder: None,
            fail_critical: true,
        })
        .build();

    let err = tokio::time::timeout(Duration::from_secs(5), host.run())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, RuntimeError::CriticalJobFailed { ref job, .. } if job == "heart"));
}

#[tokio::test]
async fn isolate_keeps_other_modules_serving() {
    let mut host = HostBuilder::new(host_cfg())
        .module(|_k: &Kernel| Refuses)
        .module(|k: &Kernel| Service {
            kernel: k.clone(),
            responder: None,
            fail_critical: false,
        })
        .build();
    host.start().await.unwrap();
    assert_eq!(host.modules(), vec!["service"]);

    let resp = query(
        &host.kernel().bus,
        |id| GetStatusQuery { id },
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(resp.status, "up");

    let report = host.shutdown().await;
    assert!(report.is_clean());
    assert_eq!(host.kernel().bus.subscriber_count::<GetStatusQuery>(), 0);
}

#[tokio::test]
async fn abort_policy_fails_the_start() {
    let mut host = HostBuilder::new(host_cfg().with_start_policy(StartPolicy::Abort))
        .module(|k: &Kernel| Service {
            kernel: k.clone(),
            responder: None,
            fail_critical: false,
        })
        .module(|_k: &Kernel| Refuses)
        .build();

    let err = host.start().await.unwrap_err();
    assert_eq!(err.as_label(), "runtime_module_start");
    assert!(host.modules().is_empty());
    assert_eq!(host.kernel().bus.subscriber_count::<GetStatusQuery>(), 0);
}
