//! # Example: fault_injection
//!
//! Runs a deliberately hostile module next to a well-behaved one and shows that
//! the kernel contains every fault.
//!
//! The chaos module:
//! - throws from one handler and panics in another
//! - runs a job that faults after a short delay
//! - runs a job that loops forever ignoring its cancellation token
//! - floods the bus with messages, including into a tiny queued subscriber
//! - blocks in `stop` longer than the grace period
//!
//! A second module refuses to start (isolated by the default policy) and a
//! heartbeat module keeps counting through all of it.
//!
//! ## Flow
//! ```text
//! main()
//!   ├─► HostBuilder (grace 500ms, queue capacity 4)
//!   │     ├─ module "heartbeat"  (Background job, counts into StateStore)
//!   │     ├─ module "refuses"    (start ─► Err, isolated)
//!   │     └─ module "chaos"      (faulty handlers, faulty/deaf jobs, flood)
//!   ├─► observer on SupervisionEvent (prints faults)
//!   ├─► after 1.5s: ShutdownHandle::trigger()
//!   └─► host.run() ─► ShutdownReport { abandoned_modules: [chaos], abandoned_jobs: [deaf-loop] }
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=modvisor=debug cargo run --example fault_injection
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use modvisor::{
    HandlerError, HostBuilder, HostConfig, JobError, JobKind, Kernel, Module, ModuleError,
    Subscription, SupervisionEvent,
};

#[derive(Debug)]
struct FloodEvent(u64);

#[derive(Debug)]
struct PokeCommand;

struct Heartbeat {
    kernel: Kernel,
}

#[async_trait::async_trait]
impl Module for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    fn start(&mut self, scope: CancellationToken) -> Result<(), ModuleError> {
        let state = self.kernel.state.clone();
        self.kernel
            .scheduler
            .run_async("beat", JobKind::Background, &scope, move |ctx| {
                let state = state.clone();
                async move {
                    while !ctx.is_cancelled() {
                        state.update("beats", |n: u64| n + 1, 0)?;
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    Ok::<(), JobError>(())
                }
            });
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
        Err(ModuleError::fail("configuration missing"))
    }
}

struct Chaos {
    kernel: Kernel,
    subs: Vec<Subscription>,
}

#[async_trait::async_trait]
impl Module for Chaos {
    fn name(&self) -> &str {
        "chaos"
    }

    fn start(&mut self, scope: CancellationToken) -> Result<(), ModuleError> {
        let bus = &self.kernel.bus;

        self.subs.push(bus.subscribe("throws", |_p: &PokeCommand| {
            Err(HandlerError::fail("poke rejected"))
        }));
        self.subs
            .push(bus.subscribe("panics", |_p: &PokeCommand| -> Result<(), HandlerError> {
                panic!("poke handler exploded")
            }));
        self.subs.push(self.kernel.subscribe_queued(
            "slow-sink",
            |ev: Arc<FloodEvent>| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                println!("[slow-sink] drained flood #{}", ev.0);
                Ok(())
            },
        ));

        let sched = &self.kernel.scheduler;
        sched.run_async("faulty", JobKind::Background, &scope, |_ctx| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Err(JobError::fail("injected fault"))
        });
        sched.run_async("panicky", JobKind::Background, &scope, |_ctx| {
            explode_after(Duration::from_millis(300))
        });
        sched.run_async("deaf-loop", JobKind::Background, &scope, |_ctx| async {
            let mut spins = 0u64;
            while spins < u64::MAX {
                spins += 1;
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Ok(())
        });

        let flood_bus = bus.clone();
        sched.run_async("flood", JobKind::Background, &scope, move |ctx| {
            let bus = flood_bus.clone();
            async move {
                let mut n = 0u64;
                while !ctx.is_cancelled() {
                    for _ in 0..200 {
                        bus.publish(FloodEvent(n));
                        n += 1;
                    }
                    bus.publish(PokeCommand);
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
                Err(JobError::Canceled)
            }
        });
        Ok(())
    }

    async fn stop(&mut self) {
        println!("[chaos] stop: blocking well past the grace period");
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
}

async fn explode_after(delay: Duration) -> Result<(), JobError> {
    tokio::time::sleep(delay).await;
    panic!("injected panic after {delay:?}");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modvisor=info")),
        )
        .init();

    println!("=== fault_injection example ===\n");

    let cfg = HostConfig::default()
        .with_grace(Duration::from_millis(500))
        .with_queue_capacity(4);
    let host = HostBuilder::new(cfg)
        .module(|k: &Kernel| Heartbeat { kernel: k.clone() })
        .module(|_k: &Kernel| Refuses)
        .module(|k: &Kernel| Chaos {
            kernel: k.clone(),
            subs: Vec::new(),
        })
        .build();

    host.kernel()
        .bus
        .subscribe("observer", |ev: &SupervisionEvent| {
            if ev.is_fault() {
                println!(
                    "[observer] #{} {} subject={:?} reason={:?}",
                    ev.seq,
                    ev.kind.as_label(),
                    ev.subject,
                    ev.reason
                );
            }
            Ok(())
        })
        .detach();

    let state = host.kernel().state.clone();
    let bus = host.kernel().bus.clone();
    let stop = host.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        println!("\n[main] requesting shutdown");
        stop.trigger();
    });

    let report = host.run().await?;

    println!("\n=== report ===");
    println!("abandoned modules: {:?}", report.abandoned_modules);
    println!("abandoned jobs:    {:?}", report.abandoned_jobs);
    println!("shutdown took:     {:?}", report.elapsed);
    println!("heartbeats:        {}", state.get("beats", 0u64)?);
    println!("handler faults:    {}", bus.fault_count());
    Ok(())
}
