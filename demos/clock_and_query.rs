//! # Example: clock_and_query
//!
//! Three modules that never reference each other:
//! - `clock` publishes a `TickEvent` every 100ms from a critical job
//! - `uptime` counts ticks into the state store and answers `GetUptimeQuery`
//! - `reporter` periodically asks for the uptime through the correlator
//!
//! ## Flow
//! ```text
//! clock job ──publish(TickEvent)──► Bus ──► uptime handler ──► state.update("ticks")
//!
//! reporter job
//!   └─► query(GetUptimeQuery { id }) ──► Bus ──► uptime responder
//!                                                  └─► publish(GetUptimeResponse { id, .. })
//!       ◄── resolved by correlation id ─────────────────┘
//! ```
//!
//! Stops on Ctrl-C or after 2 seconds.
//!
//! ## Run
//! ```bash
//! cargo run --example clock_and_query
//! ```

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use modvisor::{
    CorrelationId, HostBuilder, HostConfig, JobError, JobKind, Kernel, Module, ModuleError,
    Query, QueryError, Response, Subscription, query_timeout, respond,
};

#[derive(Debug, Clone, Copy)]
struct TickEvent {
    n: u64,
}

#[derive(Debug)]
struct GetUptimeQuery {
    id: CorrelationId,
}

#[derive(Debug, Clone)]
struct GetUptimeResponse {
    id: CorrelationId,
    ticks: u64,
}

impl Query for GetUptimeQuery {
    type Response = GetUptimeResponse;
    fn correlation_id(&self) -> CorrelationId {
        self.id
    }
}

impl Response for GetUptimeResponse {
    fn correlation_id(&self) -> CorrelationId {
        self.id
    }
}

struct Clock {
    kernel: Kernel,
}

#[async_trait::async_trait]
impl Module for Clock {
    fn name(&self) -> &str {
        "clock"
    }

    fn start(&mut self, scope: CancellationToken) -> Result<(), ModuleError> {
        let bus = self.kernel.bus.clone();
        self.kernel
            .scheduler
            .run_async("clock", JobKind::Critical, &scope, move |ctx| {
                let bus = bus.clone();
                async move {
                    let mut interval = tokio::time::interval(Duration::from_millis(100));
                    let mut n = 0;
                    loop {
                        tokio::select! {
                            _ = ctx.cancelled() => return Err(JobError::Canceled),
                            _ = interval.tick() => {
                                bus.publish(TickEvent { n });
                                n += 1;
                            }
                        }
                    }
                }
            });
        Ok(())
    }
}

struct Uptime {
    kernel: Kernel,
    subs: Vec<Subscription>,
}

#[async_trait::async_trait]
impl Module for Uptime {
    fn name(&self) -> &str {
        "uptime"
    }

    fn start(&mut self, _scope: CancellationToken) -> Result<(), ModuleError> {
        let state = self.kernel.state.clone();
        self.subs
            .push(self.kernel.bus.subscribe("count-ticks", move |_t: &TickEvent| {
                state.update("ticks", |n: u64| n + 1, 0)?;
                Ok(())
            }));

        let state = self.kernel.state.clone();
        self.subs.push(respond(
            &self.kernel.bus,
            "uptime",
            move |q: &GetUptimeQuery| {
                Ok(GetUptimeResponse {
                    id: q.id,
                    ticks: state.get("ticks", 0u64)?,
                })
            },
        ));
        Ok(())
    }

    async fn stop(&mut self) {
        self.subs.clear();
        println!("[uptime] stopped");
    }
}

struct Reporter {
    kernel: Kernel,
}

#[async_trait::async_trait]
impl Module for Reporter {
    fn name(&self) -> &str {
        "reporter"
    }

    fn start(&mut self, scope: CancellationToken) -> Result<(), ModuleError> {
        let bus = self.kernel.bus.clone();
        self.kernel
            .scheduler
            .run_async("report", JobKind::Background, &scope, move |ctx| {
                let bus = bus.clone();
                async move {
                    while !ctx.is_cancelled() {
                        tokio::time::sleep(Duration::from_millis(350)).await;
                        let asked = query_timeout(
                            &bus,
                            |id| GetUptimeQuery { id },
                            &ctx,
                            Duration::from_millis(200),
                        )
                        .await;
                        match asked {
                            Ok(resp) => println!("[reporter] uptime: {} ticks", resp.ticks),
                            Err(QueryError::Canceled) => break,
                            Err(e) => println!("[reporter] no answer: {e}"),
                        }
                    }
                    Ok(())
                }
            });
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modvisor=debug")),
        )
        .init();

    println!("=== clock_and_query example ===\n");

    let host = HostBuilder::new(HostConfig::default())
        .module(|k: &Kernel| Uptime {
            kernel: k.clone(),
            subs: Vec::new(),
        })
        .module(|k: &Kernel| Clock { kernel: k.clone() })
        .module(|k: &Kernel| Reporter { kernel: k.clone() })
        .build();

    let stop = host.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        stop.trigger();
    });

    let report = host.run().await?;
    println!("\nclean shutdown: {} (took {:?})", report.is_clean(), report.elapsed);
    Ok(())
}
