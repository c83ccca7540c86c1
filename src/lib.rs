//! # modvisor
//!
//! **Modvisor** is an in-process module kernel for Rust.
//!
//! Independently developed modules talk to each other through a typed
//! message bus, share typed state, and run long-lived async jobs under
//! supervision, without holding references to one another. A failing handler,
//! job or module is contained and logged; it never takes its neighbours down.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   Module A   │   │   Module B   │   │   Module C   │
//!     │  (factory)   │   │  (factory)   │   │  (factory)   │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Host (module lifecycle)                                          │
//! │  - root CancellationToken ─► one child scope per module           │
//! │  - StartPolicy / CriticalPolicy                                   │
//! │  - Kernel { bus, state, scheduler, shutdown }                     │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!  ┌────────────┐    ┌─────────────┐    ┌──────────────┐
//!  │    Bus     │    │  Scheduler  │    │  StateStore  │
//!  │ TypeId ─►  │    │ jobs with   │    │ key ─► typed │
//!  │ handlers   │◄───│ fault and   │    │ value, CAS   │
//!  │            │    │ cancel      │    │ update       │
//!  └─────┬──────┘    │ isolation   │    └──────────────┘
//!        │           └─────────────┘
//!        ▼
//!  query() / respond(): correlation-tagged request/response over the bus
//! ```
//!
//! ### Dispatch
//! ```text
//! bus.publish(msg: M)
//!   ├─► topic = topics[TypeId::of::<M>()]      (none ─► trace!, no-op)
//!   ├─► snapshot = topic.slots.clone()        (lock released)
//!   └─► for slot in snapshot:
//!         ├─ !slot.active ─► skip              (disposed mid-dispatch)
//!         └─ catch_unwind(handler(&msg))
//!              ├─ Ok           ─► next
//!              └─ Err / panic  ─► warn! + HandlerFaulted, next
//! ```
//!
//! ## Features
//! | Area              | Description                                                    | Key types / functions                        |
//! |-------------------|----------------------------------------------------------------|----------------------------------------------|
//! | **Messaging**     | Typed publish/subscribe keyed by Rust type.                    | [`Bus`], [`Subscription`], [`Message`]       |
//! | **Queries**       | Awaitable request/response with correlation ids.               | [`query`], [`respond`], [`CorrelationId`]    |
//! | **Jobs**          | Named async jobs with fault and cancellation isolation.        | [`Scheduler`], [`JobKind`], [`JobHandle`]    |
//! | **State**         | Typed concurrent key/value store with lossless updates.        | [`StateStore`]                               |
//! | **Modules**       | Start-up, shutdown with grace period, failure policies.        | [`Host`], [`Module`], [`Kernel`]             |
//! | **Observability** | Kernel lifecycle published on the bus itself.                  | [`SupervisionEvent`], [`EventKind`]          |
//! | **Errors**        | Typed errors for handlers, jobs, modules, state and queries.   | [`HandlerError`], [`JobError`], ...          |
//!
//! Logging goes through `tracing`; the crate never installs a subscriber.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use modvisor::{HostBuilder, HostConfig, JobKind, Kernel, Module, ModuleError, Subscription};
//!
//! #[derive(Debug)]
//! struct TickEvent(u64);
//!
//! struct Clock { kernel: Kernel }
//! struct Counter { kernel: Kernel, sub: Option<Subscription> }
//!
//! #[async_trait::async_trait]
//! impl Module for Clock {
//!     fn name(&self) -> &str { "clock" }
//!     fn start(&mut self, scope: CancellationToken) -> Result<(), ModuleError> {
//!         let bus = self.kernel.bus.clone();
//!         self.kernel.scheduler.run_async("tick", JobKind::Critical, &scope, move |ctx| {
//!             let bus = bus.clone();
//!             async move {
//!                 let mut n = 0;
//!                 while !ctx.is_cancelled() {
//!                     bus.publish(TickEvent(n));
//!                     n += 1;
//!                     tokio::time::sleep(Duration::from_millis(5)).await;
//!                 }
//!                 Ok(())
//!             }
//!         });
//!         Ok(())
//!     }
//! }
//!
//! #[async_trait::async_trait]
//! impl Module for Counter {
//!     fn name(&self) -> &str { "counter" }
//!     fn start(&mut self, _scope: CancellationToken) -> Result<(), ModuleError> {
//!         let state = self.kernel.state.clone();
//!         self.sub = Some(self.kernel.bus.subscribe("count-ticks", move |_t: &TickEvent| {
//!             state.update("ticks", |n: u64| n + 1, 0)?;
//!             Ok(())
//!         }));
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = HostConfig::default().with_signals(false);
//!     let host = HostBuilder::new(cfg)
//!         .module(|k: &Kernel| Counter { kernel: k.clone(), sub: None })
//!         .module(|k: &Kernel| Clock { kernel: k.clone() })
//!         .build();
//!
//!     let state = host.kernel().state.clone();
//!     let stop = host.shutdown_handle();
//!     tokio::spawn(async move {
//!         tokio::time::sleep(Duration::from_millis(50)).await;
//!         stop.trigger();
//!     });
//!
//!     let report = host.run().await?;
//!     assert!(report.is_clean());
//!     assert!(state.get("ticks", 0u64)? > 0);
//!     Ok(())
//! }
//! ```
mod bus;
mod error;
mod events;
mod fault;
mod host;
mod query;
mod scheduler;
mod state;

// ---- Public re-exports ----

pub use bus::{Bus, CorrelationId, Message, Query, Response, Subscription};
pub use error::{HandlerError, JobError, ModuleError, QueryError, RuntimeError, StateError};
pub use events::{EventKind, SupervisionEvent};
pub use host::{
    CriticalPolicy, Host, HostBuilder, HostConfig, Kernel, Module, ShutdownHandle,
    ShutdownReport, StartPolicy,
};
pub use query::{query, query_timeout, respond};
pub use scheduler::{
    BoxJobFuture, CriticalFailure, Job, JobFn, JobHandle, JobId, JobKind, JobRef, JobStatus,
    Scheduler,
};
pub use state::StateStore;
