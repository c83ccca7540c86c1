//! # Modules and the kernel services handed to them.
//!
//! A [`Module`] is a unit of functionality built by a factory that receives the
//! shared [`Kernel`]. During `start` it subscribes handlers and spawns jobs;
//! the host stops and drops it at shutdown. Subscriptions the module keeps as
//! fields are disposed when it is dropped.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use modvisor::{JobKind, Kernel, Module, ModuleError};
//!
//! struct TickEvent(u64);
//!
//! struct Ticker {
//!     kernel: Kernel,
//! }
//!
//! #[async_trait::async_trait]
//! impl Module for Ticker {
//!     fn name(&self) -> &str { "ticker" }
//!
//!     fn start(&mut self, scope: CancellationToken) -> Result<(), ModuleError> {
//!         let bus = self.kernel.bus.clone();
//!         self.kernel.scheduler.run_async("ticks", JobKind::Background, &scope, move |ctx| {
//!             let bus = bus.clone();
//!             async move {
//!                 let mut n = 0;
//!                 while !ctx.is_cancelled() {
//!                     bus.publish(TickEvent(n));
//!                     n += 1;
//!                     tokio::time::sleep(std::time::Duration::from_millis(10)).await;
//!                 }
//!                 Ok(())
//!             }
//!         });
//!         Ok(())
//!     }
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, Message, Subscription};
use crate::error::{HandlerError, ModuleError};
use crate::scheduler::Scheduler;
use crate::state::StateStore;

/// A module managed by the host.
#[async_trait]
pub trait Module: Send + 'static {
    /// Name used in logs and supervision events.
    fn name(&self) -> &str;

    /// Registers handlers and spawns jobs.
    ///
    /// Must return promptly; long-running work belongs in scheduler jobs
    /// spawned under `scope`. `scope` is cancelled when the host shuts down
    /// or when this start fails.
    fn start(&mut self, scope: CancellationToken) -> Result<(), ModuleError>;

    /// Releases resources; bounded by the host's grace period.
    async fn stop(&mut self) {}
}

/// Shared kernel services.
///
/// Cheap to clone; every clone refers to the same bus, store and scheduler.
#[derive(Clone, Debug)]
pub struct Kernel {
    /// Message bus.
    pub bus: Bus,
    /// Typed state store.
    pub state: StateStore,
    /// Supervised scheduler.
    pub scheduler: Scheduler,
    /// Lets any module request a host shutdown.
    pub shutdown: ShutdownHandle,
    /// Queue bound applied by [`Kernel::subscribe_queued`].
    pub queue_capacity: usize,
}

impl Kernel {
    pub(crate) fn new(queue_capacity: usize) -> Self {
        let bus = Bus::new();
        Self {
            scheduler: Scheduler::new(bus.clone()),
            state: StateStore::new(),
            shutdown: ShutdownHandle::new(),
            bus,
            queue_capacity,
        }
    }

    /// [`Bus::subscribe_queued`] with the host's configured queue capacity.
    pub fn subscribe_queued<M, F, Fut>(&self, name: impl Into<Arc<str>>, handler: F) -> Subscription
    where
        M: Message,
        F: Fn(Arc<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.bus.subscribe_queued(name, self.queue_capacity, handler)
    }
}

/// Cloneable trigger that asks a running host to shut down.
#[derive(Clone, Debug, Default)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// True once [`trigger`](Self::trigger) was called.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) async fn triggered(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, SupervisionEvent};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Debug)]
    struct Work(u32);

    #[tokio::test]
    async fn kernel_queue_uses_configured_capacity() {
        let kernel = Kernel::new(2);
        let started = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let overflows = Arc::new(Mutex::new(0usize));

        let o = Arc::clone(&overflows);
        let _watch = kernel.bus.subscribe("watch", move |ev: &SupervisionEvent| {
            if ev.kind == EventKind::HandlerOverflow {
                *o.lock().unwrap() += 1;
            }
            Ok(())
        });
        let (s, g) = (Arc::clone(&started), Arc::clone(&gate));
        let _sink = kernel.subscribe_queued("sink", move |_w: Arc<Work>| {
            let (s, g) = (Arc::clone(&s), Arc::clone(&g));
            async move {
                s.notify_one();
                g.notified().await;
                Ok(())
            }
        });

        kernel.bus.publish(Work(0));
        started.notified().await;
        // The worker holds Work(0); two more fit in the queue, the rest overflow.
        for n in 1..=5 {
            kernel.bus.publish(Work(n));
        }
        assert_eq!(*overflows.lock().unwrap(), 3);
    }

    #[test]
    fn shutdown_handle_is_shared_by_clones() {
        let kernel = Kernel::new(1);
        let other = kernel.clone();
        assert!(!kernel.shutdown.is_triggered());
        other.shutdown.trigger();
        assert!(kernel.shutdown.is_triggered());
    }
}
