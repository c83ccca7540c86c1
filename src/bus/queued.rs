//! # Queued subscriptions: async handlers behind a bounded queue.
//!
//! [`Bus::subscribe_queued`] registers a slot whose synchronous part only
//! pushes the message into a per-subscriber queue. A dedicated worker task
//! drains the queue and awaits the handler.
//!
//! ## Diagram
//! ```text
//!    publish(msg)
//!        │                        (Arc-clone per message)
//!        ├──► sync slot ──try_send──► [queue S1] ─► worker S1 ─► handler(msg).await
//!        └──► other slots ...
//! ```
//!
//! ## What it guarantees
//! - `publish` never waits for the handler.
//! - Per-subscriber FIFO (queue order).
//! - Errors and panics inside the handler are caught and reported like any
//!   other handler fault.
//! - Once disposed, queued messages still waiting are discarded, not handled.
//!
//! ## What it does **not** guarantee
//! - No retries on overflow: a full queue drops the message for that subscriber.

use std::any::type_name;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use tokio::sync::mpsc;

use super::bus::Bus;
use super::message::Message;
use super::subscription::Subscription;
use crate::error::HandlerError;
use crate::fault::panic_message;

impl Bus {
    /// Registers an async handler for `M` driven by its own worker task.
    ///
    /// `capacity` bounds the queue (min 1). When the queue is full the message
    /// is dropped for this subscriber and a
    /// [`EventKind::HandlerOverflow`](crate::EventKind::HandlerOverflow) is published.
    ///
    /// # Panics
    /// Must be called from within a tokio runtime (the worker is spawned here).
    pub fn subscribe_queued<M, F, Fut>(
        &self,
        name: impl Into<Arc<str>>,
        capacity: usize,
        handler: F,
    ) -> Subscription
    where
        M: Message,
        F: Fn(Arc<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let name: Arc<str> = name.into();
        let (tx, mut rx) = mpsc::channel::<Arc<M>>(capacity.max(1));

        let weak = Arc::downgrade(&self.inner);
        let slot_name = Arc::clone(&name);
        let sub = self.register::<M>(
            Arc::clone(&name),
            Box::new(move |msg: &Arc<M>| {
                match tx.try_send(Arc::clone(msg)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        if let Some(bus) = Bus::from_weak(&weak) {
                            bus.report_overflow::<M>(&slot_name);
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!(
                            handler = %slot_name,
                            msg_type = type_name::<M>(),
                            "handler worker closed; message dropped"
                        );
                    }
                }
                Ok(())
            }),
        );

        let active: Arc<AtomicBool> = sub.active_flag();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if !active.load(Ordering::Acquire) {
                    break;
                }
                let fut = async { handler(msg).await };
                let fault = match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e.to_string(),
                    Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
                };
                match Bus::from_weak(&weak) {
                    Some(bus) => bus.report_fault::<M>(&name, &fault),
                    None => break,
                }
            }
            tracing::debug!(handler = %name, msg_type = type_name::<M>(), "handler worker stopped");
        });

        sub
    }
}
