//! # Typed publish/subscribe dispatcher.
//!
//! [`Bus`] keeps one topic per message type (keyed by `TypeId`). Each topic
//! holds the ordered list of live registrations for that type.
//!
//! ## Architecture
//! ```text
//! publish::<M>(msg)
//!   └─► topics[TypeId::of::<M>()] ──► snapshot Vec<Arc<Slot<M>>>   (short read lock)
//!          │
//!          ├─► slot 1 active? ─► fault boundary ─► handler(&msg)
//!          ├─► slot 2 active? ─► fault boundary ─► handler(&msg)
//!          └─► slot N active? ─► fault boundary ─► handler(&msg)
//!
//! fault boundary: Err(HandlerError) | panic
//!   └─► warn! + SupervisionEvent::HandlerFaulted, continue with next slot
//! ```
//!
//! ## Rules
//! - **Snapshot delivery**: a publish sees the registrations present when its
//!   dispatch begins; registrations added meanwhile wait for the next publish.
//! - **Disposal wins**: the active flag is checked right before each call, so a
//!   registration disposed mid-dispatch is skipped.
//! - **No locks around user code**: topic locks are held only to clone or edit
//!   the slot list, so handlers may publish, subscribe or dispose freely.
//! - **Fault isolation**: a failing handler never reaches the publisher and
//!   never prevents delivery to the remaining handlers.
//! - **Per-publisher order**: dispatch is synchronous on the publishing thread,
//!   so one thread's messages reach a given handler in publish order.

use std::any::{Any, TypeId, type_name};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use dashmap::DashMap;

use super::message::Message;
use super::subscription::{Detach, Subscription};
use crate::error::HandlerError;
use crate::events::{EventKind, SupervisionEvent};
use crate::fault::panic_message;

pub(super) type SlotHandler<M> = Box<dyn Fn(&Arc<M>) -> Result<(), HandlerError> + Send + Sync>;

/// One registration inside a topic.
pub(super) struct Slot<M> {
    id: u64,
    name: Arc<str>,
    active: Arc<AtomicBool>,
    handler: SlotHandler<M>,
}

impl<M> Slot<M> {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Ordered registrations for one message type.
pub(super) struct Topic<M> {
    slots: RwLock<Vec<Arc<Slot<M>>>>,
}

impl<M: Message> Topic<M> {
    fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
        }
    }

    fn snapshot(&self) -> Vec<Arc<Slot<M>>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn insert(&self, slot: Arc<Slot<M>>) {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(slot);
    }

    fn active_len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.is_active())
            .count()
    }
}

impl<M: Message> Detach for Topic<M> {
    fn detach(&self, id: u64) {
        let removed = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            slots
                .iter()
                .position(|s| s.id == id)
                .map(|at| slots.remove(at))
        };
        // The handler may own other subscriptions; drop it outside the lock.
        drop(removed);
    }
}

pub(crate) struct Inner {
    topics: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    next_id: AtomicU64,
    faults: AtomicU64,
}

/// Typed message bus shared by every module.
///
/// Cheap to clone: all clones address the same subscription table.
///
/// ### Properties
/// - **Typed topics**: the message's Rust type is its topic.
/// - **Fire-and-forget**: `publish` never returns an error and never observes handler faults.
/// - **Thread-safe**: publish, subscribe and dispose need no caller-side locking.
#[derive(Clone)]
pub struct Bus {
    pub(crate) inner: Arc<Inner>,
}

impl Bus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: DashMap::new(),
                next_id: AtomicU64::new(1),
                faults: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Dispatches `msg` to every active registration for `M`.
    ///
    /// With no registration this is a no-op. Handler faults are contained,
    /// logged and reported as [`EventKind::HandlerFaulted`].
    pub fn publish<M: Message>(&self, msg: M) {
        let Some(topic) = self.topic::<M>() else {
            tracing::trace!(msg_type = type_name::<M>(), "publish without subscribers");
            return;
        };
        let snapshot = topic.snapshot();
        if snapshot.is_empty() {
            tracing::trace!(msg_type = type_name::<M>(), "publish without subscribers");
            return;
        }

        let msg = Arc::new(msg);
        for slot in snapshot {
            if slot.is_active() {
                self.invoke(&slot, &msg);
            }
        }
    }

    /// Registers a synchronous handler for `M`.
    ///
    /// The handler runs on the publisher's thread inside a fault boundary.
    /// `name` is used in logs only; subscribing twice with the same name
    /// creates two independent registrations.
    ///
    /// ## Example
    /// ```rust
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicU32, Ordering};
    /// use modvisor::Bus;
    ///
    /// struct Tick(u64);
    ///
    /// let bus = Bus::new();
    /// let seen = Arc::new(AtomicU32::new(0));
    /// let counter = seen.clone();
    /// let sub = bus.subscribe("counter", move |_t: &Tick| {
    ///     counter.fetch_add(1, Ordering::SeqCst);
    ///     Ok(())
    /// });
    ///
    /// bus.publish(Tick(1));
    /// sub.dispose();
    /// bus.publish(Tick(2));
    /// assert_eq!(seen.load(Ordering::SeqCst), 1);
    /// ```
    pub fn subscribe<M, F>(&self, name: impl Into<Arc<str>>, handler: F) -> Subscription
    where
        M: Message,
        F: Fn(&M) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register::<M>(name.into(), Box::new(move |msg| handler(msg.as_ref())))
    }

    /// Number of active registrations for `M`.
    pub fn subscriber_count<M: Message>(&self) -> usize {
        self.topic::<M>().map(|t| t.active_len()).unwrap_or(0)
    }

    /// Total number of handler faults contained since the bus was created.
    pub fn fault_count(&self) -> u64 {
        self.inner.faults.load(Ordering::Relaxed)
    }

    pub(super) fn register<M: Message>(
        &self,
        name: Arc<str>,
        handler: SlotHandler<M>,
    ) -> Subscription {
        let topic = self.topic_or_insert::<M>();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));

        topic.insert(Arc::new(Slot {
            id,
            name: Arc::clone(&name),
            active: Arc::clone(&active),
            handler,
        }));
        tracing::debug!(handler = %name, msg_type = type_name::<M>(), "subscribed");

        let detach: Arc<dyn Detach> = topic;
        Subscription::new(id, name, type_name::<M>(), active, Arc::downgrade(&detach))
    }

    fn topic<M: Message>(&self) -> Option<Arc<Topic<M>>> {
        let any = self
            .inner
            .topics
            .get(&TypeId::of::<M>())
            .map(|entry| Arc::clone(entry.value()))?;
        any.downcast::<Topic<M>>().ok()
    }

    fn topic_or_insert<M: Message>(&self) -> Arc<Topic<M>> {
        let any = Arc::clone(
            self.inner
                .topics
                .entry(TypeId::of::<M>())
                .or_insert_with(|| Arc::new(Topic::<M>::new()) as Arc<dyn Any + Send + Sync>)
                .value(),
        );
        match any.downcast::<Topic<M>>() {
            Ok(topic) => topic,
            Err(_) => unreachable!("topic table is keyed by the message TypeId"),
        }
    }

    /// Runs one handler inside the fault boundary.
    fn invoke<M: Message>(&self, slot: &Slot<M>, msg: &Arc<M>) {
        let fault = match panic::catch_unwind(AssertUnwindSafe(|| (slot.handler)(msg))) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        self.report_fault::<M>(&slot.name, &fault);
    }

    /// Logs a contained handler fault and announces it on the bus.
    ///
    /// Faults inside `SupervisionEvent` handlers are only logged.
    pub(super) fn report_fault<M: Message>(&self, handler: &str, fault: &str) {
        self.inner.faults.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            handler,
            msg_type = type_name::<M>(),
            error = fault,
            "bus handler faulted"
        );
        if TypeId::of::<M>() != TypeId::of::<SupervisionEvent>() {
            self.publish(
                SupervisionEvent::new(EventKind::HandlerFaulted)
                    .with_subject(handler)
                    .with_reason(format!("{}: {fault}", type_name::<M>())),
            );
        }
    }

    /// Logs a message dropped by a full handler queue.
    pub(super) fn report_overflow<M: Message>(&self, handler: &str) {
        tracing::warn!(
            handler,
            msg_type = type_name::<M>(),
            "handler queue full; message dropped"
        );
        if TypeId::of::<M>() != TypeId::of::<SupervisionEvent>() {
            self.publish(
                SupervisionEvent::new(EventKind::HandlerOverflow)
                    .with_subject(handler)
                    .with_reason(type_name::<M>()),
            );
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("topics", &self.inner.topics.len())
            .field("faults", &self.fault_count())
            .finish()
    }
}
