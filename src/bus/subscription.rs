//! # Subscription tokens.
//!
//! A [`Subscription`] is the registrant's handle on one live registration.
//! Disposal is the only way a registration ends: either explicitly through
//! [`Subscription::dispose`] or implicitly when the token is dropped.
//! [`Subscription::detach`] gives up the token while keeping the registration
//! for as long as the bus lives.
//!
//! ## Rules
//! - `dispose` is idempotent and safe from any thread, including from inside
//!   a handler invocation (the handler's own included).
//! - After `dispose` returns the handler is never invoked again, even for a
//!   publish whose dispatch already started.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Removal hook implemented by every per-type topic.
pub(crate) trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

/// Live registration of a handler against a message type.
#[must_use = "dropping a Subscription disposes it; call `detach()` to keep it registered"]
pub struct Subscription {
    id: u64,
    name: Arc<str>,
    message_type: &'static str,
    active: Arc<AtomicBool>,
    topic: Weak<dyn Detach>,
    detached: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        name: Arc<str>,
        message_type: &'static str,
        active: Arc<AtomicBool>,
        topic: Weak<dyn Detach>,
    ) -> Self {
        Self {
            id,
            name,
            message_type,
            active,
            topic,
            detached: false,
        }
    }

    /// Deactivates the registration and removes it from the bus.
    pub fn dispose(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            if let Some(topic) = self.topic.upgrade() {
                topic.detach(self.id);
            }
        }
    }

    /// Releases the token without disposing; the handler stays registered.
    pub fn detach(mut self) {
        self.detached = true;
    }

    /// True until disposed.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn active_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.active)
    }

    /// Diagnostic handler name given at subscribe time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type name of the subscribed message.
    pub fn message_type(&self) -> &'static str {
        self.message_type
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.detached {
            self.dispose();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("message_type", &self.message_type)
            .field("active", &self.is_active())
            .finish()
    }
}
