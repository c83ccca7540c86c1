//! Typed message bus.
//!
//! ## Contents
//! - [`Bus`] publish/subscribe dispatcher keyed by message type
//! - [`Subscription`] disposable registration token
//! - [`Message`], [`Query`], [`Response`], [`CorrelationId`] message contracts
//! - `Bus::subscribe_queued` async handlers behind per-subscriber queues
//!
//! See `bus/bus.rs` for the dispatch diagram and delivery rules.

#[allow(clippy::module_inception)]
mod bus;
mod message;
mod queued;
mod subscription;

pub use bus::Bus;
pub use message::{CorrelationId, Message, Query, Response};
pub use subscription::Subscription;
