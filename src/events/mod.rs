//! Kernel lifecycle events.
//!
//! ## Contents
//! - [`EventKind`], [`SupervisionEvent`] event classification and payload metadata
//!
//! ## Quick reference
//! - **Publishers**: `Bus` (handler faults/overflow), `Scheduler` (job lifecycle),
//!   `Host` (module lifecycle, shutdown progress).
//! - **Consumers**: any module subscribing to [`SupervisionEvent`].

mod event;

pub use event::{EventKind, SupervisionEvent};
