//! # Message shapes and correlation identifiers.
//!
//! A message's topic is its Rust type: publishing a `Tick` reaches every
//! subscription registered for `Tick` and nothing else. Any `Send + Sync + 'static`
//! type is a [`Message`].
//!
//! Request/reply pairs opt into [`Query`] and [`Response`], which expose the
//! [`CorrelationId`] the correlator matches on. By convention the id is the
//! first field and the type is named `<Verb><Noun>Query` / `<Verb><Noun>Response`.
//!
//! ## Example
//! ```rust
//! use modvisor::{CorrelationId, Query, Response};
//!
//! struct GetClockQuery { id: CorrelationId }
//!
//! #[derive(Clone)]
//! struct GetClockResponse { id: CorrelationId, ticks: u64 }
//!
//! impl Query for GetClockQuery {
//!     type Response = GetClockResponse;
//!     fn correlation_id(&self) -> CorrelationId { self.id }
//! }
//!
//! impl Response for GetClockResponse {
//!     fn correlation_id(&self) -> CorrelationId { self.id }
//! }
//! ```

use std::fmt;

use uuid::Uuid;

/// Any value that can travel on the bus.
pub trait Message: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Message for T {}

/// Globally unique id linking a query to its response.
///
/// Minted by the issuer, never reused, unrelated to delivery order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Mints a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationId({})", self.0)
    }
}

/// A request expecting exactly one [`Response`] with the same correlation id.
pub trait Query: Message {
    /// The reply shape.
    type Response: Response;

    /// Id minted by the issuer.
    fn correlation_id(&self) -> CorrelationId;
}

/// A reply to a [`Query`].
pub trait Response: Message + Clone {
    /// Id copied from the query being answered.
    fn correlation_id(&self) -> CorrelationId;
}
