//! Shared typed state.
//!
//! - [`StateStore`] concurrent typed key/value map injected into every module.

mod store;

pub use store::StateStore;
